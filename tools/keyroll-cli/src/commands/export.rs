//! Export a song to a tall PNG.

use std::io::Write;
use std::path::{Path, PathBuf};

use keyroll_common::config::AppConfig;
use keyroll_render_engine::export::{
    ExportJob, ExportOptions, ExportProgress, ExportStage, Exporter,
};
use keyroll_render_engine::roll::RollStyle;

use crate::GeometryArgs;

pub async fn run(
    exporter: &Exporter,
    config: &AppConfig,
    song: PathBuf,
    output: Option<PathBuf>,
    geometry: GeometryArgs,
    style: Option<PathBuf>,
) -> anyhow::Result<()> {
    println!("Exporting song: {}", song.display());

    let defaults = super::effective_defaults(config, &geometry)?;
    let mut options = ExportOptions::from_defaults(&defaults);
    if let Some(style_path) = style {
        options.style = RollStyle::load(&style_path)?;
    }

    let output_path = output.unwrap_or_else(|| default_output_path(&config.exports_dir, &song));

    println!("  Output: {}", output_path.display());
    println!(
        "  Buffer: {}x{} at {} px/s",
        options.buffer_width, options.buffer_height, options.time_resolution
    );
    if options.pitch_shift != 0 {
        println!("  Pitch shift: {:+}", options.pitch_shift);
    }

    let job = ExportJob {
        song_path: song,
        output_path: output_path.clone(),
        options,
    };

    let progress_cb: Box<dyn Fn(ExportProgress) + Send> = Box::new(|p| {
        if matches!(p.stage, ExportStage::Rendering | ExportStage::Encoding) {
            print!(
                "\r  Progress: {:5.1}% (pass {}/{}, {:?})   ",
                p.progress * 100.0,
                p.pass + 1,
                p.pass_count,
                p.stage,
            );
            std::io::stdout().flush().ok();
        }
    });

    match exporter.export(&job, Some(progress_cb)).await {
        Ok(summary) => {
            println!(
                "\nExport complete: {} ({}x{}, {} passes, {} ms)",
                summary.output_path.display(),
                summary.width,
                summary.height,
                summary.pass_count,
                summary.elapsed_ms
            );
            Ok(())
        }
        Err(e) => {
            println!("\nExport failed: {e}");
            Err(e.into())
        }
    }
}

/// `<exports_dir>/<song stem>-<timestamp>.png`
fn default_output_path(exports_dir: &Path, song: &Path) -> PathBuf {
    let stem = song
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "song".to_string());
    let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
    exports_dir.join(format!("{stem}-{stamp}.png"))
}
