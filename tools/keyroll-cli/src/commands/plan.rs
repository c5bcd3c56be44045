//! Print how an export is split into passes.

use std::path::PathBuf;

use keyroll_common::config::AppConfig;
use keyroll_render_engine::compositor::{PassPlan, TallCanvas};

use crate::GeometryArgs;

pub fn run(
    config: &AppConfig,
    song_path: PathBuf,
    geometry: GeometryArgs,
    json: bool,
) -> anyhow::Result<()> {
    let song = super::load_song(&song_path)?;
    let defaults = super::effective_defaults(config, &geometry)?;
    let canvas = TallCanvas::new(
        song.duration_secs(),
        defaults.time_resolution,
        defaults.buffer_height,
    )?;
    let plans: Vec<PassPlan> = canvas.plans().collect();

    if json {
        let doc = serde_json::json!({
            "song": song.name,
            "width": defaults.buffer_width,
            "content_height": canvas.content_height(),
            "buffer_height": canvas.buffer_height(),
            "passes": plans,
        });
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(());
    }

    println!("Song: {} ({:.2}s)", song.name, song.duration_secs());
    println!(
        "Image: {}x{} from a {}x{} buffer at {} px/s",
        defaults.buffer_width,
        canvas.content_height(),
        defaults.buffer_width,
        canvas.buffer_height(),
        defaults.time_resolution
    );
    println!("Passes: {}", canvas.pass_count());
    println!();
    println!(
        "{:>6} {:>10} {:>12} {:>8} {:>10}",
        "pass", "offset", "scroll (s)", "rows", "start row"
    );
    for plan in &plans {
        println!(
            "{:>6} {:>10} {:>12.3} {:>8} {:>10}",
            plan.index,
            plan.content_offset,
            plan.scroll_value,
            plan.pass_height,
            plan.buffer_start_row
        );
    }
    if canvas.content_height() == 0 {
        println!();
        println!("Song is empty; there is nothing to export.");
    }

    Ok(())
}
