pub mod check;
pub mod export;
pub mod info;
pub mod plan;

use std::path::Path;

use keyroll_common::config::{AppConfig, ExportDefaults};
use keyroll_song_model::Song;

use crate::GeometryArgs;

/// Configured export defaults with command-line overrides applied.
pub fn effective_defaults(
    config: &AppConfig,
    geometry: &GeometryArgs,
) -> anyhow::Result<ExportDefaults> {
    let base = &config.export;
    let defaults = ExportDefaults {
        time_resolution: geometry.resolution.unwrap_or(base.time_resolution),
        buffer_width: geometry.width.unwrap_or(base.buffer_width),
        buffer_height: geometry.buffer_height.unwrap_or(base.buffer_height),
        pitch_shift: geometry.pitch_shift.unwrap_or(base.pitch_shift),
    };
    defaults.validate()?;
    Ok(defaults)
}

pub fn load_song(path: &Path) -> anyhow::Result<Song> {
    Song::load(path).map_err(|e| anyhow::anyhow!("Failed to load song: {e}"))
}
