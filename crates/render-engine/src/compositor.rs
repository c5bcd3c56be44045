//! Tall-canvas compositor: splits an arbitrarily tall image into passes.
//!
//! The full image is `content_height` rows. A pass renders one
//! buffer-height slice of the timeline; only the bottom-aligned
//! `pass_height` rows of that slice are new content. Passes run from the
//! highest content offset down to zero, so the first pass supplies the top
//! rows of the output file.
//!
//! ```text
//!   pass 0   offset = H * (n - 1)   rows [H - h0, H) valid (h0 may be < H)
//!   pass 1   offset = H * (n - 2)   rows [0, H) valid
//!   ...
//!   pass n-1 offset = 0             rows [0, H) valid
//! ```

use serde::Serialize;

use keyroll_common::error::{KeyrollError, KeyrollResult};

/// Geometry of a tall export against a bounded render buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TallCanvas {
    song_duration_secs: f64,
    time_resolution: f64,
    content_height: u32,
    buffer_height: u32,
    pass_count: u32,
}

/// Render instruction and valid region for one pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PassPlan {
    /// Pass index in processing order.
    pub index: u32,
    /// Logical row offset brought into view at the bottom of the buffer.
    pub content_offset: u32,
    /// Song time handed to the renderer as its scroll position.
    pub scroll_value: f64,
    /// Number of valid rows produced by this pass.
    pub pass_height: u32,
    /// First valid buffer row; valid rows are `[buffer_start_row, buffer_height)`.
    pub buffer_start_row: u32,
}

impl TallCanvas {
    /// Build the pass geometry for a song.
    ///
    /// `content_height` is `round(song_duration_secs * time_resolution)`.
    pub fn new(
        song_duration_secs: f64,
        time_resolution: f64,
        buffer_height: u32,
    ) -> KeyrollResult<Self> {
        if buffer_height == 0 {
            return Err(KeyrollError::config("Render buffer height must be at least 1"));
        }
        if !(time_resolution.is_finite() && time_resolution > 0.0) {
            return Err(KeyrollError::config(format!(
                "Time resolution must be positive, got {time_resolution}"
            )));
        }
        if !(song_duration_secs.is_finite() && song_duration_secs >= 0.0) {
            return Err(KeyrollError::config(format!(
                "Song duration must be non-negative, got {song_duration_secs}"
            )));
        }

        let rows = (song_duration_secs * time_resolution).round();
        if rows > u32::MAX as f64 {
            return Err(KeyrollError::config(format!(
                "Content height of {rows} rows exceeds the supported maximum"
            )));
        }
        let content_height = rows as u32;
        let pass_count = content_height.div_ceil(buffer_height).max(1);

        Ok(Self {
            song_duration_secs,
            time_resolution,
            content_height,
            buffer_height,
            pass_count,
        })
    }

    pub fn content_height(&self) -> u32 {
        self.content_height
    }

    pub fn buffer_height(&self) -> u32 {
        self.buffer_height
    }

    pub fn pass_count(&self) -> u32 {
        self.pass_count
    }

    pub fn song_duration_secs(&self) -> f64 {
        self.song_duration_secs
    }

    pub fn time_resolution(&self) -> f64 {
        self.time_resolution
    }

    /// Row offset of pass `pass` within the full content, counted from the
    /// start of the song.
    pub fn content_offset(&self, pass: u32) -> u32 {
        let remaining = self.pass_count.saturating_sub(pass + 1);
        (self.buffer_height as u64 * remaining as u64) as u32
    }

    /// Scroll position (song time) for pass `pass`.
    pub fn scroll_value(&self, pass: u32) -> f64 {
        if self.content_height == 0 {
            return 0.0;
        }
        self.song_duration_secs * self.content_offset(pass) as f64 / self.content_height as f64
    }

    /// Valid rows produced by pass `pass`.
    pub fn pass_height(&self, pass: u32) -> u32 {
        self.content_height
            .saturating_sub(self.content_offset(pass))
            .min(self.buffer_height)
    }

    /// First valid buffer row of pass `pass`.
    pub fn buffer_start_row(&self, pass: u32) -> u32 {
        self.buffer_height - self.pass_height(pass)
    }

    pub fn plan(&self, pass: u32) -> PassPlan {
        PassPlan {
            index: pass,
            content_offset: self.content_offset(pass),
            scroll_value: self.scroll_value(pass),
            pass_height: self.pass_height(pass),
            buffer_start_row: self.buffer_start_row(pass),
        }
    }

    /// Every pass in processing order.
    pub fn plans(&self) -> impl Iterator<Item = PassPlan> + '_ {
        (0..self.pass_count).map(|pass| self.plan(pass))
    }
}
