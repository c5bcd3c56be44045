//! Software piano-roll renderer.
//!
//! Time runs upward: the bottom edge of the target shows `scroll_secs` and
//! the top edge shows `scroll_secs + height / time_resolution`. Keys are laid
//! out left to right in equal-width columns after an optional sustain band.

use std::path::Path;

use serde::{Deserialize, Serialize};

use keyroll_common::error::{KeyrollError, KeyrollResult};
use keyroll_song_model::{Song, MAX_KEY};

use crate::target::{Color, ExportTarget, SceneRenderer};

/// Visual settings for the piano roll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RollStyle {
    pub background: Color,

    /// Lane colour behind black keys.
    pub black_key_lane: Color,

    /// Note colour per MIDI channel, cycled when there are more channels.
    pub channel_colors: Vec<Color>,

    pub sustain: Color,

    /// Lowest key drawn, inclusive.
    pub low_key: u8,

    /// Highest key drawn, inclusive.
    pub high_key: u8,

    /// Empty pixels on the right of each key column.
    pub key_gap: u32,

    /// Width of the sustain band on the left edge. Zero hides it.
    pub sustain_width: u32,
}

impl Default for RollStyle {
    fn default() -> Self {
        Self {
            background: Color::rgb(18, 18, 24),
            black_key_lane: Color::rgb(28, 28, 36),
            channel_colors: vec![
                Color::rgb(94, 176, 255),
                Color::rgb(255, 140, 90),
                Color::rgb(120, 220, 140),
                Color::rgb(230, 110, 200),
            ],
            sustain: Color::rgb(200, 200, 90),
            low_key: 21,
            high_key: 108,
            key_gap: 1,
            sustain_width: 6,
        }
    }
}

impl RollStyle {
    /// Load a style from a JSON file. Missing fields keep their defaults.
    pub fn load(path: impl AsRef<Path>) -> KeyrollResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(KeyrollError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let content = std::fs::read_to_string(path)?;
        let style: RollStyle = serde_json::from_str(&content)?;
        style.validate()?;
        Ok(style)
    }

    pub fn validate(&self) -> KeyrollResult<()> {
        if self.low_key > self.high_key || self.high_key > MAX_KEY {
            return Err(KeyrollError::config(format!(
                "Invalid key range {}..={}",
                self.low_key, self.high_key
            )));
        }
        Ok(())
    }

    pub fn key_count(&self) -> u32 {
        (self.high_key.saturating_sub(self.low_key)) as u32 + 1
    }

    fn note_color(&self, channel: u8, velocity: u8) -> Color {
        let base = if self.channel_colors.is_empty() {
            Color::rgb(255, 255, 255)
        } else {
            self.channel_colors[channel as usize % self.channel_colors.len()]
        };
        base.scaled(0.4 + 0.6 * velocity as f64 / 127.0)
    }
}

fn is_black_key(key: i32) -> bool {
    matches!(key.rem_euclid(12), 1 | 3 | 6 | 8 | 10)
}

/// Draws a [`Song`] as a vertical piano roll.
pub struct PianoRollRenderer<'a> {
    song: &'a Song,
    style: RollStyle,
}

impl<'a> PianoRollRenderer<'a> {
    pub fn new(song: &'a Song, style: RollStyle) -> Self {
        Self { song, style }
    }

    pub fn style(&self) -> &RollStyle {
        &self.style
    }

    /// Horizontal extent `[x0, x1)` of a key column, or `None` when the key
    /// is out of range or the column collapses to nothing.
    fn key_columns(&self, key: i32, width: u32) -> Option<(u32, u32)> {
        let low = self.style.low_key as i32;
        let high = self.style.high_key as i32;
        if key < low || key > high {
            return None;
        }

        let band = self.style.sustain_width.min(width);
        let roll_width = (width - band) as u64;
        let keys = self.style.key_count() as u64;
        let index = (key - low) as u64;

        let x0 = band + (index * roll_width / keys) as u32;
        let next = band + ((index + 1) * roll_width / keys) as u32;
        if next <= x0 {
            return None;
        }
        let x1 = next.saturating_sub(self.style.key_gap).max(x0 + 1);
        Some((x0, x1))
    }
}

/// Slack for row positions that land a rounding error below a whole row.
const ROW_SNAP: f64 = 1e-6;

/// Buffer rows `[top, bottom)` covering the time span `[start, end)`.
fn span_rows(start: f64, end: f64, scroll: f64, resolution: f64, height: u32) -> (u32, u32) {
    let h = height as f64;
    let to_row =
        |t: f64| (h - (t - scroll) * resolution + ROW_SNAP).floor().clamp(0.0, h) as u32;
    (to_row(end), to_row(start))
}

impl SceneRenderer for PianoRollRenderer<'_> {
    fn render(
        &mut self,
        target: &mut ExportTarget,
        scroll_secs: f64,
        time_resolution: f64,
        pitch_shift: i32,
    ) -> KeyrollResult<()> {
        if !(time_resolution.is_finite() && time_resolution > 0.0) {
            return Err(KeyrollError::render(format!(
                "Time resolution must be positive, got {time_resolution}"
            )));
        }
        self.style
            .validate()
            .map_err(|e| KeyrollError::render(e.to_string()))?;

        let width = target.width();
        let height = target.height();
        let view_start = scroll_secs;
        let view_end = scroll_secs + height as f64 / time_resolution;

        target.fill(self.style.background);

        for key in self.style.low_key as i32..=self.style.high_key as i32 {
            if !is_black_key(key) {
                continue;
            }
            if let Some((x0, x1)) = self.key_columns(key, width) {
                target.fill_rect(x0, 0, x1, height, self.style.black_key_lane);
            }
        }

        let band = self.style.sustain_width.min(width);
        if band > 0 {
            for span in self.song.sustains_overlapping(view_start, view_end) {
                let (top, bottom) = span_rows(
                    span.start_secs,
                    span.end_secs,
                    scroll_secs,
                    time_resolution,
                    height,
                );
                target.fill_rect(0, top, band, bottom, self.style.sustain);
            }
        }

        let mut drawn = 0usize;
        for note in self.song.notes_overlapping(view_start, view_end) {
            let key = note.key as i32 + pitch_shift;
            let Some((x0, x1)) = self.key_columns(key, width) else {
                continue;
            };
            let (top, bottom) = span_rows(
                note.start_secs,
                note.end_secs,
                scroll_secs,
                time_resolution,
                height,
            );
            target.fill_rect(
                x0,
                top,
                x1,
                bottom,
                self.style.note_color(note.channel, note.velocity),
            );
            drawn += 1;
        }

        tracing::trace!(
            scroll = scroll_secs,
            view_end,
            notes = drawn,
            "Piano roll slice rendered"
        );
        Ok(())
    }
}
