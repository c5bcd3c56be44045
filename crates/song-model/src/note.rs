//! Note and sustain types.
//!
//! Keys use MIDI numbering (`60` is middle C). Channels are `0..16`.

use serde::{Deserialize, Serialize};

/// Highest valid MIDI key number.
pub const MAX_KEY: u8 = 127;

/// A single sounded note.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Note {
    /// Note-on time in seconds.
    #[serde(rename = "start")]
    pub start_secs: f64,

    /// Note-off time in seconds.
    #[serde(rename = "end")]
    pub end_secs: f64,

    /// MIDI key number.
    pub key: u8,

    /// Note-on velocity.
    #[serde(default = "default_velocity")]
    pub velocity: u8,

    /// MIDI channel.
    #[serde(default)]
    pub channel: u8,
}

/// A span during which the sustain pedal is held down.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SustainSpan {
    /// Pedal-down time in seconds.
    #[serde(rename = "start")]
    pub start_secs: f64,

    /// Pedal-up time in seconds.
    #[serde(rename = "end")]
    pub end_secs: f64,

    /// MIDI channel.
    #[serde(default)]
    pub channel: u8,
}

fn default_velocity() -> u8 {
    100
}

impl Note {
    /// Create a note on channel 0.
    pub fn new(start_secs: f64, end_secs: f64, key: u8, velocity: u8) -> Self {
        Self {
            start_secs,
            end_secs,
            key,
            velocity,
            channel: 0,
        }
    }

    /// Builder-style channel override.
    pub fn on_channel(mut self, channel: u8) -> Self {
        self.channel = channel;
        self
    }

    /// Length of the note in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.end_secs - self.start_secs
    }

    /// Whether the note sounds at any point inside `[from, to)`.
    pub fn overlaps(&self, from: f64, to: f64) -> bool {
        self.start_secs < to && self.end_secs > from
    }

    /// Whether the key is a black key on a piano keyboard.
    pub fn is_black_key(&self) -> bool {
        matches!(self.key % 12, 1 | 3 | 6 | 8 | 10)
    }
}

impl SustainSpan {
    pub fn new(start_secs: f64, end_secs: f64, channel: u8) -> Self {
        Self {
            start_secs,
            end_secs,
            channel,
        }
    }

    /// Whether the pedal is down at any point inside `[from, to)`.
    pub fn overlaps(&self, from: f64, to: f64) -> bool {
        self.start_secs < to && self.end_secs > from
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_json_defaults() {
        let note: Note = serde_json::from_str(r#"{"start":1.0,"end":1.5,"key":60}"#).unwrap();
        assert_eq!(note.velocity, 100);
        assert_eq!(note.channel, 0);
        assert!((note.duration_secs() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_overlap_is_half_open() {
        let note = Note::new(1.0, 2.0, 60, 90);
        assert!(note.overlaps(1.5, 3.0));
        assert!(note.overlaps(0.0, 1.01));
        assert!(!note.overlaps(2.0, 3.0));
        assert!(!note.overlaps(0.0, 1.0));
    }

    #[test]
    fn test_black_keys() {
        let black: Vec<u8> = (60..72)
            .filter(|k| Note::new(0.0, 1.0, *k, 1).is_black_key())
            .collect();
        assert_eq!(black, vec![61, 63, 66, 68, 70]);
    }
}
