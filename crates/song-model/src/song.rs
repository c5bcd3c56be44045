//! Song container and loading.
//!
//! A song is the full set of notes and sustain spans to draw. Its duration
//! is the end of the last sounding event and drives the height of the
//! exported image.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::midi;
use crate::note::{Note, SustainSpan, MAX_KEY};

/// A loaded song (`*.json` or `*.mid`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Song {
    /// Human-readable song name.
    #[serde(default)]
    pub name: String,

    /// Notes sorted by start time.
    #[serde(default)]
    pub notes: Vec<Note>,

    /// Sustain spans sorted by start time.
    #[serde(default)]
    pub sustains: Vec<SustainSpan>,
}

impl Song {
    /// Create a song, sorting notes and sustains by start time.
    pub fn new(name: impl Into<String>, notes: Vec<Note>, sustains: Vec<SustainSpan>) -> Self {
        let mut song = Self {
            name: name.into(),
            notes,
            sustains,
        };
        song.sort();
        song
    }

    /// Load a song from disk, picking the parser from the file extension.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SongError> {
        let path = path.as_ref();
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        let bytes = std::fs::read(path).map_err(|e| SongError::IoError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let mut song = match extension.as_str() {
            "json" => serde_json::from_slice::<Song>(&bytes).map_err(|e| SongError::ParseError {
                path: path.to_path_buf(),
                source: e,
            })?,
            "mid" | "midi" | "smf" => midi::parse_smf(&bytes)?,
            other => {
                return Err(SongError::UnsupportedFormat {
                    path: path.to_path_buf(),
                    extension: other.to_string(),
                })
            }
        };

        if song.name.is_empty() {
            song.name = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_default();
        }
        song.sort();

        let problems = song.validate();
        if !problems.is_empty() {
            return Err(SongError::ValidationError {
                message: problems.join("; "),
            });
        }

        Ok(song)
    }

    /// Save the song as pretty-printed JSON.
    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<(), SongError> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self).map_err(|e| SongError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;
        std::fs::write(path, json).map_err(|e| SongError::IoError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Total song length in seconds: the latest note or sustain end.
    pub fn duration_secs(&self) -> f64 {
        let note_end = self.notes.iter().map(|n| n.end_secs);
        let sustain_end = self.sustains.iter().map(|s| s.end_secs);
        note_end.chain(sustain_end).fold(0.0, f64::max)
    }

    /// Notes sounding at any point inside `[from, to)`.
    pub fn notes_overlapping(&self, from: f64, to: f64) -> impl Iterator<Item = &Note> {
        let candidates = self.notes.partition_point(|n| n.start_secs < to);
        self.notes[..candidates]
            .iter()
            .filter(move |n| n.end_secs > from)
    }

    /// Sustain spans active at any point inside `[from, to)`.
    pub fn sustains_overlapping(&self, from: f64, to: f64) -> impl Iterator<Item = &SustainSpan> {
        let candidates = self.sustains.partition_point(|s| s.start_secs < to);
        self.sustains[..candidates]
            .iter()
            .filter(move |s| s.end_secs > from)
    }

    /// Lowest and highest key used, if the song has notes.
    pub fn key_span(&self) -> Option<(u8, u8)> {
        let low = self.notes.iter().map(|n| n.key).min()?;
        let high = self.notes.iter().map(|n| n.key).max()?;
        Some((low, high))
    }

    /// Describe every structural problem in the song.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = vec![];

        for (idx, note) in self.notes.iter().enumerate() {
            if !(note.start_secs.is_finite() && note.end_secs.is_finite()) {
                errors.push(format!("note {idx} has a non-finite time"));
            } else if note.start_secs < 0.0 {
                errors.push(format!("note {idx} starts before zero"));
            } else if note.end_secs < note.start_secs {
                errors.push(format!("note {idx} ends before it starts"));
            }
            if note.key > MAX_KEY {
                errors.push(format!("note {idx} has key {} above {MAX_KEY}", note.key));
            }
        }

        for (idx, span) in self.sustains.iter().enumerate() {
            if !(span.start_secs.is_finite() && span.end_secs.is_finite()) {
                errors.push(format!("sustain {idx} has a non-finite time"));
            } else if span.start_secs < 0.0 || span.end_secs < span.start_secs {
                errors.push(format!("sustain {idx} has an invalid span"));
            }
        }

        errors
    }

    fn sort(&mut self) {
        self.notes
            .sort_by(|a, b| a.start_secs.total_cmp(&b.start_secs).then(a.key.cmp(&b.key)));
        self.sustains
            .sort_by(|a, b| a.start_secs.total_cmp(&b.start_secs));
    }
}

/// Errors that can occur when loading songs.
#[derive(Debug, thiserror::Error)]
pub enum SongError {
    #[error("I/O error at {path}: {source}")]
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Parse error in {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Invalid MIDI data: {0}")]
    MidiError(String),

    #[error("Unsupported MIDI timing: {0}")]
    UnsupportedTiming(String),

    #[error("Unsupported song format '{extension}' for {path}")]
    UnsupportedFormat { path: PathBuf, extension: String },

    #[error("Invalid song: {message}")]
    ValidationError { message: String },
}

impl From<midly::Error> for SongError {
    fn from(e: midly::Error) -> Self {
        SongError::MidiError(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_song() -> Song {
        Song::new(
            "Sample",
            vec![
                Note::new(2.0, 3.0, 64, 80),
                Note::new(0.0, 1.0, 60, 80),
                Note::new(0.5, 4.5, 67, 80),
            ],
            vec![SustainSpan::new(4.0, 6.0, 0)],
        )
    }

    #[test]
    fn test_new_sorts_notes() {
        let song = sample_song();
        let starts: Vec<f64> = song.notes.iter().map(|n| n.start_secs).collect();
        assert_eq!(starts, vec![0.0, 0.5, 2.0]);
    }

    #[test]
    fn test_duration_includes_sustain() {
        assert!((sample_song().duration_secs() - 6.0).abs() < 1e-9);
        assert_eq!(Song::default().duration_secs(), 0.0);
    }

    #[test]
    fn test_notes_overlapping_window() {
        let song = sample_song();
        let keys: Vec<u8> = song.notes_overlapping(1.5, 2.5).map(|n| n.key).collect();
        assert_eq!(keys, vec![67, 64]);
        assert_eq!(song.notes_overlapping(5.0, 6.0).count(), 0);
        assert_eq!(song.sustains_overlapping(5.0, 6.0).count(), 1);
    }

    #[test]
    fn test_key_span() {
        assert_eq!(sample_song().key_span(), Some((60, 67)));
        assert_eq!(Song::default().key_span(), None);
    }

    #[test]
    fn test_validate_reports_inverted_note() {
        let song = Song::new("Bad", vec![Note::new(2.0, 1.0, 60, 80)], vec![]);
        let errors = song.validate();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("ends before it starts"));
    }

    #[test]
    fn test_json_save_and_load() {
        let dir = std::env::temp_dir().join("keyroll_test_song_json");
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();

        let path = dir.join("sample.json");
        sample_song().save_json(&path).unwrap();

        let loaded = Song::load(&path).unwrap();
        assert_eq!(loaded.name, "Sample");
        assert_eq!(loaded.notes.len(), 3);
        assert!((loaded.duration_secs() - 6.0).abs() < 1e-9);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_load_names_song_after_file() {
        let dir = std::env::temp_dir().join("keyroll_test_song_name");
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();

        let path = dir.join("nocturne.json");
        std::fs::write(&path, r#"{"notes":[{"start":0.0,"end":1.0,"key":60}]}"#).unwrap();

        let loaded = Song::load(&path).unwrap();
        assert_eq!(loaded.name, "nocturne");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_load_rejects_unknown_extension() {
        let dir = std::env::temp_dir().join("keyroll_test_song_ext");
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();

        let path = dir.join("song.txt");
        std::fs::write(&path, "hello").unwrap();
        assert!(matches!(
            Song::load(&path),
            Err(SongError::UnsupportedFormat { .. })
        ));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_load_missing_file() {
        let path = std::env::temp_dir().join("keyroll_definitely_missing.json");
        assert!(matches!(Song::load(path), Err(SongError::IoError { .. })));
    }

    #[test]
    fn test_demo_fixture_loads() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../fixtures/demo-song.json");
        let song = Song::load(path).unwrap();

        assert_eq!(song.name, "demo");
        assert_eq!(song.notes.len(), 8);
        assert_eq!(song.duration_secs(), 6.0);
        assert!(song.validate().is_empty());
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        fn arb_note() -> impl Strategy<Value = Note> {
            (0.0f64..50.0, 0.0f64..5.0, 0u8..=127)
                .prop_map(|(start, len, key)| Note::new(start, start + len, key, 100))
        }

        proptest! {
            #[test]
            fn prop_overlap_query_matches_linear_scan(
                notes in prop::collection::vec(arb_note(), 0..60),
                from in 0.0f64..60.0,
                len in 0.0f64..10.0,
            ) {
                let song = Song::new("p", notes, vec![]);
                let to = from + len;

                let fast: Vec<Note> = song.notes_overlapping(from, to).cloned().collect();
                let slow: Vec<Note> = song.notes.iter().filter(|n| n.overlaps(from, to)).cloned().collect();
                prop_assert_eq!(fast, slow);
            }

            #[test]
            fn prop_duration_bounds_every_note(notes in prop::collection::vec(arb_note(), 0..60)) {
                let song = Song::new("p", notes, vec![]);
                let duration = song.duration_secs();
                prop_assert!(duration >= 0.0);
                prop_assert!(song.notes.iter().all(|n| n.end_secs <= duration));
            }
        }
    }
}
