//! Standard MIDI File import.
//!
//! Converts an SMF into a [`Song`] using the `midly` parser. Only metrical
//! timing is supported. Tempo changes on any track form one shared tempo
//! map; note-on with velocity 0 counts as note-off.

use std::collections::{HashMap, VecDeque};

use midly::{MetaMessage, MidiMessage, Smf, Timing, TrackEventKind};
use tracing::debug;

use crate::note::{Note, SustainSpan};
use crate::song::{Song, SongError};

/// Microseconds per quarter note when a file declares no tempo (120 BPM).
const DEFAULT_TEMPO_US: u32 = 500_000;

/// Controller number of the sustain (damper) pedal.
const SUSTAIN_CONTROLLER: u8 = 64;

/// Parse SMF bytes into a song.
pub fn parse_smf(data: &[u8]) -> Result<Song, SongError> {
    let smf = Smf::parse(data)?;

    let ticks_per_beat = match smf.header.timing {
        Timing::Metrical(tpb) if tpb.as_int() > 0 => tpb.as_int(),
        Timing::Metrical(_) => {
            return Err(SongError::UnsupportedTiming(
                "zero ticks per beat".to_string(),
            ))
        }
        Timing::Timecode(fps, subframe) => {
            return Err(SongError::UnsupportedTiming(format!(
                "SMPTE timecode ({} fps, {subframe} subframes)",
                fps.as_f32()
            )))
        }
    };

    let mut tempo_changes = Vec::new();
    for track in &smf.tracks {
        let mut tick = 0u64;
        for event in track {
            tick += event.delta.as_int() as u64;
            if let TrackEventKind::Meta(MetaMessage::Tempo(tempo)) = &event.kind {
                tempo_changes.push((tick, tempo.as_int()));
            }
        }
    }
    let tempo_map = TempoMap::new(ticks_per_beat, tempo_changes);

    let mut notes = Vec::new();
    let mut sustains = Vec::new();
    for track in &smf.tracks {
        let mut collector = TrackCollector::default();
        let mut tick = 0u64;
        for event in track {
            tick += event.delta.as_int() as u64;
            if let TrackEventKind::Midi { channel, message } = &event.kind {
                collector.handle(tick, channel.as_int(), *message);
            }
        }
        collector.close_hanging(tick);
        notes.extend(collector.notes.into_iter().map(|raw| raw.resolve(&tempo_map)));
        sustains.extend(
            collector
                .sustains
                .into_iter()
                .map(|(start, end, channel)| {
                    SustainSpan::new(tempo_map.secs_at(start), tempo_map.secs_at(end), channel)
                }),
        );
    }

    debug!(
        tracks = smf.tracks.len(),
        ticks_per_beat,
        tempo_changes = tempo_map.points.len(),
        notes = notes.len(),
        sustains = sustains.len(),
        "Parsed MIDI file"
    );

    Ok(Song::new(String::new(), notes, sustains))
}

/// Piecewise-constant tempo map from ticks to seconds.
#[derive(Debug, Clone)]
struct TempoMap {
    ticks_per_beat: u16,
    /// `(tick, seconds at tick, microseconds per beat from tick on)`.
    points: Vec<(u64, f64, u32)>,
}

impl TempoMap {
    fn new(ticks_per_beat: u16, mut changes: Vec<(u64, u32)>) -> Self {
        changes.sort_by_key(|(tick, _)| *tick);

        let mut points = vec![(0u64, 0.0f64, DEFAULT_TEMPO_US)];
        for (tick, tempo) in changes {
            let Some(&(last_tick, last_secs, last_tempo)) = points.last() else {
                continue;
            };
            if tick == last_tick {
                // Later change at the same tick wins.
                if let Some(last) = points.last_mut() {
                    last.2 = tempo;
                }
                continue;
            }
            let secs = last_secs + Self::span_secs(ticks_per_beat, tick - last_tick, last_tempo);
            points.push((tick, secs, tempo));
        }

        Self {
            ticks_per_beat,
            points,
        }
    }

    fn secs_at(&self, tick: u64) -> f64 {
        let idx = self
            .points
            .partition_point(|(point_tick, _, _)| *point_tick <= tick)
            .saturating_sub(1);
        let (point_tick, point_secs, tempo) = self.points[idx];
        point_secs + Self::span_secs(self.ticks_per_beat, tick - point_tick, tempo)
    }

    fn span_secs(ticks_per_beat: u16, ticks: u64, tempo_us: u32) -> f64 {
        ticks as f64 / ticks_per_beat as f64 * tempo_us as f64 / 1_000_000.0
    }
}

#[derive(Debug, Clone, Copy)]
struct RawNote {
    start_tick: u64,
    end_tick: u64,
    key: u8,
    velocity: u8,
    channel: u8,
}

impl RawNote {
    fn resolve(self, tempo_map: &TempoMap) -> Note {
        Note::new(
            tempo_map.secs_at(self.start_tick),
            tempo_map.secs_at(self.end_tick),
            self.key,
            self.velocity,
        )
        .on_channel(self.channel)
    }
}

/// Pairs note-on/off and pedal events within one track.
#[derive(Debug, Default)]
struct TrackCollector {
    open_notes: HashMap<(u8, u8), VecDeque<(u64, u8)>>,
    open_pedals: HashMap<u8, u64>,
    notes: Vec<RawNote>,
    sustains: Vec<(u64, u64, u8)>,
}

impl TrackCollector {
    fn handle(&mut self, tick: u64, channel: u8, message: MidiMessage) {
        match message {
            MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
                self.open_notes
                    .entry((channel, key.as_int()))
                    .or_default()
                    .push_back((tick, vel.as_int()));
            }
            MidiMessage::NoteOn { key, .. } | MidiMessage::NoteOff { key, .. } => {
                self.close_note(tick, channel, key.as_int());
            }
            MidiMessage::Controller { controller, value }
                if controller.as_int() == SUSTAIN_CONTROLLER =>
            {
                if value.as_int() >= 64 {
                    self.open_pedals.entry(channel).or_insert(tick);
                } else if let Some(start) = self.open_pedals.remove(&channel) {
                    self.sustains.push((start, tick, channel));
                }
            }
            _ => {}
        }
    }

    fn close_note(&mut self, tick: u64, channel: u8, key: u8) {
        let Some(queue) = self.open_notes.get_mut(&(channel, key)) else {
            return;
        };
        if let Some((start_tick, velocity)) = queue.pop_front() {
            self.notes.push(RawNote {
                start_tick,
                end_tick: tick,
                key,
                velocity,
                channel,
            });
        }
    }

    /// Close notes and pedals that never received an off event.
    fn close_hanging(&mut self, end_tick: u64) {
        for ((channel, key), queue) in self.open_notes.drain() {
            for (start_tick, velocity) in queue {
                self.notes.push(RawNote {
                    start_tick,
                    end_tick,
                    key,
                    velocity,
                    channel,
                });
            }
        }
        for (channel, start) in self.open_pedals.drain() {
            self.sustains.push((start, end_tick, channel));
        }
    }
}
