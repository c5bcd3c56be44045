//! Keyroll Song Model
//!
//! Defines the song data the piano-roll is drawn from:
//! - **Notes:** Timed key presses with velocity and channel
//! - **Sustains:** Pedal-down spans per channel
//! - **Song:** The sorted note list plus the total duration
//!
//! All times are in seconds from the start of the song. Songs are loaded
//! from JSON documents or Standard MIDI Files.

pub mod midi;
pub mod note;
pub mod song;

pub use note::*;
pub use song::*;
