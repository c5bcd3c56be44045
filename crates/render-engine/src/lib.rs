//! Keyroll Render Engine
//!
//! Exports a whole song as one tall PNG while only ever rendering into a
//! bounded buffer. Work is split into small steps so an interactive frame
//! loop can drive it one tick at a time.
//!
//! # Pipeline Architecture
//!
//! ```text
//! song.mid ──► Song ──► PianoRollRenderer
//!                               │ render(scroll)
//!                               ▼
//! TallCanvas ──► pass plan ──► ExportTarget (W x H, BGRA)
//!                               │ rows, <= 60 per step
//!                               ▼
//!                         PngRowEncoder (RGBA)
//!                               │
//!                               ▼
//!                         output.png (W x content_height)
//! ```

pub mod compositor;
pub mod encoder;
pub mod export;
pub mod roll;
pub mod session;
pub mod target;

pub use compositor::{PassPlan, TallCanvas};
pub use encoder::{reorder_row, PngRowEncoder, RowEncoder};
pub use export::*;
pub use roll::{PianoRollRenderer, RollStyle};
pub use session::{ExportSession, SessionParams, SessionStage, MAX_ROWS_PER_STEP};
pub use target::{Color, ExportTarget, SceneRenderer, BYTES_PER_PIXEL};
