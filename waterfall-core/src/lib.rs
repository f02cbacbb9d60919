//! # waterfall-core
//!
//! Near-real-time streaming spectrogram engine.
//!
//! ## Architecture
//!
//! ```text
//! AudioSource (wav / capture / buffer)
//!      │  spawn_blocking, spin-bounded hand-off
//!      ▼
//! SampleRing + SharedState (generation epoch, write head, hand-off flag)
//!      │  condvar wait, bounded timeout
//!      ▼
//! Render worker thread → SpectrogramGenerator → PixelSurface
//!      │
//! broadcast::Sender<RenderProgressEvent>
//! ```
//!
//! The producer side never allocates or blocks on the OS once streaming;
//! its only wait is a bounded spin while the worker drains. Cancellation
//! is a generation bump: both sides notice the stale epoch and stand down
//! without joining each other.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod buffering;
pub mod controller;
pub mod error;
pub mod events;
pub mod producer;
pub mod source;
pub mod spectrogram;
pub mod surface;
pub mod worker;

// Convenience re-exports for downstream crates
pub use controller::{PipelineConfig, PipelineController};
pub use error::WaterfallError;
pub use events::{RenderProgressEvent, SessionStatus, SessionStatusEvent};
pub use source::{AudioInformation, AudioSource, BufferSource};
pub use source::wav::WavSource;
pub use spectrogram::{ColorMap, SpectrogramOptions, WindowFunction};
pub use surface::{DisplayImage, PixelSurface, ScalingMode};

#[cfg(feature = "audio-cpal")]
pub use source::capture::CaptureSource;
