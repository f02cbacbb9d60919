//! Mailbox protocol between the controller and the render worker thread.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::buffering::{SampleRing, SharedState};
use crate::error::Result;
use crate::source::AudioInformation;
use crate::spectrogram::SpectrogramOptions;
use crate::surface::{PixelSurface, ScalingMode};

/// Commands accepted by the worker thread.
///
/// Each command carries a oneshot ack so the async side can await
/// completion without polling. A session (`Regenerate`) acks as soon as
/// the generator is built and the drain loop is entered; its end is
/// observed through `WorkerState` and the surface's complete flag.
pub enum WorkerMessage {
    /// Bind the shared buffers for all subsequent sessions.
    Setup {
        state: Arc<SharedState>,
        ring: Arc<SampleRing>,
        surface: Arc<Mutex<PixelSurface>>,
        ack: oneshot::Sender<()>,
    },
    /// Start a drain session for `generation`.
    Regenerate {
        options: SpectrogramOptions,
        info: AudioInformation,
        generation: u64,
        ack: oneshot::Sender<Result<()>>,
    },
    /// Rescale the current surface to new display dimensions.
    Resize {
        width: u32,
        height: u32,
        mode: ScalingMode,
        ack: oneshot::Sender<()>,
    },
    /// Stop the worker thread. No ack; join the thread instead.
    Shutdown,
}
