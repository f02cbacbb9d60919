use thiserror::Error;

/// All errors produced by waterfall-core.
///
/// A stale generation is deliberately *not* represented here: generation
/// mismatch is the designed cancellation mechanism, and producer/consumer
/// loops exit silently when they observe one.
#[derive(Debug, Error)]
pub enum WaterfallError {
    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default input device found")]
    NoDefaultInputDevice,

    #[error("source decode error: {0}")]
    SourceDecode(String),

    #[error("invalid spectrogram options: {0}")]
    InvalidOptions(String),

    #[error("controller is already connected; call disconnect() first")]
    AlreadyConnected,

    #[error("controller is not connected")]
    NotConnected,

    #[error("render worker is gone (mailbox channel closed)")]
    WorkerGone,

    #[error("timed out waiting for the superseded worker to go idle")]
    AbortTimeout,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, WaterfallError>;
