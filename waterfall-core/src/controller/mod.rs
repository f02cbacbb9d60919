//! `PipelineController` — top-level lifecycle orchestrator.
//!
//! ## Lifecycle
//!
//! ```text
//! PipelineController::new()
//!     └─► connect()                  → buffers bound, generation 1 streaming
//!         ├─► regenerate_spectrogram → abort old generation, replay source
//!         ├─► change_source          → abort, rebind ring, stream new source
//!         ├─► resize_canvas          → rescale the finished surface
//!         └─► disconnect()           → abort, unbind, status = Idle
//! ```
//!
//! ## Threading
//!
//! The controller is the only async component. Sources stream inside
//! `tokio::task::spawn_blocking` (a capture stream is `!Send`, so it must
//! be created and dropped on one thread); the render worker is a dedicated
//! OS thread reached through its mailbox. Aborting never joins either —
//! the generation bump makes both sides stand down on their own, and the
//! controller polls the worker back to idle with a bounded timeout.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, oneshot};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::{
    buffering::{batch_capacity, SampleRing, SharedState, WorkerState},
    error::{Result, WaterfallError},
    events::{RenderProgressEvent, SessionStatus, SessionStatusEvent},
    producer::SampleWriter,
    source::{AudioInformation, AudioSource, ReadySignal},
    spectrogram::SpectrogramOptions,
    surface::PixelSurface,
    worker::{DiagnosticsSnapshot, WorkerHandle, WorkerMessage},
};

/// Configuration for `PipelineController`.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Upper bound on each blocking wait for the hand-off flag. Bounds
    /// how long an abort can go unnoticed if a wake-up is missed.
    /// Default: 250 ms.
    pub wait_timeout: Duration,
    /// Poll interval while waiting for the worker to go idle after an
    /// abort. Default: 5 ms.
    pub abort_poll_interval: Duration,
    /// Give up waiting for idle after this long. Default: 5 s.
    pub abort_timeout: Duration,
    /// Ring capacity in seconds of audio at the source rate (floored at
    /// two windows). Default: 1.0.
    pub batch_seconds: f64,
    /// Broadcast channel capacity for status and progress events.
    /// Default: 256.
    pub broadcast_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            wait_timeout: Duration::from_millis(250),
            abort_poll_interval: Duration::from_millis(5),
            abort_timeout: Duration::from_secs(5),
            batch_seconds: 1.0,
            broadcast_capacity: 256,
        }
    }
}

/// Everything bound by `connect`, replaced by `change_source`.
struct Session {
    shared: Arc<SharedState>,
    ring: Arc<SampleRing>,
    surface: Arc<Mutex<PixelSurface>>,
    source: Arc<dyn AudioSource>,
    info: AudioInformation,
    options: SpectrogramOptions,
}

/// The top-level controller handle.
///
/// `PipelineController` is `Send + Sync` — all fields use interior
/// mutability. Wrap in `Arc` to share between command handlers and
/// event-forwarding tasks.
pub struct PipelineController {
    config: PipelineConfig,
    worker: WorkerHandle,
    session: Mutex<Option<Session>>,
    status: Arc<Mutex<SessionStatus>>,
    status_tx: broadcast::Sender<SessionStatusEvent>,
    progress_tx: broadcast::Sender<RenderProgressEvent>,
}

impl PipelineController {
    /// Create the controller and spawn its render worker thread.
    pub fn new(config: PipelineConfig) -> Self {
        let (status_tx, _) = broadcast::channel(config.broadcast_capacity);
        let (progress_tx, _) = broadcast::channel(config.broadcast_capacity);
        let worker = WorkerHandle::spawn(config.wait_timeout, progress_tx.clone());

        Self {
            config,
            worker,
            session: Mutex::new(None),
            status: Arc::new(Mutex::new(SessionStatus::Idle)),
            status_tx,
            progress_tx,
        }
    }

    /// Bind a source and start streaming its first generation.
    ///
    /// # Errors
    /// - `WaterfallError::AlreadyConnected` if a source is already bound.
    /// - `WaterfallError::InvalidOptions` if `options` fail validation.
    /// - Source setup errors (decode, device) from the producer handshake.
    pub async fn connect(
        &self,
        source: Arc<dyn AudioSource>,
        options: SpectrogramOptions,
    ) -> Result<AudioInformation> {
        options.validate()?;

        let info = source.info();
        let shared = Arc::new(SharedState::new());
        let ring = Arc::new(SampleRing::new(batch_capacity(
            info.sample_rate,
            self.config.batch_seconds,
            options.window_size,
        )));
        let surface = Arc::new(Mutex::new(PixelSurface::empty()));

        // Claim the session slot before touching the worker: a concurrent
        // connect that loses this race must not get far enough to rebind
        // the winner's buffers.
        {
            let mut guard = self.session.lock();
            if guard.is_some() {
                return Err(WaterfallError::AlreadyConnected);
            }
            *guard = Some(Session {
                shared: Arc::clone(&shared),
                ring: Arc::clone(&ring),
                surface: Arc::clone(&surface),
                source,
                info,
                options,
            });
        }

        if let Err(e) = self.bind_worker(&shared, &ring, &surface).await {
            *self.session.lock() = None;
            return Err(e);
        }

        info!(
            sample_rate = info.sample_rate,
            total_samples = info.total_samples(),
            "source connected"
        );
        self.start_generation().await?;
        Ok(info)
    }

    /// Replace the bound source, aborting any in-flight render.
    ///
    /// The shared state survives the swap so generation numbers stay
    /// monotonic; the ring is re-sized for the new source's rate.
    pub async fn change_source(&self, source: Arc<dyn AudioSource>) -> Result<()> {
        let (shared, surface, options) = {
            let guard = self.session.lock();
            let session = guard.as_ref().ok_or(WaterfallError::NotConnected)?;
            (
                Arc::clone(&session.shared),
                Arc::clone(&session.surface),
                session.options,
            )
        };

        self.set_status(SessionStatus::Aborting, None);
        shared.reset();
        self.wait_worker_idle(&shared).await?;

        let info = source.info();
        let ring = Arc::new(SampleRing::new(batch_capacity(
            info.sample_rate,
            self.config.batch_seconds,
            options.window_size,
        )));
        self.bind_worker(&shared, &ring, &surface).await?;

        {
            let mut guard = self.session.lock();
            let session = guard.as_mut().ok_or(WaterfallError::NotConnected)?;
            session.source = source;
            session.info = info;
            session.ring = ring;
        }

        info!(sample_rate = info.sample_rate, "source replaced");
        self.start_generation().await
    }

    /// Re-render the bound source with new options.
    ///
    /// Supersedes the current generation; the source is replayed from the
    /// start.
    pub async fn regenerate_spectrogram(&self, options: SpectrogramOptions) -> Result<()> {
        options.validate()?;
        let (shared, surface, ring, info) = {
            let guard = self.session.lock();
            let session = guard.as_ref().ok_or(WaterfallError::NotConnected)?;
            (
                Arc::clone(&session.shared),
                Arc::clone(&session.surface),
                Arc::clone(&session.ring),
                session.info,
            )
        };

        self.set_status(SessionStatus::Aborting, None);
        shared.reset();
        self.wait_worker_idle(&shared).await?;

        // A larger window can outgrow the bound ring, and a producer can
        // never fill past capacity - 1; re-size and rebind so at least one
        // full window always fits.
        let capacity = batch_capacity(
            info.sample_rate,
            self.config.batch_seconds,
            options.window_size,
        );
        let ring = if capacity == ring.capacity() {
            ring
        } else {
            let ring = Arc::new(SampleRing::new(capacity));
            self.bind_worker(&shared, &ring, &surface).await?;
            ring
        };

        {
            let mut guard = self.session.lock();
            let session = guard.as_mut().ok_or(WaterfallError::NotConnected)?;
            session.options = options;
            session.ring = ring;
        }

        self.start_generation().await
    }

    /// Rescale the rendered surface to display dimensions.
    pub async fn resize_canvas(&self, width: u32, height: u32) -> Result<()> {
        let mode = {
            let guard = self.session.lock();
            let session = guard.as_ref().ok_or(WaterfallError::NotConnected)?;
            session.options.scaling_mode
        };
        let (ack_tx, ack_rx) = oneshot::channel();
        self.worker.send(WorkerMessage::Resize {
            width,
            height,
            mode,
            ack: ack_tx,
        })?;
        ack_rx.await.map_err(|_| WaterfallError::WorkerGone)
    }

    /// Supersede the current generation and wait for the worker to stand
    /// down. Idempotent; keeps the source bound.
    pub async fn abort(&self) -> Result<()> {
        let shared = {
            let guard = self.session.lock();
            match guard.as_ref() {
                Some(session) => Arc::clone(&session.shared),
                None => return Ok(()),
            }
        };
        self.set_status(SessionStatus::Aborting, None);
        shared.reset();
        self.wait_worker_idle(&shared).await?;
        self.set_status(SessionStatus::Idle, None);
        info!("render aborted");
        Ok(())
    }

    /// Unbind the source.
    ///
    /// # Errors
    /// - `WaterfallError::NotConnected` if nothing is bound.
    pub async fn disconnect(&self) -> Result<()> {
        let shared = {
            let guard = self.session.lock();
            let session = guard.as_ref().ok_or(WaterfallError::NotConnected)?;
            Arc::clone(&session.shared)
        };
        self.set_status(SessionStatus::Aborting, None);
        shared.reset();
        self.wait_worker_idle(&shared).await?;
        *self.session.lock() = None;
        self.set_status(SessionStatus::Idle, None);
        info!("source disconnected");
        Ok(())
    }

    /// Current session status (snapshot).
    pub fn status(&self) -> SessionStatus {
        *self.status.lock()
    }

    /// Subscribe to status change events.
    pub fn subscribe_status(&self) -> broadcast::Receiver<SessionStatusEvent> {
        self.status_tx.subscribe()
    }

    /// Subscribe to per-batch render progress events.
    pub fn subscribe_progress(&self) -> broadcast::Receiver<RenderProgressEvent> {
        self.progress_tx.subscribe()
    }

    /// Shared worker diagnostics counters.
    pub fn diagnostics_snapshot(&self) -> DiagnosticsSnapshot {
        self.worker.diagnostics().snapshot()
    }

    /// The render surface for the bound source.
    ///
    /// Lock briefly to copy pixels out; the worker holds this lock while
    /// painting each batch.
    pub fn surface(&self) -> Result<Arc<Mutex<PixelSurface>>> {
        let guard = self.session.lock();
        let session = guard.as_ref().ok_or(WaterfallError::NotConnected)?;
        Ok(Arc::clone(&session.surface))
    }

    /// Wait until the current render finishes, up to `timeout`.
    pub async fn wait_until_complete(&self, timeout: Duration) -> Result<()> {
        let surface = self.surface()?;
        let deadline = Instant::now() + timeout;
        loop {
            if surface.lock().is_complete() {
                return Ok(());
            }
            if self.status() == SessionStatus::Error {
                return Err(WaterfallError::Other(anyhow::anyhow!(
                    "session failed before completing"
                )));
            }
            if Instant::now() >= deadline {
                return Err(WaterfallError::Other(anyhow::anyhow!(
                    "render did not complete within {timeout:?}"
                )));
            }
            tokio::time::sleep(self.config.abort_poll_interval).await;
        }
    }

    /// Bind (or rebind) the shared buffers on the worker thread.
    async fn bind_worker(
        &self,
        shared: &Arc<SharedState>,
        ring: &Arc<SampleRing>,
        surface: &Arc<Mutex<PixelSurface>>,
    ) -> Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.worker.send(WorkerMessage::Setup {
            state: Arc::clone(shared),
            ring: Arc::clone(ring),
            surface: Arc::clone(surface),
            ack: ack_tx,
        })?;
        ack_rx.await.map_err(|_| WaterfallError::WorkerGone)
    }

    /// Start one generation: reset the epoch, arm the worker, then spawn
    /// the producer and await its setup handshake.
    async fn start_generation(&self) -> Result<()> {
        let (shared, ring, surface, source, info, options) = {
            let guard = self.session.lock();
            let session = guard.as_ref().ok_or(WaterfallError::NotConnected)?;
            (
                Arc::clone(&session.shared),
                Arc::clone(&session.ring),
                Arc::clone(&session.surface),
                Arc::clone(&session.source),
                session.info,
                session.options,
            )
        };

        self.set_status(SessionStatus::Starting, None);
        let generation = shared.reset();

        let (ack_tx, ack_rx) = oneshot::channel();
        self.worker.send(WorkerMessage::Regenerate {
            options,
            info,
            generation,
            ack: ack_tx,
        })?;
        match ack_rx.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.set_status(SessionStatus::Error, Some(e.to_string()));
                return Err(e);
            }
            Err(_) => return Err(WaterfallError::WorkerGone),
        }

        // The producer owns its blocking thread until the stream ends or
        // goes stale. cpal streams are !Send, so the whole source lifetime
        // stays inside this one closure.
        let writer = SampleWriter::new(Arc::clone(&shared), ring, generation);
        let (ready_tx, ready_rx) = oneshot::channel();
        let stream_source = Arc::clone(&source);
        tokio::task::spawn_blocking(move || {
            stream_source.stream(writer, ReadySignal::new(ready_tx));
        });

        match ready_rx.await {
            Ok(Ok(())) => {
                self.set_status(SessionStatus::Streaming, None);
                info!(generation, "generation streaming");
                self.spawn_completion_monitor(shared, surface, generation);
                Ok(())
            }
            Ok(Err(e)) => {
                warn!(generation, "source setup failed: {e}");
                // Stand the armed worker down before reporting.
                shared.reset();
                if let Err(idle_err) = self.wait_worker_idle(&shared).await {
                    warn!("worker did not stand down after failed setup: {idle_err}");
                }
                self.set_status(SessionStatus::Error, Some(e.to_string()));
                Err(e)
            }
            Err(_) => {
                shared.reset();
                if let Err(idle_err) = self.wait_worker_idle(&shared).await {
                    warn!("worker did not stand down after failed setup: {idle_err}");
                }
                self.set_status(SessionStatus::Error, Some("source task died".into()));
                Err(WaterfallError::Other(anyhow::anyhow!(
                    "source task died before the setup handshake"
                )))
            }
        }
    }

    /// Flip status to `Complete` when the worker finishes this generation.
    /// Exits silently if the generation is superseded first.
    fn spawn_completion_monitor(
        &self,
        shared: Arc<SharedState>,
        surface: Arc<Mutex<PixelSurface>>,
        generation: u64,
    ) {
        let status = Arc::clone(&self.status);
        let status_tx = self.status_tx.clone();
        let poll = self.config.abort_poll_interval;
        tokio::spawn(async move {
            loop {
                if !shared.matches_generation(generation) {
                    return;
                }
                if surface.lock().is_complete() && shared.worker_state() == WorkerState::Idle {
                    *status.lock() = SessionStatus::Complete;
                    let _ = status_tx.send(SessionStatusEvent {
                        status: SessionStatus::Complete,
                        detail: None,
                    });
                    info!(generation, "render complete");
                    return;
                }
                tokio::time::sleep(poll).await;
            }
        });
    }

    async fn wait_worker_idle(&self, shared: &SharedState) -> Result<()> {
        let deadline = Instant::now() + self.config.abort_timeout;
        while shared.worker_state() == WorkerState::Processing {
            if Instant::now() >= deadline {
                return Err(WaterfallError::AbortTimeout);
            }
            tokio::time::sleep(self.config.abort_poll_interval).await;
        }
        Ok(())
    }

    fn set_status(&self, status: SessionStatus, detail: Option<String>) {
        *self.status.lock() = status;
        let _ = self.status_tx.send(SessionStatusEvent { status, detail });
    }
}
