//! Blocking render worker.
//!
//! ## Drain session (per generation)
//!
//! ```text
//! 1. Wait for the hand-off flag (condvar, bounded timeout)
//! 2. Re-check the generation — a reset means this session is stale
//! 3. Copy ring[0..head] into a scratch buffer
//! 4. Feed the scratch to the spectrogram generator (one column per window)
//! 5. Shift the unconsumed tail to the front of the ring
//! 6. Publish the remaining head and clear the flag (releases the producer)
//! 7. On the final batch, paint the backed-up last window and mark the
//!    surface complete
//! ```
//!
//! The loop runs on a dedicated OS thread owned by the controller; commands
//! arrive over a crossbeam mailbox so one worker serves many sessions. A
//! stale generation ends a session silently — abandonment is the designed
//! outcome of abort, not an error.

pub mod messages;

use std::sync::{
    atomic::{AtomicU64, AtomicUsize, Ordering},
    Arc,
};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::buffering::{SampleRing, SharedState, WorkerState};
use crate::error::{Result, WaterfallError};
use crate::events::RenderProgressEvent;
use crate::spectrogram::SpectrogramGenerator;
use crate::surface::PixelSurface;

pub use messages::WorkerMessage;

#[derive(Default)]
pub struct WorkerDiagnostics {
    pub batches_drained: AtomicUsize,
    pub samples_consumed: AtomicUsize,
    pub columns_painted: AtomicUsize,
    pub wait_timeouts: AtomicUsize,
    pub stale_exits: AtomicUsize,
    pub sessions_completed: AtomicUsize,
}

impl WorkerDiagnostics {
    pub fn reset(&self) {
        self.batches_drained.store(0, Ordering::Relaxed);
        self.samples_consumed.store(0, Ordering::Relaxed);
        self.columns_painted.store(0, Ordering::Relaxed);
        self.wait_timeouts.store(0, Ordering::Relaxed);
        self.stale_exits.store(0, Ordering::Relaxed);
        self.sessions_completed.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            batches_drained: self.batches_drained.load(Ordering::Relaxed),
            samples_consumed: self.samples_consumed.load(Ordering::Relaxed),
            columns_painted: self.columns_painted.load(Ordering::Relaxed),
            wait_timeouts: self.wait_timeouts.load(Ordering::Relaxed),
            stale_exits: self.stale_exits.load(Ordering::Relaxed),
            sessions_completed: self.sessions_completed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSnapshot {
    pub batches_drained: usize,
    pub samples_consumed: usize,
    pub columns_painted: usize,
    pub wait_timeouts: usize,
    pub stale_exits: usize,
    pub sessions_completed: usize,
}

/// How a drain session ended.
#[derive(Debug, PartialEq, Eq)]
enum SessionEnd {
    /// Final batch painted, surface marked complete.
    Completed,
    /// Generation moved on; the session abandoned its output.
    Stale,
}

/// Buffers bound by `WorkerMessage::Setup`, shared with the controller.
struct BoundBuffers {
    state: Arc<SharedState>,
    ring: Arc<SampleRing>,
    surface: Arc<Mutex<PixelSurface>>,
    scratch: Vec<f32>,
}

/// Owning handle to the worker thread. Dropping it shuts the worker down.
pub struct WorkerHandle {
    tx: Sender<WorkerMessage>,
    join: Option<JoinHandle<()>>,
    diagnostics: Arc<WorkerDiagnostics>,
}

impl WorkerHandle {
    /// Spawn the worker thread.
    ///
    /// `wait_timeout` bounds each blocking wait for the hand-off flag;
    /// timing out is not an error, it forces a generation re-check so an
    /// abort is noticed even if the wake-up notification was missed.
    pub fn spawn(
        wait_timeout: Duration,
        progress_tx: broadcast::Sender<RenderProgressEvent>,
    ) -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        let diagnostics = Arc::new(WorkerDiagnostics::default());
        let thread_diag = Arc::clone(&diagnostics);
        let join = std::thread::Builder::new()
            .name("waterfall-render".into())
            .spawn(move || worker_loop(rx, wait_timeout, progress_tx, thread_diag))
            .ok();
        if join.is_none() {
            warn!("failed to spawn render worker thread");
        }
        Self {
            tx,
            join,
            diagnostics,
        }
    }

    pub fn send(&self, msg: WorkerMessage) -> Result<()> {
        self.tx.send(msg).map_err(|_| WaterfallError::WorkerGone)
    }

    pub fn diagnostics(&self) -> &Arc<WorkerDiagnostics> {
        &self.diagnostics
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        let _ = self.tx.send(WorkerMessage::Shutdown);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

fn worker_loop(
    rx: Receiver<WorkerMessage>,
    wait_timeout: Duration,
    progress_tx: broadcast::Sender<RenderProgressEvent>,
    diagnostics: Arc<WorkerDiagnostics>,
) {
    info!("render worker started");
    let seq = AtomicU64::new(0);
    let mut bound: Option<BoundBuffers> = None;

    while let Ok(msg) = rx.recv() {
        match msg {
            WorkerMessage::Setup {
                state,
                ring,
                surface,
                ack,
            } => {
                let scratch = Vec::with_capacity(ring.capacity());
                state.set_worker_state(WorkerState::Idle);
                bound = Some(BoundBuffers {
                    state,
                    ring,
                    surface,
                    scratch,
                });
                let _ = ack.send(());
            }

            WorkerMessage::Resize {
                width,
                height,
                mode,
                ack,
            } => {
                if let Some(b) = bound.as_ref() {
                    b.surface.lock().resize(width, height, mode);
                } else {
                    warn!("resize requested before setup");
                }
                let _ = ack.send(());
            }

            WorkerMessage::Regenerate {
                options,
                info,
                generation,
                ack,
            } => {
                let Some(b) = bound.as_mut() else {
                    let _ = ack.send(Err(WaterfallError::NotConnected));
                    continue;
                };
                let mut generator = match SpectrogramGenerator::new(&info, options) {
                    Ok(g) => g,
                    Err(e) => {
                        let _ = ack.send(Err(e));
                        continue;
                    }
                };
                b.surface
                    .lock()
                    .reset_dimensions(generator.width(), generator.height());
                b.state.set_worker_state(WorkerState::Processing);
                let _ = ack.send(Ok(()));

                info!(
                    generation,
                    width = generator.width(),
                    height = generator.height(),
                    "drain session started"
                );
                let end = run_session(
                    b,
                    &mut generator,
                    generation,
                    wait_timeout,
                    &progress_tx,
                    &seq,
                    &diagnostics,
                );
                match end {
                    SessionEnd::Completed => {
                        diagnostics
                            .sessions_completed
                            .fetch_add(1, Ordering::Relaxed);
                        info!(
                            generation,
                            columns = generator.frames_painted(),
                            "drain session complete"
                        );
                    }
                    SessionEnd::Stale => {
                        diagnostics.stale_exits.fetch_add(1, Ordering::Relaxed);
                        debug!(generation, "drain session superseded");
                    }
                }
                b.state.set_worker_state(WorkerState::Idle);
            }

            WorkerMessage::Shutdown => break,
        }
    }
    info!("render worker stopped");
}

fn run_session(
    bound: &mut BoundBuffers,
    generator: &mut SpectrogramGenerator,
    generation: u64,
    wait_timeout: Duration,
    progress_tx: &broadcast::Sender<RenderProgressEvent>,
    seq: &AtomicU64,
    diagnostics: &WorkerDiagnostics,
) -> SessionEnd {
    let state = &bound.state;
    loop {
        if !state.matches_generation(generation) {
            return SessionEnd::Stale;
        }

        if !state.buffer_available() && !state.wait_for_buffer(wait_timeout) {
            diagnostics.wait_timeouts.fetch_add(1, Ordering::Relaxed);
            continue;
        }
        // A reset wakes the condvar too; never touch the ring for a
        // generation that is no longer current.
        if !state.matches_generation(generation) {
            return SessionEnd::Stale;
        }
        if !state.buffer_available() {
            continue;
        }

        let head = state.write_head();
        let complete = state.is_processor_complete(generation);

        bound.scratch.resize(head, 0.0);
        bound.ring.read_into(&mut bound.scratch[..head]);

        let before = generator.frames_painted();
        let consumed = {
            let mut surface = bound.surface.lock();
            generator.process(&bound.scratch[..head], complete, &mut surface)
        };
        let remaining = bound.ring.shift_tail(consumed, head);
        state.buffer_processed(remaining);

        diagnostics.batches_drained.fetch_add(1, Ordering::Relaxed);
        diagnostics
            .samples_consumed
            .fetch_add(consumed, Ordering::Relaxed);
        diagnostics
            .columns_painted
            .fetch_add((generator.frames_painted() - before) as usize, Ordering::Relaxed);

        let _ = progress_tx.send(RenderProgressEvent {
            seq: seq.fetch_add(1, Ordering::Relaxed),
            generation,
            columns_painted: generator.frames_painted(),
            total_columns: generator.width(),
        });

        if complete {
            // A concurrent reset retires this generation's completion
            // marker; re-check before declaring the surface done.
            if !state.matches_generation(generation) {
                return SessionEnd::Stale;
            }
            bound.surface.lock().mark_complete();
            return SessionEnd::Completed;
        }
    }
}
