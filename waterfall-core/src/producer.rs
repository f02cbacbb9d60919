//! Real-time producer side of the pipeline.
//!
//! # Design constraints
//!
//! `write_block` is invoked from the host audio runtime's callback thread
//! (TIME_CRITICAL on Windows, real-time on CoreAudio). On that path it
//! **must not**:
//! - Allocate heap memory
//! - Block on a mutex, condvar, or any OS wait
//! - Perform I/O
//!
//! Its only blocking behaviour is an explicit bounded spin loop against the
//! `buffer_available` flag while the consumer drains a full batch. The spin
//! exits either when the flag clears or when the generation changes
//! (cooperative abort).

use std::sync::Arc;

use tracing::debug;

use crate::buffering::{SampleRing, SharedState};

/// Result of a producer-side operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Block accepted; keep streaming.
    Continue,
    /// The owned generation was superseded. Stop producing — no further
    /// writes are permitted. Not an error.
    Aborted,
}

/// Producer handle bound to exactly one generation.
///
/// Created by the controller per (re)start and handed to the active
/// `AudioSource`. Cheap to clone into a callback closure.
#[derive(Clone)]
pub struct SampleWriter {
    state: Arc<SharedState>,
    ring: Arc<SampleRing>,
    generation: u64,
}

impl SampleWriter {
    pub fn new(state: Arc<SharedState>, ring: Arc<SampleRing>, generation: u64) -> Self {
        Self {
            state,
            ring,
            generation,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// True once this writer's generation has been superseded.
    pub fn is_aborted(&self) -> bool {
        !self.state.matches_generation(self.generation)
    }

    /// Producer-ready handshake. Returns `false` — abort — if the
    /// generation is already stale or the +1-advance guard refuses the
    /// transition (a racing restart won).
    pub fn announce_ready(&self) -> bool {
        self.state.matches_generation(self.generation) && self.state.processor_ready(self.generation)
    }

    /// Stream one callback block into the ring.
    ///
    /// Real-time safe: no allocation, no OS blocking. When the block would
    /// overflow the ring, the batch is published via `buffer_ready()` and
    /// this thread spin-waits for the drain before writing at the new
    /// (tail-shifted) head. Oversized blocks are split so a single write
    /// can never exceed the slack the drain guarantees.
    pub fn write_block(&self, block: &[f32]) -> WriteOutcome {
        let max_chunk = (self.ring.capacity() / 2).max(1);
        for chunk in block.chunks(max_chunk) {
            if self.write_chunk(chunk) == WriteOutcome::Aborted {
                return WriteOutcome::Aborted;
            }
        }
        WriteOutcome::Continue
    }

    fn write_chunk(&self, chunk: &[f32]) -> WriteOutcome {
        loop {
            if self.is_aborted() {
                return WriteOutcome::Aborted;
            }

            let head = self.state.write_head();
            let new_head = head + chunk.len();
            if new_head < self.ring.capacity() {
                self.ring.write(head, chunk);
                self.state.store_write_head(new_head);
                return WriteOutcome::Continue;
            }

            // Ring would overflow: hand the batch to the consumer, then
            // busy-wait for the drain. After the wake the head is the
            // shifted tail length, so the loop re-reads it before writing.
            self.state.buffer_ready();
            while self.state.buffer_available() {
                if self.is_aborted() {
                    return WriteOutcome::Aborted;
                }
                std::hint::spin_loop();
            }
        }
    }

    /// Logical end-of-stream. Marks `processor_complete` for this
    /// generation and publishes whatever partial batch remains so the
    /// consumer wakes for its final `consume_all` pass.
    ///
    /// Safe to call off the real-time thread; sources call it after the
    /// last block.
    pub fn finish(&self) {
        if self.is_aborted() {
            return;
        }
        if self.state.processor_complete(self.generation) {
            debug!(generation = self.generation, "producer complete");
            self.state.buffer_ready();
        }
    }
}
