//! `SharedState` — the packed atomic state machine shared by all three
//! scheduling domains.
//!
//! ## Design constraints
//!
//! The producer runs inside a real-time audio callback and **must not**
//! block on an OS primitive. Its side of the protocol is therefore pure
//! atomic load/store plus a condvar *notify* (which never parks the caller).
//! Only the consumer — a normal background thread — performs a blocking
//! wait, and always with a timeout so it can re-check generation validity
//! even if a wakeup is missed. Worst-case abort latency is bounded by one
//! timeout period.
//!
//! ## Generation scheme
//!
//! `generation` is a monotonically increasing epoch. Every producer and
//! consumer closes over the generation it was created for and compares it
//! against the live value at each checkpoint. A mismatch is not an error:
//! it is the designed cancellation signal, and the observer exits silently.
//!
//! `processor_ready` / `processor_complete` may only advance by exactly +1
//! from their current value. Any other delta means the caller raced a
//! restart and is stale; the transition is refused and the caller must not
//! apply its side effect. `reset` retires generations that never claimed
//! their advance (an abort can skip one), so a wedged chain is impossible.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// Consumer activity as observed by the controller's abort poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Worker thread not yet set up.
    New,
    /// Worker is parked in its mailbox, no drain session active.
    Idle,
    /// Worker is inside a drain session (may still be mid-abort).
    Processing,
}

impl WorkerState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => WorkerState::Idle,
            2 => WorkerState::Processing,
            _ => WorkerState::New,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            WorkerState::New => 0,
            WorkerState::Idle => 1,
            WorkerState::Processing => 2,
        }
    }
}

/// Fixed-layout block of atomics reachable from every pipeline thread.
///
/// All counter access is mutex-free. The `parking_lot` pair below exists
/// solely to implement the consumer's `wait_for_buffer` timeout; no field
/// is ever guarded by it.
pub struct SharedState {
    /// Current valid run. Incremented once per (re)start, never reused.
    generation: AtomicU64,
    /// Next write offset into the ring (0 ≤ head ≤ capacity).
    write_head: AtomicUsize,
    /// Turn-taking flag: true while the consumer owns the ring.
    buffer_available: AtomicBool,
    /// Consumer activity, for the controller's teardown poll.
    worker_state: AtomicU8,
    /// Generation of the most recently initialised producer.
    processor_ready: AtomicU64,
    /// Generation of the most recently finished producer.
    processor_complete: AtomicU64,
    wait_lock: Mutex<()>,
    wait_cvar: Condvar,
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedState {
    pub fn new() -> Self {
        Self {
            generation: AtomicU64::new(0),
            write_head: AtomicUsize::new(0),
            buffer_available: AtomicBool::new(false),
            worker_state: AtomicU8::new(WorkerState::New.as_u8()),
            processor_ready: AtomicU64::new(0),
            processor_complete: AtomicU64::new(0),
            wait_lock: Mutex::new(()),
            wait_cvar: Condvar::new(),
        }
    }

    /// Begin a new generation: bump the epoch, zero the write head, clear
    /// the ready flag. Also wakes a waiting consumer so it observes the
    /// supersession immediately instead of after its timeout.
    ///
    /// Called exactly once per (re)start or abort. Always safe to call
    /// again — no partial state survives it.
    pub fn reset(&self) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.write_head.store(0, Ordering::Release);
        self.buffer_available.store(false, Ordering::Release);
        // Retire the bookkeeping of any generation that never got (or
        // never finished) its producer, so the new generation's +1
        // advance is not blocked. A stale producer still loses its CAS.
        self.processor_ready
            .fetch_max(generation - 1, Ordering::AcqRel);
        self.processor_complete
            .fetch_max(generation - 1, Ordering::AcqRel);
        self.wait_cvar.notify_all();
        generation
    }

    /// The universal abort check, used by producer and consumer on every
    /// iteration.
    pub fn matches_generation(&self, generation: u64) -> bool {
        self.generation.load(Ordering::Acquire) == generation
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    // ── Ring hand-off ────────────────────────────────────────────────────

    pub fn write_head(&self) -> usize {
        self.write_head.load(Ordering::Acquire)
    }

    /// Producer-side head advance after an in-bounds block write.
    pub fn store_write_head(&self, head: usize) {
        self.write_head.store(head, Ordering::Release);
    }

    /// Producer: the ring holds a full batch. Flips the turn-taking flag
    /// and wakes the consumer. Never parks the caller.
    pub fn buffer_ready(&self) {
        self.buffer_available.store(true, Ordering::Release);
        self.wait_cvar.notify_all();
    }

    pub fn buffer_available(&self) -> bool {
        self.buffer_available.load(Ordering::Acquire)
    }

    /// Consumer-only: block up to `timeout` for a ready batch.
    ///
    /// Returns `true` if the flag was observed set, `false` on timeout or
    /// on any other wakeup. A `reset()` notifies this condvar without
    /// setting the flag, so the `false` path is how a parked consumer
    /// learns about a supersession immediately; the caller re-checks the
    /// generation before waiting again.
    pub fn wait_for_buffer(&self, timeout: Duration) -> bool {
        if self.buffer_available.load(Ordering::Acquire) {
            return true;
        }
        let mut guard = self.wait_lock.lock();
        if self.buffer_available.load(Ordering::Acquire) {
            return true;
        }
        let _ = self.wait_cvar.wait_for(&mut guard, timeout);
        self.buffer_available.load(Ordering::Acquire)
    }

    /// Consumer: drain finished. The unconsumed tail has already been
    /// shifted to the ring front; `remaining_head` is its length. Clearing
    /// the flag returns ring ownership to the producer's spin loop.
    pub fn buffer_processed(&self, remaining_head: usize) {
        self.write_head.store(remaining_head, Ordering::Release);
        self.buffer_available.store(false, Ordering::Release);
    }

    // ── Producer generation bookkeeping ──────────────────────────────────

    /// Record that the producer for `generation` is initialised and about
    /// to stream. Returns `false` — the abort signal — unless this is a
    /// valid +1 advance from the current value, which guards the race
    /// where two generations overlap briefly during rapid restarts.
    pub fn processor_ready(&self, generation: u64) -> bool {
        generation > 0
            && self
                .processor_ready
                .compare_exchange(
                    generation - 1,
                    generation,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
    }

    /// Record natural end-of-stream for `generation`. Same +1-advance
    /// guard as [`SharedState::processor_ready`].
    pub fn processor_complete(&self, generation: u64) -> bool {
        generation > 0
            && self
                .processor_complete
                .compare_exchange(
                    generation - 1,
                    generation,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
    }

    pub fn is_processor_complete(&self, generation: u64) -> bool {
        self.processor_complete.load(Ordering::Acquire) == generation
    }

    // ── Worker activity ──────────────────────────────────────────────────

    pub fn set_worker_state(&self, state: WorkerState) {
        self.worker_state.store(state.as_u8(), Ordering::Release);
    }

    pub fn worker_state(&self) -> WorkerState {
        WorkerState::from_u8(self.worker_state.load(Ordering::Acquire))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn reset_increments_generation_and_clears_buffer_state() {
        let state = SharedState::new();
        state.store_write_head(100);
        state.buffer_ready();

        let g1 = state.reset();
        assert_eq!(g1, 1);
        assert_eq!(state.write_head(), 0);
        assert!(!state.buffer_available());
        assert!(state.matches_generation(1));

        let g2 = state.reset();
        assert_eq!(g2, 2);
        assert!(!state.matches_generation(1));
    }

    #[test]
    fn generation_only_increases() {
        let state = SharedState::new();
        let mut last = 0;
        for _ in 0..10 {
            let g = state.reset();
            assert!(g > last);
            last = g;
        }
    }

    #[test]
    fn processor_ready_requires_plus_one_advance() {
        let state = SharedState::new();
        let g = state.reset();
        assert!(state.processor_ready(g));
        // Replay of the same generation must be refused.
        assert!(!state.processor_ready(g));
        // A reset retires skipped generations: the stale producer of
        // generation 2 loses its CAS, the current one advances.
        state.reset();
        let g3 = state.reset();
        assert_eq!(g3, 3);
        assert!(!state.processor_ready(2));
        assert!(state.processor_ready(g3));
        assert!(!state.processor_ready(g3));
    }

    #[test]
    fn processor_complete_never_regresses() {
        let state = SharedState::new();
        let g = state.reset();
        assert!(state.processor_ready(g));
        assert!(state.processor_complete(g));
        assert!(state.is_processor_complete(g));
        assert!(!state.processor_complete(g));
        assert!(!state.processor_complete(0));
    }

    #[test]
    fn wait_for_buffer_times_out_when_never_signaled() {
        let state = SharedState::new();
        assert!(!state.wait_for_buffer(Duration::from_millis(20)));
    }

    #[test]
    fn wait_for_buffer_sees_ready_flag_from_another_thread() {
        let state = Arc::new(SharedState::new());
        let signaller = Arc::clone(&state);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            signaller.buffer_ready();
        });
        assert!(state.wait_for_buffer(Duration::from_secs(2)));
        handle.join().unwrap();
    }

    #[test]
    fn reset_wakes_a_parked_waiter() {
        let state = Arc::new(SharedState::new());
        let resetter = Arc::clone(&state);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            resetter.reset();
        });
        // Woken without the flag set: returns false, and the caller's
        // next generation check observes the abort.
        let start = Instant::now();
        let signaled = state.wait_for_buffer(Duration::from_secs(5));
        assert!(!signaled);
        assert!(start.elapsed() < Duration::from_secs(1));
        handle.join().unwrap();
    }

    #[test]
    fn worker_state_round_trips() {
        let state = SharedState::new();
        assert_eq!(state.worker_state(), WorkerState::New);
        state.set_worker_state(WorkerState::Processing);
        assert_eq!(state.worker_state(), WorkerState::Processing);
        state.set_worker_state(WorkerState::Idle);
        assert_eq!(state.worker_state(), WorkerState::Idle);
    }
}
