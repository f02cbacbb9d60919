//! `SampleRing` — the flat shared f32 batch buffer.
//!
//! Samples are stored as `AtomicU32` bit patterns so the buffer can be
//! written from the real-time callback and read from the worker without a
//! lock and without `unsafe`. Element access is `Relaxed`: the protocol's
//! single-writer-at-a-time discipline means the two sides never touch the
//! buffer concurrently, and the happens-before edge is carried by the
//! Release/Acquire write-head and ready-flag stores in `SharedState`.

use std::sync::atomic::{AtomicU32, Ordering};

/// Fixed-capacity sample buffer filled by the producer and drained by the
/// consumer. `SharedState::write_head` marks the high-water mark of valid
/// samples; this type itself holds no cursor.
pub struct SampleRing {
    samples: Box<[AtomicU32]>,
}

impl SampleRing {
    pub fn new(capacity: usize) -> Self {
        let samples = (0..capacity)
            .map(|_| AtomicU32::new(0f32.to_bits()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self { samples }
    }

    pub fn capacity(&self) -> usize {
        self.samples.len()
    }

    /// Producer: copy `block` into the ring starting at `offset`.
    ///
    /// The caller guarantees `offset + block.len() <= capacity` (the
    /// write-or-spin protocol in `SampleWriter` enforces it).
    pub fn write(&self, offset: usize, block: &[f32]) {
        for (slot, &sample) in self.samples[offset..offset + block.len()].iter().zip(block) {
            slot.store(sample.to_bits(), Ordering::Relaxed);
        }
    }

    /// Consumer: copy the first `dst.len()` valid samples out of the ring.
    pub fn read_into(&self, dst: &mut [f32]) {
        for (value, slot) in dst.iter_mut().zip(self.samples.iter()) {
            *value = f32::from_bits(slot.load(Ordering::Relaxed));
        }
    }

    /// Consumer: after draining `consumed` of `head` valid samples, copy
    /// the unconsumed tail to the front of the ring. Returns the new head
    /// (the tail length). The remainder is never discarded — it carries
    /// the window overlap across batch boundaries.
    pub fn shift_tail(&self, consumed: usize, head: usize) -> usize {
        debug_assert!(consumed <= head);
        let remaining = head - consumed;
        for i in 0..remaining {
            let bits = self.samples[consumed + i].load(Ordering::Relaxed);
            self.samples[i].store(bits, Ordering::Relaxed);
        }
        remaining
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(ring: &SampleRing, len: usize) -> Vec<f32> {
        let mut out = vec![0f32; len];
        ring.read_into(&mut out);
        out
    }

    #[test]
    fn write_then_read_round_trips() {
        let ring = SampleRing::new(8);
        ring.write(0, &[1.0, 2.0, 3.0]);
        ring.write(3, &[4.0, 5.0]);
        assert_eq!(drain(&ring, 5), vec![1.0, 2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn shift_tail_preserves_unconsumed_samples() {
        let ring = SampleRing::new(8);
        ring.write(0, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let remaining = ring.shift_tail(4, 6);
        assert_eq!(remaining, 2);
        assert_eq!(drain(&ring, 2), vec![5.0, 6.0]);
    }

    #[test]
    fn shift_tail_with_full_consumption_leaves_empty_head() {
        let ring = SampleRing::new(4);
        ring.write(0, &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(ring.shift_tail(4, 4), 0);
    }

    #[test]
    fn shift_tail_handles_overlapping_copy() {
        // Tail longer than the consumed prefix: forward copy must not
        // clobber samples it has yet to move.
        let ring = SampleRing::new(8);
        ring.write(0, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
        let remaining = ring.shift_tail(2, 8);
        assert_eq!(remaining, 6);
        assert_eq!(drain(&ring, 6), vec![3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
    }
}
