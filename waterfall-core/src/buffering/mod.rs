//! Shared batch buffer and the atomic hand-off protocol around it.
//!
//! `SharedState` + `SampleRing` are the *only* shared-mutable resources in
//! the pipeline. There is no lock around the sample data — access is gated
//! by a strict turn-taking flag: the producer writes while
//! `buffer_available` is clear, the consumer drains while it is set.

pub mod ring;
pub mod state;

pub use ring::SampleRing;
pub use state::{SharedState, WorkerState};

/// Minimum ring slack beyond one analysis window. The producer writes a
/// whole callback block after each drain, and the drain always leaves a
/// sub-window tail at the front, so the ring must comfortably hold both.
const MIN_WINDOW_MULTIPLE: usize = 2;

/// Ring capacity for one batch: ~`batch_seconds` of audio at `sample_rate`,
/// never smaller than two analysis windows.
pub fn batch_capacity(sample_rate: u32, batch_seconds: f64, window_size: usize) -> usize {
    let per_second = (sample_rate as f64 * batch_seconds).ceil() as usize;
    per_second.max(window_size * MIN_WINDOW_MULTIPLE)
}

#[cfg(test)]
mod tests {
    use super::batch_capacity;

    #[test]
    fn capacity_is_one_second_of_audio() {
        assert_eq!(batch_capacity(22_050, 1.0, 512), 22_050);
        assert_eq!(batch_capacity(48_000, 1.0, 4096), 48_000);
    }

    #[test]
    fn capacity_never_drops_below_two_windows() {
        // 8192-sample windows at a low rate and short batch.
        assert_eq!(batch_capacity(8_000, 0.5, 8_192), 16_384);
    }
}
