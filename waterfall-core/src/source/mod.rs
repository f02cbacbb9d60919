//! Sample sources feeding the producer side of the pipeline.
//!
//! A source is *re-streamable*: `stream` borrows `&self`, so the
//! controller can replay the same source when options change
//! (`regenerate_spectrogram`) without re-decoding.
//!
//! The controller runs `stream` inside `tokio::task::spawn_blocking`. A
//! source performs its fallible setup first (decode check, device open),
//! fires `ready` exactly once with the outcome, then pushes blocks
//! through the `SampleWriter` until the stream ends or a write reports
//! `Aborted`.

pub mod resample;
pub mod wav;

#[cfg(feature = "audio-cpal")]
pub mod capture;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::error::Result;
use crate::producer::{SampleWriter, WriteOutcome};

/// Logical span of samples a source will deliver, independent of how many
/// physical callback invocations carry them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioInformation {
    pub start_sample: u64,
    pub end_sample: u64,
    pub sample_rate: u32,
    pub channels: u16,
    pub duration_secs: f64,
}

impl AudioInformation {
    pub fn from_duration(sample_rate: u32, duration_secs: f64, channels: u16) -> Self {
        let end_sample = (sample_rate as f64 * duration_secs).round() as u64;
        Self {
            start_sample: 0,
            end_sample,
            sample_rate,
            channels,
            duration_secs,
        }
    }

    pub fn from_sample_count(sample_rate: u32, samples: u64, channels: u16) -> Self {
        Self {
            start_sample: 0,
            end_sample: samples,
            sample_rate,
            channels,
            duration_secs: samples as f64 / sample_rate as f64,
        }
    }

    pub fn total_samples(&self) -> u64 {
        self.end_sample - self.start_sample
    }
}

/// One-shot setup handshake back to the controller's `start` future.
pub struct ReadySignal(oneshot::Sender<Result<()>>);

impl ReadySignal {
    pub fn new(tx: oneshot::Sender<Result<()>>) -> Self {
        Self(tx)
    }

    /// Source setup succeeded; streaming is about to begin.
    pub fn ok(self) {
        let _ = self.0.send(Ok(()));
    }

    /// Source setup failed. Fatal for this generation only.
    pub fn err(self, e: crate::error::WaterfallError) {
        let _ = self.0.send(Err(e));
    }
}

/// A stream of mono f32 sample blocks with a known logical span.
pub trait AudioSource: Send + Sync + 'static {
    fn info(&self) -> AudioInformation;

    /// Stream blocks into `writer` until exhausted or aborted.
    ///
    /// Runs on a blocking thread. Implementations fire `ready` exactly
    /// once before the first block, call `writer.announce_ready()` and
    /// stop silently if it refuses, and call `writer.finish()` after the
    /// last block.
    fn stream(&self, writer: SampleWriter, ready: ReadySignal);
}

/// In-memory source over pre-decoded samples.
///
/// The development and test workhorse, and the backing for decoded file
/// sources.
#[derive(Debug, Clone)]
pub struct BufferSource {
    samples: Vec<f32>,
    sample_rate: u32,
    block_size: usize,
}

impl BufferSource {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
            block_size: 1024,
        }
    }

    /// Override the per-callback block size (default 1024 samples).
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size.max(1);
        self
    }
}

impl AudioSource for BufferSource {
    fn info(&self) -> AudioInformation {
        AudioInformation::from_sample_count(self.sample_rate, self.samples.len() as u64, 1)
    }

    fn stream(&self, writer: SampleWriter, ready: ReadySignal) {
        ready.ok();
        if !writer.announce_ready() {
            return;
        }
        for block in self.samples.chunks(self.block_size) {
            if writer.write_block(block) == WriteOutcome::Aborted {
                return;
            }
        }
        writer.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffering::{SampleRing, SharedState};
    use std::sync::Arc;

    #[test]
    fn audio_information_span_math() {
        let info = AudioInformation::from_duration(22_050, 5.0, 1);
        assert_eq!(info.total_samples(), 110_250);

        let info = AudioInformation::from_sample_count(16_000, 8_000, 2);
        assert!((info.duration_secs - 0.5).abs() < 1e-9);
    }

    #[test]
    fn buffer_source_streams_everything_and_finishes() {
        let samples: Vec<f32> = (0..300).map(|i| i as f32 * 1e-3).collect();
        let source = BufferSource::new(samples.clone(), 16_000).with_block_size(64);
        assert_eq!(source.info().total_samples(), 300);

        // Ring big enough that no drain is needed.
        let state = Arc::new(SharedState::new());
        let ring = Arc::new(SampleRing::new(1024));
        let generation = state.reset();
        let writer = SampleWriter::new(Arc::clone(&state), Arc::clone(&ring), generation);

        let (tx, mut rx) = tokio::sync::oneshot::channel();
        source.stream(writer, ReadySignal::new(tx));

        assert!(matches!(rx.try_recv(), Ok(Ok(()))));
        assert_eq!(state.write_head(), 300);
        assert!(state.is_processor_complete(generation));

        let mut contents = vec![0f32; 300];
        ring.read_into(&mut contents);
        assert_eq!(contents, samples);
    }

    #[test]
    fn buffer_source_stops_silently_on_stale_generation() {
        let source = BufferSource::new(vec![0.5; 100], 16_000);
        let state = Arc::new(SharedState::new());
        let ring = Arc::new(SampleRing::new(1024));
        let generation = state.reset();
        let writer = SampleWriter::new(Arc::clone(&state), ring, generation);
        state.reset(); // supersede before streaming begins

        let (tx, mut rx) = tokio::sync::oneshot::channel();
        source.stream(writer, ReadySignal::new(tx));

        // Setup itself succeeded; the abort is silent.
        assert!(matches!(rx.try_recv(), Ok(Ok(()))));
        assert_eq!(state.write_head(), 0);
        assert!(!state.buffer_available());
    }
}
