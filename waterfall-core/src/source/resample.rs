//! Sample-rate conversion for decoded file audio.
//!
//! File sources land fully in memory before streaming starts, so the
//! conversion here is a one-shot pass over the whole decoded buffer
//! rather than a streaming session. Never runs on the real-time path.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};

use crate::error::{Result, WaterfallError};

/// Input frames handed to rubato per iteration.
const CONVERT_CHUNK: usize = 1024;

/// Converts f32 mono audio from one fixed sample rate to another.
///
/// When source rate == target rate no rubato session is created and
/// `convert` returns the input unchanged.
pub struct RateConverter {
    inner: Option<FastFixedIn<f32>>,
    ratio: f64,
}

impl RateConverter {
    /// # Errors
    /// Returns `WaterfallError::SourceDecode` if rubato rejects the rate
    /// pair.
    pub fn new(source_rate: u32, target_rate: u32) -> Result<Self> {
        let ratio = target_rate as f64 / source_rate as f64;
        let inner = if source_rate == target_rate {
            None
        } else {
            Some(
                FastFixedIn::<f32>::new(
                    ratio,
                    1.0, // fixed ratio, no dynamic adjustment
                    PolynomialDegree::Cubic,
                    CONVERT_CHUNK,
                    1, // mono
                )
                .map_err(|e| WaterfallError::SourceDecode(format!("resampler init: {e}")))?,
            )
        };
        Ok(Self { inner, ratio })
    }

    pub fn is_passthrough(&self) -> bool {
        self.inner.is_none()
    }

    /// Convert the whole buffer, including the sub-chunk tail.
    ///
    /// # Errors
    /// Returns `WaterfallError::SourceDecode` if rubato fails mid-pass.
    pub fn convert(&mut self, samples: &[f32]) -> Result<Vec<f32>> {
        let Some(inner) = self.inner.as_mut() else {
            return Ok(samples.to_vec());
        };

        let mut out = Vec::with_capacity((samples.len() as f64 * self.ratio).ceil() as usize);
        let mut cursor = 0usize;
        while samples.len() - cursor >= inner.input_frames_next() {
            let take = inner.input_frames_next();
            let chunk = [&samples[cursor..cursor + take]];
            let frames = inner
                .process(&chunk, None)
                .map_err(|e| WaterfallError::SourceDecode(format!("resample: {e}")))?;
            out.extend_from_slice(&frames[0]);
            cursor += take;
        }

        // rubato pads the final short chunk internally; this replaces the
        // explicit zero-pad a streaming converter would carry around.
        if cursor < samples.len() {
            let tail = [&samples[cursor..]];
            let frames = inner
                .process_partial(Some(&tail), None)
                .map_err(|e| WaterfallError::SourceDecode(format!("resample tail: {e}")))?;
            out.extend_from_slice(&frames[0]);
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_returns_input_unchanged() {
        let mut rc = RateConverter::new(22_050, 22_050).unwrap();
        assert!(rc.is_passthrough());
        let samples: Vec<f32> = (0..480).map(|i| i as f32 * 0.001).collect();
        assert_eq!(rc.convert(&samples).unwrap(), samples);
    }

    #[test]
    fn downsamples_48k_to_16k_at_a_third_of_the_length() {
        let mut rc = RateConverter::new(48_000, 16_000).unwrap();
        assert!(!rc.is_passthrough());
        let out = rc.convert(&vec![0.25f32; 9_600]).unwrap();
        assert!(
            (out.len() as i64 - 3_200).unsigned_abs() <= 400,
            "output len={} expected≈3200",
            out.len()
        );
    }

    #[test]
    fn input_shorter_than_one_chunk_still_produces_output() {
        let mut rc = RateConverter::new(48_000, 16_000).unwrap();
        let out = rc.convert(&vec![0.5f32; 500]).unwrap();
        assert!(!out.is_empty());
    }
}
