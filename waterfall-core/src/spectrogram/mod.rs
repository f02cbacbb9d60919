//! Spectrogram generation: windowing, FFT, magnitude extraction,
//! normalization, optional mel remap, dB/contrast/brightness mapping,
//! colour lookup, pixel write.
//!
//! ## Per-window pipeline
//!
//! ```text
//! extract window ─► peak |amplitude| ─► taper ─► FFT
//!        │                                        │
//!        │                     magnitude √(re²+im²)·2, DC skipped
//!        │                                        │
//!        │                normalize to unit peak, rescale to amplitude
//!        │                                        │
//!        │                        optional mel filterbank remap
//!        │                                        │
//!        └──────────────►  dB → [0,1] → (+brightness)·contrast → RGB
//! ```
//!
//! Rescaling each frame into the original signal's amplitude envelope
//! makes brightness/contrast behave consistently across frames of very
//! different loudness.

pub mod colormap;
pub mod mel;
pub mod window;

use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Result, WaterfallError};
use crate::source::AudioInformation;
use crate::surface::{PixelSurface, ScalingMode};

pub use colormap::ColorMap;
pub use mel::MelFilterBank;
pub use window::WindowFunction;

/// Rendering options for one generation. Never mutated on a live
/// generation — option changes restart the pipeline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpectrogramOptions {
    /// Samples per FFT frame. Must be a power of two.
    pub window_size: usize,
    /// Overlap between consecutive frames, in samples. Must be smaller
    /// than `window_size`.
    pub window_overlap: usize,
    pub window_function: WindowFunction,
    /// Remap linear frequency bins through a mel filterbank.
    pub mel_scale: bool,
    /// Additive intensity offset, roughly [-0.5, 0.5].
    pub brightness: f32,
    /// Multiplicative intensity factor, roughly [0, 2].
    pub contrast: f32,
    pub color_map: ColorMap,
    /// Presentation-only: how `resize_canvas` maps onto the target.
    pub scaling_mode: ScalingMode,
    /// Decibel normalization floor. Intensities at or below map to 0.
    pub db_floor: f32,
    /// Decibel normalization ceiling. Intensities at or above map to 1.
    pub db_ceiling: f32,
}

impl Default for SpectrogramOptions {
    fn default() -> Self {
        Self {
            window_size: 1024,
            window_overlap: 512,
            window_function: WindowFunction::Hann,
            mel_scale: false,
            brightness: 0.0,
            contrast: 1.0,
            color_map: ColorMap::Heat,
            scaling_mode: ScalingMode::Stretch,
            db_floor: -120.0,
            db_ceiling: 0.0,
        }
    }
}

impl SpectrogramOptions {
    /// Frame advance in samples.
    pub fn step(&self) -> usize {
        self.window_size - self.window_overlap
    }

    pub fn validate(&self) -> Result<()> {
        if self.window_size < 16 || !self.window_size.is_power_of_two() {
            return Err(WaterfallError::InvalidOptions(format!(
                "window_size must be a power of two >= 16, got {}",
                self.window_size
            )));
        }
        if self.window_overlap >= self.window_size {
            return Err(WaterfallError::InvalidOptions(format!(
                "window_overlap {} must be smaller than window_size {}",
                self.window_overlap, self.window_size
            )));
        }
        if self.contrast < 0.0 {
            return Err(WaterfallError::InvalidOptions(format!(
                "contrast must be non-negative, got {}",
                self.contrast
            )));
        }
        if self.db_ceiling <= self.db_floor {
            return Err(WaterfallError::InvalidOptions(format!(
                "db_ceiling {} must exceed db_floor {}",
                self.db_ceiling, self.db_floor
            )));
        }
        Ok(())
    }
}

/// Magnitude floor before the log — keeps `log10` finite for silent bins.
const MAG_EPSILON: f32 = 1e-10;

/// Stateful spectrogram renderer bound to one
/// (`AudioInformation`, `SpectrogramOptions`) pair.
///
/// Scratch buffers are allocated once and reused per frame; output
/// dimensions are fixed up front so the surface never reallocates
/// mid-stream.
pub struct SpectrogramGenerator {
    options: SpectrogramOptions,
    width: u32,
    height: u32,
    step: usize,
    taper: Vec<f32>,
    fft: Arc<dyn Fft<f32>>,
    fft_buf: Vec<Complex<f32>>,
    fft_scratch: Vec<Complex<f32>>,
    /// Frame magnitudes after rescale (and mel remap when enabled).
    values: Vec<f32>,
    mel_scratch: Vec<f32>,
    mel_bank: Option<MelFilterBank>,
    /// Next output column.
    frames_painted: u32,
    overflow_warned: bool,
}

impl SpectrogramGenerator {
    pub fn new(info: &AudioInformation, options: SpectrogramOptions) -> Result<Self> {
        options.validate()?;
        let step = options.step();
        let total_samples = info.total_samples();
        let width = total_samples.div_ceil(step as u64) as u32;
        let height = (options.window_size / 2) as u32;

        let taper = options.window_function.coefficients(options.window_size);
        let fft = FftPlanner::<f32>::new().plan_fft_forward(options.window_size);
        let fft_scratch = vec![Complex::new(0.0, 0.0); fft.get_inplace_scratch_len()];
        let mel_bank = options.mel_scale.then(|| {
            MelFilterBank::new(options.window_size, info.sample_rate, height as usize)
        });

        Ok(Self {
            options,
            width,
            height,
            step,
            taper,
            fft_buf: vec![Complex::new(0.0, 0.0); options.window_size],
            fft,
            fft_scratch,
            values: vec![0.0; height as usize],
            mel_scratch: vec![0.0; height as usize],
            mel_bank,
            frames_painted: 0,
            overflow_warned: false,
        })
    }

    /// Output width in columns: `ceil(total_samples / step)`.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Output height in rows: `window_size / 2`.
    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn frames_painted(&self) -> u32 {
        self.frames_painted
    }

    pub fn options(&self) -> &SpectrogramOptions {
        &self.options
    }

    /// Consume as many whole windows from `samples` as possible, painting
    /// one column each. Returns the number of input samples consumed so
    /// the caller can shift the ring.
    ///
    /// With `consume_all == false` the trailing partial window is left
    /// unconsumed (the caller waits for more samples). With
    /// `consume_all == true` — the stream's final batch — the last
    /// full-size window is backed up to end exactly at the end of
    /// `samples` and repeated until every output column is painted, and
    /// everything is consumed.
    pub fn process(
        &mut self,
        samples: &[f32],
        consume_all: bool,
        surface: &mut PixelSurface,
    ) -> usize {
        let window = self.options.window_size;
        let mut cursor = 0usize;

        while cursor + window <= samples.len() {
            self.paint_column(&samples[cursor..cursor + window], surface);
            cursor += self.step;
        }

        if consume_all {
            // Every step-aligned start owns an output column, including
            // those whose window would run past the stream end. Fill the
            // rest of the surface with the backed-up final window so the
            // column count always equals the computed width.
            let remaining = (self.width - self.frames_painted) as usize;
            if remaining > 0 && !samples.is_empty() {
                if samples.len() >= window {
                    let start = samples.len() - window;
                    for _ in 0..remaining {
                        self.paint_column(&samples[start..], surface);
                    }
                } else {
                    // Shorter than one window: pad the lone frame out.
                    let mut frame = vec![0.0; window];
                    frame[..samples.len()].copy_from_slice(samples);
                    for _ in 0..remaining {
                        self.paint_column(&frame, surface);
                    }
                }
            }
            return samples.len();
        }

        cursor.min(samples.len())
    }

    fn paint_column(&mut self, frame: &[f32], surface: &mut PixelSurface) {
        if self.frames_painted >= self.width {
            // Width math should make this unreachable; treat it as a
            // programming-error signal, not a runtime condition.
            if !self.overflow_warned {
                warn!(
                    width = self.width,
                    "dropping spectrogram column past computed width"
                );
                self.overflow_warned = true;
            }
            return;
        }

        self.analyze_frame(frame);
        let column = self.frames_painted;

        let opts = &self.options;
        let db_span = opts.db_ceiling - opts.db_floor;
        for (bin, &value) in self.values.iter().enumerate() {
            let db = 20.0 * value.max(MAG_EPSILON).log10();
            let normalized = ((db - opts.db_floor) / db_span).clamp(0.0, 1.0);
            let intensity = ((normalized + opts.brightness) * opts.contrast).clamp(0.0, 1.0);
            let [r, g, b] = opts.color_map.lookup(intensity);
            // Frequency axis inverted: low frequencies at the bottom row.
            let row = self.height - 1 - bin as u32;
            if !surface.write_pixel(column, row, [r, g, b, 255]) && !self.overflow_warned {
                warn!(column, row, "pixel write out of surface bounds — dropped");
                self.overflow_warned = true;
            }
        }

        self.frames_painted += 1;
    }

    /// Run taper → FFT → magnitude → rescale (→ mel) for one frame,
    /// leaving per-bin values in `self.values`. Returns the frame's peak
    /// absolute sample value.
    fn analyze_frame(&mut self, frame: &[f32]) -> f32 {
        debug_assert_eq!(frame.len(), self.options.window_size);

        let amplitude_max = frame.iter().fold(0f32, |acc, &s| acc.max(s.abs()));

        for ((slot, &sample), &coeff) in self.fft_buf.iter_mut().zip(frame).zip(&self.taper) {
            *slot = Complex::new(sample * coeff, 0.0);
        }
        self.fft
            .process_with_scratch(&mut self.fft_buf, &mut self.fft_scratch);

        // Bins 1..=height — DC is skipped; ×2 folds the negative-frequency
        // half back into the positive half.
        let mut magnitude_max = 0f32;
        for k in 1..=self.height as usize {
            let mag = self.fft_buf[k].norm() * 2.0;
            self.values[k - 1] = mag;
            magnitude_max = magnitude_max.max(mag);
        }

        // Normalize the frame to unit peak, then rescale into the signal's
        // amplitude envelope.
        if magnitude_max > 0.0 {
            let scale = amplitude_max / magnitude_max;
            for v in self.values.iter_mut() {
                *v *= scale;
            }
        } else {
            self.values.fill(0.0);
        }

        if let Some(bank) = &self.mel_bank {
            bank.apply(&self.values, &mut self.mel_scratch);
            std::mem::swap(&mut self.values, &mut self.mel_scratch);
        }

        amplitude_max
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f32::consts::TAU;

    fn info(sample_rate: u32, duration_secs: f64) -> AudioInformation {
        AudioInformation::from_duration(sample_rate, duration_secs, 1)
    }

    fn sine(freq: f32, sample_rate: u32, len: usize, amplitude: f32) -> Vec<f32> {
        (0..len)
            .map(|i| amplitude * (TAU * freq * i as f32 / sample_rate as f32).sin())
            .collect()
    }

    #[test]
    fn scenario_a_dimensions() {
        // windowSize=512, overlap=0, 22050 Hz, 5 s → 216 × 256.
        let opts = SpectrogramOptions {
            window_size: 512,
            window_overlap: 0,
            ..Default::default()
        };
        let gen = SpectrogramGenerator::new(&info(22_050, 5.0), opts).unwrap();
        assert_eq!(gen.width(), 216);
        assert_eq!(gen.height(), 256);
    }

    #[test]
    fn width_formula_holds_across_option_combinations() {
        for (window, overlap, rate, secs) in [
            (512usize, 0usize, 22_050u32, 5.0f64),
            (1024, 512, 44_100, 2.5),
            (2048, 1536, 48_000, 0.7),
            (256, 128, 16_000, 10.0),
        ] {
            let opts = SpectrogramOptions {
                window_size: window,
                window_overlap: overlap,
                ..Default::default()
            };
            let gen = SpectrogramGenerator::new(&info(rate, secs), opts).unwrap();
            let total = (rate as f64 * secs).round() as u64;
            let step = (window - overlap) as u64;
            assert_eq!(gen.width() as u64, total.div_ceil(step));
            assert_eq!(gen.height() as usize, window / 2);
        }
    }

    #[test]
    fn rejects_invalid_options() {
        let not_pow2 = SpectrogramOptions {
            window_size: 500,
            ..Default::default()
        };
        assert!(matches!(
            SpectrogramGenerator::new(&info(22_050, 1.0), not_pow2),
            Err(WaterfallError::InvalidOptions(_))
        ));

        let overlap_too_big = SpectrogramOptions {
            window_size: 512,
            window_overlap: 512,
            ..Default::default()
        };
        assert!(overlap_too_big.validate().is_err());

        let inverted_db = SpectrogramOptions {
            db_floor: 0.0,
            db_ceiling: -10.0,
            ..Default::default()
        };
        assert!(inverted_db.validate().is_err());
    }

    #[test]
    fn rescaled_peak_equals_amplitude_max_for_every_taper() {
        for taper in [
            WindowFunction::Rectangular,
            WindowFunction::Hann,
            WindowFunction::Hamming,
            WindowFunction::Blackman,
        ] {
            let opts = SpectrogramOptions {
                window_size: 512,
                window_overlap: 0,
                window_function: taper,
                ..Default::default()
            };
            let mut gen = SpectrogramGenerator::new(&info(22_050, 1.0), opts).unwrap();
            let frame = sine(430.66, 22_050, 512, 0.37); // bin-aligned: 10·sr/512
            let amplitude_max = gen.analyze_frame(&frame);
            let peak = gen.values.iter().fold(0f32, |a, &v| a.max(v));
            assert_relative_eq!(peak, amplitude_max, max_relative = 1e-4);
        }
    }

    #[test]
    fn silent_frame_produces_zero_values() {
        let opts = SpectrogramOptions {
            window_size: 256,
            window_overlap: 0,
            ..Default::default()
        };
        let mut gen = SpectrogramGenerator::new(&info(16_000, 1.0), opts).unwrap();
        let amplitude_max = gen.analyze_frame(&vec![0.0; 256]);
        assert_eq!(amplitude_max, 0.0);
        assert!(gen.values.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn magnitude_indexing_starts_at_bin_one() {
        // A tone in FFT bin 1 must land in values[0]: the DC bin is
        // skipped, not shifted.
        let opts = SpectrogramOptions {
            window_size: 256,
            window_overlap: 0,
            window_function: WindowFunction::Rectangular,
            ..Default::default()
        };
        let mut gen = SpectrogramGenerator::new(&info(16_000, 1.0), opts).unwrap();
        let frame = sine(16_000.0 / 256.0, 16_000, 256, 0.6);
        gen.analyze_frame(&frame);
        let peak_idx = gen
            .values
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .unwrap()
            .0;
        assert_eq!(peak_idx, 0);
    }

    #[test]
    fn partial_window_is_left_unconsumed_until_consume_all() {
        let opts = SpectrogramOptions {
            window_size: 256,
            window_overlap: 0,
            ..Default::default()
        };
        let mut gen = SpectrogramGenerator::new(&info(16_000, 1.0), opts).unwrap();
        let mut surface = PixelSurface::new(gen.width(), gen.height());

        let samples = sine(500.0, 16_000, 600, 0.5);
        let consumed = gen.process(&samples, false, &mut surface);
        assert_eq!(consumed, 512); // two whole windows, 88-sample tail kept
        assert_eq!(gen.frames_painted(), 2);
    }

    #[test]
    fn scenario_d_consume_all_consumes_the_entire_valid_length() {
        let opts = SpectrogramOptions {
            window_size: 256,
            window_overlap: 128,
            ..Default::default()
        };
        let mut gen = SpectrogramGenerator::new(&info(16_000, 0.05), opts).unwrap();
        let mut surface = PixelSurface::new(gen.width(), gen.height());

        let samples = sine(500.0, 16_000, 700, 0.5);
        let consumed = gen.process(&samples, true, &mut surface);
        assert_eq!(consumed, samples.len());
    }

    #[test]
    fn final_window_is_backed_up_not_zero_padded() {
        // 300 samples, window 256, step 256: one natural window, then the
        // final window backed up to [44, 300).
        let opts = SpectrogramOptions {
            window_size: 256,
            window_overlap: 0,
            ..Default::default()
        };
        let mut gen = SpectrogramGenerator::new(&info(16_000, 300.0 / 16_000.0), opts).unwrap();
        let mut surface = PixelSurface::new(gen.width(), gen.height());

        let samples = sine(1_000.0, 16_000, 300, 0.5);
        let consumed = gen.process(&samples, true, &mut surface);
        assert_eq!(consumed, 300);
        assert_eq!(gen.frames_painted(), 2);
    }

    #[test]
    fn backed_up_window_repeats_until_every_column_is_painted() {
        // 640 samples with step 128: width is 5 but only two natural
        // windows fit, so consume_all duplicates the final window into
        // the last three columns.
        let opts = SpectrogramOptions {
            window_size: 512,
            window_overlap: 384,
            ..Default::default()
        };
        let total = 640usize;
        let mut gen =
            SpectrogramGenerator::new(&info(16_000, total as f64 / 16_000.0), opts).unwrap();
        assert_eq!(gen.width(), 5);
        let mut surface = PixelSurface::new(gen.width(), gen.height());

        let samples = sine(800.0, 16_000, total, 0.4);
        let consumed = gen.process(&samples, true, &mut surface);
        assert_eq!(consumed, total);
        assert_eq!(gen.frames_painted(), 5);
        for row in 0..gen.height() {
            assert_eq!(surface.pixel(2, row), surface.pixel(4, row));
        }
    }

    #[test]
    fn stream_shorter_than_one_window_still_paints_its_column() {
        let opts = SpectrogramOptions {
            window_size: 256,
            window_overlap: 0,
            ..Default::default()
        };
        let mut gen = SpectrogramGenerator::new(&info(16_000, 100.0 / 16_000.0), opts).unwrap();
        assert_eq!(gen.width(), 1);
        let mut surface = PixelSurface::new(gen.width(), gen.height());

        let samples = sine(500.0, 16_000, 100, 0.5);
        let consumed = gen.process(&samples, true, &mut surface);
        assert_eq!(consumed, 100);
        assert_eq!(gen.frames_painted(), 1);
        assert_eq!(surface.pixel(0, gen.height() - 1).unwrap()[3], 255);
    }

    #[test]
    fn low_frequency_energy_lands_near_the_bottom_row() {
        let opts = SpectrogramOptions {
            window_size: 256,
            window_overlap: 0,
            window_function: WindowFunction::Hann,
            color_map: ColorMap::Grayscale,
            ..Default::default()
        };
        let mut gen = SpectrogramGenerator::new(&info(16_000, 256.0 / 16_000.0), opts).unwrap();
        let mut surface = PixelSurface::new(gen.width(), gen.height());

        // Bin-aligned tone in FFT bin 3 → magnitude index 2 → row 125.
        let samples = sine(3.0 * 16_000.0 / 256.0, 16_000, 256, 0.8);
        gen.process(&samples, true, &mut surface);

        let height = gen.height();
        let brightest_row = (0..height)
            .max_by_key(|&row| surface.pixel(0, row).unwrap()[0])
            .unwrap();
        assert_eq!(brightest_row, height - 1 - 2);
    }

    #[test]
    fn columns_past_computed_width_are_dropped_not_written() {
        let opts = SpectrogramOptions {
            window_size: 256,
            window_overlap: 0,
            ..Default::default()
        };
        // Declared duration of one window, but three windows delivered.
        let mut gen = SpectrogramGenerator::new(&info(16_000, 256.0 / 16_000.0), opts).unwrap();
        let mut surface = PixelSurface::new(gen.width(), gen.height());
        assert_eq!(gen.width(), 1);

        let samples = sine(500.0, 16_000, 768, 0.5);
        let consumed = gen.process(&samples, true, &mut surface);
        assert_eq!(consumed, 768);
        assert_eq!(gen.frames_painted(), 1);
    }

    #[test]
    fn options_serialize_camel_case() {
        let json = serde_json::to_value(SpectrogramOptions::default()).unwrap();
        assert_eq!(json["windowSize"], 1024);
        assert_eq!(json["windowOverlap"], 512);
        assert_eq!(json["windowFunction"], "hann");
        assert_eq!(json["colorMap"], "heat");
        assert_eq!(json["melScale"], false);
        assert_eq!(json["dbFloor"], -120.0);
    }
}
