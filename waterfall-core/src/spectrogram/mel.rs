//! Slaney-style mel filterbank for the optional mel remap stage.
//!
//! Operates on the non-DC magnitude vector the generator produces (bins
//! `1..=window_size/2`). The output bin count equals the input bin count
//! so the image height is invariant under `mel_scale`.

/// Triangular filterbank mapping linear-frequency magnitudes to mel bins.
pub struct MelFilterBank {
    /// `filters[m][k]` weights bin `k` (frequency `(k+1)·sr/window`).
    filters: Vec<Vec<f32>>,
}

impl MelFilterBank {
    /// Build a bank of `n_mels` filters over the `window_size/2` non-DC
    /// bins of an FFT at `sample_rate`, spanning 0 Hz to Nyquist.
    pub fn new(window_size: usize, sample_rate: u32, n_mels: usize) -> Self {
        let n_bins = window_size / 2;
        let fmax = sample_rate as f32 / 2.0;
        let mel_min = hz_to_mel(0.0);
        let mel_max = hz_to_mel(fmax);

        let mel_pts: Vec<f32> = (0..=(n_mels + 1))
            .map(|i| mel_min + (mel_max - mel_min) * i as f32 / (n_mels + 1) as f32)
            .collect();
        let hz_pts: Vec<f32> = mel_pts.iter().map(|&m| mel_to_hz(m)).collect();
        // Bin k of the magnitude vector holds FFT bin k+1 (DC is skipped).
        let bin_freqs: Vec<f32> = (0..n_bins)
            .map(|k| (k + 1) as f32 * sample_rate as f32 / window_size as f32)
            .collect();

        let mut filters = vec![vec![0f32; n_bins]; n_mels];
        for m in 0..n_mels {
            let lower = hz_pts[m];
            let center = hz_pts[m + 1];
            let upper = hz_pts[m + 2];
            let down_denom = (center - lower).max(1e-10);
            let up_denom = (upper - center).max(1e-10);
            let enorm = 2.0 / (upper - lower).max(1e-10);

            for (k, &freq) in bin_freqs.iter().enumerate() {
                let w = if freq >= lower && freq <= center {
                    (freq - lower) / down_denom
                } else if freq > center && freq <= upper {
                    (upper - freq) / up_denom
                } else {
                    0.0
                };
                filters[m][k] = (w * enorm).max(0.0);
            }
        }
        Self { filters }
    }

    pub fn n_mels(&self) -> usize {
        self.filters.len()
    }

    /// Remap `linear` magnitudes into `mel_out` (lengths must match the
    /// bank dimensions).
    pub fn apply(&self, linear: &[f32], mel_out: &mut [f32]) {
        debug_assert_eq!(mel_out.len(), self.filters.len());
        for (out, filter) in mel_out.iter_mut().zip(&self.filters) {
            *out = filter
                .iter()
                .zip(linear)
                .map(|(&w, &mag)| w * mag)
                .sum::<f32>();
        }
    }
}

fn hz_to_mel(hz: f32) -> f32 {
    let f_sp = 200.0 / 3.0;
    let min_log_hz = 1_000.0;
    let min_log_mel = min_log_hz / f_sp;
    let logstep = (6.4_f32).ln() / 27.0;
    if hz >= min_log_hz {
        min_log_mel + (hz / min_log_hz).ln() / logstep
    } else {
        hz / f_sp
    }
}

fn mel_to_hz(mel: f32) -> f32 {
    let f_sp = 200.0 / 3.0;
    let min_log_hz = 1_000.0;
    let min_log_mel = min_log_hz / f_sp;
    let logstep = (6.4_f32).ln() / 27.0;
    if mel >= min_log_mel {
        min_log_hz * (logstep * (mel - min_log_mel)).exp()
    } else {
        mel * f_sp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn mel_scale_round_trips() {
        for hz in [50.0, 440.0, 1_000.0, 4_000.0, 11_025.0] {
            assert_relative_eq!(mel_to_hz(hz_to_mel(hz)), hz, max_relative = 1e-4);
        }
    }

    #[test]
    fn bank_has_requested_dimensions() {
        let bank = MelFilterBank::new(512, 22_050, 256);
        assert_eq!(bank.n_mels(), 256);
        assert_eq!(bank.filters[0].len(), 256);
    }

    #[test]
    fn filters_are_nonnegative_and_each_covers_some_bins() {
        let bank = MelFilterBank::new(512, 22_050, 64);
        for (m, filter) in bank.filters.iter().enumerate() {
            assert!(filter.iter().all(|&w| w >= 0.0));
            assert!(
                filter.iter().any(|&w| w > 0.0),
                "filter {m} has no support"
            );
        }
    }

    #[test]
    fn apply_concentrates_a_pure_bin_into_matching_mel_bins() {
        let bank = MelFilterBank::new(512, 22_050, 64);
        let n_bins = 256;
        // Energy at ~2 kHz: bin index = 2000 / (22050/512) - 1 ≈ 45.
        let mut linear = vec![0f32; n_bins];
        linear[45] = 1.0;
        let mut mel = vec![0f32; 64];
        bank.apply(&linear, &mut mel);

        let peak = mel
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .unwrap()
            .0;
        // With Slaney spacing over 0–11 025 Hz, 2 kHz lands mid-bank.
        assert!((20..=45).contains(&peak), "unexpected mel peak at {peak}");
        assert!(mel.iter().sum::<f32>() > 0.0);
    }
}
