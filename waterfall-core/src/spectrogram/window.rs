//! Taper (window) functions applied to each analysis frame before the FFT.

use serde::{Deserialize, Serialize};

/// Named taper applied in place to each frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowFunction {
    Rectangular,
    Hann,
    Hamming,
    Blackman,
}

impl WindowFunction {
    /// Precompute the coefficient vector for a frame of `len` samples.
    pub fn coefficients(self, len: usize) -> Vec<f32> {
        use std::f32::consts::TAU;
        match self {
            WindowFunction::Rectangular => vec![1.0; len],
            WindowFunction::Hann => (0..len)
                .map(|n| 0.5 * (1.0 - (TAU * n as f32 / len as f32).cos()))
                .collect(),
            WindowFunction::Hamming => (0..len)
                .map(|n| 0.54 - 0.46 * (TAU * n as f32 / len as f32).cos())
                .collect(),
            WindowFunction::Blackman => (0..len)
                .map(|n| {
                    let phase = TAU * n as f32 / len as f32;
                    0.42 - 0.5 * phase.cos() + 0.08 * (2.0 * phase).cos()
                })
                .collect(),
        }
    }
}
