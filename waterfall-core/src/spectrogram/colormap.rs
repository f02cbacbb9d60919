//! Intensity → RGB lookup for spectrogram painting.
//!
//! The pipeline only depends on the `lookup` mapping; the ramps themselves
//! are simple piecewise-linear gradients and intentionally easy to swap.

use serde::{Deserialize, Serialize};

/// Named colour ramp. Input intensity is clamped to [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorMap {
    /// Black → white.
    Grayscale,
    /// Black → red → yellow → white.
    Heat,
    /// Black → blue → cyan → white.
    Ocean,
}

impl ColorMap {
    pub fn lookup(self, intensity: f32) -> [u8; 3] {
        let v = intensity.clamp(0.0, 1.0);
        match self {
            ColorMap::Grayscale => {
                let g = (v * 255.0) as u8;
                [g, g, g]
            }
            ColorMap::Heat => ramp(v, &[[0, 0, 0], [200, 0, 0], [255, 220, 0], [255, 255, 255]]),
            ColorMap::Ocean => ramp(v, &[[0, 0, 0], [0, 40, 180], [0, 200, 230], [255, 255, 255]]),
        }
    }
}

/// Piecewise-linear interpolation through evenly spaced stops.
fn ramp(v: f32, stops: &[[u8; 3]]) -> [u8; 3] {
    let segments = stops.len() - 1;
    let scaled = v * segments as f32;
    let idx = (scaled as usize).min(segments - 1);
    let t = scaled - idx as f32;
    let a = stops[idx];
    let b = stops[idx + 1];
    let mut out = [0u8; 3];
    for c in 0..3 {
        out[c] = (a[c] as f32 + (b[c] as f32 - a[c] as f32) * t).round() as u8;
    }
    out
}
