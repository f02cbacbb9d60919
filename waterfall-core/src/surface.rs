//! `PixelSurface` — the consumer-owned render target.
//!
//! Two buffers live here. `data` is the spectrogram itself, sized by the
//! generator (`width × height` RGBA8) and written one column at a time,
//! exclusively by the consumer. `display` is a presentation-scaled copy
//! produced by `resize`; regenerating it never touches `data`, so resizing
//! is idempotent on the underlying spectrogram.
//!
//! The surface is shared as `Arc<parking_lot::Mutex<PixelSurface>>`. By
//! protocol the lock is uncontended: the consumer writes during a run, the
//! controller reads after the completion signal.

use serde::{Deserialize, Serialize};

/// How `resize` maps the spectrogram onto a differently-sized output.
/// Presentation only — generation is unaffected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalingMode {
    /// Fill the target, ignoring aspect ratio.
    Stretch,
    /// Preserve aspect ratio, letterboxing with opaque black.
    Fit,
}

/// Presentation-scaled copy of the spectrogram.
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayImage {
    pub width: u32,
    pub height: u32,
    /// RGBA8, row-major.
    pub pixels: Vec<u8>,
}

/// RGBA8 spectrogram buffer plus its presentation copy.
pub struct PixelSurface {
    width: u32,
    height: u32,
    data: Vec<u8>,
    display: Option<DisplayImage>,
    complete: bool,
}

impl PixelSurface {
    /// A zero-sized surface; the worker sizes it when a generation starts.
    pub fn empty() -> Self {
        Self {
            width: 0,
            height: 0,
            data: Vec::new(),
            display: None,
            complete: false,
        }
    }

    pub fn new(width: u32, height: u32) -> Self {
        let mut surface = Self::empty();
        surface.reset_dimensions(width, height);
        surface
    }

    /// Re-size the data buffer for a new generation. Clears all pixels,
    /// the completion marker, and any stale presentation copy.
    pub fn reset_dimensions(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.data.clear();
        self.data.resize(width as usize * height as usize * 4, 0);
        self.display = None;
        self.complete = false;
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn mark_complete(&mut self) {
        self.complete = true;
    }

    /// Write one RGBA pixel. Returns `false` (caller logs and drops) when
    /// the coordinate is out of bounds.
    pub fn write_pixel(&mut self, x: u32, y: u32, rgba: [u8; 4]) -> bool {
        if x >= self.width || y >= self.height {
            return false;
        }
        let idx = (y as usize * self.width as usize + x as usize) * 4;
        self.data[idx..idx + 4].copy_from_slice(&rgba);
        true
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = (y as usize * self.width as usize + x as usize) * 4;
        let mut out = [0u8; 4];
        out.copy_from_slice(&self.data[idx..idx + 4]);
        Some(out)
    }

    /// Regenerate the presentation copy at `width × height` by
    /// nearest-neighbour sampling of `data`. Idempotent on `data`.
    pub fn resize(&mut self, width: u32, height: u32, mode: ScalingMode) {
        if self.width == 0 || self.height == 0 || width == 0 || height == 0 {
            self.display = Some(DisplayImage {
                width,
                height,
                pixels: vec![0; width as usize * height as usize * 4],
            });
            return;
        }

        let mut pixels = vec![0u8; width as usize * height as usize * 4];
        // Target rectangle the spectrogram maps onto.
        let (rect_x, rect_y, rect_w, rect_h) = match mode {
            ScalingMode::Stretch => (0, 0, width, height),
            ScalingMode::Fit => {
                let scale = f64::min(
                    width as f64 / self.width as f64,
                    height as f64 / self.height as f64,
                );
                let rect_w = ((self.width as f64 * scale) as u32).max(1);
                let rect_h = ((self.height as f64 * scale) as u32).max(1);
                ((width - rect_w) / 2, (height - rect_h) / 2, rect_w, rect_h)
            }
        };

        for dy in 0..rect_h {
            let sy = (dy as u64 * self.height as u64 / rect_h as u64) as u32;
            for dx in 0..rect_w {
                let sx = (dx as u64 * self.width as u64 / rect_w as u64) as u32;
                let src = (sy as usize * self.width as usize + sx as usize) * 4;
                let dst =
                    ((rect_y + dy) as usize * width as usize + (rect_x + dx) as usize) * 4;
                pixels[dst..dst + 4].copy_from_slice(&self.data[src..src + 4]);
            }
        }
        // Letterbox bars stay transparent-black from the zero fill; make
        // them opaque so the output composites as a solid image.
        if matches!(mode, ScalingMode::Fit) {
            for px in pixels.chunks_exact_mut(4) {
                if px[3] == 0 {
                    px[3] = 255;
                }
            }
        }

        self.display = Some(DisplayImage {
            width,
            height,
            pixels,
        });
    }

    pub fn display(&self) -> Option<&DisplayImage> {
        self.display.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkerboard(width: u32, height: u32) -> PixelSurface {
        let mut s = PixelSurface::new(width, height);
        for y in 0..height {
            for x in 0..width {
                let v = if (x + y) % 2 == 0 { 255 } else { 0 };
                assert!(s.write_pixel(x, y, [v, v, v, 255]));
            }
        }
        s
    }

    #[test]
    fn write_pixel_rejects_out_of_bounds() {
        let mut s = PixelSurface::new(4, 4);
        assert!(!s.write_pixel(4, 0, [1, 2, 3, 4]));
        assert!(!s.write_pixel(0, 4, [1, 2, 3, 4]));
        assert!(s.write_pixel(3, 3, [1, 2, 3, 4]));
        assert_eq!(s.pixel(3, 3), Some([1, 2, 3, 4]));
    }

    #[test]
    fn resize_twice_with_same_size_is_a_noop_on_data() {
        let mut s = checkerboard(8, 8);
        let before = s.data().to_vec();
        s.resize(16, 16, ScalingMode::Stretch);
        let first = s.display().unwrap().clone();
        s.resize(16, 16, ScalingMode::Stretch);
        assert_eq!(s.display().unwrap(), &first);
        assert_eq!(s.data(), &before[..]);
    }

    #[test]
    fn stretch_resize_preserves_corner_pixels() {
        let mut s = checkerboard(8, 8);
        s.resize(32, 32, ScalingMode::Stretch);
        let d = s.display().unwrap();
        assert_eq!(&d.pixels[..4], &[255, 255, 255, 255]);
        assert_eq!(d.width, 32);
        assert_eq!(d.height, 32);
    }

    #[test]
    fn fit_resize_letterboxes_a_wide_target() {
        let mut s = checkerboard(8, 8);
        s.resize(32, 16, ScalingMode::Fit);
        let d = s.display().unwrap();
        // 8×8 fit into 32×16 → 16×16 centred at x = 8.
        let left_bar = &d.pixels[..4];
        assert_eq!(left_bar, &[0, 0, 0, 255]);
        let inner = &d.pixels[(8 * 4)..(8 * 4 + 4)];
        assert_eq!(inner, &[255, 255, 255, 255]);
    }

    #[test]
    fn reset_dimensions_clears_completion_and_display() {
        let mut s = checkerboard(4, 4);
        s.mark_complete();
        s.resize(8, 8, ScalingMode::Stretch);
        s.reset_dimensions(6, 2);
        assert!(!s.is_complete());
        assert!(s.display().is_none());
        assert_eq!(s.data().len(), 6 * 2 * 4);
        assert!(s.data().iter().all(|&b| b == 0));
    }
}
