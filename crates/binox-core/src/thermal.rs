//! Thermal grid processing: normalization, false color, orientation and smoothing.

use crate::frame::FrameError;
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use std::sync::OnceLock;

static TURBO_LUT: OnceLock<[[u8; 3]; 256]> = OnceLock::new();

/// 256-entry turbo palette, evaluated once from the published polynomial
/// fit. Index 0 is the dark blue end, 255 the dark red end.
fn turbo_palette() -> &'static [[u8; 3]; 256] {
    TURBO_LUT.get_or_init(|| {
        let mut lut = [[0u8; 3]; 256];
        for (i, entry) in lut.iter_mut().enumerate() {
            let x = i as f32 / 255.0;
            let (x2, x3) = (x * x, x * x * x);
            let (x4, x5) = (x2 * x2, x2 * x3);

            let r = 0.13572138 + 4.61539260 * x - 42.66032258 * x2 + 132.13108234 * x3
                - 152.94239396 * x4
                + 59.28637943 * x5;
            let g = 0.09140261 + 2.19418839 * x + 4.84296658 * x2 - 14.18503333 * x3
                + 4.27729857 * x4
                + 2.82956604 * x5;
            let b = 0.10667330 + 12.64194608 * x - 60.58204836 * x2 + 110.36276771 * x3
                - 89.90310912 * x4
                + 27.34824973 * x5;

            *entry = [level_u8(r), level_u8(g), level_u8(b)];
        }
        lut
    })
}

#[inline]
fn level_u8(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Stretch a raw intensity grid to the full 0..255 range.
///
/// A flat grid (max == min) maps to all zeros rather than dividing by zero.
pub fn normalize_raw(raw: &[u16]) -> Vec<u8> {
    let (Some(&min), Some(&max)) = (raw.iter().min(), raw.iter().max()) else {
        return Vec::new();
    };
    let span = (max - min) as f32;
    if span == 0.0 {
        return vec![0; raw.len()];
    }
    raw.iter()
        .map(|&v| (((v - min) as f32 / span) * 255.0).round() as u8)
        .collect()
}

/// Map normalized levels through the palette into an RGB grid.
///
/// Levels index the palette inverted (255 − level): the hottest reading
/// lands on the dark blue end, the coldest on dark red.
pub fn colorize(levels: &[u8], cols: u32, rows: u32) -> Result<RgbImage, FrameError> {
    let expected = (cols * rows) as usize;
    if levels.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: levels.len(),
        });
    }

    let lut = turbo_palette();
    let mut rgb = Vec::with_capacity(expected * 3);
    for &v in &levels[..expected] {
        rgb.extend_from_slice(&lut[255 - v as usize]);
    }
    RgbImage::from_raw(cols, rows, rgb).ok_or(FrameError::InvalidLength {
        expected,
        actual: levels.len(),
    })
}

/// Normalized 1-D Gaussian kernel. Even sizes are widened to the next odd.
///
/// A non-positive sigma falls back to the usual size-derived value
/// 0.3·((size−1)/2 − 1) + 0.8.
pub fn gaussian_kernel(size: u32, sigma: f32) -> Vec<f32> {
    let size = size.max(1) | 1;
    let half = (size / 2) as i32;
    let sigma = if sigma > 0.0 {
        sigma
    } else {
        0.3 * ((size as f32 - 1.0) * 0.5 - 1.0) + 0.8
    };

    let mut kernel: Vec<f32> = (-half..=half)
        .map(|d| (-((d * d) as f32) / (2.0 * sigma * sigma)).exp())
        .collect();
    let sum: f32 = kernel.iter().sum();
    for v in &mut kernel {
        *v /= sum;
    }
    kernel
}

/// Separable Gaussian blur with clamped edges.
pub fn gaussian_smooth(img: &RgbImage, kernel: &[f32]) -> RgbImage {
    if kernel.len() <= 1 {
        return img.clone();
    }
    let (w, h) = img.dimensions();
    let half = (kernel.len() / 2) as i32;

    // Horizontal pass into an f32 buffer, vertical pass into the output.
    let mut tmp = vec![0.0f32; (w * h * 3) as usize];
    for y in 0..h {
        for x in 0..w {
            let mut acc = [0.0f32; 3];
            for (k, &weight) in kernel.iter().enumerate() {
                let sx = (x as i32 + k as i32 - half).clamp(0, w as i32 - 1) as u32;
                let p = img.get_pixel(sx, y).0;
                for ch in 0..3 {
                    acc[ch] += p[ch] as f32 * weight;
                }
            }
            let idx = ((y * w + x) * 3) as usize;
            tmp[idx..idx + 3].copy_from_slice(&acc);
        }
    }

    let mut out = RgbImage::new(w, h);
    for y in 0..h {
        for x in 0..w {
            let mut acc = [0.0f32; 3];
            for (k, &weight) in kernel.iter().enumerate() {
                let sy = (y as i32 + k as i32 - half).clamp(0, h as i32 - 1) as u32;
                let idx = ((sy * w + x) * 3) as usize;
                for ch in 0..3 {
                    acc[ch] += tmp[idx + ch] * weight;
                }
            }
            out.put_pixel(
                x,
                y,
                Rgb([
                    acc[0].round().clamp(0.0, 255.0) as u8,
                    acc[1].round().clamp(0.0, 255.0) as u8,
                    acc[2].round().clamp(0.0, 255.0) as u8,
                ]),
            );
        }
    }
    out
}

/// Processing chain from a raw sensor grid to a publishable frame:
/// normalize, false-color, flip, upscale, optionally smooth.
///
/// The chain is fixed per sensor and applied identically in every mode.
pub struct ThermalProcessor {
    cols: u32,
    rows: u32,
    out_width: u32,
    out_height: u32,
    kernel: Option<Vec<f32>>,
}

impl ThermalProcessor {
    /// `smooth_kernel` = 0 or 1 disables the blur stage.
    pub fn new(
        cols: u32,
        rows: u32,
        out_width: u32,
        out_height: u32,
        smooth_kernel: u32,
        smooth_sigma: f32,
    ) -> Self {
        let kernel = (smooth_kernel > 1).then(|| gaussian_kernel(smooth_kernel, smooth_sigma));
        Self {
            cols,
            rows,
            out_width,
            out_height,
            kernel,
        }
    }

    /// Grid cells expected per raw reading.
    pub fn grid_len(&self) -> usize {
        (self.cols * self.rows) as usize
    }

    pub fn process(&self, raw: &[u16]) -> Result<RgbImage, FrameError> {
        let levels = normalize_raw(raw);
        let colored = colorize(&levels, self.cols, self.rows)?;
        // The sensor sees the scene mirrored relative to the optical path.
        let flipped = imageops::flip_horizontal(&colored);
        let scaled = imageops::resize(
            &flipped,
            self.out_width,
            self.out_height,
            FilterType::Nearest,
        );
        Ok(match &self.kernel {
            Some(k) => gaussian_smooth(&scaled, k),
            None => scaled,
        })
    }
}
