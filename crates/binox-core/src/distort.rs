//! Barrel distortion: precomputed remap table and bilinear resampling.

use image::{Rgb, RgbImage};

/// Per-destination-pixel source coordinates for one eye's half-frame.
///
/// Built once at startup and reused for every rendered frame; immutable
/// after construction.
pub struct DistortionMap {
    width: u32,
    height: u32,
    /// Source x per destination pixel, row-major.
    map_x: Vec<f32>,
    /// Source y per destination pixel, row-major.
    map_y: Vec<f32>,
}

impl DistortionMap {
    /// Build a radial barrel remap.
    ///
    /// Destination pixels are normalized to [-1, 1] on both axes. The
    /// source sample sits at the destination scaled by the radial gain
    /// 1 + k1·r² + k2·r⁴, the closed form of r_distorted/r, which stays
    /// finite at r = 0. Negative k1 pulls samples inward, pre-correcting
    /// for magnifying viewer optics.
    pub fn barrel(width: u32, height: u32, k1: f32, k2: f32) -> Self {
        let n = (width * height) as usize;
        let mut map_x = Vec::with_capacity(n);
        let mut map_y = Vec::with_capacity(n);

        for y in 0..height {
            let ny = if height > 1 {
                y as f32 / (height - 1) as f32 * 2.0 - 1.0
            } else {
                0.0
            };
            for x in 0..width {
                let nx = if width > 1 {
                    x as f32 / (width - 1) as f32 * 2.0 - 1.0
                } else {
                    0.0
                };
                let r2 = nx * nx + ny * ny;
                let gain = 1.0 + k1 * r2 + k2 * r2 * r2;
                map_x.push((nx * gain + 1.0) * 0.5 * (width - 1) as f32);
                map_y.push((ny * gain + 1.0) * 0.5 * (height - 1) as f32);
            }
        }

        tracing::debug!(width, height, k1, k2, "built lens distortion map");
        Self {
            width,
            height,
            map_x,
            map_y,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Resample `src` through the map with bilinear interpolation.
    ///
    /// Out-of-range source positions fill black.
    pub fn remap(&self, src: &RgbImage) -> RgbImage {
        let (sw, sh) = src.dimensions();
        let mut out = RgbImage::new(self.width, self.height);

        for y in 0..self.height {
            for x in 0..self.width {
                let idx = (y * self.width + x) as usize;
                let sx = self.map_x[idx];
                let sy = self.map_y[idx];

                let x0 = sx.floor() as i32;
                let y0 = sy.floor() as i32;
                let fx = sx - x0 as f32;
                let fy = sy - y0 as f32;

                let sample = |px: i32, py: i32| -> [f32; 3] {
                    if px >= 0 && px < sw as i32 && py >= 0 && py < sh as i32 {
                        let p = src.get_pixel(px as u32, py as u32).0;
                        [p[0] as f32, p[1] as f32, p[2] as f32]
                    } else {
                        [0.0; 3]
                    }
                };

                let tl = sample(x0, y0);
                let tr = sample(x0 + 1, y0);
                let bl = sample(x0, y0 + 1);
                let br = sample(x0 + 1, y0 + 1);

                let mut px = [0u8; 3];
                for ch in 0..3 {
                    let top = tl[ch] * (1.0 - fx) + tr[ch] * fx;
                    let bot = bl[ch] * (1.0 - fx) + br[ch] * fx;
                    px[ch] = (top * (1.0 - fy) + bot * fy).round().clamp(0.0, 255.0) as u8;
                }
                out.put_pixel(x, y, Rgb(px));
            }
        }
        out
    }
}
