//! Framebuffer output and the stereo frame writer.
//!
//! The render loop hands a composited RGB frame to [`StereoWriter`],
//! which downscales it to one eye, pre-distorts it for the headset
//! lenses, masks the edges, duplicates it side by side and packs the
//! result as little-endian RGB565 for the panel.

use binox_core::distort::DistortionMap;
use binox_core::pack;
use image::imageops::{self, FilterType};
use image::RgbImage;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DisplayError {
    #[error("failed to open display {path}: {source}")]
    Open {
        path: String,
        source: std::io::Error,
    },
    #[error("display write failed: {0}")]
    Write(std::io::Error),
}

/// Byte-addressable display device.
pub trait DisplaySink {
    fn write_at(&mut self, offset: u64, bytes: &[u8]) -> std::io::Result<()>;
}

/// The kernel framebuffer device, usually `/dev/fb0`.
pub struct Framebuffer {
    file: File,
    pub path: String,
}

impl Framebuffer {
    pub fn open(path: &str) -> Result<Self, DisplayError> {
        let file = OpenOptions::new()
            .write(true)
            .open(path)
            .map_err(|source| DisplayError::Open {
                path: path.to_string(),
                source,
            })?;
        tracing::info!(device = path, "opened framebuffer");
        Ok(Self {
            file,
            path: path.to_string(),
        })
    }
}

impl DisplaySink for Framebuffer {
    fn write_at(&mut self, offset: u64, bytes: &[u8]) -> std::io::Result<()> {
        self.file.write_all_at(bytes, offset)
    }
}

/// Renders composited frames into the panel's native stereo layout.
///
/// The distortion map and the packed scanout buffer are built once and
/// reused every cycle.
pub struct StereoWriter<S> {
    sink: S,
    width: u32,
    height: u32,
    border_px: u32,
    map: DistortionMap,
    packed: Vec<u8>,
}

impl<S: DisplaySink> StereoWriter<S> {
    /// `width`/`height` are the full panel dimensions; each eye gets
    /// the left/right half.
    pub fn new(sink: S, width: u32, height: u32, border_px: u32, k1: f32, k2: f32) -> Self {
        let map = DistortionMap::barrel(width / 2, height, k1, k2);
        Self {
            sink,
            width,
            height,
            border_px,
            map,
            packed: Vec::with_capacity((width * height * 2) as usize),
        }
    }

    /// Write one full stereo frame at offset zero.
    pub fn present(&mut self, composed: &RgbImage) -> Result<(), DisplayError> {
        let half_w = self.width / 2;
        let mut eye = if composed.dimensions() == (half_w, self.height) {
            self.map.remap(composed)
        } else {
            let resized = imageops::resize(composed, half_w, self.height, FilterType::Triangle);
            self.map.remap(&resized)
        };
        draw_border(&mut eye, self.border_px);
        pack::pack_stereo_rgb565(&eye, &mut self.packed);
        self.sink.write_at(0, &self.packed).map_err(DisplayError::Write)
    }
}

/// Black out a frame around the eye image. Separates the stereo halves
/// on the panel and masks remap edge artifacts.
fn draw_border(img: &mut RgbImage, border_px: u32) {
    if border_px == 0 {
        return;
    }
    let (w, h) = img.dimensions();
    for (x, y, p) in img.enumerate_pixels_mut() {
        if x < border_px
            || x >= w.saturating_sub(border_px)
            || y < border_px
            || y >= h.saturating_sub(border_px)
        {
            p.0 = [0, 0, 0];
        }
    }
}
