//! Display modes and the thermal-over-visible fusion algorithm.

use crate::frame::Frame;
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use std::sync::Arc;

/// Physical sensor kinds the headset carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorKind {
    /// Standard visible-light camera (IR-filtered).
    VisibleStandard,
    /// No-IR-filter visible camera for low light.
    VisibleNoir,
    Thermal,
}

/// Active display mode. Selected once per switch transition; the render
/// loop matches on the variant instead of probing sensor handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    VisibleA,
    VisibleB,
    Thermal,
    OverlayA,
    OverlayB,
}

impl Mode {
    /// The visible sensor this mode composites from, if any.
    pub fn visible_kind(self) -> Option<SensorKind> {
        match self {
            Mode::VisibleA | Mode::OverlayA => Some(SensorKind::VisibleStandard),
            Mode::VisibleB | Mode::OverlayB => Some(SensorKind::VisibleNoir),
            Mode::Thermal => None,
        }
    }

    /// Whether this mode reads the thermal slot.
    pub fn uses_thermal(self) -> bool {
        matches!(self, Mode::Thermal | Mode::OverlayA | Mode::OverlayB)
    }
}

/// Maps 8-way switch positions (1..=8) to modes. Unmapped positions are
/// ignored by the mode controller: the last valid mode persists.
#[derive(Debug, Clone)]
pub struct SwitchMap([Option<Mode>; 8]);

impl SwitchMap {
    pub fn new(positions: [Option<Mode>; 8]) -> Self {
        Self(positions)
    }

    pub fn mode_for(&self, position: u8) -> Option<Mode> {
        if position == 0 || position > 8 {
            return None;
        }
        self.0[(position - 1) as usize]
    }
}

impl Default for SwitchMap {
    fn default() -> Self {
        Self([
            Some(Mode::VisibleA),
            Some(Mode::VisibleB),
            Some(Mode::Thermal),
            Some(Mode::OverlayA),
            Some(Mode::OverlayB),
            None,
            None,
            None,
        ])
    }
}

/// Relative scale of the thermal image inside the visible frame.
///
/// Both sensors see the same scene from the same vantage point, so the
/// ratio of their angular fields of view is the ratio of their image
/// extents. A 55° thermal sensor inside a 75° visible camera covers
/// ~73% of the visible frame.
pub fn fov_scale(thermal_fov_deg: f32, visible_fov_deg: f32) -> f32 {
    thermal_fov_deg / visible_fov_deg
}

/// Dimensions of an image after scaling both axes, rounded to nearest.
pub fn scaled_dims(width: u32, height: u32, scale: f32) -> (u32, u32) {
    let w = (width as f32 * scale).round().max(1.0) as u32;
    let h = (height as f32 * scale).round().max(1.0) as u32;
    (w, h)
}

/// Alpha-blend a FOV-scaled thermal frame centered onto a visible base.
///
/// The thermal frame is resized by `scale` on both axes and centered;
/// the offset per axis is (base − scaled)/2 and may be negative, in
/// which case the thermal edges are clipped symmetrically. Base pixels
/// outside the thermal footprint are left untouched.
pub fn overlay_thermal(
    base: &RgbImage,
    thermal: &RgbImage,
    scale: f32,
    base_weight: f32,
    thermal_weight: f32,
) -> RgbImage {
    let (sw, sh) = scaled_dims(thermal.width(), thermal.height(), scale);
    let scaled = imageops::resize(thermal, sw, sh, FilterType::Triangle);

    let (bw, bh) = base.dimensions();
    let off_x = (bw as i32 - sw as i32) / 2;
    let off_y = (bh as i32 - sh as i32) / 2;

    let mut out = base.clone();
    for sy in 0..sh {
        let by = off_y + sy as i32;
        if by < 0 || by >= bh as i32 {
            continue;
        }
        for sx in 0..sw {
            let bx = off_x + sx as i32;
            if bx < 0 || bx >= bw as i32 {
                continue;
            }
            let bp = out.get_pixel(bx as u32, by as u32).0;
            let tp = scaled.get_pixel(sx, sy).0;
            let mut mixed = [0u8; 3];
            for ch in 0..3 {
                let v = bp[ch] as f32 * base_weight + tp[ch] as f32 * thermal_weight;
                mixed[ch] = v.round().clamp(0.0, 255.0) as u8;
            }
            out.put_pixel(bx as u32, by as u32, Rgb(mixed));
        }
    }
    out
}

/// Caches the thermal contribution for overlay modes so it refreshes only
/// once every `interval` render cycles. Thermal capture runs far slower
/// than the render loop; re-reading the slot every cycle buys nothing.
pub struct ThermalThrottle {
    interval: u32,
    countdown: u32,
    cached: Option<Arc<Frame>>,
}

impl ThermalThrottle {
    pub fn new(interval: u32) -> Self {
        Self {
            interval: interval.max(1),
            countdown: 0,
            cached: None,
        }
    }

    /// The thermal frame to composite this cycle. Pulls from `latest` when
    /// the interval has elapsed or nothing is cached yet; otherwise serves
    /// the cached one. A refresh that finds the slot empty drops the cache:
    /// stale imagery survives at most one interval past a sensor loss.
    pub fn current<F>(&mut self, latest: F) -> Option<Arc<Frame>>
    where
        F: FnOnce() -> Option<Arc<Frame>>,
    {
        if self.countdown == 0 || self.cached.is_none() {
            self.cached = latest();
            if self.cached.is_some() {
                self.countdown = self.interval;
            }
        }
        self.countdown = self.countdown.saturating_sub(1);
        self.cached.clone()
    }
}
