use binox_core::compose::SwitchMap;
use std::path::PathBuf;
use std::time::Duration;

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Framebuffer device path (default: /dev/fb0).
    pub fb_device: String,
    /// Optional hardware profile override file.
    pub profile_path: Option<PathBuf>,
    /// Render pipeline tuning.
    pub tuning: Tuning,
}

impl Config {
    /// Load configuration from `BINOX_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self {
            fb_device: std::env::var("BINOX_FB_DEVICE")
                .unwrap_or_else(|_| "/dev/fb0".to_string()),
            profile_path: std::env::var("BINOX_PROFILE").ok().map(PathBuf::from),
            tuning: Tuning::from_env(),
        }
    }
}

/// Render pipeline tuning. Every field has a default suited to the mk1
/// headset; the env overrides exist for bench experiments.
#[derive(Debug, Clone)]
pub struct Tuning {
    /// Full panel size in pixels (both eyes side by side).
    pub display_width: u32,
    pub display_height: u32,
    /// Black mask width around each eye image.
    pub border_px: u32,
    /// Lens pre-distortion coefficients.
    pub distort_k1: f32,
    pub distort_k2: f32,
    /// Zoom factor change per encoder detent.
    pub zoom_step: f32,
    pub zoom_min: f32,
    pub zoom_max: f32,
    /// Render cycles between thermal refreshes in composite modes.
    pub thermal_refresh_cycles: u32,
    /// Overlay blend weights (visible, thermal).
    pub base_weight: f32,
    pub thermal_weight: f32,
    /// Thermal smoothing kernel size (0 or 1 disables) and sigma.
    pub smooth_kernel: u32,
    pub smooth_sigma: f32,
    /// HUD time-to-live in render cycles.
    pub hud_ttl_cycles: u32,
    /// Render loop period.
    pub period: Duration,
    /// Attempts when opening a sensor during a mode change.
    pub open_retries: u32,
    pub open_retry_delay: Duration,
    /// Consecutive capture failures before a sensor is declared dead.
    pub failure_limit: u32,
    /// Wait between revival attempts for a dead sensor.
    pub revive_backoff: Duration,
    /// Switch position to mode assignments.
    pub switch_map: SwitchMap,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            display_width: 800,
            display_height: 480,
            border_px: 10,
            distort_k1: -0.25,
            distort_k2: 0.0,
            zoom_step: 0.1,
            zoom_min: 1.0,
            zoom_max: 8.0,
            thermal_refresh_cycles: 25,
            base_weight: 0.7,
            thermal_weight: 0.3,
            smooth_kernel: 5,
            smooth_sigma: 1.0,
            hud_ttl_cycles: 100,
            period: Duration::from_millis(10),
            open_retries: 3,
            open_retry_delay: Duration::from_millis(100),
            failure_limit: 30,
            revive_backoff: Duration::from_secs(1),
            switch_map: SwitchMap::default(),
        }
    }
}

impl Tuning {
    fn from_env() -> Self {
        let d = Tuning::default();
        Self {
            display_width: env_u32("BINOX_DISPLAY_WIDTH", d.display_width),
            display_height: env_u32("BINOX_DISPLAY_HEIGHT", d.display_height),
            distort_k1: env_f32("BINOX_DISTORT_K1", d.distort_k1),
            distort_k2: env_f32("BINOX_DISTORT_K2", d.distort_k2),
            zoom_step: env_f32("BINOX_ZOOM_STEP", d.zoom_step),
            thermal_refresh_cycles: env_u32(
                "BINOX_THERMAL_REFRESH_CYCLES",
                d.thermal_refresh_cycles,
            ),
            hud_ttl_cycles: env_u32("BINOX_HUD_TTL_CYCLES", d.hud_ttl_cycles),
            period: Duration::from_millis(env_u64("BINOX_LOOP_PERIOD_MS", 10)),
            ..d
        }
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_blend_weights_are_convex() {
        let t = Tuning::default();
        assert!((t.base_weight + t.thermal_weight - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_default_zoom_bounds_ordered() {
        let t = Tuning::default();
        assert!(t.zoom_min < t.zoom_max);
        assert!(t.zoom_step > 0.0);
    }
}
