//! The render loop: inputs, composition, scanout.
//!
//! One cycle = poll inputs, let the mode controller react, compose the
//! frame for the active mode, draw the HUD, present. Missing imagery
//! skips the present (the panel keeps the previous frame); a dead
//! display ends the daemon.

use crate::capture::{self, FrameSlots, V4lBackend};
use crate::config::{Config, Tuning};
use crate::mode::ModeController;
use binox_core::compose::{self, Mode, ThermalThrottle};
use binox_core::text::StatusHud;
use binox_core::thermal::ThermalProcessor;
use binox_hw::controls::ControlInput;
use binox_hw::display::{Framebuffer, StereoWriter};
use binox_hw::health::PlatformHealth;
use binox_hw::profile::HardwareProfile;
use binox_hw::GpioControls;
use image::{Rgb, RgbImage};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Health probe cadence in render cycles (~10 s at the default period).
const HEALTH_EVERY_CYCLES: u64 = 1000;

pub fn run(config: Config) -> anyhow::Result<()> {
    let profile = HardwareProfile::load(config.profile_path.as_deref())?;
    let tuning = &config.tuning;

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = Arc::clone(&shutdown);
        ctrlc::set_handler(move || {
            shutdown.store(true, Ordering::Relaxed);
        })?;
    }

    let fb = Framebuffer::open(&config.fb_device)?;
    let mut writer = StereoWriter::new(
        fb,
        tuning.display_width,
        tuning.display_height,
        tuning.border_px,
        tuning.distort_k1,
        tuning.distort_k2,
    );

    let slots = FrameSlots::default();
    let eye_width = tuning.display_width / 2;

    let processor = ThermalProcessor::new(
        profile.thermal.cols,
        profile.thermal.rows,
        eye_width,
        tuning.display_height,
        tuning.smooth_kernel,
        tuning.smooth_sigma,
    );
    let thermal_worker = capture::spawn_thermal(
        &profile,
        processor,
        slots.thermal.clone(),
        Arc::clone(&shutdown),
        tuning.failure_limit,
        tuning.revive_backoff,
    )?;

    let controls = GpioControls::open(&profile)?;
    let scales = OverlayScales::from_profile(&profile);

    let backend = V4lBackend::new(profile, eye_width, tuning.display_height, tuning.failure_limit);
    let mut controller = ModeController::start(backend, slots.clone(), tuning)?;

    let mut hud = StatusHud::new(tuning.hud_ttl_cycles);
    let mut throttle = ThermalThrottle::new(tuning.thermal_refresh_cycles);
    let mut button_was_pressed = false;
    let mut cycle: u64 = 0;

    tracing::info!(period_ms = tuning.period.as_millis() as u64, "render loop started");

    while !shutdown.load(Ordering::Relaxed) {
        let cycle_start = Instant::now();

        if let Some(position) = controls.switch_position() {
            if controller.handle_switch(position).is_some() {
                hud.show_switch(position);
            }
        }

        if let Some(zoom) = controller.handle_zoom(controls.encoder_delta()) {
            hud.show_zoom(zoom);
        }

        let pressed = controls.button_pressed();
        if pressed && !button_was_pressed {
            controller.reset_zoom();
            hud.show_zoom_reset();
        }
        button_was_pressed = pressed;

        controller.maintain();

        if let Some(mut frame) =
            compose_frame(controller.mode(), &slots, &mut throttle, &scales, tuning)
        {
            hud.render(&mut frame);
            writer.present(&frame)?;
        }
        hud.tick();

        cycle += 1;
        if cycle % HEALTH_EVERY_CYCLES == 0 {
            if let Some(health) = PlatformHealth::probe() {
                if health.degraded() {
                    tracing::warn!(
                        flags = format_args!("{:#x}", health.flags),
                        temp_c = ?health.soc_temp_c,
                        "platform degraded"
                    );
                }
            }
        }

        let elapsed = cycle_start.elapsed();
        if elapsed < tuning.period {
            std::thread::sleep(tuning.period - elapsed);
        }
    }

    tracing::info!("shutting down");
    controller.shutdown();
    let _ = thermal_worker.join();

    let black = RgbImage::from_pixel(eye_width, tuning.display_height, Rgb([0, 0, 0]));
    if let Err(e) = writer.present(&black) {
        tracing::warn!(error = %e, "failed to blank display");
    }
    Ok(())
}

/// Thermal footprint scale against each visible base's field of view.
struct OverlayScales {
    standard: f32,
    noir: f32,
}

impl OverlayScales {
    fn from_profile(profile: &HardwareProfile) -> Self {
        Self {
            standard: compose::fov_scale(profile.thermal.fov_deg, profile.visible_a.fov_deg),
            noir: compose::fov_scale(profile.thermal.fov_deg, profile.visible_b.fov_deg),
        }
    }
}

/// Build the frame for the current mode, or `None` when imagery the
/// mode requires has not arrived yet. Overlay needs both the visible
/// base and a thermal frame; either one missing skips the cycle.
fn compose_frame(
    mode: Mode,
    slots: &FrameSlots,
    throttle: &mut ThermalThrottle,
    scales: &OverlayScales,
    tuning: &Tuning,
) -> Option<RgbImage> {
    match mode {
        Mode::VisibleA => slots.visible_a.latest().map(|f| f.pixels.clone()),
        Mode::VisibleB => slots.visible_b.latest().map(|f| f.pixels.clone()),
        Mode::Thermal => slots.thermal.latest().map(|f| f.pixels.clone()),
        Mode::OverlayA | Mode::OverlayB => {
            let (base_slot, scale) = if mode == Mode::OverlayA {
                (&slots.visible_a, scales.standard)
            } else {
                (&slots.visible_b, scales.noir)
            };
            let base = base_slot.latest()?;
            let thermal = throttle.current(|| slots.thermal.latest())?;
            Some(compose::overlay_thermal(
                &base.pixels,
                &thermal.pixels,
                scale,
                tuning.base_weight,
                tuning.thermal_weight,
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use binox_core::Frame;

    fn slots_with(visible: Option<u8>, thermal: Option<u8>) -> FrameSlots {
        let slots = FrameSlots::default();
        if let Some(level) = visible {
            let img = RgbImage::from_pixel(40, 48, Rgb([level, level, level]));
            slots.visible_a.publish(Frame::new(img, 1));
        }
        if let Some(level) = thermal {
            let img = RgbImage::from_pixel(40, 48, Rgb([level, level, level]));
            slots.thermal.publish(Frame::new(img, 1));
        }
        slots
    }

    fn unit_scales() -> OverlayScales {
        OverlayScales {
            standard: 1.0,
            noir: 1.0,
        }
    }

    #[test]
    fn test_no_frame_skips_cycle() {
        let slots = slots_with(None, None);
        let mut throttle = ThermalThrottle::new(1);
        let out = compose_frame(
            Mode::VisibleA,
            &slots,
            &mut throttle,
            &unit_scales(),
            &Tuning::default(),
        );
        assert!(out.is_none(), "nothing to show before the first capture");
    }

    #[test]
    fn test_visible_mode_passes_frame_through() {
        let slots = slots_with(Some(120), None);
        let mut throttle = ThermalThrottle::new(1);
        let out = compose_frame(
            Mode::VisibleA,
            &slots,
            &mut throttle,
            &unit_scales(),
            &Tuning::default(),
        )
        .unwrap();
        assert_eq!(out.get_pixel(20, 20).0, [120, 120, 120]);
    }

    #[test]
    fn test_overlay_without_thermal_skips_cycle() {
        let slots = slots_with(Some(120), None);
        let mut throttle = ThermalThrottle::new(1);
        let out = compose_frame(
            Mode::OverlayA,
            &slots,
            &mut throttle,
            &unit_scales(),
            &Tuning::default(),
        );
        assert!(
            out.is_none(),
            "overlay needs both sensors; a bare base frame must not present"
        );
    }

    #[test]
    fn test_overlay_blends_when_thermal_present() {
        let slots = slots_with(Some(100), Some(200));
        let mut throttle = ThermalThrottle::new(1);
        let out = compose_frame(
            Mode::OverlayA,
            &slots,
            &mut throttle,
            &unit_scales(),
            &Tuning::default(),
        )
        .unwrap();
        // 100*0.7 + 200*0.3 = 130 at the covered center.
        assert_eq!(out.get_pixel(20, 20).0, [130, 130, 130]);
    }

    #[test]
    fn test_thermal_mode_without_visible_camera() {
        let slots = slots_with(None, Some(90));
        let mut throttle = ThermalThrottle::new(1);
        let out = compose_frame(
            Mode::Thermal,
            &slots,
            &mut throttle,
            &unit_scales(),
            &Tuning::default(),
        )
        .unwrap();
        assert_eq!(out.get_pixel(20, 20).0, [90, 90, 90]);
    }

    #[test]
    fn test_thermal_mode_tracks_slot_directly() {
        let slots = slots_with(None, Some(90));
        // An interval far longer than the test: a throttled path would
        // pin the first frame for all of it.
        let mut throttle = ThermalThrottle::new(50);
        let first = compose_frame(
            Mode::Thermal,
            &slots,
            &mut throttle,
            &unit_scales(),
            &Tuning::default(),
        )
        .unwrap();
        assert_eq!(first.get_pixel(20, 20).0, [90, 90, 90]);

        let img = RgbImage::from_pixel(40, 48, Rgb([30, 30, 30]));
        slots.thermal.publish(Frame::new(img, 2));
        let second = compose_frame(
            Mode::Thermal,
            &slots,
            &mut throttle,
            &unit_scales(),
            &Tuning::default(),
        )
        .unwrap();
        assert_eq!(
            second.get_pixel(20, 20).0,
            [30, 30, 30],
            "pure thermal must show the newest capture, not a paced cache"
        );
    }

    #[test]
    fn test_overlay_b_scales_by_noir_fov() {
        let slots = FrameSlots::default();
        let base = RgbImage::from_pixel(40, 48, Rgb([100, 100, 100]));
        slots.visible_b.publish(Frame::new(base, 1));
        let thermal = RgbImage::from_pixel(40, 48, Rgb([200, 200, 200]));
        slots.thermal.publish(Frame::new(thermal, 1));

        let mut throttle = ThermalThrottle::new(1);
        let scales = OverlayScales {
            standard: 1.0,
            noir: 0.5,
        };
        let out = compose_frame(
            Mode::OverlayB,
            &slots,
            &mut throttle,
            &scales,
            &Tuning::default(),
        )
        .unwrap();

        // Noir at 0.5 puts a 20x24 footprint at offset (10, 12).
        assert_eq!(
            out.get_pixel(5, 5).0,
            [100, 100, 100],
            "corners sit outside the noir-scaled footprint"
        );
        assert_eq!(out.get_pixel(20, 20).0, [130, 130, 130]);
    }
}
