//! GPIO input devices via sysfs: the 8-way mode switch and the zoom
//! rotary encoder with its push button.
//!
//! The switch is polled directly by the render loop. The encoder is
//! sampled by a 1 kHz background thread so detents are not lost
//! between render cycles.

use crate::profile::HardwareProfile;
use std::fs::{self, File};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use thiserror::Error;

const GPIO_ROOT: &str = "/sys/class/gpio";

/// Sampling interval for the encoder decoder thread.
const SAMPLE_INTERVAL: Duration = Duration::from_millis(1);

/// Quadrature transition table indexed by `(prev << 2) | curr` where
/// each state is `(clk << 1) | dt`. Invalid transitions (both lines
/// changed at once) decode as zero.
const QUAD_STEPS: [i8; 16] = [0, -1, 1, 0, 1, 0, 0, -1, -1, 0, 0, 1, 0, 1, -1, 0];

/// Quarter-steps per mechanical detent.
const QUARTERS_PER_DETENT: i32 = 4;

#[derive(Error, Debug)]
pub enum ControlsError {
    #[error("failed to export gpio {pin}: {source}")]
    Export { pin: u32, source: io::Error },
    #[error("failed to configure gpio {pin}: {source}")]
    Configure { pin: u32, source: io::Error },
    #[error("failed to read gpio {pin}: {source}")]
    Read { pin: u32, source: io::Error },
}

/// Input state the render loop polls once per cycle.
pub trait ControlInput {
    /// Current switch detent in 1..=8, or `None` between detents.
    fn switch_position(&self) -> Option<u8>;
    /// Signed whole detents turned since the previous call.
    fn encoder_delta(&self) -> i32;
    /// Encoder push button level, true while held.
    fn button_pressed(&self) -> bool;
}

/// One exported sysfs GPIO configured as an input.
struct GpioPin {
    pin: u32,
    value: File,
}

impl GpioPin {
    fn open(pin: u32) -> Result<Self, ControlsError> {
        Self::open_under(Path::new(GPIO_ROOT), pin)
    }

    /// `root` is split out so tests can point at a scratch directory.
    fn open_under(root: &Path, pin: u32) -> Result<Self, ControlsError> {
        let dir = root.join(format!("gpio{pin}"));
        if !dir.exists() {
            // Pins already exported by an earlier run show up as an
            // existing directory and are reused as-is.
            fs::write(root.join("export"), pin.to_string())
                .map_err(|source| ControlsError::Export { pin, source })?;
        }
        fs::write(dir.join("direction"), "in")
            .map_err(|source| ControlsError::Configure { pin, source })?;
        let value = File::open(dir.join("value"))
            .map_err(|source| ControlsError::Configure { pin, source })?;
        Ok(Self { pin, value })
    }

    /// Active-low read: the pad pulls up, closing a contact drives low.
    fn is_active(&self) -> Result<bool, ControlsError> {
        let mut buf = [0u8; 1];
        self.value
            .read_at(&mut buf, 0)
            .map_err(|source| ControlsError::Read { pin: self.pin, source })?;
        Ok(buf[0] == b'0')
    }
}

/// 8-way rotary mode switch: one GPIO per detent, first active pin
/// wins.
pub struct SwitchPad {
    pins: Vec<GpioPin>,
}

impl SwitchPad {
    pub fn open(pin_numbers: &[u32]) -> Result<Self, ControlsError> {
        let pins = pin_numbers
            .iter()
            .map(|&p| GpioPin::open(p))
            .collect::<Result<_, _>>()?;
        Ok(Self { pins })
    }

    /// Position in 1..=N, or `None` when no contact reads low.
    pub fn position(&self) -> Option<u8> {
        for (i, pin) in self.pins.iter().enumerate() {
            // Read errors count as inactive.
            if pin.is_active().unwrap_or(false) {
                return Some(i as u8 + 1);
            }
        }
        None
    }
}

/// Rotary encoder with push button, decoded by a background sampling
/// thread. Quarter-steps accumulate atomically; [`RotaryEncoder::take_detents`]
/// hands out whole detents and carries the remainder.
pub struct RotaryEncoder {
    quarters: Arc<AtomicI32>,
    pressed: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
}

impl RotaryEncoder {
    pub fn spawn(clk_pin: u32, dt_pin: u32, button_pin: u32) -> Result<Self, ControlsError> {
        let clk = GpioPin::open(clk_pin)?;
        let dt = GpioPin::open(dt_pin)?;
        let button = GpioPin::open(button_pin)?;

        let quarters = Arc::new(AtomicI32::new(0));
        let pressed = Arc::new(AtomicBool::new(false));
        let shutdown = Arc::new(AtomicBool::new(false));

        {
            let quarters = Arc::clone(&quarters);
            let pressed = Arc::clone(&pressed);
            let shutdown = Arc::clone(&shutdown);
            thread::Builder::new()
                .name("binox-encoder".into())
                .spawn(move || {
                    let mut prev = encoder_state(&clk, &dt);
                    while !shutdown.load(Ordering::Relaxed) {
                        let curr = encoder_state(&clk, &dt);
                        let step = QUAD_STEPS[((prev << 2) | curr) as usize];
                        if step != 0 {
                            quarters.fetch_add(step as i32, Ordering::Relaxed);
                        }
                        prev = curr;
                        pressed.store(button.is_active().unwrap_or(false), Ordering::Relaxed);
                        thread::sleep(SAMPLE_INTERVAL);
                    }
                })
                .map_err(|source| ControlsError::Configure {
                    pin: clk_pin,
                    source,
                })?;
        }

        Ok(Self {
            quarters,
            pressed,
            shutdown,
        })
    }

    /// Whole detents accumulated since the last call; the sub-detent
    /// remainder carries over so slow turns are not dropped.
    pub fn take_detents(&self) -> i32 {
        loop {
            let q = self.quarters.load(Ordering::Relaxed);
            let detents = q / QUARTERS_PER_DETENT;
            if detents == 0 {
                return 0;
            }
            if self
                .quarters
                .compare_exchange(
                    q,
                    q - detents * QUARTERS_PER_DETENT,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                )
                .is_ok()
            {
                return detents;
            }
        }
    }

    pub fn is_pressed(&self) -> bool {
        self.pressed.load(Ordering::Relaxed)
    }
}

impl Drop for RotaryEncoder {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }
}

fn encoder_state(clk: &GpioPin, dt: &GpioPin) -> u8 {
    let a = clk.is_active().unwrap_or(false) as u8;
    let b = dt.is_active().unwrap_or(false) as u8;
    (a << 1) | b
}

/// Physical input devices wired per the hardware profile.
pub struct GpioControls {
    switch: SwitchPad,
    encoder: RotaryEncoder,
}

impl GpioControls {
    pub fn open(profile: &HardwareProfile) -> Result<Self, ControlsError> {
        let switch = SwitchPad::open(&profile.switch.pins)?;
        let encoder = RotaryEncoder::spawn(
            profile.encoder.clk_pin,
            profile.encoder.dt_pin,
            profile.encoder.button_pin,
        )?;
        tracing::info!(switch_pins = ?profile.switch.pins, "GPIO controls ready");
        Ok(Self { switch, encoder })
    }
}

impl ControlInput for GpioControls {
    fn switch_position(&self) -> Option<u8> {
        self.switch.position()
    }

    fn encoder_delta(&self) -> i32 {
        self.encoder.take_detents()
    }

    fn button_pressed(&self) -> bool {
        self.encoder.is_pressed()
    }
}
