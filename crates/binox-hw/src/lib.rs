//! binox-hw — Hardware abstraction for the headset's sensors and I/O.
//!
//! Provides V4L2-based capture for the visible cameras and the thermal
//! sensor, framebuffer output, sysfs GPIO input devices and the
//! per-unit hardware profile.

pub mod camera;
pub mod controls;
pub mod display;
pub mod health;
pub mod profile;
pub mod thermal;

pub use camera::{CameraError, CameraStream, PixelFormat, VisibleCamera};
pub use controls::{ControlInput, ControlsError, GpioControls};
pub use display::{DisplayError, DisplaySink, Framebuffer, StereoWriter};
pub use health::PlatformHealth;
pub use profile::{HardwareProfile, ProfileError};
pub use thermal::{ThermalError, ThermalSensor, ThermalStream};
