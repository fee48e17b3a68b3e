//! binox-core — Stereo-optical pipeline algorithms.
//!
//! Pure image and state machinery: display modes, FOV-aware thermal
//! fusion, barrel distortion mapping, RGB565 packing and the status HUD.
//! No device I/O lives here; binox-hw adapts the hardware.

pub mod compose;
pub mod distort;
pub mod frame;
pub mod pack;
pub mod text;
pub mod thermal;

pub use compose::{Mode, SensorKind, SwitchMap};
pub use distort::DistortionMap;
pub use frame::Frame;
