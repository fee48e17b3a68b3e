//! Hardware profile database.
//!
//! Describes one headset build: sensor device paths, native sensor
//! geometry, per-sensor field of view and GPIO pin assignments. The
//! mk1 profile is embedded at compile time from
//! `contrib/hw/mk1-headset.toml`; a different build can be described
//! by an override file loaded at startup.

use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

/// Compile-time embedded profile for the mk1 headset.
const PROFILE_MK1: &str = include_str!("../../../contrib/hw/mk1-headset.toml");

/// Top-level profile file structure.
#[derive(Debug, Clone, Deserialize)]
pub struct HardwareProfile {
    pub visible_a: VisibleSensorInfo,
    pub visible_b: VisibleSensorInfo,
    pub thermal: ThermalSensorInfo,
    pub switch: SwitchInfo,
    pub encoder: EncoderInfo,
}

/// Visible camera fields from the `[visible_a]` / `[visible_b]` sections.
#[derive(Debug, Clone, Deserialize)]
pub struct VisibleSensorInfo {
    pub device: String,
    /// Native sensor width in pixels: the maximum crop window for
    /// digital zoom.
    pub sensor_width: u32,
    pub sensor_height: u32,
    /// Horizontal field of view in degrees.
    pub fov_deg: f32,
}

/// Thermal sensor fields from the `[thermal]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ThermalSensorInfo {
    pub device: String,
    pub cols: u32,
    pub rows: u32,
    pub fov_deg: f32,
}

/// Mode switch wiring from the `[switch]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct SwitchInfo {
    /// One GPIO per detent, active low. Index 0 is switch position 1.
    pub pins: Vec<u32>,
}

/// Rotary encoder wiring from the `[encoder]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct EncoderInfo {
    pub clk_pin: u32,
    pub dt_pin: u32,
    pub button_pin: u32,
}

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("failed to read profile {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse profile {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
}

impl HardwareProfile {
    /// Load the hardware profile. With no override path the embedded
    /// mk1 profile is used.
    pub fn load(override_path: Option<&Path>) -> Result<Self, ProfileError> {
        match override_path {
            Some(path) => {
                let text =
                    std::fs::read_to_string(path).map_err(|source| ProfileError::Read {
                        path: path.display().to_string(),
                        source,
                    })?;
                let profile =
                    toml::from_str::<HardwareProfile>(&text).map_err(|source| {
                        ProfileError::Parse {
                            path: path.display().to_string(),
                            source,
                        }
                    })?;
                tracing::info!(path = %path.display(), "loaded hardware profile");
                Ok(profile)
            }
            None => toml::from_str(PROFILE_MK1).map_err(|source| ProfileError::Parse {
                path: "mk1-headset (embedded)".to_string(),
                source,
            }),
        }
    }
}
