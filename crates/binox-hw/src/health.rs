//! Platform health probe: firmware throttle flags and SoC temperature.
//!
//! On the CM4 the firmware exposes a `get_throttled` bitmask through
//! sysfs. The render loop samples it periodically and logs warnings so
//! brownouts show up in the journal instead of as mystery frame drops.

use std::path::Path;

/// Firmware throttle bits, per the SoC vendor documentation.
const UNDERVOLTAGE: u32 = 0x1;
const FREQ_CAPPED: u32 = 0x2;
const THROTTLED: u32 = 0x4;

const THROTTLED_PATH: &str = "/sys/devices/platform/soc/soc:firmware/get_throttled";
const TEMP_PATH: &str = "/sys/class/thermal/thermal_zone0/temp";

/// Snapshot of platform power and thermal state.
#[derive(Debug, Clone, Copy)]
pub struct PlatformHealth {
    /// Raw `get_throttled` bitmask, including sticky history bits.
    pub flags: u32,
    /// SoC temperature in degrees Celsius, if the zone exists.
    pub soc_temp_c: Option<f32>,
}

impl PlatformHealth {
    /// Read the current state. Returns `None` on hosts without the
    /// firmware sysfs node (development machines).
    pub fn probe() -> Option<Self> {
        Self::probe_paths(Path::new(THROTTLED_PATH), Path::new(TEMP_PATH))
    }

    fn probe_paths(throttled: &Path, temp: &Path) -> Option<Self> {
        let raw = std::fs::read_to_string(throttled).ok()?;
        let digits = raw.trim().trim_start_matches("0x");
        let flags = u32::from_str_radix(digits, 16).ok()?;
        let soc_temp_c = std::fs::read_to_string(temp)
            .ok()
            .and_then(|t| t.trim().parse::<f32>().ok())
            .map(|millis| millis / 1000.0);
        Some(Self { flags, soc_temp_c })
    }

    /// Supply voltage is currently below threshold.
    pub fn undervoltage(&self) -> bool {
        self.flags & UNDERVOLTAGE != 0
    }

    /// ARM frequency is currently capped.
    pub fn freq_capped(&self) -> bool {
        self.flags & FREQ_CAPPED != 0
    }

    /// The SoC is actively throttling.
    pub fn throttled(&self) -> bool {
        self.flags & THROTTLED != 0
    }

    /// Any of the live (non-sticky) problem bits.
    pub fn degraded(&self) -> bool {
        self.flags & (UNDERVOLTAGE | FREQ_CAPPED | THROTTLED) != 0
    }
}
