//! Thermal sensor capture over V4L2.
//!
//! The MLX90640's I2C readout lives behind the kernel driver; this
//! side only sees a tiny Y16 greyscale video device and hands raw
//! 16-bit intensity grids to the processing chain.

use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

#[derive(Error, Debug)]
pub enum ThermalError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("read failed: {0}")]
    ReadFailed(String),
}

impl ThermalError {
    /// Whether the next read attempt may succeed without reopening.
    pub fn is_transient(&self) -> bool {
        matches!(self, ThermalError::ReadFailed(_))
    }
}

/// Thermal sensor device handle.
pub struct ThermalSensor {
    device: Device,
    pub cols: u32,
    pub rows: u32,
    pub device_path: String,
}

impl ThermalSensor {
    /// Open the thermal video device and pin the format to Y16 at the
    /// sensor's native grid size.
    pub fn open(device_path: &str, cols: u32, rows: u32) -> Result<Self, ThermalError> {
        if !Path::new(device_path).exists() {
            return Err(ThermalError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path)
            .map_err(|e| ThermalError::DeviceNotFound(format!("{device_path}: {e}")))?;

        let mut fmt = device.format().map_err(|e| {
            ThermalError::FormatNegotiationFailed(format!("failed to get format: {e}"))
        })?;
        fmt.fourcc = FourCC::new(b"Y16 ");
        fmt.width = cols;
        fmt.height = rows;

        let negotiated = device.set_format(&fmt).map_err(|e| {
            ThermalError::FormatNegotiationFailed(format!("failed to set format: {e}"))
        })?;

        if negotiated.fourcc != FourCC::new(b"Y16 ") && negotiated.fourcc != FourCC::new(b"Y16\0")
        {
            return Err(ThermalError::FormatNegotiationFailed(format!(
                "sensor offers {:?}, need Y16",
                negotiated.fourcc
            )));
        }

        tracing::info!(
            device = device_path,
            cols = negotiated.width,
            rows = negotiated.height,
            "opened thermal sensor"
        );

        Ok(Self {
            device,
            cols: negotiated.width,
            rows: negotiated.height,
            device_path: device_path.to_string(),
        })
    }

    /// Start streaming raw grids.
    pub fn start(&self) -> Result<ThermalStream<'_>, ThermalError> {
        let stream = MmapStream::with_buffers(&self.device, BufType::VideoCapture, 2)
            .map_err(|e| ThermalError::ReadFailed(format!("failed to create mmap stream: {e}")))?;
        Ok(ThermalStream {
            stream,
            cells: (self.cols * self.rows) as usize,
        })
    }
}

/// Live thermal stream tied to an open sensor.
pub struct ThermalStream<'a> {
    stream: MmapStream<'a>,
    cells: usize,
}

impl ThermalStream<'_> {
    /// Read one raw grid, 16-bit little-endian per cell, row-major.
    pub fn read_raw(&mut self) -> Result<Vec<u16>, ThermalError> {
        let (buf, _meta) = self
            .stream
            .next()
            .map_err(|e| ThermalError::ReadFailed(format!("failed to dequeue buffer: {e}")))?;

        let expected_bytes = self.cells * 2;
        if buf.len() < expected_bytes {
            return Err(ThermalError::ReadFailed(format!(
                "Y16 buffer too short: expected {expected_bytes}, got {}",
                buf.len()
            )));
        }

        let mut cells = Vec::with_capacity(self.cells);
        for idx in 0..self.cells {
            let low = buf[idx * 2] as u16;
            let high = buf[idx * 2 + 1] as u16;
            cells.push((high << 8) | low);
        }
        Ok(cells)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ThermalError::ReadFailed("timeout".into()).is_transient());
        assert!(!ThermalError::DeviceNotFound("/dev/video2".into()).is_transient());
        assert!(
            !ThermalError::FormatNegotiationFailed("no Y16".into()).is_transient(),
            "a format mismatch will not fix itself between reads"
        );
    }
}
