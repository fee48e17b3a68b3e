//! V4L2 visible-camera capture via the `v4l` crate.
//!
//! Covers the two front-facing camera modules: format negotiation at
//! open, a persistent memory-mapped capture stream, and centered-crop
//! digital zoom through the V4L2 selection API.

use binox_core::frame::{self, Frame};
use std::os::unix::io::AsRawFd;
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

/// Zoom factor bounds enforced at the crop boundary.
pub const ZOOM_MIN: f32 = 1.0;
pub const ZOOM_MAX: f32 = 8.0;

/// `VIDIOC_S_SELECTION` = `_IOWR('V', 95, struct v4l2_selection)`
/// where sizeof(struct v4l2_selection) = 64 bytes (verified by assert below).
const VIDIOC_S_SELECTION: libc::c_ulong = 0xC040_565F;

/// Selection applies to the capture stream.
const V4L2_BUF_TYPE_VIDEO_CAPTURE: u32 = 1;
/// Target: the active cropping rectangle.
const V4L2_SEL_TGT_CROP: u32 = 0;

/// Mirror of `struct v4l2_rect` from `<linux/videodev2.h>`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct V4l2Rect {
    left: i32,
    top: i32,
    width: u32,
    height: u32,
}

/// Mirror of `struct v4l2_selection` from `<linux/videodev2.h>`.
///
/// Layout: type:u32 target:u32 flags:u32 r:v4l2_rect reserved:[u32;9]
/// Total: 4+4+4+16+36 = 64 bytes — verified by compile-time assert.
#[repr(C)]
struct V4l2Selection {
    typ: u32,
    target: u32,
    flags: u32,
    r: V4l2Rect,
    reserved: [u32; 9],
}

const _SIZE_ASSERT: () = assert!(
    std::mem::size_of::<V4l2Selection>() == 64,
    "V4l2Selection must be 64 bytes to match the kernel ABI"
);

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
    #[error("crop ioctl failed: {0}")]
    Crop(std::io::Error),
}

impl CameraError {
    /// Whether the next capture attempt may succeed without reopening
    /// the device.
    pub fn is_transient(&self) -> bool {
        matches!(self, CameraError::CaptureFailed(_))
    }
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Packed 24-bit RGB (3 bytes/pixel, no conversion needed).
    Rgb24,
    /// YUYV 4:2:2 packed (2 bytes/pixel, converted via BT.601).
    Yuyv,
}

/// V4L2 visible camera device handle.
pub struct VisibleCamera {
    device: Device,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pub fourcc: FourCC,
    /// Negotiated pixel format.
    pixel_format: PixelFormat,
    /// Native sensor area: the maximum crop window for digital zoom.
    sensor_width: u32,
    sensor_height: u32,
}

impl VisibleCamera {
    /// Open a V4L2 camera by path and negotiate a color format at the
    /// requested stream size. RGB3 is preferred; if the driver refuses
    /// it, YUYV is accepted and converted per frame.
    pub fn open(
        device_path: &str,
        width: u32,
        height: u32,
        sensor_width: u32,
        sensor_height: u32,
    ) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| {
            if e.to_string().contains("busy") || e.to_string().contains("EBUSY") {
                CameraError::DeviceBusy
            } else {
                CameraError::DeviceNotFound(format!("{device_path}: {e}"))
            }
        })?;

        // Query capabilities
        let caps = device.query_caps().map_err(|e| {
            CameraError::CaptureFailed(format!("failed to query capabilities: {e}"))
        })?;

        tracing::info!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            "opened camera"
        );

        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::StreamingNotSupported);
        }

        let mut fmt = device.format().map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
        })?;
        fmt.width = width;
        fmt.height = height;

        // S_FMT adjusts rather than fails: the driver answers with what
        // it will actually deliver, so check the echoed fourcc.
        let mut negotiated = None;
        for fourcc in [FourCC::new(b"RGB3"), FourCC::new(b"YUYV")] {
            fmt.fourcc = fourcc;
            let answer = device.set_format(&fmt).map_err(|e| {
                CameraError::FormatNegotiationFailed(format!("failed to set format: {e}"))
            })?;
            if answer.fourcc == fourcc {
                negotiated = Some(answer);
                break;
            }
        }
        let Some(negotiated) = negotiated else {
            return Err(CameraError::FormatNegotiationFailed(format!(
                "{device_path}: driver accepts neither RGB3 nor YUYV"
            )));
        };

        let pixel_format = if negotiated.fourcc == FourCC::new(b"RGB3") {
            PixelFormat::Rgb24
        } else {
            PixelFormat::Yuyv
        };

        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?negotiated.fourcc,
            "negotiated format"
        );

        Ok(Self {
            device,
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            fourcc: negotiated.fourcc,
            pixel_format,
            sensor_width,
            sensor_height,
        })
    }

    /// Start streaming. The returned stream borrows the camera; zoom
    /// changes stay possible while it is live because the crop ioctl
    /// goes through a separate fd.
    pub fn start(&self) -> Result<CameraStream<'_>, CameraError> {
        let stream = MmapStream::with_buffers(&self.device, BufType::VideoCapture, 4)
            .map_err(|e| {
                CameraError::CaptureFailed(format!("failed to create mmap stream: {e}"))
            })?;
        Ok(CameraStream {
            stream,
            camera: self,
        })
    }

    /// Apply a centered digital crop of the native sensor area. The
    /// factor is clamped to [`ZOOM_MIN`], [`ZOOM_MAX`]; 1.0 restores
    /// the full sensor window. Returns the factor actually applied.
    pub fn set_zoom(&self, factor: f32) -> Result<f32, CameraError> {
        let factor = factor.clamp(ZOOM_MIN, ZOOM_MAX);
        let rect = crop_window(self.sensor_width, self.sensor_height, factor);

        let mut selection = V4l2Selection {
            typ: V4L2_BUF_TYPE_VIDEO_CAPTURE,
            target: V4L2_SEL_TGT_CROP,
            flags: 0,
            r: rect,
            reserved: [0; 9],
        };

        // Open the device with read+write access — needed for the ioctl.
        // We open a second fd here rather than requiring AsRawFd on the
        // streaming handle.
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.device_path)
            .map_err(CameraError::Crop)?;

        // SAFETY:
        // - fd is valid for the lifetime of `file`
        // - `selection` is correctly sized and repr(C), matching the kernel ABI
        let ret = unsafe {
            libc::ioctl(
                file.as_raw_fd(),
                VIDIOC_S_SELECTION,
                &mut selection as *mut V4l2Selection,
            )
        };

        if ret < 0 {
            return Err(CameraError::Crop(std::io::Error::last_os_error()));
        }

        tracing::debug!(
            device = %self.device_path,
            zoom = factor,
            crop_width = rect.width,
            crop_height = rect.height,
            "applied sensor crop"
        );
        Ok(factor)
    }
}

/// Centered crop window of the native sensor area for a zoom factor.
fn crop_window(sensor_width: u32, sensor_height: u32, factor: f32) -> V4l2Rect {
    let factor = factor.clamp(ZOOM_MIN, ZOOM_MAX);
    let width = (sensor_width as f32 / factor).round() as u32;
    let height = (sensor_height as f32 / factor).round() as u32;
    V4l2Rect {
        left: ((sensor_width - width) / 2) as i32,
        top: ((sensor_height - height) / 2) as i32,
        width,
        height,
    }
}

/// Live capture stream tied to an open camera.
pub struct CameraStream<'a> {
    stream: MmapStream<'a>,
    camera: &'a VisibleCamera,
}

impl CameraStream<'_> {
    /// Dequeue the next buffer and decode it into an RGB frame.
    pub fn read_frame(&mut self) -> Result<Frame, CameraError> {
        let (buf, meta) = self
            .stream
            .next()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}")))?;

        let pixels = match self.camera.pixel_format {
            PixelFormat::Rgb24 => frame::rgb24_to_image(buf, self.camera.width, self.camera.height),
            PixelFormat::Yuyv => frame::yuyv_to_rgb(buf, self.camera.width, self.camera.height),
        }
        .map_err(|e| CameraError::CaptureFailed(format!("decode failed: {e}")))?;

        Ok(Frame::new(pixels, meta.sequence))
    }
}
