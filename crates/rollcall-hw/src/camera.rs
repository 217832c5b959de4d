//! V4L2 camera capture via the `v4l` crate.

use crate::frame::{self, Frame, PixelFormat};
use std::ops::ControlFlow;
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

/// Requested capture resolution; drivers may negotiate something else.
const REQUEST_WIDTH: u32 = 640;
const REQUEST_HEIGHT: u32 = 480;
const STREAM_BUFFERS: u32 = 4;

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
    #[error("frame conversion failed: {0}")]
    Frame(#[from] frame::FrameError),
}

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub index: u32,
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// V4L2 camera device handle.
pub struct Camera {
    device: Device,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pub fourcc: FourCC,
    pixel_format: PixelFormat,
}

impl Camera {
    /// Device node for a camera index, e.g. `0` → `/dev/video0`.
    pub fn device_path(index: u32) -> String {
        format!("/dev/video{index}")
    }

    /// Open the camera at `/dev/video{index}`.
    pub fn open_index(index: u32) -> Result<Self, CameraError> {
        Self::open(&Self::device_path(index))
    }

    /// Open a V4L2 camera device by path (e.g., "/dev/video0").
    pub fn open(device_path: &str) -> Result<Self, CameraError> {
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

        // Ask for YUYV; accept GREY or Y16 if the driver insists.
        let mut fmt = device.format().map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
        })?;

        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = REQUEST_WIDTH;
        fmt.height = REQUEST_HEIGHT;

        let negotiated = device.set_format(&fmt).map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to set format: {e}"))
        })?;

        let fourcc = negotiated.fourcc;
        let pixel_format = pixel_format_for(fourcc).ok_or_else(|| {
            CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {fourcc:?} (need YUYV, GREY, or Y16)"
            ))
        })?;

        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?fourcc,
            "negotiated format"
        );

        Ok(Self {
            device,
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            fourcc,
            pixel_format,
        })
    }

    /// Stream frames into `on_frame` until it breaks.
    ///
    /// Per-buffer failures are handed to the callback rather than ending the
    /// stream; only failing to start streaming is returned here.
    pub fn stream<F>(&self, mut on_frame: F) -> Result<(), CameraError>
    where
        F: FnMut(Result<Frame, CameraError>) -> ControlFlow<()>,
    {
        let mut stream =
            MmapStream::with_buffers(&self.device, BufType::VideoCapture, STREAM_BUFFERS)
                .map_err(|e| {
                    CameraError::CaptureFailed(format!("failed to create mmap stream: {e}"))
                })?;

        loop {
            let result = match stream.next() {
                Ok((buf, meta)) => self.to_frame(buf, meta.sequence),
                Err(e) => Err(CameraError::CaptureFailed(format!(
                    "failed to dequeue buffer: {e}"
                ))),
            };
            if on_frame(result).is_break() {
                return Ok(());
            }
        }
    }

    fn to_frame(&self, buf: &[u8], sequence: u32) -> Result<Frame, CameraError> {
        Ok(Frame {
            data: frame::to_grayscale(self.pixel_format, buf, self.width, self.height)?,
            width: self.width,
            height: self.height,
            timestamp: std::time::Instant::now(),
            sequence,
        })
    }

    /// List available V4L2 video capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        let mut devices = Vec::new();

        for index in 0..16 {
            let path = Self::device_path(index);
            if !Path::new(&path).exists() {
                continue;
            }
            let Ok(dev) = Device::with_path(&path) else {
                continue;
            };
            let Ok(caps) = dev.query_caps() else {
                continue;
            };
            if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
                continue;
            }
            devices.push(DeviceInfo {
                index,
                path,
                name: caps.card.clone(),
                driver: caps.driver.clone(),
                bus: caps.bus.clone(),
            });
        }

        devices
    }
}

fn pixel_format_for(fourcc: FourCC) -> Option<PixelFormat> {
    if fourcc == FourCC::new(b"GREY") {
        Some(PixelFormat::Grey)
    } else if fourcc == FourCC::new(b"YUYV") {
        Some(PixelFormat::Yuyv)
    } else if fourcc == FourCC::new(b"Y16 ") || fourcc == FourCC::new(b"Y16\0") {
        Some(PixelFormat::Y16)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_path_for_index() {
        assert_eq!(Camera::device_path(0), "/dev/video0");
        assert_eq!(Camera::device_path(12), "/dev/video12");
    }

    #[test]
    fn test_pixel_format_mapping() {
        assert_eq!(pixel_format_for(FourCC::new(b"YUYV")), Some(PixelFormat::Yuyv));
        assert_eq!(pixel_format_for(FourCC::new(b"GREY")), Some(PixelFormat::Grey));
        assert_eq!(pixel_format_for(FourCC::new(b"Y16 ")), Some(PixelFormat::Y16));
        assert_eq!(pixel_format_for(FourCC::new(b"MJPG")), None);
    }

    #[test]
    fn test_open_missing_device() {
        let err = Camera::open("/dev/rollcall-no-such-camera").err().unwrap();
        assert!(matches!(err, CameraError::DeviceNotFound(_)));
    }
}
