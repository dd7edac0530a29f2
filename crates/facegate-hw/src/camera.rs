//! V4L2 camera capture via the `v4l` crate.

use crate::frame::{self, Frame};
use crate::source::VideoSource;
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

const CAPTURE_WIDTH: u32 = 640;
const CAPTURE_HEIGHT: u32 = 480;
const CAPTURE_BUFFERS: u32 = 4;
const MAX_PROBED_DEVICES: u32 = 16;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
    #[error("unsupported video source: {0}")]
    Unsupported(String),
    #[error("end of stream")]
    EndOfStream,
}

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel, extract Y channel).
    Yuyv,
    /// 8-bit grayscale (1 byte/pixel).
    Grey,
    /// 16-bit little-endian grayscale (2 bytes/pixel).
    Y16,
}

/// V4L2 camera device handle.
///
/// The capture stream is started on the first read and stopped when the
/// camera is dropped.
pub struct Camera {
    // Declared before `device` so the stream is torn down first.
    stream: Option<MmapStream<'static>>,
    device: Device,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pub fourcc: FourCC,
    pixel_format: PixelFormat,
}

impl Camera {
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
        fmt.width = CAPTURE_WIDTH;
        fmt.height = CAPTURE_HEIGHT;

        let negotiated = device.set_format(&fmt).map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to set format: {e}"))
        })?;

        let fourcc = negotiated.fourcc;
        let pixel_format = if fourcc == FourCC::new(b"GREY") {
            PixelFormat::Grey
        } else if fourcc == FourCC::new(b"YUYV") {
            PixelFormat::Yuyv
        } else if fourcc == FourCC::new(b"Y16 ") || fourcc == FourCC::new(b"Y16\0") {
            PixelFormat::Y16
        } else {
            return Err(CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {fourcc:?} (need YUYV, GREY, or Y16)"
            )));
        };

        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?fourcc,
            "negotiated format"
        );

        Ok(Self {
            stream: None,
            device,
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            fourcc,
            pixel_format,
        })
    }

    /// Capture a single frame, converting to grayscale if needed.
    pub fn capture_frame(&mut self) -> Result<Frame, CameraError> {
        if self.stream.is_none() {
            let stream = MmapStream::with_buffers(&self.device, BufType::VideoCapture, CAPTURE_BUFFERS)
                .map_err(|e| CameraError::CaptureFailed(format!("failed to create mmap stream: {e}")))?;
            self.stream = Some(stream);
        }
        let Some(stream) = self.stream.as_mut() else {
            return Err(CameraError::CaptureFailed("capture stream not started".into()));
        };

        let (buf, meta) = stream
            .next()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}")))?;
        let sequence = meta.sequence;

        let gray = to_grayscale(self.pixel_format, self.width, self.height, buf)?;
        Frame::from_gray(gray, self.width, self.height, sequence)
            .map_err(|e| CameraError::CaptureFailed(e.to_string()))
    }

    /// Discard `count` frames while auto exposure settles.
    pub fn warm_up(&mut self, count: usize) -> Result<(), CameraError> {
        if count > 0 {
            tracing::info!(count, "discarding warmup frames");
        }
        for _ in 0..count {
            self.capture_frame()?;
        }
        Ok(())
    }

    /// List available V4L2 video capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        let mut devices = Vec::new();

        for i in 0..MAX_PROBED_DEVICES {
            let path = format!("/dev/video{i}");
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
                path,
                name: caps.card.clone(),
                driver: caps.driver.clone(),
                bus: caps.bus.clone(),
            });
        }

        devices
    }
}

impl VideoSource for Camera {
    fn read_frame(&mut self) -> Result<Frame, CameraError> {
        self.capture_frame()
    }
}

impl Drop for Camera {
    fn drop(&mut self) {
        tracing::debug!(device = %self.device_path, "camera released");
    }
}

/// Convert a raw buffer to grayscale based on the negotiated format.
fn to_grayscale(
    format: PixelFormat,
    width: u32,
    height: u32,
    buf: &[u8],
) -> Result<Vec<u8>, CameraError> {
    let pixels = (width * height) as usize;

    match format {
        PixelFormat::Grey => {
            if buf.len() < pixels {
                return Err(CameraError::CaptureFailed(format!(
                    "GREY buffer too short: expected {pixels}, got {}",
                    buf.len()
                )));
            }
            Ok(buf[..pixels].to_vec())
        }
        PixelFormat::Y16 => frame::y16_to_grayscale(buf, width, height)
            .map_err(|e| CameraError::CaptureFailed(format!("Y16 conversion failed: {e}"))),
        PixelFormat::Yuyv => frame::yuyv_to_grayscale(buf, width, height)
            .map_err(|e| CameraError::CaptureFailed(format!("YUYV conversion failed: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_missing_device() {
        let err = Camera::open("/dev/video-does-not-exist").err().unwrap();
        assert!(matches!(err, CameraError::DeviceNotFound(_)));
    }

    #[test]
    fn test_to_grayscale_grey_truncates() {
        let buf = vec![7u8; 10];
        assert_eq!(to_grayscale(PixelFormat::Grey, 2, 2, &buf).unwrap(), vec![7; 4]);
    }

    #[test]
    fn test_to_grayscale_grey_short_buffer() {
        assert!(to_grayscale(PixelFormat::Grey, 4, 4, &[0u8; 3]).is_err());
    }

    #[test]
    fn test_to_grayscale_yuyv() {
        let buf = vec![10, 128, 20, 128];
        assert_eq!(to_grayscale(PixelFormat::Yuyv, 2, 1, &buf).unwrap(), vec![10, 20]);
    }
}
