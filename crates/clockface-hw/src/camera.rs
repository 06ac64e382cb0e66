//! V4L2 camera sessions via the `v4l` crate.

use std::path::Path;

use async_trait::async_trait;
use clockface_core::{CameraDevice, CameraSession, CaptureError, DeviceError, Frame, PixelLayout};
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

use crate::pixel;

/// Fraction of near-black pixels above which a frame counts as not ready.
const DARK_FRAME_THRESHOLD: f32 = 0.95;
const STREAM_BUFFERS: u32 = 4;
/// Buffers dequeued per grab while looking for one that is not dark.
const MAX_GRAB_BUFFERS: usize = 6;

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
    /// YUYV 4:2:2 packed, converted to RGB.
    Yuyv,
    /// 8-bit grayscale (native IR camera output).
    Grey,
    /// 16-bit little-endian grayscale, downscaled to 8-bit.
    Y16,
}

/// Settings for opening a camera.
#[derive(Debug, Clone)]
pub struct CameraConfig {
    /// V4L2 device path, e.g. "/dev/video0".
    pub device_path: String,
    /// Requested resolution; the driver may negotiate something else.
    pub width: u32,
    pub height: u32,
    /// Frames discarded after opening while auto-exposure settles.
    pub warmup_frames: usize,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device_path: "/dev/video0".into(),
            width: 640,
            height: 480,
            warmup_frames: 4,
        }
    }
}

/// Camera device that opens a [`V4lSession`] per capture dialog.
pub struct V4lCamera {
    config: CameraConfig,
}

impl V4lCamera {
    pub fn new(config: CameraConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl CameraDevice for V4lCamera {
    async fn open(&self) -> Result<Box<dyn CameraSession>, DeviceError> {
        let config = self.config.clone();
        let session = tokio::task::spawn_blocking(move || V4lSession::open(&config))
            .await
            .map_err(|e| DeviceError::Failed(format!("camera worker join failed: {e}")))??;
        Ok(Box::new(session))
    }
}

/// A live V4L2 stream. The single video track lives as long as the device
/// handle; stopping the track closes it.
pub struct V4lSession {
    device: Option<Device>,
    device_path: String,
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
}

impl V4lSession {
    /// Open and configure the device, then discard warm-up frames. Blocking.
    pub fn open(config: &CameraConfig) -> Result<Self, DeviceError> {
        let device_path = config.device_path.as_str();
        if !Path::new(device_path).exists() {
            return Err(DeviceError::NotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| open_error(device_path, e))?;

        let caps = device
            .query_caps()
            .map_err(|e| DeviceError::Failed(format!("failed to query capabilities: {e}")))?;
        if !caps
            .capabilities
            .contains(v4l::capability::Flags::VIDEO_CAPTURE)
        {
            return Err(DeviceError::Failed(format!(
                "{device_path} is not a video capture device"
            )));
        }

        // Ask for colour YUYV; IR cameras negotiate GREY or Y16 instead.
        let mut fmt = device
            .format()
            .map_err(|e| DeviceError::Failed(format!("failed to get format: {e}")))?;
        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = config.width;
        fmt.height = config.height;

        let negotiated = device
            .set_format(&fmt)
            .map_err(|e| DeviceError::Failed(format!("failed to set format: {e}")))?;

        let fourcc = negotiated.fourcc;
        let pixel_format = if fourcc == FourCC::new(b"YUYV") {
            PixelFormat::Yuyv
        } else if fourcc == FourCC::new(b"GREY") {
            PixelFormat::Grey
        } else if fourcc == FourCC::new(b"Y16 ") || fourcc == FourCC::new(b"Y16\0") {
            PixelFormat::Y16
        } else {
            return Err(DeviceError::Failed(format!(
                "unsupported pixel format: {fourcc:?} (need YUYV, GREY, or Y16)"
            )));
        };

        tracing::info!(
            device = device_path,
            card = %caps.card,
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?fourcc,
            "camera opened"
        );

        let session = Self {
            device: Some(device),
            device_path: device_path.to_string(),
            width: negotiated.width,
            height: negotiated.height,
            pixel_format,
        };
        session.discard_warmup(config.warmup_frames);
        Ok(session)
    }

    fn discard_warmup(&self, count: usize) {
        let Some(device) = &self.device else {
            return;
        };
        if count == 0 {
            return;
        }
        tracing::debug!(count, "discarding warmup frames");
        match MmapStream::with_buffers(device, BufType::VideoCapture, STREAM_BUFFERS) {
            Ok(mut stream) => {
                for _ in 0..count {
                    if let Err(e) = stream.next() {
                        tracing::debug!(error = %e, "warmup frame failed");
                        break;
                    }
                }
            }
            Err(e) => tracing::warn!(error = %e, "could not start warmup stream"),
        }
    }

    /// Convert a raw buffer to (pixels, luma) for the negotiated format.
    fn convert(&self, buf: &[u8]) -> Result<(Vec<u8>, PixelLayout, Vec<u8>), pixel::PixelError> {
        match self.pixel_format {
            PixelFormat::Yuyv => {
                let luma = pixel::yuyv_to_grayscale(buf, self.width, self.height)?;
                let rgb = pixel::yuyv_to_rgb(buf, self.width, self.height)?;
                Ok((rgb, PixelLayout::Rgb8, luma))
            }
            PixelFormat::Grey => {
                let pixels = (self.width * self.height) as usize;
                if buf.len() < pixels {
                    return Err(pixel::PixelError::InvalidLength {
                        expected: pixels,
                        actual: buf.len(),
                    });
                }
                let gray = buf[..pixels].to_vec();
                Ok((gray.clone(), PixelLayout::Gray8, gray))
            }
            PixelFormat::Y16 => {
                let gray = pixel::y16_to_grayscale(buf, self.width, self.height)?;
                Ok((gray.clone(), PixelLayout::Gray8, gray))
            }
        }
    }
}

impl CameraSession for V4lSession {
    fn dimensions(&self) -> Option<(u32, u32)> {
        self.device.as_ref().map(|_| (self.width, self.height))
    }

    fn grab_frame(&mut self) -> Result<Frame, CaptureError> {
        let device = self.device.as_ref().ok_or(CaptureError::NoActiveFrame)?;

        let mut stream = MmapStream::with_buffers(device, BufType::VideoCapture, STREAM_BUFFERS)
            .map_err(|e| CaptureError::Device(format!("failed to create mmap stream: {e}")))?;

        first_lit(MAX_GRAB_BUFFERS, || {
            let (buf, meta) = stream
                .next()
                .map_err(|e| CaptureError::Device(format!("failed to dequeue buffer: {e}")))?;
            let (data, layout, luma) = self
                .convert(buf)
                .map_err(|e| CaptureError::Device(e.to_string()))?;
            let frame = Frame {
                data,
                width: self.width,
                height: self.height,
                layout,
                sequence: meta.sequence,
            };
            Ok((frame, luma))
        })
    }

    fn active_tracks(&self) -> usize {
        usize::from(self.device.is_some())
    }

    fn stop_tracks(&mut self) {
        if self.device.take().is_some() {
            tracing::debug!(device = %self.device_path, "camera track stopped");
        }
    }

    fn label(&self) -> String {
        self.device_path.clone()
    }
}

/// Pull frames until one is not dark, giving up after `max` tries.
///
/// The first buffers after STREAMON are often underexposed.
fn first_lit<T>(
    max: usize,
    mut next: impl FnMut() -> Result<(T, Vec<u8>), CaptureError>,
) -> Result<T, CaptureError> {
    for attempt in 1..=max {
        let (frame, luma) = next()?;
        if !pixel::is_dark_frame(&luma, DARK_FRAME_THRESHOLD) {
            return Ok(frame);
        }
        tracing::debug!(attempt, "dark frame skipped");
    }
    tracing::debug!(max, "no lit frame; stream not ready");
    Err(CaptureError::NoActiveFrame)
}

fn open_error(device_path: &str, e: std::io::Error) -> DeviceError {
    let msg = e.to_string();
    if e.kind() == std::io::ErrorKind::PermissionDenied {
        DeviceError::PermissionDenied(format!("{device_path}: {msg}"))
    } else if msg.contains("busy") || msg.contains("EBUSY") {
        DeviceError::Busy
    } else if e.kind() == std::io::ErrorKind::NotFound {
        DeviceError::NotFound(device_path.to_string())
    } else {
        DeviceError::Failed(format!("{device_path}: {msg}"))
    }
}

/// List available V4L2 video capture devices.
pub fn list_devices() -> Vec<DeviceInfo> {
    let mut devices = Vec::new();

    for i in 0..16 {
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
        if !caps
            .capabilities
            .contains(v4l::capability::Flags::VIDEO_CAPTURE)
        {
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
