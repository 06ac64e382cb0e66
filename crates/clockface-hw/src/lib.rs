//! clockface-hw: Hardware abstraction for camera capture.
//!
//! Provides V4L2-backed camera sessions implementing the core's
//! `CameraDevice`/`CameraSession` ports.

pub mod camera;
pub mod pixel;

pub use camera::{list_devices, CameraConfig, DeviceInfo, PixelFormat, V4lCamera, V4lSession};
