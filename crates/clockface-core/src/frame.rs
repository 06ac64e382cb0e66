//! Frame type and still capture: grab the live frame, encode JPEG.

use chrono::Utc;
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;

use crate::error::CaptureError;
use crate::ports::CameraSession;
use crate::types::CapturedImage;

/// Pixel layout of a raw frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelLayout {
    /// Packed 8-bit RGB (3 bytes/pixel).
    Rgb8,
    /// 8-bit grayscale (1 byte/pixel, IR cameras).
    Gray8,
}

impl PixelLayout {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelLayout::Rgb8 => 3,
            PixelLayout::Gray8 => 1,
        }
    }

    fn color_type(self) -> ExtendedColorType {
        match self {
            PixelLayout::Rgb8 => ExtendedColorType::Rgb8,
            PixelLayout::Gray8 => ExtendedColorType::L8,
        }
    }
}

/// A raw frame pulled from a live camera session.
#[derive(Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub layout: PixelLayout,
    pub sequence: u32,
}

impl Frame {
    /// Number of bytes `data` must hold for the frame's dimensions.
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * self.layout.bytes_per_pixel()
    }
}

/// Draw the session's current frame and encode it as a JPEG still.
///
/// The still keeps the frame's native resolution. Fails with
/// [`CaptureError::NoActiveFrame`] while the session reports no ready
/// dimensions or hands back an empty frame.
pub fn capture_still(
    session: &mut dyn CameraSession,
    quality: u8,
) -> Result<CapturedImage, CaptureError> {
    if session.dimensions().is_none() {
        return Err(CaptureError::NoActiveFrame);
    }

    let frame = session.grab_frame()?;
    if frame.width == 0 || frame.height == 0 || frame.data.is_empty() {
        return Err(CaptureError::NoActiveFrame);
    }

    let jpeg = encode_jpeg(&frame, quality)?;
    tracing::debug!(
        width = frame.width,
        height = frame.height,
        seq = frame.sequence,
        bytes = jpeg.len(),
        "captured still"
    );

    Ok(CapturedImage {
        jpeg,
        width: frame.width,
        height: frame.height,
        captured_at: Utc::now(),
    })
}

/// Encode a raw frame as baseline JPEG.
pub fn encode_jpeg(frame: &Frame, quality: u8) -> Result<Vec<u8>, CaptureError> {
    let expected = frame.expected_len();
    if frame.data.len() != expected {
        return Err(CaptureError::InvalidFrame {
            expected,
            actual: frame.data.len(),
        });
    }

    let mut out = Vec::with_capacity(expected / 8);
    let mut encoder = JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100));
    encoder.encode(
        &frame.data,
        frame.width,
        frame.height,
        frame.layout.color_type(),
    )?;
    Ok(out)
}
