use std::time::Duration;

use thiserror::Error;

/// Failure to acquire a camera session.
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("camera not found: {0}")]
    NotFound(String),
    #[error("camera permission denied: {0}")]
    PermissionDenied(String),
    #[error("camera busy")]
    Busy,
    #[error("camera failure: {0}")]
    Failed(String),
}

/// Failure to produce a still frame from a live session.
#[derive(Error, Debug)]
pub enum CaptureError {
    /// The stream has no current frame yet (not ready, settling, or stopped).
    #[error("no active frame")]
    NoActiveFrame,
    #[error("invalid frame: expected {expected} bytes, got {actual}")]
    InvalidFrame { expected: usize, actual: usize },
    #[error("device error: {0}")]
    Device(String),
    #[error("jpeg encoding failed: {0}")]
    Encode(#[from] image::ImageError),
    #[error("no frame within {0:?}")]
    Timeout(Duration),
}

/// Failure of a call to the verification, ledger or settings service.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("http request failed: {0}")]
    Http(String),
    #[error("service returned HTTP {0}")]
    Status(u16),
    #[error("service error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("malformed response: {0}")]
    Decode(String),
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("no response within {0:?}")]
    Timeout(Duration),
}

/// Errors surfaced by the capture loop's lifecycle operations.
#[derive(Error, Debug)]
pub enum LoopError {
    #[error("camera unavailable: {0}")]
    DeviceUnavailable(#[from] DeviceError),
    #[error("face recognition is disabled")]
    FaceRecognitionDisabled,
    #[error("stopped while starting")]
    Superseded,
}
