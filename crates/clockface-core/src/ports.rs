//! Collaborator ports the capture loop drives.
//!
//! Everything outside the loop (camera hardware, remote services, the
//! presentation surface) sits behind one of these traits so the loop can
//! be exercised against fakes.

use async_trait::async_trait;

use crate::error::{CaptureError, DeviceError, TransportError};
use crate::frame::Frame;
use crate::types::{CapturedImage, EmployeeId, VerifyOutcome};

/// Source of camera sessions (video only, no audio).
#[async_trait]
pub trait CameraDevice: Send + Sync {
    async fn open(&self) -> Result<Box<dyn CameraSession>, DeviceError>;
}

/// A live camera stream owned by exactly one capture loop.
pub trait CameraSession: Send {
    /// Pixel dimensions of the live feed, `None` until the stream is ready.
    fn dimensions(&self) -> Option<(u32, u32)>;

    /// Pull the current frame from the stream.
    fn grab_frame(&mut self) -> Result<Frame, CaptureError>;

    /// Number of tracks still delivering frames.
    fn active_tracks(&self) -> usize;

    /// Stop every track. Must be safe to call more than once.
    fn stop_tracks(&mut self);

    /// Human-readable label for logs ("/dev/video0", "fake", ...).
    fn label(&self) -> String;
}

/// Remote face verifier.
#[async_trait]
pub trait Verifier: Send + Sync {
    /// Single attempt; retrying is the caller's business.
    async fn verify(
        &self,
        employee_id: EmployeeId,
        image: &CapturedImage,
        checkout: bool,
    ) -> Result<VerifyOutcome, TransportError>;
}

/// Attendance ledger and audit artifact store.
#[async_trait]
pub trait AttendanceNotifier: Send + Sync {
    /// Record the check-in (`checkout == false`) or check-out.
    async fn record_event(&self, checkout: bool) -> Result<(), TransportError>;

    /// Store the matched still against the attendance record.
    async fn upload_capture_artifact(
        &self,
        employee_id: EmployeeId,
        image: &CapturedImage,
        checkout: bool,
    ) -> Result<(), TransportError>;
}

/// Identity/config collaborator.
#[async_trait]
pub trait SettingsSource: Send + Sync {
    async fn face_recognition_enabled(&self) -> Result<bool, TransportError>;
}

/// Live feed description handed to the shell when the stream is bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedInfo {
    pub label: String,
    pub width: u32,
    pub height: u32,
}

/// User-visible notifications raised by the loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    Matched { checkout: bool },
    NotMatched,
    Retrying { reason: String },
    GaveUp { attempts: u32 },
    DeviceUnavailable { reason: String },
    /// The stream had no usable frame this tick.
    CameraNotReady,
    /// Face matched but the attendance event could not be recorded.
    RecordFailed { checkout: bool, reason: String },
}

impl Signal {
    pub fn message(&self) -> String {
        match self {
            Signal::Matched { checkout: true } => "Face matched! Marking check-out...".into(),
            Signal::Matched { checkout: false } => "Face matched! Marking attendance...".into(),
            Signal::NotMatched => "Face not matched, trying again...".into(),
            Signal::Retrying { reason } => format!("Verification unavailable ({reason}), retrying..."),
            Signal::GaveUp { attempts } => {
                format!("Face not matched after {attempts} attempts, giving up.")
            }
            Signal::DeviceUnavailable { reason } => format!("Camera unavailable: {reason}"),
            Signal::CameraNotReady => "Waiting for the camera...".into(),
            Signal::RecordFailed { checkout, reason } => format!(
                "Could not record {}: {reason}",
                if *checkout { "check-out" } else { "check-in" }
            ),
        }
    }
}

/// Presentation surface owned by the dialog host.
///
/// Calls are fire-and-forget UI updates; none of them may block or call
/// back into the loop.
pub trait DialogShell: Send + Sync {
    /// Attach the live stream to the video surface.
    fn bind_live(&self, feed: &FeedInfo);

    /// Show the live video again, hiding any still.
    fn show_live(&self);

    /// Replace the live video with a captured still.
    fn show_still(&self, image: &CapturedImage);

    /// Brief capture flash.
    fn flash(&self);

    fn notify(&self, signal: Signal);

    /// Ask the host to close the dialog.
    fn close(&self);
}
