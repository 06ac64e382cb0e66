//! clockface-core: Unattended face check-in / check-out.
//!
//! Owns the capture/verify control loop and the ports it drives: camera
//! sessions, the remote verifier, the attendance ledger and the dialog
//! shell that presents the live feed.

pub mod capture_loop;
pub mod error;
pub mod frame;
pub mod ports;
pub mod scheduler;
pub mod state;
pub mod types;

#[cfg(test)]
mod fakes;

pub use capture_loop::{CaptureLoop, Collaborators, LoopConfig, SkipReason, TickReport};
pub use error::{CaptureError, DeviceError, LoopError, TransportError};
pub use frame::{capture_still, Frame, PixelLayout};
pub use ports::{
    AttendanceNotifier, CameraDevice, CameraSession, DialogShell, FeedInfo, SettingsSource,
    Signal, Verifier,
};
pub use scheduler::{Scheduler, TickFn, TickFuture, TokioScheduler, TriggerHandle};
pub use state::{LoopState, Phase};
pub use types::{
    AttemptOutcome, CaptureAttempt, CapturedImage, DialogContext, EmployeeId, VerifyOutcome,
};
