use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TransportError;

/// Ledger identifier of the employee checking in or out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EmployeeId(pub u64);

impl fmt::Display for EmployeeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Context the dialog host opens the capture loop with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DialogContext {
    pub employee_id: EmployeeId,
    /// `true` records a check-out, `false` a check-in.
    pub checkout: bool,
}

impl DialogContext {
    pub fn check_in(employee_id: EmployeeId) -> Self {
        Self {
            employee_id,
            checkout: false,
        }
    }

    pub fn check_out(employee_id: EmployeeId) -> Self {
        Self {
            employee_id,
            checkout: true,
        }
    }

    /// "check-in" or "check-out", for logs and messages.
    pub fn direction(&self) -> &'static str {
        if self.checkout {
            "check-out"
        } else {
            "check-in"
        }
    }
}

/// A still frame encoded as JPEG at the camera's native resolution.
#[derive(Clone, PartialEq, Eq)]
pub struct CapturedImage {
    pub jpeg: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub captured_at: DateTime<Utc>,
}

impl fmt::Debug for CapturedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapturedImage")
            .field("bytes", &self.jpeg.len())
            .field("width", &self.width)
            .field("height", &self.height)
            .field("captured_at", &self.captured_at)
            .finish()
    }
}

/// Answer from the remote verifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyOutcome {
    pub matched: bool,
    /// Service-supplied explanation for a negative result, if any.
    pub reason: Option<String>,
}

impl VerifyOutcome {
    pub fn matched() -> Self {
        Self {
            matched: true,
            reason: None,
        }
    }

    pub fn not_matched(reason: Option<String>) -> Self {
        Self {
            matched: false,
            reason,
        }
    }
}

/// Where a capture attempt ended up.
#[derive(Debug)]
pub enum AttemptOutcome {
    Pending,
    Matched,
    NotMatched { reason: Option<String> },
    Failed(TransportError),
}

/// One encode-and-verify cycle.
#[derive(Debug)]
pub struct CaptureAttempt {
    pub id: Uuid,
    pub employee_id: EmployeeId,
    pub checkout: bool,
    pub image: Arc<CapturedImage>,
    pub outcome: AttemptOutcome,
}

impl CaptureAttempt {
    pub fn new(context: DialogContext, image: Arc<CapturedImage>) -> Self {
        Self {
            id: Uuid::new_v4(),
            employee_id: context.employee_id,
            checkout: context.checkout,
            image,
            outcome: AttemptOutcome::Pending,
        }
    }

    pub fn is_matched(&self) -> bool {
        matches!(self.outcome, AttemptOutcome::Matched)
    }
}
