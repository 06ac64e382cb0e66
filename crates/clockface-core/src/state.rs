use std::sync::Arc;

use crate::types::CapturedImage;

/// Coarse lifecycle phase of a capture loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Before `start` or after `stop`.
    Idle,
    /// Camera open and trigger scheduled.
    Running,
}

/// Why a tick did not run an attempt (see [`LoopState::begin_attempt`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Busy {
    NotRunning,
    InFlight,
}

/// State owned by a single capture loop.
#[derive(Debug, Clone, Default)]
pub struct LoopState {
    pub running: bool,
    /// Mutual-exclusion guard: a verification is outstanding.
    pub in_flight: bool,
    /// Still shown in place of the live feed while an attempt is verified.
    pub last_frame: Option<Arc<CapturedImage>>,
    /// Read once from the settings collaborator; `None` until read.
    pub face_recognition_enabled: Option<bool>,
    /// Attempts that reached the verifier since the last start.
    pub attempts: u32,
    /// Bumped by every stop; lets a start detect a stop that raced it.
    pub generation: u64,
}

impl LoopState {
    pub fn phase(&self) -> Phase {
        if self.running {
            Phase::Running
        } else {
            Phase::Idle
        }
    }

    /// Claim the in-flight slot for a new attempt.
    pub fn begin_attempt(&mut self) -> Result<(), Busy> {
        if !self.running {
            return Err(Busy::NotRunning);
        }
        if self.in_flight {
            return Err(Busy::InFlight);
        }
        self.in_flight = true;
        Ok(())
    }

    pub fn finish_attempt(&mut self) {
        self.in_flight = false;
    }

    pub fn mark_running(&mut self) {
        self.running = true;
        self.attempts = 0;
        self.last_frame = None;
    }

    /// Transition to idle. Returns whether the loop was running.
    pub fn mark_stopped(&mut self) -> bool {
        let was_running = self.running;
        self.running = false;
        self.last_frame = None;
        self.generation += 1;
        was_running
    }
}
