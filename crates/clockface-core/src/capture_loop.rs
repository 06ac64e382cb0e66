//! The capture/verify control loop.
//!
//! While running, the loop owns one camera session and one recurring
//! trigger. Every trigger runs at most one capture attempt: grab a still,
//! ask the verifier, then either record the attendance event and stop, or
//! put the live feed back and wait for the next trigger. Ticks that fire
//! while an attempt is outstanding are dropped, never queued.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError, Weak};
use std::time::Duration;

use crate::error::{CaptureError, LoopError, TransportError};
use crate::frame::capture_still;
use crate::ports::{
    AttendanceNotifier, CameraDevice, CameraSession, DialogShell, FeedInfo, SettingsSource,
    Signal, Verifier,
};
use crate::scheduler::{Scheduler, TickFn, TickFuture, TriggerHandle};
use crate::state::{Busy, LoopState, Phase};
use crate::types::{AttemptOutcome, CaptureAttempt, CapturedImage, DialogContext, VerifyOutcome};

/// Tuning for a capture loop.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Period of the capture trigger.
    pub interval: Duration,
    /// Upper bound on one verification call; `None` waits forever.
    pub verify_timeout: Option<Duration>,
    /// Stop after this many unsuccessful attempts; `None` retries until
    /// matched or cancelled.
    pub max_attempts: Option<u32>,
    /// JPEG quality (1–100) of the submitted still.
    pub jpeg_quality: u8,
    /// Upper bound on grabbing and encoding one still.
    pub capture_timeout: Duration,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            verify_timeout: Some(Duration::from_secs(10)),
            max_attempts: None,
            jpeg_quality: 85,
            capture_timeout: Duration::from_secs(5),
        }
    }
}

/// Everything the loop talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub camera: Arc<dyn CameraDevice>,
    pub verifier: Arc<dyn Verifier>,
    pub notifier: Arc<dyn AttendanceNotifier>,
    pub settings: Arc<dyn SettingsSource>,
    pub shell: Arc<dyn DialogShell>,
    pub scheduler: Arc<dyn Scheduler>,
}

/// Why a tick ran no attempt.
#[derive(Debug)]
pub enum SkipReason {
    NotRunning,
    InFlight,
    NoActiveFrame,
    CaptureFailed(CaptureError),
}

/// What a single tick did.
#[derive(Debug)]
pub enum TickReport {
    Skipped(SkipReason),
    /// The attempt ran and its outcome was acted on.
    Completed(CaptureAttempt),
    /// The loop stopped while the still was being captured or verified;
    /// the attempt was dropped without touching the shell or the ledger.
    Discarded(CaptureAttempt),
}

impl TickReport {
    pub fn is_skipped(&self) -> bool {
        matches!(self, TickReport::Skipped(_))
    }

    pub fn attempt(&self) -> Option<&CaptureAttempt> {
        match self {
            TickReport::Completed(attempt) | TickReport::Discarded(attempt) => Some(attempt),
            TickReport::Skipped(_) => None,
        }
    }
}

/// State and resources guarded together so a stop can never interleave
/// with a half-finished start.
struct Shared {
    state: LoopState,
    session: Option<Arc<SessionSlot>>,
    trigger: Option<TriggerHandle>,
}

impl Shared {
    /// Whether the run that began at `generation` is still live.
    fn is_current(&self, generation: u64) -> bool {
        self.state.running && self.state.generation == generation
    }
}

/// Camera session shared with the blocking capture worker.
///
/// Never locked while `Shared` is held. Whoever holds the session lock
/// after `released` is set stops the tracks.
struct SessionSlot {
    session: Mutex<Box<dyn CameraSession>>,
    label: String,
    released: AtomicBool,
}

impl SessionSlot {
    fn new(session: Box<dyn CameraSession>) -> Arc<Self> {
        Arc::new(Self {
            label: session.label(),
            session: Mutex::new(session),
            released: AtomicBool::new(false),
        })
    }

    /// Stop the tracks now, or leave that to the grab in progress.
    /// Returns whether they were stopped here.
    fn release(&self) -> bool {
        self.released.store(true, Ordering::SeqCst);
        match self.session.try_lock() {
            Ok(mut session) => session.stop_tracks(),
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().stop_tracks(),
            Err(TryLockError::WouldBlock) => return false,
        }
        true
    }

    /// Grab and encode one still. Blocking.
    fn capture(&self, quality: u8) -> Result<CapturedImage, CaptureError> {
        let result = {
            let mut session = match self.session.try_lock() {
                Ok(session) => session,
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
                // An earlier grab is still stuck in the driver.
                Err(TryLockError::WouldBlock) => return Err(CaptureError::NoActiveFrame),
            };
            if self.released.load(Ordering::SeqCst) {
                return Err(CaptureError::NoActiveFrame);
            }
            capture_still(&mut **session, quality)
        };

        if self.released.load(Ordering::SeqCst) {
            let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
            session.stop_tracks();
            tracing::debug!(camera = %self.label, "camera released after in-flight grab");
        }
        result
    }
}

struct Inner {
    context: DialogContext,
    config: LoopConfig,
    ports: Collaborators,
    shared: Mutex<Shared>,
    /// Serialises `start` calls across their await points.
    lifecycle: tokio::sync::Mutex<()>,
}

impl Inner {
    fn shared(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let shared = self.shared.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = shared.session.take() {
            tracing::warn!(
                camera = %slot.label,
                "capture loop dropped while running; releasing camera"
            );
            slot.release();
        }
    }
}

/// Clears the in-flight flag when the attempt ends, however it ends.
struct InFlight<'a> {
    inner: &'a Inner,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.inner.shared().state.finish_attempt();
    }
}

/// Clone-safe handle to one capture loop.
#[derive(Clone)]
pub struct CaptureLoop {
    inner: Arc<Inner>,
}

impl CaptureLoop {
    pub fn new(context: DialogContext, config: LoopConfig, ports: Collaborators) -> Self {
        Self {
            inner: Arc::new(Inner {
                context,
                config,
                ports,
                shared: Mutex::new(Shared {
                    state: LoopState::default(),
                    session: None,
                    trigger: None,
                }),
                lifecycle: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn context(&self) -> DialogContext {
        self.inner.context
    }

    /// Snapshot of the loop state.
    pub fn state(&self) -> LoopState {
        self.inner.shared().state.clone()
    }

    pub fn phase(&self) -> Phase {
        self.inner.shared().state.phase()
    }

    /// Whether face recognition is switched on, read once from settings.
    ///
    /// A failed read counts as disabled and is retried on the next call.
    pub async fn face_recognition_enabled(&self) -> bool {
        let cached = self.inner.shared().state.face_recognition_enabled;
        if let Some(enabled) = cached {
            return enabled;
        }

        match self.inner.ports.settings.face_recognition_enabled().await {
            Ok(enabled) => {
                tracing::debug!(enabled, "face recognition setting loaded");
                self.inner.shared().state.face_recognition_enabled = Some(enabled);
                enabled
            }
            Err(err) => {
                tracing::warn!(error = %err, "could not read face recognition setting");
                false
            }
        }
    }

    /// Open the camera, bind it to the shell and schedule the trigger.
    ///
    /// No-op while already running. On [`LoopError::DeviceUnavailable`]
    /// the shell is told why and closed; the loop stays idle.
    pub async fn start(&self) -> Result<(), LoopError> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        let ctx = self.inner.context;

        let generation = {
            let shared = self.inner.shared();
            if shared.state.running {
                tracing::debug!("capture loop already running");
                return Ok(());
            }
            shared.state.generation
        };

        if !self.face_recognition_enabled().await {
            tracing::info!(
                employee = %ctx.employee_id,
                direction = ctx.direction(),
                "face recognition disabled; not opening camera"
            );
            return Err(LoopError::FaceRecognitionDisabled);
        }

        let mut session = match self.inner.ports.camera.open().await {
            Ok(session) => session,
            Err(err) => {
                tracing::warn!(error = %err, "camera unavailable");
                self.inner.ports.shell.notify(Signal::DeviceUnavailable {
                    reason: err.to_string(),
                });
                self.inner.ports.shell.close();
                return Err(LoopError::DeviceUnavailable(err));
            }
        };

        let (width, height) = session.dimensions().unwrap_or((0, 0));
        let feed = FeedInfo {
            label: session.label(),
            width,
            height,
        };

        {
            let mut shared = self.inner.shared();
            if shared.state.generation != generation {
                drop(shared);
                session.stop_tracks();
                tracing::info!("stopped while the camera was opening; releasing camera");
                return Err(LoopError::Superseded);
            }
            shared.state.mark_running();
            shared.session = Some(SessionSlot::new(session));
            shared.trigger = Some(
                self.inner
                    .ports
                    .scheduler
                    .schedule_every(self.inner.config.interval, self.tick_fn()),
            );
        }

        self.inner.ports.shell.bind_live(&feed);
        tracing::info!(
            employee = %ctx.employee_id,
            direction = ctx.direction(),
            camera = %feed.label,
            width,
            height,
            interval_ms = self.inner.config.interval.as_millis() as u64,
            "capture loop started"
        );
        Ok(())
    }

    /// End the loop: cancel the trigger, stop the camera, close the shell.
    ///
    /// No-op when already idle. Safe while an attempt is in flight; that
    /// attempt's result is discarded.
    pub fn stop(&self) {
        if self.halt() {
            tracing::info!(employee = %self.inner.context.employee_id, "capture loop stopped");
            self.inner.ports.shell.close();
        }
    }

    /// User-initiated close. Same as [`stop`](Self::stop), no messaging.
    pub fn cancel(&self) {
        if self.halt() {
            tracing::info!(employee = %self.inner.context.employee_id, "capture cancelled");
            self.inner.ports.shell.close();
        }
    }

    /// Release the trigger and camera. Returns whether the loop was running.
    fn halt(&self) -> bool {
        let (was_running, session, trigger) = {
            let mut shared = self.inner.shared();
            let was_running = shared.state.mark_stopped();
            (was_running, shared.session.take(), shared.trigger.take())
        };

        if let Some(trigger) = trigger {
            trigger.cancel();
        }
        if let Some(slot) = session {
            let stopped = slot.release();
            tracing::debug!(camera = %slot.label, stopped, "camera released");
        }
        was_running
    }

    fn tick_fn(&self) -> TickFn {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        Arc::new(move || -> TickFuture {
            let weak = weak.clone();
            Box::pin(async move {
                if let Some(inner) = weak.upgrade() {
                    CaptureLoop { inner }.tick().await;
                }
            })
        })
    }

    /// Run one trigger's worth of work.
    pub async fn tick(&self) -> TickReport {
        let inner = &*self.inner;

        let begun = {
            let mut shared = inner.shared();
            shared
                .state
                .begin_attempt()
                .map(|()| shared.state.generation)
        };
        let generation = match begun {
            Ok(generation) => generation,
            Err(busy) => {
                let reason = match busy {
                    Busy::NotRunning => SkipReason::NotRunning,
                    Busy::InFlight => SkipReason::InFlight,
                };
                tracing::debug!(?reason, "tick skipped");
                return TickReport::Skipped(reason);
            }
        };
        let _in_flight = InFlight { inner };

        let slot = inner.shared().session.clone();
        let captured = match slot {
            Some(slot) => self.capture(slot).await,
            None => Err(CaptureError::NoActiveFrame),
        };
        let image = match captured {
            Ok(image) => Arc::new(image),
            Err(CaptureError::NoActiveFrame) => {
                tracing::debug!("no frame available yet; skipping tick");
                self.notify_current(generation, Signal::CameraNotReady);
                return TickReport::Skipped(SkipReason::NoActiveFrame);
            }
            Err(err) => {
                tracing::warn!(error = %err, "still capture failed; skipping tick");
                self.notify_current(
                    generation,
                    Signal::Retrying {
                        reason: err.to_string(),
                    },
                );
                return TickReport::Skipped(SkipReason::CaptureFailed(err));
            }
        };

        let mut attempt = CaptureAttempt::new(inner.context, Arc::clone(&image));
        {
            let mut shared = inner.shared();
            if !shared.is_current(generation) {
                drop(shared);
                tracing::info!(
                    attempt = %attempt.id,
                    "loop stopped during capture; still discarded"
                );
                return TickReport::Discarded(attempt);
            }
            shared.state.last_frame = Some(Arc::clone(&image));
            inner.ports.shell.flash();
            inner.ports.shell.show_still(&image);
        }

        let verified = self.verify(&image).await;

        let attempts = {
            let mut shared = inner.shared();
            if !shared.is_current(generation) {
                None
            } else {
                shared.state.attempts += 1;
                Some(shared.state.attempts)
            }
        };
        let Some(attempts) = attempts else {
            attempt.outcome = outcome_of(verified);
            tracing::info!(
                attempt = %attempt.id,
                "loop stopped during verification; result discarded"
            );
            return TickReport::Discarded(attempt);
        };

        match verified {
            Ok(VerifyOutcome { matched: true, .. }) => {
                attempt.outcome = AttemptOutcome::Matched;
                self.complete_match(&attempt).await;
            }
            Ok(VerifyOutcome { reason, .. }) => {
                tracing::info!(
                    attempt = %attempt.id,
                    attempts,
                    reason = reason.as_deref().unwrap_or("-"),
                    "face not matched"
                );
                self.reset_to_live();
                inner.ports.shell.notify(Signal::NotMatched);
                attempt.outcome = AttemptOutcome::NotMatched { reason };
                self.give_up_if_exhausted(attempts);
            }
            Err(err) => {
                tracing::warn!(
                    attempt = %attempt.id,
                    attempts,
                    error = %err,
                    "verification failed; retrying on next tick"
                );
                self.reset_to_live();
                inner.ports.shell.notify(Signal::Retrying {
                    reason: err.to_string(),
                });
                attempt.outcome = AttemptOutcome::Failed(err);
                self.give_up_if_exhausted(attempts);
            }
        }

        TickReport::Completed(attempt)
    }

    /// Run the grab and JPEG encode on the blocking pool, bounded by the
    /// capture timeout. A timed-out grab keeps the session locked; later
    /// ticks see no frame until it returns.
    async fn capture(&self, slot: Arc<SessionSlot>) -> Result<CapturedImage, CaptureError> {
        let quality = self.inner.config.jpeg_quality;
        let limit = self.inner.config.capture_timeout;
        let worker = tokio::task::spawn_blocking(move || slot.capture(quality));
        match tokio::time::timeout(limit, worker).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(CaptureError::Device(format!("capture worker failed: {e}"))),
            Err(_) => Err(CaptureError::Timeout(limit)),
        }
    }

    /// Raise `signal` unless the run that began at `generation` has ended.
    fn notify_current(&self, generation: u64, signal: Signal) {
        let shared = self.inner.shared();
        if shared.is_current(generation) {
            self.inner.ports.shell.notify(signal);
        }
    }

    async fn verify(&self, image: &CapturedImage) -> Result<VerifyOutcome, TransportError> {
        let ctx = self.inner.context;
        let call = self
            .inner
            .ports
            .verifier
            .verify(ctx.employee_id, image, ctx.checkout);
        match self.inner.config.verify_timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .unwrap_or_else(|_| Err(TransportError::Timeout(limit))),
            None => call.await,
        }
    }

    /// Success signal, ledger write, artifact upload, stop. The two service
    /// calls are best effort: the match already stands.
    async fn complete_match(&self, attempt: &CaptureAttempt) {
        let ports = &self.inner.ports;
        tracing::info!(
            attempt = %attempt.id,
            employee = %attempt.employee_id,
            checkout = attempt.checkout,
            "face matched"
        );
        ports.shell.notify(Signal::Matched {
            checkout: attempt.checkout,
        });

        if let Err(err) = ports.notifier.record_event(attempt.checkout).await {
            tracing::warn!(attempt = %attempt.id, error = %err, "recording attendance failed");
            ports.shell.notify(Signal::RecordFailed {
                checkout: attempt.checkout,
                reason: err.to_string(),
            });
        }
        if let Err(err) = ports
            .notifier
            .upload_capture_artifact(attempt.employee_id, &attempt.image, attempt.checkout)
            .await
        {
            tracing::warn!(attempt = %attempt.id, error = %err, "capture upload failed");
        }

        self.stop();
    }

    fn reset_to_live(&self) {
        self.inner.shared().state.last_frame = None;
        self.inner.ports.shell.show_live();
    }

    fn give_up_if_exhausted(&self, attempts: u32) {
        let Some(max) = self.inner.config.max_attempts else {
            return;
        };
        if attempts >= max {
            tracing::warn!(attempts, max, "attempt limit reached; giving up");
            self.inner.ports.shell.notify(Signal::GaveUp { attempts });
            self.stop();
        }
    }
}

fn outcome_of(verified: Result<VerifyOutcome, TransportError>) -> AttemptOutcome {
    match verified {
        Ok(VerifyOutcome { matched: true, .. }) => AttemptOutcome::Matched,
        Ok(VerifyOutcome { reason, .. }) => AttemptOutcome::NotMatched { reason },
        Err(err) => AttemptOutcome::Failed(err),
    }
}
