//! In-memory port implementations for unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::error::{CaptureError, DeviceError, TransportError};
use crate::frame::{Frame, PixelLayout};
use crate::ports::{
    AttendanceNotifier, CameraDevice, CameraSession, DialogShell, FeedInfo, SettingsSource,
    Signal, Verifier,
};
use crate::scheduler::{Scheduler, TickFn, TriggerHandle};
use crate::types::{CapturedImage, EmployeeId, VerifyOutcome};

// --- camera ---

/// Holds `grab_frame` on its blocking thread until opened.
#[derive(Default)]
pub struct GrabGate {
    entered: AtomicUsize,
    open: Mutex<bool>,
    opened: Condvar,
}

impl GrabGate {
    /// Grabs that have reached the gate.
    pub fn entered(&self) -> usize {
        self.entered.load(Ordering::SeqCst)
    }

    pub fn open(&self) {
        *self.open.lock().unwrap() = true;
        self.opened.notify_all();
    }

    fn pass(&self) {
        self.entered.fetch_add(1, Ordering::SeqCst);
        let mut open = self.open.lock().unwrap();
        while !*open {
            open = self.opened.wait(open).unwrap();
        }
    }
}

pub struct FakeSession {
    dims: Option<(u32, u32)>,
    empty_frames: bool,
    short_frames: bool,
    gate: Option<Arc<GrabGate>>,
    tracks: Arc<AtomicUsize>,
    grabs: usize,
    sequence: u32,
}

impl FakeSession {
    pub fn ready(width: u32, height: u32) -> Self {
        Self {
            dims: Some((width, height)),
            empty_frames: false,
            short_frames: false,
            gate: None,
            tracks: Arc::new(AtomicUsize::new(1)),
            grabs: 0,
            sequence: 0,
        }
    }

    pub fn not_ready() -> Self {
        Self {
            dims: None,
            ..Self::ready(0, 0)
        }
    }

    pub fn with_empty_frames(mut self) -> Self {
        self.empty_frames = true;
        self
    }

    /// Frames whose buffer is shorter than their dimensions need.
    pub fn with_short_frames(mut self) -> Self {
        self.short_frames = true;
        self
    }

    pub fn gated(mut self, gate: Arc<GrabGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn grabs(&self) -> usize {
        self.grabs
    }

    pub fn tracks(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.tracks)
    }
}

impl CameraSession for FakeSession {
    fn dimensions(&self) -> Option<(u32, u32)> {
        if self.tracks.load(Ordering::SeqCst) == 0 {
            return None;
        }
        self.dims
    }

    fn grab_frame(&mut self) -> Result<Frame, CaptureError> {
        let (width, height) = self.dims.ok_or(CaptureError::NoActiveFrame)?;
        if let Some(gate) = &self.gate {
            gate.pass();
        }
        self.grabs += 1;
        self.sequence += 1;
        if self.empty_frames {
            return Ok(Frame {
                data: Vec::new(),
                width,
                height,
                layout: PixelLayout::Rgb8,
                sequence: self.sequence,
            });
        }
        // Each grab differs so stills from different ticks are distinguishable.
        let value = (self.sequence as u8).wrapping_mul(60);
        let mut len = (width * height * 3) as usize;
        if self.short_frames {
            len /= 2;
        }
        Ok(Frame {
            data: vec![value; len],
            width,
            height,
            layout: PixelLayout::Rgb8,
            sequence: self.sequence,
        })
    }

    fn active_tracks(&self) -> usize {
        self.tracks.load(Ordering::SeqCst)
    }

    fn stop_tracks(&mut self) {
        self.tracks.store(0, Ordering::SeqCst);
    }

    fn label(&self) -> String {
        "fake".into()
    }
}

type SessionFactory = Box<dyn Fn() -> FakeSession + Send + Sync>;

#[derive(Default)]
pub struct FakeCamera {
    deny: bool,
    not_ready: bool,
    make: Option<SessionFactory>,
    gate: Option<Arc<Notify>>,
    opened: AtomicUsize,
    tracks: Mutex<Vec<Arc<AtomicUsize>>>,
}

impl FakeCamera {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn denied() -> Self {
        Self {
            deny: true,
            ..Self::default()
        }
    }

    pub fn not_ready() -> Self {
        Self {
            not_ready: true,
            ..Self::default()
        }
    }

    /// Every `open` hands out a session built by `make`.
    pub fn with_sessions(make: impl Fn() -> FakeSession + Send + Sync + 'static) -> Self {
        Self {
            make: Some(Box::new(make)),
            ..Self::default()
        }
    }

    /// `open` waits until the returned notify is signalled.
    pub fn gated() -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        let camera = Self {
            gate: Some(Arc::clone(&gate)),
            ..Self::default()
        };
        (camera, gate)
    }

    pub fn sessions_opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Tracks still live across every session ever opened.
    pub fn live_tracks(&self) -> usize {
        self.tracks
            .lock()
            .unwrap()
            .iter()
            .map(|t| t.load(Ordering::SeqCst))
            .sum()
    }
}

#[async_trait]
impl CameraDevice for FakeCamera {
    async fn open(&self) -> Result<Box<dyn CameraSession>, DeviceError> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if self.deny {
            return Err(DeviceError::PermissionDenied("fake".into()));
        }
        let session = if let Some(make) = &self.make {
            make()
        } else if self.not_ready {
            FakeSession::not_ready()
        } else {
            FakeSession::ready(16, 12)
        };
        self.opened.fetch_add(1, Ordering::SeqCst);
        self.tracks.lock().unwrap().push(session.tracks());
        Ok(Box::new(session))
    }
}

// --- verifier ---

#[derive(Debug, Clone, Copy)]
pub enum Script {
    Match,
    NoMatch,
    Fail,
    Hang,
}

#[derive(Default)]
pub struct FakeVerifier {
    script: Mutex<VecDeque<Script>>,
    gated: AtomicBool,
    pub entered: Notify,
    pub release: Notify,
    calls: Mutex<Vec<(EmployeeId, Vec<u8>, bool)>>,
    current: AtomicUsize,
    max_concurrent: AtomicUsize,
}

impl FakeVerifier {
    pub fn scripted(script: impl IntoIterator<Item = Script>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Hold every call until `release` is signalled; `entered` fires on entry.
    pub fn gate(&self) {
        self.gated.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<(EmployeeId, Vec<u8>, bool)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Verifier for FakeVerifier {
    async fn verify(
        &self,
        employee_id: EmployeeId,
        image: &CapturedImage,
        checkout: bool,
    ) -> Result<VerifyOutcome, TransportError> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent.fetch_max(now, Ordering::SeqCst);
        self.calls
            .lock()
            .unwrap()
            .push((employee_id, image.jpeg.clone(), checkout));

        if self.gated.load(Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }

        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Script::NoMatch);
        if let Script::Hang = step {
            std::future::pending::<()>().await;
        }
        self.current.fetch_sub(1, Ordering::SeqCst);

        match step {
            Script::Match => Ok(VerifyOutcome::matched()),
            Script::NoMatch => Ok(VerifyOutcome::not_matched(Some("no face".into()))),
            Script::Fail => Err(TransportError::Status(502)),
            Script::Hang => unreachable!(),
        }
    }
}

// --- notifier / settings ---

#[derive(Default)]
pub struct FakeNotifier {
    fail: bool,
    events: Mutex<Vec<bool>>,
    uploads: Mutex<Vec<(EmployeeId, Vec<u8>, bool)>>,
}

impl FakeNotifier {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn events(&self) -> Vec<bool> {
        self.events.lock().unwrap().clone()
    }

    pub fn uploads(&self) -> Vec<(EmployeeId, Vec<u8>, bool)> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl AttendanceNotifier for FakeNotifier {
    async fn record_event(&self, checkout: bool) -> Result<(), TransportError> {
        self.events.lock().unwrap().push(checkout);
        if self.fail {
            return Err(TransportError::Status(500));
        }
        Ok(())
    }

    async fn upload_capture_artifact(
        &self,
        employee_id: EmployeeId,
        image: &CapturedImage,
        checkout: bool,
    ) -> Result<(), TransportError> {
        self.uploads
            .lock()
            .unwrap()
            .push((employee_id, image.jpeg.clone(), checkout));
        if self.fail {
            return Err(TransportError::Status(500));
        }
        Ok(())
    }
}

pub struct FakeSettings {
    enabled: Option<bool>,
    reads: AtomicUsize,
}

impl FakeSettings {
    pub fn enabled() -> Self {
        Self {
            enabled: Some(true),
            reads: AtomicUsize::new(0),
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: Some(false),
            reads: AtomicUsize::new(0),
        }
    }

    pub fn unreachable() -> Self {
        Self {
            enabled: None,
            reads: AtomicUsize::new(0),
        }
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SettingsSource for FakeSettings {
    async fn face_recognition_enabled(&self) -> Result<bool, TransportError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.enabled
            .ok_or_else(|| TransportError::Http("connection refused".into()))
    }
}

// --- shell ---

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellEvent {
    BindLive,
    ShowLive,
    ShowStill,
    Flash,
    Notify(Signal),
    Close,
}

#[derive(Default)]
pub struct RecordingShell {
    events: Mutex<Vec<ShellEvent>>,
}

impl RecordingShell {
    pub fn events(&self) -> Vec<ShellEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn signals(&self) -> Vec<Signal> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ShellEvent::Notify(signal) => Some(signal),
                _ => None,
            })
            .collect()
    }

    pub fn closes(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| **e == ShellEvent::Close)
            .count()
    }

    /// Whether the live feed is currently on screen.
    pub fn showing_live(&self) -> bool {
        self.events()
            .iter()
            .rev()
            .find_map(|e| match e {
                ShellEvent::BindLive | ShellEvent::ShowLive => Some(true),
                ShellEvent::ShowStill => Some(false),
                _ => None,
            })
            .unwrap_or(false)
    }

    fn push(&self, event: ShellEvent) {
        self.events.lock().unwrap().push(event);
    }
}

impl DialogShell for RecordingShell {
    fn bind_live(&self, _feed: &FeedInfo) {
        self.push(ShellEvent::BindLive);
    }

    fn show_live(&self) {
        self.push(ShellEvent::ShowLive);
    }

    fn show_still(&self, _image: &CapturedImage) {
        self.push(ShellEvent::ShowStill);
    }

    fn flash(&self) {
        self.push(ShellEvent::Flash);
    }

    fn notify(&self, signal: Signal) {
        self.push(ShellEvent::Notify(signal));
    }

    fn close(&self) {
        self.push(ShellEvent::Close);
    }
}

// --- scheduler ---

/// Scheduler whose ticks only fire when the test says so.
#[derive(Default)]
pub struct ManualScheduler {
    triggers: Mutex<Vec<(Duration, TickFn, CancellationToken)>>,
}

impl ManualScheduler {
    pub fn scheduled(&self) -> usize {
        self.triggers.lock().unwrap().len()
    }

    pub fn active(&self) -> usize {
        self.triggers
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, _, token)| !token.is_cancelled())
            .count()
    }

    pub fn period(&self) -> Option<Duration> {
        self.triggers.lock().unwrap().last().map(|(p, _, _)| *p)
    }

    /// Run one tick of the live trigger to completion. Returns false if
    /// no trigger is active.
    pub async fn fire(&self) -> bool {
        let tick = self
            .triggers
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(_, _, token)| !token.is_cancelled())
            .map(|(_, tick, _)| Arc::clone(tick));
        match tick {
            Some(tick) => {
                tick().await;
                true
            }
            None => false,
        }
    }
}

impl Scheduler for ManualScheduler {
    fn schedule_every(&self, period: Duration, tick: TickFn) -> TriggerHandle {
        let token = CancellationToken::new();
        self.triggers
            .lock()
            .unwrap()
            .push((period, tick, token.clone()));
        TriggerHandle::new(token)
    }
}
