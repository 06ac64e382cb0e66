//! Terminal stand-in for the kiosk capture dialog.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use clockface_core::{CapturedImage, DialogShell, FeedInfo, Signal};
use tokio::sync::Notify;

/// Prints user-facing messages to stdout and reports when the loop asks
/// for the dialog to close.
#[derive(Default)]
pub struct TerminalShell {
    closed: Notify,
    is_closed: AtomicBool,
    last_signal: Mutex<Option<Signal>>,
}

impl TerminalShell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves once [`DialogShell::close`] has been called.
    pub async fn closed(&self) {
        if self.is_closed.load(Ordering::Acquire) {
            return;
        }
        self.closed.notified().await;
    }

    pub fn last_signal(&self) -> Option<Signal> {
        self.last_signal
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn say(&self, line: &str) {
        let mut out = std::io::stdout().lock();
        let _ = writeln!(out, "{line}");
    }
}

impl DialogShell for TerminalShell {
    fn bind_live(&self, feed: &FeedInfo) {
        self.say(&format!(
            "Camera {} live ({}x{}). Look at the camera...",
            feed.label, feed.width, feed.height
        ));
    }

    fn show_live(&self) {
        tracing::trace!("live view restored");
    }

    fn show_still(&self, image: &CapturedImage) {
        tracing::debug!(
            width = image.width,
            height = image.height,
            bytes = image.jpeg.len(),
            "still captured"
        );
    }

    fn flash(&self) {
        self.say("*click*");
    }

    fn notify(&self, signal: Signal) {
        self.say(&signal.message());
        *self.last_signal.lock().unwrap_or_else(|e| e.into_inner()) = Some(signal);
    }

    fn close(&self) {
        if !self.is_closed.swap(true, Ordering::AcqRel) {
            // notify_one keeps a permit if nobody is waiting yet.
            self.closed.notify_one();
        }
    }
}
