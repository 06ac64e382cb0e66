//! Hosts one capture dialog from open to close.

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use clockface_client::RpcClient;
use clockface_core::{
    AttendanceNotifier, CaptureLoop, Collaborators, DialogContext, LoopError, Signal,
    TokioScheduler,
};
use clockface_hw::V4lCamera;

use crate::config::Config;
use crate::shell::TerminalShell;

/// How a dialog ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialogOutcome {
    /// Face matched and the attendance event was submitted.
    Recorded { checkout: bool },
    /// Face recognition is off; the event was recorded without a capture.
    RecordedWithoutFace { checkout: bool },
    /// Face matched but the server did not take the attendance event.
    RecordFailed { checkout: bool, reason: String },
    GaveUp { attempts: u32 },
    Cancelled,
}

/// Run a check-in/check-out dialog against the configured camera and
/// server until it closes or Ctrl-C is pressed.
pub async fn run(config: &Config, ctx: DialogContext) -> Result<DialogOutcome> {
    let client = Arc::new(RpcClient::new(config.client_config())?);
    let shell = Arc::new(TerminalShell::new());
    let ports = Collaborators {
        camera: Arc::new(V4lCamera::new(config.camera_config())),
        verifier: client.clone(),
        notifier: client.clone(),
        settings: client.clone(),
        shell: shell.clone(),
        scheduler: Arc::new(TokioScheduler),
    };
    let capture = CaptureLoop::new(ctx, config.loop_config(), ports);

    drive(&capture, &shell, client.as_ref(), async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    })
    .await
}

/// Start `capture` and wait for the shell to close or `interrupt` to fire.
pub(crate) async fn drive(
    capture: &CaptureLoop,
    shell: &TerminalShell,
    notifier: &dyn AttendanceNotifier,
    interrupt: impl Future<Output = ()>,
) -> Result<DialogOutcome> {
    let ctx = capture.context();

    match capture.start().await {
        Ok(()) => {}
        Err(LoopError::FaceRecognitionDisabled) => {
            notifier
                .record_event(ctx.checkout)
                .await
                .with_context(|| format!("failed to record {}", ctx.direction()))?;
            tracing::info!(
                employee = %ctx.employee_id,
                direction = ctx.direction(),
                "attendance recorded without face verification"
            );
            return Ok(DialogOutcome::RecordedWithoutFace {
                checkout: ctx.checkout,
            });
        }
        Err(e) => return Err(e).context("could not start capture"),
    }

    tokio::select! {
        _ = shell.closed() => {}
        _ = interrupt => {
            capture.cancel();
            return Ok(DialogOutcome::Cancelled);
        }
    }

    match shell.last_signal() {
        Some(Signal::Matched { checkout }) => Ok(DialogOutcome::Recorded { checkout }),
        Some(Signal::RecordFailed { checkout, reason }) => {
            Ok(DialogOutcome::RecordFailed { checkout, reason })
        }
        Some(Signal::GaveUp { attempts }) => Ok(DialogOutcome::GaveUp { attempts }),
        // The shell only closes on its own after a match or giving up.
        _ => Ok(DialogOutcome::Cancelled),
    }
}
