//! Recurring trigger abstraction.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Future produced by one trigger.
pub type TickFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Callback run on every trigger. Each call yields an independent future.
pub type TickFn = Arc<dyn Fn() -> TickFuture + Send + Sync>;

/// Schedules a recurring trigger.
pub trait Scheduler: Send + Sync {
    /// Call `tick` every `period`, first firing one period from now.
    fn schedule_every(&self, period: Duration, tick: TickFn) -> TriggerHandle;
}

/// Handle to a scheduled trigger. Dropping it cancels the trigger.
#[derive(Debug)]
pub struct TriggerHandle {
    token: CancellationToken,
}

impl TriggerHandle {
    pub fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for TriggerHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Wall-clock scheduler backed by `tokio::time::interval`.
///
/// Each tick is spawned as its own task so a slow attempt never delays
/// the trigger; overlapping attempts are rejected by the loop's
/// in-flight guard instead. Must be called from within a tokio runtime.
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn schedule_every(&self, period: Duration, tick: TickFn) -> TriggerHandle {
        let token = CancellationToken::new();
        let cancelled = token.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        tokio::spawn(tick());
                    }
                    _ = cancelled.cancelled() => {
                        tracing::debug!("trigger cancelled");
                        break;
                    }
                }
            }
        });

        TriggerHandle::new(token)
    }
}
