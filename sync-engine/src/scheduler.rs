//! Refresh scheduling
//!
//! Each tracked collection gets one task: a mount refresh, then interval
//! ticks (skipped while hidden) and a refresh whenever the view becomes
//! visible again. Every task listens on one cancellation token, so a single
//! [`SchedulerHandle::stop`] tears all of them down.

use crate::reconciler::{Refresh, RefreshTrigger};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Whether the presentation layer is currently showing the view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    /// Shown
    #[default]
    Visible,
    /// Backgrounded
    Hidden,
}

/// One collection to keep fresh
pub struct ScheduledRefresh {
    /// Refresh entry point
    pub target: Arc<dyn Refresh>,

    /// Interval period, `None` for mount and visibility triggers only
    pub period: Option<Duration>,
}

/// Teardown handle for a running schedule
#[derive(Debug)]
pub struct SchedulerHandle {
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Stop every refresh task. Idempotent.
    pub fn stop(&self) {
        if !self.token.is_cancelled() {
            info!("Stopping refresh scheduler");
            self.token.cancel();
        }
    }

    /// Whether [`stop`](Self::stop) was called
    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Stop and wait for every task to exit
    pub async fn shutdown(mut self) {
        self.stop();
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!("Refresh task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Spawn one refresh task per scheduled collection
pub fn spawn(schedule: Vec<ScheduledRefresh>, visibility: watch::Receiver<Visibility>) -> SchedulerHandle {
    let token = CancellationToken::new();

    let tasks = schedule
        .into_iter()
        .map(|entry| {
            info!(
                kind = %entry.target.kind(),
                period_secs = entry.period.map(|p| p.as_secs()),
                "Scheduling refresh"
            );
            tokio::spawn(run(entry, visibility.clone(), token.child_token()))
        })
        .collect();

    SchedulerHandle { token, tasks }
}

async fn run(entry: ScheduledRefresh, mut visibility: watch::Receiver<Visibility>, token: CancellationToken) {
    let ScheduledRefresh { target, period } = entry;

    refresh(target.as_ref(), RefreshTrigger::Mount, &token).await;

    let mut ticker = period.map(|period| {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker
    });
    let mut visibility_open = true;

    loop {
        tokio::select! {
            biased;

            _ = token.cancelled() => break,

            _ = next_tick(&mut ticker) => {
                if *visibility.borrow() == Visibility::Visible {
                    refresh(target.as_ref(), RefreshTrigger::Interval, &token).await;
                } else {
                    debug!(kind = %target.kind(), "hidden, skipping interval refresh");
                }
            }

            changed = visibility.changed(), if visibility_open => {
                if changed.is_err() {
                    visibility_open = false;
                    continue;
                }
                let now = *visibility.borrow_and_update();
                if now == Visibility::Visible {
                    refresh(target.as_ref(), RefreshTrigger::Visibility, &token).await;
                }
            }
        }
    }

    debug!(kind = %target.kind(), "refresh task stopped");
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Run one refresh unless cancelled first. Failures were already surfaced
/// by the reconciler.
async fn refresh(target: &dyn Refresh, trigger: RefreshTrigger, token: &CancellationToken) {
    tokio::select! {
        biased;
        _ = token.cancelled() => {}
        result = target.refresh(trigger) => {
            if let Err(e) = result {
                debug!(kind = %target.kind(), %trigger, "scheduled refresh failed: {}", e);
            }
        }
    }
}
