//! Scheduler constants and the background sync loop.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;

use crate::errors::Error;

use super::retry_policy::backoff_seconds;
use super::sync_coordinator::SyncCoordinator;

/// Background pull cadence in seconds.
pub const BACKGROUND_SYNC_INTERVAL_SECS: u64 = 15 * 60;

/// Attempts per remote call, including the first one.
pub const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 3;

/// Delay before the second attempt; doubles for every further attempt.
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 1_000;

/// Deadline for a single remote attempt.
pub const DEFAULT_ATTEMPT_TIMEOUT_SECS: u64 = 30;

/// Replays before a failed mirror is dead-lettered.
pub const OUTBOX_MAX_ATTEMPTS: u32 = 5;

/// Periodic background sync for one session.
#[derive(Default)]
pub struct BackgroundSync {
    task: Mutex<Option<JoinHandle<()>>>,
    wake: Arc<Notify>,
}

impl BackgroundSync {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn the loop unless it is already running. The first pass runs
    /// after one `interval`, or as soon as the network comes back.
    pub async fn start(&self, coordinator: Arc<SyncCoordinator>, interval: Duration) {
        let mut guard = self.task.lock().await;
        if let Some(handle) = guard.as_ref() {
            if !handle.is_finished() {
                return;
            }
            guard.take();
        }

        let wake = Arc::clone(&self.wake);
        let handle = tokio::spawn(async move {
            let mut consecutive_failures: u32 = 0;
            let mut delay = interval;
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = wake.notified() => {
                        debug!("[Sync] Network restored; running background sync now");
                    }
                }

                match coordinator.perform_background_sync().await {
                    Ok(report) => {
                        consecutive_failures = 0;
                        delay = interval;
                        debug!(
                            "[Sync] Background cycle complete groups={} cards={}",
                            report.groups_synced, report.cards_synced
                        );
                    }
                    Err(Error::SyncInProgress) => {
                        delay = interval;
                    }
                    Err(err) => {
                        consecutive_failures = consecutive_failures.saturating_add(1);
                        let backoff =
                            Duration::from_secs(backoff_seconds(consecutive_failures - 1));
                        delay = interval.min(backoff);
                        warn!(
                            "[Sync] Background cycle failed ({} in a row), next attempt in {}s: {}",
                            consecutive_failures,
                            delay.as_secs(),
                            err
                        );
                    }
                }
            }
        });
        *guard = Some(handle);
        info!(
            "[Sync] Background sync started (every {}s)",
            interval.as_secs()
        );
    }

    /// Run the next background pass right away.
    pub fn notify_network_restored(&self) {
        self.wake.notify_one();
    }

    pub async fn stop(&self) {
        let mut guard = self.task.lock().await;
        if let Some(handle) = guard.take() {
            handle.abort();
            info!("[Sync] Background sync stopped");
        }
    }

    pub async fn is_running(&self) -> bool {
        let guard = self.task.lock().await;
        guard.as_ref().is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for BackgroundSync {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.task.try_lock() {
            if let Some(handle) = guard.take() {
                warn!("[Sync] Background sync dropped without stop(); aborting loop");
                handle.abort();
            }
        }
    }
}
