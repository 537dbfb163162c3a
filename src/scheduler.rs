use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tokio::task::JoinHandle;

/// A single periodic job that can be started, restarted and stopped.
///
/// Starting while a job is already running replaces it, so at most one job is
/// ever active per timer.
#[derive(Default)]
pub struct SnapshotTimer {
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl SnapshotTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns `tick` every `period` on the current tokio runtime. The first tick
    /// fires immediately. Must be called from within a runtime.
    pub fn start<F, Fut>(&self, period: Duration, mut tick: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if !tick().await {
                    log::debug!("snapshot timer owner dropped; exiting");
                    break;
                }
            }
        });

        let mut guard = self.handle.lock().expect("timer poisoned");
        if let Some(previous) = guard.replace(task) {
            previous.abort();
            log::info!("snapshot timer restarted period_secs={}", period.as_secs());
        } else {
            log::info!("snapshot timer started period_secs={}", period.as_secs());
        }
    }

    /// Returns `true` if a running job was stopped.
    pub fn stop(&self) -> bool {
        let mut guard = self.handle.lock().expect("timer poisoned");
        match guard.take() {
            Some(handle) => {
                handle.abort();
                log::info!("snapshot timer stopped");
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        let guard = self.handle.lock().expect("timer poisoned");
        guard.as_ref().is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for SnapshotTimer {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.handle.lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
    }
}
