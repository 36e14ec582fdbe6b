//! Owned background timers.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// A periodic background task owned by whoever holds the handle.
///
/// The first tick fires one full `period` after spawning. Dropping the handle
/// aborts the task; [`PeriodicTask::shutdown`] stops it gracefully and waits
/// for an in-flight tick to finish.
#[derive(Debug)]
pub struct PeriodicTask {
    name: &'static str,
    shutdown: Arc<Notify>,
    join: Option<JoinHandle<()>>,
}

impl PeriodicTask {
    /// Spawn `tick` every `period` on the current tokio runtime.
    ///
    /// Panics if `period` is zero (same contract as `tokio::time::interval`).
    pub fn spawn<F, Fut>(name: &'static str, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let shutdown = Arc::new(Notify::new());
        let signal = shutdown.clone();

        let join = tokio::spawn(async move {
            tracing::debug!(task = name, ?period, "periodic task started");

            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = signal.notified() => break,
                    _ = interval.tick() => tick().await,
                }
            }

            tracing::debug!(task = name, "periodic task stopped");
        });

        Self {
            name,
            shutdown,
            join: Some(join),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_running(&self) -> bool {
        self.join.as_ref().is_some_and(|j| !j.is_finished())
    }

    /// Signal the task to stop and wait for it to exit.
    pub async fn shutdown(mut self) {
        self.shutdown.notify_one();
        if let Some(join) = self.join.take() {
            if let Err(err) = join.await {
                if !err.is_cancelled() {
                    tracing::warn!(task = self.name, "periodic task panicked: {err}");
                }
            }
        }
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        if let Some(join) = self.join.take() {
            join.abort();
        }
    }
}
