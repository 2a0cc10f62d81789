//! # Liveness Tasks
//!
//! Periodic tasks of the liveness layer. Each cycle is isolated: an error is logged and the
//! next cycle still runs. A cycle starting later than the liveness timeout after the
//! previous one means the scheduler was starved, which is logged.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::error::Result;
use crate::utils::to_chrono;

/// Last run bookkeeping shared by every liveness task
#[derive(Debug)]
pub struct ScheduleTracker {
    timeout: Duration,
    last_scheduled_execution: Mutex<Option<DateTime<Utc>>>,
}

impl ScheduleTracker {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            last_scheduled_execution: Mutex::new(None),
        }
    }

    pub fn last_scheduled_execution(&self) -> Option<DateTime<Utc>> {
        *self.last_scheduled_execution.lock()
    }

    fn record(&self, now: DateTime<Utc>) {
        *self.last_scheduled_execution.lock() = Some(now);
    }
}

#[async_trait]
pub trait LivenessTask: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Delay before the next cycle
    fn schedule_interval(&self) -> Duration;

    fn tracker(&self) -> &ScheduleTracker;

    async fn on_schedule(&self, now: DateTime<Utc>) -> Result<()>;

    /// One cycle: starvation check, `on_schedule`, bookkeeping. Never fails.
    async fn run(&self, now: DateTime<Utc>) {
        let tracker = self.tracker();
        if let Some(last) = tracker.last_scheduled_execution() {
            let elapsed = now - last;
            if elapsed > to_chrono(tracker.timeout) {
                warn!(
                    task = %self.name(),
                    elapsed_ms = elapsed.num_milliseconds(),
                    timeout_ms = tracker.timeout.as_millis() as u64,
                    "Liveness task was not scheduled in time, the scheduler may be starved"
                );
            }
        }

        if let Err(e) = self.on_schedule(now).await {
            error!(task = %self.name(), error = %e, "Liveness task cycle failed");
        }

        tracker.record(now);
    }
}

/// Owns the loop driving a [`LivenessTask`]
#[derive(Debug)]
pub struct LivenessTaskHandle {
    name: String,
    stop: Arc<Notify>,
    handle: JoinHandle<()>,
}

impl LivenessTaskHandle {
    pub fn spawn<T: LivenessTask>(task: Arc<T>) -> Self {
        let stop = Arc::new(Notify::new());
        let name = task.name().to_string();
        let loop_stop = Arc::clone(&stop);

        let handle = tokio::spawn(async move {
            debug!(task = %task.name(), "Liveness task started");
            loop {
                tokio::select! {
                    _ = loop_stop.notified() => break,
                    _ = tokio::time::sleep(task.schedule_interval()) => {
                        task.run(Utc::now()).await;
                    }
                }
            }
            debug!(task = %task.name(), "Liveness task stopped");
        });

        Self { name, stop, handle }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stops the loop, letting a running cycle finish
    pub async fn close(self) {
        self.stop.notify_one();
        if let Err(e) = self.handle.await {
            error!(task = %self.name, error = %e, "Liveness task ended abnormally");
        }
    }
}
