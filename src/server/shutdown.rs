//! Process level shutdown request.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::warn;

#[derive(Debug, Default)]
struct ShutdownInner {
    triggered: AtomicBool,
    skip_graceful_termination: AtomicBool,
    notify: Notify,
}

/// Shared handle; the bootstrap code waits on it and tears the services down
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    inner: Arc<ShutdownInner>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only the first request counts
    pub fn trigger(&self, skip_graceful_termination: bool) {
        if self.inner.triggered.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner
            .skip_graceful_termination
            .store(skip_graceful_termination, Ordering::SeqCst);
        warn!(skip_graceful_termination, "Shutdown requested");
        self.inner.notify.notify_waiters();
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.triggered.load(Ordering::SeqCst)
    }

    pub fn skip_graceful_termination(&self) -> bool {
        self.inner.skip_graceful_termination.load(Ordering::SeqCst)
    }

    pub async fn wait(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_triggered() {
                return;
            }
            notified.await;
        }
    }
}
