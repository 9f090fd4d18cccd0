//! In-flight exchange tracking and bounded drain on shutdown

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Result of draining in-flight exchanges
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainResult {
    /// Every exchange reached its terminal state before the deadline
    Complete,
    /// Grace period elapsed with exchanges still running
    Timeout { remaining: usize },
}

struct Inner {
    in_flight: AtomicUsize,
    idle: Notify,
    dispatch_cancel: CancellationToken,
}

/// Counts exchanges between admission and terminal state and refuses new
/// upstream dispatches once shutdown begins.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    inner: Arc<Inner>,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                in_flight: AtomicUsize::new(0),
                idle: Notify::new(),
                dispatch_cancel: CancellationToken::new(),
            }),
        }
    }

    /// Register an exchange; it counts as in flight until the guard drops
    pub fn track(&self) -> ExchangeGuard {
        self.inner.in_flight.fetch_add(1, Ordering::SeqCst);
        ExchangeGuard {
            inner: Arc::clone(&self.inner),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    /// Checked by the engine immediately before each upstream dispatch
    pub fn dispatch_allowed(&self) -> bool {
        !self.inner.dispatch_cancel.is_cancelled()
    }

    pub fn begin_shutdown(&self) {
        info!(in_flight = self.in_flight(), "Refusing new upstream dispatches");
        self.inner.dispatch_cancel.cancel();
    }

    /// Wait until nothing is in flight or `grace` elapses, whichever first
    pub async fn drain(&self, grace: Duration) -> DrainResult {
        let deadline = tokio::time::Instant::now() + grace;
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.in_flight() == 0 {
                info!("All in-flight exchanges drained");
                return DrainResult::Complete;
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                let remaining = self.in_flight();
                if remaining == 0 {
                    return DrainResult::Complete;
                }
                warn!(remaining, "Grace period elapsed with exchanges in flight");
                return DrainResult::Timeout { remaining };
            }
        }
    }
}

/// RAII marker for one in-flight exchange
pub struct ExchangeGuard {
    inner: Arc<Inner>,
}

impl Drop for ExchangeGuard {
    fn drop(&mut self) {
        if self.inner.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.inner.idle.notify_waiters();
        }
    }
}
