//! Cooperative cancellation primitive threaded through every long-running call.
//!
//! Kept as a small hand-rolled type rather than a dependency — the same preference the
//! teacher crate shows for `SHARED_HTTP_CLIENT`'s `lazy_static` singleton and its own
//! connection pool over pulling in a crate for something this size.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// A cloneable, cooperative cancellation flag.
///
/// Consumers poll [`is_cancelled`](CancellationToken::is_cancelled) at suspension
/// points (before/after a model call, before/after a tool call, before a checkpoint
/// write) and bail out at the next one after [`cancel`](CancellationToken::cancel) is
/// called. Cancellation is non-destructive: whatever was appended to an
/// [`crate::context::AgentContext`] before the cancel point remains valid.
#[derive(Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Trip the token. Idempotent: cancelling an already-cancelled token is a no-op.
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            self.notify.notify_waiters();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves immediately if already cancelled, otherwise waits for [`cancel`](Self::cancel).
    /// Intended to be raced against the real operation with `tokio::select!`.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        self.notify.notified().await;
    }
}
