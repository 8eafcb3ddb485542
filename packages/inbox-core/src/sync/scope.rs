//! Focus scopes.
//!
//! A `FocusScope` belongs to one screen. Display refreshes started while the
//! screen is focused are tracked here and aborted on blur. Sends and consent
//! writes are never registered with a scope.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Notify;
use tokio::task::AbortHandle;

/// Cancellation handle for display refresh work tied to a screen's focus
#[derive(Debug, Default)]
pub struct FocusScope {
    /// Bumped on every cancel
    epoch: AtomicU64,
    /// Spawned refreshes to abort on cancel
    tasks: Mutex<Vec<AbortHandle>>,
    /// Wakes `cancelled` waiters
    notify: Notify,
}

impl FocusScope {
    /// Create an uncancelled scope
    pub fn new() -> Self {
        Self::default()
    }

    /// Current epoch; work started under an older epoch is stale
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Register a spawned display refresh
    pub fn track(&self, handle: AbortHandle) {
        let mut tasks = self.tasks.lock();
        tasks.retain(|h| !h.is_finished());
        tasks.push(handle);
    }

    /// Abort every tracked refresh and wake anything waiting on `cancelled`
    pub fn cancel(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        let tasks: Vec<AbortHandle> = self.tasks.lock().drain(..).collect();
        for task in &tasks {
            task.abort();
        }
        self.notify.notify_waiters();

        if !tasks.is_empty() {
            tracing::debug!("Focus scope cancelled {} refresh task(s)", tasks.len());
        }
    }

    /// Resolves once the scope has been cancelled after `since`
    pub async fn cancelled(&self, since: u64) {
        loop {
            let notified = self.notify.notified();
            if self.epoch() != since {
                return;
            }
            notified.await;
        }
    }

    /// Number of refreshes still running
    pub fn pending(&self) -> usize {
        let mut tasks = self.tasks.lock();
        tasks.retain(|h| !h.is_finished());
        tasks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_cancel_aborts_tracked_tasks() {
        let scope = FocusScope::new();
        let task = tokio::spawn(std::future::pending::<()>());
        scope.track(task.abort_handle());
        assert_eq!(scope.pending(), 1);

        scope.cancel();

        assert!(task.await.unwrap_err().is_cancelled());
        assert_eq!(scope.pending(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_wakes_waiter() {
        let scope = Arc::new(FocusScope::new());
        let since = scope.epoch();

        let waiter = {
            let scope = scope.clone();
            tokio::spawn(async move { scope.cancelled(since).await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        scope.cancel();
        waiter.await.unwrap();
        assert_eq!(scope.epoch(), since + 1);
    }

    #[test]
    fn test_cancelled_returns_immediately_for_old_epoch() {
        let scope = FocusScope::new();
        scope.cancel();
        tokio_test::block_on(scope.cancelled(0));
    }
}
