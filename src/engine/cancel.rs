//! Cancellation handle for a consumer loop.

use std::sync::Arc;
use tokio::sync::watch;

/// Stops one consumer loop. Clones share the same signal.
///
/// The loop checks the token once per iteration and races it against every
/// cooldown, so a cancel lands within one cache round-trip at worst.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Signal cancellation. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// Has cancellation been signaled?
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once cancellation has been signaled.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// Do both handles control the same loop?
    pub fn same_as(&self, other: &CancelToken) -> bool {
        Arc::ptr_eq(&self.tx, &other.tx)
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}
