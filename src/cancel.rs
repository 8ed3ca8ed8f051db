//! Cooperative cancellation shared by every job of a run.
//!
//! Cancelling kills the child process of the running strategy, removes the
//! job workspace and makes the job return [`crate::RotoError::Cancelled`].
//! Jobs that have not started yet fail the same way without spawning anything.

use std::sync::Arc;
use tokio::sync::watch;

/// A cloneable cancellation flag. All clones observe the same state.
#[derive(Clone, Debug)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once [`cancel`](Self::cancel) has been called on any clone.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                // Sender gone: nobody can cancel any more.
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn starts_uncancelled() {
        assert!(!CancelToken::new().is_cancelled());
    }

    #[test]
    fn clones_share_state() {
        let a = CancelToken::new();
        let b = a.clone();
        b.cancel();
        assert!(a.is_cancelled());
        b.cancel();
        assert!(a.is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_resolves_after_cancel() {
        let token = CancelToken::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move { waiter.cancelled().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("cancelled() did not resolve")
            .unwrap();
    }

    #[tokio::test]
    async fn cancelled_is_immediate_when_already_cancelled() {
        let token = CancelToken::new();
        token.cancel();
        tokio::time::timeout(Duration::from_millis(100), token.cancelled())
            .await
            .expect("should resolve immediately");
    }

    #[tokio::test]
    async fn cancelled_stays_pending_otherwise() {
        let token = CancelToken::new();
        let r = tokio::time::timeout(Duration::from_millis(50), token.cancelled()).await;
        assert!(r.is_err());
    }
}
