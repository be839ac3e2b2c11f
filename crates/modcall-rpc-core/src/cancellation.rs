//! Cooperative cancellation for sessions and the calls they dispatch.
//!
//! Every session owns one handle. The listener derives session handles from its
//! own shutdown handle, so stopping the listener cancels every in-flight session;
//! the request-timeout stage cancels a single session. Nothing is aborted
//! preemptively: downstream code polls [`CancellationHandle::check`] or awaits
//! [`CancellationHandle::cancelled`] and returns early.

use tokio_util::sync::CancellationToken;

use crate::error::RpcError;

/// Clone-friendly cancellation signal shared by a session and its call
#[derive(Debug, Clone, Default)]
pub struct CancellationHandle {
    token: CancellationToken,
}

impl CancellationHandle {
    /// Create a new (not-yet-cancelled) handle
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive a handle that is cancelled whenever this one is, but can also be
    /// cancelled on its own without affecting the parent.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
        }
    }

    /// Signal cancellation. Idempotent.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Fail with [`RpcError::Cancelled`] once cancellation was requested
    pub fn check(&self) -> Result<(), RpcError> {
        if self.is_cancelled() {
            Err(RpcError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Wait until cancellation is requested; returns immediately if it already was
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_new_handle_not_cancelled() {
        let handle = CancellationHandle::new();
        assert!(!handle.is_cancelled());
        assert!(handle.check().is_ok());
    }

    #[tokio::test]
    async fn test_cancel_idempotent() {
        let handle = CancellationHandle::new();
        handle.cancel();
        handle.cancel();
        assert!(handle.is_cancelled());
        assert!(matches!(handle.check(), Err(RpcError::Cancelled)));
    }

    #[tokio::test]
    async fn test_clone_shares_state() {
        let handle = CancellationHandle::new();
        let clone = handle.clone();
        handle.cancel();
        assert!(clone.is_cancelled());
    }

    #[tokio::test]
    async fn test_parent_cancels_children_but_not_the_reverse() {
        let listener = CancellationHandle::new();
        let first = listener.child();
        let second = listener.child();

        first.cancel();
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
        assert!(!listener.is_cancelled());

        listener.cancel();
        assert!(second.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_future_resolves() {
        let handle = CancellationHandle::new();
        let clone = handle.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            clone.cancel();
        });

        tokio::time::timeout(Duration::from_secs(1), handle.cancelled())
            .await
            .expect("cancelled() should resolve within timeout");
    }
}
