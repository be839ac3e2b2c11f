use async_trait::async_trait;
use std::time::Duration;
use tracing::warn;

use modcall_rpc_core::RpcError;

use crate::middleware::{Next, SessionMiddleware};
use crate::session::Session;

/// Puts a deadline on everything inside it.
///
/// On expiry the session's cancellation signal fires and the stage fails with
/// [`RpcError::Timeout`]; the inner stages are dropped at their next await point.
#[derive(Debug, Clone, Copy)]
pub struct RequestTimeout {
    timeout: Duration,
}

impl RequestTimeout {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl SessionMiddleware for RequestTimeout {
    async fn handle(&self, session: &mut Session, next: Next<'_>) -> Result<(), RpcError> {
        let cancellation = session.cancellation().clone();
        let session_id = session.id();

        match tokio::time::timeout(self.timeout, next.run(session)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(session_id = %session_id, timeout = ?self.timeout, "request deadline expired");
                cancellation.cancel();
                Err(RpcError::Timeout(self.timeout))
            }
        }
    }

    fn name(&self) -> &'static str {
        "request_timeout"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::MiddlewareStack;
    use crate::session::SessionRequest;
    use bytes::Bytes;
    use http::{HeaderMap, Method};
    use modcall_rpc_core::CancellationHandle;
    use std::sync::Arc;
    use tracing_test::traced_test;

    struct Sleeping(Duration);

    #[async_trait]
    impl SessionMiddleware for Sleeping {
        async fn handle(&self, _session: &mut Session, _next: Next<'_>) -> Result<(), RpcError> {
            tokio::time::sleep(self.0).await;
            Ok(())
        }
    }

    fn session() -> Session {
        Session::new(
            SessionRequest::new(
                Method::POST,
                "/rpc".parse().unwrap(),
                HeaderMap::new(),
                Ok(Bytes::new()),
            ),
            CancellationHandle::new(),
        )
    }

    fn stack(timeout: Duration, work: Duration) -> MiddlewareStack {
        let mut stack = MiddlewareStack::new();
        stack.push(Arc::new(RequestTimeout::new(timeout)));
        stack.push(Arc::new(Sleeping(work)));
        stack
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn test_expiry_cancels_session() {
        let stack = stack(Duration::from_secs(1), Duration::from_secs(5));
        let mut session = session();

        let err = stack.run(&mut session).await.unwrap_err();
        assert!(matches!(err, RpcError::Timeout(d) if d == Duration::from_secs(1)));
        assert!(session.cancellation().is_cancelled());
        assert!(logs_contain("request deadline expired"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_request_is_untouched() {
        let stack = stack(Duration::from_secs(1), Duration::from_millis(10));
        let mut session = session();

        stack.run(&mut session).await.unwrap();
        assert!(!session.cancellation().is_cancelled());
    }
}
