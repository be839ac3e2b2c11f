//! Outermost stage: turns every escaping failure into a response

use async_trait::async_trait;
use futures::FutureExt;
use http::header::{HeaderValue, RETRY_AFTER};
use http::StatusCode;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use tracing::{error, warn};

use modcall_rpc_core::{ResponseEnvelope, RpcError};

use crate::middleware::{Next, SessionMiddleware};
use crate::session::Session;

/// Catches failures and panics from every inner stage.
///
/// Whatever happens downstream, the session leaves this stage with a written
/// and closed response, and the stage itself always returns `Ok`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExceptionCatcher;

impl ExceptionCatcher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SessionMiddleware for ExceptionCatcher {
    async fn handle(&self, session: &mut Session, next: Next<'_>) -> Result<(), RpcError> {
        let outcome = AssertUnwindSafe(next.run(session)).catch_unwind().await;

        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(err),
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(session_id = %session.id(), panic = %message, "session handler panicked");
                Some(RpcError::unhandled(message))
            }
        };

        match failure {
            Some(err) => {
                log_failure(session, &err);
                write_error(session, &err);
            }
            None if !session.response.is_written() => {
                if session.cancellation().is_cancelled() {
                    write_error(session, &RpcError::Cancelled);
                } else {
                    session.response.write_empty(StatusCode::NO_CONTENT);
                }
            }
            None => {}
        }

        session.response.close();
        Ok(())
    }

    fn name(&self) -> &'static str {
        "exception_catcher"
    }
}

fn log_failure(session: &Session, err: &RpcError) {
    let status = err.status_code();
    if status >= 500 {
        error!(session_id = %session.id(), status, error = %err, "call failed");
    } else {
        warn!(session_id = %session.id(), status, error = %err, "call rejected");
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Write `err` to the session response.
///
/// Failures raised before dispatch go out as `text/html`; everything else as
/// an `Exception` envelope. Has no effect on an already written response.
pub fn write_error(session: &mut Session, err: &RpcError) {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    if let RpcError::RateLimitExceeded { interval, .. } = err {
        let seconds = interval.as_secs() + u64::from(interval.subsec_nanos() > 0);
        session
            .response
            .set_header(RETRY_AFTER, HeaderValue::from(seconds.max(1)));
    }

    if err.is_pre_dispatch() {
        session.response.write_html(status, &err.to_string());
        return;
    }

    let envelope = ResponseEnvelope::from_error(err);
    if let Err(serialize_err) = session.response.write_json(status, &envelope) {
        error!(error = %serialize_err, "failed to serialize exception envelope");
        session
            .response
            .write_html(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::MiddlewareStack;
    use crate::session::SessionRequest;
    use bytes::Bytes;
    use http::header::CONTENT_TYPE;
    use http::{HeaderMap, Method};
    use modcall_rpc_core::CancellationHandle;
    use serde_json::Value;
    use std::sync::Arc;
    use std::time::Duration;

    struct Failing(RpcError);

    #[async_trait]
    impl SessionMiddleware for Failing {
        async fn handle(&self, _session: &mut Session, _next: Next<'_>) -> Result<(), RpcError> {
            Err(self.0.clone())
        }
    }

    struct Panicking;

    #[async_trait]
    impl SessionMiddleware for Panicking {
        async fn handle(&self, _session: &mut Session, _next: Next<'_>) -> Result<(), RpcError> {
            panic!("boom");
        }
    }

    struct Silent;

    #[async_trait]
    impl SessionMiddleware for Silent {
        async fn handle(&self, _session: &mut Session, _next: Next<'_>) -> Result<(), RpcError> {
            Ok(())
        }
    }

    async fn run(inner: Arc<dyn SessionMiddleware>, cancellation: CancellationHandle) -> Session {
        let mut stack = MiddlewareStack::new();
        stack.push(Arc::new(ExceptionCatcher));
        stack.push(inner);

        let mut session = Session::new(
            SessionRequest::new(
                Method::POST,
                "/rpc".parse().unwrap(),
                HeaderMap::new(),
                Ok(Bytes::new()),
            ),
            cancellation,
        );
        stack.run(&mut session).await.unwrap();
        session
    }

    fn body_json(session: &Session) -> Value {
        serde_json::from_slice(session.response.body()).unwrap()
    }

    #[tokio::test]
    async fn test_error_becomes_exception_envelope() {
        let session = run(
            Arc::new(Failing(RpcError::ArityMismatch {
                expected: 2,
                actual: 1,
            })),
            CancellationHandle::new(),
        )
        .await;

        assert!(session.response.is_closed());
        assert_eq!(session.response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            session.response.headers().get(CONTENT_TYPE).unwrap(),
            "application/json"
        );
        let body = body_json(&session);
        assert_eq!(
            body["Exception"]["TypeName"],
            "Modcall.ArityMismatchException"
        );
        assert!(body.get("Result").is_none());
    }

    #[tokio::test]
    async fn test_pre_dispatch_error_is_html() {
        let session = run(
            Arc::new(Failing(RpcError::MethodNotAllowed("GET".into()))),
            CancellationHandle::new(),
        )
        .await;

        assert_eq!(session.response.status(), StatusCode::METHOD_NOT_ALLOWED);
        let content_type = session.response.headers().get(CONTENT_TYPE).unwrap();
        assert!(content_type.to_str().unwrap().starts_with("text/html"));
    }

    #[tokio::test]
    async fn test_panic_becomes_unhandled() {
        let session = run(Arc::new(Panicking), CancellationHandle::new()).await;

        assert!(session.response.is_closed());
        assert_eq!(
            session.response.status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        let body = body_json(&session);
        assert_eq!(body["Exception"]["TypeName"], "Modcall.UnhandledException");
        assert_eq!(body["Exception"]["Message"], "boom");
    }

    #[tokio::test]
    async fn test_rate_limit_sets_retry_after() {
        let session = run(
            Arc::new(Failing(RpcError::RateLimitExceeded {
                key: "M.N".into(),
                threshold: 3,
                interval: Duration::from_millis(1500),
            })),
            CancellationHandle::new(),
        )
        .await;

        assert_eq!(session.response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(session.response.headers().get(RETRY_AFTER).unwrap(), "2");
    }

    #[tokio::test]
    async fn test_nothing_written_after_cancellation_is_cancelled() {
        let cancellation = CancellationHandle::new();
        cancellation.cancel();
        let session = run(Arc::new(Silent), cancellation).await;

        assert_eq!(session.response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            body_json(&session)["Exception"]["TypeName"],
            "Modcall.OperationCanceledException"
        );
    }

    #[tokio::test]
    async fn test_nothing_written_is_no_content() {
        let session = run(Arc::new(Silent), CancellationHandle::new()).await;
        assert_eq!(session.response.status(), StatusCode::NO_CONTENT);
        assert!(session.response.is_closed());
    }
}
