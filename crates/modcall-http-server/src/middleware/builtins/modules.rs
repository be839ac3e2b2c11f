//! Innermost stage: decode the call and hand it to the dispatcher

use async_trait::async_trait;
use http::{Method, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use modcall_rpc_core::{ModuleDispatcher, RequestContext, ResponseEnvelope, RpcError, args};

use crate::middleware::{Next, SessionMiddleware};
use crate::session::Session;

/// Resolves `(module, method)` from the query string, decodes the positional
/// argument array from the body and writes the `Result` envelope.
///
/// This stage is terminal: it never calls the next stage.
pub struct Modules {
    dispatcher: Arc<dyn ModuleDispatcher>,
}

impl Modules {
    pub fn new(dispatcher: Arc<dyn ModuleDispatcher>) -> Self {
        Self { dispatcher }
    }
}

/// Parse a request body into the positional argument array.
///
/// An empty body stands for a call without arguments.
pub fn decode_arguments(body: &[u8]) -> Result<Value, RpcError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Array(Vec::new()));
    }
    let payload: Value = serde_json::from_slice(body)
        .map_err(|err| RpcError::MalformedRequest(format!("request body is not valid JSON: {err}")))?;
    args::positional(&payload)?;
    Ok(payload)
}

#[async_trait]
impl SessionMiddleware for Modules {
    async fn handle(&self, session: &mut Session, _next: Next<'_>) -> Result<(), RpcError> {
        if session.request.method() != Method::POST {
            return Err(RpcError::MethodNotAllowed(
                session.request.method().to_string(),
            ));
        }

        let target = session.request.call_target()?;
        if !self.dispatcher.contains(&target.module, &target.method) {
            return Err(RpcError::MissingModule {
                module: target.module,
                method: target.method,
            });
        }

        let arguments = decode_arguments(session.request.body()?)?;
        debug!(
            module = %target.module,
            method = %target.method,
            session = ?target.session_id,
            "dispatching call"
        );

        let context = RequestContext::new(
            target.module,
            target.method,
            target.session_id,
            arguments,
            session.cancellation().clone(),
        );
        let outcome = self.dispatcher.dispatch(context).await?;

        session
            .response
            .write_json(StatusCode::OK, &ResponseEnvelope::from_outcome(Ok(outcome)))
    }

    fn name(&self) -> &'static str {
        "modules"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::MiddlewareStack;
    use crate::session::SessionRequest;
    use bytes::Bytes;
    use futures::FutureExt;
    use http::HeaderMap;
    use modcall_rpc_core::{CancellationHandle, FunctionDispatcher};
    use serde_json::json;

    fn sum_dispatcher() -> Arc<dyn ModuleDispatcher> {
        Arc::new(
            FunctionDispatcher::new(|ctx: RequestContext| {
                async move {
                    let args = ctx.positional_args()?;
                    let total: i64 = args.iter().filter_map(Value::as_i64).sum();
                    Ok::<_, RpcError>(Some(json!(total)))
                }
                .boxed()
            })
            .with_endpoints([("Calculator", "Sum")]),
        )
    }

    async fn call(method: Method, uri: &str, body: &'static [u8]) -> (Result<(), RpcError>, Session) {
        let mut stack = MiddlewareStack::new();
        stack.push(Arc::new(Modules::new(sum_dispatcher())));

        let mut session = Session::new(
            SessionRequest::new(
                method,
                uri.parse().unwrap(),
                HeaderMap::new(),
                Ok(Bytes::from_static(body)),
            ),
            CancellationHandle::new(),
        );
        let result = stack.run(&mut session).await;
        (result, session)
    }

    #[tokio::test]
    async fn test_successful_call_writes_result() {
        let (result, session) = call(
            Method::POST,
            "/rpc?module=Calculator&method=Sum",
            b"[1, 2, 3]",
        )
        .await;

        result.unwrap();
        assert_eq!(session.response.status(), StatusCode::OK);
        assert_eq!(session.response.body().as_ref(), br#"{"Result":6}"#);
    }

    #[tokio::test]
    async fn test_get_is_method_not_allowed() {
        let (result, _) = call(Method::GET, "/rpc?module=Calculator&method=Sum", b"[]").await;
        assert!(matches!(result, Err(RpcError::MethodNotAllowed(m)) if m == "GET"));
    }

    #[tokio::test]
    async fn test_unknown_pair_is_missing_module() {
        let (result, _) = call(Method::POST, "/rpc?module=calculator&method=sum", b"[]").await;
        assert!(matches!(result, Err(RpcError::MissingModule { .. })));
    }

    #[tokio::test]
    async fn test_non_array_body_is_malformed() {
        for body in [&b"{\"a\":1}"[..], b"not json"] {
            let (result, _) = call(Method::POST, "/rpc?module=Calculator&method=Sum", body).await;
            assert!(matches!(result, Err(RpcError::MalformedRequest(_))));
        }
    }

    #[test]
    fn test_empty_body_is_empty_argument_list() {
        assert_eq!(decode_arguments(b"").unwrap(), json!([]));
        assert_eq!(decode_arguments(b"  \n").unwrap(), json!([]));
    }
}
