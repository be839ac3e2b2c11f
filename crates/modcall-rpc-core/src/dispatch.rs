use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;

use crate::error::RpcError;
use crate::request::RequestContext;

/// Outcome of a dispatched call: a value, no value (`Ok(None)`), or an error
pub type CallResult = Result<Option<Value>, RpcError>;

/// Resolves a (module, method) pair and runs the call.
///
/// The HTTP layer only knows this trait; module registration and invocation
/// compilation live behind it.
#[async_trait]
pub trait ModuleDispatcher: Send + Sync {
    /// Run the call described by `context`.
    ///
    /// Fails with [`RpcError::MissingModule`] when the pair is not exposed.
    async fn dispatch(&self, context: RequestContext) -> CallResult;

    /// Whether the pair is exposed (exact-case match)
    fn contains(&self, module: &str, method: &str) -> bool;

    /// All exposed (module, method) pairs (optional - used for introspection)
    fn endpoints(&self) -> Vec<(String, String)> {
        vec![]
    }
}

/// A dispatcher backed by a single function, handy for tests and small servers
pub struct FunctionDispatcher<F>
where
    F: Fn(RequestContext) -> BoxFuture<'static, CallResult> + Send + Sync,
{
    handler_fn: F,
    endpoints: Vec<(String, String)>,
}

impl<F> FunctionDispatcher<F>
where
    F: Fn(RequestContext) -> BoxFuture<'static, CallResult> + Send + Sync,
{
    pub fn new(handler_fn: F) -> Self {
        Self {
            handler_fn,
            endpoints: vec![],
        }
    }

    /// Restrict dispatch to the listed pairs; unlisted pairs fail with `MissingModule`
    pub fn with_endpoints<M, N>(mut self, endpoints: impl IntoIterator<Item = (M, N)>) -> Self
    where
        M: Into<String>,
        N: Into<String>,
    {
        self.endpoints = endpoints
            .into_iter()
            .map(|(module, method)| (module.into(), method.into()))
            .collect();
        self
    }
}

#[async_trait]
impl<F> ModuleDispatcher for FunctionDispatcher<F>
where
    F: Fn(RequestContext) -> BoxFuture<'static, CallResult> + Send + Sync,
{
    async fn dispatch(&self, context: RequestContext) -> CallResult {
        if !self.contains(context.module(), context.method()) {
            return Err(RpcError::MissingModule {
                module: context.module().to_string(),
                method: context.method().to_string(),
            });
        }
        (self.handler_fn)(context).await
    }

    fn contains(&self, module: &str, method: &str) -> bool {
        self.endpoints.is_empty()
            || self
                .endpoints
                .iter()
                .any(|(m, n)| m == module && n == method)
    }

    fn endpoints(&self) -> Vec<(String, String)> {
        self.endpoints.clone()
    }
}
