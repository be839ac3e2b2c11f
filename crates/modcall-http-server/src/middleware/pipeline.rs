use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use modcall_rpc_core::{ModuleDispatcher, RequestCounter, RequestLimit};

use super::builtins::{
    AccessControl, AllowedOrigins, ExceptionCatcher, LimitOverride, Modules, RequestLimiter,
    RequestTimeout,
};
use super::{MiddlewareStack, SessionMiddleware};

/// Configuration of the default pipeline
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Origins accepted by the access-control stage
    pub allowed_origins: AllowedOrigins,
    /// Deadline of one request, measured inside the access-control stage
    pub request_timeout: Duration,
    /// Limit applied to every endpoint without an override
    pub request_limit: RequestLimit,
    /// Per-endpoint overrides keyed by `Module.Method`
    pub limit_overrides: HashMap<String, LimitOverride>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            allowed_origins: AllowedOrigins::Any,
            request_timeout: Duration::from_secs(30),
            request_limit: RequestLimit::default(),
            limit_overrides: HashMap::new(),
        }
    }
}

impl PipelineConfig {
    pub fn allowed_origins(mut self, allowed_origins: AllowedOrigins) -> Self {
        self.allowed_origins = allowed_origins;
        self
    }

    pub fn request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    pub fn request_limit(mut self, request_limit: RequestLimit) -> Self {
        self.request_limit = request_limit;
        self
    }

    pub fn limit_override(mut self, module: &str, method: &str, endpoint: LimitOverride) -> Self {
        self.limit_overrides
            .insert(format!("{module}.{method}"), endpoint);
        self
    }
}

/// Compose the default pipeline.
///
/// Outer to inner: exception catcher, request limiter, access control,
/// request timeout, `extra` in the given order, modules.
pub fn default_pipeline(
    config: &PipelineConfig,
    counter: Arc<dyn RequestCounter>,
    dispatcher: Arc<dyn ModuleDispatcher>,
    extra: Vec<Arc<dyn SessionMiddleware>>,
) -> MiddlewareStack {
    let mut stack = MiddlewareStack::new();
    stack.push(Arc::new(ExceptionCatcher::new()));
    stack.push(Arc::new(
        RequestLimiter::new(counter, config.request_limit)
            .with_overrides(config.limit_overrides.clone()),
    ));
    stack.push(Arc::new(AccessControl::new(config.allowed_origins.clone())));
    stack.push(Arc::new(RequestTimeout::new(config.request_timeout)));
    for stage in extra {
        stack.push(stage);
    }
    stack.push(Arc::new(Modules::new(dispatcher)));
    stack
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use modcall_rpc_core::{FunctionDispatcher, InMemoryRequestCounter, RequestContext};

    #[test]
    fn test_default_order() {
        let dispatcher = Arc::new(FunctionDispatcher::new(|_ctx: RequestContext| {
            async { Ok(None) }.boxed()
        }));
        let stack = default_pipeline(
            &PipelineConfig::default(),
            Arc::new(InMemoryRequestCounter::default()),
            dispatcher,
            Vec::new(),
        );

        assert_eq!(
            stack.names(),
            vec![
                "exception_catcher",
                "request_limiter",
                "access_control",
                "request_timeout",
                "modules"
            ]
        );
    }

    #[test]
    fn test_config_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.allowed_origins, AllowedOrigins::Any);
        assert_eq!(config.request_limit.threshold, 1000);
        assert_eq!(config.request_limit.interval, Duration::from_secs(10));
    }
}
