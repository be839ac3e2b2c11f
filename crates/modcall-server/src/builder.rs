//! Builder for [`RpcServer`]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use modcall_http_server::middleware::builtins::{AllowedOrigins, LimitOverride};
use modcall_http_server::{
    BindRemediation, Listener, ListenerConfig, PipelineConfig, SessionMiddleware,
    default_pipeline,
};
use modcall_rpc_core::{InMemoryRequestCounter, RequestCounter, RequestLimit};

use crate::module::ModuleBuilder;
use crate::registry::ModuleRegistryBuilder;
use crate::server::RpcServer;
use crate::{Result, ServerError};

/// Collects modules, pipeline and listener settings
pub struct RpcServerBuilder {
    listener: ListenerConfig,
    pipeline: PipelineConfig,
    counter: Option<Arc<dyn RequestCounter>>,
    remediation: Option<Arc<dyn BindRemediation>>,
    middleware: Vec<Arc<dyn SessionMiddleware>>,
    registry: ModuleRegistryBuilder,
    validation_errors: Vec<String>,
}

impl Default for RpcServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RpcServerBuilder {
    pub fn new() -> Self {
        Self {
            listener: ListenerConfig::default(),
            pipeline: PipelineConfig::default(),
            counter: None,
            remediation: None,
            middleware: Vec::new(),
            registry: ModuleRegistryBuilder::new(),
            validation_errors: Vec::new(),
        }
    }

    pub fn bind_address(mut self, addr: SocketAddr) -> Self {
        self.listener = self.listener.bind_address(addr);
        self
    }

    pub fn endpoint_path(mut self, path: impl Into<String>) -> Self {
        let path = path.into();
        if !path.starts_with('/') {
            self.validation_errors
                .push(format!("endpoint path '{path}' must start with '/'"));
        }
        self.listener = self.listener.endpoint_path(path);
        self
    }

    pub fn max_body_size(mut self, bytes: usize) -> Self {
        self.listener = self.listener.max_body_size(bytes);
        self
    }

    /// Origins accepted by the access-control stage; `*` accepts any
    pub fn allowed_origins<I, S>(mut self, origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pipeline = self
            .pipeline
            .allowed_origins(AllowedOrigins::from_list(origins));
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        if timeout.is_zero() {
            self.validation_errors
                .push("request timeout must be greater than zero".to_string());
        }
        self.pipeline = self.pipeline.request_timeout(timeout);
        self
    }

    pub fn request_limit(mut self, limit: RequestLimit) -> Self {
        if limit.interval.is_zero() {
            self.validation_errors
                .push("request limit interval must be greater than zero".to_string());
        }
        self.pipeline = self.pipeline.request_limit(limit);
        self
    }

    /// Replace the limit or the counter key of one endpoint
    pub fn limit_override(mut self, module: &str, method: &str, endpoint: LimitOverride) -> Self {
        self.pipeline = self.pipeline.limit_override(module, method, endpoint);
        self
    }

    /// Counter shared by the pipeline's limiter. Defaults to an in-memory
    /// counter retaining the longest configured limit interval.
    pub fn request_counter(mut self, counter: Arc<dyn RequestCounter>) -> Self {
        self.counter = Some(counter);
        self
    }

    pub fn bind_remediation(mut self, remediation: Arc<dyn BindRemediation>) -> Self {
        self.remediation = Some(remediation);
        self
    }

    /// Stage inserted between the request timeout and module dispatch
    pub fn middleware(mut self, middleware: Arc<dyn SessionMiddleware>) -> Self {
        self.middleware.push(middleware);
        self
    }

    pub fn module<T: Send + Sync + 'static>(mut self, module: ModuleBuilder<T>) -> Self {
        self.registry = self.registry.register(module);
        self
    }

    pub fn build(self) -> Result<RpcServer> {
        if !self.validation_errors.is_empty() {
            return Err(ServerError::Configuration(format!(
                "Validation errors: {}",
                self.validation_errors.join(", ")
            )));
        }

        let registry = Arc::new(self.registry.build()?);
        let counter = self.counter.unwrap_or_else(|| {
            Arc::new(InMemoryRequestCounter::new(self.pipeline.request_limit.interval))
        });

        debug!(
            stages = self.middleware.len(),
            timeout = ?self.pipeline.request_timeout,
            "composing pipeline"
        );
        let stack = default_pipeline(&self.pipeline, counter, registry.clone(), self.middleware);

        let mut listener = Listener::new(self.listener, Arc::new(stack));
        if let Some(remediation) = self.remediation {
            listener = listener.with_remediation(remediation);
        }

        Ok(RpcServer::new(listener, registry))
    }
}
