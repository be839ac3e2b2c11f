//! Sliding-window rate limiting per endpoint

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::debug;

use modcall_rpc_core::{RequestCounter, RequestLimit, RpcError};

use crate::middleware::{Next, SessionMiddleware};
use crate::session::Session;

/// Replaces the counting key and/or the limit of one endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LimitOverride {
    pub key: Option<String>,
    pub limit: Option<RequestLimit>,
}

impl LimitOverride {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count under `key` instead of `Module.Method`; endpoints sharing a key share a budget
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn limit(mut self, limit: RequestLimit) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Rejects a request once its endpoint has used up the trailing window.
///
/// Requests whose target cannot be read are passed through untouched; the
/// modules stage reports them.
pub struct RequestLimiter {
    counter: Arc<dyn RequestCounter>,
    default_limit: RequestLimit,
    overrides: HashMap<String, LimitOverride>,
}

impl RequestLimiter {
    pub fn new(counter: Arc<dyn RequestCounter>, default_limit: RequestLimit) -> Self {
        counter.retain_at_least(default_limit.interval);
        Self {
            counter,
            default_limit,
            overrides: HashMap::new(),
        }
    }

    /// Override the key or limit of `module.method`
    pub fn with_override(
        mut self,
        module: &str,
        method: &str,
        endpoint: LimitOverride,
    ) -> Self {
        self.retain(&endpoint);
        self.overrides.insert(format!("{module}.{method}"), endpoint);
        self
    }

    /// Install overrides keyed by `Module.Method`
    pub fn with_overrides(mut self, overrides: HashMap<String, LimitOverride>) -> Self {
        for endpoint in overrides.values() {
            self.retain(endpoint);
        }
        self.overrides.extend(overrides);
        self
    }

    fn retain(&self, endpoint: &LimitOverride) {
        if let Some(limit) = endpoint.limit {
            self.counter.retain_at_least(limit.interval);
        }
    }

    fn resolve(&self, endpoint: String) -> (String, RequestLimit) {
        match self.overrides.get(&endpoint) {
            Some(found) => (
                found.key.clone().unwrap_or(endpoint),
                found.limit.unwrap_or(self.default_limit),
            ),
            None => (endpoint, self.default_limit),
        }
    }
}

#[async_trait]
impl SessionMiddleware for RequestLimiter {
    async fn handle(&self, session: &mut Session, next: Next<'_>) -> Result<(), RpcError> {
        if let Ok(target) = session.request.call_target() {
            let (key, limit) = self.resolve(target.endpoint_key());
            limit.check(self.counter.as_ref(), &key, Instant::now())?;
            debug!(key = %key, "request admitted");
        }
        next.run(session).await
    }

    fn name(&self) -> &'static str {
        "request_limiter"
    }
}
