use std::sync::Arc;
use tokio::time::Instant;

use modcall_rpc_core::{RequestCounter, RequestLimit, RpcError};

use crate::aspect::{Aspect, Invocation};

/// Per-method rate limit, counted the same way as the pipeline's limiter.
///
/// The counter key defaults to `Module.Method`; methods sharing a key share
/// one budget.
pub struct RequestLimiterAspect {
    counter: Arc<dyn RequestCounter>,
    limit: RequestLimit,
    key: Option<String>,
}

impl RequestLimiterAspect {
    pub fn new(counter: Arc<dyn RequestCounter>, limit: RequestLimit) -> Self {
        counter.retain_at_least(limit.interval);
        Self {
            counter,
            limit,
            key: None,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn limit(&self) -> RequestLimit {
        self.limit
    }
}

impl Aspect for RequestLimiterAspect {
    fn name(&self) -> &'static str {
        "request_limiter"
    }

    fn before(&self, invocation: &Invocation) -> Result<(), RpcError> {
        let key = match &self.key {
            Some(key) => key.clone(),
            None => invocation.endpoint_key(),
        };
        self.limit
            .check(self.counter.as_ref(), &key, Instant::now())
    }
}
