use serde_json::Value;
use std::fmt;

use crate::args;
use crate::cancellation::CancellationHandle;
use crate::error::RpcError;

/// A call decoded from the wire: target pair, caller session and raw arguments.
///
/// Built once per session and never mutated afterwards.
#[derive(Clone)]
pub struct RequestContext {
    module: String,
    method: String,
    session_id: Option<String>,
    args: Value,
    cancellation: CancellationHandle,
}

impl RequestContext {
    pub fn new(
        module: impl Into<String>,
        method: impl Into<String>,
        session_id: Option<String>,
        args: Value,
        cancellation: CancellationHandle,
    ) -> Self {
        Self {
            module: module.into(),
            method: method.into(),
            session_id,
            args,
            cancellation,
        }
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Raw argument payload as received
    pub fn args(&self) -> &Value {
        &self.args
    }

    /// The argument payload as a positional list
    pub fn positional_args(&self) -> Result<&[Value], RpcError> {
        args::positional(&self.args)
    }

    pub fn cancellation(&self) -> &CancellationHandle {
        &self.cancellation
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("module", &self.module)
            .field("method", &self.method)
            .field("session_id", &self.session_id)
            .field("cancelled", &self.cancellation.is_cancelled())
            .finish_non_exhaustive()
    }
}
