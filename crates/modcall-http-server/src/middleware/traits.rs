//! Core middleware trait definitions

use async_trait::async_trait;
use std::sync::Arc;

use modcall_rpc_core::RpcError;

use crate::session::Session;

/// A pipeline stage.
///
/// A stage receives the session and the continuation to the stages inside it.
/// It decides whether and when to call [`Next::run`]: work placed before the
/// call runs on the way in, work placed after it runs on the way out, and a
/// stage that never calls it short-circuits everything downstream.
///
/// # Examples
///
/// ```rust,no_run
/// use modcall_http_server::middleware::{Next, SessionMiddleware};
/// use modcall_http_server::Session;
/// use modcall_rpc_core::RpcError;
/// use async_trait::async_trait;
///
/// struct RequireApiKey(String);
///
/// #[async_trait]
/// impl SessionMiddleware for RequireApiKey {
///     async fn handle(&self, session: &mut Session, next: Next<'_>) -> Result<(), RpcError> {
///         match session.request.header("x-api-key") {
///             Some(key) if key == self.0 => next.run(session).await,
///             _ => Err(RpcError::Unauthenticated("missing API key".into())),
///         }
///     }
/// }
/// ```
#[async_trait]
pub trait SessionMiddleware: Send + Sync {
    async fn handle(&self, session: &mut Session, next: Next<'_>) -> Result<(), RpcError>;

    /// Name used in log output
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Continuation to the remaining (inner) stages
pub struct Next<'a> {
    stages: &'a [Arc<dyn SessionMiddleware>],
}

impl<'a> Next<'a> {
    pub(crate) fn new(stages: &'a [Arc<dyn SessionMiddleware>]) -> Self {
        Self { stages }
    }

    /// Number of stages still to run
    pub fn remaining(&self) -> usize {
        self.stages.len()
    }

    /// Run the next stage; succeeds immediately when none is left
    pub async fn run(self, session: &mut Session) -> Result<(), RpcError> {
        match self.stages.split_first() {
            Some((stage, rest)) => stage.handle(session, Next::new(rest)).await,
            None => Ok(()),
        }
    }
}
