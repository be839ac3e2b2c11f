//! Middleware stack execution

use async_trait::async_trait;
use std::sync::Arc;
use tracing::error;

use modcall_rpc_core::RpcError;

use super::builtins::exception_catcher::write_error;
use super::{Next, SessionMiddleware};
use crate::handler::SessionHandler;
use crate::session::Session;

/// Ordered collection of stages composed into one session handler
///
/// Stages run outer to inner in registration order and unwind in reverse:
/// the code a stage runs after `next` sees the inner stages already finished.
///
/// # Examples
///
/// ```rust,no_run
/// use modcall_http_server::middleware::{MiddlewareStack, Next, SessionMiddleware};
/// use modcall_http_server::Session;
/// use modcall_rpc_core::RpcError;
/// use async_trait::async_trait;
/// use std::sync::Arc;
///
/// struct LoggingMiddleware;
///
/// #[async_trait]
/// impl SessionMiddleware for LoggingMiddleware {
///     async fn handle(&self, session: &mut Session, next: Next<'_>) -> Result<(), RpcError> {
///         println!("Request: {}", session.request.uri());
///         next.run(session).await
///     }
/// }
///
/// let mut stack = MiddlewareStack::new();
/// stack.push(Arc::new(LoggingMiddleware));
///
/// assert_eq!(stack.len(), 1);
/// ```
#[derive(Default, Clone)]
pub struct MiddlewareStack {
    middleware: Vec<Arc<dyn SessionMiddleware>>,
}

impl MiddlewareStack {
    /// Create an empty middleware stack
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a stage inside every stage pushed before it
    pub fn push(&mut self, middleware: Arc<dyn SessionMiddleware>) {
        self.middleware.push(middleware);
    }

    /// Get the number of middleware in the stack
    pub fn len(&self) -> usize {
        self.middleware.len()
    }

    /// Check if the stack is empty
    pub fn is_empty(&self) -> bool {
        self.middleware.is_empty()
    }

    /// Stage names, outermost first
    pub fn names(&self) -> Vec<&'static str> {
        self.middleware.iter().map(|m| m.name()).collect()
    }

    /// Run every stage against `session`
    pub async fn run(&self, session: &mut Session) -> Result<(), RpcError> {
        Next::new(&self.middleware).run(session).await
    }
}

#[async_trait]
impl SessionHandler for MiddlewareStack {
    async fn handle(&self, session: &mut Session) {
        if let Err(err) = self.run(session).await {
            // Only reached when the stack has no exception catcher
            error!(session_id = %session.id(), error = %err, "unhandled pipeline failure");
            write_error(session, &err);
        }
        session.response.close();
    }
}
