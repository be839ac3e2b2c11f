//! # modcall HTTP server
//!
//! HTTP transport for modcall RPC servers. A call is an HTTP `POST` to the
//! endpoint path with `module`, `method` and an optional `sessionId` in the
//! query string and a JSON array of positional arguments as the body.
//!
//! ## Pieces
//! - [`Listener`]: accept loop, per-connection tasks, graceful stop
//! - [`Session`]: one request/response exchange with its cancellation signal
//! - [`middleware`]: the stage trait, the stack and the built-in stages
//!
//! ## Features
//! - Ordered middleware with inward/outward phases and short-circuiting
//! - Failures and panics mapped to status codes and `Exception` envelopes
//! - Origin allow-list with preflight handling
//! - Sliding-window rate limiting and per-request deadlines

pub mod handler;
pub mod listener;
pub mod middleware;
pub mod prelude;
pub mod session;

#[cfg(test)]
mod tests;

pub use handler::SessionHandler;
pub use listener::{BindRemediation, Listener, ListenerConfig};
pub use middleware::{MiddlewareStack, Next, PipelineConfig, SessionMiddleware, default_pipeline};
pub use session::{CallTarget, Session, SessionRequest, SessionResponse};

/// Result type for listener operations
pub type Result<T> = std::result::Result<T, HttpServerError>;

/// Listener and transport errors
#[derive(Debug, thiserror::Error)]
pub enum HttpServerError {
    #[error("Listener is already started")]
    AlreadyStarted,

    #[error("Listener is not started")]
    NotStarted,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Hyper(#[from] hyper::Error),
}
