//! # HTTP server prelude
//!
//! ```rust
//! use modcall_http_server::prelude::*;
//! ```

pub use crate::handler::SessionHandler;
pub use crate::listener::{BindRemediation, Listener, ListenerConfig};
pub use crate::middleware::builtins::{
    AccessControl, AllowedOrigins, ExceptionCatcher, LimitOverride, Modules, RequestLimiter,
    RequestTimeout,
};
pub use crate::middleware::{
    MiddlewareStack, Next, PipelineConfig, SessionMiddleware, default_pipeline,
};
pub use crate::session::{CallTarget, Session, SessionRequest, SessionResponse};
pub use crate::{HttpServerError, Result};

pub use modcall_rpc_core::prelude::*;
