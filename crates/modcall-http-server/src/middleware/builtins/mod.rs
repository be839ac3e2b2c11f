//! Built-in pipeline stages
//!
//! The default pipeline composes them outer to inner:
//!
//! - [`ExceptionCatcher`]: converts every escaping failure into a response
//! - [`RequestLimiter`]: sliding-window rate limiting per endpoint
//! - [`AccessControl`]: origin allow-list and preflight handling
//! - [`RequestTimeout`]: per-request deadline
//! - [`Modules`]: decodes the call and dispatches it

pub mod access_control;
pub mod exception_catcher;
pub mod modules;
pub mod request_limiter;
pub mod request_timeout;

pub use access_control::{AccessControl, AllowedOrigins};
pub use exception_catcher::{ExceptionCatcher, write_error};
pub use modules::{Modules, decode_arguments};
pub use request_limiter::{LimitOverride, RequestLimiter};
pub use request_timeout::RequestTimeout;
