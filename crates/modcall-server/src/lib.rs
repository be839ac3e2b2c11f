//! # modcall server
//!
//! Expose Rust types as RPC modules. A module is a named set of methods
//! called over HTTP with positional JSON arguments; every call returns a
//! `{"Result": ...}` or `{"Exception": {...}}` envelope.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use modcall_server::prelude::*;
//!
//! struct Calculator;
//!
//! #[tokio::main]
//! async fn main() -> modcall_server::Result<()> {
//!     let server = RpcServer::builder()
//!         .module(
//!             ModuleBuilder::from_instance("Calculator", Calculator).method(Method::sync(
//!                 "Add",
//!                 |_: &Calculator, (a, b): (i64, i64), _: &CallContext| Ok(a + b),
//!             )),
//!         )
//!         .build()?;
//!
//!     server.run().await
//! }
//! ```
//!
//! ## Aspects
//!
//! Cross-cutting behavior wraps dispatch through [`Aspect`]s declared on a
//! module or a method: parameter validation, role checks, transactions,
//! logging scopes and rate limiting ship in [`aspects`].

pub mod aspect;
pub mod aspects;
pub mod builder;
pub mod descriptor;
pub mod method;
pub mod module;
pub mod prelude;
pub mod registry;
pub mod scope;
pub mod server;

pub use aspect::{Aspect, AsyncNext, BoundCall, Invocation, SyncNext};
pub use builder::RpcServerBuilder;
pub use descriptor::{AspectDescriptor, MethodInfo, ReturnKind};
pub use method::Method;
pub use module::{Lifetime, ModuleBuilder, ModuleRegistration};
pub use registry::{CompiledInvocation, MethodSchema, ModuleRegistry, ModuleSchema};
pub use scope::{CallContext, RequestScope};
pub use server::RpcServer;

pub use modcall_http_server::HttpServerError;

/// Result type for framework operations
pub type Result<T> = std::result::Result<T, ServerError>;

/// Framework-level errors
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Duplicate {kind} registration: {name}")]
    DuplicateRegistration { kind: &'static str, name: String },

    #[error("HTTP transport error: {0}")]
    Transport(#[from] HttpServerError),
}
