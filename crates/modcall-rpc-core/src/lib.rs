//! # modcall RPC core
//!
//! Transport-agnostic building blocks of the modcall RPC server. A call is
//! addressed to a (module, method) pair, carries its arguments as a positional
//! JSON array and is answered with a uniform envelope holding either a
//! `Result` or an `Exception`.
//!
//! ## Contents
//! - [`ResponseEnvelope`] / [`ExceptionInfo`]: the wire response
//! - [`RpcError`]: the failure taxonomy and its status-code mapping
//! - [`args`]: exact-arity positional argument binding
//! - [`RequestContext`] and [`CancellationHandle`]: one decoded call
//! - [`ModuleDispatcher`]: the seam between transport and module registry
//! - [`counter`]: request counting for rate limiting

pub mod args;
pub mod cancellation;
pub mod counter;
pub mod dispatch;
pub mod error;
pub mod prelude;
pub mod request;
pub mod response;

pub use args::ParamList;
pub use cancellation::CancellationHandle;
pub use counter::{InMemoryRequestCounter, RequestCounter, RequestLimit};
pub use dispatch::{CallResult, FunctionDispatcher, ModuleDispatcher};
pub use error::{RpcError, ValidationError, ValidationFailure, status_codes};
pub use request::RequestContext;
pub use response::{ExceptionInfo, ResponseEnvelope};

/// Query parameter naming the target module
pub const MODULE_PARAM: &str = "module";
/// Query parameter naming the target method
pub const METHOD_PARAM: &str = "method";
/// Optional query parameter carrying the caller's session id
pub const SESSION_PARAM: &str = "sessionId";
