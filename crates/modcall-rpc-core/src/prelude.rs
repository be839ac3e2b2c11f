//! # modcall core prelude
//!
//! ```rust
//! use modcall_rpc_core::prelude::*;
//! ```

pub use crate::args::ParamList;
pub use crate::cancellation::CancellationHandle;
pub use crate::counter::{InMemoryRequestCounter, RequestCounter, RequestLimit};
pub use crate::dispatch::{CallResult, ModuleDispatcher};
pub use crate::error::{RpcError, ValidationError, ValidationFailure};
pub use crate::request::RequestContext;
pub use crate::response::{ExceptionInfo, ResponseEnvelope};
