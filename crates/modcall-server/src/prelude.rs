//! # modcall server prelude
//!
//! ```rust
//! use modcall_server::prelude::*;
//! ```

pub use crate::aspect::{Aspect, AsyncNext, Invocation, SyncNext};
pub use crate::aspects::*;
pub use crate::descriptor::{MethodInfo, ReturnKind};
pub use crate::method::Method;
pub use crate::module::{Lifetime, ModuleBuilder};
pub use crate::registry::{ModuleRegistry, ModuleSchema};
pub use crate::scope::{CallContext, RequestScope};
pub use crate::{Result, RpcServer, RpcServerBuilder, ServerError};

pub use modcall_http_server::middleware::builtins::{AllowedOrigins, LimitOverride};
pub use modcall_http_server::{BindRemediation, Session, SessionMiddleware};
pub use modcall_rpc_core::prelude::*;
