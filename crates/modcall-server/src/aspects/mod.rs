//! Built-in aspects

pub mod limiter;
pub mod logging;
pub mod roles;
pub mod transaction;
pub mod validation;

pub use limiter::RequestLimiterAspect;
pub use logging::{LogLevel, LogSink, LoggingAspect, LoggingScope, ScopeId, TracingLogSink};
pub use roles::{RequiredRoles, RoleGroup, RoleManager, RoleValidator};
pub use transaction::{ConnectionProvider, IsolationLevel, Transaction, TransactionManager};
pub use validation::{
    Length, NotNull, ParameterCheck, ParameterRules, ParameterValidator, Pattern, Predicate,
    Properties, Range,
};
