use serde_json::{Map, Value, json};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::response::ExceptionInfo;

/// Namespace prefixed to every built-in exception type name on the wire
pub const TYPE_NAMESPACE: &str = "Modcall";

/// HTTP status codes used by the error taxonomy
pub mod status_codes {
    pub const OK: u16 = 200;
    pub const NO_CONTENT: u16 = 204;
    pub const BAD_REQUEST: u16 = 400;
    pub const UNAUTHORIZED: u16 = 401;
    pub const FORBIDDEN: u16 = 403;
    pub const NOT_FOUND: u16 = 404;
    pub const METHOD_NOT_ALLOWED: u16 = 405;
    pub const REQUEST_TIMEOUT: u16 = 408;
    pub const PAYLOAD_TOO_LARGE: u16 = 413;
    pub const TOO_MANY_REQUESTS: u16 = 429;
    pub const INTERNAL_SERVER_ERROR: u16 = 500;
    pub const SERVICE_UNAVAILABLE: u16 = 503;
}

/// A single failed parameter check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Name of the parameter (or `parent.property` path) that failed
    pub parameter: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            parameter: parameter.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.parameter, self.message)
    }
}

/// One or more failed parameter checks raised together
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationFailure {
    failures: Vec<ValidationError>,
}

impl ValidationFailure {
    pub fn single(error: ValidationError) -> Self {
        Self {
            failures: vec![error],
        }
    }

    /// Combine collected failures. Returns `None` when nothing failed.
    pub fn aggregate(failures: Vec<ValidationError>) -> Option<Self> {
        if failures.is_empty() {
            None
        } else {
            Some(Self { failures })
        }
    }

    pub fn failures(&self) -> &[ValidationError] {
        &self.failures
    }

    pub fn is_aggregate(&self) -> bool {
        self.failures.len() > 1
    }
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<String> = self.failures.iter().map(ToString::to_string).collect();
        write!(f, "{}", messages.join("; "))
    }
}

/// Every failure a dispatched call can produce.
///
/// Variants map onto an HTTP status code ([`RpcError::status_code`]) and onto
/// the `Exception` part of the response envelope ([`RpcError::to_exception_info`]).
#[derive(Debug, Clone, Error)]
pub enum RpcError {
    #[error("Expected {expected} positional argument(s) but received {actual}")]
    ArityMismatch { expected: usize, actual: usize },

    #[error("Argument at position {position} is not a valid {expected}: {message}")]
    InvalidArgument {
        position: usize,
        expected: &'static str,
        message: String,
    },

    #[error("Module '{module}' does not expose method '{method}'")]
    MissingModule { module: String, method: String },

    #[error("Validation failed: {0}")]
    Validation(ValidationFailure),

    #[error("Authentication required: {0}")]
    Unauthenticated(String),

    #[error("Access denied: {0}")]
    Unauthorized(String),

    #[error("Rate limit exceeded for '{key}': {threshold} requests per {interval:?}")]
    RateLimitExceeded {
        key: String,
        threshold: usize,
        interval: Duration,
    },

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("The operation was cancelled")]
    Cancelled,

    #[error("{0}")]
    Format(String),

    #[error("{message}")]
    Application {
        type_name: String,
        message: String,
        data: Map<String, Value>,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    #[error("HTTP method '{0}' is not allowed")]
    MethodNotAllowed(String),

    #[error("Origin '{0}' is not allowed")]
    OriginRejected(String),

    #[error("Request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    #[error("{0}")]
    Unhandled(String),
}

impl RpcError {
    /// Error raised by a target that could not parse its input
    pub fn format(message: impl Into<String>) -> Self {
        Self::Format(message.into())
    }

    /// Domain error raised by a module implementation
    pub fn application(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Application {
            type_name: type_name.into(),
            message: message.into(),
            data: Map::new(),
        }
    }

    pub fn unhandled(message: impl Into<String>) -> Self {
        Self::Unhandled(message.into())
    }

    /// Attach a data entry; only application errors carry caller-supplied data
    pub fn with_data(mut self, key: impl Into<String>, value: Value) -> Self {
        if let Self::Application { data, .. } = &mut self {
            data.insert(key.into(), value);
        }
        self
    }

    pub fn status_code(&self) -> u16 {
        use status_codes::*;
        match self {
            Self::ArityMismatch { .. }
            | Self::InvalidArgument { .. }
            | Self::Validation(_)
            | Self::Format(_)
            | Self::MalformedRequest(_) => BAD_REQUEST,
            Self::MissingModule { .. } => NOT_FOUND,
            Self::Unauthenticated(_) => UNAUTHORIZED,
            Self::Unauthorized(_) | Self::OriginRejected(_) => FORBIDDEN,
            Self::MethodNotAllowed(_) => METHOD_NOT_ALLOWED,
            Self::Timeout(_) => REQUEST_TIMEOUT,
            Self::PayloadTooLarge { .. } => PAYLOAD_TOO_LARGE,
            Self::RateLimitExceeded { .. } => TOO_MANY_REQUESTS,
            Self::Cancelled => SERVICE_UNAVAILABLE,
            Self::Application { .. } | Self::Configuration(_) | Self::Unhandled(_) => {
                INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Failures detected before a module is dispatched are reported as plain
    /// `text/html` instead of a JSON envelope.
    pub fn is_pre_dispatch(&self) -> bool {
        matches!(
            self,
            Self::MalformedRequest(_)
                | Self::MethodNotAllowed(_)
                | Self::OriginRejected(_)
                | Self::PayloadTooLarge { .. }
        )
    }

    pub fn type_name(&self) -> String {
        let short = match self {
            Self::Application { type_name, .. } => return type_name.clone(),
            Self::ArityMismatch { .. } => "ArityMismatchException",
            Self::InvalidArgument { .. } => "InvalidArgumentException",
            Self::MissingModule { .. } => "MissingModuleException",
            Self::Validation(_) => "ValidationException",
            Self::Unauthenticated(_) => "AuthenticationException",
            Self::Unauthorized(_) => "AuthorizationException",
            Self::RateLimitExceeded { .. } => "RateLimitExceededException",
            Self::Timeout(_) => "TimeoutException",
            Self::Cancelled => "OperationCanceledException",
            Self::Format(_) => "FormatException",
            Self::Configuration(_) => "ConfigurationException",
            Self::MalformedRequest(_) => "MalformedRequestException",
            Self::MethodNotAllowed(_) => "MethodNotAllowedException",
            Self::OriginRejected(_) => "OriginRejectedException",
            Self::PayloadTooLarge { .. } => "PayloadTooLargeException",
            Self::Unhandled(_) => "UnhandledException",
        };
        format!("{TYPE_NAMESPACE}.{short}")
    }

    fn data(&self) -> Map<String, Value> {
        let value = match self {
            Self::Application { data, .. } => return data.clone(),
            Self::ArityMismatch { expected, actual } => {
                json!({ "expected": expected, "actual": actual })
            }
            Self::InvalidArgument {
                position, expected, ..
            } => json!({ "position": position, "expected": expected }),
            Self::MissingModule { module, method } => {
                json!({ "module": module, "method": method })
            }
            Self::Validation(failure) => {
                let failures: Vec<Value> = failure
                    .failures()
                    .iter()
                    .map(|f| json!({ "parameter": f.parameter, "message": f.message }))
                    .collect();
                json!({ "failures": failures })
            }
            Self::RateLimitExceeded {
                key,
                threshold,
                interval,
            } => json!({
                "key": key,
                "threshold": threshold,
                "intervalMs": interval.as_millis() as u64,
            }),
            Self::Timeout(after) => json!({ "timeoutMs": after.as_millis() as u64 }),
            Self::PayloadTooLarge { limit } => json!({ "limit": limit }),
            _ => return Map::new(),
        };
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    /// Wire representation of this error
    pub fn to_exception_info(&self) -> ExceptionInfo {
        ExceptionInfo {
            type_name: self.type_name(),
            message: self.to_string(),
            data: self.data(),
        }
    }
}

impl From<std::num::ParseIntError> for RpcError {
    fn from(_: std::num::ParseIntError) -> Self {
        RpcError::format("Input string was not in a correct format.")
    }
}

impl From<std::num::ParseFloatError> for RpcError {
    fn from(_: std::num::ParseFloatError) -> Self {
        RpcError::format("Input string was not in a correct format.")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            RpcError::ArityMismatch {
                expected: 2,
                actual: 1
            }
            .status_code(),
            400
        );
        assert_eq!(
            RpcError::MissingModule {
                module: "Calculator".into(),
                method: "Pow".into()
            }
            .status_code(),
            404
        );
        assert_eq!(RpcError::Unauthenticated("x".into()).status_code(), 401);
        assert_eq!(RpcError::Unauthorized("x".into()).status_code(), 403);
        assert_eq!(RpcError::Timeout(Duration::from_secs(1)).status_code(), 408);
        assert_eq!(RpcError::unhandled("boom").status_code(), 500);
    }

    #[test]
    fn test_format_error_matches_wire_contract() {
        let info: RpcError = "cica".parse::<i32>().unwrap_err().into();
        let info = info.to_exception_info();
        assert!(info.type_name.ends_with("FormatException"));
        assert_eq!(info.message, "Input string was not in a correct format.");
        assert!(info.data.is_empty());
    }

    #[test]
    fn test_validation_message_joins_failures() {
        let failure = ValidationFailure::aggregate(vec![
            ValidationError::new("a", "must not be null"),
            ValidationError::new("b", "must be at most 10"),
        ])
        .unwrap();
        assert!(failure.is_aggregate());

        let err = RpcError::Validation(failure);
        let message = err.to_string();
        assert!(message.contains("a: must not be null"));
        assert!(message.contains("b: must be at most 10"));

        let info = err.to_exception_info();
        assert_eq!(info.data["failures"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_application_error_keeps_type_and_data() {
        let err = RpcError::application("Shop.OutOfStock", "nothing left")
            .with_data("sku", json!("A-1"));
        let info = err.to_exception_info();
        assert_eq!(info.type_name, "Shop.OutOfStock");
        assert_eq!(info.data["sku"], "A-1");
        assert_eq!(err.status_code(), 500);
    }

    #[test]
    fn test_pre_dispatch_classification() {
        assert!(RpcError::MalformedRequest("no module".into()).is_pre_dispatch());
        assert!(RpcError::OriginRejected("https://evil.example".into()).is_pre_dispatch());
        assert!(!RpcError::Cancelled.is_pre_dispatch());
    }
}
