use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::RpcError;

/// Serialized form of a failure carried in the `Exception` field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExceptionInfo {
    pub type_name: String,
    pub message: String,
    #[serde(default)]
    pub data: Map<String, Value>,
}

/// Uniform response wrapper: `{"Result": ...}` or `{"Exception": {...}}`.
///
/// A method returning no value produces `{"Result": null}`. An envelope with
/// neither field is read back as a `null` result; one with both is rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireEnvelope")]
pub struct ResponseEnvelope {
    #[serde(rename = "Result", skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(rename = "Exception", skip_serializing_if = "Option::is_none")]
    exception: Option<ExceptionInfo>,
}

impl ResponseEnvelope {
    pub fn success(value: Value) -> Self {
        Self {
            result: Some(value),
            exception: None,
        }
    }

    /// Envelope for a call that produced no value
    pub fn void() -> Self {
        Self::success(Value::Null)
    }

    pub fn failure(exception: ExceptionInfo) -> Self {
        Self {
            result: None,
            exception: Some(exception),
        }
    }

    pub fn from_error(error: &RpcError) -> Self {
        Self::failure(error.to_exception_info())
    }

    /// Normalized outcome of a dispatched call
    pub fn from_outcome(outcome: Result<Option<Value>, RpcError>) -> Self {
        match outcome {
            Ok(Some(value)) => Self::success(value),
            Ok(None) => Self::void(),
            Err(error) => Self::from_error(&error),
        }
    }

    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    pub fn exception(&self) -> Option<&ExceptionInfo> {
        self.exception.as_ref()
    }

    pub fn is_failure(&self) -> bool {
        self.exception.is_some()
    }

    /// Split into the result value (`null` when absent) or the exception
    pub fn into_result(self) -> Result<Value, ExceptionInfo> {
        match self.exception {
            Some(exception) => Err(exception),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

#[derive(Deserialize)]
struct WireEnvelope {
    #[serde(rename = "Result", default, deserialize_with = "present")]
    result: Option<Value>,
    #[serde(rename = "Exception", default)]
    exception: Option<ExceptionInfo>,
}

// Keeps `"Result": null` distinguishable from a missing field.
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl TryFrom<WireEnvelope> for ResponseEnvelope {
    type Error = String;

    fn try_from(wire: WireEnvelope) -> Result<Self, Self::Error> {
        match (wire.result, wire.exception) {
            (Some(_), Some(_)) => {
                Err("envelope must not carry both Result and Exception".to_string())
            }
            (result, exception) => Ok(Self { result, exception }),
        }
    }
}
