//! Positional argument binding.
//!
//! A call carries its arguments as a JSON array. The array is bound to the
//! ordered parameter list of the target method with exact arity: a missing or
//! a surplus element fails the whole call, whatever the elements contain.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::RpcError;

/// View a raw argument payload as a positional list
pub fn positional(payload: &Value) -> Result<&[Value], RpcError> {
    match payload {
        Value::Array(items) => Ok(items.as_slice()),
        other => Err(RpcError::MalformedRequest(format!(
            "arguments must be a JSON array, found {}",
            json_kind(other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Fail with `ArityMismatch` unless the counts are equal
pub fn check_arity(expected: usize, actual: usize) -> Result<(), RpcError> {
    if expected == actual {
        Ok(())
    } else {
        Err(RpcError::ArityMismatch { expected, actual })
    }
}

/// Read the element at `position` as `T`
pub fn decode_at<T: DeserializeOwned>(args: &[Value], position: usize) -> Result<T, RpcError> {
    let value = args.get(position).ok_or(RpcError::ArityMismatch {
        expected: position + 1,
        actual: args.len(),
    })?;
    serde::Deserialize::deserialize(value).map_err(|err| RpcError::InvalidArgument {
        position,
        expected: std::any::type_name::<T>(),
        message: err.to_string(),
    })
}

/// Ordered parameter list of an exposed method.
///
/// Implemented for `()` and for tuples of up to eight deserializable types;
/// the tuple order is the wire order.
pub trait ParamList: Sized + Send + 'static {
    const ARITY: usize;

    /// Rust type name of every parameter, in order
    fn type_names() -> Vec<&'static str>;

    /// Bind a positional list, enforcing exact arity first
    fn decode(args: &[Value]) -> Result<Self, RpcError>;
}

impl ParamList for () {
    const ARITY: usize = 0;

    fn type_names() -> Vec<&'static str> {
        Vec::new()
    }

    fn decode(args: &[Value]) -> Result<Self, RpcError> {
        check_arity(0, args.len())
    }
}

macro_rules! impl_param_list {
    ($arity:expr; $($name:ident : $idx:tt),+) => {
        impl<$($name),+> ParamList for ($($name,)+)
        where
            $($name: DeserializeOwned + Send + 'static),+
        {
            const ARITY: usize = $arity;

            fn type_names() -> Vec<&'static str> {
                vec![$(std::any::type_name::<$name>()),+]
            }

            fn decode(args: &[Value]) -> Result<Self, RpcError> {
                check_arity($arity, args.len())?;
                Ok(($(decode_at::<$name>(args, $idx)?,)+))
            }
        }
    };
}

impl_param_list!(1; A: 0);
impl_param_list!(2; A: 0, B: 1);
impl_param_list!(3; A: 0, B: 1, C: 2);
impl_param_list!(4; A: 0, B: 1, C: 2, D: 3);
impl_param_list!(5; A: 0, B: 1, C: 2, D: 3, E: 4);
impl_param_list!(6; A: 0, B: 1, C: 2, D: 3, E: 4, F: 5);
impl_param_list!(7; A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6);
impl_param_list!(8; A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6, H: 7);

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Point {
        x: i32,
        y: i32,
    }

    #[test]
    fn test_exact_arity_decodes_each_position() {
        let args = json!([1, "two", {"x": 3, "y": 4}]);
        let (a, b, c) = <(i64, String, Point)>::decode(positional(&args).unwrap()).unwrap();
        assert_eq!(a, 1);
        assert_eq!(b, "two");
        assert_eq!(c, Point { x: 3, y: 4 });
    }

    #[test]
    fn test_short_array_is_arity_mismatch() {
        let args = json!([1]);
        let err = <(i64, i64)>::decode(positional(&args).unwrap()).unwrap_err();
        assert!(matches!(
            err,
            RpcError::ArityMismatch {
                expected: 2,
                actual: 1
            }
        ));
    }

    #[test]
    fn test_long_array_is_arity_mismatch_regardless_of_content() {
        // The surplus element would not even parse as i64
        let args = json!([1, 2, "not a number"]);
        let err = <(i64, i64)>::decode(positional(&args).unwrap()).unwrap_err();
        assert!(matches!(
            err,
            RpcError::ArityMismatch {
                expected: 2,
                actual: 3
            }
        ));

        // Wrong content but wrong count too: count wins
        let args = json!(["x"]);
        let err = <(i64, i64)>::decode(positional(&args).unwrap()).unwrap_err();
        assert!(matches!(err, RpcError::ArityMismatch { .. }));
    }

    #[test]
    fn test_empty_parameter_list() {
        assert!(<()>::decode(&[]).is_ok());
        let err = <()>::decode(&[json!(1)]).unwrap_err();
        assert!(matches!(
            err,
            RpcError::ArityMismatch {
                expected: 0,
                actual: 1
            }
        ));
    }

    #[test]
    fn test_wrong_element_type_is_invalid_argument() {
        let args = json!([1, "cica"]);
        let err = <(i64, i64)>::decode(positional(&args).unwrap()).unwrap_err();
        match err {
            RpcError::InvalidArgument {
                position, expected, ..
            } => {
                assert_eq!(position, 1);
                assert_eq!(expected, "i64");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_null_binds_to_option() {
        let args = json!([null]);
        let (value,) = <(Option<String>,)>::decode(positional(&args).unwrap()).unwrap();
        assert!(value.is_none());
    }

    #[test]
    fn test_non_array_payload_is_malformed() {
        let payload = json!({"a": 1});
        assert!(matches!(
            positional(&payload),
            Err(RpcError::MalformedRequest(_))
        ));
    }

    #[test]
    fn test_type_names_follow_declaration_order() {
        assert_eq!(<(i32, String)>::type_names(), vec!["i32", "alloc::string::String"]);
        assert_eq!(<(i32, String)>::ARITY, 2);
    }
}
