//! Parameter validation aspect
//!
//! Checks are declared per parameter on the method ([`crate::Method::validate`])
//! and run in declaration order before the target is invoked. A `null`
//! argument skips every check that does not explicitly handle null.

use regex::Regex;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use modcall_rpc_core::{RpcError, ValidationError, ValidationFailure};

use crate::aspect::{Aspect, Invocation};

/// A single check on one argument value
pub trait ParameterCheck: fmt::Debug + Send + Sync {
    /// Push one error per violation onto `errors`
    fn validate(&self, parameter: &str, value: &Value, errors: &mut Vec<ValidationError>);

    /// Whether the check wants to see `null` values
    fn supports_null(&self) -> bool {
        false
    }
}

/// The ordered checks of one positional parameter
#[derive(Debug, Clone)]
pub struct ParameterRules {
    position: usize,
    name: String,
    checks: Vec<Arc<dyn ParameterCheck>>,
}

impl ParameterRules {
    pub fn new(position: usize, name: impl Into<String>) -> Self {
        Self {
            position,
            name: name.into(),
            checks: Vec::new(),
        }
    }

    pub fn check(mut self, check: impl ParameterCheck + 'static) -> Self {
        self.checks.push(Arc::new(check));
        self
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn checks(&self) -> &[Arc<dyn ParameterCheck>] {
        &self.checks
    }
}

/// Rejects `null`
#[derive(Debug, Clone, Copy)]
pub struct NotNull;

impl ParameterCheck for NotNull {
    fn validate(&self, parameter: &str, value: &Value, errors: &mut Vec<ValidationError>) {
        if value.is_null() {
            errors.push(ValidationError::new(parameter, "must not be null"));
        }
    }

    fn supports_null(&self) -> bool {
        true
    }
}

/// Inclusive numeric bounds
#[derive(Debug, Clone, Copy)]
pub struct Range {
    min: f64,
    max: f64,
}

impl Range {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }
}

impl ParameterCheck for Range {
    fn validate(&self, parameter: &str, value: &Value, errors: &mut Vec<ValidationError>) {
        match value.as_f64() {
            Some(number) if number >= self.min && number <= self.max => {}
            Some(number) => errors.push(ValidationError::new(
                parameter,
                format!("{number} is outside [{}, {}]", self.min, self.max),
            )),
            None => errors.push(ValidationError::new(parameter, "must be a number")),
        }
    }
}

/// Length bounds for strings and arrays
#[derive(Debug, Clone, Copy)]
pub struct Length {
    min: usize,
    max: Option<usize>,
}

impl Length {
    pub fn between(min: usize, max: usize) -> Self {
        Self {
            min,
            max: Some(max),
        }
    }

    pub fn at_least(min: usize) -> Self {
        Self { min, max: None }
    }
}

impl ParameterCheck for Length {
    fn validate(&self, parameter: &str, value: &Value, errors: &mut Vec<ValidationError>) {
        let length = match value {
            Value::String(s) => s.chars().count(),
            Value::Array(items) => items.len(),
            _ => {
                errors.push(ValidationError::new(parameter, "has no length"));
                return;
            }
        };

        if length < self.min {
            errors.push(ValidationError::new(
                parameter,
                format!("length {length} is below the minimum of {}", self.min),
            ));
        } else if let Some(max) = self.max.filter(|max| length > *max) {
            errors.push(ValidationError::new(
                parameter,
                format!("length {length} exceeds the maximum of {max}"),
            ));
        }
    }
}

/// String must match a regular expression
#[derive(Debug, Clone)]
pub struct Pattern {
    regex: Regex,
}

impl Pattern {
    pub fn new(pattern: &str) -> Result<Self, RpcError> {
        let regex = Regex::new(pattern)
            .map_err(|e| RpcError::Configuration(format!("invalid pattern '{pattern}': {e}")))?;
        Ok(Self { regex })
    }
}

impl ParameterCheck for Pattern {
    fn validate(&self, parameter: &str, value: &Value, errors: &mut Vec<ValidationError>) {
        match value.as_str() {
            Some(s) if self.regex.is_match(s) => {}
            Some(_) => errors.push(ValidationError::new(
                parameter,
                format!("does not match '{}'", self.regex.as_str()),
            )),
            None => errors.push(ValidationError::new(parameter, "must be a string")),
        }
    }
}

/// Checks applied to named properties of an object argument.
///
/// Errors are reported against `parameter.property`; nesting another
/// `Properties` check extends the path further.
#[derive(Debug, Clone, Default)]
pub struct Properties {
    properties: Vec<(String, Vec<Arc<dyn ParameterCheck>>)>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn property(
        mut self,
        name: impl Into<String>,
        checks: Vec<Arc<dyn ParameterCheck>>,
    ) -> Self {
        self.properties.push((name.into(), checks));
        self
    }
}

impl ParameterCheck for Properties {
    fn validate(&self, parameter: &str, value: &Value, errors: &mut Vec<ValidationError>) {
        let Some(object) = value.as_object() else {
            errors.push(ValidationError::new(parameter, "must be an object"));
            return;
        };

        for (name, checks) in &self.properties {
            let path = format!("{parameter}.{name}");
            let property = object.get(name).unwrap_or(&Value::Null);
            run_checks(&path, property, checks, errors);
        }
    }
}

/// Check backed by a closure; `message` is reported when it returns false
pub struct Predicate {
    message: String,
    test: Box<dyn Fn(&Value) -> bool + Send + Sync>,
}

impl Predicate {
    pub fn new(
        message: impl Into<String>,
        test: impl Fn(&Value) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            test: Box::new(test),
        }
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Predicate")
            .field("message", &self.message)
            .finish_non_exhaustive()
    }
}

impl ParameterCheck for Predicate {
    fn validate(&self, parameter: &str, value: &Value, errors: &mut Vec<ValidationError>) {
        if !(self.test)(value) {
            errors.push(ValidationError::new(parameter, self.message.clone()));
        }
    }
}

fn run_checks(
    parameter: &str,
    value: &Value,
    checks: &[Arc<dyn ParameterCheck>],
    errors: &mut Vec<ValidationError>,
) {
    for check in checks {
        if value.is_null() && !check.supports_null() {
            continue;
        }
        check.validate(parameter, value, errors);
    }
}

/// Runs the parameter rules declared on the invoked method
#[derive(Debug, Clone, Copy, Default)]
pub struct ParameterValidator {
    aggregate: bool,
}

impl ParameterValidator {
    /// Stop at the first failing check
    pub fn new() -> Self {
        Self::default()
    }

    /// Run every check and raise all failures together
    pub fn aggregate() -> Self {
        Self { aggregate: true }
    }

    pub fn is_aggregate(&self) -> bool {
        self.aggregate
    }

    pub fn check(&self, rules: &[ParameterRules], args: &[Value]) -> Result<(), RpcError> {
        let mut errors = Vec::new();

        for rule in rules {
            let value = args.get(rule.position()).unwrap_or(&Value::Null);
            for check in rule.checks() {
                if value.is_null() && !check.supports_null() {
                    continue;
                }
                check.validate(rule.name(), value, &mut errors);
                if !self.aggregate && !errors.is_empty() {
                    return Err(RpcError::Validation(ValidationFailure::single(
                        errors.swap_remove(0),
                    )));
                }
            }
        }

        match ValidationFailure::aggregate(errors) {
            Some(failure) => Err(RpcError::Validation(failure)),
            None => Ok(()),
        }
    }
}

impl Aspect for ParameterValidator {
    fn name(&self) -> &'static str {
        "parameter_validator"
    }

    fn before(&self, invocation: &Invocation) -> Result<(), RpcError> {
        self.check(invocation.info().parameter_rules(), invocation.args())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rules() -> Vec<ParameterRules> {
        vec![
            ParameterRules::new(0, "name")
                .check(NotNull)
                .check(Length::between(1, 8)),
            ParameterRules::new(1, "age").check(Range::new(0.0, 150.0)),
        ]
    }

    #[test]
    fn test_valid_arguments_pass() {
        let validator = ParameterValidator::aggregate();
        assert!(validator.check(&rules(), &[json!("Ann"), json!(30)]).is_ok());
    }

    #[test]
    fn test_aggregate_collects_every_failure() {
        let validator = ParameterValidator::aggregate();
        let err = validator
            .check(&rules(), &[json!("far too long"), json!(200)])
            .unwrap_err();

        let RpcError::Validation(failure) = err else {
            panic!("expected a validation failure, got {err:?}");
        };
        assert!(failure.is_aggregate());
        assert_eq!(failure.failures().len(), 2);
        assert_eq!(failure.failures()[0].parameter, "name");
        assert_eq!(failure.failures()[1].parameter, "age");
        let message = failure.to_string();
        assert!(message.contains("exceeds the maximum of 8"));
        assert!(message.contains("outside [0, 150]"));
    }

    #[test]
    fn test_first_failure_stops_checking() {
        let validator = ParameterValidator::new();
        let err = validator
            .check(&rules(), &[json!("far too long"), json!(200)])
            .unwrap_err();

        let RpcError::Validation(failure) = err else {
            panic!("expected a validation failure, got {err:?}");
        };
        assert!(!failure.is_aggregate());
        assert_eq!(failure.failures()[0].parameter, "name");
    }

    #[test]
    fn test_null_skips_checks_that_do_not_support_it() {
        let rules = vec![ParameterRules::new(0, "nickname").check(Length::at_least(3))];
        assert!(ParameterValidator::new().check(&rules, &[Value::Null]).is_ok());

        let rules = vec![
            ParameterRules::new(0, "nickname")
                .check(NotNull)
                .check(Length::at_least(3)),
        ];
        let err = ParameterValidator::aggregate()
            .check(&rules, &[Value::Null])
            .unwrap_err();
        let RpcError::Validation(failure) = err else {
            panic!("expected a validation failure");
        };
        assert_eq!(failure.failures().len(), 1);
        assert_eq!(failure.failures()[0].message, "must not be null");
    }

    #[test]
    fn test_properties_recurse_with_paths() {
        let address = Properties::new().property(
            "zip",
            vec![Arc::new(Pattern::new(r"^\d{4}$").unwrap()) as Arc<dyn ParameterCheck>],
        );
        let person = Properties::new()
            .property("name", vec![Arc::new(NotNull) as Arc<dyn ParameterCheck>])
            .property("address", vec![Arc::new(address) as Arc<dyn ParameterCheck>]);
        let rules = vec![ParameterRules::new(0, "person").check(person)];

        let err = ParameterValidator::aggregate()
            .check(&rules, &[json!({"address": {"zip": "12a4"}})])
            .unwrap_err();
        let RpcError::Validation(failure) = err else {
            panic!("expected a validation failure");
        };
        let paths: Vec<&str> = failure
            .failures()
            .iter()
            .map(|f| f.parameter.as_str())
            .collect();
        assert_eq!(paths, vec!["person.name", "person.address.zip"]);
    }

    #[test]
    fn test_predicate_and_invalid_pattern() {
        let even = Predicate::new("must be even", |v| v.as_i64().is_some_and(|n| n % 2 == 0));
        let rules = vec![ParameterRules::new(0, "n").check(even)];
        assert!(ParameterValidator::new().check(&rules, &[json!(4)]).is_ok());
        assert!(ParameterValidator::new().check(&rules, &[json!(3)]).is_err());

        assert!(matches!(
            Pattern::new("(unclosed"),
            Err(RpcError::Configuration(_))
        ));
    }

    #[test]
    fn test_validation_failure_maps_to_bad_request() {
        let err = ParameterValidator::new()
            .check(&rules(), &[json!(""), json!(1)])
            .unwrap_err();
        assert_eq!(err.status_code(), 400);
    }
}
