//! Declared metadata of modules and methods

use serde::Serialize;
use std::fmt;
use std::sync::Arc;

use crate::aspect::Aspect;
use crate::aspects::{IsolationLevel, ParameterRules, RequiredRoles};

/// Shape of a method's return, fixed when the method is declared
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReturnKind {
    Value,
    Future,
    Void,
}

/// Aspects and attributes attached to a module or a method
#[derive(Clone, Default)]
pub struct AspectDescriptor {
    aspects: Vec<Arc<dyn Aspect>>,
    required_roles: Option<RequiredRoles>,
    isolation_level: Option<IsolationLevel>,
}

impl AspectDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, aspect: Arc<dyn Aspect>) {
        self.aspects.push(aspect);
    }

    pub fn set_required_roles(&mut self, roles: RequiredRoles) {
        self.required_roles = Some(roles);
    }

    pub fn set_isolation_level(&mut self, level: IsolationLevel) {
        self.isolation_level = Some(level);
    }

    /// Aspects in declaration order
    pub fn aspects(&self) -> &[Arc<dyn Aspect>] {
        &self.aspects
    }

    pub fn required_roles(&self) -> Option<&RequiredRoles> {
        self.required_roles.as_ref()
    }

    pub fn isolation_level(&self) -> Option<IsolationLevel> {
        self.isolation_level
    }

    /// Module aspects first, then method aspects
    pub(crate) fn chain(module: &Self, method: &Self) -> Vec<Arc<dyn Aspect>> {
        module
            .aspects
            .iter()
            .chain(method.aspects.iter())
            .cloned()
            .collect()
    }
}

impl fmt::Debug for AspectDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.aspects.iter().map(|a| a.name()).collect();
        f.debug_struct("AspectDescriptor")
            .field("aspects", &names)
            .field("required_roles", &self.required_roles)
            .field("isolation_level", &self.isolation_level)
            .finish()
    }
}

/// Everything known about an exposed method once its module is registered.
///
/// Attributes declared on the method take precedence over the module's.
#[derive(Debug, Clone)]
pub struct MethodInfo {
    module: String,
    method: String,
    parameter_types: Vec<&'static str>,
    return_kind: ReturnKind,
    required_roles: Option<RequiredRoles>,
    isolation_level: Option<IsolationLevel>,
    parameter_rules: Vec<ParameterRules>,
}

impl MethodInfo {
    pub(crate) fn new(
        module: impl Into<String>,
        method: impl Into<String>,
        parameter_types: Vec<&'static str>,
        return_kind: ReturnKind,
        module_descriptor: &AspectDescriptor,
        method_descriptor: &AspectDescriptor,
        parameter_rules: Vec<ParameterRules>,
    ) -> Self {
        Self {
            module: module.into(),
            method: method.into(),
            parameter_types,
            return_kind,
            required_roles: method_descriptor
                .required_roles()
                .or(module_descriptor.required_roles())
                .cloned(),
            isolation_level: method_descriptor
                .isolation_level()
                .or(module_descriptor.isolation_level()),
            parameter_rules,
        }
    }

    /// Public module name
    pub fn module(&self) -> &str {
        &self.module
    }

    /// Public method name
    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn parameter_types(&self) -> &[&'static str] {
        &self.parameter_types
    }

    pub fn arity(&self) -> usize {
        self.parameter_types.len()
    }

    pub fn return_kind(&self) -> ReturnKind {
        self.return_kind
    }

    pub fn required_roles(&self) -> Option<&RequiredRoles> {
        self.required_roles.as_ref()
    }

    pub fn isolation_level(&self) -> Option<IsolationLevel> {
        self.isolation_level
    }

    pub fn parameter_rules(&self) -> &[ParameterRules] {
        &self.parameter_rules
    }
}

#[cfg(test)]
impl MethodInfo {
    pub(crate) fn for_test(module: &str, method: &str, return_kind: ReturnKind) -> Self {
        Self::new(
            module,
            method,
            Vec::new(),
            return_kind,
            &AspectDescriptor::default(),
            &AspectDescriptor::default(),
            Vec::new(),
        )
    }

    pub(crate) fn with_required_roles(mut self, roles: Option<RequiredRoles>) -> Self {
        self.required_roles = roles;
        self
    }

    pub(crate) fn with_isolation_level(mut self, level: Option<IsolationLevel>) -> Self {
        self.isolation_level = level;
        self
    }
}
