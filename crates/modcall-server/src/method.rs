//! Exposed methods
//!
//! A [`Method`] pairs a public name with a typed implementation. The
//! constructor chosen ([`Method::sync`], [`Method::void`] or
//! [`Method::asynchronous`]) fixes the method's [`ReturnKind`]; the parameter
//! tuple fixes its arity and positional types.

use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

use modcall_rpc_core::{CallResult, ParamList, RpcError};

use crate::aspect::{Aspect, BoundCall};
use crate::aspects::{IsolationLevel, ParameterRules, RequiredRoles};
use crate::descriptor::{AspectDescriptor, ReturnKind};
use crate::scope::CallContext;

/// Arguments decoded, waiting for a target instance
pub(crate) type PendingCall<T> = Box<dyn FnOnce(Arc<T>, CallContext) -> BoundCall + Send>;

pub(crate) type Binder<T> =
    Arc<dyn Fn(&[Value]) -> Result<PendingCall<T>, RpcError> + Send + Sync>;

pub struct Method<T> {
    name: String,
    alias: Option<String>,
    ignored: bool,
    return_kind: ReturnKind,
    parameter_types: Vec<&'static str>,
    descriptor: AspectDescriptor,
    parameter_rules: Vec<ParameterRules>,
    binder: Binder<T>,
}

fn serialize_result<R: Serialize>(value: R) -> CallResult {
    serde_json::to_value(value)
        .map(Some)
        .map_err(|e| RpcError::unhandled(format!("failed to serialize result: {e}")))
}

impl<T: Send + Sync + 'static> Method<T> {
    fn with_binder(
        name: impl Into<String>,
        return_kind: ReturnKind,
        parameter_types: Vec<&'static str>,
        binder: Binder<T>,
    ) -> Self {
        Self {
            name: name.into(),
            alias: None,
            ignored: false,
            return_kind,
            parameter_types,
            descriptor: AspectDescriptor::default(),
            parameter_rules: Vec::new(),
            binder,
        }
    }

    /// Method returning a value
    pub fn sync<P, R, F>(name: impl Into<String>, handler: F) -> Self
    where
        P: ParamList,
        R: Serialize + 'static,
        F: Fn(&T, P, &CallContext) -> Result<R, RpcError> + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        let binder: Binder<T> = Arc::new(move |args: &[Value]| {
            let params = P::decode(args)?;
            let handler = handler.clone();
            let pending: PendingCall<T> = Box::new(move |target: Arc<T>, ctx: CallContext| {
                BoundCall::Sync(Box::new(move || {
                    serialize_result(handler(&target, params, &ctx)?)
                }))
            });
            Ok(pending)
        });
        Self::with_binder(name, ReturnKind::Value, P::type_names(), binder)
    }

    /// Method returning nothing; answers with a `null` result
    pub fn void<P, F>(name: impl Into<String>, handler: F) -> Self
    where
        P: ParamList,
        F: Fn(&T, P, &CallContext) -> Result<(), RpcError> + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        let binder: Binder<T> = Arc::new(move |args: &[Value]| {
            let params = P::decode(args)?;
            let handler = handler.clone();
            let pending: PendingCall<T> = Box::new(move |target: Arc<T>, ctx: CallContext| {
                BoundCall::Sync(Box::new(move || {
                    handler(&target, params, &ctx)?;
                    Ok(None)
                }))
            });
            Ok(pending)
        });
        Self::with_binder(name, ReturnKind::Void, P::type_names(), binder)
    }

    /// Method returning a future
    pub fn asynchronous<P, R, F, Fut>(name: impl Into<String>, handler: F) -> Self
    where
        P: ParamList,
        R: Serialize + Send + 'static,
        F: Fn(Arc<T>, P, CallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, RpcError>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let binder: Binder<T> = Arc::new(move |args: &[Value]| {
            let params = P::decode(args)?;
            let handler = handler.clone();
            let pending: PendingCall<T> = Box::new(move |target: Arc<T>, ctx: CallContext| {
                BoundCall::Async(Box::new(move || {
                    let call = handler(target, params, ctx);
                    async move { serialize_result(call.await?) }.boxed()
                }))
            });
            Ok(pending)
        });
        Self::with_binder(name, ReturnKind::Future, P::type_names(), binder)
    }

    /// Expose under `alias` instead of the declared name
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Keep out of dispatch and of the published schema
    pub fn ignore(mut self) -> Self {
        self.ignored = true;
        self
    }

    /// Wrap with `aspect`, after any aspect declared earlier
    pub fn aspect(mut self, aspect: Arc<dyn Aspect>) -> Self {
        self.descriptor.push(aspect);
        self
    }

    pub fn required_roles(mut self, roles: RequiredRoles) -> Self {
        self.descriptor.set_required_roles(roles);
        self
    }

    pub fn isolation_level(mut self, level: IsolationLevel) -> Self {
        self.descriptor.set_isolation_level(level);
        self
    }

    /// Checks run by a [`crate::aspects::ParameterValidator`] on this method
    pub fn validate(mut self, rules: ParameterRules) -> Self {
        self.parameter_rules.push(rules);
        self
    }
}

impl<T> Method<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name used on the wire
    pub fn public_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    pub fn is_ignored(&self) -> bool {
        self.ignored
    }

    pub fn return_kind(&self) -> ReturnKind {
        self.return_kind
    }

    pub fn parameter_types(&self) -> &[&'static str] {
        &self.parameter_types
    }

    pub(crate) fn descriptor(&self) -> &AspectDescriptor {
        &self.descriptor
    }

    pub(crate) fn parameter_rules(&self) -> &[ParameterRules] {
        &self.parameter_rules
    }

    pub(crate) fn binder(&self) -> Binder<T> {
        self.binder.clone()
    }
}
