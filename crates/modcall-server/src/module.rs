//! Module registration
//!
//! A module is a set of methods sharing one implementation type. The
//! [`ModuleBuilder`] declares its public name, how instances are produced and
//! how long they live, its module-level aspects, and its methods.

use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;

use modcall_rpc_core::RpcError;

use crate::aspect::{Aspect, BoundCall};
use crate::aspects::{IsolationLevel, ParameterRules, RequiredRoles};
use crate::descriptor::{AspectDescriptor, ReturnKind};
use crate::method::Method;
use crate::scope::RequestScope;

/// How long a resolved module instance lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Lifetime {
    /// One instance for the whole process, created on first use
    Singleton,
    /// One instance per call
    #[default]
    Scoped,
    /// A new instance on every resolution
    Transient,
}

type Factory<T> = Arc<dyn Fn(&RequestScope) -> Result<T, RpcError> + Send + Sync>;

enum Source<T> {
    Factory(Factory<T>),
    Instance(Arc<T>),
}

/// Declares a module backed by `T`
pub struct ModuleBuilder<T> {
    name: String,
    alias: Option<String>,
    ignored: bool,
    lifetime: Lifetime,
    source: Source<T>,
    descriptor: AspectDescriptor,
    methods: Vec<Method<T>>,
}

impl<T: Send + Sync + 'static> ModuleBuilder<T> {
    /// Instances are produced by `factory`, which may resolve other scoped
    /// services through the scope it receives
    pub fn new<F>(name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&RequestScope) -> Result<T, RpcError> + Send + Sync + 'static,
    {
        Self::with_source(name, Source::Factory(Arc::new(factory)))
    }

    /// Every call is served by `instance`
    pub fn from_instance(name: impl Into<String>, instance: T) -> Self {
        let mut builder = Self::with_source(name, Source::Instance(Arc::new(instance)));
        builder.lifetime = Lifetime::Singleton;
        builder
    }

    fn with_source(name: impl Into<String>, source: Source<T>) -> Self {
        Self {
            name: name.into(),
            alias: None,
            ignored: false,
            lifetime: Lifetime::default(),
            source,
            descriptor: AspectDescriptor::default(),
            methods: Vec::new(),
        }
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Keep the whole module out of dispatch and of the published schema
    pub fn ignore(mut self) -> Self {
        self.ignored = true;
        self
    }

    /// Ignored for modules built with [`ModuleBuilder::from_instance`]
    pub fn lifetime(mut self, lifetime: Lifetime) -> Self {
        if matches!(self.source, Source::Factory(_)) {
            self.lifetime = lifetime;
        }
        self
    }

    /// Wrap every method, outside the method's own aspects
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

    pub fn method(mut self, method: Method<T>) -> Self {
        self.methods.push(method);
        self
    }

    /// Erase `T`, pairing every method with the instance resolver
    pub(crate) fn into_registration(self) -> ModuleRegistration {
        let public_name = self.alias.unwrap_or(self.name);
        let resolver = Arc::new(Resolver {
            key: public_name.clone(),
            lifetime: self.lifetime,
            source: self.source,
            singleton: Mutex::new(None),
        });

        let methods = self
            .methods
            .into_iter()
            .map(|method| {
                let binder = method.binder();
                let resolver = resolver.clone();
                let bind: ErasedBinder = Arc::new(move |args: &[Value], scope: &RequestScope| {
                    let pending = binder(args)?;
                    let target = resolver.resolve(scope)?;
                    Ok(pending(target, scope.context().clone()))
                });
                MethodRegistration {
                    name: method.public_name().to_string(),
                    ignored: method.is_ignored(),
                    return_kind: method.return_kind(),
                    parameter_types: method.parameter_types().to_vec(),
                    descriptor: method.descriptor().clone(),
                    parameter_rules: method.parameter_rules().to_vec(),
                    bind,
                }
            })
            .collect();

        ModuleRegistration {
            name: public_name,
            type_name: std::any::type_name::<T>(),
            lifetime: self.lifetime,
            ignored: self.ignored,
            descriptor: self.descriptor,
            methods,
        }
    }
}

struct Resolver<T> {
    key: String,
    lifetime: Lifetime,
    source: Source<T>,
    singleton: Mutex<Option<Arc<T>>>,
}

impl<T: Send + Sync + 'static> Resolver<T> {
    fn resolve(&self, scope: &RequestScope) -> Result<Arc<T>, RpcError> {
        let factory = match &self.source {
            Source::Instance(instance) => return Ok(instance.clone()),
            Source::Factory(factory) => factory,
        };

        match self.lifetime {
            Lifetime::Singleton => {
                let mut slot = self.singleton.lock();
                if let Some(instance) = slot.as_ref() {
                    return Ok(instance.clone());
                }
                let instance = Arc::new(factory(scope)?);
                *slot = Some(instance.clone());
                Ok(instance)
            }
            Lifetime::Scoped => scope.get_or_try_insert(&self.key, |scope| factory(scope)),
            Lifetime::Transient => Ok(Arc::new(factory(scope)?)),
        }
    }
}

/// Decodes arguments, then resolves the target instance
pub(crate) type ErasedBinder =
    Arc<dyn Fn(&[Value], &RequestScope) -> Result<BoundCall, RpcError> + Send + Sync>;

pub(crate) struct MethodRegistration {
    pub(crate) name: String,
    pub(crate) ignored: bool,
    pub(crate) return_kind: ReturnKind,
    pub(crate) parameter_types: Vec<&'static str>,
    pub(crate) descriptor: AspectDescriptor,
    pub(crate) parameter_rules: Vec<ParameterRules>,
    pub(crate) bind: ErasedBinder,
}

/// A module with its implementation type erased, as kept by the registry
pub struct ModuleRegistration {
    pub(crate) name: String,
    pub(crate) type_name: &'static str,
    pub(crate) lifetime: Lifetime,
    pub(crate) ignored: bool,
    pub(crate) descriptor: AspectDescriptor,
    pub(crate) methods: Vec<MethodRegistration>,
}

impl ModuleRegistration {
    /// Public name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rust type backing the module
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn lifetime(&self) -> Lifetime {
        self.lifetime
    }

    pub fn is_ignored(&self) -> bool {
        self.ignored
    }
}
