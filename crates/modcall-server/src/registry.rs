//! Module registry and invocation compiler
//!
//! The registry is built once at startup and read-only afterwards. Every
//! exposed method owns a slot whose [`CompiledInvocation`] is created on the
//! first call and reused for the life of the process.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info};

use modcall_rpc_core::{CallResult, ModuleDispatcher, RequestContext, RpcError};

use crate::aspect::{Aspect, Invocation, run_chain};
use crate::descriptor::{AspectDescriptor, MethodInfo, ReturnKind};
use crate::module::{ErasedBinder, Lifetime, ModuleBuilder, ModuleRegistration};
use crate::scope::{CallContext, RequestScope};
use crate::{Result, ServerError};

/// Callable serving one method: binds arguments, resolves the target and
/// runs the aspect chain around it
pub struct CompiledInvocation {
    info: Arc<MethodInfo>,
    aspects: Vec<Arc<dyn Aspect>>,
    bind: ErasedBinder,
}

impl CompiledInvocation {
    pub fn info(&self) -> &MethodInfo {
        &self.info
    }

    /// Names of the wrapping aspects, outermost first
    pub fn aspect_names(&self) -> Vec<&'static str> {
        self.aspects.iter().map(|aspect| aspect.name()).collect()
    }

    pub async fn invoke(&self, context: RequestContext) -> CallResult {
        let args = context.positional_args()?.to_vec();
        let session_id = context.session_id().map(str::to_string);
        let cancellation = context.cancellation().clone();

        let call = {
            let scope = RequestScope::new(CallContext::new(session_id.clone(), cancellation.clone()));
            (self.bind)(&args, &scope)?
        };

        let invocation = Invocation::new(self.info.clone(), args, session_id, cancellation);
        run_chain(&self.aspects, &invocation, self.info.return_kind(), call).await
    }
}

struct MethodSlot {
    info: Arc<MethodInfo>,
    descriptor: AspectDescriptor,
    bind: ErasedBinder,
    compiled: OnceLock<Arc<CompiledInvocation>>,
}

struct RegisteredModule {
    type_name: &'static str,
    lifetime: Lifetime,
    descriptor: AspectDescriptor,
    methods: HashMap<String, MethodSlot>,
}

impl RegisteredModule {
    fn compiled(&self, slot: &MethodSlot) -> Arc<CompiledInvocation> {
        slot.compiled
            .get_or_init(|| {
                debug!(
                    module = slot.info.module(),
                    method = slot.info.method(),
                    "compiling invocation"
                );
                Arc::new(CompiledInvocation {
                    info: slot.info.clone(),
                    aspects: AspectDescriptor::chain(&self.descriptor, &slot.descriptor),
                    bind: slot.bind.clone(),
                })
            })
            .clone()
    }
}

/// Published description of a module
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModuleSchema {
    pub name: String,
    pub methods: Vec<MethodSchema>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MethodSchema {
    pub name: String,
    pub parameters: Vec<String>,
    pub returns: ReturnKind,
}

/// Every exposed module, addressable by `(module, method)`
pub struct ModuleRegistry {
    modules: HashMap<String, RegisteredModule>,
}

impl ModuleRegistry {
    pub fn builder() -> ModuleRegistryBuilder {
        ModuleRegistryBuilder::default()
    }

    fn slot(&self, module: &str, method: &str) -> Option<(&RegisteredModule, &MethodSlot)> {
        let registered = self.modules.get(module)?;
        let slot = registered.methods.get(method)?;
        Some((registered, slot))
    }

    /// Compiled invocation of an exposed method, compiling it on first use
    pub fn invocation(&self, module: &str, method: &str) -> Option<Arc<CompiledInvocation>> {
        self.slot(module, method)
            .map(|(registered, slot)| registered.compiled(slot))
    }

    /// Number of methods compiled so far
    pub fn compiled_count(&self) -> usize {
        self.modules
            .values()
            .flat_map(|module| module.methods.values())
            .filter(|slot| slot.compiled.get().is_some())
            .count()
    }

    pub fn module_count(&self) -> usize {
        self.modules.len()
    }

    /// Rust type and lifetime behind a public module name
    pub fn module_info(&self, module: &str) -> Option<(&'static str, Lifetime)> {
        self.modules
            .get(module)
            .map(|registered| (registered.type_name, registered.lifetime))
    }

    /// Modules and methods open to callers, sorted by name
    pub fn schema(&self) -> Vec<ModuleSchema> {
        let mut modules: Vec<ModuleSchema> = self
            .modules
            .iter()
            .map(|(name, registered)| {
                let mut methods: Vec<MethodSchema> = registered
                    .methods
                    .iter()
                    .map(|(method, slot)| MethodSchema {
                        name: method.clone(),
                        parameters: slot
                            .info
                            .parameter_types()
                            .iter()
                            .map(|t| t.to_string())
                            .collect(),
                        returns: slot.info.return_kind(),
                    })
                    .collect();
                methods.sort_by(|a, b| a.name.cmp(&b.name));
                ModuleSchema {
                    name: name.clone(),
                    methods,
                }
            })
            .collect();
        modules.sort_by(|a, b| a.name.cmp(&b.name));
        modules
    }
}

#[async_trait]
impl ModuleDispatcher for ModuleRegistry {
    async fn dispatch(&self, context: RequestContext) -> CallResult {
        let invocation = self
            .invocation(context.module(), context.method())
            .ok_or_else(|| RpcError::MissingModule {
                module: context.module().to_string(),
                method: context.method().to_string(),
            })?;

        debug!(
            module = context.module(),
            method = context.method(),
            "dispatching call"
        );
        invocation.invoke(context).await
    }

    fn contains(&self, module: &str, method: &str) -> bool {
        self.slot(module, method).is_some()
    }

    fn endpoints(&self) -> Vec<(String, String)> {
        self.modules
            .iter()
            .flat_map(|(module, registered)| {
                registered
                    .methods
                    .keys()
                    .map(move |method| (module.clone(), method.clone()))
            })
            .collect()
    }
}

/// Collects module registrations and validates them as a whole
#[derive(Default)]
pub struct ModuleRegistryBuilder {
    modules: Vec<ModuleRegistration>,
}

impl ModuleRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: Send + Sync + 'static>(mut self, module: ModuleBuilder<T>) -> Self {
        self.modules.push(module.into_registration());
        self
    }

    /// Fails on the first name conflict; otherwise reports every aspect that
    /// rejected a method declaration
    pub fn build(self) -> Result<ModuleRegistry> {
        let mut modules: HashMap<String, RegisteredModule> = HashMap::new();
        let mut validation_errors = Vec::new();

        for registration in self.modules {
            if registration.ignored {
                debug!(module = %registration.name, "skipping ignored module");
                continue;
            }
            if modules.contains_key(&registration.name) {
                return Err(ServerError::DuplicateRegistration {
                    kind: "module",
                    name: registration.name,
                });
            }

            let mut methods = HashMap::new();
            for method in registration.methods {
                if method.ignored {
                    continue;
                }
                if methods.contains_key(&method.name) {
                    return Err(ServerError::DuplicateRegistration {
                        kind: "method",
                        name: format!("{}.{}", registration.name, method.name),
                    });
                }

                let info = MethodInfo::new(
                    registration.name.clone(),
                    method.name.clone(),
                    method.parameter_types,
                    method.return_kind,
                    &registration.descriptor,
                    &method.descriptor,
                    method.parameter_rules,
                );
                for aspect in AspectDescriptor::chain(&registration.descriptor, &method.descriptor)
                {
                    if let Err(err) = aspect.validate(&info) {
                        validation_errors.push(format!("{}: {}", aspect.name(), err));
                    }
                }

                methods.insert(
                    method.name,
                    MethodSlot {
                        info: Arc::new(info),
                        descriptor: method.descriptor,
                        bind: method.bind,
                        compiled: OnceLock::new(),
                    },
                );
            }

            modules.insert(
                registration.name,
                RegisteredModule {
                    type_name: registration.type_name,
                    lifetime: registration.lifetime,
                    descriptor: registration.descriptor,
                    methods,
                },
            );
        }

        if !validation_errors.is_empty() {
            return Err(ServerError::Configuration(format!(
                "Validation errors: {}",
                validation_errors.join(", ")
            )));
        }

        info!(
            modules = modules.len(),
            methods = modules.values().map(|m| m.methods.len()).sum::<usize>(),
            "module registry built"
        );
        Ok(ModuleRegistry { modules })
    }
}
