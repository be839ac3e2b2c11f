//! Per-call scope and the context handed to module methods

use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use modcall_rpc_core::{CancellationHandle, RpcError};

/// What a module method sees of the call that invoked it
#[derive(Debug, Clone)]
pub struct CallContext {
    session_id: Option<String>,
    cancellation: CancellationHandle,
}

impl CallContext {
    pub fn new(session_id: Option<String>, cancellation: CancellationHandle) -> Self {
        Self {
            session_id,
            cancellation,
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Cancellation signal of the session; long-running methods should watch it
    pub fn cancellation(&self) -> &CancellationHandle {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// Instances shared by everything resolved during one call.
///
/// `Scoped` module registrations resolve to a single instance per scope.
/// A scope is never shared between calls.
pub struct RequestScope {
    context: CallContext,
    instances: Mutex<HashMap<String, Arc<dyn Any + Send + Sync>>>,
}

impl RequestScope {
    pub fn new(context: CallContext) -> Self {
        Self {
            context,
            instances: Mutex::new(HashMap::new()),
        }
    }

    pub fn context(&self) -> &CallContext {
        &self.context
    }

    pub fn session_id(&self) -> Option<&str> {
        self.context.session_id()
    }

    /// Instance stored under `key`, created with `create` on first request.
    ///
    /// `create` runs without the scope lock held, so it may resolve other
    /// scoped instances itself.
    pub fn get_or_try_insert<T, F>(&self, key: &str, create: F) -> Result<Arc<T>, RpcError>
    where
        T: Send + Sync + 'static,
        F: FnOnce(&RequestScope) -> Result<T, RpcError>,
    {
        if let Some(existing) = self.lookup::<T>(key)? {
            return Ok(existing);
        }

        let created: Arc<T> = Arc::new(create(self)?);
        let mut instances = self.instances.lock();
        let stored = instances
            .entry(key.to_string())
            .or_insert_with(|| created.clone() as Arc<dyn Any + Send + Sync>)
            .clone();
        drop(instances);

        downcast(key, stored)
    }

    fn lookup<T: Send + Sync + 'static>(&self, key: &str) -> Result<Option<Arc<T>>, RpcError> {
        let existing = self.instances.lock().get(key).cloned();
        existing.map(|instance| downcast(key, instance)).transpose()
    }

    /// Number of instances created in this scope
    pub fn len(&self) -> usize {
        self.instances.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn downcast<T: Send + Sync + 'static>(
    key: &str,
    instance: Arc<dyn Any + Send + Sync>,
) -> Result<Arc<T>, RpcError> {
    instance.downcast::<T>().map_err(|_| {
        RpcError::Configuration(format!(
            "scoped instance '{key}' is not a {}",
            std::any::type_name::<T>()
        ))
    })
}
