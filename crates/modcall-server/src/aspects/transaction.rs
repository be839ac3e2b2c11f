//! Transactional wrapping of methods that declare an isolation level

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

use modcall_rpc_core::{CallResult, RpcError};

use crate::aspect::{Aspect, AsyncNext, Invocation, SyncNext};
use crate::descriptor::MethodInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
    Snapshot,
}

/// An open transaction. Consumed by whichever of commit or rollback runs.
#[async_trait]
pub trait Transaction: Send {
    async fn commit(self: Box<Self>) -> Result<(), RpcError>;

    async fn rollback(self: Box<Self>) -> Result<(), RpcError>;
}

/// Source of transactions
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    async fn begin_transaction(
        &self,
        isolation: IsolationLevel,
    ) -> Result<Box<dyn Transaction>, RpcError>;
}

/// Wraps declared methods in begin/commit/rollback.
///
/// The connection provider is asked for a connection only when a declared
/// method is actually called. Declared methods always run on the
/// asynchronous path, whatever they return, so the provider may await on the
/// caller's runtime.
pub struct TransactionManager {
    provider: Arc<dyn ConnectionProvider>,
}

impl TransactionManager {
    pub fn new(provider: Arc<dyn ConnectionProvider>) -> Self {
        Self { provider }
    }

    async fn finish(
        transaction: Box<dyn Transaction>,
        invocation: &Invocation,
        result: CallResult,
    ) -> CallResult {
        match result {
            Ok(value) => {
                transaction.commit().await?;
                debug!(endpoint = %invocation.endpoint_key(), "transaction committed");
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = transaction.rollback().await {
                    warn!(
                        endpoint = %invocation.endpoint_key(),
                        error = %rollback_err,
                        "rollback failed"
                    );
                }
                debug!(endpoint = %invocation.endpoint_key(), "transaction rolled back");
                Err(err)
            }
        }
    }
}

impl Aspect for TransactionManager {
    fn name(&self) -> &'static str {
        "transaction_manager"
    }

    fn awaits(&self, info: &MethodInfo) -> bool {
        info.isolation_level().is_some()
    }

    fn decorate(&self, invocation: &Invocation, next: SyncNext<'_>) -> CallResult {
        if invocation.info().isolation_level().is_some() {
            return Err(RpcError::unhandled(format!(
                "{} needs a transaction but reached the synchronous chain",
                invocation.endpoint_key()
            )));
        }
        next.proceed(invocation)
    }

    fn decorate_async<'a>(
        &'a self,
        invocation: &'a Invocation,
        next: AsyncNext<'a>,
    ) -> BoxFuture<'a, CallResult> {
        Box::pin(async move {
            let Some(isolation) = invocation.info().isolation_level() else {
                return next.proceed(invocation).await;
            };

            let transaction = self.provider.begin_transaction(isolation).await?;
            let result = next.proceed(invocation).await;
            Self::finish(transaction, invocation, result).await
        })
    }
}
