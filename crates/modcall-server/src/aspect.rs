//! Call interception
//!
//! An [`Aspect`] wraps the dispatch of a method. Every aspect has a
//! synchronous decorator and an asynchronous one; which of the two runs is
//! decided once per method by its declared [`ReturnKind`], never by the value
//! a call returns. A method returning a value or nothing still takes the
//! asynchronous path when one of its aspects has to await around the call
//! (see [`Aspect::awaits`]). Both decorators receive a continuation
//! ([`SyncNext`] or [`AsyncNext`]) to the remaining aspects and finally the
//! target.
//!
//! Aspects that only need to look at a call before it proceeds implement
//! [`Aspect::before`] and inherit both decorators.

use futures::future::BoxFuture;
use serde_json::Value;
use std::sync::Arc;

use modcall_rpc_core::{CallResult, CancellationHandle, RpcError};

use crate::descriptor::{MethodInfo, ReturnKind};

/// One call as seen by the aspect chain
#[derive(Debug)]
pub struct Invocation {
    info: Arc<MethodInfo>,
    args: Vec<Value>,
    session_id: Option<String>,
    cancellation: CancellationHandle,
}

impl Invocation {
    pub fn new(
        info: Arc<MethodInfo>,
        args: Vec<Value>,
        session_id: Option<String>,
        cancellation: CancellationHandle,
    ) -> Self {
        Self {
            info,
            args,
            session_id,
            cancellation,
        }
    }

    pub fn info(&self) -> &MethodInfo {
        &self.info
    }

    pub fn module(&self) -> &str {
        self.info.module()
    }

    pub fn method(&self) -> &str {
        self.info.method()
    }

    /// Positional arguments as received; they already passed arity and type checks
    pub fn args(&self) -> &[Value] {
        &self.args
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn cancellation(&self) -> &CancellationHandle {
        &self.cancellation
    }

    /// `Module.Method`
    pub fn endpoint_key(&self) -> String {
        format!("{}.{}", self.module(), self.method())
    }
}

/// Interceptor wrapping method dispatch
pub trait Aspect: Send + Sync {
    /// Name used in logs and configuration errors
    fn name(&self) -> &'static str;

    /// Reject a method declaration this aspect cannot serve. Called for every
    /// method the aspect wraps when the registry is built.
    fn validate(&self, _info: &MethodInfo) -> Result<(), RpcError> {
        Ok(())
    }

    /// Whether wrapping `info` needs the asynchronous path even when the
    /// method itself returns a value or nothing
    fn awaits(&self, _info: &MethodInfo) -> bool {
        false
    }

    /// Check run before the call proceeds
    fn before(&self, _invocation: &Invocation) -> Result<(), RpcError> {
        Ok(())
    }

    /// Decorator for methods returning a value or nothing
    fn decorate(&self, invocation: &Invocation, next: SyncNext<'_>) -> CallResult {
        self.before(invocation)?;
        next.proceed(invocation)
    }

    /// Decorator for methods returning a future
    fn decorate_async<'a>(
        &'a self,
        invocation: &'a Invocation,
        next: AsyncNext<'a>,
    ) -> BoxFuture<'a, CallResult> {
        Box::pin(async move {
            self.before(invocation)?;
            next.proceed(invocation).await
        })
    }
}

pub(crate) type SyncTarget<'a> = Box<dyn FnOnce() -> CallResult + Send + 'a>;
pub(crate) type AsyncTarget<'a> = Box<dyn FnOnce() -> BoxFuture<'static, CallResult> + Send + 'a>;

/// Continuation of a synchronous chain
pub struct SyncNext<'a> {
    aspects: &'a [Arc<dyn Aspect>],
    target: SyncTarget<'a>,
}

impl<'a> SyncNext<'a> {
    pub(crate) fn new(aspects: &'a [Arc<dyn Aspect>], target: SyncTarget<'a>) -> Self {
        Self { aspects, target }
    }

    /// Run the remaining aspects, then the target
    pub fn proceed(self, invocation: &Invocation) -> CallResult {
        match self.aspects.split_first() {
            Some((aspect, rest)) => aspect.decorate(invocation, SyncNext::new(rest, self.target)),
            None => (self.target)(),
        }
    }
}

/// Continuation of an asynchronous chain
pub struct AsyncNext<'a> {
    aspects: &'a [Arc<dyn Aspect>],
    target: AsyncTarget<'a>,
}

impl<'a> AsyncNext<'a> {
    pub(crate) fn new(aspects: &'a [Arc<dyn Aspect>], target: AsyncTarget<'a>) -> Self {
        Self { aspects, target }
    }

    /// Run the remaining aspects, then await the target
    pub fn proceed(self, invocation: &'a Invocation) -> BoxFuture<'a, CallResult> {
        match self.aspects.split_first() {
            Some((aspect, rest)) => {
                aspect.decorate_async(invocation, AsyncNext::new(rest, self.target))
            }
            None => (self.target)(),
        }
    }
}

/// Run `aspects` around a bound call, choosing the path from `kind`
pub(crate) async fn run_chain(
    aspects: &[Arc<dyn Aspect>],
    invocation: &Invocation,
    kind: ReturnKind,
    call: BoundCall,
) -> CallResult {
    invocation.cancellation().check()?;

    let awaited = aspects.iter().any(|aspect| aspect.awaits(invocation.info()));
    match kind {
        ReturnKind::Value | ReturnKind::Void if !awaited => {
            let target = call.into_sync()?;
            SyncNext::new(aspects, target).proceed(invocation)
        }
        _ => {
            AsyncNext::new(aspects, call.into_async())
                .proceed(invocation)
                .await
        }
    }
}

/// A call with its arguments decoded and its target resolved, ready to run
pub enum BoundCall {
    Sync(SyncTarget<'static>),
    Async(AsyncTarget<'static>),
}

impl BoundCall {
    fn into_sync(self) -> Result<SyncTarget<'static>, RpcError> {
        match self {
            Self::Sync(target) => Ok(target),
            Self::Async(_) => Err(RpcError::unhandled(
                "asynchronous target bound to a synchronous chain",
            )),
        }
    }

    fn into_async(self) -> AsyncTarget<'static> {
        match self {
            Self::Async(target) => target,
            Self::Sync(target) => Box::new(move || Box::pin(async move { target() })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use parking_lot::Mutex;
    use serde_json::json;

    struct Recording {
        label: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Aspect for Recording {
        fn name(&self) -> &'static str {
            self.label
        }

        fn decorate(&self, invocation: &Invocation, next: SyncNext<'_>) -> CallResult {
            self.log.lock().push(format!("enter {} sync", self.label));
            let result = next.proceed(invocation);
            self.log.lock().push(format!("exit {} sync", self.label));
            result
        }

        fn decorate_async<'a>(
            &'a self,
            invocation: &'a Invocation,
            next: AsyncNext<'a>,
        ) -> BoxFuture<'a, CallResult> {
            Box::pin(async move {
                self.log.lock().push(format!("enter {} async", self.label));
                let result = next.proceed(invocation).await;
                self.log.lock().push(format!("exit {} async", self.label));
                result
            })
        }
    }

    struct Deny;

    impl Aspect for Deny {
        fn name(&self) -> &'static str {
            "deny"
        }

        fn before(&self, _invocation: &Invocation) -> Result<(), RpcError> {
            Err(RpcError::Unauthorized("denied".into()))
        }
    }

    fn invocation(kind: ReturnKind) -> Invocation {
        Invocation::new(
            Arc::new(MethodInfo::for_test("Calc", "Add", kind)),
            vec![json!(1)],
            None,
            CancellationHandle::new(),
        )
    }

    fn chain(log: &Arc<Mutex<Vec<String>>>) -> Vec<Arc<dyn Aspect>> {
        vec![
            Arc::new(Recording {
                label: "module",
                log: log.clone(),
            }),
            Arc::new(Recording {
                label: "method",
                log: log.clone(),
            }),
        ]
    }

    #[tokio::test]
    async fn test_sync_path_runs_in_declaration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let aspects = chain(&log);
        let target_log = log.clone();
        let call = BoundCall::Sync(Box::new(move || {
            target_log.lock().push("target".into());
            Ok(Some(json!(2)))
        }));

        let result = run_chain(&aspects, &invocation(ReturnKind::Value), ReturnKind::Value, call)
            .await
            .unwrap();

        assert_eq!(result, Some(json!(2)));
        assert_eq!(
            *log.lock(),
            vec![
                "enter module sync",
                "enter method sync",
                "target",
                "exit method sync",
                "exit module sync"
            ]
        );
    }

    #[tokio::test]
    async fn test_future_kind_selects_async_path() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let aspects = chain(&log);
        let call = BoundCall::Async(Box::new(|| async { Ok(None) }.boxed()));

        run_chain(&aspects, &invocation(ReturnKind::Future), ReturnKind::Future, call)
            .await
            .unwrap();

        assert!(log.lock().iter().all(|entry| entry.ends_with("async")));
        assert_eq!(log.lock().len(), 4);
    }

    #[tokio::test]
    async fn test_before_short_circuits_both_paths() {
        let aspects: Vec<Arc<dyn Aspect>> = vec![Arc::new(Deny)];

        let sync = BoundCall::Sync(Box::new(|| panic!("target must not run")));
        let err = run_chain(&aspects, &invocation(ReturnKind::Value), ReturnKind::Value, sync)
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Unauthorized(_)));

        let future = BoundCall::Async(Box::new(|| panic!("target must not run")));
        let err = run_chain(&aspects, &invocation(ReturnKind::Future), ReturnKind::Future, future)
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_sync_path_checks_cancellation_first() {
        let invocation = invocation(ReturnKind::Value);
        invocation.cancellation().cancel();
        let call = BoundCall::Sync(Box::new(|| panic!("target must not run")));

        let err = run_chain(&[], &invocation, ReturnKind::Value, call)
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Cancelled));
    }

    #[tokio::test]
    async fn test_async_path_checks_cancellation_first() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let aspects = chain(&log);
        let invocation = invocation(ReturnKind::Future);
        invocation.cancellation().cancel();
        let call = BoundCall::Async(Box::new(|| panic!("target must not run")));

        let err = run_chain(&aspects, &invocation, ReturnKind::Future, call)
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Cancelled));
        assert!(log.lock().is_empty());
    }

    struct Awaiting;

    impl Aspect for Awaiting {
        fn name(&self) -> &'static str {
            "awaiting"
        }

        fn awaits(&self, _info: &MethodInfo) -> bool {
            true
        }

        fn decorate(&self, _invocation: &Invocation, _next: SyncNext<'_>) -> CallResult {
            panic!("synchronous decorator must not run")
        }
    }

    #[tokio::test]
    async fn test_awaiting_aspect_moves_sync_method_to_async_path() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut aspects = chain(&log);
        aspects.push(Arc::new(Awaiting));
        let call = BoundCall::Sync(Box::new(|| Ok(Some(json!(3)))));

        let result = run_chain(&aspects, &invocation(ReturnKind::Value), ReturnKind::Value, call)
            .await
            .unwrap();

        assert_eq!(result, Some(json!(3)));
        assert_eq!(
            *log.lock(),
            vec![
                "enter module async",
                "enter method async",
                "exit method async",
                "exit module async"
            ]
        );
    }
}
