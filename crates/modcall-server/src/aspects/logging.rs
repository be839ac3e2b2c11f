//! Logging scopes around dispatched calls
//!
//! Each [`LoggingAspect`] opens a scope on its [`LogSink`] before the call
//! proceeds and closes it exactly once when the call finishes, fails, or is
//! dropped mid-flight. For future-returning methods the scope stays open until
//! the future completes.

use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::time::Instant;
use tracing::Span;

use modcall_rpc_core::CallResult;

use crate::aspect::{Aspect, AsyncNext, Invocation, SyncNext};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Identifies an open scope on a sink
pub type ScopeId = u64;

/// Destination of logging scopes and messages
pub trait LogSink: Send + Sync {
    fn begin_scope(&self, name: &str, fields: &[(&str, String)]) -> ScopeId;

    fn end_scope(&self, id: ScopeId);

    fn log(&self, level: LogLevel, message: &str);
}

/// Forwards scopes and messages to `tracing`
#[derive(Debug, Default)]
pub struct TracingLogSink {
    next_id: AtomicU64,
    open: Mutex<HashMap<ScopeId, (Span, Instant)>>,
}

impl TracingLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scopes begun and not yet ended
    pub fn open_scopes(&self) -> usize {
        self.open.lock().len()
    }
}

impl LogSink for TracingLogSink {
    fn begin_scope(&self, name: &str, fields: &[(&str, String)]) -> ScopeId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let fields = fields
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join(" ");
        let span = tracing::info_span!("scope", name = %name, fields = %fields);
        span.in_scope(|| tracing::debug!(scope = id, "scope opened"));
        self.open.lock().insert(id, (span, Instant::now()));
        id
    }

    fn end_scope(&self, id: ScopeId) {
        if let Some((span, opened)) = self.open.lock().remove(&id) {
            span.in_scope(|| {
                tracing::debug!(scope = id, elapsed = ?opened.elapsed(), "scope closed")
            });
        }
    }

    fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Trace => tracing::trace!("{message}"),
            LogLevel::Debug => tracing::debug!("{message}"),
            LogLevel::Info => tracing::info!("{message}"),
            LogLevel::Warn => tracing::warn!("{message}"),
            LogLevel::Error => tracing::error!("{message}"),
        }
    }
}

/// What a [`LoggingAspect`] records inside its scope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggingScope {
    /// A scope named after the endpoint, nothing else
    Module,
    /// Failures escaping the call, with their exception type
    Exception,
    /// The positional arguments, at debug level
    Parameters,
    /// Elapsed time, at info level
    Duration,
}

pub struct LoggingAspect {
    sink: Arc<dyn LogSink>,
    kind: LoggingScope,
}

impl LoggingAspect {
    pub fn new(sink: Arc<dyn LogSink>, kind: LoggingScope) -> Self {
        Self { sink, kind }
    }

    pub fn kind(&self) -> LoggingScope {
        self.kind
    }

    fn open(&self, invocation: &Invocation) -> ScopeGuard {
        let mut fields = vec![("module", invocation.module().to_string())];
        fields.push(("method", invocation.method().to_string()));
        if let Some(session_id) = invocation.session_id() {
            fields.push(("session_id", session_id.to_string()));
        }

        let id = self.sink.begin_scope(&invocation.endpoint_key(), &fields);
        if self.kind == LoggingScope::Parameters {
            let args = serde_json::to_string(invocation.args()).unwrap_or_default();
            self.sink.log(LogLevel::Debug, &format!("arguments: {args}"));
        }

        ScopeGuard {
            sink: self.sink.clone(),
            id,
            started: Instant::now(),
            kind: self.kind,
        }
    }

    fn record(&self, invocation: &Invocation, result: &CallResult) {
        if let (LoggingScope::Exception, Err(err)) = (self.kind, result) {
            let level = if err.status_code() >= 500 {
                LogLevel::Error
            } else {
                LogLevel::Warn
            };
            self.sink.log(
                level,
                &format!(
                    "{} failed with {}: {err}",
                    invocation.endpoint_key(),
                    err.type_name()
                ),
            );
        }
    }
}

/// Closes its scope on drop
struct ScopeGuard {
    sink: Arc<dyn LogSink>,
    id: ScopeId,
    started: Instant,
    kind: LoggingScope,
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        if self.kind == LoggingScope::Duration {
            self.sink.log(
                LogLevel::Info,
                &format!("completed in {:?}", self.started.elapsed()),
            );
        }
        self.sink.end_scope(self.id);
    }
}

impl Aspect for LoggingAspect {
    fn name(&self) -> &'static str {
        "logging"
    }

    fn decorate(&self, invocation: &Invocation, next: SyncNext<'_>) -> CallResult {
        let _scope = self.open(invocation);
        let result = next.proceed(invocation);
        self.record(invocation, &result);
        result
    }

    fn decorate_async<'a>(
        &'a self,
        invocation: &'a Invocation,
        next: AsyncNext<'a>,
    ) -> BoxFuture<'a, CallResult> {
        Box::pin(async move {
            let _scope = self.open(invocation);
            let result = next.proceed(invocation).await;
            self.record(invocation, &result);
            result
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aspect::{BoundCall, run_chain};
    use crate::descriptor::{MethodInfo, ReturnKind};
    use futures::FutureExt;
    use modcall_rpc_core::{CancellationHandle, RpcError};
    use serde_json::json;
    use std::time::Duration;
    use tracing_test::traced_test;

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<String>>,
    }

    impl LogSink for RecordingSink {
        fn begin_scope(&self, name: &str, _fields: &[(&str, String)]) -> ScopeId {
            self.events.lock().push(format!("begin {name}"));
            7
        }

        fn end_scope(&self, id: ScopeId) {
            self.events.lock().push(format!("end {id}"));
        }

        fn log(&self, level: LogLevel, message: &str) {
            self.events.lock().push(format!("{level:?} {message}"));
        }
    }

    fn invocation(kind: ReturnKind) -> Invocation {
        Invocation::new(
            Arc::new(MethodInfo::for_test("Calc", "Add", kind)),
            vec![json!(1), json!(2)],
            Some("s-1".into()),
            CancellationHandle::new(),
        )
    }

    fn aspects(sink: &Arc<RecordingSink>, kind: LoggingScope) -> Vec<Arc<dyn Aspect>> {
        vec![Arc::new(LoggingAspect::new(sink.clone(), kind))]
    }

    #[tokio::test]
    async fn test_scope_closes_once_on_success() {
        let sink = Arc::new(RecordingSink::default());
        let call = BoundCall::Sync(Box::new(|| Ok(Some(json!(3)))));

        run_chain(
            &aspects(&sink, LoggingScope::Parameters),
            &invocation(ReturnKind::Value),
            ReturnKind::Value,
            call,
        )
        .await
        .unwrap();

        assert_eq!(
            *sink.events.lock(),
            vec!["begin Calc.Add", "Debug arguments: [1,2]", "end 7"]
        );
    }

    #[tokio::test]
    async fn test_exception_scope_logs_failure_then_closes() {
        let sink = Arc::new(RecordingSink::default());
        let call = BoundCall::Async(Box::new(|| async { Err(RpcError::format("bad")) }.boxed()));

        let result = run_chain(
            &aspects(&sink, LoggingScope::Exception),
            &invocation(ReturnKind::Future),
            ReturnKind::Future,
            call,
        )
        .await;
        assert!(result.is_err());

        let events = sink.events.lock();
        assert_eq!(events.len(), 3);
        assert!(events[1].starts_with("Warn Calc.Add failed with"));
        assert_eq!(events[2], "end 7");
    }

    #[tokio::test(start_paused = true)]
    async fn test_async_scope_stays_open_until_completion() {
        let sink = Arc::new(RecordingSink::default());
        let call = BoundCall::Async(Box::new(|| {
            async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok(None)
            }
            .boxed()
        }));
        let aspects = aspects(&sink, LoggingScope::Duration);
        let invocation = invocation(ReturnKind::Future);

        let mut pending = Box::pin(run_chain(&aspects, &invocation, ReturnKind::Future, call));
        assert!(futures::poll!(pending.as_mut()).is_pending());
        assert_eq!(*sink.events.lock(), vec!["begin Calc.Add"]);

        pending.await.unwrap();
        let events = sink.events.lock();
        assert!(events[1].starts_with("Info completed in"));
        assert_eq!(events[2], "end 7");
    }

    #[tokio::test]
    async fn test_dropped_future_still_closes_scope() {
        let sink = Arc::new(RecordingSink::default());
        let call = BoundCall::Async(Box::new(|| futures::future::pending().boxed()));
        let aspects = aspects(&sink, LoggingScope::Module);
        let invocation = invocation(ReturnKind::Future);

        let mut pending = Box::pin(run_chain(&aspects, &invocation, ReturnKind::Future, call));
        assert!(futures::poll!(pending.as_mut()).is_pending());
        drop(pending);

        assert_eq!(*sink.events.lock(), vec!["begin Calc.Add", "end 7"]);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_tracing_sink_emits_scope_events() {
        let sink = Arc::new(TracingLogSink::new());
        let aspects: Vec<Arc<dyn Aspect>> =
            vec![Arc::new(LoggingAspect::new(sink.clone(), LoggingScope::Duration))];
        let call = BoundCall::Sync(Box::new(|| Ok(None)));

        run_chain(&aspects, &invocation(ReturnKind::Void), ReturnKind::Void, call)
            .await
            .unwrap();

        assert_eq!(sink.open_scopes(), 0);
        assert!(logs_contain("scope opened"));
        assert!(logs_contain("completed in"));
        assert!(logs_contain("scope closed"));
    }
}
