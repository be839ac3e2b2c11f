//! Listener lifecycle tests
//!
//! - start/stop state errors
//! - bind remediation hook: invoked once, bind retried once
//! - stop while a session is running: cancellation fires, stop waits

use futures::FutureExt;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

use modcall_rpc_core::{FunctionDispatcher, InMemoryRequestCounter, RequestContext, RpcError};

use crate::listener::{BindRemediation, Listener, ListenerConfig};
use crate::middleware::{PipelineConfig, default_pipeline};
use crate::{HttpServerError, MiddlewareStack};

fn pipeline(dispatcher: Arc<dyn modcall_rpc_core::ModuleDispatcher>) -> Arc<MiddlewareStack> {
    Arc::new(default_pipeline(
        &PipelineConfig::default(),
        Arc::new(InMemoryRequestCounter::default()),
        dispatcher,
        Vec::new(),
    ))
}

fn void_dispatcher() -> Arc<dyn modcall_rpc_core::ModuleDispatcher> {
    Arc::new(FunctionDispatcher::new(|_ctx: RequestContext| {
        async { Ok(None) }.boxed()
    }))
}

fn local_config() -> ListenerConfig {
    ListenerConfig::default().bind_address(SocketAddr::from(([127, 0, 0, 1], 0)))
}

#[tokio::test]
async fn test_start_twice_is_already_started() {
    let listener = Listener::new(local_config(), pipeline(void_dispatcher()));

    let addr = listener.start().await.unwrap();
    assert_ne!(addr.port(), 0);
    assert!(listener.is_running().await);
    assert_eq!(listener.local_addr().await, Some(addr));

    let err = listener.start().await.unwrap_err();
    assert!(matches!(err, HttpServerError::AlreadyStarted));

    listener.stop().await.unwrap();
    assert!(!listener.is_running().await);
}

#[tokio::test]
async fn test_stop_without_start_is_not_started() {
    let listener = Listener::new(local_config(), pipeline(void_dispatcher()));
    let err = listener.stop().await.unwrap_err();
    assert!(matches!(err, HttpServerError::NotStarted));
}

#[tokio::test]
async fn test_restart_after_stop() {
    let listener = Listener::new(local_config(), pipeline(void_dispatcher()));
    listener.start().await.unwrap();
    listener.stop().await.unwrap();
    listener.start().await.unwrap();
    listener.stop().await.unwrap();
}

/// Releases a port held by the test when asked to remediate
struct ReleasePort {
    held: Mutex<Option<std::net::TcpListener>>,
    calls: AtomicUsize,
}

impl BindRemediation for ReleasePort {
    fn applies_to(&self, _error: &io::Error) -> bool {
        true
    }

    fn remediate(&self, _address: SocketAddr, _error: &io::Error) -> io::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.held.lock().unwrap().take();
        Ok(())
    }
}

struct Refuse {
    calls: AtomicUsize,
}

impl BindRemediation for Refuse {
    fn applies_to(&self, _error: &io::Error) -> bool {
        true
    }

    fn remediate(&self, _address: SocketAddr, _error: &io::Error) -> io::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(io::Error::other("not permitted"))
    }
}

#[tokio::test]
async fn test_remediation_runs_once_then_bind_is_retried() {
    let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let address = occupied.local_addr().unwrap();
    let remediation = Arc::new(ReleasePort {
        held: Mutex::new(Some(occupied)),
        calls: AtomicUsize::new(0),
    });

    let listener = Listener::new(
        ListenerConfig::default().bind_address(address),
        pipeline(void_dispatcher()),
    )
    .with_remediation(remediation.clone());

    let bound = listener.start().await.unwrap();
    assert_eq!(bound, address);
    assert_eq!(remediation.calls.load(Ordering::SeqCst), 1);
    listener.stop().await.unwrap();
}

#[tokio::test]
async fn test_failed_remediation_propagates_bind_error() {
    let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let address = occupied.local_addr().unwrap();
    let remediation = Arc::new(Refuse {
        calls: AtomicUsize::new(0),
    });

    let listener = Listener::new(
        ListenerConfig::default().bind_address(address),
        pipeline(void_dispatcher()),
    )
    .with_remediation(remediation.clone());

    let err = listener.start().await.unwrap_err();
    assert!(matches!(err, HttpServerError::Io(_)));
    assert_eq!(remediation.calls.load(Ordering::SeqCst), 1);
    assert!(!listener.is_running().await);
    drop(occupied);
}

#[tokio::test]
async fn test_bind_error_without_remediation() {
    let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let address = occupied.local_addr().unwrap();

    let listener = Listener::new(
        ListenerConfig::default().bind_address(address),
        pipeline(void_dispatcher()),
    );
    assert!(matches!(
        listener.start().await,
        Err(HttpServerError::Io(_))
    ));
}

#[tokio::test]
async fn test_stop_cancels_running_session_and_waits_for_it() {
    let entered = Arc::new(Notify::new());
    let observed_cancel = Arc::new(AtomicBool::new(false));

    let dispatcher = {
        let entered = entered.clone();
        let observed_cancel = observed_cancel.clone();
        Arc::new(FunctionDispatcher::new(move |ctx: RequestContext| {
            let entered = entered.clone();
            let observed_cancel = observed_cancel.clone();
            async move {
                entered.notify_one();
                ctx.cancellation().cancelled().await;
                // Simulate cleanup after observing cancellation
                tokio::time::sleep(Duration::from_millis(50)).await;
                observed_cancel.store(true, Ordering::SeqCst);
                Err(RpcError::Cancelled)
            }
            .boxed()
        }))
    };

    let listener = Listener::new(local_config(), pipeline(dispatcher));
    let addr = listener.start().await.unwrap();

    let client = tokio::spawn(async move {
        reqwest::Client::new()
            .post(format!("http://{addr}/rpc?module=Long&method=Run"))
            .body("[]")
            .send()
            .await
    });

    tokio::time::timeout(Duration::from_secs(5), entered.notified())
        .await
        .expect("call should start");

    listener.stop().await.unwrap();
    assert!(observed_cancel.load(Ordering::SeqCst));

    let response = client.await.unwrap().unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
}
