//! HTTP listener
//!
//! One accept loop on its own task; every accepted connection is served on an
//! independent task tracked for shutdown. Requests to the endpoint path become
//! [`Session`]s handed to the configured [`SessionHandler`]; every other path
//! is answered with 404.

use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, error, info, info_span, warn};

use modcall_rpc_core::{CancellationHandle, RpcError};

use crate::handler::SessionHandler;
use crate::session::{Session, SessionRequest};
use crate::{HttpServerError, Result};

/// Configuration for the listener
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Address to bind to; port 0 picks a free port
    pub bind_address: SocketAddr,
    /// Path served by the pipeline
    pub endpoint_path: String,
    /// Maximum request body size
    pub max_body_size: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 8080)),
            endpoint_path: "/rpc".to_string(),
            max_body_size: 1024 * 1024, // 1MB
        }
    }
}

impl ListenerConfig {
    pub fn bind_address(mut self, bind_address: SocketAddr) -> Self {
        self.bind_address = bind_address;
        self
    }

    pub fn endpoint_path(mut self, endpoint_path: impl Into<String>) -> Self {
        self.endpoint_path = endpoint_path.into();
        self
    }

    pub fn max_body_size(mut self, max_body_size: usize) -> Self {
        self.max_body_size = max_body_size;
        self
    }
}

/// Platform hook run when binding fails for lack of rights, e.g. to reserve
/// a privileged port or an address for the current user.
///
/// The listener calls it at most once per start and retries the bind once.
pub trait BindRemediation: Send + Sync {
    fn applies_to(&self, error: &io::Error) -> bool {
        error.kind() == io::ErrorKind::PermissionDenied
    }

    fn remediate(&self, address: SocketAddr, error: &io::Error) -> io::Result<()>;
}

struct Shared {
    config: ListenerConfig,
    handler: Arc<dyn SessionHandler>,
}

struct Running {
    local_addr: SocketAddr,
    shutdown: CancellationHandle,
    tracker: TaskTracker,
    accept_loop: JoinHandle<()>,
}

/// Accepts connections and runs the session handler for each request
pub struct Listener {
    shared: Arc<Shared>,
    remediation: Option<Arc<dyn BindRemediation>>,
    state: Mutex<Option<Running>>,
}

impl Listener {
    pub fn new(config: ListenerConfig, handler: Arc<dyn SessionHandler>) -> Self {
        Self {
            shared: Arc::new(Shared { config, handler }),
            remediation: None,
            state: Mutex::new(None),
        }
    }

    pub fn with_remediation(mut self, remediation: Arc<dyn BindRemediation>) -> Self {
        self.remediation = Some(remediation);
        self
    }

    pub fn config(&self) -> &ListenerConfig {
        &self.shared.config
    }

    /// Bind and start accepting. Returns the bound address.
    pub async fn start(&self) -> Result<SocketAddr> {
        let mut state = self.state.lock().await;
        if state.is_some() {
            return Err(HttpServerError::AlreadyStarted);
        }

        let listener = self.bind().await?;
        let local_addr = listener.local_addr()?;
        let shutdown = CancellationHandle::new();
        let tracker = TaskTracker::new();

        let accept_loop = tokio::spawn(accept_loop(
            listener,
            Arc::clone(&self.shared),
            shutdown.clone(),
            tracker.clone(),
        ));

        info!("RPC listener bound to {}", local_addr);
        info!(
            "Endpoint available at: http://{}{}",
            local_addr, self.shared.config.endpoint_path
        );

        *state = Some(Running {
            local_addr,
            shutdown,
            tracker,
            accept_loop,
        });
        Ok(local_addr)
    }

    async fn bind(&self) -> Result<TcpListener> {
        let address = self.shared.config.bind_address;
        let err = match TcpListener::bind(address).await {
            Ok(listener) => return Ok(listener),
            Err(err) => err,
        };

        let Some(remediation) = self.remediation.as_ref().filter(|r| r.applies_to(&err)) else {
            return Err(err.into());
        };

        warn!(address = %address, error = %err, "bind failed, running remediation");
        if let Err(remediation_err) = remediation.remediate(address, &err) {
            error!(address = %address, error = %remediation_err, "bind remediation failed");
            return Err(err.into());
        }
        Ok(TcpListener::bind(address).await?)
    }

    /// Stop accepting, cancel every in-flight session and wait for all of
    /// them to finish.
    pub async fn stop(&self) -> Result<()> {
        let running = self
            .state
            .lock()
            .await
            .take()
            .ok_or(HttpServerError::NotStarted)?;

        info!("Stopping RPC listener on {}", running.local_addr);
        running.shutdown.cancel();

        if let Err(err) = running.accept_loop.await {
            error!(error = %err, "accept loop terminated abnormally");
        }

        running.tracker.close();
        running.tracker.wait().await;
        info!("RPC listener stopped");
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        self.state.lock().await.is_some()
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.state.lock().await.as_ref().map(|r| r.local_addr)
    }
}

async fn accept_loop(
    listener: TcpListener,
    shared: Arc<Shared>,
    shutdown: CancellationHandle,
    tracker: TaskTracker,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                debug!("accept loop received shutdown signal");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer_addr)) => {
                    debug!("New connection from {}", peer_addr);
                    tracker.spawn(serve_connection(
                        stream,
                        peer_addr,
                        Arc::clone(&shared),
                        shutdown.clone(),
                    ));
                }
                Err(err) => {
                    warn!(error = %err, "failed to accept connection");
                }
            }
        }
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    shared: Arc<Shared>,
    shutdown: CancellationHandle,
) {
    let io = TokioIo::new(stream);
    let session_parent = shutdown.clone();
    let service = service_fn(move |req| {
        let shared = Arc::clone(&shared);
        let cancellation = session_parent.child();
        async move { Ok::<_, Infallible>(handle_request(req, peer_addr, shared, cancellation).await) }
    });

    let connection = http1::Builder::new().serve_connection(io, service);
    tokio::pin!(connection);

    let result = tokio::select! {
        result = connection.as_mut() => result,
        _ = shutdown.cancelled() => {
            // Finish the in-flight request, then close
            connection.as_mut().graceful_shutdown();
            connection.await
        }
    };

    if let Err(err) = result {
        // Client disconnects are routine
        if err.is_incomplete_message() || err.is_closed() {
            debug!("Client disconnected: {}", err);
        } else {
            error!("Error serving connection: {}", err);
        }
    }
}

async fn handle_request(
    req: Request<Incoming>,
    peer_addr: SocketAddr,
    shared: Arc<Shared>,
    cancellation: CancellationHandle,
) -> Response<Full<Bytes>> {
    if req.uri().path() != shared.config.endpoint_path {
        debug!("No endpoint at {}", req.uri().path());
        let mut response = Response::new(Full::new(Bytes::from("Not Found")));
        *response.status_mut() = StatusCode::NOT_FOUND;
        return response;
    }

    let (parts, body) = req.into_parts();
    let body = read_body(body, shared.config.max_body_size).await;
    let request =
        SessionRequest::new(parts.method, parts.uri, parts.headers, body).with_remote_addr(peer_addr);

    let mut session = Session::new(request, cancellation);
    let span = info_span!(
        "session",
        id = %session.id(),
        method = %session.request.method(),
        peer = %peer_addr,
    );

    async {
        shared.handler.handle(&mut session).await;
        if !session.response.is_closed() {
            warn!("session handler returned without closing the response");
        }
        debug!(status = %session.response.status(), "session finished");
    }
    .instrument(span)
    .await;

    session.response.into_hyper()
}

async fn read_body(body: Incoming, limit: usize) -> std::result::Result<Bytes, RpcError> {
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(err) if err.downcast_ref::<LengthLimitError>().is_some() => {
            Err(RpcError::PayloadTooLarge { limit })
        }
        Err(err) => Err(RpcError::MalformedRequest(format!(
            "failed to read request body: {err}"
        ))),
    }
}
