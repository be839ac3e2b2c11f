//! One HTTP exchange as seen by the pipeline.
//!
//! A [`Session`] is created by the listener for every request that reaches the
//! endpoint path. It is owned by the task serving that request and handed to
//! the pipeline by mutable reference; it is gone once the response is closed.

use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderName};
use http::{HeaderMap, HeaderValue, Method, StatusCode, Uri};
use http_body_util::Full;
use hyper::Response;
use serde::Serialize;
use std::net::SocketAddr;
use tracing::warn;
use uuid::Uuid;

use modcall_rpc_core::{CancellationHandle, METHOD_PARAM, MODULE_PARAM, RpcError, SESSION_PARAM};

/// (module, method) pair and caller session read from the query string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallTarget {
    pub module: String,
    pub method: String,
    pub session_id: Option<String>,
}

impl CallTarget {
    /// Endpoint key used by the request limiter
    pub fn endpoint_key(&self) -> String {
        format!("{}.{}", self.module, self.method)
    }
}

/// Request half of a session. The body is read before the pipeline runs.
#[derive(Debug)]
pub struct SessionRequest {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Result<Bytes, RpcError>,
    remote_addr: Option<SocketAddr>,
}

impl SessionRequest {
    pub fn new(method: Method, uri: Uri, headers: HeaderMap, body: Result<Bytes, RpcError>) -> Self {
        Self {
            method,
            uri,
            headers,
            body,
            remote_addr: None,
        }
    }

    pub fn with_remote_addr(mut self, remote_addr: SocketAddr) -> Self {
        self.remote_addr = Some(remote_addr);
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Header value as text; non-UTF-8 values read as absent
    pub fn header(&self, name: impl AsRef<str>) -> Option<&str> {
        self.headers
            .get(name.as_ref())
            .and_then(|value| value.to_str().ok())
    }

    /// First value of a query-string parameter, percent-decoded
    pub fn query_param(&self, name: &str) -> Option<String> {
        let query = self.uri.query()?;
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }

    /// Raw request body, or the error raised while reading it
    pub fn body(&self) -> Result<&Bytes, RpcError> {
        self.body.as_ref().map_err(Clone::clone)
    }

    /// Module and method addressed by this request.
    ///
    /// Both query parameters are required and must be non-empty.
    pub fn call_target(&self) -> Result<CallTarget, RpcError> {
        let required = |name: &str| {
            self.query_param(name)
                .filter(|value| !value.is_empty())
                .ok_or_else(|| {
                    RpcError::MalformedRequest(format!("missing query parameter '{name}'"))
                })
        };

        Ok(CallTarget {
            module: required(MODULE_PARAM)?,
            method: required(METHOD_PARAM)?,
            session_id: self
                .query_param(SESSION_PARAM)
                .filter(|value| !value.is_empty()),
        })
    }
}

/// Response half of a session.
///
/// The body is written at most once; [`SessionResponse::close`] marks the
/// exchange complete. Headers stay mutable until the listener sends the response.
#[derive(Debug)]
pub struct SessionResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    written: bool,
    closed: bool,
}

impl Default for SessionResponse {
    fn default() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            written: false,
            closed: false,
        }
    }
}

impl SessionResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn is_written(&self) -> bool {
        self.written
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn set_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.insert(name, value);
    }

    /// Serialize `payload` as the `application/json` body
    pub fn write_json<T: Serialize>(&mut self, status: StatusCode, payload: &T) -> Result<(), RpcError> {
        let body = serde_json::to_vec(payload)
            .map_err(|err| RpcError::unhandled(format!("failed to serialize response: {err}")))?;
        self.write(status, HeaderValue::from_static("application/json"), body.into());
        Ok(())
    }

    /// Write `message` as an escaped `text/html` body
    pub fn write_html(&mut self, status: StatusCode, message: &str) {
        let body = format!(
            "<html><body><h1>{}</h1><p>{}</p></body></html>",
            status.as_u16(),
            escape_html(message)
        );
        self.write(
            status,
            HeaderValue::from_static("text/html; charset=utf-8"),
            body.into(),
        );
    }

    /// Finish the exchange with a status and no body
    pub fn write_empty(&mut self, status: StatusCode) {
        if self.written {
            warn!(status = %status, "response already written, ignoring empty write");
            return;
        }
        self.status = status;
        self.body = Bytes::new();
        self.written = true;
    }

    fn write(&mut self, status: StatusCode, content_type: HeaderValue, body: Bytes) {
        if self.written {
            warn!(status = %status, "response already written, ignoring second write");
            return;
        }
        self.status = status;
        self.headers.insert(CONTENT_TYPE, content_type);
        self.body = body;
        self.written = true;
    }

    /// Mark the exchange complete. Idempotent.
    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn into_hyper(self) -> Response<Full<Bytes>> {
        let mut response = Response::new(Full::new(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// A single request/response exchange and its cancellation signal
#[derive(Debug)]
pub struct Session {
    id: Uuid,
    pub request: SessionRequest,
    pub response: SessionResponse,
    cancellation: CancellationHandle,
}

impl Session {
    pub fn new(request: SessionRequest, cancellation: CancellationHandle) -> Self {
        Self {
            id: Uuid::now_v7(),
            request,
            response: SessionResponse::new(),
            cancellation,
        }
    }

    /// Generated request id, used to correlate log lines
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn cancellation(&self) -> &CancellationHandle {
        &self.cancellation
    }
}
