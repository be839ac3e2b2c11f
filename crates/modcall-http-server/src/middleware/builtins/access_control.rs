//! Origin allow-list and CORS headers

use async_trait::async_trait;
use http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    ACCESS_CONTROL_MAX_AGE, HeaderMap, HeaderValue, ORIGIN, VARY,
};
use http::{Method, StatusCode};
use tracing::debug;

use modcall_rpc_core::RpcError;

use crate::middleware::{Next, SessionMiddleware};
use crate::session::Session;

/// Origins accepted by [`AccessControl`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum AllowedOrigins {
    /// Any origin; the caller's origin is reflected back
    #[default]
    Any,
    /// Exact-match list, e.g. `https://app.example.com`
    List(Vec<String>),
}

impl AllowedOrigins {
    /// Build from configuration text: `*` means any origin
    pub fn from_list<I, S>(origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let origins: Vec<String> = origins.into_iter().map(Into::into).collect();
        if origins.iter().any(|origin| origin == "*") {
            Self::Any
        } else {
            Self::List(origins)
        }
    }

    pub fn allows(&self, origin: &str) -> bool {
        match self {
            Self::Any => true,
            Self::List(origins) => origins.iter().any(|allowed| allowed == origin),
        }
    }
}

/// Validates the `Origin` header and answers preflight requests.
///
/// Requests without an `Origin` header are not cross-origin and pass through
/// unchanged.
#[derive(Debug, Clone, Default)]
pub struct AccessControl {
    allowed_origins: AllowedOrigins,
}

impl AccessControl {
    pub fn new(allowed_origins: AllowedOrigins) -> Self {
        Self { allowed_origins }
    }

    pub fn allowed_origins(&self) -> &AllowedOrigins {
        &self.allowed_origins
    }
}

fn apply_cors_headers(headers: &mut HeaderMap, origin: Option<&str>) {
    let Some(origin) = origin.and_then(|o| HeaderValue::from_str(o).ok()) else {
        return;
    };
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, origin);
    headers.insert(VARY, HeaderValue::from_static("Origin"));
    headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("POST, OPTIONS"),
    );
    headers.insert(
        ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type, Accept, Authorization"),
    );
    headers.insert(ACCESS_CONTROL_MAX_AGE, HeaderValue::from_static("86400"));
}

#[async_trait]
impl SessionMiddleware for AccessControl {
    async fn handle(&self, session: &mut Session, next: Next<'_>) -> Result<(), RpcError> {
        let origin = session.request.header(ORIGIN).map(str::to_owned);

        if let Some(origin) = &origin {
            if !self.allowed_origins.allows(origin) {
                return Err(RpcError::OriginRejected(origin.clone()));
            }
        }
        apply_cors_headers(session.response.headers_mut(), origin.as_deref());

        if session.request.method() == Method::OPTIONS {
            debug!(origin = ?origin, "answering preflight request");
            session.response.write_empty(StatusCode::NO_CONTENT);
            return Ok(());
        }

        next.run(session).await
    }

    fn name(&self) -> &'static str {
        "access_control"
    }
}
