//! Transport subsystem.
//!
//! # Data Flow
//! ```text
//! Request (buffered once, with a request id)
//!     → TransportCall::attempt (one physical attempt)
//!         → Transport::invoke (re-materialises the HTTP request)
//!         → StatusClassifier (status / error → Outcome)
//!     → Outcome<Response, CallFailure>
//! ```
//!
//! # Classification
//! - Status below the threshold (default 500): success, 4xx included
//! - Status at or above the threshold: recoverable failure
//! - Caller cancellation: cancelled
//! - Request that can never be sent (bad URI, unsupported scheme): fatal
//! - Any other transport error: recoverable failure
//!
//! # Design Decisions
//! - Bodies are buffered so every retry or redundant attempt replays the
//!   same bytes; streaming bodies are out of scope
//! - Every attempt carries the same `x-request-id` so the upstream can
//!   correlate redundant attempts

pub mod http;

use std::future::Future;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::http::{header::HeaderName, HeaderMap, HeaderValue, Method, StatusCode, Uri};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::resilience::operation::Operation;
use crate::resilience::outcome::Outcome;

pub use self::http::HttpTransport;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// A single request/response exchange with a remote dependency.
pub trait Transport: Send + Sync + 'static {
    /// Perform one exchange. Must return [`TransportError::Cancelled`] promptly
    /// once `cancel` fires.
    fn invoke(
        &self,
        request: &Request,
        cancel: CancellationToken,
    ) -> impl Future<Output = Result<Response, TransportError>> + Send;
}

/// Transport failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("request cancelled")]
    Cancelled,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("failed to read response body: {0}")]
    Body(String),
}

/// Why a classified call did not succeed.
#[derive(Debug, Error)]
pub enum CallFailure {
    #[error("upstream returned {}", .0.status)]
    Status(Response),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl CallFailure {
    /// The upstream response, if the failure was a status classification.
    pub fn response(&self) -> Option<&Response> {
        match self {
            CallFailure::Status(response) => Some(response),
            CallFailure::Transport(_) => None,
        }
    }
}

/// A buffered, replayable request.
#[derive(Debug, Clone)]
pub struct Request {
    id: Uuid,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
}

impl Request {
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            id: Uuid::new_v4(),
            method,
            uri,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// Build a request from a textual URL.
    pub fn parse(method: &str, url: &str) -> Result<Self, TransportError> {
        let method = Method::from_bytes(method.as_bytes())
            .map_err(|_| TransportError::InvalidRequest(format!("invalid method '{}'", method)))?;
        Ok(Self::new(method, parse_uri(url)?))
    }

    pub fn get(url: &str) -> Result<Self, TransportError> {
        Self::parse("GET", url)
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self, TransportError> {
        let name = HeaderName::from_bytes(name.trim().as_bytes())
            .map_err(|_| TransportError::InvalidRequest(format!("invalid header name '{}'", name)))?;
        let value = HeaderValue::from_str(value.trim())
            .map_err(|_| TransportError::InvalidRequest(format!("invalid value for header '{}'", name)))?;
        self.headers.append(name, value);
        Ok(self)
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Buffer an outgoing `http::Request` once so it can be replayed.
    ///
    /// An existing `x-request-id` is kept when it is a valid UUID.
    pub async fn from_http(request: axum::http::Request<Body>, limit: usize) -> Result<Self, TransportError> {
        let (parts, body) = request.into_parts();
        let body = axum::body::to_bytes(body, limit)
            .await
            .map_err(|e| TransportError::InvalidRequest(format!("request body: {}", e)))?;
        let id = parts
            .headers
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| Uuid::parse_str(v).ok())
            .unwrap_or_else(Uuid::new_v4);

        Ok(Self {
            id,
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
            body,
        })
    }

    /// Materialise a fresh `http::Request` for one attempt.
    pub fn to_http(&self) -> Result<axum::http::Request<Body>, TransportError> {
        let mut builder = axum::http::Request::builder()
            .method(self.method.clone())
            .uri(self.uri.clone());

        if let Some(headers) = builder.headers_mut() {
            for (k, v) in self.headers.iter() {
                headers.append(k.clone(), v.clone());
            }
            let id = HeaderValue::from_str(&self.id.to_string())
                .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
            headers.insert(REQUEST_ID_HEADER, id);
        }

        builder
            .body(Body::from(self.body.clone()))
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))
    }

    pub fn id(&self) -> Uuid {
        self.id
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

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// The remote dependency this request targets (its URI authority).
    pub fn dependency(&self) -> String {
        self.uri
            .authority()
            .map(|a| a.as_str().to_ascii_lowercase())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

fn parse_uri(url: &str) -> Result<Uri, TransportError> {
    let parsed = url::Url::parse(url)
        .map_err(|e| TransportError::InvalidRequest(format!("invalid URL '{}': {}", url, e)))?;
    parsed
        .as_str()
        .parse::<Uri>()
        .map_err(|e| TransportError::InvalidRequest(format!("invalid URI '{}': {}", url, e)))
}

/// A fully read upstream response.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Response {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// The body as text, replacing invalid UTF-8.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Maps a transport result to an [`Outcome`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusClassifier {
    error_status_threshold: u16,
}

impl Default for StatusClassifier {
    fn default() -> Self {
        Self::new(500)
    }
}

impl StatusClassifier {
    pub fn new(error_status_threshold: u16) -> Self {
        Self { error_status_threshold }
    }

    pub fn classify(&self, result: Result<Response, TransportError>) -> Outcome<Response, CallFailure> {
        match result {
            Ok(response) if response.status.as_u16() >= self.error_status_threshold => {
                Outcome::Recoverable(CallFailure::Status(response))
            }
            Ok(response) => Outcome::Success(response),
            Err(TransportError::Cancelled) => Outcome::Cancelled,
            Err(e @ TransportError::InvalidRequest(_)) => Outcome::Fatal(e.into()),
            Err(e) => Outcome::Recoverable(e.into()),
        }
    }
}

/// One request bound to a transport: the [`Operation`] every executor runs.
#[derive(Debug)]
pub struct TransportCall<T> {
    transport: Arc<T>,
    request: Arc<Request>,
    classifier: StatusClassifier,
}

impl<T> Clone for TransportCall<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            request: Arc::clone(&self.request),
            classifier: self.classifier,
        }
    }
}

impl<T: Transport> TransportCall<T> {
    pub fn new(transport: Arc<T>, request: Request, classifier: StatusClassifier) -> Self {
        Self {
            transport,
            request: Arc::new(request),
            classifier,
        }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }
}

impl<T: Transport> Operation for TransportCall<T> {
    type Output = Response;
    type Error = CallFailure;

    fn attempt(&self, cancel: CancellationToken) -> impl Future<Output = Outcome<Response, CallFailure>> + Send {
        async move {
            let result = self.transport.invoke(&self.request, cancel).await;
            if let Err(e) = &result {
                tracing::debug!(request_id = %self.request.id, error = %e, "Attempt failed");
            }
            self.classifier.classify(result)
        }
    }
}
