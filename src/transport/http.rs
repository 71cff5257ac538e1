//! HTTP transport over a pooled hyper client.
//!
//! Plain `http://` only; the connector does not negotiate TLS.

use std::future::Future;
use std::time::Duration;

use axum::body::Body;
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use tokio_util::sync::CancellationToken;

use crate::config::TransportConfig;
use crate::transport::{Request, Response, Transport, TransportError};

/// [`Transport`] backed by a connection-pooling HTTP/1.1 client.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client<HttpConnector, Body>,
    max_response_bytes: usize,
}

impl HttpTransport {
    pub fn new(config: &TransportConfig) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(Duration::from_millis(config.connect_timeout_ms)));
        connector.set_nodelay(true);

        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(config.pool_idle_timeout_secs))
            .build(connector);

        Self {
            client,
            max_response_bytes: config.max_response_bytes,
        }
    }

    async fn exchange(&self, request: &Request) -> Result<Response, TransportError> {
        let response: hyper::Response<hyper::body::Incoming> = self
            .client
            .request(request.to_http()?)
            .await
            .map_err(|e| TransportError::Upstream(error_chain(&e)))?;

        let (parts, body) = response.into_parts();
        let body = axum::body::to_bytes(Body::new(body), self.max_response_bytes)
            .await
            .map_err(|e| TransportError::Body(e.to_string()))?;

        Ok(Response {
            status: parts.status,
            headers: parts.headers,
            body,
        })
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new(&TransportConfig::default())
    }
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("max_response_bytes", &self.max_response_bytes)
            .finish_non_exhaustive()
    }
}

impl Transport for HttpTransport {
    fn invoke(
        &self,
        request: &Request,
        cancel: CancellationToken,
    ) -> impl Future<Output = Result<Response, TransportError>> + Send {
        async move {
            if request.uri().scheme_str() != Some("http") {
                return Err(TransportError::InvalidRequest(format!(
                    "unsupported scheme in '{}'",
                    request.uri()
                )));
            }
            if request.uri().authority().is_none() {
                return Err(TransportError::InvalidRequest(format!("missing host in '{}'", request.uri())));
            }

            tracing::debug!(
                request_id = %request.id(),
                method = %request.method(),
                uri = %request.uri(),
                "Sending attempt"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(TransportError::Cancelled),
                result = self.exchange(request) => result,
            }
        }
    }
}

/// Render an error followed by each of its sources.
fn error_chain(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
