//! HTTP Transport
//!
//! The seam between the dispatcher and the network, plus its reqwest
//! implementation.

use crate::client::request::{Method, UpstreamRequest};
use crate::error::{Result, TubedeskError};
use reqwest::Client;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Status and body of an upstream response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

impl RawResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// Network-level failure: no usable HTTP response came back
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("transport error: {0}")]
    Other(String),
}

impl From<reqwest::Error> for TransportError {
    /// The request URL is dropped from the message: it carries the key.
    fn from(err: reqwest::Error) -> Self {
        let err = err.without_url();
        if err.is_timeout() {
            TransportError::Timeout(err.to_string())
        } else if err.is_connect() {
            TransportError::Connect(err.to_string())
        } else {
            TransportError::Other(err.to_string())
        }
    }
}

/// Sends one fully-formed request
pub trait Transport: Send + Sync {
    fn send(
        &self,
        request: &UpstreamRequest,
        timeout: Duration,
    ) -> impl Future<Output = std::result::Result<RawResponse, TransportError>> + Send;
}

/// reqwest-backed transport
#[derive(Debug, Clone)]
pub struct HttpTransport {
    /// Inner reqwest client
    client: Client,
}

impl HttpTransport {
    /// Create a new HTTP transport
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|e| TubedeskError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    /// Wrap an existing reqwest client
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

impl Transport for HttpTransport {
    async fn send(
        &self,
        request: &UpstreamRequest,
        timeout: Duration,
    ) -> std::result::Result<RawResponse, TransportError> {
        let builder = match request.method() {
            Method::Get => self.client.get(request.url()),
            Method::Post => self.client.post(request.url()),
        };

        let mut builder = builder.query(request.query_pairs()).timeout(timeout);
        if let Some(body) = request.body() {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;

        Ok(RawResponse { status, body })
    }
}
