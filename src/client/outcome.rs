//! Dispatch Outcomes
//!
//! The structured result of one logical upstream call.

use crate::router::Service;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Why a dispatch did not produce a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The service has no keys configured; nothing was sent
    NoCredentialsAvailable,

    /// The upstream reported a quota or rate-limit condition
    QuotaExceeded,

    /// Timeout, connection reset, DNS failure, ...
    TransientNetworkError,

    /// Any other non-success HTTP response, or an unreadable payload
    UpstreamHttpError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NoCredentialsAvailable => "no_credentials_available",
            ErrorKind::QuotaExceeded => "quota_exceeded",
            ErrorKind::TransientNetworkError => "transient_network_error",
            ErrorKind::UpstreamHttpError => "upstream_http_error",
        }
    }

    /// Whether another key might succeed where this one failed
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ErrorKind::NoCredentialsAvailable)
    }

    /// HTTP status a route layer would typically answer with
    pub fn status_hint(&self) -> u16 {
        match self {
            ErrorKind::NoCredentialsAvailable | ErrorKind::QuotaExceeded => 503,
            ErrorKind::TransientNetworkError => 504,
            ErrorKind::UpstreamHttpError => 502,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A dispatch that ran out of options
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{service} {kind}: {summary}")]
pub struct DispatchError {
    /// Service the call was aimed at
    pub service: Service,

    /// Kind of the last failure seen
    pub kind: ErrorKind,

    /// Human-readable summary
    pub summary: String,

    /// Attempts made, zero when no request was sent
    pub attempts: usize,

    /// Last HTTP status received, if any
    pub status: Option<u16>,
}

impl DispatchError {
    pub(crate) fn no_credentials(service: Service) -> Self {
        Self {
            service,
            kind: ErrorKind::NoCredentialsAvailable,
            summary: format!(
                "No {} API keys are configured. Set {} or add keys to api_keys.json",
                service,
                service.env_var()
            ),
            attempts: 0,
            status: None,
        }
    }

    /// See [`ErrorKind::status_hint`]
    pub fn status_hint(&self) -> u16 {
        self.kind.status_hint()
    }
}

/// A successful dispatch
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatched {
    /// Parsed JSON payload
    pub payload: Value,

    /// Attempts it took, including the successful one
    pub attempts: usize,

    /// Masked form of the key that succeeded
    pub credential_tail: String,
}

/// Result of [`crate::client::Dispatcher::dispatch`]
pub type DispatchOutcome = Result<Dispatched, DispatchError>;
