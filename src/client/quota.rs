//! Response Classification
//!
//! Decides whether an upstream response is a payload, a quota signal, or
//! some other failure worth retrying on another key.

use crate::client::http::{RawResponse, TransportError};
use crate::client::outcome::ErrorKind;
use serde_json::Value;

/// Longest body excerpt carried into log lines and error summaries
const EXCERPT_CHARS: usize = 200;

/// Lower-cased body fragments that signal an exhausted quota
const QUOTA_MARKERS: &[&str] = &[
    "quotaexceeded",
    "ratelimitexceeded",
    "dailylimitexceeded",
    "userratelimitexceeded",
    "resource_exhausted",
    "quota exceeded",
    "rate limit",
    "rate_limit",
    "too many requests",
];

/// Detect if a response indicates a quota or rate-limit error
pub fn is_quota_error(status: u16, body: &str) -> bool {
    // HTTP 429 Too Many Requests
    if status == 429 {
        return true;
    }

    // The video API answers 403 with a `quotaExceeded` reason; some
    // endpoints use 400 with a rate-limit message
    if status == 403 || status == 400 {
        let lower_body = body.to_lowercase();
        return QUOTA_MARKERS.iter().any(|m| lower_body.contains(m));
    }

    false
}

/// One failed attempt, before it is folded into a `DispatchError`
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct AttemptFailure {
    pub kind: ErrorKind,
    pub status: Option<u16>,
    pub detail: String,
}

impl From<TransportError> for AttemptFailure {
    fn from(err: TransportError) -> Self {
        Self {
            kind: ErrorKind::TransientNetworkError,
            status: None,
            detail: err.to_string(),
        }
    }
}

/// Sort a response into payload or failure
pub(crate) fn classify(response: RawResponse) -> Result<Value, AttemptFailure> {
    let RawResponse { status, body } = response;

    if (200..300).contains(&status) {
        return serde_json::from_str(&body).map_err(|e| AttemptFailure {
            kind: ErrorKind::UpstreamHttpError,
            status: Some(status),
            detail: format!("unparseable payload: {}", e),
        });
    }

    let kind = if is_quota_error(status, &body) {
        ErrorKind::QuotaExceeded
    } else {
        ErrorKind::UpstreamHttpError
    };

    Err(AttemptFailure {
        kind,
        status: Some(status),
        detail: format!("HTTP {}: {}", status, error_excerpt(&body)),
    })
}

/// Upstream error message if the body is a Google-style error object,
/// otherwise a truncated copy of the body
fn error_excerpt(body: &str) -> String {
    let message = serde_json::from_str::<Value>(body).ok().and_then(|v| {
        v.pointer("/error/message")
            .and_then(Value::as_str)
            .map(str::to_string)
    });

    let text = message.unwrap_or_else(|| body.trim().to_string());
    if text.chars().count() > EXCERPT_CHARS {
        let cut: String = text.chars().take(EXCERPT_CHARS).collect();
        format!("{}...", cut)
    } else {
        text
    }
}
