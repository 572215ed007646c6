//! Upstream Request
//!
//! Transport-neutral description of one upstream call.

use crate::router::Credential;
use serde_json::Value;
use std::fmt;

/// Query parameter the upstream APIs read the key from
pub const CREDENTIAL_PARAM: &str = "key";

/// HTTP method of an upstream call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// Parameters travel in the query string
    Get,

    /// Parameters travel in a JSON body
    Post,
}

/// One upstream call, before a key is injected
#[derive(Clone, PartialEq)]
pub struct UpstreamRequest {
    method: Method,
    url: String,
    query: Vec<(String, String)>,
    body: Option<Value>,
}

impl UpstreamRequest {
    /// A GET request to `url`
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            query: Vec::new(),
            body: None,
        }
    }

    /// A POST request to `url` with a JSON body
    pub fn post_json(url: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            query: Vec::new(),
            body: Some(body),
        }
    }

    /// Append a query parameter
    pub fn query(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((name.into(), value.to_string()));
        self
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn query_pairs(&self) -> &[(String, String)] {
        &self.query
    }

    pub fn body(&self) -> Option<&Value> {
        self.body.as_ref()
    }

    /// Value of the injected key parameter, if any
    pub fn credential_param(&self) -> Option<&str> {
        self.query
            .iter()
            .find(|(name, _)| name == CREDENTIAL_PARAM)
            .map(|(_, value)| value.as_str())
    }

    /// Drop any caller-supplied key parameter. Returns whether one was present.
    pub(crate) fn strip_credential(&mut self) -> bool {
        let before = self.query.len();
        self.query.retain(|(name, _)| name != CREDENTIAL_PARAM);
        before != self.query.len()
    }

    /// Copy of this request carrying `credential`
    pub(crate) fn with_credential(&self, credential: &Credential) -> Self {
        let mut request = self.clone();
        request
            .query
            .push((CREDENTIAL_PARAM.to_string(), credential.value().to_string()));
        request
    }
}

impl fmt::Debug for UpstreamRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let query: Vec<_> = self
            .query
            .iter()
            .map(|(name, value)| {
                if name == CREDENTIAL_PARAM {
                    (name.as_str(), "<redacted>")
                } else {
                    (name.as_str(), value.as_str())
                }
            })
            .collect();

        f.debug_struct("UpstreamRequest")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("query", &query)
            .field("has_body", &self.body.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::Service;

    #[test]
    fn test_credential_injection_replaces_caller_key() {
        let mut request = UpstreamRequest::get("https://example.test/v3/channels")
            .query("part", "snippet")
            .query("key", "caller-pinned");

        assert!(request.strip_credential());
        assert!(!request.strip_credential());
        assert_eq!(request.credential_param(), None);

        let cred = Credential::new(Service::VideoPlatform, "injected-secret-key");
        let outgoing = request.with_credential(&cred);
        assert_eq!(outgoing.credential_param(), Some("injected-secret-key"));
        assert_eq!(outgoing.query_pairs().len(), 2);
    }

    #[test]
    fn test_debug_redacts_key() {
        let cred = Credential::new(Service::VideoPlatform, "super-secret-value");
        let request = UpstreamRequest::get("https://example.test").with_credential(&cred);

        let rendered = format!("{:?}", request);
        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains("super-secret-value"));
    }
}
