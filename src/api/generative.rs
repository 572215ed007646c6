//! Generative Text API
//!
//! Single-turn `generateContent` calls routed through the dispatcher.

use crate::client::{DispatchError, Dispatcher, HttpTransport, Transport, UpstreamRequest};
use crate::router::Service;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Default API root
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Default model
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// A `generateContent` request body
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    /// Conversation turns (a single user turn here)
    pub contents: Vec<Content>,

    /// Sampling settings
    pub generation_config: GenerationSettings,
}

/// One turn of content
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Content {
    /// "user" or "model"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    #[serde(default)]
    pub parts: Vec<Part>,
}

/// A content part; only text parts are produced or read
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// Sampling settings sent upstream
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationSettings {
    pub temperature: f32,
    pub max_output_tokens: u32,
}

/// A `generateContent` response
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage_metadata: Option<UsageMetadata>,
}

/// One generated candidate
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Content>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// Token accounting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetadata {
    #[serde(default)]
    pub prompt_token_count: u32,

    #[serde(default)]
    pub candidates_token_count: u32,

    #[serde(default)]
    pub total_token_count: u32,
}

impl GenerateContentRequest {
    /// A single user prompt
    pub fn prompt(text: impl Into<String>, settings: GenerationSettings) -> Self {
        Self {
            contents: vec![Content {
                role: None,
                parts: vec![Part {
                    text: Some(text.into()),
                }],
            }],
            generation_config: settings,
        }
    }
}

impl GenerateContentResponse {
    /// Text of the first candidate, parts concatenated
    pub fn text(&self) -> Option<String> {
        let content = self.candidates.first()?.content.as_ref()?;
        let text: String = content
            .parts
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect();

        if text.trim().is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

/// Per-call options
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationConfig {
    pub model: String,
    pub temperature: f32,
    pub max_output_tokens: u32,

    /// Attempt cap for this call (still bounded by pool size)
    pub max_attempts: Option<usize>,

    /// Per-attempt timeout; the service policy applies when unset
    pub timeout: Option<Duration>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            temperature: 0.7,
            max_output_tokens: 8192,
            max_attempts: None,
            timeout: None,
        }
    }
}

impl GenerationConfig {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_output_tokens(mut self, tokens: u32) -> Self {
        self.max_output_tokens = tokens;
        self
    }

    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = Some(attempts);
        self
    }
}

/// Generated text and bookkeeping
#[derive(Debug, Clone, PartialEq)]
pub struct Generated {
    pub text: String,
    pub attempts: usize,
    pub usage: Option<UsageMetadata>,
}

/// Failure of a generation call
#[derive(Debug, Error)]
pub enum GenerativeError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("Generative response could not be decoded: {0}")]
    Decode(String),

    #[error("Generative response contained no text")]
    EmptyResponse,
}

/// Client for the generative-text API
#[derive(Debug)]
pub struct GenerativeClient<T = HttpTransport> {
    dispatcher: Arc<Dispatcher<T>>,
    base_url: String,
}

impl<T> Clone for GenerativeClient<T> {
    fn clone(&self) -> Self {
        Self {
            dispatcher: Arc::clone(&self.dispatcher),
            base_url: self.base_url.clone(),
        }
    }
}

impl<T: Transport> GenerativeClient<T> {
    pub fn new(dispatcher: Arc<Dispatcher<T>>) -> Self {
        Self::with_base_url(dispatcher, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(dispatcher: Arc<Dispatcher<T>>, base_url: impl Into<String>) -> Self {
        Self {
            dispatcher,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Run one prompt and return the generated text
    pub async fn generate(
        &self,
        prompt: &str,
        config: &GenerationConfig,
    ) -> Result<Generated, GenerativeError> {
        let body = GenerateContentRequest::prompt(
            prompt,
            GenerationSettings {
                temperature: config.temperature,
                max_output_tokens: config.max_output_tokens,
            },
        );
        let body = serde_json::to_value(&body).map_err(|e| GenerativeError::Decode(e.to_string()))?;

        let url = format!("{}/models/{}:generateContent", self.base_url, config.model);
        let request = UpstreamRequest::post_json(url, body);
        let timeout = config
            .timeout
            .unwrap_or_else(|| self.dispatcher.policy(Service::GenerativeText).timeout);

        tracing::debug!(model = %config.model, prompt_chars = prompt.len(), "generating content");

        let dispatched = match config.max_attempts {
            Some(max) => {
                self.dispatcher
                    .dispatch_with_attempts(Service::GenerativeText, request, timeout, max)
                    .await?
            }
            None => {
                self.dispatcher
                    .dispatch(Service::GenerativeText, request, timeout)
                    .await?
            }
        };

        let response: GenerateContentResponse = serde_json::from_value(dispatched.payload)
            .map_err(|e| GenerativeError::Decode(e.to_string()))?;
        let text = response.text().ok_or(GenerativeError::EmptyResponse)?;

        Ok(Generated {
            text,
            attempts: dispatched.attempts,
            usage: response.usage_metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ErrorKind;
    use crate::config::RotationPolicy;
    use crate::router::{KeyPool, KeyRing};
    use mockito::Matcher;
    use serde_json::json;

    const PATH: &str = "/models/gemini-2.0-flash:generateContent";

    fn client(base_url: &str, keys: &[&str]) -> GenerativeClient {
        let ring = KeyRing::from_pools(
            KeyPool::new(
                Service::GenerativeText,
                keys.iter().copied(),
                RotationPolicy::PinnedFirst,
            ),
            KeyPool::empty(Service::VideoPlatform, RotationPolicy::RoundRobin),
        );
        let dispatcher = Dispatcher::new(Arc::new(ring), HttpTransport::new().unwrap());
        GenerativeClient::with_base_url(Arc::new(dispatcher), base_url)
    }

    #[test]
    fn test_request_shape() {
        let request = GenerateContentRequest::prompt(
            "hello",
            GenerationSettings {
                temperature: 0.5,
                max_output_tokens: 100,
            },
        );

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            json!({
                "contents": [{ "parts": [{ "text": "hello" }] }],
                "generationConfig": { "temperature": 0.5, "maxOutputTokens": 100 }
            })
        );
    }

    #[test]
    fn test_response_text_joins_parts() {
        let response: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [{ "text": "Hello, " }, { "text": "world" }]
                },
                "finishReason": "STOP"
            }],
            "usageMetadata": {
                "promptTokenCount": 3,
                "candidatesTokenCount": 2,
                "totalTokenCount": 5
            }
        }))
        .unwrap();

        assert_eq!(response.text().as_deref(), Some("Hello, world"));
        assert_eq!(response.usage_metadata.unwrap().total_token_count, 5);
        assert!(GenerateContentResponse::default().text().is_none());
    }

    #[tokio::test]
    async fn test_generate_fails_over_to_second_key() {
        let mut server = mockito::Server::new_async().await;
        let exhausted = server
            .mock("POST", PATH)
            .match_query(Matcher::UrlEncoded("key".into(), "gen-key-first".into()))
            .with_status(429)
            .with_body(r#"{"error":{"code":429,"status":"RESOURCE_EXHAUSTED"}}"#)
            .expect(1)
            .create_async()
            .await;
        let success = server
            .mock("POST", PATH)
            .match_query(Matcher::UrlEncoded("key".into(), "gen-key-second".into()))
            .match_body(Matcher::PartialJson(json!({
                "generationConfig": { "maxOutputTokens": 8192 }
            })))
            .with_status(200)
            .with_body(r#"{"candidates":[{"content":{"parts":[{"text":"plan"}]}}]}"#)
            .expect(1)
            .create_async()
            .await;

        let client = client(&server.url(), &["gen-key-first", "gen-key-second"]);
        let generated = client
            .generate("make a plan", &GenerationConfig::default())
            .await
            .unwrap();

        assert_eq!(generated.text, "plan");
        assert_eq!(generated.attempts, 2);
        exhausted.assert_async().await;
        success.assert_async().await;
    }

    #[tokio::test]
    async fn test_empty_candidates_is_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", PATH)
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"candidates":[]}"#)
            .create_async()
            .await;

        let client = client(&server.url(), &["gen-key-only"]);
        let err = client
            .generate("anything", &GenerationConfig::default())
            .await
            .unwrap_err();

        assert!(matches!(err, GenerativeError::EmptyResponse));
    }

    #[tokio::test]
    async fn test_no_keys_is_dispatch_error() {
        let client = client("http://127.0.0.1:9", &[]);
        let err = client
            .generate("anything", &GenerationConfig::default())
            .await
            .unwrap_err();

        match err {
            GenerativeError::Dispatch(e) => assert_eq!(e.kind, ErrorKind::NoCredentialsAvailable),
            other => panic!("unexpected error: {other}"),
        }
    }
}
