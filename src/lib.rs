//! Tubedesk - upstream access layer for a creator-analytics backend
//!
//! Holds a pool of API keys per upstream service (generative text and the
//! video platform), rotates through them, and retries a request on the next
//! key when one hits its quota or fails.
//!
//! ```no_run
//! # async fn run() -> tubedesk::error::Result<()> {
//! tubedesk::logging::init();
//! let upstreams = tubedesk::Upstreams::from_env()?;
//! let channel = upstreams.video().resolve_channel("@somecreator").await;
//! # let _ = channel;
//! # Ok(())
//! # }
//! ```

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod router;

use api::{GenerationConfig, GenerativeClient, GenerativeError, VideoClient, VideoError};
use client::{DispatchError, Dispatcher, ErrorKind, HttpTransport, ResponseCache, Transport};
use config::{ConfigLoader, EnvSource, KeyFile, KeyFileStore, ProcessEnv};
use error::Result;
use router::{KeyRing, Service};

/// Query used by the video-platform probe
const PROBE_QUERY: &str = "youtube";

/// Prompt used by the generative-text probe
const PROBE_PROMPT: &str = "ping";

/// Process-wide upstream access: key ring, dispatcher, and typed clients
#[derive(Debug)]
pub struct Upstreams<T = HttpTransport> {
    dispatcher: Arc<Dispatcher<T>>,
    cache: Arc<ResponseCache>,
    video: VideoClient<T>,
    generative: GenerativeClient<T>,

    /// Where `reload` reads keys from
    store: Option<KeyFileStore>,
}

impl Upstreams<HttpTransport> {
    /// Load `.env`, the first key file found, and process environment keys
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        let loader = ConfigLoader::new()?;
        Self::from_loader(loader)
    }

    /// Like [`Upstreams::from_env`] but with an explicit key file
    pub fn with_config_path(path: impl AsRef<Path>) -> Result<Self> {
        let _ = dotenvy::dotenv();
        let loader = ConfigLoader::from_path(path)?;
        Self::from_loader(loader)
    }

    fn from_loader(loader: ConfigLoader) -> Result<Self> {
        let store = loader.store();
        let config = loader.into_config();
        Ok(Self::from_parts(&config, &ProcessEnv, HttpTransport::new()?).with_store(store))
    }
}

impl<T: Transport> Upstreams<T> {
    /// Build from an already-loaded key file, an environment, and a transport
    pub fn from_parts(config: &KeyFile, env: &impl EnvSource, transport: T) -> Self {
        let ring = Arc::new(KeyRing::load(config, env));
        let dispatcher = Arc::new(Dispatcher::from_config(ring, config, transport));
        let cache = Arc::new(ResponseCache::default());

        Self {
            video: VideoClient::new(Arc::clone(&dispatcher), Arc::clone(&cache)),
            generative: GenerativeClient::new(Arc::clone(&dispatcher)),
            dispatcher,
            cache,
            store: None,
        }
    }

    /// Key file that [`Upstreams::reload`] reads from
    pub fn with_store(mut self, store: KeyFileStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Point the typed clients at different API roots
    pub fn with_base_urls(
        mut self,
        video: impl Into<String>,
        generative: impl Into<String>,
    ) -> Self {
        self.video = VideoClient::with_base_url(
            Arc::clone(&self.dispatcher),
            Arc::clone(&self.cache),
            video,
        );
        self.generative = GenerativeClient::with_base_url(Arc::clone(&self.dispatcher), generative);
        self
    }

    pub fn dispatcher(&self) -> &Dispatcher<T> {
        &self.dispatcher
    }

    pub fn video(&self) -> &VideoClient<T> {
        &self.video
    }

    pub fn generative(&self) -> &GenerativeClient<T> {
        &self.generative
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    pub fn store(&self) -> Option<&KeyFileStore> {
        self.store.as_ref()
    }

    /// Key ring in use right now
    pub fn key_ring(&self) -> Arc<KeyRing> {
        self.dispatcher.key_ring()
    }

    /// Re-read the key file and environment and swap in a fresh key ring.
    ///
    /// Dispatches already running keep the ring they started with. Rotation
    /// cursors start over.
    pub fn reload(&self, env: &impl EnvSource) -> Result<Arc<KeyRing>> {
        let config = match &self.store {
            Some(store) => store.load()?,
            None => KeyFile::default(),
        };

        let ring = Arc::new(KeyRing::load(&config, env));
        self.dispatcher.replace_key_ring(Arc::clone(&ring));

        tracing::info!(
            generative = ring.pool_size(Service::GenerativeText),
            video = ring.pool_size(Service::VideoPlatform),
            "key ring reloaded"
        );
        Ok(ring)
    }

    /// One cheap call per service, run concurrently
    pub async fn probe(&self) -> ProbeReport {
        let ring = self.key_ring();

        let video = async {
            if ring.pool_size(Service::VideoPlatform) == 0 {
                return ProbeStatus::Unconfigured;
            }
            match self.video.search_channels(PROBE_QUERY, 1).await {
                Ok(_) => ProbeStatus::Ok { attempts: None },
                Err(VideoError::Dispatch(e)) => ProbeStatus::from(e),
                Err(e) => ProbeStatus::failed(ErrorKind::UpstreamHttpError, e),
            }
        };

        let generative = async {
            if ring.pool_size(Service::GenerativeText) == 0 {
                return ProbeStatus::Unconfigured;
            }
            let config = GenerationConfig::default().with_max_output_tokens(16);
            match self.generative.generate(PROBE_PROMPT, &config).await {
                Ok(generated) => ProbeStatus::Ok {
                    attempts: Some(generated.attempts),
                },
                Err(GenerativeError::Dispatch(e)) => ProbeStatus::from(e),
                // a reachable model that answered oddly still proves the key works
                Err(GenerativeError::EmptyResponse) => ProbeStatus::Ok { attempts: None },
                Err(e) => ProbeStatus::failed(ErrorKind::UpstreamHttpError, e),
            }
        };

        let (video, generative) = futures::join!(video, generative);

        let mut services = BTreeMap::new();
        services.insert(Service::VideoPlatform, video);
        services.insert(Service::GenerativeText, generative);

        for (service, status) in &services {
            match status {
                ProbeStatus::Failed { kind, summary } => {
                    tracing::warn!(%service, %kind, summary = %summary, "probe failed")
                }
                _ => tracing::info!(%service, ?status, "probe finished"),
            }
        }

        ProbeReport { services }
    }
}

/// Result of probing one service
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProbeStatus {
    /// A call went through; `attempts` when the client reports it
    Ok { attempts: Option<usize> },

    /// Every attempted key failed
    Failed { kind: ErrorKind, summary: String },

    /// The service has no keys
    Unconfigured,
}

impl ProbeStatus {
    fn failed(kind: ErrorKind, err: impl std::fmt::Display) -> Self {
        ProbeStatus::Failed {
            kind,
            summary: err.to_string(),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, ProbeStatus::Ok { .. })
    }
}

impl From<DispatchError> for ProbeStatus {
    fn from(err: DispatchError) -> Self {
        match err.kind {
            ErrorKind::NoCredentialsAvailable => ProbeStatus::Unconfigured,
            kind => ProbeStatus::Failed {
                kind,
                summary: err.summary,
            },
        }
    }
}

/// Per-service probe results
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeReport {
    pub services: BTreeMap<Service, ProbeStatus>,
}

impl ProbeReport {
    pub fn get(&self, service: Service) -> Option<&ProbeStatus> {
        self.services.get(&service)
    }

    /// True when every configured service answered
    pub fn all_ok(&self) -> bool {
        self.services
            .values()
            .all(|s| !matches!(s, ProbeStatus::Failed { .. }))
    }
}
