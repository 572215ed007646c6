//! Key File Configuration
//!
//! Defines the on-disk schema for upstream API keys and per-service policy.

use crate::router::Service;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Default upper bound (exclusive) for the `<PRIMARY>_<n>` env scan
pub const DEFAULT_ENV_SCAN_CEILING: usize = 100;

/// Root of `api_keys.json`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KeyFile {
    /// Multiple generative-text keys
    #[serde(default, alias = "gemini_keys", skip_serializing_if = "Option::is_none")]
    pub gemini_api_keys: Option<KeyField>,

    /// Single generative-text key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gemini_api_key: Option<KeyField>,

    /// Multiple video-platform keys
    #[serde(default, alias = "youtube_keys", skip_serializing_if = "Option::is_none")]
    pub youtube_api_keys: Option<KeyField>,

    /// Single video-platform key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub youtube_api_key: Option<KeyField>,

    /// Per-service rotation and retry settings
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub services: BTreeMap<Service, ServiceSettings>,

    /// How the suffix-indexed env family is enumerated
    #[serde(default)]
    pub env_scan: EnvScan,

    /// Exclusive ceiling for the suffix-indexed env family
    #[serde(default = "default_env_scan_ceiling")]
    pub env_scan_ceiling: usize,
}

fn default_env_scan_ceiling() -> usize {
    DEFAULT_ENV_SCAN_CEILING
}

impl Default for KeyFile {
    fn default() -> Self {
        Self {
            gemini_api_keys: None,
            gemini_api_key: None,
            youtube_api_keys: None,
            youtube_api_key: None,
            services: BTreeMap::new(),
            env_scan: EnvScan::default(),
            env_scan_ceiling: DEFAULT_ENV_SCAN_CEILING,
        }
    }
}

/// A key field that may hold one secret or a list of them
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum KeyField {
    One(String),
    Many(Vec<String>),
}

impl KeyField {
    fn into_vec(self) -> Vec<String> {
        match self {
            KeyField::One(key) => vec![key],
            KeyField::Many(keys) => keys,
        }
    }

    fn is_blank(&self) -> bool {
        match self {
            KeyField::One(key) => key.trim().is_empty(),
            KeyField::Many(keys) => keys.iter().all(|k| k.trim().is_empty()),
        }
    }
}

/// Strategy for handing out keys from a pool
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RotationPolicy {
    /// Rotate through keys sequentially
    #[default]
    RoundRobin,

    /// Always prefer the first loaded key (flat-rate billing)
    PinnedFirst,
}

/// Enumeration mode for `<PRIMARY>_1`, `<PRIMARY>_2`, ...
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EnvScan {
    /// Probe every index below the ceiling, skipping gaps
    #[default]
    FullRange,

    /// Stop at the first missing index
    StopAtGap,
}

/// Per-service overrides as written in the key file
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceSettings {
    /// Rotation policy for this service's pool
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<RotationPolicy>,

    /// Cap on attempts per dispatch (still bounded by pool size)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<usize>,

    /// Per-attempt timeout in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

/// Effective settings for one service after applying defaults
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServicePolicy {
    pub rotation: RotationPolicy,
    pub max_attempts: Option<usize>,
    pub timeout: Duration,
}

impl ServicePolicy {
    /// Built-in defaults for a service
    pub fn defaults(service: Service) -> Self {
        match service {
            Service::GenerativeText => Self {
                rotation: RotationPolicy::PinnedFirst,
                max_attempts: None,
                timeout: Duration::from_secs(120),
            },
            Service::VideoPlatform => Self {
                rotation: RotationPolicy::RoundRobin,
                max_attempts: None,
                timeout: Duration::from_secs(10),
            },
        }
    }
}

impl KeyFile {
    /// Keys configured for a service. The list field wins when it holds
    /// anything; otherwise the single field is used.
    pub fn keys_for(&self, service: Service) -> Vec<String> {
        let (many, one) = match service {
            Service::GenerativeText => (&self.gemini_api_keys, &self.gemini_api_key),
            Service::VideoPlatform => (&self.youtube_api_keys, &self.youtube_api_key),
        };

        let field = match many {
            Some(field) if !field.is_blank() => Some(field),
            _ => one.as_ref(),
        };

        field.cloned().map(KeyField::into_vec).unwrap_or_default()
    }

    /// Replace the keys for a service (stored in the list field)
    pub fn set_keys(&mut self, service: Service, keys: Vec<String>) {
        let field = Some(KeyField::Many(keys));
        match service {
            Service::GenerativeText => {
                self.gemini_api_keys = field;
                self.gemini_api_key = None;
            }
            Service::VideoPlatform => {
                self.youtube_api_keys = field;
                self.youtube_api_key = None;
            }
        }
    }

    /// Remove every key stored for a service
    pub fn clear_keys(&mut self, service: Service) {
        match service {
            Service::GenerativeText => {
                self.gemini_api_keys = None;
                self.gemini_api_key = None;
            }
            Service::VideoPlatform => {
                self.youtube_api_keys = None;
                self.youtube_api_key = None;
            }
        }
    }

    /// Effective policy for a service
    pub fn policy(&self, service: Service) -> ServicePolicy {
        let mut policy = ServicePolicy::defaults(service);
        if let Some(settings) = self.services.get(&service) {
            if let Some(rotation) = settings.rotation {
                policy.rotation = rotation;
            }
            if let Some(max) = settings.max_attempts {
                policy.max_attempts = Some(max.max(1));
            }
            if let Some(secs) = settings.timeout_secs {
                policy.timeout = Duration::from_secs(secs);
            }
        }
        policy
    }
}
