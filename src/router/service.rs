//! Upstream Services
//!
//! Identifies which upstream API a credential or request belongs to.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An upstream API that needs its own credential pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Service {
    /// Generative-text API (`generateContent`)
    GenerativeText,

    /// Video-platform data API (channels, playlists, videos, search)
    VideoPlatform,
}

impl Service {
    /// Every service, in a stable order
    pub const ALL: [Service; 2] = [Service::GenerativeText, Service::VideoPlatform];

    /// Snake-case name, matching the config file keys
    pub fn as_str(&self) -> &'static str {
        match self {
            Service::GenerativeText => "generative_text",
            Service::VideoPlatform => "video_platform",
        }
    }

    /// Primary environment variable holding a single key.
    ///
    /// The suffix family is `<primary>_1`, `<primary>_2`, ... and the
    /// comma-separated list lives in `<primary>S`.
    pub fn env_var(&self) -> &'static str {
        match self {
            Service::GenerativeText => "GEMINI_API_KEY",
            Service::VideoPlatform => "YOUTUBE_API_KEY",
        }
    }

    /// Comma-separated multi-key environment variable
    pub fn env_list_var(&self) -> String {
        format!("{}S", self.env_var())
    }

    /// Suffix-indexed environment variable, e.g. `YOUTUBE_API_KEY_3`
    pub fn env_indexed_var(&self, index: usize) -> String {
        format!("{}_{}", self.env_var(), index)
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
