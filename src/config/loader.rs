//! Configuration Loader
//!
//! Locates, reads, and writes the on-disk key file.

use crate::config::keys::KeyFile;
use crate::error::{Result, TubedeskError};
use std::path::{Path, PathBuf};

/// Environment variable that points at a custom key file
pub const KEYS_PATH_ENV: &str = "TUBEDESK_KEYS_PATH";

/// Key file loader with support for multiple candidate locations
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    config: KeyFile,
    source: Option<PathBuf>,
}

impl ConfigLoader {
    /// Load from the first existing default location.
    ///
    /// Finding no file at all yields an empty configuration.
    pub fn new() -> Result<Self> {
        for path in Self::get_config_paths() {
            if path.is_file() {
                return Self::from_path(path);
            }
        }

        tracing::info!("no key file found, relying on environment keys only");
        Ok(Self {
            config: KeyFile::default(),
            source: None,
        })
    }

    /// Load a specific key file. A missing file is an empty configuration.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config = KeyFileStore::new(path).load()?;

        tracing::debug!(path = %path.display(), "loaded key file");
        Ok(Self {
            config,
            source: Some(path.to_path_buf()),
        })
    }

    /// Candidate key file paths, in priority order
    fn get_config_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        // 1. Environment variable
        if let Ok(custom_path) = std::env::var(KEYS_PATH_ENV) {
            paths.push(PathBuf::from(custom_path));
        }

        // 2. Current directory
        paths.push(PathBuf::from("config").join("api_keys.json"));
        paths.push(PathBuf::from("api_keys.json"));

        // 3. User config directory
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("tubedesk").join("api_keys.json"));
        }

        paths
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &KeyFile {
        &self.config
    }

    /// File the configuration came from, if any
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Store for the loaded file, or for the default location when the
    /// configuration came from nowhere
    pub fn store(&self) -> KeyFileStore {
        match &self.source {
            Some(path) => KeyFileStore::new(path),
            None => KeyFileStore::new(
                Self::get_config_paths()
                    .into_iter()
                    .next()
                    .unwrap_or_else(|| PathBuf::from("api_keys.json")),
            ),
        }
    }

    /// Take ownership of the configuration
    pub fn into_config(self) -> KeyFile {
        self.config
    }
}

/// Reads and writes one key file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyFileStore {
    path: PathBuf,
}

impl KeyFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the file; a missing file is an empty configuration
    pub fn load(&self) -> Result<KeyFile> {
        if !self.path.exists() {
            return Ok(KeyFile::default());
        }

        let content = std::fs::read_to_string(&self.path).map_err(|e| {
            TubedeskError::Config(format!("Failed to read {}: {}", self.path.display(), e))
        })?;

        if content.trim().is_empty() {
            return Ok(KeyFile::default());
        }

        serde_json::from_str(&content).map_err(|e| {
            TubedeskError::Config(format!("Failed to parse {}: {}", self.path.display(), e))
        })
    }

    /// Write the file as pretty JSON, creating its directory if needed
    pub fn save(&self, config: &KeyFile) -> Result<()> {
        let persist_err = |e: &dyn std::fmt::Display| TubedeskError::Persist {
            path: self.path.display().to_string(),
            message: e.to_string(),
        };

        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|e| persist_err(&e))?;
        }

        let body = serde_json::to_string_pretty(config)?;
        std::fs::write(&self.path, body).map_err(|e| persist_err(&e))?;

        tracing::info!(path = %self.path.display(), "saved key file");
        Ok(())
    }
}
