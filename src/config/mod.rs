//! Configuration Module
//!
//! Handles key file loading, environment lookup, and per-service policy.

pub mod env;
pub mod keys;
pub mod loader;

pub use env::{EnvSource, ProcessEnv};
pub use keys::{
    EnvScan, KeyField, KeyFile, RotationPolicy, ServicePolicy, ServiceSettings,
    DEFAULT_ENV_SCAN_CEILING,
};
pub use loader::{ConfigLoader, KeyFileStore, KEYS_PATH_ENV};
