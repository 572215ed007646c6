//! Environment Lookup
//!
//! Key loading reads variables through [`EnvSource`] so tests can supply a
//! fixed map instead of mutating the process environment.

use std::collections::HashMap;

/// Read-only view of environment variables
pub trait EnvSource {
    /// Value of `name`, or `None` when unset or blank
    fn var(&self, name: &str) -> Option<String>;
}

/// The real process environment
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok().filter(|v| !v.trim().is_empty())
    }
}

impl EnvSource for HashMap<String, String> {
    fn var(&self, name: &str) -> Option<String> {
        self.get(name).filter(|v| !v.trim().is_empty()).cloned()
    }
}

impl<E: EnvSource + ?Sized> EnvSource for &E {
    fn var(&self, name: &str) -> Option<String> {
        (**self).var(name)
    }
}
