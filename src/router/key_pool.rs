//! API Key Pool Management
//!
//! Holds the de-duplicated credentials for one upstream service and hands
//! them out according to its rotation policy.

use crate::config::RotationPolicy;
use crate::router::Service;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Number of trailing characters shown when a key is logged
const VISIBLE_TAIL: usize = 4;

/// A single upstream API key
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Credential {
    service: Service,
    value: String,
}

impl Credential {
    pub fn new(service: Service, value: impl Into<String>) -> Self {
        Self {
            service,
            value: value.into(),
        }
    }

    /// The service this key authorizes
    pub fn service(&self) -> Service {
        self.service
    }

    /// The secret itself. Never log this.
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Last `n` characters of the key, or nothing if the key is too short
    /// to reveal a suffix safely
    pub fn tail(&self, n: usize) -> &str {
        let chars = self.value.chars().count();
        if chars <= n * 2 {
            return "";
        }
        let start = self
            .value
            .char_indices()
            .nth(chars - n)
            .map(|(i, _)| i)
            .unwrap_or(self.value.len());
        &self.value[start..]
    }

    /// Log-safe form: `...` followed by the trailing characters
    pub fn masked(&self) -> String {
        format!("...{}", self.tail(VISIBLE_TAIL))
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("service", &self.service)
            .field("value", &self.masked())
            .finish()
    }
}

/// Pool of API keys with rotation support
#[derive(Debug)]
pub struct KeyPool {
    /// Service this pool belongs to
    service: Service,

    /// Keys in order of first appearance
    credentials: Vec<Credential>,

    /// Next position for round-robin, always `< credentials.len()`
    cursor: AtomicUsize,

    /// Rotation policy
    policy: RotationPolicy,
}

impl KeyPool {
    /// Create a pool, dropping blank keys and later duplicates.
    ///
    /// Keys are compared exactly as given; trimming is up to the source.
    pub fn new<I, S>(service: Service, keys: I, policy: RotationPolicy) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = HashSet::new();
        let credentials = keys
            .into_iter()
            .map(Into::into)
            .filter(|k: &String| !k.trim().is_empty())
            .filter(|k| seen.insert(k.clone()))
            .map(|k| Credential::new(service, k))
            .collect();

        Self {
            service,
            credentials,
            cursor: AtomicUsize::new(0),
            policy,
        }
    }

    /// An empty pool
    pub fn empty(service: Service, policy: RotationPolicy) -> Self {
        Self::new(service, Vec::<String>::new(), policy)
    }

    /// Get the service name
    pub fn service(&self) -> Service {
        self.service
    }

    pub fn policy(&self) -> RotationPolicy {
        self.policy
    }

    /// Check if the pool is empty
    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }

    /// Get the number of distinct keys in the pool
    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    /// All keys in insertion order
    pub fn credentials(&self) -> &[Credential] {
        &self.credentials
    }

    /// Key at `index`, wrapping around the pool
    pub fn credential_at(&self, index: usize) -> Option<&Credential> {
        if self.credentials.is_empty() {
            return None;
        }
        self.credentials.get(index % self.credentials.len())
    }

    /// Get the next key based on the rotation policy
    pub fn next_credential(&self) -> Option<&Credential> {
        self.next_slot().map(|idx| &self.credentials[idx])
    }

    /// Position of the next key. Advancing the cursor is a single atomic
    /// read-modify-write, so concurrent callers never share a slot.
    pub(crate) fn next_slot(&self) -> Option<usize> {
        let len = self.credentials.len();
        if len == 0 {
            return None;
        }

        match self.policy {
            RotationPolicy::PinnedFirst => Some(0),
            RotationPolicy::RoundRobin => {
                let prev = self
                    .cursor
                    .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| Some((c + 1) % len))
                    .unwrap_or_else(|c| c);
                Some(prev % len)
            }
        }
    }

    /// Current cursor position
    pub fn cursor(&self) -> usize {
        self.cursor.load(Ordering::Acquire)
    }

    /// Log-safe view of the keys
    pub fn masked_keys(&self) -> Vec<String> {
        self.credentials.iter().map(Credential::masked).collect()
    }
}
