//! Key Ring
//!
//! One [`KeyPool`] per upstream service, built once from the key file and
//! the environment.

use crate::config::{EnvScan, EnvSource, KeyFile};
use crate::router::{Credential, KeyPool, Service};

/// The credential pools for every upstream service
#[derive(Debug)]
pub struct KeyRing {
    generative: KeyPool,
    video: KeyPool,
}

impl KeyRing {
    /// Build from pre-constructed pools
    pub fn from_pools(generative: KeyPool, video: KeyPool) -> Self {
        debug_assert_eq!(generative.service(), Service::GenerativeText);
        debug_assert_eq!(video.service(), Service::VideoPlatform);
        Self { generative, video }
    }

    /// Merge key file entries with environment variables.
    ///
    /// Sources apply in order (file, primary variable, comma list, suffix
    /// family) and each contributes only keys not already present.
    pub fn load(config: &KeyFile, env: &impl EnvSource) -> Self {
        let build = |service: Service| {
            let keys = collect_keys(service, config, env);
            let pool = KeyPool::new(service, keys, config.policy(service).rotation);

            if pool.is_empty() {
                tracing::warn!(%service, "no API keys loaded");
            } else {
                tracing::info!(
                    %service,
                    count = pool.len(),
                    policy = ?pool.policy(),
                    keys = ?pool.masked_keys(),
                    "loaded API keys"
                );
            }
            pool
        };

        Self {
            generative: build(Service::GenerativeText),
            video: build(Service::VideoPlatform),
        }
    }

    /// Pool for a service
    pub fn pool(&self, service: Service) -> &KeyPool {
        match service {
            Service::GenerativeText => &self.generative,
            Service::VideoPlatform => &self.video,
        }
    }

    /// Next key for a service according to its policy
    pub fn next_credential(&self, service: Service) -> Option<&Credential> {
        self.pool(service).next_credential()
    }

    /// Number of distinct keys held for a service
    pub fn pool_size(&self, service: Service) -> usize {
        self.pool(service).len()
    }
}

/// Raw keys for one service in source order, duplicates included
fn collect_keys(service: Service, config: &KeyFile, env: &impl EnvSource) -> Vec<String> {
    let mut keys = config.keys_for(service);

    if let Some(key) = env.var(service.env_var()) {
        keys.push(key);
    }

    if let Some(list) = env.var(&service.env_list_var()) {
        keys.extend(
            list.split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(String::from),
        );
    }

    for index in 1..config.env_scan_ceiling {
        match env.var(&service.env_indexed_var(index)) {
            Some(key) => keys.push(key),
            None if config.env_scan == EnvScan::StopAtGap => break,
            None => {}
        }
    }

    keys
}
