//! Router Module
//!
//! Upstream service identities and API key pool management.

pub mod key_pool;
pub mod keyring;
pub mod service;

pub use key_pool::{Credential, KeyPool};
pub use keyring::KeyRing;
pub use service::Service;
