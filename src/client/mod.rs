//! Client Module
//!
//! Transport, response classification, and the rotating dispatcher.

pub mod cache;
pub mod dispatch;
pub mod http;
pub mod outcome;
pub mod quota;
pub mod request;

pub use cache::{
    cache_key, CacheStats, ResponseCache, PREFIX_ANALYSIS, PREFIX_CHANNEL, PREFIX_VIDEOS,
};
pub use dispatch::Dispatcher;
pub use http::{HttpTransport, RawResponse, Transport, TransportError};
pub use outcome::{DispatchError, DispatchOutcome, Dispatched, ErrorKind};
pub use quota::is_quota_error;
pub use request::{Method, UpstreamRequest};
