//! API Module
//!
//! Typed clients for the two upstream services.

pub mod generative;
pub mod video;

pub use generative::{
    GenerateContentRequest, GenerateContentResponse, Generated, GenerationConfig,
    GenerativeClient, GenerativeError, UsageMetadata,
};
pub use video::{
    Channel, ChannelRef, PlaylistItem, SearchResult, Statistics, Video, VideoClient, VideoError,
};
