//! Video Platform API
//!
//! Channel, playlist, video, and search lookups routed through the
//! dispatcher, with channel-reference parsing and response caching.

use crate::client::cache::{cache_key, PREFIX_CHANNEL, PREFIX_VIDEOS};
use crate::client::{
    DispatchError, Dispatcher, HttpTransport, ResponseCache, Transport, UpstreamRequest,
};
use crate::router::Service;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Default API root
pub const DEFAULT_BASE_URL: &str = "https://www.googleapis.com/youtube/v3";

/// Channel ids are `UC` followed by 22 characters
const CHANNEL_ID_LEN: usize = 24;

/// Candidates fetched when resolving a handle by search
const HANDLE_SEARCH_RESULTS: u32 = 5;

/// Envelope shared by every list endpoint
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
}

/// Descriptive metadata shared by channels, videos, and search hits
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snippet {
    #[serde(default)]
    pub title: String,

    #[serde(default)]
    pub description: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_title: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// Present on playlist items
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<ResourceId>,
}

/// Pointer to the resource a playlist item or search hit refers to
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceId {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
}

/// Counters; the API returns them as decimal strings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Statistics {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view_count: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscriber_count: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_count: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub like_count: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment_count: Option<String>,
}

fn parse_count(value: &Option<String>) -> Option<u64> {
    value.as_deref().and_then(|v| v.parse().ok())
}

impl Statistics {
    pub fn views(&self) -> Option<u64> {
        parse_count(&self.view_count)
    }

    pub fn subscribers(&self) -> Option<u64> {
        parse_count(&self.subscriber_count)
    }

    pub fn videos(&self) -> Option<u64> {
        parse_count(&self.video_count)
    }

    pub fn likes(&self) -> Option<u64> {
        parse_count(&self.like_count)
    }

    pub fn comments(&self) -> Option<u64> {
        parse_count(&self.comment_count)
    }
}

/// A channel resource
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<Snippet>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statistics: Option<Statistics>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_details: Option<ChannelContentDetails>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelContentDetails {
    #[serde(default)]
    pub related_playlists: RelatedPlaylists,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelatedPlaylists {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploads: Option<String>,
}

impl Channel {
    /// Playlist holding every upload of the channel
    pub fn uploads_playlist(&self) -> Option<&str> {
        self.content_details
            .as_ref()?
            .related_playlists
            .uploads
            .as_deref()
    }
}

/// A playlist item resource
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<Snippet>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_details: Option<PlaylistItemContentDetails>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistItemContentDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_id: Option<String>,
}

impl PlaylistItem {
    /// Id of the video this item points at
    pub fn video_id(&self) -> Option<&str> {
        self.content_details
            .as_ref()
            .and_then(|d| d.video_id.as_deref())
            .or_else(|| {
                self.snippet
                    .as_ref()?
                    .resource_id
                    .as_ref()?
                    .video_id
                    .as_deref()
            })
    }
}

/// A video resource
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Video {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<Snippet>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statistics: Option<Statistics>,
}

/// A search hit
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    #[serde(default)]
    pub id: ResourceId,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<Snippet>,
}

impl SearchResult {
    /// Channel the hit belongs to
    pub fn channel_id(&self) -> Option<&str> {
        self.id
            .channel_id
            .as_deref()
            .or_else(|| self.snippet.as_ref()?.channel_id.as_deref())
    }
}

/// User input that names a channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelRef {
    /// Canonical `UC...` id
    Id(String),

    /// `@handle`, stored without the `@`
    Handle(String),
}

impl ChannelRef {
    /// Parse a channel URL, `@handle`, or bare channel id
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();

        if let Some((_, rest)) = input.split_once("youtube.com/") {
            if let Some(handle) = rest.strip_prefix('@') {
                return non_empty(path_segment(handle)).map(|h| ChannelRef::Handle(h.to_string()));
            }
            if let Some(id) = rest.strip_prefix("channel/") {
                return non_empty(path_segment(id)).map(|id| ChannelRef::Id(id.to_string()));
            }
            return None;
        }

        if let Some(handle) = input.strip_prefix('@') {
            return non_empty(handle).map(|h| ChannelRef::Handle(h.to_string()));
        }

        if input.starts_with("UC") && input.len() == CHANNEL_ID_LEN {
            return Some(ChannelRef::Id(input.to_string()));
        }

        None
    }
}

/// Up to the first `/`, `?`, or `#`
fn path_segment(s: &str) -> &str {
    s.split(['/', '?', '#']).next().unwrap_or_default()
}

fn non_empty(s: &str) -> Option<&str> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

/// Failure of a video-platform lookup
#[derive(Debug, Error)]
pub enum VideoError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("Video API response could not be decoded: {0}")]
    Decode(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid channel URL or handle: {0}")]
    InvalidReference(String),
}

/// Client for the video-platform API
#[derive(Debug)]
pub struct VideoClient<T = HttpTransport> {
    dispatcher: Arc<Dispatcher<T>>,
    base_url: String,
    cache: Arc<ResponseCache>,
}

impl<T> Clone for VideoClient<T> {
    fn clone(&self) -> Self {
        Self {
            dispatcher: Arc::clone(&self.dispatcher),
            base_url: self.base_url.clone(),
            cache: Arc::clone(&self.cache),
        }
    }
}

impl<T: Transport> VideoClient<T> {
    pub fn new(dispatcher: Arc<Dispatcher<T>>, cache: Arc<ResponseCache>) -> Self {
        Self::with_base_url(dispatcher, cache, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(
        dispatcher: Arc<Dispatcher<T>>,
        cache: Arc<ResponseCache>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            dispatcher,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            cache,
        }
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    fn endpoint(&self, resource: &str) -> UpstreamRequest {
        UpstreamRequest::get(format!("{}/{}", self.base_url, resource))
    }

    async fn list<R: DeserializeOwned>(
        &self,
        request: UpstreamRequest,
    ) -> Result<ListResponse<R>, VideoError> {
        let dispatched = self.dispatcher.call(Service::VideoPlatform, request).await?;
        serde_json::from_value(dispatched.payload).map_err(|e| VideoError::Decode(e.to_string()))
    }

    /// Channel metadata, statistics, and content details by id
    pub async fn channel(&self, channel_id: &str) -> Result<Channel, VideoError> {
        let key = cache_key(PREFIX_CHANNEL, channel_id);
        if let Some(cached) = self.cache.get(&key) {
            if let Ok(channel) = serde_json::from_value(cached) {
                tracing::debug!(channel_id, "channel served from cache");
                return Ok(channel);
            }
        }

        let request = self
            .endpoint("channels")
            .query("part", "snippet,statistics,contentDetails")
            .query("id", channel_id);

        let channel = self
            .list::<Channel>(request)
            .await?
            .items
            .into_iter()
            .next()
            .ok_or_else(|| VideoError::NotFound(format!("channel {}", channel_id)))?;

        if let Ok(value) = serde_json::to_value(&channel) {
            self.cache.insert(key, value);
        }
        Ok(channel)
    }

    /// Channel looked up by its `@handle`
    pub async fn channel_by_handle(&self, handle: &str) -> Result<Channel, VideoError> {
        let handle = handle.trim_start_matches('@');
        let request = self
            .endpoint("channels")
            .query("part", "snippet,statistics,contentDetails")
            .query("forHandle", format!("@{}", handle));

        self.list::<Channel>(request)
            .await?
            .items
            .into_iter()
            .next()
            .ok_or_else(|| VideoError::NotFound(format!("handle @{}", handle)))
    }

    /// Channel search by free text
    pub async fn search_channels(
        &self,
        query: &str,
        max_results: u32,
    ) -> Result<Vec<SearchResult>, VideoError> {
        let request = self
            .endpoint("search")
            .query("part", "snippet")
            .query("type", "channel")
            .query("q", query)
            .query("maxResults", max_results);

        Ok(self.list(request).await?.items)
    }

    /// Items of a playlist, newest first for upload playlists
    pub async fn playlist_items(
        &self,
        playlist_id: &str,
        max_results: u32,
    ) -> Result<Vec<PlaylistItem>, VideoError> {
        let request = self
            .endpoint("playlistItems")
            .query("part", "snippet,contentDetails")
            .query("playlistId", playlist_id)
            .query("maxResults", max_results);

        Ok(self.list(request).await?.items)
    }

    /// Snippet and statistics for a batch of videos
    pub async fn video_statistics(&self, video_ids: &[String]) -> Result<Vec<Video>, VideoError> {
        if video_ids.is_empty() {
            return Ok(Vec::new());
        }

        let request = self
            .endpoint("videos")
            .query("part", "snippet,statistics")
            .query("id", video_ids.join(","));

        Ok(self.list(request).await?.items)
    }

    /// Latest uploads of a channel with their statistics
    pub async fn recent_videos(
        &self,
        channel_id: &str,
        max_results: u32,
    ) -> Result<Vec<Video>, VideoError> {
        let key = cache_key(PREFIX_VIDEOS, &format!("{}:{}", channel_id, max_results));
        if let Some(cached) = self.cache.get(&key) {
            if let Ok(videos) = serde_json::from_value(cached) {
                return Ok(videos);
            }
        }

        let channel = self.channel(channel_id).await?;
        let uploads = channel
            .uploads_playlist()
            .ok_or_else(|| VideoError::NotFound(format!("uploads playlist of {}", channel_id)))?;

        let ids: Vec<String> = self
            .playlist_items(uploads, max_results)
            .await?
            .iter()
            .filter_map(|item| item.video_id().map(String::from))
            .collect();

        let videos = self.video_statistics(&ids).await?;
        if let Ok(value) = serde_json::to_value(&videos) {
            self.cache.insert(key, value);
        }
        Ok(videos)
    }

    /// Turn a channel URL, handle, or id into a channel id
    pub async fn resolve_channel(&self, input: &str) -> Result<String, VideoError> {
        let handle = match ChannelRef::parse(input) {
            Some(ChannelRef::Id(id)) => return Ok(id),
            Some(ChannelRef::Handle(handle)) => handle,
            None => return Err(VideoError::InvalidReference(input.to_string())),
        };

        let results = self.search_channels(&handle, HANDLE_SEARCH_RESULTS).await?;
        let wanted = handle.to_lowercase();

        let best = results
            .iter()
            .find(|r| {
                r.snippet.as_ref().is_some_and(|s| {
                    let title = s.title.to_lowercase();
                    !title.is_empty() && (title.contains(&wanted) || wanted.contains(&title))
                })
            })
            .or_else(|| results.first());

        best.and_then(SearchResult::channel_id)
            .map(String::from)
            .ok_or_else(|| VideoError::NotFound(format!("handle @{}", handle)))
    }
}
