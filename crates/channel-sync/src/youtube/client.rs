//! YouTube Data API HTTP client
//!
//! Uses synchronous HTTP (ureq) to be executor-agnostic; the provider
//! adapter runs it on the blocking pool.

use std::time::Duration;

use log::debug;
use serde::de::DeserializeOwned;
use ureq::Agent;

use super::api::{Channel, ListResponse, PlaylistItem, Video};
use super::normalize::{normalize_channel, normalize_video};
use crate::error::{ErrorCode, SyncError};
use crate::models::{ChannelSnapshot, ItemSnapshot, sort_items_for_replay};

/// `videos.list` and `playlistItems.list` accept at most 50 ids/results
const MAX_PAGE_SIZE: usize = 50;

/// Failure talking to the YouTube Data API
#[derive(Debug, thiserror::Error)]
pub enum YouTubeApiError {
    #[error("YouTube API returned HTTP {0}")]
    Status(u16),
    #[error("YouTube API request timed out")]
    Timeout,
    #[error("YouTube API transport error: {0}")]
    Transport(String),
    #[error("Failed to decode YouTube API response: {0}")]
    Decode(String),
    #[error("{0}")]
    NotFound(String),
}

impl From<ureq::Error> for YouTubeApiError {
    fn from(err: ureq::Error) -> Self {
        match err {
            ureq::Error::StatusCode(status) => Self::Status(status),
            ureq::Error::Timeout(_) => Self::Timeout,
            ureq::Error::Json(e) => Self::Decode(e.to_string()),
            other => Self::Transport(other.to_string()),
        }
    }
}

impl From<YouTubeApiError> for SyncError {
    fn from(err: YouTubeApiError) -> Self {
        let code = match &err {
            YouTubeApiError::Status(429) => ErrorCode::RateLimitExceeded,
            YouTubeApiError::Status(504) | YouTubeApiError::Timeout => ErrorCode::ProviderTimeout,
            YouTubeApiError::Status(502 | 503) => ErrorCode::ProviderUnavailable,
            YouTubeApiError::Status(500..=599) => ErrorCode::ProviderTemporary,
            YouTubeApiError::Status(401 | 403) => ErrorCode::ProviderAuthFailed,
            YouTubeApiError::Status(404) | YouTubeApiError::NotFound(_) => ErrorCode::DataNotFound,
            YouTubeApiError::Status(_) | YouTubeApiError::Decode(_) => {
                ErrorCode::ProviderRequestFailed
            }
            YouTubeApiError::Transport(_) => ErrorCode::ProviderTemporary,
        };
        let status = match &err {
            YouTubeApiError::Status(status) => Some(*status),
            _ => None,
        };

        let mut sync_err = SyncError::provider(code, err.to_string());
        if let Some(status) = status {
            sync_err = sync_err.with_context("httpStatus", status);
        }
        sync_err.with_cause(err)
    }
}

/// YouTube Data API v3 client authenticated with an API key
pub struct YouTubeClient {
    agent: Agent,
    api_key: String,
    base_url: String,
}

impl YouTubeClient {
    /// YouTube Data API base URL
    const BASE_URL: &'static str = "https://www.googleapis.com/youtube/v3";

    /// Create a new client with a 15 second request timeout
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_timeout(api_key, Duration::from_secs(15))
    }

    pub fn with_timeout(api_key: impl Into<String>, timeout: Duration) -> Self {
        let agent: Agent = Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        Self {
            agent,
            api_key: api_key.into(),
            base_url: Self::BASE_URL.to_string(),
        }
    }

    /// Point the client at a different API root (e.g. a local stub)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn get_json<T: DeserializeOwned>(
        &self,
        resource: &str,
        query: &[(&str, &str)],
    ) -> Result<T, YouTubeApiError> {
        let mut url = format!(
            "{}/{}?key={}",
            self.base_url,
            resource,
            urlencoding::encode(&self.api_key)
        );
        for (name, value) in query {
            url.push_str(&format!("&{}={}", name, urlencoding::encode(value)));
        }

        debug!("GET {}/{}", self.base_url, resource);
        let mut response = self.agent.get(&url).call()?;
        let body = response.body_mut().read_json::<T>()?;
        Ok(body)
    }

    fn fetch_channel(&self, channel_id: &str) -> Result<Channel, YouTubeApiError> {
        let response: ListResponse<Channel> = self.get_json(
            "channels",
            &[
                ("part", "snippet,statistics,contentDetails"),
                ("id", channel_id),
            ],
        )?;

        response
            .items
            .into_iter()
            .next()
            .ok_or_else(|| YouTubeApiError::NotFound(format!("Channel {channel_id} not found")))
    }

    /// Current statistics for a channel
    pub fn channel_stats(&self, channel_id: &str) -> Result<ChannelSnapshot, YouTubeApiError> {
        self.fetch_channel(channel_id).map(normalize_channel)
    }

    /// Statistics for a set of videos, requested in batches of 50
    ///
    /// Ids the API doesn't know are omitted from the result.
    pub fn video_stats(&self, video_ids: &[String]) -> Result<Vec<ItemSnapshot>, YouTubeApiError> {
        let mut items = Vec::with_capacity(video_ids.len());
        for batch in video_ids.chunks(MAX_PAGE_SIZE) {
            let ids = batch.join(",");
            let response: ListResponse<Video> = self.get_json(
                "videos",
                &[("part", "snippet,statistics,contentDetails"), ("id", ids.as_str())],
            )?;
            items.extend(response.items.into_iter().map(normalize_video));
        }
        Ok(items)
    }

    /// The most recent uploads of a channel, newest first
    pub fn recent_videos(
        &self,
        channel_id: &str,
        limit: usize,
    ) -> Result<Vec<ItemSnapshot>, YouTubeApiError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let channel = self.fetch_channel(channel_id)?;
        let uploads = channel
            .content_details
            .and_then(|details| details.related_playlists.uploads)
            .ok_or_else(|| {
                YouTubeApiError::NotFound(format!("Channel {channel_id} has no uploads playlist"))
            })?;

        let max_results = limit.min(MAX_PAGE_SIZE).to_string();
        let playlist: ListResponse<PlaylistItem> = self.get_json(
            "playlistItems",
            &[
                ("part", "contentDetails"),
                ("playlistId", uploads.as_str()),
                ("maxResults", max_results.as_str()),
            ],
        )?;

        let ids: Vec<String> = playlist
            .items
            .into_iter()
            .map(|item| item.content_details.video_id)
            .collect();
        let mut items = self.video_stats(&ids)?;
        sort_items_for_replay(&mut items);
        items.truncate(limit);
        Ok(items)
    }
}
