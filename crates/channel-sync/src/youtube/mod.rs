//! YouTube Data API integration
//!
//! This module provides:
//! - A blocking API client for channels, uploads, and video statistics
//! - Response normalization to channel and item snapshots
//! - A [`Provider`](crate::providers::Provider) adapter for the "real" mode

mod client;
mod normalize;
mod provider;

pub use client::{YouTubeApiError, YouTubeClient};
pub use normalize::{normalize_channel, normalize_video, parse_count, parse_duration_seconds};
pub use provider::YouTubeProvider;

/// YouTube Data API v3 response types
pub mod api {
    use chrono::{DateTime, Utc};
    use serde::Deserialize;

    /// Envelope shared by every list endpoint
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ListResponse<T> {
        #[serde(default = "Vec::new")]
        pub items: Vec<T>,
        pub next_page_token: Option<String>,
    }

    /// Item of `channels.list`
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Channel {
        pub id: String,
        pub snippet: ChannelSnippet,
        pub statistics: Option<ChannelStatistics>,
        pub content_details: Option<ChannelContentDetails>,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ChannelSnippet {
        pub title: String,
        #[serde(default)]
        pub description: String,
        pub published_at: DateTime<Utc>,
    }

    /// Counters arrive as decimal strings
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ChannelStatistics {
        pub view_count: Option<String>,
        pub subscriber_count: Option<String>,
        #[serde(default)]
        pub hidden_subscriber_count: bool,
        pub video_count: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ChannelContentDetails {
        pub related_playlists: RelatedPlaylists,
    }

    #[derive(Debug, Deserialize)]
    pub struct RelatedPlaylists {
        pub uploads: Option<String>,
    }

    /// Item of `playlistItems.list`
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct PlaylistItem {
        pub content_details: PlaylistItemContentDetails,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct PlaylistItemContentDetails {
        pub video_id: String,
    }

    /// Item of `videos.list`
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Video {
        pub id: String,
        pub snippet: VideoSnippet,
        pub statistics: Option<VideoStatistics>,
        pub content_details: Option<VideoContentDetails>,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct VideoSnippet {
        pub channel_id: String,
        pub title: String,
        pub published_at: DateTime<Utc>,
    }

    /// Missing like/comment counts mean the owner hid or disabled them
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct VideoStatistics {
        pub view_count: Option<String>,
        pub like_count: Option<String>,
        pub comment_count: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    pub struct VideoContentDetails {
        /// ISO-8601 duration, e.g. `PT12M5S`
        pub duration: Option<String>,
    }
}
