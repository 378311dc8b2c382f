//! Point-in-time snapshots returned by providers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Absolute channel counters observed at fetch time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelSnapshot {
    /// External channel identifier (e.g. "UC-1")
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// `None` when the channel hides its subscriber count
    #[serde(default)]
    pub subscriber_count: Option<u64>,
    pub video_count: u64,
    pub view_count: u64,
    pub created_at: DateTime<Utc>,
}

impl ChannelSnapshot {
    /// Create a snapshot with zeroed counters
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            subscriber_count: Some(0),
            video_count: 0,
            view_count: 0,
            created_at: Utc::now(),
        }
    }

    pub fn with_views(mut self, view_count: u64) -> Self {
        self.view_count = view_count;
        self
    }

    pub fn with_subscribers(mut self, subscriber_count: Option<u64>) -> Self {
        self.subscriber_count = subscriber_count;
        self
    }

    pub fn with_videos(mut self, video_count: u64) -> Self {
        self.video_count = video_count;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Absolute counters for a single item (video) observed at fetch time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemSnapshot {
    pub id: String,
    pub channel_id: String,
    pub title: String,
    pub view_count: u64,
    /// `None` when likes are hidden by the owner
    #[serde(default)]
    pub like_count: Option<u64>,
    /// `None` when comments are disabled
    #[serde(default)]
    pub comment_count: Option<u64>,
    pub published_at: DateTime<Utc>,
    #[serde(default)]
    pub duration_seconds: u64,
}

impl ItemSnapshot {
    pub fn new(
        id: impl Into<String>,
        channel_id: impl Into<String>,
        title: impl Into<String>,
        published_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            channel_id: channel_id.into(),
            title: title.into(),
            view_count: 0,
            like_count: Some(0),
            comment_count: Some(0),
            published_at,
            duration_seconds: 0,
        }
    }

    pub fn with_views(mut self, view_count: u64) -> Self {
        self.view_count = view_count;
        self
    }

    pub fn with_likes(mut self, like_count: Option<u64>) -> Self {
        self.like_count = like_count;
        self
    }

    pub fn with_comments(mut self, comment_count: Option<u64>) -> Self {
        self.comment_count = comment_count;
        self
    }

    pub fn with_duration(mut self, duration_seconds: u64) -> Self {
        self.duration_seconds = duration_seconds;
        self
    }
}

/// Order items newest first, ties broken by id, for deterministic replay
pub fn sort_items_for_replay(items: &mut [ItemSnapshot]) {
    items.sort_by(|a, b| {
        b.published_at
            .cmp(&a.published_at)
            .then_with(|| a.id.cmp(&b.id))
    });
}
