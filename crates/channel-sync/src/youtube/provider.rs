//! Async provider adapter over the blocking API client

use std::sync::Arc;

use async_trait::async_trait;

use super::{YouTubeApiError, YouTubeClient};
use crate::error::{ErrorCode, SyncError, SyncResult};
use crate::models::{ChannelSnapshot, ItemSnapshot};
use crate::providers::Provider;

/// External adapter for the "real" and "record" modes
pub struct YouTubeProvider {
    client: Arc<YouTubeClient>,
}

impl YouTubeProvider {
    pub fn new(client: YouTubeClient) -> Self {
        Self {
            client: Arc::new(client),
        }
    }

    pub fn with_api_key(api_key: impl Into<String>) -> Self {
        Self::new(YouTubeClient::new(api_key))
    }

    /// Run a blocking client call on the blocking pool
    async fn call<T, F>(&self, request: F) -> SyncResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&YouTubeClient) -> Result<T, YouTubeApiError> + Send + 'static,
    {
        let client = Arc::clone(&self.client);
        let result = tokio::task::spawn_blocking(move || request(client.as_ref()))
            .await
            .map_err(|e| {
                SyncError::new(
                    ErrorCode::ProviderRequestFailed,
                    format!("YouTube request task failed: {e}"),
                )
            })?;
        result.map_err(SyncError::from)
    }
}

#[async_trait]
impl Provider for YouTubeProvider {
    fn name(&self) -> &str {
        "youtube"
    }

    async fn get_channel_stats(&self, channel_id: &str) -> SyncResult<ChannelSnapshot> {
        let channel_id = channel_id.to_string();
        self.call(move |client| client.channel_stats(&channel_id))
            .await
    }

    async fn get_item_stats(&self, item_ids: &[String]) -> SyncResult<Vec<ItemSnapshot>> {
        if item_ids.is_empty() {
            return Ok(Vec::new());
        }
        let item_ids = item_ids.to_vec();
        self.call(move |client| client.video_stats(&item_ids)).await
    }

    async fn get_recent_items(
        &self,
        channel_id: &str,
        limit: usize,
    ) -> SyncResult<Vec<ItemSnapshot>> {
        let channel_id = channel_id.to_string();
        self.call(move |client| client.recent_videos(&channel_id, limit))
            .await
    }
}
