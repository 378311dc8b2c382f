//! TTL memoization decorator

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::Provider;
use crate::error::SyncResult;
use crate::models::{ChannelSnapshot, Endpoint, ItemSnapshot};

/// Per-endpoint cache lifetimes in milliseconds
///
/// A zero or negative TTL disables caching for that endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheConfig {
    pub channel_stats_ttl_ms: i64,
    pub item_stats_ttl_ms: i64,
    pub recent_items_ttl_ms: i64,
}

impl CacheConfig {
    pub const DEFAULT_TTL_MS: i64 = 10_000;

    /// Same TTL for every endpoint
    pub fn uniform(ttl_ms: i64) -> Self {
        Self {
            channel_stats_ttl_ms: ttl_ms,
            item_stats_ttl_ms: ttl_ms,
            recent_items_ttl_ms: ttl_ms,
        }
    }

    pub fn ttl_for(&self, endpoint: Endpoint) -> Option<Duration> {
        let ms = match endpoint {
            Endpoint::ChannelStats => self.channel_stats_ttl_ms,
            Endpoint::ItemStats => self.item_stats_ttl_ms,
            Endpoint::RecentItems => self.recent_items_ttl_ms,
        };
        u64::try_from(ms)
            .ok()
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::uniform(Self::DEFAULT_TTL_MS)
    }
}

#[derive(Clone)]
enum CachedValue {
    Channel(ChannelSnapshot),
    Items(Vec<ItemSnapshot>),
}

struct CacheEntry {
    value: CachedValue,
    expires_at: Instant,
}

/// Returns stored results for identical calls until their TTL lapses
///
/// Only successful results are stored. Keys are the endpoint plus a JSON
/// serialization of the call's arguments.
pub struct CachedProvider {
    inner: Arc<dyn Provider>,
    config: CacheConfig,
    entries: Mutex<HashMap<(Endpoint, String), CacheEntry>>,
}

impl CachedProvider {
    pub fn new(inner: Arc<dyn Provider>, config: &CacheConfig) -> Self {
        Self {
            inner,
            config: config.clone(),
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<(Endpoint, String), CacheEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lookup(&self, endpoint: Endpoint, key: &str) -> Option<CachedValue> {
        self.config.ttl_for(endpoint)?;

        let mut entries = self.entries();
        let cache_key = (endpoint, key.to_string());
        match entries.get(&cache_key) {
            Some(entry) if entry.expires_at > Instant::now() => {
                debug!("Cache hit for {endpoint} {key}");
                Some(entry.value.clone())
            }
            Some(_) => {
                entries.remove(&cache_key);
                None
            }
            None => None,
        }
    }

    fn store(&self, endpoint: Endpoint, key: String, value: CachedValue) {
        let Some(ttl) = self.config.ttl_for(endpoint) else {
            return;
        };
        self.entries().insert(
            (endpoint, key),
            CacheEntry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }
}

fn cache_key(args: serde_json::Value) -> String {
    args.to_string()
}

#[async_trait]
impl Provider for CachedProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn is_configured(&self) -> bool {
        self.inner.is_configured()
    }

    fn recording_path(&self) -> Option<PathBuf> {
        self.inner.recording_path()
    }

    async fn get_channel_stats(&self, channel_id: &str) -> SyncResult<ChannelSnapshot> {
        let key = cache_key(serde_json::json!({ "channelId": channel_id }));
        if let Some(CachedValue::Channel(channel)) = self.lookup(Endpoint::ChannelStats, &key) {
            return Ok(channel);
        }

        let channel = self.inner.get_channel_stats(channel_id).await?;
        self.store(
            Endpoint::ChannelStats,
            key,
            CachedValue::Channel(channel.clone()),
        );
        Ok(channel)
    }

    async fn get_item_stats(&self, item_ids: &[String]) -> SyncResult<Vec<ItemSnapshot>> {
        let key = cache_key(serde_json::json!({ "itemIds": item_ids }));
        if let Some(CachedValue::Items(items)) = self.lookup(Endpoint::ItemStats, &key) {
            return Ok(items);
        }

        let items = self.inner.get_item_stats(item_ids).await?;
        self.store(Endpoint::ItemStats, key, CachedValue::Items(items.clone()));
        Ok(items)
    }

    async fn get_recent_items(
        &self,
        channel_id: &str,
        limit: usize,
    ) -> SyncResult<Vec<ItemSnapshot>> {
        let key = cache_key(serde_json::json!({ "channelId": channel_id, "limit": limit }));
        if let Some(CachedValue::Items(items)) = self.lookup(Endpoint::RecentItems, &key) {
            return Ok(items);
        }

        let items = self.inner.get_recent_items(channel_id, limit).await?;
        self.store(Endpoint::RecentItems, key, CachedValue::Items(items.clone()));
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorCode, SyncError};
    use crate::providers::testing::ScriptedProvider;
    use chrono::Utc;

    fn scripted() -> Arc<ScriptedProvider> {
        let channel = ChannelSnapshot::new("UC-1", "One").with_views(1000);
        let items = vec![
            ItemSnapshot::new("v1", "UC-1", "First", Utc::now()).with_views(10),
            ItemSnapshot::new("v2", "UC-1", "Second", Utc::now()).with_views(20),
        ];
        Arc::new(ScriptedProvider::new(channel, items))
    }

    #[tokio::test(start_paused = true)]
    async fn test_hit_within_ttl_then_refetch_after_expiry() {
        let inner = scripted();
        let cache = CachedProvider::new(inner.clone(), &CacheConfig::uniform(10_000));

        let first = cache.get_channel_stats("UC-1").await.unwrap();
        inner.update(|channel, _| channel.view_count = 2000);
        let second = cache.get_channel_stats("UC-1").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(inner.calls(Endpoint::ChannelStats), 1);

        tokio::time::advance(Duration::from_millis(10_001)).await;
        let third = cache.get_channel_stats("UC-1").await.unwrap();

        assert_eq!(third.view_count, 2000);
        assert_eq!(inner.calls(Endpoint::ChannelStats), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_include_arguments() {
        let inner = scripted();
        let cache = CachedProvider::new(inner.clone(), &CacheConfig::default());

        cache.get_recent_items("UC-1", 1).await.unwrap();
        cache.get_recent_items("UC-1", 2).await.unwrap();
        cache.get_recent_items("UC-1", 1).await.unwrap();

        assert_eq!(inner.calls(Endpoint::RecentItems), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_positive_ttl_disables_endpoint() {
        let inner = scripted();
        let config = CacheConfig {
            item_stats_ttl_ms: 0,
            recent_items_ttl_ms: -5,
            ..CacheConfig::default()
        };
        let cache = CachedProvider::new(inner.clone(), &config);
        let ids = vec!["v1".to_string()];

        cache.get_item_stats(&ids).await.unwrap();
        cache.get_item_stats(&ids).await.unwrap();
        cache.get_recent_items("UC-1", 5).await.unwrap();
        cache.get_recent_items("UC-1", 5).await.unwrap();

        assert_eq!(inner.calls(Endpoint::ItemStats), 2);
        assert_eq!(inner.calls(Endpoint::RecentItems), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_errors_are_not_cached() {
        let inner = scripted();
        inner.fail_next(
            Endpoint::ChannelStats,
            SyncError::provider(ErrorCode::ProviderTimeout, "slow"),
        );
        let cache = CachedProvider::new(inner.clone(), &CacheConfig::default());

        let err = cache.get_channel_stats("UC-1").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ProviderTimeout);

        let channel = cache.get_channel_stats("UC-1").await.unwrap();
        assert_eq!(channel.view_count, 1000);
        assert_eq!(inner.calls(Endpoint::ChannelStats), 2);
    }
}
