//! Token bucket rate limiting decorator

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use log::warn;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::Provider;
use crate::error::{SyncError, SyncResult};
use crate::models::{ChannelSnapshot, Endpoint, ItemSnapshot};

/// Bucket sizing applied to each endpoint independently
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RateLimitConfig {
    /// Maximum tokens (burst size)
    pub capacity: u32,
    /// Tokens added back per second
    pub refill_per_second: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 20,
            refill_per_second: 10.0,
        }
    }
}

/// Classic token bucket: refills at a constant rate up to `capacity`
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    refill_per_second: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// New buckets start full
    pub fn new(capacity: u32, refill_per_second: f64) -> Self {
        Self {
            capacity: f64::from(capacity),
            refill_per_second: refill_per_second.max(0.0),
            tokens: f64::from(capacity),
            last_refill: Instant::now(),
        }
    }

    /// Refill for elapsed time, then try to consume one token
    pub fn try_acquire(&mut self) -> bool {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_second).min(self.capacity);
        self.last_refill = now;
    }
}

/// Rejects calls once an endpoint's bucket is empty
///
/// A rejected call never reaches the wrapped provider; it fails with a
/// warning-level, retryable `RATE_LIMIT_EXCEEDED`.
pub struct RateLimitedProvider {
    inner: Arc<dyn Provider>,
    config: RateLimitConfig,
    buckets: Mutex<HashMap<Endpoint, TokenBucket>>,
}

impl RateLimitedProvider {
    pub fn new(inner: Arc<dyn Provider>, config: &RateLimitConfig) -> Self {
        Self {
            inner,
            config: config.clone(),
            buckets: Mutex::new(HashMap::new()),
        }
    }

    fn acquire(&self, endpoint: Endpoint) -> SyncResult<()> {
        let mut buckets = self
            .buckets
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let bucket = buckets.entry(endpoint).or_insert_with(|| {
            TokenBucket::new(self.config.capacity, self.config.refill_per_second)
        });

        if bucket.try_acquire() {
            Ok(())
        } else {
            warn!("Rate limit reached for {endpoint}");
            Err(
                SyncError::rate_limited(format!("Local rate limit reached for {endpoint}"))
                    .with_context("endpoint", endpoint.as_str()),
            )
        }
    }
}

#[async_trait]
impl Provider for RateLimitedProvider {
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
        self.acquire(Endpoint::ChannelStats)?;
        self.inner.get_channel_stats(channel_id).await
    }

    async fn get_item_stats(&self, item_ids: &[String]) -> SyncResult<Vec<ItemSnapshot>> {
        self.acquire(Endpoint::ItemStats)?;
        self.inner.get_item_stats(item_ids).await
    }

    async fn get_recent_items(
        &self,
        channel_id: &str,
        limit: usize,
    ) -> SyncResult<Vec<ItemSnapshot>> {
        self.acquire(Endpoint::RecentItems)?;
        self.inner.get_recent_items(channel_id, limit).await
    }
}
