//! Provider capability and decorators
//!
//! Every data source implements [`Provider`]. Cross-cutting behavior is
//! layered by wrapping one provider in another that exposes the same
//! contract:
//!
//! ```text
//! CachedProvider -> RateLimitedProvider -> [RecordingProvider ->] base adapter
//! ```

mod cache;
mod fixture;
mod rate_limit;
mod real;
mod recorder;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::SyncResult;
use crate::models::{ChannelSnapshot, ItemSnapshot};

pub use cache::{CacheConfig, CachedProvider};
pub use fixture::FixtureProvider;
pub use rate_limit::{RateLimitConfig, RateLimitedProvider, TokenBucket};
pub use real::{RealBackend, RealProvider};
pub use recorder::RecordingProvider;

/// Contract every data source implements
#[async_trait]
pub trait Provider: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// `false` when the provider cannot serve any request
    fn is_configured(&self) -> bool {
        true
    }

    /// Where the most recent recording was written, if this chain records
    fn recording_path(&self) -> Option<PathBuf> {
        None
    }

    /// Fetch the current absolute counters for a channel
    async fn get_channel_stats(&self, channel_id: &str) -> SyncResult<ChannelSnapshot>;

    /// Fetch the current absolute counters for a set of items
    ///
    /// Unknown ids are omitted from the result.
    async fn get_item_stats(&self, item_ids: &[String]) -> SyncResult<Vec<ItemSnapshot>>;

    /// Fetch the `limit` most recently published items of a channel
    async fn get_recent_items(&self, channel_id: &str, limit: usize)
    -> SyncResult<Vec<ItemSnapshot>>;
}

/// Wrap a base provider in the standard decorator chain
pub fn decorate(
    base: Arc<dyn Provider>,
    cache: &CacheConfig,
    rate_limit: &RateLimitConfig,
) -> Arc<dyn Provider> {
    let limited: Arc<dyn Provider> = Arc::new(RateLimitedProvider::new(base, rate_limit));
    Arc::new(CachedProvider::new(limited, cache))
}
