//! Provider for the "real" mode

use std::sync::Arc;

use async_trait::async_trait;

use super::{FixtureProvider, Provider};
use crate::error::{SyncError, SyncResult};
use crate::models::{ChannelSnapshot, ItemSnapshot};

/// What the real provider forwards to
pub enum RealBackend {
    /// A configured external adapter (e.g. the YouTube Data API client)
    External(Arc<dyn Provider>),
    /// Fixture data standing in for the external source
    Fixture(FixtureProvider),
    /// Nothing configured; every call fails with `PROVIDER_NOT_CONFIGURED`
    Unconfigured,
}

pub struct RealProvider {
    backend: RealBackend,
}

impl RealProvider {
    pub fn new(backend: RealBackend) -> Self {
        Self { backend }
    }

    pub fn unconfigured() -> Self {
        Self::new(RealBackend::Unconfigured)
    }

    fn target(&self) -> SyncResult<&dyn Provider> {
        match &self.backend {
            RealBackend::External(provider) => Ok(provider.as_ref()),
            RealBackend::Fixture(provider) => Ok(provider),
            RealBackend::Unconfigured => Err(SyncError::not_configured(
                "No external data source is configured",
            )),
        }
    }
}

#[async_trait]
impl Provider for RealProvider {
    fn name(&self) -> &str {
        match &self.backend {
            RealBackend::External(provider) => provider.name(),
            RealBackend::Fixture(_) => "real-fixture",
            RealBackend::Unconfigured => "real",
        }
    }

    fn is_configured(&self) -> bool {
        match &self.backend {
            RealBackend::External(provider) => provider.is_configured(),
            RealBackend::Fixture(_) => true,
            RealBackend::Unconfigured => false,
        }
    }

    async fn get_channel_stats(&self, channel_id: &str) -> SyncResult<ChannelSnapshot> {
        self.target()?.get_channel_stats(channel_id).await
    }

    async fn get_item_stats(&self, item_ids: &[String]) -> SyncResult<Vec<ItemSnapshot>> {
        self.target()?.get_item_stats(item_ids).await
    }

    async fn get_recent_items(
        &self,
        channel_id: &str,
        limit: usize,
    ) -> SyncResult<Vec<ItemSnapshot>> {
        self.target()?.get_recent_items(channel_id, limit).await
    }
}
