//! Downstream feature-generation step

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use log::debug;

use crate::storage::WarehouseStore;

/// Runs once per sync after the warehouse has been updated
#[async_trait]
pub trait FeaturePipeline: Send + Sync {
    /// Generate features for a channel, returning how many were produced
    ///
    /// `sync_run_id` is passed through as provenance.
    async fn generate_features(&self, channel_id: &str, sync_run_id: i64) -> Result<u64>;
}

/// Counts the item-day facts written for the channel today
pub struct DayFactFeaturePipeline {
    store: Arc<dyn WarehouseStore>,
}

impl DayFactFeaturePipeline {
    pub fn new(store: Arc<dyn WarehouseStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl FeaturePipeline for DayFactFeaturePipeline {
    async fn generate_features(&self, channel_id: &str, sync_run_id: i64) -> Result<u64> {
        let store = Arc::clone(&self.store);
        let channel = channel_id.to_string();
        let today = Utc::now().date_naive();

        let facts = tokio::task::spawn_blocking(move || store.list_item_day_facts(&channel, today))
            .await
            .context("Feature pipeline task failed")??;

        debug!(
            "Generated {} day features for {} (sync run {})",
            facts.len(),
            channel_id,
            sync_run_id
        );
        Ok(facts.len() as u64)
    }
}
