//! Deterministic provider backed by fixture data

use std::path::Path;

use async_trait::async_trait;

use super::Provider;
use crate::error::{ErrorCode, SyncError, SyncResult};
use crate::models::{ChannelSnapshot, FixtureFile, ItemSnapshot};

/// Serves the channel and items of a single fixture file
pub struct FixtureProvider {
    fixture: FixtureFile,
}

impl FixtureProvider {
    pub fn new(fixture: FixtureFile) -> Self {
        Self { fixture }
    }

    /// Demo data compiled into the crate
    pub fn builtin() -> SyncResult<Self> {
        FixtureFile::builtin().map(Self::new).map_err(invalid_fixture)
    }

    pub fn load(path: &Path) -> SyncResult<Self> {
        FixtureFile::load(path)
            .map(Self::new)
            .map_err(|e| invalid_fixture(e).with_context("path", path.display().to_string()))
    }

    pub fn fixture(&self) -> &FixtureFile {
        &self.fixture
    }

    fn ensure_channel(&self, channel_id: &str) -> SyncResult<()> {
        if self.fixture.channel.id == channel_id {
            Ok(())
        } else {
            Err(
                SyncError::not_found(format!("Channel {channel_id} is not in the fixture"))
                    .with_context("channelId", channel_id),
            )
        }
    }
}

fn invalid_fixture(err: anyhow::Error) -> SyncError {
    SyncError::new(ErrorCode::FixtureInvalid, format!("{err:#}")).with_cause(err)
}

#[async_trait]
impl Provider for FixtureProvider {
    fn name(&self) -> &str {
        "fixture"
    }

    async fn get_channel_stats(&self, channel_id: &str) -> SyncResult<ChannelSnapshot> {
        self.ensure_channel(channel_id)?;
        Ok(self.fixture.channel.clone())
    }

    async fn get_item_stats(&self, item_ids: &[String]) -> SyncResult<Vec<ItemSnapshot>> {
        Ok(item_ids
            .iter()
            .filter_map(|id| self.fixture.items.iter().find(|item| &item.id == id))
            .cloned()
            .collect())
    }

    async fn get_recent_items(
        &self,
        channel_id: &str,
        limit: usize,
    ) -> SyncResult<Vec<ItemSnapshot>> {
        self.ensure_channel(channel_id)?;
        // Fixture items are kept in replay order (newest first)
        Ok(self.fixture.items.iter().take(limit).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_serves_builtin_fixture() {
        let provider = FixtureProvider::builtin().unwrap();
        let channel_id = provider.fixture().channel.id.clone();

        let channel = provider.get_channel_stats(&channel_id).await.unwrap();
        assert_eq!(channel.id, channel_id);

        let recent = provider.get_recent_items(&channel_id, 2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert!(recent[0].published_at >= recent[1].published_at);

        let ids: Vec<String> = vec![recent[1].id.clone(), "missing".into(), recent[0].id.clone()];
        let stats = provider.get_item_stats(&ids).await.unwrap();
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].id, recent[1].id);
    }

    #[tokio::test]
    async fn test_unknown_channel_is_not_found() {
        let provider = FixtureProvider::builtin().unwrap();
        let err = provider.get_channel_stats("UC-nope").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::DataNotFound);
        assert!(!err.retryable);

        let err = provider.get_recent_items("UC-nope", 3).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::DataNotFound);
    }

    #[test]
    fn test_invalid_fixture_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{\"channel\": 1}").unwrap();

        let err = match FixtureProvider::load(&path) {
            Ok(_) => panic!("broken fixture should not load"),
            Err(err) => err,
        };
        assert_eq!(err.code, ErrorCode::FixtureInvalid);
    }
}
