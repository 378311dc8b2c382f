//! Recording decorator
//!
//! Passes every call through unchanged and accumulates what it sees into a
//! fixture file that [`FixtureProvider`](super::FixtureProvider) can replay.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use log::{debug, warn};

use super::Provider;
use crate::error::SyncResult;
use crate::models::{ChannelSnapshot, FixtureFile, ItemSnapshot};

#[derive(Default)]
struct Recording {
    channel: Option<ChannelSnapshot>,
    items: BTreeMap<String, ItemSnapshot>,
}

pub struct RecordingProvider {
    inner: Arc<dyn Provider>,
    path: PathBuf,
    /// Held across each write so files land in call order
    recording: tokio::sync::Mutex<Recording>,
    last_path: Mutex<Option<PathBuf>>,
}

impl RecordingProvider {
    pub fn new(inner: Arc<dyn Provider>, path: impl Into<PathBuf>) -> Self {
        Self {
            inner,
            path: path.into(),
            recording: tokio::sync::Mutex::new(Recording::default()),
            last_path: Mutex::new(None),
        }
    }

    /// Where recordings are written, whether or not one exists yet
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn last_path(&self) -> MutexGuard<'_, Option<PathBuf>> {
        self.last_path
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Merge new observations and rewrite the fixture on the blocking pool
    ///
    /// Nothing is written until a channel snapshot has been seen, since the
    /// fixture format requires one.
    async fn record(&self, channel: Option<&ChannelSnapshot>, items: &[ItemSnapshot]) {
        let mut recording = self.recording.lock().await;
        if let Some(channel) = channel {
            recording.channel = Some(channel.clone());
        }
        for item in items {
            recording.items.insert(item.id.clone(), item.clone());
        }

        let Some(channel) = recording.channel.clone() else {
            return;
        };
        let fixture = FixtureFile::new(channel, recording.items.values().cloned().collect());
        let count = fixture.items.len();
        let path = self.path.clone();

        // A failed write never fails the call being recorded
        let saved = tokio::task::spawn_blocking(move || fixture.save(&path))
            .await
            .map_err(anyhow::Error::from)
            .and_then(|saved| saved);
        match saved {
            Ok(()) => {
                debug!("Recorded {} items to {}", count, self.path.display());
                *self.last_path() = Some(self.path.clone());
            }
            Err(e) => warn!("Failed to write recording {}: {:#}", self.path.display(), e),
        }
    }
}

#[async_trait]
impl Provider for RecordingProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn is_configured(&self) -> bool {
        self.inner.is_configured()
    }

    fn recording_path(&self) -> Option<PathBuf> {
        self.last_path().clone()
    }

    async fn get_channel_stats(&self, channel_id: &str) -> SyncResult<ChannelSnapshot> {
        let channel = self.inner.get_channel_stats(channel_id).await?;
        self.record(Some(&channel), &[]).await;
        Ok(channel)
    }

    async fn get_item_stats(&self, item_ids: &[String]) -> SyncResult<Vec<ItemSnapshot>> {
        let items = self.inner.get_item_stats(item_ids).await?;
        self.record(None, &items).await;
        Ok(items)
    }

    async fn get_recent_items(
        &self,
        channel_id: &str,
        limit: usize,
    ) -> SyncResult<Vec<ItemSnapshot>> {
        let items = self.inner.get_recent_items(channel_id, limit).await?;
        self.record(None, &items).await;
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorCode, SyncError};
    use crate::models::Endpoint;
    use crate::providers::FixtureProvider;
    use crate::providers::testing::ScriptedProvider;
    use chrono::{Duration, Utc};

    fn scripted() -> Arc<ScriptedProvider> {
        let now = Utc::now();
        Arc::new(ScriptedProvider::new(
            ChannelSnapshot::new("UC-1", "One").with_views(1000),
            vec![
                ItemSnapshot::new("v2", "UC-1", "Newer", now).with_views(5),
                ItemSnapshot::new("v1", "UC-1", "Older", now - Duration::days(1)).with_views(9),
            ],
        ))
    }

    #[tokio::test]
    async fn test_records_merged_fixture_after_each_success() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recording.json");
        let inner = scripted();
        let recorder = RecordingProvider::new(inner.clone(), &path);
        assert_eq!(recorder.path(), path.as_path());

        // Items before the channel are held back
        recorder.get_recent_items("UC-1", 1).await.unwrap();
        assert!(recorder.recording_path().is_none());
        assert!(!path.exists());

        recorder.get_channel_stats("UC-1").await.unwrap();
        assert_eq!(recorder.recording_path(), Some(path.clone()));

        inner.update(|_, items| items[0].view_count = 50);
        recorder
            .get_item_stats(&["v1".to_string(), "v2".to_string()])
            .await
            .unwrap();

        let fixture = FixtureFile::load(&path).unwrap();
        assert_eq!(fixture.channel.view_count, 1000);
        let ids: Vec<&str> = fixture.items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["v2", "v1"]);
        assert_eq!(fixture.items[0].view_count, 50);
    }

    #[tokio::test]
    async fn test_recording_replays_through_fixture_provider() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replay.json");
        let recorder = RecordingProvider::new(scripted(), &path);

        recorder.get_channel_stats("UC-1").await.unwrap();
        recorder.get_recent_items("UC-1", 2).await.unwrap();

        let replay = FixtureProvider::load(&path).unwrap();
        let items = replay.get_recent_items("UC-1", 10).await.unwrap();
        assert_eq!(items.len(), 2);
    }

    #[tokio::test]
    async fn test_failures_pass_through_unrecorded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recording.json");
        let inner = scripted();
        inner.fail_next(
            Endpoint::ChannelStats,
            SyncError::provider(ErrorCode::ProviderUnavailable, "down"),
        );
        let recorder = RecordingProvider::new(inner, &path);

        let err = recorder.get_channel_stats("UC-1").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ProviderUnavailable);
        assert!(recorder.recording_path().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_calls_merge_into_one_recording() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recording.json");
        let recorder = RecordingProvider::new(scripted(), &path);
        let ids = vec!["v1".to_string()];

        let (channel, recent, stats) = tokio::join!(
            recorder.get_channel_stats("UC-1"),
            recorder.get_recent_items("UC-1", 1),
            recorder.get_item_stats(&ids),
        );
        channel.unwrap();
        recent.unwrap();
        stats.unwrap();

        let fixture = FixtureFile::load(&path).unwrap();
        assert_eq!(fixture.channel.id, "UC-1");
        let ids: Vec<&str> = fixture.items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["v2", "v1"]);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_unwritable_path_keeps_call_successful() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("taken");
        std::fs::write(&blocker, "not a directory").unwrap();
        let recorder = RecordingProvider::new(scripted(), blocker.join("recording.json"));

        let channel = recorder.get_channel_stats("UC-1").await.unwrap();

        assert_eq!(channel.id, "UC-1");
        assert!(recorder.recording_path().is_none());
    }
}
