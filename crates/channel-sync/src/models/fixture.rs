//! Replayable fixture file format
//!
//! Read by the fixture-backed provider and written by the recorder:
//! `{ generatedAt, channel, items }` with items sorted newest first.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ChannelSnapshot, ItemSnapshot, sort_items_for_replay};

/// Demo fixture compiled into the binary, used when no fixture path is configured
pub const BUILTIN_FIXTURE: &str = include_str!("../../fixtures/demo_channel.json");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixtureFile {
    pub generated_at: DateTime<Utc>,
    pub channel: ChannelSnapshot,
    pub items: Vec<ItemSnapshot>,
}

impl FixtureFile {
    /// Build a fixture with items in replay order
    pub fn new(channel: ChannelSnapshot, mut items: Vec<ItemSnapshot>) -> Self {
        sort_items_for_replay(&mut items);
        Self {
            generated_at: Utc::now(),
            channel,
            items,
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let mut fixture: FixtureFile =
            serde_json::from_str(json).context("Failed to parse fixture JSON")?;
        sort_items_for_replay(&mut fixture.items);
        Ok(fixture)
    }

    pub fn builtin() -> Result<Self> {
        Self::from_json(BUILTIN_FIXTURE)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read fixture: {}", path.display()))?;
        Self::from_json(&content).with_context(|| format!("Invalid fixture: {}", path.display()))
    }

    /// Write the fixture as pretty JSON, replacing any previous file atomically
    pub fn save(&self, path: &Path) -> Result<()> {
        let tmp = path.with_extension("json.tmp");
        config::save_json_file(&tmp, self)?;
        std::fs::rename(&tmp, path)
            .with_context(|| format!("Failed to move fixture into place: {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_fixture_parses_in_replay_order() {
        let fixture = FixtureFile::builtin().unwrap();
        assert!(!fixture.items.is_empty());
        assert!(
            fixture
                .items
                .windows(2)
                .all(|w| w[0].published_at >= w[1].published_at)
        );
        assert!(
            fixture
                .items
                .iter()
                .all(|item| item.channel_id == fixture.channel.id)
        );
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recording.json");
        let fixture = FixtureFile::builtin().unwrap();

        fixture.save(&path).unwrap();
        let loaded = FixtureFile::load(&path).unwrap();

        assert_eq!(loaded, fixture);
        assert!(!path.with_extension("json.tmp").exists());
    }
}
