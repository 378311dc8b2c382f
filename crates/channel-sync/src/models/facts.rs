//! Warehouse day facts and the raw-response audit record

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Channel counter deltas accumulated for one calendar day
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelDayFact {
    pub channel_id: String,
    pub day: NaiveDate,
    pub views: u64,
    pub subscribers: u64,
    pub videos: u64,
}

/// Item counter deltas accumulated for one calendar day
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemDayFact {
    pub item_id: String,
    pub channel_id: String,
    pub day: NaiveDate,
    pub views: u64,
    pub likes: u64,
    pub comments: u64,
}

/// Which provider operation produced a response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Endpoint {
    #[serde(rename = "getChannelStats")]
    ChannelStats,
    #[serde(rename = "getItemStats")]
    ItemStats,
    #[serde(rename = "getRecentItems")]
    RecentItems,
}

impl Endpoint {
    pub const ALL: [Endpoint; 3] = [Self::ChannelStats, Self::ItemStats, Self::RecentItems];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ChannelStats => "getChannelStats",
            Self::ItemStats => "getItemStats",
            Self::RecentItems => "getRecentItems",
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only audit row: one per provider call per sync run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawResponseRecord {
    pub sync_run_id: i64,
    /// Mode the response came from ("fake", "real", "record")
    pub source: String,
    pub endpoint: Endpoint,
    pub request_params: Value,
    pub response_body: Value,
    pub fetched_at: DateTime<Utc>,
}
