//! Sync run tracking
//!
//! The persisted [`SyncRun`] row is the single source of truth for where a
//! sync attempt stopped. Only one run may be `running` at a time.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a sync run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Running,
    Completed,
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for SyncStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => anyhow::bail!("Unknown sync status: {other}"),
        }
    }
}

/// Fixed stage sequence; declaration order is execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncStage {
    CollectProviderData,
    PersistWarehouse,
    RunPipeline,
    Completed,
}

impl SyncStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CollectProviderData => "collect-provider-data",
            Self::PersistWarehouse => "persist-warehouse",
            Self::RunPipeline => "run-pipeline",
            Self::Completed => "completed",
        }
    }

    /// Progress percentage reported when the stage begins
    pub fn percent(&self) -> u8 {
        match self {
            Self::CollectProviderData => 10,
            Self::PersistWarehouse => 45,
            Self::RunPipeline => 75,
            Self::Completed => 100,
        }
    }

    /// Stage a resumed run restarts from
    ///
    /// A run stopped at `run-pipeline` retries just that step; anything
    /// earlier re-collects.
    pub fn resume_point(&self) -> Self {
        match self {
            Self::RunPipeline => Self::RunPipeline,
            _ => Self::CollectProviderData,
        }
    }
}

impl fmt::Display for SyncStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStage {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "collect-provider-data" => Ok(Self::CollectProviderData),
            "persist-warehouse" => Ok(Self::PersistWarehouse),
            "run-pipeline" => Ok(Self::RunPipeline),
            "completed" => Ok(Self::Completed),
            other => anyhow::bail!("Unknown sync stage: {other}"),
        }
    }
}

/// A single synchronization attempt and its checkpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRun {
    /// Database-assigned identifier
    pub id: i64,
    pub profile_id: Option<String>,
    pub channel_id: String,
    pub status: SyncStatus,
    /// Checkpoint; for failed runs, the stage the failure happened in
    pub stage: SyncStage,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub records_processed: u64,
    pub pipeline_features: Option<u64>,
}

impl SyncRun {
    pub fn is_open(&self) -> bool {
        self.status == SyncStatus::Running
    }
}

/// Fields needed to open a new run
#[derive(Debug, Clone)]
pub struct NewSyncRun {
    pub profile_id: Option<String>,
    pub channel_id: String,
    pub started_at: DateTime<Utc>,
}

impl NewSyncRun {
    pub fn new(channel_id: impl Into<String>, profile_id: Option<String>) -> Self {
        Self {
            profile_id,
            channel_id: channel_id.into(),
            started_at: Utc::now(),
        }
    }

    /// Materialize the row a store persists for this request
    pub fn into_run(self, id: i64) -> SyncRun {
        SyncRun {
            id,
            profile_id: self.profile_id,
            channel_id: self.channel_id,
            status: SyncStatus::Running,
            stage: SyncStage::CollectProviderData,
            started_at: self.started_at,
            finished_at: None,
            error_code: None,
            error_message: None,
            records_processed: 0,
            pipeline_features: None,
        }
    }
}

/// Terminal values written exactly once when a run finishes
#[derive(Debug, Clone)]
pub struct SyncRunFinish {
    pub status: SyncStatus,
    pub stage: SyncStage,
    pub finished_at: DateTime<Utc>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub records_processed: u64,
    pub pipeline_features: Option<u64>,
}

impl SyncRunFinish {
    pub fn completed(records_processed: u64, pipeline_features: Option<u64>) -> Self {
        Self {
            status: SyncStatus::Completed,
            stage: SyncStage::Completed,
            finished_at: Utc::now(),
            error_code: None,
            error_message: None,
            records_processed,
            pipeline_features,
        }
    }

    pub fn failed(
        stage: SyncStage,
        error_code: impl Into<String>,
        error_message: impl Into<String>,
        records_processed: u64,
        pipeline_features: Option<u64>,
    ) -> Self {
        Self {
            status: SyncStatus::Failed,
            stage,
            finished_at: Utc::now(),
            error_code: Some(error_code.into()),
            error_message: Some(error_message.into()),
            records_processed,
            pipeline_features,
        }
    }

    /// Apply the terminal values to an in-memory run
    pub fn apply(&self, run: &mut SyncRun) {
        run.status = self.status;
        run.stage = self.stage;
        run.finished_at = Some(self.finished_at);
        run.error_code = self.error_code.clone();
        run.error_message = self.error_message.clone();
        run.records_processed = self.records_processed;
        run.pipeline_features = self.pipeline_features;
    }
}
