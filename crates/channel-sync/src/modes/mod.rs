//! Provider mode selection
//!
//! The [`ModeManager`] owns one provider chain per mode, tracks which mode
//! is active, and refuses to activate a mode whose prerequisites are unmet.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, RwLock};

use log::info;
use serde::{Deserialize, Serialize};

use crate::error::{ErrorCode, Severity, SyncError, SyncResult};
use crate::providers::Provider;

/// Which provider chain is active
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderMode {
    /// Deterministic fixture data
    Fake,
    /// The configured external source
    Real,
    /// The external source, with every response recorded to a fixture
    Record,
}

impl ProviderMode {
    pub const ALL: [ProviderMode; 3] = [Self::Fake, Self::Real, Self::Record];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fake => "fake",
            Self::Real => "real",
            Self::Record => "record",
        }
    }
}

impl fmt::Display for ProviderMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for a mode name that isn't one of `fake`, `real`, `record`
#[derive(Debug, thiserror::Error)]
#[error("Unknown provider mode: {0} (expected fake, real, or record)")]
pub struct UnknownModeError(pub String);

impl FromStr for ProviderMode {
    type Err = UnknownModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fake" => Ok(Self::Fake),
            "real" => Ok(Self::Real),
            "record" => Ok(Self::Record),
            _ => Err(UnknownModeError(s.to_string())),
        }
    }
}

impl From<UnknownModeError> for SyncError {
    fn from(err: UnknownModeError) -> Self {
        SyncError::validation(err.to_string())
    }
}

/// Extra gate on mode activation, e.g. "requires connected credentials"
pub trait ModeAdmission: Send + Sync {
    fn admits(&self, mode: ProviderMode) -> bool;
}

impl<F> ModeAdmission for F
where
    F: Fn(ProviderMode) -> bool + Send + Sync,
{
    fn admits(&self, mode: ProviderMode) -> bool {
        self(mode)
    }
}

/// Current mode and the modes that could be activated right now
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModeStatus {
    pub mode: ProviderMode,
    pub available: Vec<ProviderMode>,
}

/// Outcome of a read-only probe against the active provider
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeReport {
    pub mode: ProviderMode,
    pub provider: String,
    pub channel_id: String,
    pub channel_name: String,
    pub recent_items_count: usize,
    pub item_stats_count: usize,
    pub item_ids: Vec<String>,
    /// Where record mode wrote its fixture
    pub recording_path: Option<PathBuf>,
}

pub struct ModeManager {
    fake: Arc<dyn Provider>,
    real: Arc<dyn Provider>,
    record: Arc<dyn Provider>,
    current: RwLock<ProviderMode>,
    admission: Option<Arc<dyn ModeAdmission>>,
}

impl ModeManager {
    /// Start in fake mode, which is always available
    pub fn new(fake: Arc<dyn Provider>, real: Arc<dyn Provider>, record: Arc<dyn Provider>) -> Self {
        Self {
            fake,
            real,
            record,
            current: RwLock::new(ProviderMode::Fake),
            admission: None,
        }
    }

    pub fn with_admission(mut self, admission: impl ModeAdmission + 'static) -> Self {
        self.admission = Some(Arc::new(admission));
        self
    }

    pub fn provider_for(&self, mode: ProviderMode) -> Arc<dyn Provider> {
        match mode {
            ProviderMode::Fake => Arc::clone(&self.fake),
            ProviderMode::Real => Arc::clone(&self.real),
            ProviderMode::Record => Arc::clone(&self.record),
        }
    }

    pub fn current_mode(&self) -> ProviderMode {
        *self
            .current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The active mode together with its provider chain
    pub fn active_provider(&self) -> (ProviderMode, Arc<dyn Provider>) {
        let mode = self.current_mode();
        (mode, self.provider_for(mode))
    }

    /// Whether `mode` could be activated right now
    pub fn is_available(&self, mode: ProviderMode) -> bool {
        self.provider_for(mode).is_configured()
            && self
                .admission
                .as_ref()
                .is_none_or(|admission| admission.admits(mode))
    }

    pub fn get_status(&self) -> ModeStatus {
        ModeStatus {
            mode: self.current_mode(),
            available: ProviderMode::ALL
                .into_iter()
                .filter(|mode| self.is_available(*mode))
                .collect(),
        }
    }

    /// Switch to `mode`, or fail with `MODE_UNAVAILABLE`
    pub fn set_mode(&self, mode: ProviderMode) -> SyncResult<ModeStatus> {
        if !self.is_available(mode) {
            return Err(SyncError::new(
                ErrorCode::ModeUnavailable,
                format!("Mode '{mode}' is not available"),
            )
            .with_severity(Severity::Warning)
            .with_context("mode", mode.as_str()));
        }

        {
            let mut current = self
                .current
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if *current != mode {
                info!("Provider mode: {} -> {}", *current, mode);
            }
            *current = mode;
        }

        Ok(self.get_status())
    }

    /// Call every endpoint through the active provider without persisting
    ///
    /// When `item_ids` is empty, the ids of the recent items are probed.
    pub async fn probe(
        &self,
        channel_id: &str,
        item_ids: &[String],
        recent_limit: usize,
    ) -> SyncResult<ProbeReport> {
        let (mode, provider) = self.active_provider();

        let channel = provider.get_channel_stats(channel_id).await?;
        let recent = provider.get_recent_items(channel_id, recent_limit).await?;
        let item_ids: Vec<String> = if item_ids.is_empty() {
            recent.iter().map(|item| item.id.clone()).collect()
        } else {
            item_ids.to_vec()
        };
        let stats = if item_ids.is_empty() {
            Vec::new()
        } else {
            provider.get_item_stats(&item_ids).await?
        };

        Ok(ProbeReport {
            mode,
            provider: provider.name().to_string(),
            channel_id: channel.id,
            channel_name: channel.name,
            recent_items_count: recent.len(),
            item_stats_count: stats.len(),
            item_ids,
            recording_path: match mode {
                ProviderMode::Record => provider.recording_path(),
                _ => None,
            },
        })
    }
}
