//! Command surface for host applications
//!
//! Every command returns a [`CommandResult`]; failures are reported in the
//! payload and never propagated to the caller.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use log::{info, warn};
use serde::Serialize;
use serde_json::Value;

use crate::config::{ApiCredentials, EngineConfig};
use crate::error::{ErrorCode, Severity, SyncError, SyncResult};
use crate::models::SyncRun;
use crate::modes::{ModeAdmission, ModeManager, ProbeReport, ProviderMode};
use crate::providers::{
    FixtureProvider, Provider, RealBackend, RealProvider, RecordingProvider, decorate,
};
use crate::storage::{SqliteWarehouse, WarehouseStore};
use crate::sync::{
    DayFactFeaturePipeline, FeaturePipeline, LogEventSink, SyncEventSink, SyncOrchestrator,
    SyncOutcome, SyncRequest, validate_channel_id, validate_recent_limit,
};
use crate::youtube::YouTubeProvider;

/// Error half of a [`CommandResult`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorPayload {
    pub code: ErrorCode,
    pub message: String,
    pub severity: Severity,
    pub retryable: bool,
    pub context: BTreeMap<String, Value>,
}

impl From<&SyncError> for ErrorPayload {
    fn from(err: &SyncError) -> Self {
        Self {
            code: err.code.clone(),
            message: err.message.clone(),
            severity: err.severity,
            retryable: err.retryable,
            context: err.context.clone(),
        }
    }
}

/// Uniform success/error outcome of a host command
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandResult<T> {
    pub ok: bool,
    pub data: Option<T>,
    pub error: Option<ErrorPayload>,
}

impl<T> CommandResult<T> {
    pub fn success(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(err: &SyncError) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(err.into()),
        }
    }

    pub fn error_code(&self) -> Option<&ErrorCode> {
        self.error.as_ref().map(|e| &e.code)
    }
}

impl<T> From<SyncResult<T>> for CommandResult<T> {
    fn from(result: SyncResult<T>) -> Self {
        match result {
            Ok(data) => Self::success(data),
            Err(err) => Self::failure(&err),
        }
    }
}

/// Mode status plus whether a sync is in flight
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatus {
    pub mode: ProviderMode,
    pub available: Vec<ProviderMode>,
    pub syncing: bool,
}

/// The engine as seen by a host
pub struct SyncService {
    orchestrator: SyncOrchestrator,
    store: Arc<dyn WarehouseStore>,
    default_recent_limit: usize,
}

impl SyncService {
    pub fn builder(config: EngineConfig) -> SyncServiceBuilder {
        SyncServiceBuilder::new(config)
    }

    pub fn modes(&self) -> &Arc<ModeManager> {
        self.orchestrator.modes()
    }

    pub fn default_recent_limit(&self) -> usize {
        self.default_recent_limit
    }

    pub async fn start_sync(
        &self,
        channel_id: &str,
        profile_id: Option<&str>,
        recent_limit: usize,
    ) -> CommandResult<SyncOutcome> {
        let mut request = SyncRequest::new(channel_id, recent_limit);
        if let Some(profile_id) = profile_id {
            request = request.with_profile(profile_id);
        }
        self.orchestrator.start_sync(request).await.into()
    }

    pub async fn resume_sync(
        &self,
        sync_run_id: i64,
        channel_id: &str,
        recent_limit: usize,
    ) -> CommandResult<SyncOutcome> {
        self.orchestrator
            .resume_sync(sync_run_id, channel_id, recent_limit)
            .await
            .into()
    }

    pub fn get_status(&self) -> CommandResult<EngineStatus> {
        let status = self.modes().get_status();
        CommandResult::success(EngineStatus {
            mode: status.mode,
            available: status.available,
            syncing: self.orchestrator.is_active(),
        })
    }

    /// Switch provider mode by name (`fake`, `real`, `record`)
    pub fn set_mode(&self, mode: &str) -> CommandResult<EngineStatus> {
        let result = mode
            .parse::<ProviderMode>()
            .map_err(SyncError::from)
            .and_then(|mode| self.modes().set_mode(mode));
        match result {
            Ok(_) => self.get_status(),
            Err(err) => CommandResult::failure(&err),
        }
    }

    /// Read-only call of every endpoint through the active provider
    pub async fn probe(
        &self,
        channel_id: &str,
        item_ids: &[String],
        recent_limit: usize,
    ) -> CommandResult<ProbeReport> {
        self.probe_checked(channel_id, item_ids, recent_limit)
            .await
            .into()
    }

    async fn probe_checked(
        &self,
        channel_id: &str,
        item_ids: &[String],
        recent_limit: usize,
    ) -> SyncResult<ProbeReport> {
        let channel_id = validate_channel_id(channel_id)?;
        validate_recent_limit(recent_limit)?;
        self.modes()
            .probe(&channel_id, item_ids, recent_limit)
            .await
    }

    /// Look up a persisted sync run
    pub async fn get_sync_run(&self, sync_run_id: i64) -> CommandResult<SyncRun> {
        if sync_run_id <= 0 {
            return CommandResult::failure(&SyncError::validation("syncRunId must be positive"));
        }
        let store = Arc::clone(&self.store);
        let result = tokio::task::spawn_blocking(move || store.get_sync_run(sync_run_id))
            .await
            .map_err(|e| SyncError::persistence(anyhow::Error::from(e)))
            .and_then(|r| r.map_err(SyncError::persistence))
            .and_then(|run| {
                run.ok_or_else(|| {
                    SyncError::new(
                        ErrorCode::SyncRunNotFound,
                        format!("Sync run {sync_run_id} does not exist"),
                    )
                    .with_context("syncRunId", sync_run_id)
                })
            });
        result.into()
    }
}

/// Wires stores, providers, and the pipeline into a [`SyncService`]
pub struct SyncServiceBuilder {
    config: EngineConfig,
    store: Option<Arc<dyn WarehouseStore>>,
    fake: Option<FixtureProvider>,
    real: Option<RealBackend>,
    credentials: Option<ApiCredentials>,
    pipeline: Option<Arc<dyn FeaturePipeline>>,
    events: Option<Arc<dyn SyncEventSink>>,
    admission: Option<Box<dyn ModeAdmission>>,
}

impl SyncServiceBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            store: None,
            fake: None,
            real: None,
            credentials: None,
            pipeline: None,
            events: None,
            admission: None,
        }
    }

    /// Use this store instead of opening the configured SQLite file
    pub fn store(mut self, store: Arc<dyn WarehouseStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Fixture served in fake mode
    pub fn fake(mut self, provider: FixtureProvider) -> Self {
        self.fake = Some(provider);
        self
    }

    /// What real and record mode forward to
    pub fn real(mut self, backend: RealBackend) -> Self {
        self.real = Some(backend);
        self
    }

    /// API key for the YouTube adapter, used when no real backend is set
    pub fn credentials(mut self, credentials: ApiCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn pipeline(mut self, pipeline: Arc<dyn FeaturePipeline>) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    pub fn events(mut self, events: Arc<dyn SyncEventSink>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn admission(mut self, admission: impl ModeAdmission + 'static) -> Self {
        self.admission = Some(Box::new(admission));
        self
    }

    pub fn build(self) -> Result<SyncService> {
        let config = self.config;

        let store: Arc<dyn WarehouseStore> = match self.store {
            Some(store) => store,
            None => Arc::new(open_warehouse(config.database_path()?)?),
        };

        let fake = match (self.fake, &config.fixture_path) {
            (Some(provider), _) => provider,
            (None, Some(path)) => FixtureProvider::load(path)?,
            (None, None) => FixtureProvider::builtin()?,
        };

        let backend = match (self.real, self.credentials) {
            (Some(backend), _) => backend,
            (None, Some(credentials)) => RealBackend::External(Arc::new(
                YouTubeProvider::with_api_key(credentials.api_key),
            )),
            (None, None) => RealBackend::Unconfigured,
        };
        let real: Arc<dyn Provider> = Arc::new(RealProvider::new(backend));
        let recorder: Arc<dyn Provider> = Arc::new(RecordingProvider::new(
            Arc::clone(&real),
            config.recording_path()?,
        ));

        let mut modes = ModeManager::new(
            decorate(Arc::new(fake), &config.cache, &config.rate_limit),
            decorate(real, &config.cache, &config.rate_limit),
            decorate(recorder, &config.cache, &config.rate_limit),
        );
        if let Some(admission) = self.admission {
            modes = modes.with_admission(move |mode: ProviderMode| admission.admits(mode));
        }

        if config.default_mode != ProviderMode::Fake {
            if let Err(err) = modes.set_mode(config.default_mode) {
                warn!("Starting in fake mode: {err}");
            }
        }
        info!("Provider mode: {}", modes.current_mode());

        let pipeline = self
            .pipeline
            .unwrap_or_else(|| Arc::new(DayFactFeaturePipeline::new(Arc::clone(&store))));
        let events = self.events.unwrap_or_else(|| Arc::new(LogEventSink));

        let orchestrator = SyncOrchestrator::new(Arc::clone(&store), Arc::new(modes), pipeline)
            .with_events(events)
            .with_retry_policy(config.retry.clone());

        Ok(SyncService {
            orchestrator,
            store,
            default_recent_limit: config.default_recent_limit,
        })
    }
}

fn open_warehouse(path: PathBuf) -> Result<SqliteWarehouse> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    SqliteWarehouse::new(&path)
}
