//! Stage state machine for one sync attempt
//!
//! ```text
//! collect-provider-data -> persist-warehouse -> run-pipeline -> completed
//! ```
//!
//! The persisted [`SyncRun`] is checkpointed before each stage begins. Any
//! unrecoverable error finalizes the run as `failed` at the stage in
//! progress so a later resume knows where to restart.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use log::{error, info, warn};
use serde::Serialize;
use serde_json::json;

use super::delta::{channel_day_fact, item_day_fact};
use super::events::{LogEventSink, SyncEvent, SyncEventSink};
use super::pipeline::FeaturePipeline;
use super::retry::{RetryPolicy, with_retry};
use crate::error::{ErrorCode, Severity, SyncError, SyncResult};
use crate::models::{
    ChannelSnapshot, Endpoint, ItemSnapshot, NewSyncRun, RawResponseRecord, SyncRun,
    SyncRunFinish, SyncStage, SyncStatus,
};
use crate::modes::{ModeManager, ProviderMode};
use crate::providers::Provider;
use crate::storage::{WarehouseStore, in_transaction};

/// Largest `recent_limit` a sync may request
pub const MAX_RECENT_LIMIT: usize = 50;

/// Input for a fresh sync
#[derive(Debug, Clone)]
pub struct SyncRequest {
    pub channel_id: String,
    pub profile_id: Option<String>,
    pub recent_limit: usize,
}

impl SyncRequest {
    pub fn new(channel_id: impl Into<String>, recent_limit: usize) -> Self {
        Self {
            channel_id: channel_id.into(),
            profile_id: None,
            recent_limit,
        }
    }

    pub fn with_profile(mut self, profile_id: impl Into<String>) -> Self {
        self.profile_id = Some(profile_id.into());
        self
    }
}

/// Result of a sync that reached `completed`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOutcome {
    pub sync_run_id: i64,
    pub channel_id: String,
    pub mode: ProviderMode,
    pub records_processed: u64,
    pub pipeline_features: Option<u64>,
    pub duration_ms: u64,
    /// Stage the attempt started from when it was a resume
    pub resumed_from: Option<SyncStage>,
}

/// Trimmed channel id, or a validation error
pub fn validate_channel_id(channel_id: &str) -> SyncResult<String> {
    let trimmed = channel_id.trim();
    if trimmed.is_empty() {
        return Err(SyncError::validation("channelId must not be empty"));
    }
    Ok(trimmed.to_string())
}

pub fn validate_recent_limit(recent_limit: usize) -> SyncResult<()> {
    if (1..=MAX_RECENT_LIMIT).contains(&recent_limit) {
        Ok(())
    } else {
        Err(SyncError::validation(format!(
            "recentLimit must be between 1 and {MAX_RECENT_LIMIT}, got {recent_limit}"
        ))
        .with_context("recentLimit", recent_limit))
    }
}

/// What the collect stage hands to the persist stage
struct Collected {
    channel: ChannelSnapshot,
    items: Vec<ItemSnapshot>,
    raw: Vec<RawResponseRecord>,
}

/// Counters and position of the attempt in flight
struct Progress {
    /// Stage currently executing
    stage: SyncStage,
    /// Furthest stage ever checkpointed for this run
    checkpoint: SyncStage,
    records_processed: u64,
    pipeline_features: Option<u64>,
}

impl Progress {
    /// Stage recorded on the run; never behind an earlier checkpoint
    fn persisted_stage(&self) -> SyncStage {
        self.stage.max(self.checkpoint)
    }
}

/// Clears the in-process busy flag however the attempt ends
struct ActiveGuard<'a>(&'a AtomicBool);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Drives sync attempts end to end
pub struct SyncOrchestrator {
    store: Arc<dyn WarehouseStore>,
    modes: Arc<ModeManager>,
    pipeline: Arc<dyn FeaturePipeline>,
    events: Arc<dyn SyncEventSink>,
    retry: RetryPolicy,
    active: AtomicBool,
}

impl SyncOrchestrator {
    pub fn new(
        store: Arc<dyn WarehouseStore>,
        modes: Arc<ModeManager>,
        pipeline: Arc<dyn FeaturePipeline>,
    ) -> Self {
        Self {
            store,
            modes,
            pipeline,
            events: Arc::new(LogEventSink),
            retry: RetryPolicy::default(),
            active: AtomicBool::new(false),
        }
    }

    pub fn with_events(mut self, events: Arc<dyn SyncEventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn modes(&self) -> &Arc<ModeManager> {
        &self.modes
    }

    /// Whether an attempt is running in this process
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Start a fresh sync at `collect-provider-data`
    ///
    /// Fails with `SYNC_ALREADY_RUNNING` if an attempt is active in this
    /// process or any run is persisted as `running`.
    pub async fn start_sync(&self, request: SyncRequest) -> SyncResult<SyncOutcome> {
        let channel_id = validate_channel_id(&request.channel_id)?;
        validate_recent_limit(request.recent_limit)?;

        let _guard = self.claim()?;

        if let Some(open) = self.blocking(|store| store.find_open_sync_run()).await? {
            warn!("Refusing to start: sync run {} is still running", open.id);
            return Err(SyncError::already_running(Some(open.id)));
        }

        let new_run = NewSyncRun::new(channel_id, request.profile_id);
        let run = self
            .blocking(move |store| store.create_sync_run(new_run))
            .await?;
        info!("Started sync run {} for {}", run.id, run.channel_id);

        self.drive(
            run,
            SyncStage::CollectProviderData,
            request.recent_limit,
            None,
        )
        .await
    }

    /// Resume a failed or interrupted run from its checkpoint
    ///
    /// A run stopped at `run-pipeline` re-runs only the pipeline; any other
    /// stage restarts from collection.
    pub async fn resume_sync(
        &self,
        sync_run_id: i64,
        channel_id: &str,
        recent_limit: usize,
    ) -> SyncResult<SyncOutcome> {
        if sync_run_id <= 0 {
            return Err(SyncError::validation("syncRunId must be positive"));
        }
        let channel_id = validate_channel_id(channel_id)?;
        validate_recent_limit(recent_limit)?;

        let _guard = self.claim()?;

        let run = self
            .blocking(move |store| store.get_sync_run(sync_run_id))
            .await?
            .ok_or_else(|| {
                SyncError::new(
                    ErrorCode::SyncRunNotFound,
                    format!("Sync run {sync_run_id} does not exist"),
                )
                .with_context("syncRunId", sync_run_id)
            })?;

        if run.status == SyncStatus::Completed {
            return Err(SyncError::new(
                ErrorCode::SyncAlreadyCompleted,
                format!("Sync run {sync_run_id} already completed"),
            )
            .with_severity(Severity::Warning)
            .with_context("syncRunId", sync_run_id));
        }

        if run.channel_id != channel_id {
            return Err(SyncError::validation(format!(
                "Sync run {} belongs to channel {}, not {}",
                run.id, run.channel_id, channel_id
            ))
            .with_context("syncRunId", sync_run_id));
        }

        match self.blocking(|store| store.find_open_sync_run()).await? {
            Some(open) if open.id != run.id => {
                return Err(SyncError::already_running(Some(open.id)));
            }
            _ => {}
        }

        let resume_from = run.stage.resume_point();
        let run = self
            .blocking(move |store| store.reopen_sync_run(sync_run_id))
            .await?;
        info!(
            "Resuming sync run {} (checkpoint {}) from {}",
            run.id, run.stage, resume_from
        );

        self.drive(run, resume_from, recent_limit, Some(resume_from))
            .await
    }

    fn claim(&self) -> SyncResult<ActiveGuard<'_>> {
        self.active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| SyncError::already_running(None))?;
        Ok(ActiveGuard(&self.active))
    }

    /// Run a storage call on the blocking pool
    async fn blocking<T, F>(&self, f: F) -> SyncResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn WarehouseStore) -> anyhow::Result<T> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || f(store.as_ref()))
            .await
            .map_err(|e| SyncError::persistence(anyhow::Error::from(e)))?
            .map_err(SyncError::persistence)
    }

    async fn drive(
        &self,
        run: SyncRun,
        from: SyncStage,
        recent_limit: usize,
        resumed_from: Option<SyncStage>,
    ) -> SyncResult<SyncOutcome> {
        let started = Instant::now();
        let (mode, provider) = self.modes.active_provider();

        let mut progress = Progress {
            stage: from,
            checkpoint: run.stage,
            records_processed: if from == SyncStage::RunPipeline {
                run.records_processed
            } else {
                0
            },
            pipeline_features: None,
        };

        let result = match self
            .execute(&run, from, mode, provider.as_ref(), recent_limit, &mut progress)
            .await
        {
            Ok(()) => {
                let duration = started.elapsed();
                self.complete(&run, &progress, duration)
                    .await
                    .map(|()| duration)
            }
            Err(err) => Err(err),
        };

        match result {
            Ok(duration) => {
                Ok(SyncOutcome {
                    sync_run_id: run.id,
                    channel_id: run.channel_id,
                    mode,
                    records_processed: progress.records_processed,
                    pipeline_features: progress.pipeline_features,
                    duration_ms: duration_ms(duration),
                    resumed_from,
                })
            }
            Err(err) => Err(self.fail(&run, &progress, err).await),
        }
    }

    async fn execute(
        &self,
        run: &SyncRun,
        from: SyncStage,
        mode: ProviderMode,
        provider: &dyn Provider,
        recent_limit: usize,
        progress: &mut Progress,
    ) -> SyncResult<()> {
        if from < SyncStage::RunPipeline {
            self.enter_stage(run, SyncStage::CollectProviderData, progress)
                .await?;
            let collected = self
                .collect(run, mode, provider, recent_limit)
                .await?;

            self.enter_stage(run, SyncStage::PersistWarehouse, progress)
                .await?;
            progress.records_processed = self.persist(run, collected).await?;
        }

        self.enter_stage(run, SyncStage::RunPipeline, progress)
            .await?;
        let features = self
            .pipeline
            .generate_features(&run.channel_id, run.id)
            .await
            .map_err(|e| {
                SyncError::new(ErrorCode::Pipeline, format!("Feature pipeline failed: {e:#}"))
                    .with_cause(e)
            })?;
        progress.pipeline_features = Some(features);

        Ok(())
    }

    /// Checkpoint the run and announce the stage
    async fn enter_stage(
        &self,
        run: &SyncRun,
        stage: SyncStage,
        progress: &mut Progress,
    ) -> SyncResult<()> {
        progress.stage = stage;
        let persisted = progress.persisted_stage();
        let records = progress.records_processed;
        let id = run.id;

        self.blocking(move |store| store.checkpoint_sync_run(id, persisted, records))
            .await?;
        progress.checkpoint = persisted;

        info!("Sync run {id}: {stage}");
        self.events.emit(SyncEvent::Progress {
            sync_run_id: id,
            stage,
            percent: stage.percent(),
            message: stage_message(stage).to_string(),
        });
        Ok(())
    }

    /// Call one provider endpoint, retrying transient failures
    async fn call_with_retry<T, F, Fut>(
        &self,
        sync_run_id: i64,
        endpoint: Endpoint,
        operation: F,
    ) -> SyncResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = SyncResult<T>>,
    {
        let events = &self.events;
        let on_retry = |err: &SyncError, retry: u32, delay: Duration| {
            events.emit(SyncEvent::Progress {
                sync_run_id,
                stage: SyncStage::CollectProviderData,
                percent: SyncStage::CollectProviderData.percent(),
                message: format!(
                    "{endpoint} failed with {}; retry {retry} in {}ms",
                    err.code,
                    delay.as_millis()
                ),
            });
        };

        with_retry(&self.retry, endpoint.as_str(), on_retry, operation)
            .await
            .map_err(|err| err.with_context("endpoint", endpoint.as_str()))
    }

    /// Channel, then recent items, then stats for those items
    async fn collect(
        &self,
        run: &SyncRun,
        mode: ProviderMode,
        provider: &dyn Provider,
        recent_limit: usize,
    ) -> SyncResult<Collected> {
        let channel_id = run.channel_id.as_str();
        let fetched_at = Utc::now();
        let mut raw = Vec::with_capacity(3);
        let mut audit = |endpoint: Endpoint, request_params: serde_json::Value, body| {
            raw.push(RawResponseRecord {
                sync_run_id: run.id,
                source: mode.as_str().to_string(),
                endpoint,
                request_params,
                response_body: body,
                fetched_at,
            });
        };

        let channel = self
            .call_with_retry(run.id, Endpoint::ChannelStats, move || {
                provider.get_channel_stats(channel_id)
            })
            .await?;
        audit(
            Endpoint::ChannelStats,
            json!({ "channelId": channel_id }),
            to_json(&channel),
        );

        let recent = self
            .call_with_retry(run.id, Endpoint::RecentItems, move || {
                provider.get_recent_items(channel_id, recent_limit)
            })
            .await?;
        audit(
            Endpoint::RecentItems,
            json!({ "channelId": channel_id, "limit": recent_limit }),
            to_json(&recent),
        );

        let item_ids: Vec<String> = recent.iter().map(|item| item.id.clone()).collect();
        let items = if item_ids.is_empty() {
            Vec::new()
        } else {
            let ids = item_ids.as_slice();
            let items = self
                .call_with_retry(run.id, Endpoint::ItemStats, move || {
                    provider.get_item_stats(ids)
                })
                .await?;
            audit(
                Endpoint::ItemStats,
                json!({ "itemIds": item_ids }),
                to_json(&items),
            );
            items
        };

        Ok(Collected {
            channel,
            items,
            raw,
        })
    }

    /// Write dimensions, day facts, and the audit log in one transaction
    ///
    /// Returns the number of records processed (channel plus items).
    async fn persist(&self, run: &SyncRun, collected: Collected) -> SyncResult<u64> {
        if collected.channel.id != run.channel_id {
            return Err(SyncError::new(
                ErrorCode::ContractMismatch,
                format!(
                    "Provider returned channel {} for requested channel {}",
                    collected.channel.id, run.channel_id
                ),
            )
            .with_context("requestedChannelId", run.channel_id.as_str())
            .with_context("returnedChannelId", collected.channel.id.as_str()));
        }

        let today = Utc::now().date_naive();
        let fetched_at = Utc::now();

        self.blocking(move |store| {
            let Collected {
                channel,
                items,
                raw,
            } = collected;

            in_transaction(store, |tx| {
                let previous = tx.channel(&channel.id)?;
                tx.add_channel_day_fact(&channel_day_fact(&channel, previous.as_ref(), today))?;
                tx.upsert_channel(&channel, fetched_at)?;

                for item in &items {
                    let previous = tx.item(&item.id)?;
                    tx.add_item_day_fact(&item_day_fact(item, previous.as_ref(), today))?;
                    tx.upsert_item(item, fetched_at)?;
                }

                for record in &raw {
                    tx.append_raw_response(record)?;
                }

                Ok(1 + items.len() as u64)
            })
        })
        .await
    }

    async fn complete(
        &self,
        run: &SyncRun,
        progress: &Progress,
        duration: Duration,
    ) -> SyncResult<()> {
        let finish = SyncRunFinish::completed(progress.records_processed, progress.pipeline_features);
        let id = run.id;
        self.blocking(move |store| store.finish_sync_run(id, &finish))
            .await?;

        info!(
            "Sync run {} completed: {} records, {:?} features in {}ms",
            id,
            progress.records_processed,
            progress.pipeline_features,
            duration_ms(duration)
        );
        self.events.emit(SyncEvent::Progress {
            sync_run_id: id,
            stage: SyncStage::Completed,
            percent: SyncStage::Completed.percent(),
            message: stage_message(SyncStage::Completed).to_string(),
        });
        self.events.emit(SyncEvent::Complete {
            sync_run_id: id,
            duration_ms: duration_ms(duration),
            records_processed: progress.records_processed,
        });
        Ok(())
    }

    /// Finalize the run as failed and decorate the error with diagnostics
    async fn fail(&self, run: &SyncRun, progress: &Progress, err: SyncError) -> SyncError {
        let stage = progress.persisted_stage();
        let finish = SyncRunFinish::failed(
            stage,
            err.code.as_str(),
            err.message.as_str(),
            progress.records_processed,
            progress.pipeline_features,
        );
        let id = run.id;

        if let Err(finish_err) = self
            .blocking(move |store| store.finish_sync_run(id, &finish))
            .await
        {
            error!("Failed to record failure of sync run {id}: {finish_err}");
        }

        error!("Sync run {id} failed at {stage}: {err}");
        self.events.emit(SyncEvent::Error {
            sync_run_id: id,
            code: err.code.clone(),
            message: err.message.clone(),
            retryable: err.retryable,
        });

        err.with_context("syncRunId", id)
            .with_context("stage", stage.as_str())
            .with_context("recordsProcessed", progress.records_processed)
            .with_context("pipelineFeatures", progress.pipeline_features)
    }
}

fn stage_message(stage: SyncStage) -> &'static str {
    match stage {
        SyncStage::CollectProviderData => "Collecting provider data",
        SyncStage::PersistWarehouse => "Persisting warehouse facts",
        SyncStage::RunPipeline => "Running feature pipeline",
        SyncStage::Completed => "Sync completed",
    }
}

fn to_json<T: Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::testing::ScriptedProvider;
    use crate::storage::InMemoryWarehouse;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;
    use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};

    /// Pipeline that can be told to fail or to wait for a signal
    #[derive(Default)]
    struct TestPipeline {
        fail: AtomicBool,
        calls: AtomicUsize,
        gate: Option<Arc<Notify>>,
    }

    #[async_trait]
    impl FeaturePipeline for TestPipeline {
        async fn generate_features(&self, _channel_id: &str, _sync_run_id: i64) -> anyhow::Result<u64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self.fail.load(Ordering::SeqCst) {
                anyhow::bail!("feature store offline");
            }
            Ok(7)
        }
    }

    /// Answers for a different channel than the one requested
    struct MisroutedProvider(Arc<ScriptedProvider>);

    #[async_trait]
    impl Provider for MisroutedProvider {
        fn name(&self) -> &str {
            "misrouted"
        }

        async fn get_channel_stats(&self, channel_id: &str) -> SyncResult<ChannelSnapshot> {
            let mut channel = self.0.get_channel_stats(channel_id).await?;
            channel.id = "UC-other".to_string();
            Ok(channel)
        }

        async fn get_item_stats(&self, item_ids: &[String]) -> SyncResult<Vec<ItemSnapshot>> {
            self.0.get_item_stats(item_ids).await
        }

        async fn get_recent_items(
            &self,
            channel_id: &str,
            limit: usize,
        ) -> SyncResult<Vec<ItemSnapshot>> {
            self.0.get_recent_items(channel_id, limit).await
        }
    }

    struct Harness {
        store: Arc<InMemoryWarehouse>,
        provider: Arc<ScriptedProvider>,
        pipeline: Arc<TestPipeline>,
        orchestrator: SyncOrchestrator,
        events: UnboundedReceiver<SyncEvent>,
    }

    fn scripted() -> Arc<ScriptedProvider> {
        let now = Utc::now();
        Arc::new(ScriptedProvider::new(
            ChannelSnapshot::new("UC-1", "Channel One")
                .with_views(1000)
                .with_subscribers(Some(40)),
            vec![
                ItemSnapshot::new("v2", "UC-1", "Second", now).with_views(20),
                ItemSnapshot::new("v1", "UC-1", "First", now - chrono::Duration::days(3))
                    .with_views(10),
            ],
        ))
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_delay_ms: 1,
            backoff_multiplier: 2.0,
            max_delay_ms: 2,
        }
    }

    fn build(
        provider: Arc<dyn Provider>,
        scripted: Arc<ScriptedProvider>,
        pipeline: TestPipeline,
    ) -> Harness {
        let store = Arc::new(InMemoryWarehouse::new());
        let pipeline = Arc::new(pipeline);
        let modes = Arc::new(ModeManager::new(
            Arc::clone(&provider),
            Arc::clone(&provider),
            provider,
        ));
        let (tx, events) = unbounded_channel::<SyncEvent>();
        let orchestrator = SyncOrchestrator::new(store.clone(), modes, pipeline.clone())
            .with_events(Arc::new(tx))
            .with_retry_policy(fast_retry());

        Harness {
            store,
            provider: scripted,
            pipeline,
            orchestrator,
            events,
        }
    }

    fn harness_with(pipeline: TestPipeline) -> Harness {
        let provider = scripted();
        build(provider.clone(), provider, pipeline)
    }

    fn harness() -> Harness {
        harness_with(TestPipeline::default())
    }

    fn drain(events: &mut UnboundedReceiver<SyncEvent>) -> Vec<SyncEvent> {
        let mut out = Vec::new();
        while let Ok(event) = events.try_recv() {
            out.push(event);
        }
        out
    }

    fn run_id(err: &SyncError) -> i64 {
        err.context["syncRunId"].as_i64().unwrap()
    }

    fn today() -> chrono::NaiveDate {
        Utc::now().date_naive()
    }

    #[tokio::test]
    async fn test_same_day_views_accumulate_from_first_baseline() {
        let h = harness();

        let first = h
            .orchestrator
            .start_sync(SyncRequest::new("UC-1", 10))
            .await
            .unwrap();
        assert_eq!(first.records_processed, 3);
        assert_eq!(first.pipeline_features, Some(7));
        let fact = h.store.channel_day_fact("UC-1", today()).unwrap().unwrap();
        assert_eq!(fact.views, 0);

        h.provider.update(|channel, items| {
            channel.view_count = 1150;
            items[1].view_count = 15;
        });
        h.orchestrator
            .start_sync(SyncRequest::new("UC-1", 10))
            .await
            .unwrap();
        let fact = h.store.channel_day_fact("UC-1", today()).unwrap().unwrap();
        assert_eq!(fact.views, 150);

        h.provider.update(|channel, _| channel.view_count = 1190);
        h.orchestrator
            .start_sync(SyncRequest::new("UC-1", 10))
            .await
            .unwrap();
        let fact = h.store.channel_day_fact("UC-1", today()).unwrap().unwrap();
        assert_eq!(fact.views, 190);

        let item = h.store.item_day_fact("v1", today()).unwrap().unwrap();
        assert_eq!(item.views, 5);
        assert_eq!(h.store.get_channel("UC-1").unwrap().unwrap().view_count, 1190);
    }

    #[tokio::test]
    async fn test_decreasing_counter_clamps_to_zero() {
        let h = harness();
        h.orchestrator
            .start_sync(SyncRequest::new("UC-1", 10))
            .await
            .unwrap();

        h.provider.update(|channel, _| channel.view_count = 900);
        h.orchestrator
            .start_sync(SyncRequest::new("UC-1", 10))
            .await
            .unwrap();

        let fact = h.store.channel_day_fact("UC-1", today()).unwrap().unwrap();
        assert_eq!(fact.views, 0);
        assert_eq!(h.store.get_channel("UC-1").unwrap().unwrap().view_count, 900);
    }

    #[tokio::test]
    async fn test_completed_run_and_events() {
        let mut h = harness();

        let outcome = h
            .orchestrator
            .start_sync(SyncRequest::new(" UC-1 ", 10).with_profile("default"))
            .await
            .unwrap();

        let run = h.store.get_sync_run(outcome.sync_run_id).unwrap().unwrap();
        assert_eq!(run.status, SyncStatus::Completed);
        assert_eq!(run.stage, SyncStage::Completed);
        assert_eq!(run.channel_id, "UC-1");
        assert_eq!(run.profile_id.as_deref(), Some("default"));
        assert_eq!(run.pipeline_features, Some(7));
        assert!(run.error_code.is_none());
        assert!(run.finished_at.is_some());
        assert!(!h.orchestrator.is_active());

        let events = drain(&mut h.events);
        let stages: Vec<SyncStage> = events
            .iter()
            .filter_map(|event| match event {
                SyncEvent::Progress { stage, .. } => Some(*stage),
                _ => None,
            })
            .collect();
        assert_eq!(
            stages,
            vec![
                SyncStage::CollectProviderData,
                SyncStage::PersistWarehouse,
                SyncStage::RunPipeline,
                SyncStage::Completed,
            ]
        );
        assert!(matches!(
            events.last(),
            Some(SyncEvent::Complete {
                records_processed: 3,
                ..
            })
        ));

        let raw = h.store.list_raw_responses(outcome.sync_run_id).unwrap();
        let endpoints: Vec<Endpoint> = raw.iter().map(|r| r.endpoint).collect();
        assert_eq!(
            endpoints,
            vec![
                Endpoint::ChannelStats,
                Endpoint::RecentItems,
                Endpoint::ItemStats
            ]
        );
        assert!(raw.iter().all(|r| r.source == "fake"));
        assert_eq!(raw[1].request_params["limit"], 10);
    }

    #[tokio::test]
    async fn test_refuses_start_while_a_run_is_persisted_open() {
        let h = harness();
        let open = h
            .store
            .create_sync_run(NewSyncRun::new("UC-1", None))
            .unwrap();

        let err = h
            .orchestrator
            .start_sync(SyncRequest::new("UC-1", 5))
            .await
            .unwrap_err();

        assert_eq!(err.code, ErrorCode::SyncAlreadyRunning);
        assert_eq!(err.context["openSyncRunId"], open.id);
        assert_eq!(h.provider.calls(Endpoint::ChannelStats), 0);
        assert!(h.store.get_sync_run(open.id + 1).unwrap().is_none());
        assert!(!h.orchestrator.is_active());
    }

    #[tokio::test]
    async fn test_refuses_second_start_in_process() {
        let gate = Arc::new(Notify::new());
        let h = harness_with(TestPipeline {
            gate: Some(Arc::clone(&gate)),
            ..TestPipeline::default()
        });

        let (first, second) = tokio::join!(
            h.orchestrator.start_sync(SyncRequest::new("UC-1", 5)),
            async {
                while !h.orchestrator.is_active() {
                    tokio::task::yield_now().await;
                }
                let result = h.orchestrator.start_sync(SyncRequest::new("UC-1", 5)).await;
                gate.notify_one();
                result
            }
        );

        assert!(first.is_ok());
        assert_eq!(second.unwrap_err().code, ErrorCode::SyncAlreadyRunning);
        assert_eq!(h.pipeline.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_resume_of_completed_run_is_rejected() {
        let h = harness();
        let outcome = h
            .orchestrator
            .start_sync(SyncRequest::new("UC-1", 5))
            .await
            .unwrap();
        let calls = h.provider.calls(Endpoint::ChannelStats);

        let err = h
            .orchestrator
            .resume_sync(outcome.sync_run_id, "UC-1", 5)
            .await
            .unwrap_err();

        assert_eq!(err.code, ErrorCode::SyncAlreadyCompleted);
        assert_eq!(h.provider.calls(Endpoint::ChannelStats), calls);
        assert_eq!(h.pipeline.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_resume_unknown_run() {
        let h = harness();
        let err = h.orchestrator.resume_sync(42, "UC-1", 5).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::SyncRunNotFound);
    }

    #[tokio::test]
    async fn test_pipeline_failure_then_resume_skips_collection() {
        let h = harness_with(TestPipeline {
            fail: AtomicBool::new(true),
            ..TestPipeline::default()
        });

        let err = h
            .orchestrator
            .start_sync(SyncRequest::new("UC-1", 10))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Pipeline);
        assert_eq!(err.context["stage"], "run-pipeline");
        assert_eq!(err.context["recordsProcessed"], 3);

        let id = run_id(&err);
        let failed = h.store.get_sync_run(id).unwrap().unwrap();
        assert_eq!(failed.status, SyncStatus::Failed);
        assert_eq!(failed.stage, SyncStage::RunPipeline);
        assert_eq!(failed.error_code.as_deref(), Some("PIPELINE_FAILED"));
        assert_eq!(failed.records_processed, 3);

        let collect_calls = h.provider.calls(Endpoint::ChannelStats);
        h.pipeline.fail.store(false, Ordering::SeqCst);

        let outcome = h.orchestrator.resume_sync(id, "UC-1", 10).await.unwrap();
        assert_eq!(outcome.resumed_from, Some(SyncStage::RunPipeline));
        assert_eq!(outcome.records_processed, 3);
        assert_eq!(outcome.pipeline_features, Some(7));
        assert_eq!(h.provider.calls(Endpoint::ChannelStats), collect_calls);

        let run = h.store.get_sync_run(id).unwrap().unwrap();
        assert_eq!(run.status, SyncStatus::Completed);
        assert_eq!(run.pipeline_features, Some(7));
        assert!(run.error_code.is_none());
        assert_eq!(h.store.list_raw_responses(id).unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let mut h = harness();
        for _ in 0..2 {
            h.provider.fail_next(
                Endpoint::ChannelStats,
                SyncError::provider(ErrorCode::ProviderTimeout, "slow upstream"),
            );
        }

        h.orchestrator
            .start_sync(SyncRequest::new("UC-1", 5))
            .await
            .unwrap();

        assert_eq!(h.provider.calls(Endpoint::ChannelStats), 3);
        let retries = drain(&mut h.events)
            .into_iter()
            .filter(|event| {
                matches!(event, SyncEvent::Progress { message, .. } if message.contains("retry"))
            })
            .count();
        assert_eq!(retries, 2);
    }

    #[tokio::test]
    async fn test_exhausted_retries_fail_the_run_at_collect() {
        let mut h = harness();
        for _ in 0..3 {
            h.provider.fail_next(
                Endpoint::RecentItems,
                SyncError::provider(ErrorCode::ProviderUnavailable, "maintenance"),
            );
        }

        let err = h
            .orchestrator
            .start_sync(SyncRequest::new("UC-1", 5))
            .await
            .unwrap_err();

        assert_eq!(err.code, ErrorCode::RetriesExhausted);
        assert_eq!(err.context["endpoint"], "getRecentItems");
        assert_eq!(h.provider.calls(Endpoint::RecentItems), 3);
        assert_eq!(h.provider.calls(Endpoint::ItemStats), 0);

        let run = h.store.get_sync_run(run_id(&err)).unwrap().unwrap();
        assert_eq!(run.status, SyncStatus::Failed);
        assert_eq!(run.stage, SyncStage::CollectProviderData);
        assert_eq!(run.error_code.as_deref(), Some("RETRIES_EXHAUSTED"));

        let events = drain(&mut h.events);
        assert!(matches!(
            events.last(),
            Some(SyncEvent::Error { code: ErrorCode::RetriesExhausted, .. })
        ));
        assert!(h.store.get_channel("UC-1").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried_and_run_resumes() {
        let h = harness();
        h.provider
            .fail_next(Endpoint::ChannelStats, SyncError::not_found("channel hidden"));

        let err = h
            .orchestrator
            .start_sync(SyncRequest::new("UC-1", 5))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::DataNotFound);
        assert_eq!(h.provider.calls(Endpoint::ChannelStats), 1);

        let outcome = h
            .orchestrator
            .resume_sync(run_id(&err), "UC-1", 5)
            .await
            .unwrap();
        assert_eq!(outcome.resumed_from, Some(SyncStage::CollectProviderData));
        let run = h.store.get_sync_run(outcome.sync_run_id).unwrap().unwrap();
        assert_eq!(run.status, SyncStatus::Completed);
    }

    #[tokio::test]
    async fn test_resume_from_persist_checkpoint_recollects_and_keeps_first_audit_row() {
        let h = harness();
        let run = h
            .store
            .create_sync_run(NewSyncRun::new("UC-1", None))
            .unwrap();
        let earlier = RawResponseRecord {
            sync_run_id: run.id,
            source: "fake".to_string(),
            endpoint: Endpoint::ChannelStats,
            request_params: json!({ "channelId": "UC-1" }),
            response_body: json!({ "attempt": "earlier" }),
            fetched_at: Utc::now(),
        };
        in_transaction(h.store.as_ref(), |tx| tx.append_raw_response(&earlier)).unwrap();
        h.store
            .checkpoint_sync_run(run.id, SyncStage::PersistWarehouse, 0)
            .unwrap();
        h.store
            .finish_sync_run(
                run.id,
                &SyncRunFinish::failed(
                    SyncStage::PersistWarehouse,
                    "PERSISTENCE_ERROR",
                    "disk full",
                    0,
                    None,
                ),
            )
            .unwrap();

        h.provider
            .fail_next(Endpoint::ChannelStats, SyncError::not_found("channel hidden"));
        let err = h
            .orchestrator
            .resume_sync(run.id, "UC-1", 10)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::DataNotFound);
        let failed = h.store.get_sync_run(run.id).unwrap().unwrap();
        assert_eq!(failed.status, SyncStatus::Failed);
        assert_eq!(failed.stage, SyncStage::PersistWarehouse);

        let outcome = h
            .orchestrator
            .resume_sync(run.id, "UC-1", 10)
            .await
            .unwrap();
        assert_eq!(outcome.resumed_from, Some(SyncStage::CollectProviderData));
        assert_eq!(outcome.records_processed, 3);
        assert_eq!(h.provider.calls(Endpoint::ChannelStats), 2);

        let run = h.store.get_sync_run(run.id).unwrap().unwrap();
        assert_eq!(run.status, SyncStatus::Completed);
        assert_eq!(run.stage, SyncStage::Completed);

        let raw = h.store.list_raw_responses(run.id).unwrap();
        assert_eq!(raw.len(), 3);
        assert_eq!(raw[0].endpoint, Endpoint::ChannelStats);
        assert_eq!(raw[0].response_body["attempt"], "earlier");
        assert!(h.store.get_channel("UC-1").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_contract_mismatch_is_fatal() {
        let inner = scripted();
        let provider: Arc<dyn Provider> = Arc::new(MisroutedProvider(Arc::clone(&inner)));
        let h = build(provider, Arc::clone(&inner), TestPipeline::default());

        let err = h
            .orchestrator
            .start_sync(SyncRequest::new("UC-1", 5))
            .await
            .unwrap_err();

        assert_eq!(err.code, ErrorCode::ContractMismatch);
        assert!(!err.retryable);
        assert_eq!(inner.calls(Endpoint::ChannelStats), 1);

        let run = h.store.get_sync_run(run_id(&err)).unwrap().unwrap();
        assert_eq!(run.stage, SyncStage::PersistWarehouse);
        assert!(h.store.get_channel("UC-1").unwrap().is_none());
        assert!(h.store.get_channel("UC-other").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_validation_happens_before_any_state_change() {
        let h = harness();

        for request in [
            SyncRequest::new("   ", 5),
            SyncRequest::new("UC-1", 0),
            SyncRequest::new("UC-1", MAX_RECENT_LIMIT + 1),
        ] {
            let err = h.orchestrator.start_sync(request).await.unwrap_err();
            assert_eq!(err.code, ErrorCode::Validation);
        }
        let err = h.orchestrator.resume_sync(0, "UC-1", 5).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::Validation);

        assert!(h.store.get_sync_run(1).unwrap().is_none());
        assert_eq!(h.provider.calls(Endpoint::ChannelStats), 0);
    }
}
