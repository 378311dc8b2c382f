//! Channel-sync crate - channel metrics collection and warehousing
//!
//! This crate provides the sync engine behind Tally:
//! - Domain models (channel and item snapshots, day facts, sync runs)
//! - A provider contract with cache, rate-limit, and recording decorators
//! - Fixture and YouTube Data API providers, switched by the mode manager
//! - Storage trait abstractions with in-memory and SQLite warehouses
//! - A resumable, checkpointed sync orchestrator
//! - A command facade for host applications
//!
//! This crate has no UI dependencies.

pub mod config;
pub mod error;
pub mod models;
pub mod modes;
pub mod providers;
pub mod service;
pub mod storage;
pub mod sync;
pub mod youtube;

pub use config::{ApiCredentials, EngineConfig};
pub use error::{ErrorCode, Severity, SyncError, SyncResult};
pub use models::{
    ChannelDayFact, ChannelSnapshot, Endpoint, FixtureFile, ItemDayFact, ItemSnapshot,
    RawResponseRecord, SyncRun, SyncStage, SyncStatus,
};
pub use modes::{ModeManager, ModeStatus, ProbeReport, ProviderMode};
pub use providers::{
    CacheConfig, CachedProvider, FixtureProvider, Provider, RateLimitConfig,
    RateLimitedProvider, RealBackend, RealProvider, RecordingProvider,
};
pub use service::{CommandResult, EngineStatus, ErrorPayload, SyncService, SyncServiceBuilder};
pub use storage::{InMemoryWarehouse, SqliteWarehouse, WarehouseStore, WarehouseTx};
pub use sync::{
    DayFactFeaturePipeline, FeaturePipeline, LogEventSink, RetryPolicy,
    SyncEvent, SyncEventSink, SyncOrchestrator, SyncOutcome, SyncRequest,
};
pub use youtube::{YouTubeClient, YouTubeProvider};
