//! Storage trait definitions

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};

use crate::models::{
    ChannelDayFact, ChannelSnapshot, ItemDayFact, ItemSnapshot, NewSyncRun, RawResponseRecord,
    SyncRun, SyncRunFinish, SyncStage,
};

/// Operations available inside a single warehouse transaction
///
/// Everything a stage writes goes through one `WarehouseTx` so the stage
/// either fully commits or fully rolls back.
pub trait WarehouseTx {
    /// Latest absolute channel values (dimension row)
    fn channel(&self, channel_id: &str) -> Result<Option<ChannelSnapshot>>;

    /// Latest absolute item values (dimension row)
    fn item(&self, item_id: &str) -> Result<Option<ItemSnapshot>>;

    /// Replace the channel dimension row with new absolute values
    fn upsert_channel(&mut self, channel: &ChannelSnapshot, fetched_at: DateTime<Utc>)
    -> Result<()>;

    /// Replace the item dimension row with new absolute values
    fn upsert_item(&mut self, item: &ItemSnapshot, fetched_at: DateTime<Utc>) -> Result<()>;

    /// Add deltas into the channel-day row, creating it if needed
    fn add_channel_day_fact(&mut self, fact: &ChannelDayFact) -> Result<()>;

    /// Add deltas into the item-day row, creating it if needed
    fn add_item_day_fact(&mut self, fact: &ItemDayFact) -> Result<()>;

    /// Append an audit row
    ///
    /// Returns `false` when a row for the same (sync run, endpoint) already
    /// exists; the existing row is left untouched.
    fn append_raw_response(&mut self, record: &RawResponseRecord) -> Result<bool>;
}

/// Trait for warehouse storage operations
///
/// This trait abstracts over the in-memory and SQLite backends and provides
/// the contract the orchestrator needs: dimension reads and upserts, additive
/// day facts, the raw-response audit log, and sync run bookkeeping.
pub trait WarehouseStore: Send + Sync {
    /// Run `body` inside one transaction; commit on `Ok`, roll back on `Err`
    fn with_transaction(
        &self,
        body: &mut dyn FnMut(&mut dyn WarehouseTx) -> Result<()>,
    ) -> Result<()>;

    // === Sync runs ===

    /// Create a new `running` run at the first stage
    ///
    /// Fails if another run is already open.
    fn create_sync_run(&self, run: NewSyncRun) -> Result<SyncRun>;

    fn get_sync_run(&self, id: i64) -> Result<Option<SyncRun>>;

    /// The single open (`running`) run, if any
    fn find_open_sync_run(&self) -> Result<Option<SyncRun>>;

    /// Persist the stage about to begin along with counters so far
    fn checkpoint_sync_run(&self, id: i64, stage: SyncStage, records_processed: u64)
    -> Result<()>;

    /// Re-open a failed or interrupted run for resumption, clearing its error
    fn reopen_sync_run(&self, id: i64) -> Result<SyncRun>;

    /// Write the terminal state of a run
    fn finish_sync_run(&self, id: i64, finish: &SyncRunFinish) -> Result<()>;

    // === Read helpers ===

    fn get_channel(&self, channel_id: &str) -> Result<Option<ChannelSnapshot>>;

    fn get_item(&self, item_id: &str) -> Result<Option<ItemSnapshot>>;

    fn channel_day_fact(&self, channel_id: &str, day: NaiveDate)
    -> Result<Option<ChannelDayFact>>;

    fn item_day_fact(&self, item_id: &str, day: NaiveDate) -> Result<Option<ItemDayFact>>;

    /// All item-day rows for a channel on a day, ordered by item id
    fn list_item_day_facts(&self, channel_id: &str, day: NaiveDate) -> Result<Vec<ItemDayFact>>;

    /// Audit rows for a run in insertion order
    fn list_raw_responses(&self, sync_run_id: i64) -> Result<Vec<RawResponseRecord>>;
}

/// Run a closure in a transaction and hand back its value
pub fn in_transaction<T>(
    store: &dyn WarehouseStore,
    body: impl FnOnce(&mut dyn WarehouseTx) -> Result<T>,
) -> Result<T> {
    let mut body = Some(body);
    let mut output = None;
    store.with_transaction(&mut |tx: &mut dyn WarehouseTx| {
        let body = body.take().context("Transaction body invoked twice")?;
        output = Some(body(tx)?);
        Ok(())
    })?;
    output.context("Transaction completed without producing a value")
}
