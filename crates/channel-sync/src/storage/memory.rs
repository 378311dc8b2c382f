//! In-memory storage implementation
//!
//! Used by tests and by short-lived hosts that want an ephemeral warehouse.
//! Transactions run against a copy of the dimensions and day facts that
//! replaces the original only on commit; audit rows are staged and appended
//! on commit, so their cost stays per run rather than per warehouse.

use anyhow::{Result, anyhow, bail};
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{WarehouseStore, WarehouseTx};
use crate::models::{
    ChannelDayFact, ChannelSnapshot, ItemDayFact, ItemSnapshot, NewSyncRun, RawResponseRecord,
    SyncRun, SyncRunFinish, SyncStage, SyncStatus,
};

/// Everything a transaction may rewrite
#[derive(Debug, Default, Clone)]
struct Dimensions {
    channels: HashMap<String, ChannelSnapshot>,
    items: HashMap<String, ItemSnapshot>,
    channel_facts: HashMap<(String, NaiveDate), ChannelDayFact>,
    item_facts: HashMap<(String, NaiveDate), ItemDayFact>,
}

#[derive(Debug, Default)]
struct WarehouseState {
    dimensions: Dimensions,
    /// Audit rows keyed by sync run, each list in insertion order
    raw_responses: HashMap<i64, Vec<RawResponseRecord>>,
}

#[derive(Debug, Default)]
struct SyncRunTable {
    runs: BTreeMap<i64, SyncRun>,
    last_id: i64,
}

/// In-memory implementation of WarehouseStore
pub struct InMemoryWarehouse {
    state: RwLock<WarehouseState>,
    sync_runs: RwLock<SyncRunTable>,
}

impl InMemoryWarehouse {
    /// Create a new empty in-memory warehouse
    pub fn new() -> Self {
        Self {
            state: RwLock::new(WarehouseState::default()),
            sync_runs: RwLock::new(SyncRunTable::default()),
        }
    }

    fn read_state(&self) -> Result<RwLockReadGuard<'_, WarehouseState>> {
        self.state.read().map_err(|_| anyhow!("Warehouse state lock poisoned"))
    }

    fn write_state(&self) -> Result<RwLockWriteGuard<'_, WarehouseState>> {
        self.state.write().map_err(|_| anyhow!("Warehouse state lock poisoned"))
    }

    fn read_runs(&self) -> Result<RwLockReadGuard<'_, SyncRunTable>> {
        self.sync_runs.read().map_err(|_| anyhow!("Sync run lock poisoned"))
    }

    fn write_runs(&self) -> Result<RwLockWriteGuard<'_, SyncRunTable>> {
        self.sync_runs.write().map_err(|_| anyhow!("Sync run lock poisoned"))
    }
}

impl Default for InMemoryWarehouse {
    fn default() -> Self {
        Self::new()
    }
}

/// Transaction view: a working copy of the dimensions plus staged audit rows
struct MemoryTx<'a> {
    dimensions: Dimensions,
    audit: &'a HashMap<i64, Vec<RawResponseRecord>>,
    pending: Vec<RawResponseRecord>,
}

impl WarehouseTx for MemoryTx<'_> {
    fn channel(&self, channel_id: &str) -> Result<Option<ChannelSnapshot>> {
        Ok(self.dimensions.channels.get(channel_id).cloned())
    }

    fn item(&self, item_id: &str) -> Result<Option<ItemSnapshot>> {
        Ok(self.dimensions.items.get(item_id).cloned())
    }

    fn upsert_channel(&mut self, channel: &ChannelSnapshot, _fetched_at: DateTime<Utc>) -> Result<()> {
        self.dimensions
            .channels
            .insert(channel.id.clone(), channel.clone());
        Ok(())
    }

    fn upsert_item(&mut self, item: &ItemSnapshot, _fetched_at: DateTime<Utc>) -> Result<()> {
        self.dimensions.items.insert(item.id.clone(), item.clone());
        Ok(())
    }

    fn add_channel_day_fact(&mut self, fact: &ChannelDayFact) -> Result<()> {
        let key = (fact.channel_id.clone(), fact.day);
        let row = self
            .dimensions
            .channel_facts
            .entry(key)
            .or_insert_with(|| ChannelDayFact {
                views: 0,
                subscribers: 0,
                videos: 0,
                ..fact.clone()
            });
        row.views += fact.views;
        row.subscribers += fact.subscribers;
        row.videos += fact.videos;
        Ok(())
    }

    fn add_item_day_fact(&mut self, fact: &ItemDayFact) -> Result<()> {
        let key = (fact.item_id.clone(), fact.day);
        let row = self
            .dimensions
            .item_facts
            .entry(key)
            .or_insert_with(|| ItemDayFact {
                views: 0,
                likes: 0,
                comments: 0,
                ..fact.clone()
            });
        row.channel_id = fact.channel_id.clone();
        row.views += fact.views;
        row.likes += fact.likes;
        row.comments += fact.comments;
        Ok(())
    }

    fn append_raw_response(&mut self, record: &RawResponseRecord) -> Result<bool> {
        let committed = self
            .audit
            .get(&record.sync_run_id)
            .is_some_and(|rows| rows.iter().any(|r| r.endpoint == record.endpoint));
        let staged = self
            .pending
            .iter()
            .any(|r| r.sync_run_id == record.sync_run_id && r.endpoint == record.endpoint);
        if committed || staged {
            return Ok(false);
        }
        self.pending.push(record.clone());
        Ok(true)
    }
}

impl WarehouseStore for InMemoryWarehouse {
    fn with_transaction(
        &self,
        body: &mut dyn FnMut(&mut dyn WarehouseTx) -> Result<()>,
    ) -> Result<()> {
        let mut state = self.write_state()?;
        let WarehouseState {
            dimensions,
            raw_responses,
        } = &mut *state;

        let mut tx = MemoryTx {
            dimensions: dimensions.clone(),
            audit: raw_responses,
            pending: Vec::new(),
        };
        body(&mut tx)?;

        let MemoryTx {
            dimensions: working,
            pending,
            ..
        } = tx;
        *dimensions = working;
        for record in pending {
            raw_responses
                .entry(record.sync_run_id)
                .or_default()
                .push(record);
        }
        Ok(())
    }

    fn create_sync_run(&self, run: NewSyncRun) -> Result<SyncRun> {
        let mut table = self.write_runs()?;
        if let Some(open) = table.runs.values().find(|r| r.is_open()) {
            bail!("Sync run {} is already running", open.id);
        }
        table.last_id += 1;
        let run = run.into_run(table.last_id);
        table.runs.insert(run.id, run.clone());
        Ok(run)
    }

    fn get_sync_run(&self, id: i64) -> Result<Option<SyncRun>> {
        Ok(self.read_runs()?.runs.get(&id).cloned())
    }

    fn find_open_sync_run(&self) -> Result<Option<SyncRun>> {
        Ok(self.read_runs()?.runs.values().find(|r| r.is_open()).cloned())
    }

    fn checkpoint_sync_run(&self, id: i64, stage: SyncStage, records_processed: u64) -> Result<()> {
        let mut table = self.write_runs()?;
        let run = table
            .runs
            .get_mut(&id)
            .ok_or_else(|| anyhow!("Sync run {id} not found"))?;
        run.stage = stage;
        run.records_processed = records_processed;
        Ok(())
    }

    fn reopen_sync_run(&self, id: i64) -> Result<SyncRun> {
        let mut table = self.write_runs()?;
        if let Some(open) = table.runs.values().find(|r| r.is_open() && r.id != id) {
            bail!("Sync run {} is already running", open.id);
        }
        let run = table
            .runs
            .get_mut(&id)
            .ok_or_else(|| anyhow!("Sync run {id} not found"))?;
        run.status = SyncStatus::Running;
        run.finished_at = None;
        run.error_code = None;
        run.error_message = None;
        Ok(run.clone())
    }

    fn finish_sync_run(&self, id: i64, finish: &SyncRunFinish) -> Result<()> {
        let mut table = self.write_runs()?;
        let run = table
            .runs
            .get_mut(&id)
            .ok_or_else(|| anyhow!("Sync run {id} not found"))?;
        finish.apply(run);
        Ok(())
    }

    fn get_channel(&self, channel_id: &str) -> Result<Option<ChannelSnapshot>> {
        Ok(self.read_state()?.dimensions.channels.get(channel_id).cloned())
    }

    fn get_item(&self, item_id: &str) -> Result<Option<ItemSnapshot>> {
        Ok(self.read_state()?.dimensions.items.get(item_id).cloned())
    }

    fn channel_day_fact(&self, channel_id: &str, day: NaiveDate) -> Result<Option<ChannelDayFact>> {
        let state = self.read_state()?;
        Ok(state
            .dimensions
            .channel_facts
            .get(&(channel_id.to_string(), day))
            .cloned())
    }

    fn item_day_fact(&self, item_id: &str, day: NaiveDate) -> Result<Option<ItemDayFact>> {
        let state = self.read_state()?;
        Ok(state.dimensions.item_facts.get(&(item_id.to_string(), day)).cloned())
    }

    fn list_item_day_facts(&self, channel_id: &str, day: NaiveDate) -> Result<Vec<ItemDayFact>> {
        let state = self.read_state()?;
        let mut facts: Vec<ItemDayFact> = state
            .dimensions
            .item_facts
            .values()
            .filter(|f| f.channel_id == channel_id && f.day == day)
            .cloned()
            .collect();
        facts.sort_by(|a, b| a.item_id.cmp(&b.item_id));
        Ok(facts)
    }

    fn list_raw_responses(&self, sync_run_id: i64) -> Result<Vec<RawResponseRecord>> {
        let state = self.read_state()?;
        Ok(state
            .raw_responses
            .get(&sync_run_id)
            .cloned()
            .unwrap_or_default())
    }
}
