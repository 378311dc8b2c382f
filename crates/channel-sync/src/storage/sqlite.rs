//! SQLite-based warehouse storage

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result, anyhow, bail};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use rusqlite_migration::{M, Migrations};

use super::traits::{WarehouseStore, WarehouseTx};
use crate::models::{
    ChannelDayFact, ChannelSnapshot, Endpoint, ItemDayFact, ItemSnapshot, NewSyncRun,
    RawResponseRecord, SyncRun, SyncRunFinish, SyncStage, SyncStatus,
};

/// Database migrations
///
/// Each migration is applied in order. The user_version pragma tracks which
/// migrations have been applied.
fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        // Migration 1: Initial schema
        M::up(
            r#"
            -- Sync attempts and their checkpoints
            CREATE TABLE sync_runs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                profile_id TEXT,
                channel_id TEXT NOT NULL,
                status TEXT NOT NULL,
                stage TEXT NOT NULL,
                started_at TEXT NOT NULL,
                finished_at TEXT,
                error_code TEXT,
                error_message TEXT,
                records_processed INTEGER NOT NULL DEFAULT 0,
                pipeline_features INTEGER
            );

            -- At most one open run
            CREATE UNIQUE INDEX idx_sync_runs_single_open
                ON sync_runs(status) WHERE status = 'running';

            -- Channel dimension: latest absolute values
            CREATE TABLE dim_channels (
                channel_id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT NOT NULL,
                subscriber_count INTEGER,
                video_count INTEGER NOT NULL,
                view_count INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                fetched_at TEXT NOT NULL
            );

            -- Item dimension: latest absolute values
            CREATE TABLE dim_items (
                item_id TEXT PRIMARY KEY,
                channel_id TEXT NOT NULL,
                title TEXT NOT NULL,
                view_count INTEGER NOT NULL,
                like_count INTEGER,
                comment_count INTEGER,
                published_at TEXT NOT NULL,
                duration_seconds INTEGER NOT NULL,
                fetched_at TEXT NOT NULL
            );

            CREATE INDEX idx_dim_items_channel ON dim_items(channel_id);

            -- Daily deltas
            CREATE TABLE fact_channel_day (
                channel_id TEXT NOT NULL,
                day TEXT NOT NULL,
                views INTEGER NOT NULL DEFAULT 0,
                subscribers INTEGER NOT NULL DEFAULT 0,
                videos INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (channel_id, day)
            );

            CREATE TABLE fact_item_day (
                item_id TEXT NOT NULL,
                day TEXT NOT NULL,
                channel_id TEXT NOT NULL,
                views INTEGER NOT NULL DEFAULT 0,
                likes INTEGER NOT NULL DEFAULT 0,
                comments INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (item_id, day)
            );

            CREATE INDEX idx_fact_item_day_channel ON fact_item_day(channel_id, day);

            -- Raw provider responses, append-only
            CREATE TABLE raw_responses (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                sync_run_id INTEGER NOT NULL,
                source TEXT NOT NULL,
                endpoint TEXT NOT NULL,
                request_params TEXT NOT NULL,
                response_body TEXT NOT NULL,
                fetched_at TEXT NOT NULL,
                UNIQUE (sync_run_id, endpoint)
            );
            "#,
        ),
    ])
}

/// SQLite-based warehouse storage
pub struct SqliteWarehouse {
    conn: Mutex<Connection>,
}

impl SqliteWarehouse {
    /// Open (or create) the warehouse database at `db_path`
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", db_path.as_ref()))?;
        Self::from_connection(conn, true)
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::from_connection(conn, false)
    }

    fn from_connection(mut conn: Connection, file_backed: bool) -> Result<Self> {
        // WAL lets readers proceed during a stage transaction; NORMAL sync is
        // safe with WAL.
        if file_backed {
            conn.execute_batch(
                r#"
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = NORMAL;
                "#,
            )?;
        }
        conn.execute_batch(
            r#"
            PRAGMA temp_store = MEMORY;
            PRAGMA foreign_keys = ON;
            "#,
        )?;

        migrations()
            .to_latest(&mut conn)
            .context("Failed to run database migrations")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Warehouse connection lock poisoned"))
    }
}

// === Row conversion helpers ===

fn to_sql_count(value: u64) -> Result<i64> {
    i64::try_from(value).context("Counter exceeds SQLite integer range")
}

fn opt_to_sql_count(value: Option<u64>) -> Result<Option<i64>> {
    value.map(to_sql_count).transpose()
}

fn from_sql_count(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("Invalid timestamp in warehouse: {value}"))
}

fn parse_day(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .with_context(|| format!("Invalid day in warehouse: {value}"))
}

fn format_day(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}

fn parse_endpoint(value: &str) -> Result<Endpoint> {
    Endpoint::ALL
        .into_iter()
        .find(|e| e.as_str() == value)
        .ok_or_else(|| anyhow!("Unknown endpoint in warehouse: {value}"))
}

const SYNC_RUN_COLUMNS: &str = "id, profile_id, channel_id, status, stage, started_at, finished_at,
     error_code, error_message, records_processed, pipeline_features";

/// Raw sync_runs row before string fields are parsed
type SyncRunRow = (
    i64,
    Option<String>,
    String,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    i64,
    Option<i64>,
);

fn read_sync_run_row(row: &Row<'_>) -> rusqlite::Result<SyncRunRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
        row.get(10)?,
    ))
}

fn sync_run_from_row(row: SyncRunRow) -> Result<SyncRun> {
    let (
        id,
        profile_id,
        channel_id,
        status,
        stage,
        started_at,
        finished_at,
        error_code,
        error_message,
        records_processed,
        pipeline_features,
    ) = row;

    Ok(SyncRun {
        id,
        profile_id,
        channel_id,
        status: status.parse::<SyncStatus>()?,
        stage: stage.parse::<SyncStage>()?,
        started_at: parse_timestamp(&started_at)?,
        finished_at: finished_at.as_deref().map(parse_timestamp).transpose()?,
        error_code,
        error_message,
        records_processed: from_sql_count(records_processed),
        pipeline_features: pipeline_features.map(from_sql_count),
    })
}

fn load_sync_run(conn: &Connection, id: i64) -> Result<Option<SyncRun>> {
    let row = conn
        .query_row(
            &format!("SELECT {SYNC_RUN_COLUMNS} FROM sync_runs WHERE id = ?"),
            [id],
            read_sync_run_row,
        )
        .optional()?;
    row.map(sync_run_from_row).transpose()
}

fn load_open_sync_run(conn: &Connection) -> Result<Option<SyncRun>> {
    let row = conn
        .query_row(
            &format!("SELECT {SYNC_RUN_COLUMNS} FROM sync_runs WHERE status = 'running' LIMIT 1"),
            [],
            read_sync_run_row,
        )
        .optional()?;
    row.map(sync_run_from_row).transpose()
}

fn load_channel(conn: &Connection, channel_id: &str) -> Result<Option<ChannelSnapshot>> {
    let row: Option<(String, String, String, Option<i64>, i64, i64, String)> = conn
        .query_row(
            "SELECT channel_id, name, description, subscriber_count, video_count,
                    view_count, created_at
             FROM dim_channels WHERE channel_id = ?",
            [channel_id],
            |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                ))
            },
        )
        .optional()?;

    let Some((id, name, description, subscriber_count, video_count, view_count, created_at)) = row
    else {
        return Ok(None);
    };

    Ok(Some(ChannelSnapshot {
        id,
        name,
        description,
        subscriber_count: subscriber_count.map(from_sql_count),
        video_count: from_sql_count(video_count),
        view_count: from_sql_count(view_count),
        created_at: parse_timestamp(&created_at)?,
    }))
}

fn load_item(conn: &Connection, item_id: &str) -> Result<Option<ItemSnapshot>> {
    let row: Option<(
        String,
        String,
        String,
        i64,
        Option<i64>,
        Option<i64>,
        String,
        i64,
    )> = conn
        .query_row(
            "SELECT item_id, channel_id, title, view_count, like_count, comment_count,
                    published_at, duration_seconds
             FROM dim_items WHERE item_id = ?",
            [item_id],
            |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                    row.get(7)?,
                ))
            },
        )
        .optional()?;

    let Some((
        id,
        channel_id,
        title,
        view_count,
        like_count,
        comment_count,
        published_at,
        duration_seconds,
    )) = row
    else {
        return Ok(None);
    };

    Ok(Some(ItemSnapshot {
        id,
        channel_id,
        title,
        view_count: from_sql_count(view_count),
        like_count: like_count.map(from_sql_count),
        comment_count: comment_count.map(from_sql_count),
        published_at: parse_timestamp(&published_at)?,
        duration_seconds: from_sql_count(duration_seconds),
    }))
}

/// Transaction view handed to stage bodies
struct SqliteTx<'a> {
    conn: &'a Connection,
}

impl WarehouseTx for SqliteTx<'_> {
    fn channel(&self, channel_id: &str) -> Result<Option<ChannelSnapshot>> {
        load_channel(self.conn, channel_id)
    }

    fn item(&self, item_id: &str) -> Result<Option<ItemSnapshot>> {
        load_item(self.conn, item_id)
    }

    fn upsert_channel(&mut self, channel: &ChannelSnapshot, fetched_at: DateTime<Utc>) -> Result<()> {
        self.conn.execute(
            "INSERT INTO dim_channels
             (channel_id, name, description, subscriber_count, video_count, view_count,
              created_at, fetched_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(channel_id) DO UPDATE SET
                name = excluded.name,
                description = excluded.description,
                subscriber_count = excluded.subscriber_count,
                video_count = excluded.video_count,
                view_count = excluded.view_count,
                created_at = excluded.created_at,
                fetched_at = excluded.fetched_at",
            params![
                channel.id,
                channel.name,
                channel.description,
                opt_to_sql_count(channel.subscriber_count)?,
                to_sql_count(channel.video_count)?,
                to_sql_count(channel.view_count)?,
                channel.created_at.to_rfc3339(),
                fetched_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn upsert_item(&mut self, item: &ItemSnapshot, fetched_at: DateTime<Utc>) -> Result<()> {
        self.conn.execute(
            "INSERT INTO dim_items
             (item_id, channel_id, title, view_count, like_count, comment_count,
              published_at, duration_seconds, fetched_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(item_id) DO UPDATE SET
                channel_id = excluded.channel_id,
                title = excluded.title,
                view_count = excluded.view_count,
                like_count = excluded.like_count,
                comment_count = excluded.comment_count,
                published_at = excluded.published_at,
                duration_seconds = excluded.duration_seconds,
                fetched_at = excluded.fetched_at",
            params![
                item.id,
                item.channel_id,
                item.title,
                to_sql_count(item.view_count)?,
                opt_to_sql_count(item.like_count)?,
                opt_to_sql_count(item.comment_count)?,
                item.published_at.to_rfc3339(),
                to_sql_count(item.duration_seconds)?,
                fetched_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn add_channel_day_fact(&mut self, fact: &ChannelDayFact) -> Result<()> {
        // Additive upsert: repeated syncs on the same day accumulate
        self.conn.execute(
            "INSERT INTO fact_channel_day (channel_id, day, views, subscribers, videos)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(channel_id, day) DO UPDATE SET
                views = views + excluded.views,
                subscribers = subscribers + excluded.subscribers,
                videos = videos + excluded.videos",
            params![
                fact.channel_id,
                format_day(fact.day),
                to_sql_count(fact.views)?,
                to_sql_count(fact.subscribers)?,
                to_sql_count(fact.videos)?,
            ],
        )?;
        Ok(())
    }

    fn add_item_day_fact(&mut self, fact: &ItemDayFact) -> Result<()> {
        self.conn.execute(
            "INSERT INTO fact_item_day (item_id, day, channel_id, views, likes, comments)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(item_id, day) DO UPDATE SET
                channel_id = excluded.channel_id,
                views = views + excluded.views,
                likes = likes + excluded.likes,
                comments = comments + excluded.comments",
            params![
                fact.item_id,
                format_day(fact.day),
                fact.channel_id,
                to_sql_count(fact.views)?,
                to_sql_count(fact.likes)?,
                to_sql_count(fact.comments)?,
            ],
        )?;
        Ok(())
    }

    fn append_raw_response(&mut self, record: &RawResponseRecord) -> Result<bool> {
        let inserted = self.conn.execute(
            "INSERT INTO raw_responses
             (sync_run_id, source, endpoint, request_params, response_body, fetched_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(sync_run_id, endpoint) DO NOTHING",
            params![
                record.sync_run_id,
                record.source,
                record.endpoint.as_str(),
                serde_json::to_string(&record.request_params)?,
                serde_json::to_string(&record.response_body)?,
                record.fetched_at.to_rfc3339(),
            ],
        )?;
        Ok(inserted > 0)
    }
}

impl WarehouseStore for SqliteWarehouse {
    fn with_transaction(
        &self,
        body: &mut dyn FnMut(&mut dyn WarehouseTx) -> Result<()>,
    ) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        // Dropping `tx` without commit rolls back
        body(&mut SqliteTx { conn: &tx })?;
        tx.commit()?;
        Ok(())
    }

    fn create_sync_run(&self, run: NewSyncRun) -> Result<SyncRun> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        if let Some(open) = load_open_sync_run(&tx)? {
            bail!("Sync run {} is already running", open.id);
        }

        tx.execute(
            "INSERT INTO sync_runs (profile_id, channel_id, status, stage, started_at)
             VALUES (?, ?, ?, ?, ?)",
            params![
                run.profile_id,
                run.channel_id,
                SyncStatus::Running.as_str(),
                SyncStage::CollectProviderData.as_str(),
                run.started_at.to_rfc3339(),
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        Ok(run.into_run(id))
    }

    fn get_sync_run(&self, id: i64) -> Result<Option<SyncRun>> {
        let conn = self.lock()?;
        load_sync_run(&conn, id)
    }

    fn find_open_sync_run(&self) -> Result<Option<SyncRun>> {
        let conn = self.lock()?;
        load_open_sync_run(&conn)
    }

    fn checkpoint_sync_run(&self, id: i64, stage: SyncStage, records_processed: u64) -> Result<()> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE sync_runs SET stage = ?, records_processed = ? WHERE id = ?",
            params![stage.as_str(), to_sql_count(records_processed)?, id],
        )?;
        if updated == 0 {
            bail!("Sync run {id} not found");
        }
        Ok(())
    }

    fn reopen_sync_run(&self, id: i64) -> Result<SyncRun> {
        let conn = self.lock()?;
        let updated = conn
            .execute(
                "UPDATE sync_runs
                 SET status = 'running', finished_at = NULL, error_code = NULL,
                     error_message = NULL
                 WHERE id = ?",
                [id],
            )
            .with_context(|| format!("Failed to reopen sync run {id}"))?;
        if updated == 0 {
            bail!("Sync run {id} not found");
        }
        load_sync_run(&conn, id)?.ok_or_else(|| anyhow!("Sync run {id} not found"))
    }

    fn finish_sync_run(&self, id: i64, finish: &SyncRunFinish) -> Result<()> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE sync_runs
             SET status = ?, stage = ?, finished_at = ?, error_code = ?, error_message = ?,
                 records_processed = ?, pipeline_features = ?
             WHERE id = ?",
            params![
                finish.status.as_str(),
                finish.stage.as_str(),
                finish.finished_at.to_rfc3339(),
                finish.error_code,
                finish.error_message,
                to_sql_count(finish.records_processed)?,
                opt_to_sql_count(finish.pipeline_features)?,
                id,
            ],
        )?;
        if updated == 0 {
            bail!("Sync run {id} not found");
        }
        Ok(())
    }

    fn get_channel(&self, channel_id: &str) -> Result<Option<ChannelSnapshot>> {
        let conn = self.lock()?;
        load_channel(&conn, channel_id)
    }

    fn get_item(&self, item_id: &str) -> Result<Option<ItemSnapshot>> {
        let conn = self.lock()?;
        load_item(&conn, item_id)
    }

    fn channel_day_fact(&self, channel_id: &str, day: NaiveDate) -> Result<Option<ChannelDayFact>> {
        let conn = self.lock()?;
        let row: Option<(i64, i64, i64)> = conn
            .query_row(
                "SELECT views, subscribers, videos FROM fact_channel_day
                 WHERE channel_id = ? AND day = ?",
                params![channel_id, format_day(day)],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        Ok(row.map(|(views, subscribers, videos)| ChannelDayFact {
            channel_id: channel_id.to_string(),
            day,
            views: from_sql_count(views),
            subscribers: from_sql_count(subscribers),
            videos: from_sql_count(videos),
        }))
    }

    fn item_day_fact(&self, item_id: &str, day: NaiveDate) -> Result<Option<ItemDayFact>> {
        let conn = self.lock()?;
        let row: Option<(String, i64, i64, i64)> = conn
            .query_row(
                "SELECT channel_id, views, likes, comments FROM fact_item_day
                 WHERE item_id = ? AND day = ?",
                params![item_id, format_day(day)],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?;

        Ok(row.map(|(channel_id, views, likes, comments)| ItemDayFact {
            item_id: item_id.to_string(),
            channel_id,
            day,
            views: from_sql_count(views),
            likes: from_sql_count(likes),
            comments: from_sql_count(comments),
        }))
    }

    fn list_item_day_facts(&self, channel_id: &str, day: NaiveDate) -> Result<Vec<ItemDayFact>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT item_id, views, likes, comments FROM fact_item_day
             WHERE channel_id = ? AND day = ?
             ORDER BY item_id",
        )?;

        let facts = stmt
            .query_map(params![channel_id, format_day(day)], |row| {
                Ok(ItemDayFact {
                    item_id: row.get(0)?,
                    channel_id: channel_id.to_string(),
                    day,
                    views: from_sql_count(row.get(1)?),
                    likes: from_sql_count(row.get(2)?),
                    comments: from_sql_count(row.get(3)?),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(facts)
    }

    fn list_raw_responses(&self, sync_run_id: i64) -> Result<Vec<RawResponseRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT source, endpoint, request_params, response_body, fetched_at
             FROM raw_responses WHERE sync_run_id = ?
             ORDER BY id",
        )?;

        let rows: Vec<(String, String, String, String, String)> = stmt
            .query_map([sync_run_id], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(source, endpoint, request_params, response_body, fetched_at)| {
                Ok(RawResponseRecord {
                    sync_run_id,
                    source,
                    endpoint: parse_endpoint(&endpoint)?,
                    request_params: serde_json::from_str(&request_params)?,
                    response_body: serde_json::from_str(&response_body)?,
                    fetched_at: parse_timestamp(&fetched_at)?,
                })
            })
            .collect()
    }
}
