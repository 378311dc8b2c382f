//! Lifecycle events emitted while a sync runs
//!
//! Events are fire-and-forget: a sink that cannot deliver drops the event.

use log::{debug, error, info};
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

use crate::error::ErrorCode;
use crate::models::SyncStage;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SyncEvent {
    #[serde(rename_all = "camelCase")]
    Progress {
        sync_run_id: i64,
        stage: SyncStage,
        percent: u8,
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    Complete {
        sync_run_id: i64,
        /// Milliseconds spent in the attempt that completed the run
        #[serde(rename = "duration")]
        duration_ms: u64,
        records_processed: u64,
    },
    #[serde(rename_all = "camelCase")]
    Error {
        sync_run_id: i64,
        code: ErrorCode,
        message: String,
        retryable: bool,
    },
}

/// Receives lifecycle events
pub trait SyncEventSink: Send + Sync {
    fn emit(&self, event: SyncEvent);
}

/// Forwards events to the `log` facade
pub struct LogEventSink;

impl SyncEventSink for LogEventSink {
    fn emit(&self, event: SyncEvent) {
        match event {
            SyncEvent::Progress {
                sync_run_id,
                stage,
                percent,
                message,
            } => debug!("[sync {sync_run_id}] {stage} {percent}%: {message}"),
            SyncEvent::Complete {
                sync_run_id,
                duration_ms,
                records_processed,
            } => info!(
                "[sync {sync_run_id}] completed: {records_processed} records in {duration_ms}ms"
            ),
            SyncEvent::Error {
                sync_run_id,
                code,
                message,
                retryable,
            } => error!("[sync {sync_run_id}] {code}: {message} (retryable: {retryable})"),
        }
    }
}

impl SyncEventSink for UnboundedSender<SyncEvent> {
    fn emit(&self, event: SyncEvent) {
        // Receiver gone means nobody is listening
        let _ = self.send(event);
    }
}
