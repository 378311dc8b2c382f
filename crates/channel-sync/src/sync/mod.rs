//! Sync engine: collect provider data, persist day facts, run the pipeline
//!
//! Every attempt is recorded as a sync run and can be resumed from its
//! last checkpoint.

mod delta;
mod events;
mod orchestrator;
mod pipeline;
mod retry;

pub use delta::{channel_day_fact, counter_delta, item_day_fact};
pub use events::{LogEventSink, SyncEvent, SyncEventSink};
pub use orchestrator::{
    MAX_RECENT_LIMIT, SyncOrchestrator, SyncOutcome, SyncRequest, validate_channel_id,
    validate_recent_limit,
};
pub use pipeline::{DayFactFeaturePipeline, FeaturePipeline};
pub use retry::{RetryPolicy, is_retryable, with_retry};
