//! Domain models for channel metrics and sync bookkeeping

mod facts;
mod fixture;
mod snapshot;
mod sync_run;

pub use facts::{ChannelDayFact, Endpoint, ItemDayFact, RawResponseRecord};
pub use fixture::{BUILTIN_FIXTURE, FixtureFile};
pub use snapshot::{ChannelSnapshot, ItemSnapshot, sort_items_for_replay};
pub use sync_run::{NewSyncRun, SyncRun, SyncRunFinish, SyncStage, SyncStatus};
