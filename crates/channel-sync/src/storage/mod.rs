//! Storage traits and implementations
//!
//! The warehouse holds dimension rows (latest absolute values), additive
//! day facts, the raw-response audit log, and sync run checkpoints. The
//! trait lets the orchestrator run against either backend.

mod memory;
mod sqlite;
mod traits;

pub use memory::InMemoryWarehouse;
pub use sqlite::SqliteWarehouse;
pub use traits::{WarehouseStore, WarehouseTx, in_transaction};
