//! Storage interfaces and the primitive store built on them.

pub mod memory;
pub mod primitives;
pub mod sqlite;
pub mod traits;

pub use memory::{InMemoryDurableStore, InMemoryKeyValueStore};
pub use primitives::PrimitiveStore;
pub use sqlite::SqliteDurableStore;
pub use traits::{DurableStore, KeyValueStore};

/// Set of processes currently between `start` and `Idle`.
pub const ACTIVE_PROCESSES_KEY: &str = "conclave:active_processes";

/// Sorted-set key buffering a process's messages until the next flush.
pub fn conversation_key(process_id: &str) -> String {
    format!("conclave:conversation:{process_id}")
}
