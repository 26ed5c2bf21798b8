//! Repository layer
//!
//! Record stores are the persistence boundary of the job store: a key/blob
//! map whose only write primitive is a versioned compare-and-swap. They hold
//! no business logic.
//!
//! All record stores are trait-based to enable testing and mocking.

mod memory;
mod record;
mod sqlite;

pub use record::{RecordStore, VersionedRecord};

pub use memory::MemoryRecordStore;
pub use sqlite::SqliteRecordStore;
