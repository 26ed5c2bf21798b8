//! Trawl Store
//!
//! Durable state for batch jobs.
//!
//! Architecture:
//! - Repository: key/blob record stores with compare-and-swap (SQLite, memory)
//! - Locks: keyed lock table serializing read-modify-write per job
//! - Service: the job state store, the single writer of record for batch jobs

pub mod db;
pub mod error;
pub mod locks;
pub mod repository;
pub mod service;

pub use error::StoreError;
pub use repository::{MemoryRecordStore, RecordStore, SqliteRecordStore, VersionedRecord};
pub use service::{JobChange, JobEvent, JobStore};
