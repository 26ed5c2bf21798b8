//! Service Module
//!
//! Business logic layer of the store. The job state store owns every batch
//! job record and is the only component allowed to change one.

pub mod events;
pub mod job;

pub use events::{JobChange, JobEvent};
pub use job::JobStore;
