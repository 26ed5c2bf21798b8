//! Core domain types
//!
//! These types are shared between the job store (which persists them) and
//! the runner (which drives them through their lifecycle).

pub mod extraction;
pub mod job;
pub mod settings;
pub mod statistics;
pub mod task;
