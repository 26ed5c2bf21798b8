//! Trawl Core
//!
//! Core types and abstractions for the Trawl batch scraper.
//!
//! This crate contains:
//! - Domain types: batch jobs, per-URL tasks, settings, statistics
//! - DTOs: requests passed from the control surface into the job store
//! - Errors: the task- and batch-level failure taxonomy

pub mod domain;
pub mod dto;
pub mod error;

pub use error::{BatchError, Result};
