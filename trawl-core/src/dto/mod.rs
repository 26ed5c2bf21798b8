//! Data Transfer Objects
//!
//! Requests passed from the control surface into the job store.

pub mod batch;
