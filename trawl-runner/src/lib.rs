//! Trawl Runner
//!
//! Drives batch jobs through hidden browser tabs.
//!
//! Architecture:
//! - Tabs: hidden tab manager over the browser's tab lifecycle API
//! - Bridge: correlated request/response extraction calls into a page
//! - Scheduler: per-job admission loop with pacing, retries and backoff
//! - Sweep: recovery of orphaned tasks and expired ephemeral jobs
//! - Controller: the control surface used by front ends

pub mod bridge;
pub mod config;
pub mod controller;
pub mod leases;
pub mod scheduler;
pub mod sweep;
pub mod tabs;

pub use bridge::{ExtractionBridge, ExtractionOutcome, ExtractionRequest, ExtractionResponse, PageMessenger};
pub use config::RunnerConfig;
pub use controller::{BatchController, Subscription};
pub use leases::TaskLeases;
pub use scheduler::{BatchScheduler, SchedulerPhase};
pub use sweep::{CleanupSweep, SweepReport};
pub use tabs::{HiddenTabManager, TabDriver, TabInfo, TabLoadStatus, TabOptions, TabUpdate};
