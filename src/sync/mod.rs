//! Synchronization of upstream league data into the cache
//!
//! - [`refresh`]: the watermark-gated sync run (club, seasons, series)
//! - [`schedule`]: single-flight triggers, minimum interval, daily loop

pub mod refresh;
pub mod schedule;

pub use refresh::{SyncError, SyncOptions, SyncReport, sync_club, sync_teams};
pub use schedule::{SyncScheduler, TriggerOutcome};
