//! Volleyball league data sync and derived views
//!
//! - [`league`]: upstream API client, SQLite cache and watermark store
//! - [`sync`]: watermark-gated sync orchestrator and its scheduler
//! - [`render`]: match aggregation, iCalendar, news feeds and ranking views

pub mod config;
pub mod league;
pub mod logging;
pub mod render;
pub mod sync;
