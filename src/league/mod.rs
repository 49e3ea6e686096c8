//! League data layer: upstream access and the local cache
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  LeagueApi  │────▶│    Cache    │◀────│   render    │
//! │  (fetch)    │     │  (storage)  │     │ (read-only) │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        │                   ▲
//!        ▼                   │
//! ┌─────────────┐     ┌─────────────┐
//! │   Decoder   │     │ Watermarks  │
//! │   (JSON)    │     │ (freshness) │
//! └─────────────┘     └─────────────┘
//! ```
//!
//! # Modules
//!
//! - [`api`]: `LeagueApi` trait, one method per upstream endpoint
//! - [`client`]: reqwest-based implementation of `LeagueApi`
//! - [`decoder`]: response body decoding, including embedded error payloads
//! - [`store`]: `CacheRepository`, `WatermarkStore` and `SyncRunStore` traits
//! - [`cache`]: SQLite implementation of the store traits
//! - [`date`]: match date parsing and Central European offsets
//! - [`error`]: error types for cache and upstream operations
//! - [`types`]: league records

pub mod api;
pub mod cache;
pub mod client;
pub mod date;
pub mod decoder;
pub mod error;
pub mod store;
pub mod types;

#[cfg(test)]
pub(crate) mod fixtures;
