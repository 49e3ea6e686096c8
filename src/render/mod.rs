//! Read-only views over the cache
//!
//! - [`aggregate`]: deduplicated, sorted match lists for a set of teams
//! - [`calendar`]: iCalendar documents
//! - [`feed`]: RSS 2.0, Atom 1.0 and JSON Feed 1.1 documents
//! - [`ranking`]: ranking tables for the series of a set of teams
//!
//! Nothing in here talks to the upstream API or writes to the cache.

pub mod aggregate;
pub mod calendar;
pub mod feed;
pub mod ranking;

use thiserror::Error;

use crate::league::error::CacheError;
use crate::league::store::CacheRepository;
use crate::league::types::Team;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Unknown team: {0}")]
    UnknownTeam(String),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("Failed to serialize document: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A rendered response body with the metadata a web layer needs to serve it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub content_type: &'static str,
    /// Suggested download name, sent as an attachment disposition
    pub filename: Option<String>,
    /// Seconds clients may cache the body
    pub max_age: u64,
    pub body: String,
}

impl Document {
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![
            ("Content-Type", self.content_type.to_string()),
            ("Cache-Control", format!("public, max-age={}", self.max_age)),
        ];
        if let Some(filename) = &self.filename {
            headers.push((
                "Content-Disposition",
                format!("attachment; filename=\"{}\"", filename),
            ));
        }
        headers
    }
}

/// Resolve team keys (uuid, numeric id or slug) against the cached club.
///
/// An empty key list selects every team of the club, and no team at all
/// while the club has not been synced yet.
pub fn resolve_teams<S: CacheRepository + ?Sized>(
    store: &S,
    club_id: &str,
    keys: &[String],
) -> Result<Vec<Team>, RenderError> {
    let teams = store
        .club(club_id)?
        .map(|club| club.teams)
        .unwrap_or_default();

    if keys.is_empty() {
        return Ok(teams);
    }

    keys.iter()
        .map(|key| {
            teams
                .iter()
                .find(|team| team.matches_key(key))
                .cloned()
                .ok_or_else(|| RenderError::UnknownTeam(key.clone()))
        })
        .collect()
}
