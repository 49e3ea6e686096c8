//! Trait for the federation API, one method per upstream endpoint

#[cfg(test)]
use mockall::automock;

use crate::league::error::ApiError;
use crate::league::types::{Club, Match, MatchSeries, RankingEntry, Season};

/// Remote league data source.
///
/// Every call is a single upstream request: no caching and no retries.
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait LeagueApi: Send + Sync {
    async fn fetch_seasons(&self) -> Result<Vec<Season>, ApiError>;

    /// All match series of the current season, including their watermarks
    async fn fetch_match_series_catalog(&self) -> Result<Vec<MatchSeries>, ApiError>;

    /// Full current match list of a series
    async fn fetch_matches(&self, match_series_uuid: &str) -> Result<Vec<Match>, ApiError>;

    /// Ranking table of a series in upstream order
    async fn fetch_rankings(&self, match_series_uuid: &str)
    -> Result<Vec<RankingEntry>, ApiError>;

    async fn fetch_club(&self, club_id: &str) -> Result<Club, ApiError>;
}
