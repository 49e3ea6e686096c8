//! Storage traits shared by the sync orchestrator and the read side

use indexmap::IndexMap;

use crate::league::error::CacheError;
use crate::league::types::{Club, Match, MatchSeries, RankingEntry, Season, Watermark};

/// Last-seen upstream watermark per match series
pub trait WatermarkStore: Send + Sync {
    fn get_watermark(&self, match_series_uuid: &str) -> Result<Option<Watermark>, CacheError>;

    /// Must only be called after the series data has been written
    fn set_watermark(
        &self,
        match_series_uuid: &str,
        watermark: &Watermark,
    ) -> Result<(), CacheError>;
}

/// Cached league records.
///
/// The sync orchestrator is the only writer. Reads of absent records return
/// `None` or empty collections.
pub trait CacheRepository: Send + Sync {
    /// Store a club catalog and its team index; unchanged catalogs are not rewritten
    fn save_club(&self, club: &Club) -> Result<(), CacheError>;

    fn club(&self, club_id: &str) -> Result<Option<Club>, CacheError>;

    fn save_seasons(&self, seasons: &[Season]) -> Result<(), CacheError>;

    /// Seasons, newest `begin` first
    fn seasons(&self) -> Result<Vec<Season>, CacheError>;

    /// Replace everything cached for a series in one transaction
    fn replace_series(
        &self,
        series: &MatchSeries,
        matches: &[Match],
        rankings: &[RankingEntry],
    ) -> Result<(), CacheError>;

    fn series(&self, match_series_uuid: &str) -> Result<Option<MatchSeries>, CacheError>;

    /// Matches of a series in upstream order
    fn matches(&self, match_series_uuid: &str) -> Result<Vec<Match>, CacheError>;

    /// Ranking rows of a series in upstream order
    fn rankings(&self, match_series_uuid: &str) -> Result<Vec<RankingEntry>, CacheError>;

    /// Series reachable from the given teams with matches and rankings, read as one snapshot
    fn team_snapshot(&self, team_uuids: &[String]) -> Result<TeamSnapshot, CacheError>;
}

/// Outcome of trying to take the per-club run lease
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStart {
    Started,
    /// Another run holds the lease
    InFlight { since_ms: i64 },
    /// The previous run started less than the minimum interval ago
    TooSoon { next_allowed_ms: i64 },
}

/// Persistent bookkeeping that keeps sync runs apart across processes
pub trait SyncRunStore: Send + Sync {
    fn try_start_run(
        &self,
        club_id: &str,
        min_interval_ms: i64,
        lease_timeout_ms: i64,
    ) -> Result<RunStart, CacheError>;

    fn finish_run(&self, club_id: &str) -> Result<(), CacheError>;
}

/// Consistent read of the series behind a set of teams
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TeamSnapshot {
    /// Cached series keyed by uuid; series without cached metadata are absent
    pub series: IndexMap<String, MatchSeries>,
    /// Matches of all reachable series, grouped by series in upstream order
    pub matches: Vec<Match>,
    /// Ranking rows per reachable series in upstream order
    pub rankings: IndexMap<String, Vec<RankingEntry>>,
}
