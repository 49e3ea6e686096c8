//! In-memory federation API and record builders

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, TimeZone, Utc};
use indexmap::IndexMap;
use rusqlite::Connection;
use rusqlite::types::Value;
use tempfile::TempDir;

use volley_sync::league::api::LeagueApi;
use volley_sync::league::cache::Cache;
use volley_sync::league::error::ApiError;
use volley_sync::league::types::{
    Club, LeagueType, Location, Match, MatchResults, MatchSeries, RankingEntry, Season, Team,
    TeamRef, TeamStatus,
};

struct SeriesData {
    series: MatchSeries,
    matches: Vec<Match>,
    rankings: Vec<RankingEntry>,
}

#[derive(Default)]
struct Calls {
    matches: HashMap<String, usize>,
    rankings: HashMap<String, usize>,
}

/// Fake upstream that serves fixed data and counts fetches per series
pub struct FakeLeagueApi {
    club: Club,
    seasons: Vec<Season>,
    series: Mutex<IndexMap<String, SeriesData>>,
    calls: Mutex<Calls>,
}

impl FakeLeagueApi {
    pub fn new(club: Club) -> Self {
        Self {
            club,
            seasons: vec![season()],
            series: Mutex::new(IndexMap::new()),
            calls: Mutex::new(Calls::default()),
        }
    }

    pub fn with_series(
        self,
        series: MatchSeries,
        matches: Vec<Match>,
        rankings: Vec<RankingEntry>,
    ) -> Self {
        self.series.lock().unwrap().insert(
            series.uuid.clone(),
            SeriesData {
                series,
                matches,
                rankings,
            },
        );
        self
    }

    /// Publish new matches for a series and advance its results watermark
    pub fn bump(&self, match_series_uuid: &str, matches: Vec<Match>) {
        let mut series = self.series.lock().unwrap();
        let data = series.get_mut(match_series_uuid).unwrap();
        data.series.results_updated += Duration::hours(1);
        data.matches = matches;
    }

    pub fn match_calls(&self, match_series_uuid: &str) -> usize {
        let calls = self.calls.lock().unwrap();
        calls.matches.get(match_series_uuid).copied().unwrap_or(0)
    }

    pub fn ranking_calls(&self, match_series_uuid: &str) -> usize {
        let calls = self.calls.lock().unwrap();
        calls.rankings.get(match_series_uuid).copied().unwrap_or(0)
    }

    /// Match and ranking fetches across all series
    pub fn total_fetches(&self) -> usize {
        let calls = self.calls.lock().unwrap();
        calls.matches.values().sum::<usize>() + calls.rankings.values().sum::<usize>()
    }
}

#[async_trait]
impl LeagueApi for FakeLeagueApi {
    async fn fetch_seasons(&self) -> Result<Vec<Season>, ApiError> {
        Ok(self.seasons.clone())
    }

    async fn fetch_match_series_catalog(&self) -> Result<Vec<MatchSeries>, ApiError> {
        let series = self.series.lock().unwrap();
        Ok(series.values().map(|data| data.series.clone()).collect())
    }

    async fn fetch_matches(&self, match_series_uuid: &str) -> Result<Vec<Match>, ApiError> {
        *self
            .calls
            .lock()
            .unwrap()
            .matches
            .entry(match_series_uuid.to_string())
            .or_default() += 1;

        let series = self.series.lock().unwrap();
        series
            .get(match_series_uuid)
            .map(|data| data.matches.clone())
            .ok_or_else(|| ApiError::Status {
                status: 404,
                body: String::new(),
            })
    }

    async fn fetch_rankings(
        &self,
        match_series_uuid: &str,
    ) -> Result<Vec<RankingEntry>, ApiError> {
        *self
            .calls
            .lock()
            .unwrap()
            .rankings
            .entry(match_series_uuid.to_string())
            .or_default() += 1;

        let series = self.series.lock().unwrap();
        series
            .get(match_series_uuid)
            .map(|data| data.rankings.clone())
            .ok_or_else(|| ApiError::Status {
                status: 404,
                body: String::new(),
            })
    }

    async fn fetch_club(&self, club_id: &str) -> Result<Club, ApiError> {
        if club_id == self.club.id {
            Ok(self.club.clone())
        } else {
            Err(ApiError::Reported(format!("Unknown club {}", club_id)))
        }
    }
}

pub fn season() -> Season {
    Season {
        id: "2024".to_string(),
        name: "2024/25".to_string(),
        begin: NaiveDate::from_ymd_opt(2024, 7, 1),
        end: NaiveDate::from_ymd_opt(2025, 6, 30),
    }
}

/// A league series at watermark version `version`
pub fn series(uuid: &str, version: u32) -> MatchSeries {
    MatchSeries {
        id: format!("{}-id", uuid),
        uuid: uuid.to_string(),
        name: format!("Liga {}", uuid),
        series_type: LeagueType::League,
        season: season(),
        structure_updated: Utc.with_ymd_and_hms(2024, 8, 1, 0, 0, 0).unwrap(),
        results_updated: Utc.with_ymd_and_hms(2025, 1, 1, version, 0, 0).unwrap(),
        hierarchy: None,
    }
}

pub fn team(uuid: &str, name: &str, series: &str) -> Team {
    Team {
        id: uuid.trim_start_matches("team-").to_string(),
        uuid: uuid.to_string(),
        name: name.to_string(),
        club_name: "VC Test".to_string(),
        status: TeamStatus::Active,
        match_series_uuid: series.to_string(),
        league_type: LeagueType::League,
    }
}

pub fn club(teams: Vec<Team>) -> Club {
    Club {
        id: "42".to_string(),
        name: "VC Test".to_string(),
        teams,
    }
}

fn team_ref(uuid: &str) -> TeamRef {
    TeamRef {
        uuid: uuid.to_string(),
        id: String::new(),
        name: uuid.to_string(),
    }
}

/// An upcoming match at 19:00 local time
pub fn game(uuid: &str, series: &str, date: &str, home: &str, away: &str) -> Match {
    Match {
        uuid: uuid.to_string(),
        number: None,
        date: date.to_string(),
        time: Some("19:00".to_string()),
        teams: [team_ref(home), team_ref(away)],
        host: None,
        location: Some(Location {
            name: "Sporthalle".to_string(),
            street: Some("Hauptstr. 1".to_string()),
            postal_code: Some("12345".to_string()),
            city: Some("Musterstadt".to_string()),
        }),
        results: None,
        match_series_uuid: series.to_string(),
    }
}

/// The same match with a final score, won by the home team
pub fn played(mut game: Match, set_points: &str) -> Match {
    game.results = Some(MatchResults {
        winner_uuid: Some(game.teams[0].uuid.clone()),
        set_points: set_points.to_string(),
        ball_points: None,
        sets: Vec::new(),
    });
    game
}

pub fn ranking(team: &str, place: u32) -> RankingEntry {
    RankingEntry {
        team: team_ref(team),
        place,
        matches_played: 4,
        wins: 2,
        losses: 2,
        points: 6,
        set_points: "8:8".to_string(),
    }
}

pub fn create_test_cache() -> (TempDir, Cache) {
    let temp_dir = TempDir::new().unwrap();
    let cache = Cache::new(&temp_dir.path().join("test.db")).unwrap();
    (temp_dir, cache)
}

/// Every row of every data table, for byte-level comparisons
pub fn dump_tables(db_path: &Path) -> Vec<(String, Vec<Value>)> {
    let conn = Connection::open(db_path).unwrap();
    let mut rows = Vec::new();
    for table in [
        "clubs",
        "teams",
        "seasons",
        "match_series",
        "matches",
        "rankings",
        "watermarks",
    ] {
        let mut stmt = conn
            .prepare(&format!("SELECT * FROM {} ORDER BY rowid", table))
            .unwrap();
        let columns = stmt.column_count();
        let table_rows = stmt
            .query_map([], |row| {
                (0..columns)
                    .map(|i| row.get::<_, Value>(i))
                    .collect::<Result<Vec<_>, _>>()
            })
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        rows.extend(table_rows.into_iter().map(|row| (table.to_string(), row)));
    }
    rows
}
