//! Record builders shared by unit tests

use chrono::{NaiveDate, TimeZone, Utc};

use crate::league::types::{
    Club, LeagueType, Location, Match, MatchResults, MatchSeries, RankingEntry, Season, Team,
    TeamRef, TeamStatus,
};

pub fn season() -> Season {
    Season {
        id: "7".to_string(),
        name: "2024/25".to_string(),
        begin: NaiveDate::from_ymd_opt(2024, 7, 1),
        end: NaiveDate::from_ymd_opt(2025, 6, 30),
    }
}

/// A series whose results watermark is `2025-01-01T<version>:00:00Z`
pub fn series(uuid: &str, version: u32) -> MatchSeries {
    MatchSeries {
        id: format!("{}-id", uuid),
        uuid: uuid.to_string(),
        name: format!("League {}", uuid),
        series_type: LeagueType::League,
        season: season(),
        structure_updated: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
        results_updated: Utc.with_ymd_and_hms(2025, 1, 1, version, 0, 0).unwrap(),
        hierarchy: None,
    }
}

pub fn team(uuid: &str, series: &str) -> Team {
    Team {
        id: uuid.trim_start_matches("t-").to_string(),
        uuid: uuid.to_string(),
        name: format!("Team {}", uuid),
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

pub fn team_ref(uuid: &str) -> TeamRef {
    TeamRef {
        uuid: uuid.to_string(),
        id: String::new(),
        name: format!("Team {}", uuid),
    }
}

/// A future match on `date` at 15:00
pub fn game(uuid: &str, series: &str, date: &str, home: &str, away: &str) -> Match {
    Match {
        uuid: uuid.to_string(),
        number: None,
        date: date.to_string(),
        time: Some("15:00".to_string()),
        teams: [team_ref(home), team_ref(away)],
        host: None,
        location: Some(Location {
            name: "Sporthalle".to_string(),
            street: None,
            postal_code: None,
            city: Some("Musterstadt".to_string()),
        }),
        results: None,
        match_series_uuid: series.to_string(),
    }
}

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
        matches_played: 10,
        wins: 5,
        losses: 5,
        points: 15,
        set_points: "20:20".to_string(),
    }
}
