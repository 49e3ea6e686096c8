//! Records exchanged with the federation API and persisted in the cache

use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A season, used for display and grouping only
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Season {
    pub id: String,
    pub name: String,
    pub begin: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TeamStatus {
    Active,
    Inactive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LeagueType {
    League,
    Competition,
}

impl LeagueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeagueType::League => "League",
            LeagueType::Competition => "Competition",
        }
    }
}

/// A club team.
///
/// `id` is only unique within a season; `uuid` is the stable identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Team {
    pub id: String,
    pub uuid: String,
    pub name: String,
    pub club_name: String,
    pub status: TeamStatus,
    /// UUID of the match series the team plays in
    pub match_series_uuid: String,
    pub league_type: LeagueType,
}

impl Team {
    /// Teams covered by the routine scheduled sync
    pub fn in_routine_sync(&self) -> bool {
        self.status == TeamStatus::Active && self.league_type == LeagueType::League
    }

    /// URL-safe name, e.g. "Herren 1 (Regionalliga)" -> "herren-1-regionalliga"
    pub fn slug(&self) -> String {
        slugify(&self.name)
    }

    /// Matches a user-supplied key against uuid, season-local id, or slug
    pub fn matches_key(&self, key: &str) -> bool {
        self.uuid == key || self.id == key || self.slug() == key
    }
}

pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars().flat_map(char::to_lowercase) {
        let c = match c {
            'ä' => "ae",
            'ö' => "oe",
            'ü' => "ue",
            'ß' => "ss",
            c if c.is_ascii_alphanumeric() => {
                slug.push(c);
                continue;
            }
            _ => "-",
        };
        slug.push_str(c);
    }
    slug.split('-')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Club {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub teams: Vec<Team>,
}

/// Position of a match series in the federation's league tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesHierarchy {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub level: u32,
}

/// Freshness marker of a match series as reported by the upstream catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Watermark {
    pub structure_updated: DateTime<Utc>,
    pub results_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchSeries {
    pub id: String,
    pub uuid: String,
    pub name: String,
    #[serde(rename = "type")]
    pub series_type: LeagueType,
    pub season: Season,
    pub structure_updated: DateTime<Utc>,
    pub results_updated: DateTime<Utc>,
    pub hierarchy: Option<SeriesHierarchy>,
}

impl MatchSeries {
    pub fn watermark(&self) -> Watermark {
        Watermark {
            structure_updated: self.structure_updated,
            results_updated: self.results_updated,
        }
    }
}

/// A participant as referenced from a match or ranking row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamRef {
    pub uuid: String,
    #[serde(default)]
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub name: String,
    pub street: Option<String>,
    pub postal_code: Option<String>,
    pub city: Option<String>,
}

impl Location {
    /// Single-line address, e.g. "Sporthalle Nord, Hauptstr. 1, 12345 Stadt"
    pub fn display(&self) -> String {
        let town = match (&self.postal_code, &self.city) {
            (Some(code), Some(city)) => Some(format!("{} {}", code, city)),
            (None, Some(city)) => Some(city.clone()),
            (Some(code), None) => Some(code.clone()),
            (None, None) => None,
        };
        std::iter::once(self.name.clone())
            .chain(self.street.clone())
            .chain(town)
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResults {
    pub winner_uuid: Option<String>,
    /// Set score, e.g. "3:1"
    pub set_points: String,
    pub ball_points: Option<String>,
    #[serde(default)]
    pub sets: Vec<String>,
}

/// A single match. Matches without results are in the future.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Match {
    pub uuid: String,
    #[serde(default)]
    pub number: Option<String>,
    /// `DD.MM.YYYY`
    pub date: String,
    /// `HH:MM`, absent when not yet scheduled
    pub time: Option<String>,
    #[serde(rename = "team")]
    pub teams: [TeamRef; 2],
    pub host: Option<String>,
    pub location: Option<Location>,
    pub results: Option<MatchResults>,
    pub match_series_uuid: String,
}

impl Match {
    pub fn is_past(&self) -> bool {
        self.results.is_some()
    }

    /// True if at least one participant is in `team_uuids`
    pub fn involves(&self, team_uuids: &HashSet<String>) -> bool {
        self.teams
            .iter()
            .any(|team| team_uuids.contains(&team.uuid))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankingEntry {
    pub team: TeamRef,
    pub place: u32,
    pub matches_played: u32,
    pub wins: u32,
    pub losses: u32,
    pub points: i32,
    /// e.g. "30:12"
    pub set_points: String,
}
