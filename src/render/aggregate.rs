//! Match aggregation for a set of teams
//!
//! Collects the matches involving any of the teams across their series and
//! keeps one entry per match uuid. The result is split into played and
//! upcoming matches, each sorted by kick-off.

use std::cmp::Reverse;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use indexmap::IndexMap;
use serde::Serialize;

use crate::league::date::parse_kickoff;
use crate::league::error::CacheError;
use crate::league::store::{CacheRepository, TeamSnapshot};
use crate::league::types::{Match, MatchSeries};

/// Which side of the aggregated view to keep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Partition {
    Past,
    Future,
}

impl FromStr for Partition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "past" => Ok(Self::Past),
            "future" => Ok(Self::Future),
            other => Err(format!("Unknown partition: {}", other)),
        }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Past => "past",
            Self::Future => "future",
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchView {
    /// Played matches, most recent first
    pub past: Vec<Match>,
    /// Upcoming matches, soonest first
    pub future: Vec<Match>,
    /// Series metadata for the matches above
    pub series: IndexMap<String, MatchSeries>,
}

impl MatchView {
    /// All matches in chronological order
    pub fn chronological(&self) -> impl Iterator<Item = &Match> {
        self.past.iter().rev().chain(self.future.iter())
    }

    pub fn len(&self) -> usize {
        self.past.len() + self.future.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Read one snapshot for `team_uuids` and aggregate it
pub fn aggregate_matches<S: CacheRepository + ?Sized>(
    store: &S,
    team_uuids: &[String],
    partition: Option<Partition>,
) -> Result<MatchView, CacheError> {
    let snapshot = store.team_snapshot(team_uuids)?;
    Ok(aggregate_snapshot(snapshot, team_uuids, partition))
}

pub fn aggregate_snapshot(
    snapshot: TeamSnapshot,
    team_uuids: &[String],
    partition: Option<Partition>,
) -> MatchView {
    let wanted: HashSet<String> = team_uuids.iter().cloned().collect();

    // First occurrence of a uuid wins
    let unique = snapshot
        .matches
        .into_iter()
        .filter(|m| m.involves(&wanted))
        .fold(IndexMap::new(), |mut acc: IndexMap<String, Match>, m| {
            acc.entry(m.uuid.clone()).or_insert(m);
            acc
        });

    let (past, future): (Vec<_>, Vec<_>) = unique
        .into_values()
        .map(|m| (kickoff(&m), m))
        .partition(|(_, m)| m.is_past());

    let past = match partition {
        Some(Partition::Future) => Vec::new(),
        _ => sorted(past, |(at, _)| (at.is_none(), at.map(Reverse))),
    };
    let future = match partition {
        Some(Partition::Past) => Vec::new(),
        _ => sorted(future, |(at, _)| (at.is_none(), *at)),
    };

    MatchView {
        past,
        future,
        series: snapshot.series,
    }
}

fn kickoff(m: &Match) -> Option<NaiveDateTime> {
    parse_kickoff(&m.date, m.time.as_deref()).map(|k| k.naive())
}

/// Stable sort, so matches with equal or unparseable dates keep upstream order
fn sorted<K: Ord>(
    mut keyed: Vec<(Option<NaiveDateTime>, Match)>,
    key: impl Fn(&(Option<NaiveDateTime>, Match)) -> K,
) -> Vec<Match> {
    keyed.sort_by_key(|entry| key(entry));
    keyed.into_iter().map(|(_, m)| m).collect()
}
