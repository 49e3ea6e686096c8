//! Ranking tables for the series of a set of teams

use std::collections::HashSet;

use serde::Serialize;

use crate::league::error::CacheError;
use crate::league::store::{CacheRepository, TeamSnapshot};
use crate::league::types::{MatchSeries, RankingEntry};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankingTable {
    pub series: MatchSeries,
    pub rows: Vec<RankingRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankingRow {
    #[serde(flatten)]
    pub entry: RankingEntry,
    /// True for the teams the view was requested for
    pub highlighted: bool,
}

pub fn ranking_tables<S: CacheRepository + ?Sized>(
    store: &S,
    team_uuids: &[String],
) -> Result<Vec<RankingTable>, CacheError> {
    let snapshot = store.team_snapshot(team_uuids)?;
    Ok(tables_from_snapshot(snapshot, team_uuids))
}

/// One table per cached series, rows ordered by place.
///
/// Series without cached metadata are left out; a series without ranking
/// rows yields an empty table.
pub fn tables_from_snapshot(
    mut snapshot: TeamSnapshot,
    team_uuids: &[String],
) -> Vec<RankingTable> {
    let wanted: HashSet<&str> = team_uuids.iter().map(String::as_str).collect();

    snapshot
        .series
        .into_iter()
        .map(|(uuid, series)| {
            let mut entries = snapshot.rankings.shift_remove(&uuid).unwrap_or_default();
            // Stable: equal places keep upstream order
            entries.sort_by_key(|entry| entry.place);

            let rows = entries
                .into_iter()
                .map(|entry| RankingRow {
                    highlighted: wanted.contains(entry.team.uuid.as_str()),
                    entry,
                })
                .collect();
            RankingTable { series, rows }
        })
        .collect()
}
