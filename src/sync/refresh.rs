//! Watermark-gated refresh of cached match series
//!
//! One run walks `enumerate teams -> resolve series -> check watermark ->
//! skip | fetch and merge`. A series whose catalog watermark equals the stored
//! one is not fetched. A fetched series is written first and its watermark
//! recorded afterwards, so an interrupted run leaves the series stale and it
//! is fetched again next time.

use std::collections::HashMap;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use indexmap::IndexSet;
use thiserror::Error;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::config::{RETRY_BACKOFF_MS, SyncConfig};
use crate::league::api::LeagueApi;
use crate::league::error::{ApiError, CacheError};
use crate::league::store::{CacheRepository, WatermarkStore};
use crate::league::types::{Club, Match, MatchSeries, RankingEntry, Team};

#[derive(Debug, Error)]
pub enum SyncError {
    /// Storage failed; the run stops because no safe partial state exists
    #[error("Storage failure: {0}")]
    Storage(#[from] CacheError),

    /// The club or series catalog could not be loaded at all
    #[error("Failed to load catalog: {0}")]
    Catalog(#[source] ApiError),
}

/// Tuning knobs for a sync run
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub max_concurrent_fetches: usize,
    /// Extra attempts for transient upstream errors
    pub retries: u32,
    pub retry_backoff: Duration,
    /// Upper bound for fetching one series (matches and rankings)
    pub series_timeout: Duration,
}

impl SyncOptions {
    pub fn from_config(config: &SyncConfig, request_timeout: Duration) -> Self {
        Self {
            max_concurrent_fetches: config.max_concurrent_fetches.max(1),
            retries: config.retries,
            retry_backoff: Duration::from_millis(RETRY_BACKOFF_MS),
            // Two requests run in parallel, allow one retry-sized slack
            series_timeout: request_timeout * 2,
        }
    }
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self::from_config(
            &SyncConfig::default(),
            Duration::from_millis(crate::config::FETCH_TIMEOUT_MS),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesFailure {
    pub match_series_uuid: String,
    pub reason: String,
}

/// What a run did, series by series
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub teams: usize,
    pub series_checked: usize,
    /// Skipped because the watermark was unchanged
    pub fresh: Vec<String>,
    pub refreshed: Vec<String>,
    pub failed: Vec<SeriesFailure>,
    /// Referenced by a team but absent from the upstream catalog
    pub missing_from_catalog: Vec<String>,
}

impl SyncReport {
    pub fn log_summary(&self) {
        info!(
            "Sync finished: {} teams, {} series checked, {} fresh, {} refreshed, {} failed, {} missing",
            self.teams,
            self.series_checked,
            self.fresh.len(),
            self.refreshed.len(),
            self.failed.len(),
            self.missing_from_catalog.len()
        );
    }
}

/// Call `op` until it succeeds, fails permanently, or retries run out
async fn with_retries<T, F, Fut>(options: &SyncOptions, what: &str, mut op: F) -> Result<T, ApiError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, ApiError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Err(e) if e.is_transient() && attempt < options.retries => {
                attempt += 1;
                warn!("{} failed ({}), retry {}/{}", what, e, attempt, options.retries);
                sleep(options.retry_backoff * attempt).await;
            }
            result => return result,
        }
    }
}

/// Fetch matches and rankings of one series concurrently, bounded by the series timeout
async fn fetch_series(
    api: &dyn LeagueApi,
    match_series_uuid: &str,
    options: &SyncOptions,
) -> Result<(Vec<Match>, Vec<RankingEntry>), ApiError> {
    with_retries(options, match_series_uuid, || async {
        let both = async {
            futures::try_join!(
                api.fetch_matches(match_series_uuid),
                api.fetch_rankings(match_series_uuid)
            )
        };
        match timeout(options.series_timeout, both).await {
            Ok(result) => result,
            Err(_) => Err(ApiError::Timeout),
        }
    })
    .await
}

/// Load the club catalog from upstream, falling back to the cached copy
async fn enumerate_club<S>(store: &S, api: &dyn LeagueApi, club_id: &str) -> Result<Club, SyncError>
where
    S: CacheRepository + ?Sized,
{
    match api.fetch_club(club_id).await {
        Ok(club) => {
            store.save_club(&club)?;
            debug!("Loaded club {} with {} teams", club.id, club.teams.len());
            Ok(club)
        }
        Err(e) => {
            warn!("Failed to fetch club {}: {}. Using cached catalog.", club_id, e);
            store.club(club_id)?.ok_or(SyncError::Catalog(e))
        }
    }
}

/// Refresh the cached season list; upstream failures are only logged
async fn refresh_seasons<S>(store: &S, api: &dyn LeagueApi) -> Result<(), SyncError>
where
    S: CacheRepository + ?Sized,
{
    match api.fetch_seasons().await {
        Ok(seasons) => {
            store.save_seasons(&seasons)?;
            debug!("Saved {} seasons", seasons.len());
        }
        Err(e) => warn!("Failed to fetch seasons: {}", e),
    }
    Ok(())
}

/// Distinct series of the given teams, in team order
fn resolve_series<'a>(teams: impl IntoIterator<Item = &'a Team>) -> IndexSet<String> {
    teams
        .into_iter()
        .map(|team| team.match_series_uuid.clone())
        .filter(|uuid| !uuid.is_empty())
        .collect()
}

/// Check watermarks for `series_uuids` and refresh the stale ones
async fn sync_series<S>(
    store: &S,
    api: &dyn LeagueApi,
    series_uuids: &IndexSet<String>,
    options: &SyncOptions,
    report: &mut SyncReport,
) -> Result<(), SyncError>
where
    S: CacheRepository + WatermarkStore + ?Sized,
{
    if series_uuids.is_empty() {
        return Ok(());
    }

    let catalog: HashMap<String, MatchSeries> =
        with_retries(options, "match series catalog", || {
            api.fetch_match_series_catalog()
        })
        .await
        .map_err(SyncError::Catalog)?
        .into_iter()
        .map(|series| (series.uuid.clone(), series))
        .collect();

    let mut stale = Vec::new();
    for uuid in series_uuids {
        report.series_checked += 1;

        let Some(series) = catalog.get(uuid) else {
            warn!("Match series {} not found in upstream catalog", uuid);
            report.missing_from_catalog.push(uuid.clone());
            continue;
        };

        let stored = store.get_watermark(uuid)?;
        if stored == Some(series.watermark()) {
            debug!("Match series {} is fresh, skipping", uuid);
            report.fresh.push(uuid.clone());
        } else {
            debug!(
                "Match series {} is stale (stored {:?}, upstream {:?})",
                uuid,
                stored,
                series.watermark()
            );
            stale.push(series.clone());
        }
    }

    let mut fetches = stream::iter(stale)
        .map(|series| async move {
            let result = fetch_series(api, &series.uuid, options).await;
            (series, result)
        })
        .buffer_unordered(options.max_concurrent_fetches);

    // Writes happen here, one series at a time: data first, then watermark.
    while let Some((series, result)) = fetches.next().await {
        match result {
            Ok((matches, rankings)) => {
                store.replace_series(&series, &matches, &rankings)?;
                store.set_watermark(&series.uuid, &series.watermark())?;
                info!(
                    "Refreshed match series {} ({}): {} matches, {} ranking rows",
                    series.name,
                    series.uuid,
                    matches.len(),
                    rankings.len()
                );
                report.refreshed.push(series.uuid);
            }
            Err(e) => {
                error!(
                    "Failed to refresh match series {} ({}): {}",
                    series.name, series.uuid, e
                );
                report.failed.push(SeriesFailure {
                    match_series_uuid: series.uuid,
                    reason: e.to_string(),
                });
            }
        }
    }

    Ok(())
}

/// Routine sync of a club: all active league teams.
///
/// Upstream failures of single series are recorded in the report; only
/// storage failures and an unavailable catalog end the run with an error.
pub async fn sync_club<S>(
    store: &S,
    api: &dyn LeagueApi,
    club_id: &str,
    options: &SyncOptions,
) -> Result<SyncReport, SyncError>
where
    S: CacheRepository + WatermarkStore + ?Sized,
{
    info!("Starting sync for club {}", club_id);

    let club = enumerate_club(store, api, club_id).await?;
    refresh_seasons(store, api).await?;

    let teams: Vec<&Team> = club.teams.iter().filter(|t| t.in_routine_sync()).collect();
    let series_uuids = resolve_series(teams.iter().copied());
    debug!(
        "{} of {} teams in scope, {} distinct series",
        teams.len(),
        club.teams.len(),
        series_uuids.len()
    );

    let mut report = SyncReport {
        teams: teams.len(),
        ..SyncReport::default()
    };
    sync_series(store, api, &series_uuids, options, &mut report).await?;

    report.log_summary();
    Ok(report)
}

/// On-demand sync of specific club teams, regardless of status or league type.
///
/// `team_keys` may be uuids, season-local ids or slugs; unknown keys are skipped.
pub async fn sync_teams<S>(
    store: &S,
    api: &dyn LeagueApi,
    club_id: &str,
    team_keys: &[String],
    options: &SyncOptions,
) -> Result<SyncReport, SyncError>
where
    S: CacheRepository + WatermarkStore + ?Sized,
{
    let club = match store.club(club_id)? {
        Some(club) => club,
        None => enumerate_club(store, api, club_id).await?,
    };

    let teams: Vec<&Team> = club
        .teams
        .iter()
        .filter(|team| team_keys.iter().any(|key| team.matches_key(key)))
        .collect();
    for key in team_keys {
        if !teams.iter().any(|team| team.matches_key(key)) {
            warn!("Team {} not found in club {}", key, club_id);
        }
    }

    let series_uuids = resolve_series(teams.iter().copied());
    let mut report = SyncReport {
        teams: teams.len(),
        ..SyncReport::default()
    };
    sync_series(store, api, &series_uuids, options, &mut report).await?;

    report.log_summary();
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::league::api::MockLeagueApi;
    use crate::league::cache::Cache;
    use crate::league::fixtures::{club, game, ranking, series, team};
    use crate::league::types::{LeagueType, TeamStatus};
    use tempfile::TempDir;

    fn create_test_cache() -> (TempDir, Cache) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let cache = Cache::new(&db_path).unwrap();
        (temp_dir, cache)
    }

    fn options() -> SyncOptions {
        SyncOptions {
            max_concurrent_fetches: 2,
            retries: 0,
            retry_backoff: Duration::from_millis(1),
            series_timeout: Duration::from_secs(5),
        }
    }

    fn expect_club(api: &mut MockLeagueApi, club_value: Club) {
        api.expect_fetch_club()
            .returning(move |_| Ok(club_value.clone()));
        api.expect_fetch_seasons()
            .returning(|| Ok(vec![crate::league::fixtures::season()]));
    }

    fn expect_series_data(api: &mut MockLeagueApi, uuid: &'static str, times: usize) {
        api.expect_fetch_matches()
            .withf(move |s| s == uuid)
            .times(times)
            .returning(move |s| Ok(vec![game(&format!("{}-m", s), s, "01.02.2025", "t-1", "x")]));
        api.expect_fetch_rankings()
            .withf(move |s| s == uuid)
            .times(times)
            .returning(|_| Ok(vec![ranking("t-1", 1)]));
    }

    #[tokio::test]
    async fn sync_club_fetches_stale_series_and_records_watermark() {
        let (_temp_dir, cache) = create_test_cache();

        let mut api = MockLeagueApi::new();
        expect_club(&mut api, club(vec![team("t-1", "s-1")]));
        api.expect_fetch_match_series_catalog()
            .returning(|| Ok(vec![series("s-1", 1)]));
        expect_series_data(&mut api, "s-1", 1);

        let report = sync_club(&cache, &api, "42", &options()).await.unwrap();

        assert_eq!(report.refreshed, vec!["s-1".to_string()]);
        assert_eq!(cache.matches("s-1").unwrap().len(), 1);
        assert_eq!(cache.rankings("s-1").unwrap(), vec![ranking("t-1", 1)]);
        assert_eq!(
            cache.get_watermark("s-1").unwrap(),
            Some(series("s-1", 1).watermark())
        );
        assert_eq!(cache.seasons().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn sync_club_skips_series_with_unchanged_watermark() {
        let (_temp_dir, cache) = create_test_cache();
        cache
            .set_watermark("s-1", &series("s-1", 1).watermark())
            .unwrap();

        let mut api = MockLeagueApi::new();
        expect_club(&mut api, club(vec![team("t-1", "s-1")]));
        api.expect_fetch_match_series_catalog()
            .returning(|| Ok(vec![series("s-1", 1)]));
        // Neither matches nor rankings may be requested
        api.expect_fetch_matches().times(0);
        api.expect_fetch_rankings().times(0);

        let report = sync_club(&cache, &api, "42", &options()).await.unwrap();

        assert_eq!(report.fresh, vec!["s-1".to_string()]);
        assert!(report.refreshed.is_empty());
    }

    #[tokio::test]
    async fn sync_club_refetches_when_only_structure_changed() {
        let (_temp_dir, cache) = create_test_cache();
        cache
            .set_watermark("s-1", &series("s-1", 1).watermark())
            .unwrap();

        let mut changed = series("s-1", 1);
        changed.structure_updated = changed.results_updated;

        let mut api = MockLeagueApi::new();
        expect_club(&mut api, club(vec![team("t-1", "s-1")]));
        api.expect_fetch_match_series_catalog()
            .returning(move || Ok(vec![changed.clone()]));
        expect_series_data(&mut api, "s-1", 1);

        let report = sync_club(&cache, &api, "42", &options()).await.unwrap();

        assert_eq!(report.refreshed, vec!["s-1".to_string()]);
    }

    #[tokio::test]
    async fn sync_club_filters_inactive_and_competition_teams_and_dedups_series() {
        let (_temp_dir, cache) = create_test_cache();

        let mut inactive = team("t-3", "s-3");
        inactive.status = TeamStatus::Inactive;
        let mut cup = team("t-4", "s-4");
        cup.league_type = LeagueType::Competition;

        let mut api = MockLeagueApi::new();
        expect_club(
            &mut api,
            club(vec![team("t-1", "s-1"), team("t-2", "s-1"), inactive, cup]),
        );
        api.expect_fetch_match_series_catalog().returning(|| {
            Ok(vec![
                series("s-1", 1),
                series("s-3", 1),
                series("s-4", 1),
            ])
        });
        expect_series_data(&mut api, "s-1", 1);

        let report = sync_club(&cache, &api, "42", &options()).await.unwrap();

        assert_eq!(report.teams, 2);
        assert_eq!(report.series_checked, 1);
        assert_eq!(report.refreshed, vec!["s-1".to_string()]);
    }

    #[tokio::test]
    async fn sync_club_continues_when_one_series_fails() {
        let (_temp_dir, cache) = create_test_cache();

        let mut api = MockLeagueApi::new();
        expect_club(&mut api, club(vec![team("t-1", "s-1"), team("t-2", "s-2")]));
        api.expect_fetch_match_series_catalog()
            .returning(|| Ok(vec![series("s-1", 1), series("s-2", 1)]));
        api.expect_fetch_matches()
            .withf(|s| s == "s-1")
            .returning(|_| Err(ApiError::Reported("series locked".to_string())));
        api.expect_fetch_rankings()
            .withf(|s| s == "s-1")
            .returning(|_| Ok(vec![]));
        expect_series_data(&mut api, "s-2", 1);

        let report = sync_club(&cache, &api, "42", &options()).await.unwrap();

        assert_eq!(report.refreshed, vec!["s-2".to_string()]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].match_series_uuid, "s-1");
        // Failed series keeps no watermark, so it is retried next run
        assert_eq!(cache.get_watermark("s-1").unwrap(), None);
        assert!(cache.get_watermark("s-2").unwrap().is_some());
    }

    #[tokio::test]
    async fn sync_club_retries_transient_failures() {
        let (_temp_dir, cache) = create_test_cache();

        let mut api = MockLeagueApi::new();
        expect_club(&mut api, club(vec![team("t-1", "s-1")]));
        api.expect_fetch_match_series_catalog()
            .returning(|| Ok(vec![series("s-1", 1)]));

        let mut calls = 0;
        api.expect_fetch_matches().times(2).returning(move |s| {
            calls += 1;
            if calls == 1 {
                Err(ApiError::Status {
                    status: 502,
                    body: String::new(),
                })
            } else {
                Ok(vec![game("m-1", s, "01.02.2025", "t-1", "x")])
            }
        });
        api.expect_fetch_rankings().returning(|_| Ok(vec![]));

        let mut opts = options();
        opts.retries = 1;
        let report = sync_club(&cache, &api, "42", &opts).await.unwrap();

        assert_eq!(report.refreshed, vec!["s-1".to_string()]);
    }

    #[tokio::test]
    async fn sync_club_falls_back_to_cached_club_catalog() {
        let (_temp_dir, cache) = create_test_cache();
        cache.save_club(&club(vec![team("t-1", "s-1")])).unwrap();

        let mut api = MockLeagueApi::new();
        api.expect_fetch_club()
            .returning(|_| Err(ApiError::Timeout));
        api.expect_fetch_seasons().returning(|| Ok(vec![]));
        api.expect_fetch_match_series_catalog()
            .returning(|| Ok(vec![series("s-1", 1)]));
        expect_series_data(&mut api, "s-1", 1);

        let report = sync_club(&cache, &api, "42", &options()).await.unwrap();

        assert_eq!(report.refreshed, vec!["s-1".to_string()]);
    }

    #[tokio::test]
    async fn sync_club_fails_without_any_club_catalog() {
        let (_temp_dir, cache) = create_test_cache();

        let mut api = MockLeagueApi::new();
        api.expect_fetch_club()
            .returning(|_| Err(ApiError::Timeout));
        api.expect_fetch_match_series_catalog().times(0);

        let result = sync_club(&cache, &api, "42", &options()).await;

        assert!(matches!(result, Err(SyncError::Catalog(ApiError::Timeout))));
    }

    #[tokio::test]
    async fn sync_club_records_series_missing_from_catalog() {
        let (_temp_dir, cache) = create_test_cache();

        let mut api = MockLeagueApi::new();
        expect_club(&mut api, club(vec![team("t-1", "s-gone")]));
        api.expect_fetch_match_series_catalog()
            .returning(|| Ok(vec![series("s-1", 1)]));
        api.expect_fetch_matches().times(0);

        let report = sync_club(&cache, &api, "42", &options()).await.unwrap();

        assert_eq!(report.missing_from_catalog, vec!["s-gone".to_string()]);
    }

    #[tokio::test]
    async fn sync_club_stops_on_storage_failure_without_advancing_watermark() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let cache = Cache::new(&db_path).unwrap();
        // Break the matches table behind the cache's back
        rusqlite::Connection::open(&db_path)
            .unwrap()
            .execute("DROP TABLE matches", [])
            .unwrap();

        let mut api = MockLeagueApi::new();
        expect_club(&mut api, club(vec![team("t-1", "s-1")]));
        api.expect_fetch_match_series_catalog()
            .returning(|| Ok(vec![series("s-1", 1)]));
        expect_series_data(&mut api, "s-1", 1);

        let result = sync_club(&cache, &api, "42", &options()).await;

        assert!(matches!(result, Err(SyncError::Storage(_))));
        assert_eq!(cache.get_watermark("s-1").unwrap(), None);
    }

    #[tokio::test]
    async fn sync_teams_includes_inactive_teams_on_demand() {
        let (_temp_dir, cache) = create_test_cache();
        let mut inactive = team("t-9", "s-9");
        inactive.status = TeamStatus::Inactive;
        cache
            .save_club(&club(vec![team("t-1", "s-1"), inactive]))
            .unwrap();

        let mut api = MockLeagueApi::new();
        api.expect_fetch_club().times(0);
        api.expect_fetch_match_series_catalog()
            .returning(|| Ok(vec![series("s-1", 1), series("s-9", 1)]));
        expect_series_data(&mut api, "s-9", 1);

        let report = sync_teams(&cache, &api, "42", &["t-9".to_string()], &options())
            .await
            .unwrap();

        assert_eq!(report.teams, 1);
        assert_eq!(report.refreshed, vec!["s-9".to_string()]);
    }
}
