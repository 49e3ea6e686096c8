//! Scheduled and manual sync triggers
//!
//! Scheduled, manual and on-demand triggers all go through the scheduler,
//! which applies the same guards: an in-process single-flight flag, then the persistent
//! run lease and minimum interval in the run store. A trigger that hits a
//! guard is skipped, never queued.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Local, NaiveDateTime, NaiveTime, Utc};
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::league::api::LeagueApi;
use crate::league::store::{CacheRepository, RunStart, SyncRunStore, WatermarkStore};
use crate::sync::refresh::{SyncError, SyncOptions, SyncReport, sync_club, sync_teams};

/// At most one holder at a time; the flag is released when the guard drops
#[derive(Debug, Default)]
pub struct SingleFlight {
    running: AtomicBool,
}

pub struct FlightGuard<'a> {
    running: &'a AtomicBool,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self) -> Option<FlightGuard<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlightGuard {
                running: &self.running,
            })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    Completed(SyncReport),
    /// A run was already in progress (this process or another)
    SkippedInFlight,
    /// The previous run started less than the minimum interval ago
    SkippedTooSoon { next_allowed: DateTime<Utc> },
}

pub struct SyncScheduler<S> {
    store: Arc<S>,
    api: Arc<dyn LeagueApi>,
    club_id: String,
    options: SyncOptions,
    min_interval_ms: i64,
    lease_timeout_ms: i64,
    flight: SingleFlight,
    lease_held: AtomicBool,
}

impl<S> SyncScheduler<S>
where
    S: CacheRepository + WatermarkStore + SyncRunStore,
{
    pub fn new(
        store: Arc<S>,
        api: Arc<dyn LeagueApi>,
        club_id: &str,
        options: SyncOptions,
        min_interval_ms: i64,
        lease_timeout_ms: i64,
    ) -> Self {
        Self {
            store,
            api,
            club_id: club_id.to_string(),
            options,
            min_interval_ms,
            lease_timeout_ms,
            flight: SingleFlight::new(),
            lease_held: AtomicBool::new(false),
        }
    }

    /// Run a routine sync now unless a guard says otherwise
    pub async fn trigger(&self) -> Result<TriggerOutcome, SyncError> {
        self.guarded(|| sync_club(&*self.store, &*self.api, &self.club_id, &self.options))
            .await
    }

    /// Run an on-demand sync of `team_keys` behind the same guards as [`Self::trigger`]
    pub async fn trigger_teams(&self, team_keys: &[String]) -> Result<TriggerOutcome, SyncError> {
        self.guarded(|| {
            sync_teams(
                &*self.store,
                &*self.api,
                &self.club_id,
                team_keys,
                &self.options,
            )
        })
        .await
    }

    async fn guarded<F, Fut>(&self, run: F) -> Result<TriggerOutcome, SyncError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<SyncReport, SyncError>>,
    {
        let Some(_flight) = self.flight.try_acquire() else {
            info!("Sync for club {} already running, skipping trigger", self.club_id);
            return Ok(TriggerOutcome::SkippedInFlight);
        };

        match self.store.try_start_run(
            &self.club_id,
            self.min_interval_ms,
            self.lease_timeout_ms,
        )? {
            RunStart::Started => {}
            RunStart::InFlight { since_ms } => {
                info!(
                    "Sync for club {} is held by another process since {}, skipping",
                    self.club_id,
                    format_ms(since_ms)
                );
                return Ok(TriggerOutcome::SkippedInFlight);
            }
            RunStart::TooSoon { next_allowed_ms } => {
                let next_allowed =
                    DateTime::from_timestamp_millis(next_allowed_ms).unwrap_or_else(Utc::now);
                info!(
                    "Sync for club {} ran recently, next run allowed at {}",
                    self.club_id, next_allowed
                );
                return Ok(TriggerOutcome::SkippedTooSoon { next_allowed });
            }
        }
        self.lease_held.store(true, Ordering::Release);

        let result = run().await;

        self.release_lease();
        result.map(TriggerOutcome::Completed)
    }

    fn release_lease(&self) {
        if self.lease_held.swap(false, Ordering::AcqRel) {
            let _ = self
                .store
                .finish_run(&self.club_id)
                .inspect_err(|e| error!("Failed to release run lease for {}: {}", self.club_id, e));
        }
    }

    /// Trigger once a day at `daily_at` local time until `shutdown` resolves.
    ///
    /// A run in progress at shutdown is dropped; its unwritten series keep
    /// their old watermark and are fetched on the next run.
    pub async fn run_daily(
        &self,
        daily_at: NaiveTime,
        run_immediately: bool,
        shutdown: impl Future<Output = ()>,
    ) {
        tokio::pin!(shutdown);

        let mut run_now = run_immediately;
        loop {
            if !run_now {
                let now = Local::now().naive_local();
                let next = next_run_after(now, daily_at);
                let wait = (next - now).to_std().unwrap_or_default();
                info!("Next scheduled sync at {}", next);

                tokio::select! {
                    _ = sleep(wait) => {}
                    _ = &mut shutdown => break,
                }
            }
            run_now = false;

            tokio::select! {
                outcome = self.trigger() => match outcome {
                    Ok(TriggerOutcome::Completed(_)) => {}
                    Ok(skipped) => info!("Scheduled sync skipped: {:?}", skipped),
                    Err(e) => error!("Scheduled sync failed: {}", e),
                },
                _ = &mut shutdown => {
                    warn!("Shutdown requested, abandoning sync in progress");
                    self.release_lease();
                    break;
                }
            }
        }

        info!("Scheduler stopped");
    }
}

/// Next local occurrence of `at` strictly after `now`
pub fn next_run_after(now: NaiveDateTime, at: NaiveTime) -> NaiveDateTime {
    let today = now.date().and_time(at);
    if today > now {
        today
    } else {
        today + chrono::Duration::days(1)
    }
}

fn format_ms(ms: i64) -> String {
    DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| ms.to_string())
}
