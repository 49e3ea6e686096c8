use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params_from_iter};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::league::error::CacheError;
use crate::league::store::{
    CacheRepository, RunStart, SyncRunStore, TeamSnapshot, WatermarkStore,
};
use crate::league::types::{Club, Match, MatchSeries, RankingEntry, Season, Watermark};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS clubs (
    id TEXT PRIMARY KEY,
    payload TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS teams (
    uuid TEXT PRIMARY KEY,
    club_id TEXT NOT NULL,
    match_series_uuid TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_teams_club_id ON teams(club_id);

CREATE TABLE IF NOT EXISTS seasons (
    id TEXT PRIMARY KEY,
    begin TEXT,
    payload TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS match_series (
    uuid TEXT PRIMARY KEY,
    id TEXT NOT NULL,
    payload TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS matches (
    match_series_uuid TEXT NOT NULL,
    uuid TEXT NOT NULL,
    position INTEGER NOT NULL,
    payload TEXT NOT NULL,
    PRIMARY KEY (match_series_uuid, uuid)
);

CREATE TABLE IF NOT EXISTS rankings (
    match_series_uuid TEXT NOT NULL,
    position INTEGER NOT NULL,
    payload TEXT NOT NULL,
    PRIMARY KEY (match_series_uuid, position)
);

CREATE TABLE IF NOT EXISTS watermarks (
    match_series_uuid TEXT PRIMARY KEY,
    structure_updated TEXT NOT NULL,
    results_updated TEXT NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS sync_runs (
    club_id TEXT PRIMARY KEY,
    running_since INTEGER,
    last_started INTEGER,
    last_finished INTEGER
);
"#;

/// SQLite-backed cache repository, watermark store and run ledger
pub struct Cache {
    conn: Mutex<Connection>,
}

fn to_json<T: Serialize>(value: &T) -> Result<String, CacheError> {
    Ok(serde_json::to_string(value)?)
}

fn from_json<T: DeserializeOwned>(payload: &str) -> Result<T, CacheError> {
    Ok(serde_json::from_str(payload)?)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, CacheError> {
    Ok(DateTime::parse_from_rfc3339(raw)?.with_timezone(&Utc))
}

impl Cache {
    pub fn new(db_path: &Path) -> Result<Self, CacheError> {
        info!("Initializing cache database at {:?}", db_path);

        let conn = Connection::open(db_path)?;

        // Enable WAL mode so readers see a snapshot while a sync writes
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        debug!("Database connection established");

        conn.execute_batch(SCHEMA)?;
        info!("Cache initialized successfully");

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Acquire database connection lock with proper error handling
    fn lock_conn(&self) -> Result<MutexGuard<'_, Connection>, CacheError> {
        self.conn.lock().map_err(|_| CacheError::LockPoisoned)
    }

    /// Get current timestamp in milliseconds since UNIX epoch
    fn current_timestamp_ms() -> i64 {
        Utc::now().timestamp_millis()
    }

    fn load_matches(conn: &Connection, match_series_uuid: &str) -> Result<Vec<Match>, CacheError> {
        let mut stmt = conn.prepare(
            "SELECT payload FROM matches WHERE match_series_uuid = ?1 ORDER BY position",
        )?;
        let payloads = stmt
            .query_map([match_series_uuid], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        payloads.iter().map(|p| from_json(p)).collect()
    }

    fn load_rankings(
        conn: &Connection,
        match_series_uuid: &str,
    ) -> Result<Vec<RankingEntry>, CacheError> {
        let mut stmt = conn.prepare(
            "SELECT payload FROM rankings WHERE match_series_uuid = ?1 ORDER BY position",
        )?;
        let payloads = stmt
            .query_map([match_series_uuid], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        payloads.iter().map(|p| from_json(p)).collect()
    }

    fn load_series(
        conn: &Connection,
        match_series_uuid: &str,
    ) -> Result<Option<MatchSeries>, CacheError> {
        let payload: Option<String> = conn
            .query_row(
                "SELECT payload FROM match_series WHERE uuid = ?1",
                [match_series_uuid],
                |row| row.get(0),
            )
            .optional()?;

        payload.as_deref().map(from_json).transpose()
    }
}

impl CacheRepository for Cache {
    fn save_club(&self, club: &Club) -> Result<(), CacheError> {
        let payload = to_json(club)?;

        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;

        let changed = tx.execute(
            r#"
            INSERT INTO clubs (id, payload) VALUES (?1, ?2)
            ON CONFLICT(id) DO UPDATE SET payload = excluded.payload
            WHERE clubs.payload != excluded.payload
            "#,
            (&club.id, &payload),
        )?;

        if changed == 0 {
            debug!("Club catalog {} unchanged", club.id);
            return Ok(());
        }

        tx.execute("DELETE FROM teams WHERE club_id = ?1", [&club.id])?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO teams (uuid, club_id, match_series_uuid) VALUES (?1, ?2, ?3)",
            )?;
            for team in &club.teams {
                stmt.execute((&team.uuid, &club.id, &team.match_series_uuid))?;
            }
        }

        tx.commit()?;
        debug!("Saved club {} with {} teams", club.id, club.teams.len());
        Ok(())
    }

    fn club(&self, club_id: &str) -> Result<Option<Club>, CacheError> {
        let conn = self.lock_conn()?;
        let payload: Option<String> = conn
            .query_row("SELECT payload FROM clubs WHERE id = ?1", [club_id], |row| {
                row.get(0)
            })
            .optional()?;

        payload.as_deref().map(from_json).transpose()
    }

    fn save_seasons(&self, seasons: &[Season]) -> Result<(), CacheError> {
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO seasons (id, begin, payload) VALUES (?1, ?2, ?3)
                ON CONFLICT(id) DO UPDATE SET begin = excluded.begin, payload = excluded.payload
                WHERE seasons.payload != excluded.payload
                "#,
            )?;
            for season in seasons {
                let begin = season.begin.map(|d| d.format("%Y-%m-%d").to_string());
                stmt.execute((&season.id, begin, to_json(season)?))?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn seasons(&self) -> Result<Vec<Season>, CacheError> {
        let conn = self.lock_conn()?;
        // NULL begins sort last
        let mut stmt = conn.prepare(
            "SELECT payload FROM seasons ORDER BY begin IS NULL, begin DESC, id",
        )?;
        let payloads = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        payloads.iter().map(|p| from_json(p)).collect()
    }

    fn replace_series(
        &self,
        series: &MatchSeries,
        matches: &[Match],
        rankings: &[RankingEntry],
    ) -> Result<(), CacheError> {
        debug!(
            "Replacing series {} with {} matches and {} ranking rows",
            series.uuid,
            matches.len(),
            rankings.len()
        );

        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;

        tx.execute(
            r#"
            INSERT INTO match_series (uuid, id, payload) VALUES (?1, ?2, ?3)
            ON CONFLICT(uuid) DO UPDATE SET id = excluded.id, payload = excluded.payload
            "#,
            (&series.uuid, &series.id, to_json(series)?),
        )?;

        tx.execute(
            "DELETE FROM matches WHERE match_series_uuid = ?1",
            [&series.uuid],
        )?;
        {
            // First occurrence of a uuid wins
            let mut stmt = tx.prepare(
                r#"
                INSERT OR IGNORE INTO matches (match_series_uuid, uuid, position, payload)
                VALUES (?1, ?2, ?3, ?4)
                "#,
            )?;
            for (position, m) in matches.iter().enumerate() {
                stmt.execute((&series.uuid, &m.uuid, position as i64, to_json(m)?))?;
            }
        }

        tx.execute(
            "DELETE FROM rankings WHERE match_series_uuid = ?1",
            [&series.uuid],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO rankings (match_series_uuid, position, payload) VALUES (?1, ?2, ?3)",
            )?;
            for (position, entry) in rankings.iter().enumerate() {
                stmt.execute((&series.uuid, position as i64, to_json(entry)?))?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    fn series(&self, match_series_uuid: &str) -> Result<Option<MatchSeries>, CacheError> {
        let conn = self.lock_conn()?;
        Self::load_series(&conn, match_series_uuid)
    }

    fn matches(&self, match_series_uuid: &str) -> Result<Vec<Match>, CacheError> {
        let conn = self.lock_conn()?;
        Self::load_matches(&conn, match_series_uuid)
    }

    fn rankings(&self, match_series_uuid: &str) -> Result<Vec<RankingEntry>, CacheError> {
        let conn = self.lock_conn()?;
        Self::load_rankings(&conn, match_series_uuid)
    }

    fn team_snapshot(&self, team_uuids: &[String]) -> Result<TeamSnapshot, CacheError> {
        if team_uuids.is_empty() {
            return Ok(TeamSnapshot::default());
        }

        let mut conn = self.lock_conn()?;
        // A read transaction pins one WAL snapshot for all queries below
        let tx = conn.transaction()?;

        let placeholders: Vec<_> = (0..team_uuids.len())
            .map(|i| format!("?{}", i + 1))
            .collect();
        let query = format!(
            "SELECT DISTINCT match_series_uuid FROM teams WHERE uuid IN ({}) ORDER BY match_series_uuid",
            placeholders.join(", ")
        );

        let series_uuids = {
            let mut stmt = tx.prepare(&query)?;
            stmt.query_map(params_from_iter(team_uuids.iter()), |row| {
                row.get::<_, String>(0)
            })?
            .collect::<Result<Vec<_>, _>>()?
        };

        let mut snapshot = TeamSnapshot {
            series: IndexMap::new(),
            matches: Vec::new(),
            rankings: IndexMap::new(),
        };
        for uuid in &series_uuids {
            if let Some(series) = Self::load_series(&tx, uuid)? {
                snapshot.series.insert(uuid.clone(), series);
            }
            snapshot.matches.extend(Self::load_matches(&tx, uuid)?);
            let rankings = Self::load_rankings(&tx, uuid)?;
            if !rankings.is_empty() {
                snapshot.rankings.insert(uuid.clone(), rankings);
            }
        }

        tx.commit()?;
        Ok(snapshot)
    }
}

impl WatermarkStore for Cache {
    fn get_watermark(&self, match_series_uuid: &str) -> Result<Option<Watermark>, CacheError> {
        let conn = self.lock_conn()?;
        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT structure_updated, results_updated FROM watermarks WHERE match_series_uuid = ?1",
                [match_series_uuid],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        row.map(|(structure, results)| {
            Ok(Watermark {
                structure_updated: parse_timestamp(&structure)?,
                results_updated: parse_timestamp(&results)?,
            })
        })
        .transpose()
    }

    fn set_watermark(
        &self,
        match_series_uuid: &str,
        watermark: &Watermark,
    ) -> Result<(), CacheError> {
        let now = Self::current_timestamp_ms();
        let conn = self.lock_conn()?;
        conn.execute(
            r#"
            INSERT INTO watermarks (match_series_uuid, structure_updated, results_updated, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(match_series_uuid) DO UPDATE SET
                structure_updated = excluded.structure_updated,
                results_updated = excluded.results_updated,
                updated_at = excluded.updated_at
            "#,
            (
                match_series_uuid,
                watermark.structure_updated.to_rfc3339(),
                watermark.results_updated.to_rfc3339(),
                now,
            ),
        )?;
        Ok(())
    }
}

impl SyncRunStore for Cache {
    fn try_start_run(
        &self,
        club_id: &str,
        min_interval_ms: i64,
        lease_timeout_ms: i64,
    ) -> Result<RunStart, CacheError> {
        let now = Self::current_timestamp_ms();

        let mut conn = self.lock_conn()?;
        // IMMEDIATE takes the write lock up front so two processes cannot both start
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let row: Option<(Option<i64>, Option<i64>)> = tx
            .query_row(
                "SELECT running_since, last_started FROM sync_runs WHERE club_id = ?1",
                [club_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let (running_since, last_started) = row.unwrap_or((None, None));

        if let Some(since) = running_since.filter(|since| *since >= now - lease_timeout_ms) {
            return Ok(RunStart::InFlight { since_ms: since });
        }

        if let Some(last) = last_started.filter(|last| now - *last < min_interval_ms) {
            return Ok(RunStart::TooSoon {
                next_allowed_ms: last + min_interval_ms,
            });
        }

        tx.execute(
            r#"
            INSERT INTO sync_runs (club_id, running_since, last_started) VALUES (?1, ?2, ?2)
            ON CONFLICT(club_id) DO UPDATE SET
                running_since = excluded.running_since,
                last_started = excluded.last_started
            "#,
            (club_id, now),
        )?;
        tx.commit()?;

        Ok(RunStart::Started)
    }

    fn finish_run(&self, club_id: &str) -> Result<(), CacheError> {
        let now = Self::current_timestamp_ms();
        let conn = self.lock_conn()?;
        conn.execute(
            "UPDATE sync_runs SET running_since = NULL, last_finished = ?2 WHERE club_id = ?1",
            (club_id, now),
        )?;
        Ok(())
    }
}
