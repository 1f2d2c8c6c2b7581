use crate::commands::store::{lookback_cutoff, SnapshotStore, TitleCatalog, TrendSink};
use crate::error::{Error, Result};
use crate::models::snapshot::{RatingObservation, RatingSource, SnapshotRecord};
use crate::models::title::Title;
use crate::models::trend::{StoredTrend, TrendResult, TrendStatus};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

const DB_SCHEMA_VERSION: i64 = 1;

pub fn initialize_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "PRAGMA foreign_keys = ON;
         PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;",
    )?;

    let version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    if version < 1 {
        apply_migration_1(conn)?;
        conn.pragma_update(None, "user_version", 1)?;
    }

    if version > DB_SCHEMA_VERSION {
        // Written by a newer build; leave the version alone.
        log::warn!("database schema version {version} is newer than {DB_SCHEMA_VERSION}");
    }

    Ok(())
}

fn apply_migration_1(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS titles (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            release_date INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS review_snapshots (
            title_id TEXT NOT NULL REFERENCES titles(id) ON DELETE CASCADE,
            source TEXT NOT NULL CHECK(source IN ('rotten_tomatoes', 'imdb', 'metacritic', 'letterboxd')),
            period_start INTEGER NOT NULL,
            total_reviews INTEGER NOT NULL DEFAULT 0,
            new_reviews_in_period INTEGER NOT NULL DEFAULT 0,
            critic_score REAL,
            audience_score REAL,
            review_velocity REAL NOT NULL DEFAULT 0,
            score_change REAL DEFAULT 0,
            PRIMARY KEY (title_id, source, period_start)
        );

        CREATE TABLE IF NOT EXISTS title_trends (
            title_id TEXT PRIMARY KEY,
            status TEXT NOT NULL CHECK(status IN ('trending_up', 'trending_down', 'stable', 'sleeper_hit')),
            confidence REAL NOT NULL DEFAULT 0,
            avg_daily_reviews REAL NOT NULL DEFAULT 0,
            growth_rate_percent REAL NOT NULL DEFAULT 0,
            score_momentum REAL NOT NULL DEFAULT 0,
            has_suspicious_activity INTEGER NOT NULL DEFAULT 0,
            spike_period INTEGER,
            spike_magnitude REAL,
            snapshot_count INTEGER NOT NULL DEFAULT 0,
            calculated_at INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_review_snapshots_title_period ON review_snapshots(title_id, period_start);
        CREATE INDEX IF NOT EXISTS idx_titles_release_date ON titles(release_date);
        ",
    )
}

pub fn open_database(db_path: impl AsRef<Path>) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    initialize_schema(&conn)?;
    Ok(conn)
}

/// SQLite-backed snapshot store, trend sink and title catalog.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::from_connection(open_database(db_path)?))
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self { conn: Mutex::new(conn) }
    }

    fn connection(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::SnapshotStore("database connection lock poisoned".to_string()))
    }

    pub fn upsert_title(&self, title: &Title) -> Result<()> {
        self.connection()?.execute(
            "INSERT INTO titles (id, name, release_date) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name, release_date = excluded.release_date",
            params![title.id, title.name, title.release_date],
        )?;
        Ok(())
    }

    pub fn insert_snapshot(&self, snapshot: &SnapshotRecord) -> Result<()> {
        let conn = self.connection()?;
        upsert_snapshot_with_conn(&conn, snapshot)?;
        Ok(())
    }

    pub fn insert_snapshots(&self, snapshots: &[SnapshotRecord]) -> Result<()> {
        let conn = self.connection()?;
        let tx = conn.unchecked_transaction()?;
        for snapshot in snapshots {
            upsert_snapshot_with_conn(&tx, snapshot)?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Derive a snapshot from `observation` against the latest earlier period of
    /// the same title and source, and store it. The next later period, if any,
    /// is re-diffed against it in the same transaction.
    pub fn record_observation(&self, observation: &RatingObservation) -> Result<SnapshotRecord> {
        let conn = self.connection()?;
        let tx = conn.unchecked_transaction()?;

        let release_date: i64 = tx
            .query_row(
                "SELECT release_date FROM titles WHERE id = ?1",
                params![observation.title_id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| Error::SnapshotStore(format!("Unknown title: {}", observation.title_id)))?;

        let neighbour = |query: &str| {
            tx.query_row(
                &format!(
                    "SELECT {SNAPSHOT_COLUMNS} FROM review_snapshots
                     WHERE title_id = ?1 AND source = ?2 AND {query} LIMIT 1"
                ),
                params![observation.title_id, observation.source.as_str(), observation.period_start],
                snapshot_from_row,
            )
            .optional()
        };
        let previous = neighbour("period_start < ?3 ORDER BY period_start DESC")?;
        let next = neighbour("period_start > ?3 ORDER BY period_start ASC")?;

        let snapshot = SnapshotRecord::derive(observation, previous.as_ref(), release_date);
        upsert_snapshot_with_conn(&tx, &snapshot)?;

        if let Some(mut next) = next {
            next.rebase_on(&snapshot);
            upsert_snapshot_with_conn(&tx, &next)?;
        }

        tx.commit()?;
        Ok(snapshot)
    }
}

const SNAPSHOT_COLUMNS: &str = "title_id, source, period_start, total_reviews, new_reviews_in_period, critic_score, audience_score, review_velocity, score_change";

fn upsert_snapshot_with_conn(conn: &Connection, snapshot: &SnapshotRecord) -> rusqlite::Result<()> {
    conn.execute(
        "
        INSERT INTO review_snapshots (
            title_id,
            source,
            period_start,
            total_reviews,
            new_reviews_in_period,
            critic_score,
            audience_score,
            review_velocity,
            score_change
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        ON CONFLICT(title_id, source, period_start) DO UPDATE SET
            total_reviews = excluded.total_reviews,
            new_reviews_in_period = excluded.new_reviews_in_period,
            critic_score = excluded.critic_score,
            audience_score = excluded.audience_score,
            review_velocity = excluded.review_velocity,
            score_change = excluded.score_change
        ",
        params![
            snapshot.title_id,
            snapshot.source.as_str(),
            snapshot.period_start,
            snapshot.total_reviews,
            snapshot.new_reviews_in_period,
            snapshot.critic_score,
            snapshot.audience_score,
            snapshot.review_velocity,
            snapshot.score_change,
        ],
    )?;

    Ok(())
}

fn parse_column<T: FromStr<Err = String>>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}

fn snapshot_from_row(row: &Row<'_>) -> rusqlite::Result<SnapshotRecord> {
    Ok(SnapshotRecord {
        title_id: row.get(0)?,
        source: parse_column(row, 1)?,
        period_start: row.get(2)?,
        total_reviews: row.get(3)?,
        new_reviews_in_period: row.get(4)?,
        critic_score: row.get(5)?,
        audience_score: row.get(6)?,
        review_velocity: row.get(7)?,
        score_change: row.get(8)?,
    })
}

impl SnapshotStore for SqliteStore {
    fn fetch_snapshots(
        &self,
        title_id: &str,
        source: Option<RatingSource>,
        lookback_days: u32,
    ) -> Result<Vec<SnapshotRecord>> {
        let cutoff = lookback_cutoff(chrono::Utc::now().timestamp(), lookback_days);
        let conn = self.connection()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM review_snapshots
             WHERE title_id = ?1 AND period_start >= ?2 AND (?3 IS NULL OR source = ?3)
             ORDER BY period_start ASC, source ASC"
        ))?;

        let snapshots = stmt
            .query_map(
                params![title_id, cutoff, source.map(|s| s.as_str())],
                snapshot_from_row,
            )?
            .filter_map(|r| match r {
                Ok(snapshot) => Some(snapshot),
                Err(e) => {
                    log::warn!("skipping unreadable snapshot row for {title_id}: {e}");
                    None
                }
            })
            .collect();

        Ok(snapshots)
    }
}

impl TrendSink for SqliteStore {
    fn upsert_trend(&self, title_id: &str, trend: &TrendResult) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let conn = self
            .conn
            .lock()
            .map_err(|_| Error::TrendSink("database connection lock poisoned".to_string()))?;

        conn.execute(
            "
            INSERT INTO title_trends (
                title_id,
                status,
                confidence,
                avg_daily_reviews,
                growth_rate_percent,
                score_momentum,
                has_suspicious_activity,
                spike_period,
                spike_magnitude,
                snapshot_count,
                calculated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ON CONFLICT(title_id) DO UPDATE SET
                status = excluded.status,
                confidence = excluded.confidence,
                avg_daily_reviews = excluded.avg_daily_reviews,
                growth_rate_percent = excluded.growth_rate_percent,
                score_momentum = excluded.score_momentum,
                has_suspicious_activity = excluded.has_suspicious_activity,
                spike_period = excluded.spike_period,
                spike_magnitude = excluded.spike_magnitude,
                snapshot_count = excluded.snapshot_count,
                calculated_at = excluded.calculated_at
            ",
            params![
                title_id,
                trend.status.as_str(),
                trend.confidence,
                trend.avg_daily_reviews,
                trend.growth_rate_percent,
                trend.score_momentum,
                trend.has_suspicious_activity as i32,
                trend.spike_period,
                trend.spike_magnitude,
                trend.snapshot_count as i64,
                now,
            ],
        )?;

        Ok(())
    }

    fn load_trend(&self, title_id: &str) -> Result<Option<StoredTrend>> {
        let trend = self
            .connection()?
            .query_row(
                "SELECT title_id, status, confidence, avg_daily_reviews, growth_rate_percent, score_momentum,
                        has_suspicious_activity, spike_period, spike_magnitude, snapshot_count, calculated_at
                 FROM title_trends WHERE title_id = ?1",
                params![title_id],
                |row| {
                    Ok(StoredTrend {
                        title_id: row.get(0)?,
                        trend: TrendResult {
                            status: parse_column::<TrendStatus>(row, 1)?,
                            confidence: row.get(2)?,
                            avg_daily_reviews: row.get(3)?,
                            growth_rate_percent: row.get(4)?,
                            score_momentum: row.get(5)?,
                            has_suspicious_activity: row.get::<_, i32>(6)? != 0,
                            spike_period: row.get(7)?,
                            spike_magnitude: row.get(8)?,
                            snapshot_count: row.get::<_, i64>(9)? as usize,
                        },
                        calculated_at: row.get(10)?,
                    })
                },
            )
            .optional()?;

        Ok(trend)
    }
}

impl TitleCatalog for SqliteStore {
    fn list_active_titles(&self, days: u32) -> Result<Vec<Title>> {
        let cutoff = lookback_cutoff(chrono::Utc::now().timestamp(), days);
        let conn = self.connection()?;

        let mut stmt = conn.prepare(
            "SELECT id, name, release_date FROM titles WHERE release_date > ?1 ORDER BY release_date DESC",
        )?;

        let titles = stmt
            .query_map(params![cutoff], |row| {
                Ok(Title {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    release_date: row.get(2)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();

        Ok(titles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::store::SECONDS_PER_DAY;

    fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }

    fn seeded_store() -> SqliteStore {
        let store = SqliteStore::open_in_memory().expect("in-memory store");
        store
            .upsert_title(&Title {
                id: "m1".to_string(),
                name: "Quiet Harbor".to_string(),
                release_date: now() - 10 * SECONDS_PER_DAY,
            })
            .expect("insert title");
        store
    }

    fn observation(days_ago: i64, total: i64, critic: Option<f64>) -> RatingObservation {
        RatingObservation {
            title_id: "m1".to_string(),
            source: RatingSource::RottenTomatoes,
            period_start: now() - days_ago * SECONDS_PER_DAY,
            total_reviews: total,
            critic_score: critic,
            audience_score: Some(88.0),
        }
    }

    #[test]
    fn schema_initializes_with_expected_version() {
        let conn = Connection::open_in_memory().expect("in-memory db");
        initialize_schema(&conn).expect("schema init");
        let version: i64 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .expect("schema version");
        assert_eq!(version, DB_SCHEMA_VERSION);
    }

    #[test]
    fn schema_initialization_is_idempotent() {
        let conn = Connection::open_in_memory().expect("in-memory db");
        initialize_schema(&conn).expect("first init");
        conn.pragma_update(None, "user_version", 0).expect("rewind version");
        initialize_schema(&conn).expect("second init");

        let columns: Vec<String> = conn
            .prepare("PRAGMA table_info(title_trends)")
            .expect("table info")
            .query_map([], |row| row.get::<_, String>(1))
            .expect("columns")
            .filter_map(|r| r.ok())
            .collect();
        assert_eq!(columns.iter().filter(|c| *c == "snapshot_count").count(), 1);
    }

    #[test]
    fn recorded_observations_diff_against_prior_period() {
        let store = seeded_store();
        store.record_observation(&observation(3, 100, Some(70.0))).expect("day 1");
        let second = store.record_observation(&observation(2, 140, Some(76.0))).expect("day 2");

        assert_eq!(second.new_reviews_in_period, 40);
        assert_eq!(second.score_change, Some(6.0));
        assert!((second.review_velocity - 140.0 / 8.0).abs() < 1e-9);
    }

    #[test]
    fn backfilled_observation_rebases_the_following_period() {
        let store = seeded_store();
        store.record_observation(&observation(3, 40, Some(60.0))).expect("day 3");
        store.record_observation(&observation(1, 100, Some(66.0))).expect("day 1");
        let middle = store.record_observation(&observation(2, 70, Some(62.0))).expect("day 2");
        assert_eq!(middle.new_reviews_in_period, 30);

        let window = store
            .fetch_snapshots("m1", Some(RatingSource::RottenTomatoes), 7)
            .expect("fetch");
        let new_reviews: Vec<i64> = window.iter().map(|s| s.new_reviews_in_period).collect();
        let score_changes: Vec<Option<f64>> = window.iter().map(|s| s.score_change).collect();

        assert_eq!(new_reviews, vec![0, 30, 30]);
        assert_eq!(score_changes, vec![Some(0.0), Some(2.0), Some(4.0)]);
        assert!(crate::analysis::quality::check_series(&window).is_empty());
    }

    #[test]
    fn insert_snapshot_replaces_same_period() {
        let store = seeded_store();
        let first = store.record_observation(&observation(2, 50, None)).expect("record");
        let mut corrected = first.clone();
        corrected.total_reviews = 55;
        store.insert_snapshot(&corrected).expect("insert");

        let window = store.fetch_snapshots("m1", None, 7).expect("fetch");
        assert_eq!(window.len(), 1);
        assert_eq!(window[0].total_reviews, 55);
    }

    #[test]
    fn fetch_returns_window_in_order() {
        let store = seeded_store();
        for (days_ago, total) in [(1, 30), (9, 5), (3, 20)] {
            store.record_observation(&observation(days_ago, total, None)).expect("record");
        }

        let window = store
            .fetch_snapshots("m1", Some(RatingSource::RottenTomatoes), 7)
            .expect("fetch");
        let totals: Vec<i64> = window.iter().map(|s| s.total_reviews).collect();
        assert_eq!(totals, vec![20, 30]);

        let other_source = store.fetch_snapshots("m1", Some(RatingSource::Imdb), 7).expect("fetch");
        assert!(other_source.is_empty());
    }

    #[test]
    fn trend_upsert_round_trip_overwrites_all_fields() {
        let store = seeded_store();
        let first = TrendResult {
            status: TrendStatus::SleeperHit,
            confidence: 0.8,
            avg_daily_reviews: 12.5,
            growth_rate_percent: 150.0,
            score_momentum: 1.25,
            has_suspicious_activity: true,
            spike_period: Some(1_700_000_000),
            spike_magnitude: Some(5.5),
            snapshot_count: 7,
        };
        store.upsert_trend("m1", &first).expect("first upsert");
        assert_eq!(store.load_trend("m1").expect("load").expect("row").trend, first);

        store.upsert_trend("m1", &TrendResult::neutral()).expect("reset");
        let stored = store.load_trend("m1").expect("load").expect("row");
        assert_eq!(stored.trend, TrendResult::neutral());
        assert!(stored.calculated_at > 0);
    }

    #[test]
    fn missing_trend_loads_as_none() {
        let store = seeded_store();
        assert!(store.load_trend("nope").expect("load").is_none());
    }
}
