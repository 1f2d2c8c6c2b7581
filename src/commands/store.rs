//! Collaborator traits the classifier reads from and writes to, plus an
//! in-memory implementation.

use crate::error::{Error, Result};
use crate::models::snapshot::{RatingObservation, RatingSource, SnapshotRecord};
use crate::models::title::Title;
use crate::models::trend::{StoredTrend, TrendResult};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

pub use crate::models::snapshot::SECONDS_PER_DAY;

/// Read side: snapshot windows per title.
pub trait SnapshotStore: Send + Sync {
    /// Snapshots for `title_id` from the last `lookback_days`, ascending by
    /// `period_start`. `source` restricts the result to one provider.
    fn fetch_snapshots(
        &self,
        title_id: &str,
        source: Option<RatingSource>,
        lookback_days: u32,
    ) -> Result<Vec<SnapshotRecord>>;
}

/// Write side: one trend row per title, last write wins.
pub trait TrendSink: Send + Sync {
    fn upsert_trend(&self, title_id: &str, trend: &TrendResult) -> Result<()>;

    fn load_trend(&self, title_id: &str) -> Result<Option<StoredTrend>>;
}

/// Titles eligible for batch classification.
pub trait TitleCatalog: Send + Sync {
    /// Titles released within the last `days` days, newest first.
    fn list_active_titles(&self, days: u32) -> Result<Vec<Title>>;
}

pub fn lookback_cutoff(now: i64, lookback_days: u32) -> i64 {
    now - lookback_days as i64 * SECONDS_PER_DAY
}

#[derive(Debug, Default)]
struct MemoryState {
    titles: Vec<Title>,
    snapshots: Vec<SnapshotRecord>,
    trends: HashMap<String, StoredTrend>,
}

/// Store backed by process memory. Implements every collaborator trait.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| Error::SnapshotStore("memory store lock poisoned".to_string()))
    }

    pub fn add_title(&self, title: Title) -> Result<()> {
        let mut state = self.lock()?;
        state.titles.retain(|t| t.id != title.id);
        state.titles.push(title);
        Ok(())
    }

    /// Insert or replace the snapshot for (title, source, period).
    pub fn insert_snapshot(&self, snapshot: SnapshotRecord) -> Result<()> {
        replace_snapshot(&mut *self.lock()?, snapshot);
        Ok(())
    }

    /// Derive a snapshot from `observation` against the latest earlier period
    /// and store it. The next later period, if any, is re-diffed against it.
    pub fn record_observation(&self, observation: &RatingObservation) -> Result<SnapshotRecord> {
        let mut state = self.lock()?;
        let release_date = state
            .titles
            .iter()
            .find(|t| t.id == observation.title_id)
            .map(|t| t.release_date)
            .ok_or_else(|| Error::SnapshotStore(format!("Unknown title: {}", observation.title_id)))?;

        let same_series = |s: &&SnapshotRecord| s.title_id == observation.title_id && s.source == observation.source;

        let previous = state
            .snapshots
            .iter()
            .filter(same_series)
            .filter(|s| s.period_start < observation.period_start)
            .max_by_key(|s| s.period_start);
        let snapshot = SnapshotRecord::derive(observation, previous, release_date);

        let next = state
            .snapshots
            .iter()
            .filter(same_series)
            .filter(|s| s.period_start > observation.period_start)
            .min_by_key(|s| s.period_start)
            .cloned();

        replace_snapshot(&mut state, snapshot.clone());
        if let Some(mut next) = next {
            next.rebase_on(&snapshot);
            replace_snapshot(&mut state, next);
        }

        Ok(snapshot)
    }
}

fn replace_snapshot(state: &mut MemoryState, snapshot: SnapshotRecord) {
    state.snapshots.retain(|s| {
        !(s.title_id == snapshot.title_id
            && s.source == snapshot.source
            && s.period_start == snapshot.period_start)
    });
    state.snapshots.push(snapshot);
}

impl SnapshotStore for MemoryStore {
    fn fetch_snapshots(
        &self,
        title_id: &str,
        source: Option<RatingSource>,
        lookback_days: u32,
    ) -> Result<Vec<SnapshotRecord>> {
        let cutoff = lookback_cutoff(chrono::Utc::now().timestamp(), lookback_days);
        let state = self.lock()?;

        let mut window: Vec<SnapshotRecord> = state
            .snapshots
            .iter()
            .filter(|s| s.title_id == title_id && s.period_start >= cutoff)
            .filter(|s| source.map_or(true, |wanted| s.source == wanted))
            .cloned()
            .collect();
        window.sort_by_key(|s| (s.period_start, s.source));

        Ok(window)
    }
}

impl TrendSink for MemoryStore {
    fn upsert_trend(&self, title_id: &str, trend: &TrendResult) -> Result<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| Error::TrendSink("memory store lock poisoned".to_string()))?;

        state.trends.insert(
            title_id.to_string(),
            StoredTrend {
                title_id: title_id.to_string(),
                trend: trend.clone(),
                calculated_at: chrono::Utc::now().timestamp(),
            },
        );
        Ok(())
    }

    fn load_trend(&self, title_id: &str) -> Result<Option<StoredTrend>> {
        Ok(self.lock()?.trends.get(title_id).cloned())
    }
}

impl TitleCatalog for MemoryStore {
    fn list_active_titles(&self, days: u32) -> Result<Vec<Title>> {
        let cutoff = lookback_cutoff(chrono::Utc::now().timestamp(), days);
        let mut titles: Vec<Title> = self
            .lock()?
            .titles
            .iter()
            .filter(|t| t.release_date > cutoff)
            .cloned()
            .collect();
        titles.sort_by(|a, b| b.release_date.cmp(&a.release_date));
        Ok(titles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }

    fn observation(source: RatingSource, days_ago: i64, total: i64) -> RatingObservation {
        RatingObservation {
            title_id: "m1".to_string(),
            source,
            period_start: now() - days_ago * SECONDS_PER_DAY,
            total_reviews: total,
            critic_score: Some(70.0),
            audience_score: None,
        }
    }

    fn store_with_title() -> MemoryStore {
        let store = MemoryStore::new();
        store
            .add_title(Title {
                id: "m1".to_string(),
                name: "Night Train".to_string(),
                release_date: now() - 20 * SECONDS_PER_DAY,
            })
            .expect("add title");
        store
    }

    #[test]
    fn fetch_is_ascending_and_respects_lookback() {
        let store = store_with_title();
        for (days_ago, total) in [(2, 30), (12, 5), (4, 20), (3, 25)] {
            store
                .record_observation(&observation(RatingSource::Imdb, days_ago, total))
                .expect("record");
        }

        let window = store.fetch_snapshots("m1", None, 7).expect("fetch");
        let totals: Vec<i64> = window.iter().map(|s| s.total_reviews).collect();

        assert_eq!(totals, vec![20, 25, 30]);
        assert_eq!(window[1].new_reviews_in_period, 5);
    }

    #[test]
    fn backfilled_period_rebases_the_following_snapshot() {
        let store = store_with_title();
        for (days_ago, total) in [(3, 40), (1, 100), (2, 70)] {
            store
                .record_observation(&observation(RatingSource::Imdb, days_ago, total))
                .expect("record");
        }

        let window = store.fetch_snapshots("m1", None, 7).expect("fetch");
        let new_reviews: Vec<i64> = window.iter().map(|s| s.new_reviews_in_period).collect();

        assert_eq!(new_reviews, vec![0, 30, 30]);
        assert!(crate::analysis::quality::check_series(&window).is_empty());
    }

    #[test]
    fn fetch_filters_by_source() {
        let store = store_with_title();
        store.record_observation(&observation(RatingSource::Imdb, 2, 10)).expect("record");
        store
            .record_observation(&observation(RatingSource::Metacritic, 2, 4))
            .expect("record");

        let window = store
            .fetch_snapshots("m1", Some(RatingSource::Metacritic), 7)
            .expect("fetch");

        assert_eq!(window.len(), 1);
        assert_eq!(window[0].source, RatingSource::Metacritic);
    }

    #[test]
    fn record_observation_requires_known_title() {
        let store = MemoryStore::new();
        let err = store
            .record_observation(&observation(RatingSource::Imdb, 1, 10))
            .expect_err("unknown title");
        assert!(matches!(err, Error::SnapshotStore(_)));
    }

    #[test]
    fn upsert_overwrites_previous_trend() {
        let store = MemoryStore::new();
        let mut trend = TrendResult::neutral();
        trend.confidence = 0.7;
        store.upsert_trend("m1", &trend).expect("first upsert");
        store.upsert_trend("m1", &TrendResult::neutral()).expect("second upsert");

        let stored = store.load_trend("m1").expect("load").expect("exists");
        assert_eq!(stored.trend, TrendResult::neutral());
    }

    #[test]
    fn active_titles_are_recent_and_newest_first() {
        let store = MemoryStore::new();
        for (id, days_ago) in [("old", 90), ("a", 10), ("b", 3)] {
            store
                .add_title(Title {
                    id: id.to_string(),
                    name: id.to_uppercase(),
                    release_date: now() - days_ago * SECONDS_PER_DAY,
                })
                .expect("add");
        }

        let ids: Vec<String> = store
            .list_active_titles(30)
            .expect("list")
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(ids, vec!["b".to_string(), "a".to_string()]);
    }
}
