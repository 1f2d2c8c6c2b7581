use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const SECONDS_PER_DAY: i64 = 86_400;

/// Rating provider a snapshot was collected from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RatingSource {
    RottenTomatoes,
    Imdb,
    Metacritic,
    Letterboxd,
}

impl RatingSource {
    pub const ALL: [RatingSource; 4] = [
        RatingSource::RottenTomatoes,
        RatingSource::Imdb,
        RatingSource::Metacritic,
        RatingSource::Letterboxd,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RatingSource::RottenTomatoes => "rotten_tomatoes",
            RatingSource::Imdb => "imdb",
            RatingSource::Metacritic => "metacritic",
            RatingSource::Letterboxd => "letterboxd",
        }
    }
}

impl fmt::Display for RatingSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RatingSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RatingSource::ALL
            .into_iter()
            .find(|source| source.as_str() == s)
            .ok_or_else(|| format!("Unknown rating source: {s}"))
    }
}

/// One period's review volume and score for a title from one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub title_id: String,
    pub source: RatingSource,
    pub period_start: i64,
    pub total_reviews: i64,
    pub new_reviews_in_period: i64,
    pub critic_score: Option<f64>,
    pub audience_score: Option<f64>,
    pub review_velocity: f64,
    pub score_change: Option<f64>,
}

/// Raw measurement as collected, before it is diffed against the prior period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingObservation {
    pub title_id: String,
    pub source: RatingSource,
    pub period_start: i64,
    pub total_reviews: i64,
    pub critic_score: Option<f64>,
    pub audience_score: Option<f64>,
}

impl SnapshotRecord {
    /// Build the stored snapshot for `observation`, diffing against `previous`
    /// (the same title and source, one period earlier) when there is one.
    pub fn derive(
        observation: &RatingObservation,
        previous: Option<&SnapshotRecord>,
        release_date: i64,
    ) -> SnapshotRecord {
        let (new_reviews_in_period, score_change) =
            period_deltas(previous, observation.total_reviews, observation.critic_score);

        let days_since_release = ((observation.period_start - release_date) / SECONDS_PER_DAY).max(1);
        let review_velocity = observation.total_reviews.max(0) as f64 / days_since_release as f64;

        SnapshotRecord {
            title_id: observation.title_id.clone(),
            source: observation.source,
            period_start: observation.period_start,
            total_reviews: observation.total_reviews,
            new_reviews_in_period,
            critic_score: observation.critic_score,
            audience_score: observation.audience_score,
            review_velocity,
            score_change: Some(score_change),
        }
    }

    /// Recompute the period deltas against a new predecessor. Used when an
    /// earlier period is recorded after this one.
    pub fn rebase_on(&mut self, previous: &SnapshotRecord) {
        let (new_reviews, score_change) = period_deltas(Some(previous), self.total_reviews, self.critic_score);
        self.new_reviews_in_period = new_reviews;
        self.score_change = Some(score_change);
    }
}

fn period_deltas(previous: Option<&SnapshotRecord>, total_reviews: i64, critic_score: Option<f64>) -> (i64, f64) {
    let new_reviews = previous
        .map(|prev| total_reviews - prev.total_reviews)
        .unwrap_or(0);

    let score_change = match (previous.and_then(|p| p.critic_score), critic_score) {
        (Some(before), Some(now)) => now - before,
        _ => 0.0,
    };

    (new_reviews, score_change)
}
