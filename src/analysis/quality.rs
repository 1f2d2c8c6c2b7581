use crate::models::snapshot::SnapshotRecord;
use serde::Serialize;
use std::fmt;

/// An invariant violation in a snapshot series. The analysis tolerates these,
/// callers log them.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DataQualityIssue {
    NegativeNewReviews { period_start: i64, value: i64 },
    TotalReviewsDecreased { period_start: i64, previous: i64, current: i64 },
    NewReviewsMismatch { period_start: i64, expected: i64, recorded: i64 },
    PeriodNotIncreasing { period_start: i64, previous: i64 },
    ScoreOutOfRange { period_start: i64, field: &'static str, value: f64 },
}

impl fmt::Display for DataQualityIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataQualityIssue::NegativeNewReviews { period_start, value } => {
                write!(f, "negative new review count {value} at {period_start}")
            }
            DataQualityIssue::TotalReviewsDecreased { period_start, previous, current } => {
                write!(f, "total reviews fell from {previous} to {current} at {period_start}")
            }
            DataQualityIssue::NewReviewsMismatch { period_start, expected, recorded } => {
                write!(f, "new review count {recorded} at {period_start}, totals imply {expected}")
            }
            DataQualityIssue::PeriodNotIncreasing { period_start, previous } => {
                write!(f, "period {period_start} does not follow {previous}")
            }
            DataQualityIssue::ScoreOutOfRange { period_start, field, value } => {
                write!(f, "{field} {value} outside 0–100 at {period_start}")
            }
        }
    }
}

/// Check an ordered single-source series against the snapshot invariants.
pub fn check_series(snapshots: &[SnapshotRecord]) -> Vec<DataQualityIssue> {
    let mut issues = Vec::new();

    for (i, snap) in snapshots.iter().enumerate() {
        if snap.new_reviews_in_period < 0 {
            issues.push(DataQualityIssue::NegativeNewReviews {
                period_start: snap.period_start,
                value: snap.new_reviews_in_period,
            });
        }

        for (field, score) in [("critic_score", snap.critic_score), ("audience_score", snap.audience_score)] {
            if let Some(value) = score.filter(|v| !(0.0..=100.0).contains(v)) {
                issues.push(DataQualityIssue::ScoreOutOfRange {
                    period_start: snap.period_start,
                    field,
                    value,
                });
            }
        }

        let Some(prev) = i.checked_sub(1).map(|p| &snapshots[p]) else {
            continue;
        };

        if snap.period_start <= prev.period_start {
            issues.push(DataQualityIssue::PeriodNotIncreasing {
                period_start: snap.period_start,
                previous: prev.period_start,
            });
        }

        if snap.total_reviews < prev.total_reviews {
            issues.push(DataQualityIssue::TotalReviewsDecreased {
                period_start: snap.period_start,
                previous: prev.total_reviews,
                current: snap.total_reviews,
            });
        }

        let expected = snap.total_reviews - prev.total_reviews;
        if expected != snap.new_reviews_in_period {
            issues.push(DataQualityIssue::NewReviewsMismatch {
                period_start: snap.period_start,
                expected,
                recorded: snap.new_reviews_in_period,
            });
        }
    }

    issues
}
