use super::anomaly::detect_spike;
use super::sleeper::detect_sleeper_hit;
use super::slope::velocity_slope;
use super::thresholds::TrendThresholds;
use crate::models::snapshot::SnapshotRecord;
use crate::models::trend::{TrendResult, TrendStatus};

/// Classify one title from its ordered single-source snapshot window.
///
/// Precedence: sleeper hit, then trending up, then trending down, then stable.
/// Anomaly fields are attached regardless of status.
pub fn classify_window(snapshots: &[SnapshotRecord], thresholds: &TrendThresholds) -> TrendResult {
    if snapshots.is_empty() {
        return TrendResult::neutral();
    }

    let velocities: Vec<f64> = snapshots.iter().map(|s| s.review_velocity).collect();
    let new_reviews: Vec<i64> = snapshots.iter().map(|s| s.new_reviews_in_period.max(0)).collect();

    let slope = velocity_slope(&velocities);
    let (is_sleeper, sleeper_ratio) = detect_sleeper_hit(snapshots, thresholds);
    let spike = detect_spike(&new_reviews, thresholds);

    let (status, confidence) = if is_sleeper {
        (
            TrendStatus::SleeperHit,
            scaled(sleeper_ratio, thresholds.sleeper_confidence_scale),
        )
    } else if slope > thresholds.slope_trend {
        (
            TrendStatus::TrendingUp,
            scaled(slope.abs(), thresholds.slope_confidence_scale),
        )
    } else if slope < -thresholds.slope_trend {
        (
            TrendStatus::TrendingDown,
            scaled(slope.abs(), thresholds.slope_confidence_scale),
        )
    } else {
        (TrendStatus::Stable, 1.0 - slope.abs().min(1.0))
    };

    let score_momentum = snapshots
        .iter()
        .map(|s| s.score_change.unwrap_or(0.0))
        .sum::<f64>()
        / snapshots.len() as f64;

    TrendResult {
        status,
        confidence,
        avg_daily_reviews: average(&new_reviews),
        growth_rate_percent: growth_rate_percent(&new_reviews),
        score_momentum,
        has_suspicious_activity: spike.is_some(),
        spike_period: spike.as_ref().map(|s| snapshots[s.index].period_start),
        spike_magnitude: spike.map(|s| s.magnitude),
        snapshot_count: snapshots.len(),
    }
}

fn scaled(value: f64, full_scale: f64) -> f64 {
    if full_scale <= 0.0 {
        return 1.0;
    }
    (value / full_scale).min(1.0)
}

fn average(counts: &[i64]) -> f64 {
    if counts.is_empty() {
        return 0.0;
    }
    counts.iter().sum::<i64>() as f64 / counts.len() as f64
}

/// Percentage change of the mean between the early and late halves.
fn growth_rate_percent(counts: &[i64]) -> f64 {
    let (early, late) = counts.split_at(counts.len() / 2);
    let early_avg = average(early);
    if early.is_empty() || early_avg <= 0.0 {
        return 0.0;
    }
    (average(late) - early_avg) / early_avg * 100.0
}
