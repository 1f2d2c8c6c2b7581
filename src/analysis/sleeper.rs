use super::thresholds::TrendThresholds;
use crate::models::snapshot::SnapshotRecord;

/// Detect a slow start followed by a surge in both velocity and critic score.
///
/// The window is split at its midpoint. The late half must reach
/// `sleeper_velocity_ratio` times the early half's mean velocity AND improve the
/// mean critic score by `sleeper_score_improvement` points. A velocity surge
/// without a score gain is more likely backlash than word of mouth.
///
/// Returns `(true, ratio)` when both hold, otherwise `(false, 0.0)`.
pub fn detect_sleeper_hit(snapshots: &[SnapshotRecord], thresholds: &TrendThresholds) -> (bool, f64) {
    if snapshots.len() < thresholds.sleeper_min_points.max(2) {
        return (false, 0.0);
    }

    let (early, late) = snapshots.split_at(snapshots.len() / 2);

    let early_velocity = mean(early.iter().map(|s| s.review_velocity));
    let late_velocity = mean(late.iter().map(|s| s.review_velocity));

    let (Some(early_velocity), Some(late_velocity)) = (early_velocity, late_velocity) else {
        return (false, 0.0);
    };
    if early_velocity <= 0.0 {
        return (false, 0.0);
    }

    let ratio = late_velocity / early_velocity;
    if ratio < thresholds.sleeper_velocity_ratio {
        return (false, 0.0);
    }

    // Both halves need at least one scored snapshot.
    let early_score = mean(early.iter().filter_map(|s| s.critic_score));
    let late_score = mean(late.iter().filter_map(|s| s.critic_score));

    match (early_score, late_score) {
        (Some(early_score), Some(late_score))
            if late_score - early_score >= thresholds.sleeper_score_improvement =>
        {
            (true, ratio)
        }
        _ => (false, 0.0),
    }
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::snapshot::RatingSource;

    fn window(velocities: &[f64], scores: &[Option<f64>]) -> Vec<SnapshotRecord> {
        velocities
            .iter()
            .zip(scores)
            .enumerate()
            .map(|(i, (velocity, score))| SnapshotRecord {
                title_id: "m1".to_string(),
                source: RatingSource::RottenTomatoes,
                period_start: i as i64 * 86_400,
                total_reviews: 0,
                new_reviews_in_period: 0,
                critic_score: *score,
                audience_score: None,
                review_velocity: *velocity,
                score_change: None,
            })
            .collect()
    }

    fn scores(values: &[f64]) -> Vec<Option<f64>> {
        values.iter().copied().map(Some).collect()
    }

    #[test]
    fn fires_on_velocity_surge_with_score_gain() {
        let snaps = window(
            &[1.0, 1.0, 1.0, 4.0, 4.0, 4.0],
            &scores(&[50.0, 50.0, 50.0, 60.0, 60.0, 60.0]),
        );
        assert_eq!(detect_sleeper_hit(&snaps, &TrendThresholds::default()), (true, 4.0));
    }

    #[test]
    fn small_score_gain_is_not_enough() {
        let snaps = window(
            &[1.0, 1.0, 1.0, 4.0, 4.0, 4.0],
            &scores(&[50.0, 50.0, 50.0, 53.0, 53.0, 53.0]),
        );
        assert_eq!(detect_sleeper_hit(&snaps, &TrendThresholds::default()), (false, 0.0));
    }

    #[test]
    fn never_fires_below_five_points() {
        let snaps = window(&[1.0, 1.0, 9.0, 9.0], &scores(&[10.0, 10.0, 90.0, 90.0]));
        assert_eq!(detect_sleeper_hit(&snaps, &TrendThresholds::default()), (false, 0.0));
    }

    #[test]
    fn zero_early_velocity_is_no_signal() {
        let snaps = window(
            &[0.0, 0.0, 5.0, 5.0, 5.0],
            &scores(&[40.0, 40.0, 80.0, 80.0, 80.0]),
        );
        assert_eq!(detect_sleeper_hit(&snaps, &TrendThresholds::default()), (false, 0.0));
    }

    #[test]
    fn unscored_half_blocks_the_pattern() {
        let snaps = window(
            &[1.0, 1.0, 5.0, 5.0, 5.0],
            &[None, None, Some(90.0), Some(90.0), Some(90.0)],
        );
        assert_eq!(detect_sleeper_hit(&snaps, &TrendThresholds::default()), (false, 0.0));
    }

    #[test]
    fn odd_window_puts_extra_point_in_late_half() {
        // 5 points: early = [0, 1], late = [2, 3, 4]
        let snaps = window(
            &[2.0, 2.0, 6.0, 6.0, 6.0],
            &[Some(40.0), None, Some(46.0), None, None],
        );
        assert_eq!(detect_sleeper_hit(&snaps, &TrendThresholds::default()), (true, 3.0));
    }
}
