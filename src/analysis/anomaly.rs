use super::thresholds::TrendThresholds;

/// First period whose new-review count sits far above the window mean.
#[derive(Debug, Clone, PartialEq)]
pub struct Spike {
    pub index: usize,
    pub magnitude: f64,
}

/// Scan `counts` chronologically for the earliest value above
/// `mean + anomaly_sigma * stddev` (sample standard deviation).
///
/// Negative counts are treated as zero. Flat or short series report nothing.
pub fn detect_spike(counts: &[i64], thresholds: &TrendThresholds) -> Option<Spike> {
    if counts.len() < thresholds.anomaly_min_points.max(2) {
        return None;
    }

    let values: Vec<f64> = counts.iter().map(|&c| c.max(0) as f64).collect();
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let stddev = variance.sqrt();

    if stddev == 0.0 {
        return None;
    }

    let limit = mean + thresholds.anomaly_sigma * stddev;
    values
        .iter()
        .position(|&v| v > limit)
        .map(|index| Spike {
            index,
            magnitude: (values[index] - mean) / stddev,
        })
}
