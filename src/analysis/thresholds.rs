use serde::{Deserialize, Serialize};

/// Tunable constants used by the detectors and the classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TrendThresholds {
    /// |slope| above this is a trend rather than noise
    pub slope_trend: f64,
    /// slope at which a trend reaches full confidence
    pub slope_confidence_scale: f64,
    pub sleeper_min_points: usize,
    /// late/early velocity ratio required for a sleeper hit
    pub sleeper_velocity_ratio: f64,
    /// critic score points the late half must gain
    pub sleeper_score_improvement: f64,
    /// velocity ratio at which a sleeper hit reaches full confidence
    pub sleeper_confidence_scale: f64,
    pub anomaly_min_points: usize,
    pub anomaly_sigma: f64,
}

impl Default for TrendThresholds {
    fn default() -> Self {
        TrendThresholds {
            slope_trend: 0.5,
            slope_confidence_scale: 2.0,
            sleeper_min_points: 5,
            sleeper_velocity_ratio: 3.0,
            sleeper_score_improvement: 5.0,
            sleeper_confidence_scale: 5.0,
            anomaly_min_points: 3,
            anomaly_sigma: 5.0,
        }
    }
}
