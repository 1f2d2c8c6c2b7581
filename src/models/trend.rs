use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendStatus {
    TrendingUp,
    TrendingDown,
    Stable,
    SleeperHit,
}

impl TrendStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrendStatus::TrendingUp => "trending_up",
            TrendStatus::TrendingDown => "trending_down",
            TrendStatus::Stable => "stable",
            TrendStatus::SleeperHit => "sleeper_hit",
        }
    }
}

impl fmt::Display for TrendStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrendStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "trending_up" => Ok(TrendStatus::TrendingUp),
            "trending_down" => Ok(TrendStatus::TrendingDown),
            "stable" => Ok(TrendStatus::Stable),
            "sleeper_hit" => Ok(TrendStatus::SleeperHit),
            other => Err(format!("Unknown trend status: {other}")),
        }
    }
}

/// Classification of one title's snapshot window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendResult {
    pub status: TrendStatus,
    pub confidence: f64, // 0.0–1.0
    pub avg_daily_reviews: f64,
    pub growth_rate_percent: f64,
    pub score_momentum: f64,
    pub has_suspicious_activity: bool,
    pub spike_period: Option<i64>,
    pub spike_magnitude: Option<f64>, // standard deviations above the mean
    pub snapshot_count: usize,
}

impl TrendResult {
    /// Result for a title with no snapshots in the window.
    pub fn neutral() -> Self {
        TrendResult {
            status: TrendStatus::Stable,
            confidence: 0.0,
            avg_daily_reviews: 0.0,
            growth_rate_percent: 0.0,
            score_momentum: 0.0,
            has_suspicious_activity: false,
            spike_period: None,
            spike_magnitude: None,
            snapshot_count: 0,
        }
    }
}

/// A persisted trend row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredTrend {
    pub title_id: String,
    pub trend: TrendResult,
    pub calculated_at: i64,
}
