pub mod anomaly;
pub mod classifier;
pub mod quality;
pub mod sleeper;
pub mod slope;
pub mod thresholds;
