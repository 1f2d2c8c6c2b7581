use crate::analysis::thresholds::TrendThresholds;
use crate::error::{Error, Result};
use crate::models::snapshot::RatingSource;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fs;
use std::path::Path;
use std::time::Duration;

const SETTINGS_SCHEMA_VERSION: i64 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TrendSettings {
    pub lookback_days: u32,
    pub active_title_days: u32,
    /// Classify on this source only; `None` picks the best-covered source per title.
    pub canonical_source: Option<RatingSource>,
    pub max_concurrency: usize,
    pub store_timeout_secs: u64,
    pub max_retries: u32,
    pub thresholds: TrendThresholds,
}

impl Default for TrendSettings {
    fn default() -> Self {
        TrendSettings {
            lookback_days: 7,
            active_title_days: 30,
            canonical_source: None,
            max_concurrency: 4,
            store_timeout_secs: 10,
            max_retries: 2,
            thresholds: TrendThresholds::default(),
        }
    }
}

impl TrendSettings {
    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }
}

/// Load, migrate and sanitize the settings file, creating it with defaults if absent.
pub fn load_settings(path: &Path) -> Result<TrendSettings> {
    let value = load_settings_from_disk(path)?;
    effective_settings(&value)
}

pub fn effective_settings(value: &Value) -> Result<TrendSettings> {
    serde_json::from_value(value.clone()).map_err(|e| Error::Settings(format!("Invalid settings: {e}")))
}

pub fn load_settings_from_disk(path: &Path) -> Result<Value> {
    let original = if path.exists() {
        let raw = fs::read_to_string(path)?;
        serde_json::from_str::<Value>(&raw).unwrap_or_else(|e| {
            log::warn!("settings file {} is not valid JSON, using defaults: {e}", path.display());
            json!({})
        })
    } else {
        json!({})
    };

    let migrated = migrate_settings(original.clone());
    if migrated != original || !path.exists() {
        write_settings_file(path, &migrated)?;
    }

    Ok(migrated)
}

pub fn save_settings_to_disk(path: &Path, settings: Value) -> Result<Value> {
    let mut merged = load_settings_from_disk(path).unwrap_or_else(|_| default_settings());
    merge_settings(&mut merged, &settings);

    let migrated = migrate_settings(merged);
    write_settings_file(path, &migrated)?;
    Ok(migrated)
}

fn write_settings_file(path: &Path, settings: &Value) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    let raw = serde_json::to_string_pretty(settings)?;
    fs::write(path, raw)?;
    Ok(())
}

fn migrate_settings(input: Value) -> Value {
    let mut out = match input {
        Value::Object(map) => Value::Object(map),
        _ => Value::Object(Map::new()),
    };

    let version = out
        .get("schema_version")
        .and_then(Value::as_i64)
        .unwrap_or(0);
    if version > SETTINGS_SCHEMA_VERSION {
        log::warn!("settings schema version {version} is newer than {SETTINGS_SCHEMA_VERSION}");
    }

    deep_merge_defaults(&mut out, &default_settings());
    sanitize_settings(&mut out);
    if let Some(obj) = out.as_object_mut() {
        obj.insert("schema_version".to_string(), json!(version.max(SETTINGS_SCHEMA_VERSION)));
    }

    out
}

fn default_settings() -> Value {
    let mut defaults = serde_json::to_value(TrendSettings::default()).unwrap_or_else(|_| json!({}));
    if let Some(obj) = defaults.as_object_mut() {
        obj.insert("schema_version".to_string(), json!(SETTINGS_SCHEMA_VERSION));
    }
    defaults
}

fn deep_merge_defaults(target: &mut Value, defaults: &Value) {
    let (Some(target_obj), Some(default_obj)) = (target.as_object_mut(), defaults.as_object()) else {
        return;
    };

    for (key, default_value) in default_obj {
        match target_obj.get_mut(key) {
            Some(existing) => {
                if existing.is_object() && default_value.is_object() {
                    deep_merge_defaults(existing, default_value);
                }
            }
            None => {
                target_obj.insert(key.clone(), default_value.clone());
            }
        }
    }
}

fn merge_settings(target: &mut Value, incoming: &Value) {
    match (target, incoming) {
        (Value::Object(target_obj), Value::Object(incoming_obj)) => {
            for (key, value) in incoming_obj {
                if let Some(existing) = target_obj.get_mut(key) {
                    merge_settings(existing, value);
                } else {
                    target_obj.insert(key.clone(), value.clone());
                }
            }
        }
        (target_slot, incoming_value) => {
            *target_slot = incoming_value.clone();
        }
    }
}

fn sanitize_settings(settings: &mut Value) {
    let Some(obj) = settings.as_object_mut() else {
        return;
    };

    let defaults = TrendSettings::default();

    clamp_u64(obj, "lookbackDays", 2, 90, defaults.lookback_days as u64);
    clamp_u64(obj, "activeTitleDays", 1, 365, defaults.active_title_days as u64);
    clamp_u64(obj, "maxConcurrency", 1, 64, defaults.max_concurrency as u64);
    clamp_u64(obj, "storeTimeoutSecs", 1, 300, defaults.store_timeout_secs);
    clamp_u64(obj, "maxRetries", 0, 5, defaults.max_retries as u64);

    let sources: Vec<&str> = RatingSource::ALL.iter().map(|s| s.as_str()).collect();
    let source = obj
        .get("canonicalSource")
        .and_then(Value::as_str)
        .filter(|value| sources.contains(value))
        .map(|value| json!(value))
        .unwrap_or(Value::Null);
    obj.insert("canonicalSource".to_string(), source);

    let thresholds = obj
        .entry("thresholds".to_string())
        .or_insert_with(|| json!({}));
    if !thresholds.is_object() {
        *thresholds = json!({});
    }
    if let Some(t) = thresholds.as_object_mut() {
        let d = &defaults.thresholds;
        clamp_f64(t, "slopeTrend", 0.0, 10.0, d.slope_trend);
        clamp_f64(t, "slopeConfidenceScale", 0.1, 100.0, d.slope_confidence_scale);
        clamp_u64(t, "sleeperMinPoints", 2, 90, d.sleeper_min_points as u64);
        clamp_f64(t, "sleeperVelocityRatio", 1.0, 100.0, d.sleeper_velocity_ratio);
        clamp_f64(t, "sleeperScoreImprovement", 0.0, 100.0, d.sleeper_score_improvement);
        clamp_f64(t, "sleeperConfidenceScale", 0.1, 100.0, d.sleeper_confidence_scale);
        clamp_u64(t, "anomalyMinPoints", 2, 90, d.anomaly_min_points as u64);
        clamp_f64(t, "anomalySigma", 0.5, 20.0, d.anomaly_sigma);
    }
}

fn clamp_u64(map: &mut Map<String, Value>, key: &str, min: u64, max: u64, default: u64) {
    let raw = map.get(key).and_then(Value::as_u64).unwrap_or(default);
    map.insert(key.to_string(), json!(raw.clamp(min, max)));
}

fn clamp_f64(map: &mut Map<String, Value>, key: &str, min: f64, max: f64, default: f64) {
    let raw = map
        .get(key)
        .and_then(Value::as_f64)
        .filter(|v| v.is_finite())
        .unwrap_or(default);
    map.insert(key.to_string(), json!(raw.clamp(min, max)));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_settings_migrate_to_defaults() {
        let migrated = migrate_settings(json!({}));
        let settings = effective_settings(&migrated).expect("valid settings");

        assert_eq!(settings, TrendSettings::default());
        assert_eq!(migrated["schema_version"], json!(SETTINGS_SCHEMA_VERSION));
    }

    #[test]
    fn unknown_keys_survive_and_version_is_stamped() {
        let migrated = migrate_settings(json!({ "lookbackDays": 14, "note": "weekly run" }));
        let settings = effective_settings(&migrated).expect("valid settings");

        assert_eq!(settings.lookback_days, 14);
        assert_eq!(migrated["note"], json!("weekly run"));
        assert_eq!(migrated["schema_version"], json!(1));
    }

    #[test]
    fn sanitizes_out_of_range_values() {
        let migrated = migrate_settings(json!({
            "schema_version": 1,
            "lookbackDays": 1000,
            "maxConcurrency": 0,
            "canonicalSource": "netflix",
            "thresholds": { "anomalySigma": -3.0, "sleeperMinPoints": 1 }
        }));
        let settings = effective_settings(&migrated).expect("valid settings");

        assert_eq!(settings.lookback_days, 90);
        assert_eq!(settings.max_concurrency, 1);
        assert_eq!(settings.canonical_source, None);
        assert_eq!(settings.thresholds.anomaly_sigma, 0.5);
        assert_eq!(settings.thresholds.sleeper_min_points, 2);
        assert_eq!(settings.thresholds.slope_trend, 0.5);
    }

    #[test]
    fn merges_partial_settings_without_losing_existing_values() {
        let mut existing = default_settings();
        merge_settings(&mut existing, &json!({ "lookbackDays": 30, "thresholds": { "slopeTrend": 1.0 } }));
        let settings = effective_settings(&migrate_settings(existing)).expect("valid settings");

        assert_eq!(settings.lookback_days, 30);
        assert_eq!(settings.thresholds.slope_trend, 1.0);
        assert_eq!(settings.thresholds.sleeper_velocity_ratio, 3.0);
        assert_eq!(settings.max_retries, 2);
    }
}
