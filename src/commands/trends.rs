use crate::analysis::classifier::classify_window;
use crate::analysis::quality::check_series;
use crate::commands::settings::TrendSettings;
use crate::commands::store::{SnapshotStore, TitleCatalog, TrendSink};
use crate::error::{Error, Result};
use crate::models::snapshot::{RatingSource, SnapshotRecord};
use crate::models::title::Title;
use crate::models::trend::{TrendResult, TrendStatus};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

const RETRY_BASE_DELAY: Duration = Duration::from_millis(200);
const RETRY_MAX_DELAY: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Serialize)]
pub struct BatchProgress {
    pub current: usize,
    pub total: usize,
    pub title_id: String,
    pub status: Option<TrendStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TitleFailure {
    pub title_id: String,
    pub attempts: u32,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub total: usize,
    pub analyzed: usize,
    pub status_counts: HashMap<TrendStatus, usize>,
    pub suspicious_titles: Vec<String>,
    pub failures: Vec<TitleFailure>,
    pub duration_ms: u64,
}

/// Fetch the title's window and classify it. Does not persist.
pub fn classify_trend(store: &dyn SnapshotStore, title_id: &str, settings: &TrendSettings) -> Result<TrendResult> {
    let snapshots = store.fetch_snapshots(title_id, settings.canonical_source, settings.lookback_days)?;
    let series = canonical_series(snapshots, settings.canonical_source);

    for issue in check_series(&series) {
        log::warn!("data quality issue for {title_id}: {issue}");
    }

    let result = classify_window(&series, &settings.thresholds);
    log::debug!(
        "{title_id}: {} (confidence {:.2}) over {} snapshots",
        result.status,
        result.confidence,
        result.snapshot_count
    );

    Ok(result)
}

pub fn persist_trend(sink: &dyn TrendSink, title_id: &str, trend: &TrendResult) -> Result<()> {
    sink.upsert_trend(title_id, trend)
}

pub fn classify_and_persist(
    store: &dyn SnapshotStore,
    sink: &dyn TrendSink,
    title_id: &str,
    settings: &TrendSettings,
) -> Result<TrendResult> {
    let trend = classify_trend(store, title_id, settings)?;
    persist_trend(sink, title_id, &trend)?;
    Ok(trend)
}

/// Reduce a mixed-source window to one source series.
///
/// With a preferred source only its records are kept. Otherwise the source with
/// the most records wins, ties going to the source declared first.
pub fn canonical_series(snapshots: Vec<SnapshotRecord>, preferred: Option<RatingSource>) -> Vec<SnapshotRecord> {
    let chosen = match preferred {
        Some(source) => source,
        None => {
            let mut counts: HashMap<RatingSource, usize> = HashMap::new();
            for snap in &snapshots {
                *counts.entry(snap.source).or_insert(0) += 1;
            }

            let mut best: Option<(RatingSource, usize)> = None;
            for source in RatingSource::ALL {
                let count = counts.get(&source).copied().unwrap_or(0);
                if count > 0 && best.map_or(true, |(_, top)| count > top) {
                    best = Some((source, count));
                }
            }

            match best {
                Some((source, _)) => source,
                None => return Vec::new(),
            }
        }
    };

    snapshots.into_iter().filter(|s| s.source == chosen).collect()
}

/// Classify and persist every title released within `active_title_days`.
pub async fn analyze_all<F>(
    store: Arc<dyn SnapshotStore>,
    sink: Arc<dyn TrendSink>,
    catalog: &dyn TitleCatalog,
    settings: &TrendSettings,
    emit_progress: F,
) -> Result<BatchReport>
where
    F: FnMut(BatchProgress),
{
    let titles = catalog.list_active_titles(settings.active_title_days)?;
    log::info!("analyzing trends for {} active titles", titles.len());
    analyze_titles(store, sink, titles, settings, emit_progress).await
}

/// Run one pipeline per title, at most `max_concurrency` at a time.
///
/// A failing title is retried while its error is retryable and then recorded in
/// the report; it never stops the other titles. Each attempt holds a concurrency
/// slot until its blocking work returns, even past the timeout. A timed-out
/// attempt is drained before the next one starts and skips its trend write.
pub async fn analyze_titles<F>(
    store: Arc<dyn SnapshotStore>,
    sink: Arc<dyn TrendSink>,
    titles: Vec<Title>,
    settings: &TrendSettings,
    mut emit_progress: F,
) -> Result<BatchReport>
where
    F: FnMut(BatchProgress),
{
    let start = Instant::now();
    let total = titles.len();
    let settings = Arc::new(settings.clone());
    let semaphore = Arc::new(Semaphore::new(settings.max_concurrency.max(1)));
    let mut tasks = JoinSet::new();

    for title in titles {
        let store = Arc::clone(&store);
        let sink = Arc::clone(&sink);
        let settings = Arc::clone(&settings);
        let semaphore = Arc::clone(&semaphore);

        tasks.spawn(async move {
            let outcome = classify_with_retry(store, sink, &title.id, settings, semaphore).await;
            (title, outcome)
        });
    }

    let mut report = BatchReport {
        total,
        ..BatchReport::default()
    };
    let mut current = 0;

    while let Some(joined) = tasks.join_next().await {
        current += 1;
        let (title, (attempts, outcome)) = match joined {
            Ok(done) => done,
            Err(e) => {
                log::error!("trend worker aborted: {e}");
                report.failures.push(TitleFailure {
                    title_id: String::new(),
                    attempts: 0,
                    error: e.to_string(),
                });
                continue;
            }
        };

        let status = match outcome {
            Ok(trend) => {
                report.analyzed += 1;
                *report.status_counts.entry(trend.status).or_insert(0) += 1;
                if trend.has_suspicious_activity {
                    log::warn!(
                        "{} ({}): suspicious review spike at {:?} ({:.1}σ)",
                        title.name,
                        title.id,
                        trend.spike_period,
                        trend.spike_magnitude.unwrap_or(0.0)
                    );
                    report.suspicious_titles.push(title.id.clone());
                }
                log::info!(
                    "{} ({}): {} avg {:.1}/day, growth {:+.1}%",
                    title.name,
                    title.id,
                    trend.status,
                    trend.avg_daily_reviews,
                    trend.growth_rate_percent
                );
                Some(trend.status)
            }
            Err(e) => {
                log::error!("{} ({}): giving up after {attempts} attempt(s): {e}", title.name, title.id);
                report.failures.push(TitleFailure {
                    title_id: title.id.clone(),
                    attempts,
                    error: e.to_string(),
                });
                None
            }
        };

        emit_progress(BatchProgress {
            current,
            total,
            title_id: title.id,
            status,
        });
    }

    report.suspicious_titles.sort();
    report.failures.sort_by(|a, b| a.title_id.cmp(&b.title_id));
    report.duration_ms = start.elapsed().as_millis() as u64;
    log::info!(
        "analyzed {}/{} titles in {} ms ({} failed)",
        report.analyzed,
        report.total,
        report.duration_ms,
        report.failures.len()
    );

    Ok(report)
}

async fn classify_with_retry(
    store: Arc<dyn SnapshotStore>,
    sink: Arc<dyn TrendSink>,
    title_id: &str,
    settings: Arc<TrendSettings>,
    semaphore: Arc<Semaphore>,
) -> (u32, Result<TrendResult>) {
    let mut attempt = 0;
    loop {
        attempt += 1;
        let outcome = run_pipeline(
            Arc::clone(&store),
            Arc::clone(&sink),
            title_id,
            Arc::clone(&settings),
            Arc::clone(&semaphore),
        )
        .await;

        match outcome {
            Err(e) if e.is_retryable() && attempt <= settings.max_retries => {
                log::warn!("{title_id}: attempt {attempt} failed, retrying: {e}");
                tokio::time::sleep(retry_delay(attempt)).await;
            }
            other => return (attempt, other),
        }
    }
}

/// Exponential backoff after the `attempt`-th failure, capped at `RETRY_MAX_DELAY`.
fn retry_delay(attempt: u32) -> Duration {
    let factor = 2u32.checked_pow(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
    RETRY_BASE_DELAY.saturating_mul(factor).min(RETRY_MAX_DELAY)
}

async fn run_pipeline(
    store: Arc<dyn SnapshotStore>,
    sink: Arc<dyn TrendSink>,
    title_id: &str,
    settings: Arc<TrendSettings>,
    semaphore: Arc<Semaphore>,
) -> Result<TrendResult> {
    let permit = semaphore
        .acquire_owned()
        .await
        .map_err(|e| Error::Worker(format!("Semaphore closed: {e}")))?;

    let timeout = settings.store_timeout();
    let abandoned = Arc::new(AtomicBool::new(false));
    let cancel = Arc::clone(&abandoned);
    let id = title_id.to_string();

    let mut work = tokio::task::spawn_blocking(move || {
        let _permit = permit;
        let trend = classify_trend(&*store, &id, &settings)?;
        if cancel.load(Ordering::SeqCst) {
            return Err(Error::Timeout {
                title_id: id,
                operation: "classify".to_string(),
            });
        }
        persist_trend(&*sink, &id, &trend)?;
        Ok(trend)
    });

    match tokio::time::timeout(timeout, &mut work).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => Err(Error::Worker(format!("Pipeline for {title_id} panicked: {join_err}"))),
        Err(_) => {
            abandoned.store(true, Ordering::SeqCst);
            log::warn!("{title_id}: timed out after {timeout:?}, waiting for the stalled attempt");
            match work.await {
                // The write was already under way when the deadline passed.
                Ok(Ok(trend)) => {
                    log::warn!("{title_id}: stalled attempt persisted its trend after the timeout");
                    Ok(trend)
                }
                Ok(Err(_)) => Err(Error::Timeout {
                    title_id: title_id.to_string(),
                    operation: "classify and persist".to_string(),
                }),
                Err(join_err) => Err(Error::Worker(format!("Pipeline for {title_id} panicked: {join_err}"))),
            }
        }
    }
}
