pub mod analysis;
pub mod commands;
pub mod error;
pub mod models;

use commands::{
    db::SqliteStore,
    settings::load_settings,
    store::{SnapshotStore, TrendSink},
    trends::{analyze_all, BatchReport},
};
use std::path::Path;
use std::sync::Arc;

pub use analysis::classifier::classify_window;
pub use commands::trends::{classify_and_persist, classify_trend, persist_trend};
pub use error::{Error, Result};
pub use models::snapshot::{RatingSource, SnapshotRecord};
pub use models::trend::{TrendResult, TrendStatus};

/// Install the `env_logger` backend; `RUST_LOG` overrides the `info` default.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).try_init();
}

/// Classify every active title in the database at `db_path`.
pub async fn run(db_path: &Path, settings_path: &Path) -> Result<BatchReport> {
    let settings = load_settings(settings_path)?;
    let store = Arc::new(SqliteStore::open(db_path)?);

    let snapshots: Arc<dyn SnapshotStore> = store.clone();
    let sink: Arc<dyn TrendSink> = store.clone();

    analyze_all(snapshots, sink, store.as_ref(), &settings, |progress| {
        log::debug!("[{}/{}] {}", progress.current, progress.total, progress.title_id);
    })
    .await
}
