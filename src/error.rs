use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Snapshot store error: {0}")]
    SnapshotStore(String),

    #[error("Trend sink error: {0}")]
    TrendSink(String),

    #[error("Timed out during {operation} for title {title_id}")]
    Timeout { title_id: String, operation: String },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Worker error: {0}")]
    Worker(String),
}

impl Error {
    /// Collaborator failures worth retrying for the same title.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::SnapshotStore(_) | Error::TrendSink(_) | Error::Timeout { .. } => true,
            Error::Database(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
