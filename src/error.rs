//! Custom error types for trisync

use thiserror::Error;

/// Main error type for trisync operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Qdrant error: {0}")]
    Qdrant(String),

    #[error("Graph store error: {0}")]
    Graph(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    #[error("Dataset not found: {0}")]
    DatasetNotFound(String),

    #[error("Document subgraph not found: {0}")]
    DocumentSubgraphNotFound(String),

    #[error("Sync operation not found: {0}")]
    SyncOperationNotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Sync operation cancelled: {0}")]
    Cancelled(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether retrying the failed call could succeed (dropped connection,
    /// timeout, lock contention). Everything else is treated as a bug or bad data.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Database(err) => is_transient_sqlx(err),
            Error::Io(err) => matches!(
                err.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::Interrupted
            ),
            Error::Graph(message) | Error::Qdrant(message) => mentions_contention(message),
            _ => false,
        }
    }

    /// Caller-facing "not found" class. Permission failures are folded in so
    /// that callers cannot probe for existence.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::DocumentNotFound(_)
                | Error::DatasetNotFound(_)
                | Error::DocumentSubgraphNotFound(_)
                | Error::SyncOperationNotFound(_)
                | Error::PermissionDenied(_)
        )
    }
}

fn is_transient_sqlx(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => true,
        sqlx::Error::Database(db_err) => {
            // SQLITE_BUSY (5) and SQLITE_LOCKED (6), including extended codes
            let busy_or_locked = db_err
                .code()
                .and_then(|code| code.parse::<i64>().ok())
                .map(|code| matches!(code & 0xff, 5 | 6))
                .unwrap_or(false);
            busy_or_locked || mentions_contention(db_err.message())
        }
        _ => false,
    }
}

fn mentions_contention(message: &str) -> bool {
    let lower = message.to_lowercase();
    ["database is locked", "deadlock", "timed out", "timeout", "connection reset"]
        .iter()
        .any(|needle| lower.contains(needle))
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Other(err.to_string())
    }
}

/// Result type alias for trisync
pub type Result<T> = std::result::Result<T, Error>;

/// Convert qdrant errors
impl From<qdrant_client::QdrantError> for Error {
    fn from(err: qdrant_client::QdrantError) -> Self {
        Error::Qdrant(err.to_string())
    }
}
