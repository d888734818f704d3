//! Error types for substrate operations.

/// Errors that can occur while running transactions against a backend.
#[derive(Debug, thiserror::Error)]
pub enum KvError {
    /// A transaction committed after this one started wrote a key this one read.
    #[error("Transaction conflict")]
    Conflict,

    /// The commit history needed to validate this transaction was discarded.
    #[error("Transaction too old")]
    TransactionTooOld,

    /// The transaction driver gave up on a retryable error.
    #[error("Transaction failed after {attempts} attempts: {last}")]
    RetryLimitExceeded { attempts: u32, last: Box<KvError> },

    /// SQLite operation failed.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Filesystem error while opening a backend.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Directory metadata is missing or malformed.
    #[error("Directory error: {0}")]
    Directory(String),

    /// A key could not be decoded.
    #[error("Invalid key: {0}")]
    InvalidKey(String),
}

impl KvError {
    /// Whether running the same unit of work again may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            KvError::Conflict | KvError::TransactionTooOld => true,
            KvError::Database(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

/// Result type alias for substrate operations.
pub type Result<T> = std::result::Result<T, KvError>;
