//! Failures of the `SQLite` adapter, surfaced as [`QueueError::Storage`].

use actionq_domain::error::QueueError;

/// What went wrong below the repository traits.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// `SQLite` rejected a statement or the pool could not hand out a connection.
    #[error("sqlite query failed")]
    Database(#[from] sqlx::Error),

    /// A stored JSON column could not be encoded or decoded.
    #[error("malformed JSON column")]
    Json(#[from] serde_json::Error),

    /// The embedded schema migrations could not be applied.
    #[error("schema migration failed")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl From<StorageError> for QueueError {
    fn from(err: StorageError) -> Self {
        Self::Storage(Box::new(err))
    }
}
