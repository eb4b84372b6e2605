use thiserror::Error;

use crate::{EntityKind, Version};

/// Errors that can occur when interacting with the ledger store.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// A row changed between read and commit.
    /// The whole batch was rejected; nothing was written.
    #[error(
        "Concurrency conflict on {entity} {id}: expected version {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        entity: EntityKind,
        id: i64,
        expected: Version,
        actual: Version,
    },

    /// An update targeted a row that does not exist.
    #[error("{entity} {id} not found")]
    NotFound { entity: EntityKind, id: i64 },

    /// An insert targeted an id that is already taken.
    #[error("{entity} {id} already exists")]
    DuplicateKey { entity: EntityKind, id: i64 },

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored or supplied value could not be interpreted.
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

impl LedgerError {
    /// Whether retrying the read-recompute-commit cycle may succeed.
    pub fn is_conflict(&self) -> bool {
        matches!(self, LedgerError::ConcurrencyConflict { .. })
    }
}

/// Result type for ledger store operations.
pub type Result<T> = std::result::Result<T, LedgerError>;
