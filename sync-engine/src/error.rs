//! Error types for sync-engine.

/// Main error type for engine operations.
///
/// Per the propagation policy, tracker write failures never surface here:
/// they are folded into the record (`failed`, `conflicted`) and reported
/// through the process outcome. What does surface is infrastructure the
/// engine cannot work around: a broken store or configuration.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Record store error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Repeated optimistic-concurrency losses on one record; the caller
    /// may simply redeliver, processing is idempotent.
    #[error("gave up after {attempts} stale writes on record {key}")]
    Contention {
        /// The record key being contended.
        key: String,
        /// How many compare-and-set attempts were made.
        attempts: u32,
    },
}

/// Record store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored row could not be decoded back into a record.
    #[error("corrupt record {key}: {reason}")]
    Corrupt {
        /// Key of the unreadable row.
        key: String,
        /// What failed to decode.
        reason: String,
    },
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Result type alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
