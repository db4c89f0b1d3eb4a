//! Store-specific error types.

use thiserror::Error;

/// Errors that can occur while querying a store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store has been closed.
    #[error("store already closed")]
    Closed,

    /// Database operation failed (sqlx error).
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A row's column count differs from the first row of the same result.
    #[error("row {row} has {found} columns, expected {expected}")]
    ColumnMismatch {
        row: usize,
        expected: usize,
        found: usize,
    },

    /// A column held NULL, which has no string rendering.
    #[error("row {row} column {column} is NULL")]
    NullColumn { row: usize, column: usize },

    /// Static row text is malformed.
    #[error("invalid rows: {0}")]
    InvalidRows(String),
}
