//! Relational persistence for oprpool
//!
//! SQLite-backed store holding the sync cursor, grading history, payout
//! ledgers, EMA snapshots, entry submissions, and the user registry. All
//! multi-row writes go through explicit transactions; a failed height sync
//! rolls back without advancing the cursor.
//!
//! SQLite integers are signed 64-bit, so u64 target columns are shifted
//! right one bit on write and left on read. The wire contract stays the
//! full u64; only persistence loses the low bit.

use thiserror::Error;

pub mod store;
pub mod tables;

pub use store::{Store, StoreTx};
pub use tables::{
    EmaRow, EntrySubmissionRow, GradeRow, GradedPayoutRow, OwedPayoutsRow, PaidRow,
    UserOwedPayoutRow, UserRow, BLOCKED_SOFT_MAX,
};

/// Storage error types
#[derive(Debug, Error)]
pub enum StorageError {
    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Duplicate row
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Invalid data
    #[error("Invalid data: {0}")]
    InvalidData(String),
}
