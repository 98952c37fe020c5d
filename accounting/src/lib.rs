//! Per-round share ledgers and proportional payouts for oprpool
//!
//! The accountant owns the in-memory share ledgers. Producers reach it only
//! through channels: new jobs open a ledger, accepted shares accumulate
//! into it, and a reward seals it and turns the proportions into owed
//! payouts. All monetary arithmetic runs on fixed-point decimals at eight
//! digits; amounts are `i64` atomic units and rounding remainders are
//! tracked as dust, never distributed.

use thiserror::Error;

pub mod accountant;
pub mod pay;
pub mod payout;
pub mod share;

pub use accountant::Accountant;
pub use pay::{calculate_payments, write_payments, Payment};
pub use payout::Payouts;
pub use share::{Share, ShareMap, ShareSum};

/// Decimal precision for fees and proportions.
pub const ACCOUNTING_PRECISION: u32 = 8;

#[derive(Error, Debug)]
pub enum AccountingError {
    #[error("invalid pool fee: {0}")]
    InvalidFee(String),

    #[error("storage error: {0}")]
    Storage(#[from] oprpool_storage::StorageError),
}
