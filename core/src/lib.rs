//! Core types and protocol rules for oprpool
//!
//! This crate defines the data model shared by every pool subsystem: jobs,
//! shares, rewards, the target/difficulty arithmetic, and the versioned
//! oracle price record payload. It also holds the trait seams for the
//! external collaborators (PoW hasher, price oracle, submission gate) so
//! that tests can inject in-memory fakes.

use thiserror::Error;

pub mod constants;
pub mod difficulty;
pub mod hasher;
pub mod job;
pub mod opr;
pub mod oracle;
pub mod sharecheck;

pub use hasher::{compute_target, PowHasher, Sha256Hasher};
pub use job::{Job, JobId, Reward, ShareSubmission};
pub use opr::OprContent;
pub use oracle::{AssetPrice, FixedOracle, OracleError, PriceOracle};
pub use sharecheck::{AlwaysYesShareCheck, ShareCheck};

/// Core error types
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid OPR content: {0}")]
    InvalidOpr(String),

    #[error("Missing asset price: {0}")]
    MissingAsset(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Hex decoding error: {0}")]
    Hex(#[from] hex::FromHexError),
}
