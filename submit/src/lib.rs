//! On-chain share submission for oprpool
//!
//! Decides which miner shares the pool publishes as entries. Shares must
//! beat the moving average of the network's minimum accepted difficulty,
//! rank inside the per-round soft-max cap, and arrive while the minute
//! keeper has the window open.

use thiserror::Error;

pub mod list;
pub mod submit;

pub use list::insert_target;
pub use submit::{compute_ema, RoundState, SubmissionJob, Submitter};

#[derive(Error, Debug)]
pub enum SubmitError {
    #[error("chain error: {0}")]
    Chain(#[from] oprpool_chain::ChainError),

    #[error("storage error: {0}")]
    Storage(#[from] oprpool_storage::StorageError),
}
