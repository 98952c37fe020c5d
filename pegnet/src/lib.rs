//! Chain follower and grading pipeline for oprpool
//!
//! Walks the chain height by height, grades each round's competing
//! entries, persists the grading summary plus the reward ledger in one
//! transaction per height, and fans a hook event out to the rest of the
//! pipeline. The grading algorithm itself sits behind the [`Grader`] seam.

use thiserror::Error;

pub mod grade;
pub mod node;
pub mod sync;

pub use grade::{DifficultyGrader, GradedEntry, GradedRound, Grader};
pub use node::{Node, PegnetHook};

#[derive(Error, Debug)]
pub enum PegnetError {
    #[error("chain error: {0}")]
    Chain(#[from] oprpool_chain::ChainError),

    #[error("storage error: {0}")]
    Storage(#[from] oprpool_storage::StorageError),

    #[error("grading error: {0}")]
    Grading(String),
}
