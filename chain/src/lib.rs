//! Chain RPC interface for oprpool
//!
//! The on-chain client library is an external collaborator; this crate
//! defines the method surface the pool consumes, the wire structs, and the
//! minute keeper that watches the chain's intra-block clock. Tests inject
//! [`testing::FakeChain`].

use thiserror::Error;

pub mod client;
pub mod http;
pub mod minutekeeper;
pub mod testing;

pub use client::{
    ChainClient, CurrentMinute, DBlock, EBlock, EBlockRef, Entry, EntryReceipt, Heights,
};
pub use http::HttpChainClient;
pub use minutekeeper::{MinuteKeeper, MinuteKeeperStatus};

/// Chain access error types
#[derive(Error, Debug)]
pub enum ChainError {
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
