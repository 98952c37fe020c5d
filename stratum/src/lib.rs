//! Stratum session multiplexer for oprpool
//!
//! Serves many concurrent TCP clients speaking newline-delimited JSON-RPC.
//! Each connection is a miner session with its own reader and writer task;
//! the server validates and deduplicates submissions, hands out disjoint
//! nonce-prefix search spaces, and broadcasts each new job to every
//! session. Accepted shares fan out on export channels; the server never
//! touches the ledgers itself.

use thiserror::Error;

pub mod auth;
pub mod miner;
pub mod minermap;
pub mod rpc;
pub mod server;

pub use auth::{Authority, OpenAuthority};
pub use miner::{MinerConn, MinerSnapshot, Notification};
pub use minermap::MinerMap;
pub use rpc::{Request, Response, RpcError, UnknownRpc};
pub use server::{Server, StratumConfig};

/// Stratum protocol errors
#[derive(Debug, Error)]
pub enum StratumError {
    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
