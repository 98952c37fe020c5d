//! Jobs, shares, and rewards — the messages that flow through the pipeline.

use serde::{Deserialize, Serialize};

/// Jobs are identified by the height of the round being mined. The stratum
/// wire carries the decimal string form.
pub type JobId = i32;

/// A mining job, immutable once published for a given round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    /// Height of the round being mined
    pub id: JobId,
    /// Domain hash over the pool's candidate entry payload
    pub opr_hash: [u8; 32],
    /// Canonical candidate entry content
    pub payload: Vec<u8>,
    /// Alternate encoding for the newer protocol version
    pub payload_v4: Vec<u8>,
}

impl Job {
    /// A degenerate job carries no payload and is never broadcast. It exists
    /// so downstream consumers can track non-top rounds.
    pub fn degenerate(id: JobId) -> Self {
        Job {
            id,
            opr_hash: [0u8; 32],
            payload: Vec::new(),
            payload_v4: Vec::new(),
        }
    }

    pub fn is_degenerate(&self) -> bool {
        self.opr_hash == [0u8; 32]
    }

    pub fn opr_hash_hex(&self) -> String {
        hex::encode(self.opr_hash)
    }
}

/// A miner-reported solution that passed the stratum acceptance checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareSubmission {
    pub job_id: JobId,
    pub username: String,
    pub miner_id: String,
    pub opr_hash: [u8; 32],
    pub nonce: Vec<u8>,
    pub target: u64,
}

/// What the pool earned for a completed round, computed by scanning the
/// graded set for entries bearing the pool's identity or coinbase address.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Reward {
    /// Height of the rewarded round
    pub job_id: JobId,
    /// Pool earnings in atomic units
    pub pool_reward: i64,
    /// Number of pool entries in the winning set
    pub winning_count: i32,
    /// Number of pool entries in the graded set
    pub graded_count: i32,
}
