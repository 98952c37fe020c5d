//! Row types for the pool's tables.

use chrono::{DateTime, Utc};

/// One graded round, keyed by height.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GradeRow {
    pub height: i32,
    pub version: u8,
    /// Comma separated winner short hashes. If the round had no winners,
    /// these are carried forward from the previous round.
    pub short_hashes: String,
    pub cutoff: i32,
    pub count: i32,
    pub eblock_keymr: String,
    pub prev_keymr: String,
    pub eb_sequence: i32,
}

impl GradeRow {
    pub fn winners(&self) -> Vec<String> {
        if self.short_hashes.is_empty() {
            return Vec::new();
        }
        self.short_hashes.split(',').map(str::to_string).collect()
    }
}

/// One graded entry's reward line, up to the top 50 per round.
#[derive(Debug, Clone, Default)]
pub struct GradedPayoutRow {
    pub height: i32,
    pub position: i32,
    pub reward: i64,
    pub coinbase_address: String,
    pub identity: String,
    pub entry_hash: String,
}

/// Sealed per-round payout summary.
#[derive(Debug, Clone, Default)]
pub struct OwedPayoutsRow {
    pub job_id: i32,
    pub pool_reward: i64,
    pub winning_count: i32,
    pub graded_count: i32,
    /// Decimal string, 8 digit precision
    pub pool_fee_rate: String,
    pub pool_fee: i64,
    pub dust: i64,
    pub pool_difficulty: f64,
    pub pdiff: f64,
    pub total_hashrate: f64,
}

/// One user's cut of a sealed round. Primary key (job_id, user_id).
#[derive(Debug, Clone, Default)]
pub struct UserOwedPayoutRow {
    pub job_id: i32,
    pub user_id: String,
    pub user_difficulty: f64,
    pub total_submissions: i64,
    /// Decimal string, 8 digit precision
    pub proportion: String,
    pub payout: i64,
    pub hashrate: f64,
}

/// A processed payment receipt. Unique on entry hash.
#[derive(Debug, Clone, Default)]
pub struct PaidRow {
    pub id: i64,
    pub entry_hash: String,
    pub user_id: String,
    pub payout_address: String,
    pub payment_amount: i64,
}

/// EMA snapshot for one observed block.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EmaRow {
    pub block_height: i32,
    pub job_id: i32,
    pub cutoff: i32,
    pub minimum_target: u64,
    pub ema_value: u64,
    pub last_graded: u64,
    pub last_graded_index: i32,
    pub n: i32,
}

/// A share the submitter acted on, published or blocked.
#[derive(Debug, Clone, Default)]
pub struct EntrySubmissionRow {
    pub id: i64,
    pub job_id: i32,
    pub opr_hash: String,
    pub nonce: String,
    pub target: u64,
    pub entry_hash: String,
    pub commit_txid: String,
    /// 0 when published, -1 when rejected by the soft-max cap
    pub blocked: i32,
}

/// Soft-max rejection marker for [`EntrySubmissionRow::blocked`].
pub const BLOCKED_SOFT_MAX: i32 = -1;

/// A registered user.
#[derive(Debug, Clone, Default)]
pub struct UserRow {
    pub uid: String,
    pub payout_address: String,
    pub joined: Option<DateTime<Utc>>,
}
