//! Share ledgers.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use oprpool_core::difficulty::{difficulty, hashrate_from_target};
use oprpool_core::ShareSubmission;

/// How many recent targets a sum keeps, best first.
const TARGET_HISTORY: usize = 30;

/// Below this many shares a hashrate estimate is too noisy to report.
const MIN_SHARES_FOR_HASHRATE: i64 = 5;

/// An accepted piece of work, attributed to a user and a miner.
#[derive(Debug, Clone)]
pub struct Share {
    pub job_id: i32,
    pub user_id: String,
    pub miner_id: String,
    pub nonce: Vec<u8>,
    pub target: u64,
    pub difficulty: f64,
}

impl From<&ShareSubmission> for Share {
    fn from(s: &ShareSubmission) -> Self {
        Share {
            job_id: s.job_id,
            user_id: s.username.clone(),
            miner_id: s.miner_id.clone(),
            nonce: s.nonce.clone(),
            target: s.target,
            difficulty: difficulty(s.target),
        }
    }
}

/// Accumulated work for one key within one round.
#[derive(Debug, Clone, Default)]
pub struct ShareSum {
    pub total_difficulty: f64,
    pub total_shares: i64,
    pub first_seen: Option<Instant>,
    pub last_seen: Option<Instant>,
    /// Up to the 30 best targets seen, in descending order
    pub last_targets: Vec<u64>,
}

impl ShareSum {
    fn add(&mut self, share: &Share, now: Instant) {
        self.total_difficulty += share.difficulty;
        self.total_shares += 1;
        if self.first_seen.is_none() {
            self.first_seen = Some(now);
        }
        self.last_seen = Some(now);

        let idx = self.last_targets.partition_point(|t| *t > share.target);
        if idx < TARGET_HISTORY {
            self.last_targets.insert(idx, share.target);
            self.last_targets.truncate(TARGET_HISTORY);
        }
    }

    /// Hashrate estimate from the best observed target over the span of
    /// the key's submissions. Too few shares reports zero.
    pub fn hashrate(&self) -> f64 {
        if self.total_shares < MIN_SHARES_FOR_HASHRATE {
            return 0.0;
        }
        let (first, last) = match (self.first_seen, self.last_seen) {
            (Some(f), Some(l)) => (f, l),
            _ => return 0.0,
        };
        let best = match self.last_targets.first() {
            Some(b) => *b,
            None => return 0.0,
        };
        let elapsed = last.duration_since(first);
        if elapsed == Duration::ZERO {
            return 0.0;
        }
        hashrate_from_target(best, elapsed)
    }
}

/// The ledger for one round: parallel sums keyed by user and by miner,
/// sharing one difficulty total. Once sealed nothing is added.
#[derive(Debug, Clone, Default)]
pub struct ShareMap {
    pub sealed: bool,
    pub total_difficulty: f64,
    pub by_user: HashMap<String, ShareSum>,
    pub by_miner: HashMap<String, ShareSum>,
}

impl ShareMap {
    pub fn new() -> Self {
        ShareMap::default()
    }

    pub fn seal(&mut self) {
        self.sealed = true;
    }

    pub fn add_share(&mut self, share: &Share) {
        self.add_share_at(share, Instant::now())
    }

    fn add_share_at(&mut self, share: &Share, now: Instant) {
        if self.sealed {
            return;
        }
        self.total_difficulty += share.difficulty;
        self.by_user
            .entry(share.user_id.clone())
            .or_default()
            .add(share, now);
        self.by_miner
            .entry(share.miner_id.clone())
            .or_default()
            .add(share, now);
    }

    pub fn user_difficulty_sum(&self) -> f64 {
        self.by_user.values().map(|s| s.total_difficulty).sum()
    }

    pub fn miner_difficulty_sum(&self) -> f64 {
        self.by_miner.values().map(|s| s.total_difficulty).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn share(user: &str, miner: &str, diff: f64) -> Share {
        Share {
            job_id: 1,
            user_id: user.to_string(),
            miner_id: miner.to_string(),
            nonce: vec![0],
            target: u64::MAX - (u64::MAX as f64 / diff) as u64,
            difficulty: diff,
        }
    }

    #[test]
    fn test_share_map_totals() {
        let mut m = ShareMap::new();
        m.add_share(&share("user-1", "m1", 10.0));
        m.add_share(&share("user-1", "m2", 10.0));
        m.add_share(&share("user-2", "m3", 10.0));
        m.add_share(&share("user-3", "m4", 10.0));

        assert_eq!(m.total_difficulty, 40.0);
        assert_eq!(m.by_user["user-1"].total_difficulty, 20.0);
        assert_eq!(m.by_user["user-1"].total_shares, 2);
        assert_eq!(m.by_miner.len(), 4);

        // Both dimensions always sum to the round total
        assert_eq!(m.user_difficulty_sum(), m.total_difficulty);
        assert_eq!(m.miner_difficulty_sum(), m.total_difficulty);
    }

    #[test]
    fn test_sealed_map_drops_shares() {
        let mut m = ShareMap::new();
        m.add_share(&share("user-1", "m1", 5.0));
        m.seal();
        m.add_share(&share("user-1", "m1", 5.0));
        assert_eq!(m.total_difficulty, 5.0);
        assert_eq!(m.by_user["user-1"].total_shares, 1);
    }

    #[test]
    fn test_target_history_is_descending_and_bounded() {
        let mut sum = ShareSum::default();
        let now = Instant::now();
        for i in 0..100u64 {
            let s = Share {
                job_id: 1,
                user_id: "u".to_string(),
                miner_id: "m".to_string(),
                nonce: vec![],
                target: i * 1000,
                difficulty: 1.0,
            };
            sum.add(&s, now);
        }
        assert_eq!(sum.last_targets.len(), TARGET_HISTORY);
        assert!(sum.last_targets.windows(2).all(|w| w[0] >= w[1]));
        // Best of the stream survives at the front
        assert_eq!(sum.last_targets[0], 99_000);
    }

    #[test]
    fn test_hashrate_needs_enough_shares() {
        let mut sum = ShareSum::default();
        let start = Instant::now();
        let s = Share {
            job_id: 1,
            user_id: "u".to_string(),
            miner_id: "m".to_string(),
            nonce: vec![],
            target: u64::MAX - (1u64 << 40),
            difficulty: 1.0,
        };
        for i in 0..4 {
            sum.add(&s, start + Duration::from_secs(i));
        }
        assert_eq!(sum.hashrate(), 0.0);

        sum.add(&s, start + Duration::from_secs(60));
        assert!(sum.hashrate() > 0.0);
    }
}
