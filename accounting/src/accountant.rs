//! The accountant task.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use log::{debug, error, info, warn};
use rust_decimal::Decimal;
use tokio::sync::mpsc;

use oprpool_core::{JobId, Reward, ShareSubmission};
use oprpool_storage::Store;

use crate::payout::{parse_fee_rate, Payouts};
use crate::share::{Share, ShareMap};
use crate::AccountingError;

const SHARE_QUEUE: usize = 1000;
const REWARD_QUEUE: usize = 1000;
const JOB_QUEUE: usize = 100;

/// Owns the per-round ledgers and turns rewards into owed payouts.
pub struct Accountant {
    store: Arc<Store>,

    jobs: RwLock<HashMap<JobId, ShareMap>>,

    job_tx: mpsc::Sender<JobId>,
    share_tx: mpsc::Sender<ShareSubmission>,
    reward_tx: mpsc::Sender<Reward>,

    job_rx: Mutex<Option<mpsc::Receiver<JobId>>>,
    share_rx: Mutex<Option<mpsc::Receiver<ShareSubmission>>>,
    reward_rx: Mutex<Option<mpsc::Receiver<Reward>>>,

    pool_fee_rate: Decimal,
}

impl Accountant {
    pub fn new(store: Arc<Store>, fee_rate: &str) -> Result<Self, AccountingError> {
        let pool_fee_rate = parse_fee_rate(fee_rate)?;

        let (job_tx, job_rx) = mpsc::channel(JOB_QUEUE);
        let (share_tx, share_rx) = mpsc::channel(SHARE_QUEUE);
        let (reward_tx, reward_rx) = mpsc::channel(REWARD_QUEUE);

        Ok(Accountant {
            store,
            jobs: RwLock::new(HashMap::new()),
            job_tx,
            share_tx,
            reward_tx,
            job_rx: Mutex::new(Some(job_rx)),
            share_rx: Mutex::new(Some(share_rx)),
            reward_rx: Mutex::new(Some(reward_rx)),
            pool_fee_rate,
        })
    }

    pub fn job_channel(&self) -> mpsc::Sender<JobId> {
        self.job_tx.clone()
    }

    pub fn share_channel(&self) -> mpsc::Sender<ShareSubmission> {
        self.share_tx.clone()
    }

    pub fn reward_channel(&self) -> mpsc::Sender<Reward> {
        self.reward_tx.clone()
    }

    pub fn pool_fee_rate(&self) -> Decimal {
        self.pool_fee_rate
    }

    /// Consumes the channel receivers and services them until every sender
    /// side is gone or the future is dropped.
    pub async fn listen(&self) {
        let mut job_rx = self.job_rx.lock().unwrap().take().expect("listen called twice");
        let mut share_rx = self.share_rx.lock().unwrap().take().expect("listen called twice");
        let mut reward_rx = self.reward_rx.lock().unwrap().take().expect("listen called twice");

        loop {
            tokio::select! {
                Some(share) = share_rx.recv() => self.handle_share(share),
                Some(job) = job_rx.recv() => self.handle_new_job(job),
                Some(reward) = reward_rx.recv() => self.handle_reward(reward),
                else => return,
            }
        }
    }

    fn handle_share(&self, submission: ShareSubmission) {
        let share = Share::from(&submission);
        let mut jobs = self.jobs.write().unwrap();
        match jobs.get_mut(&share.job_id) {
            Some(ledger) => ledger.add_share(&share),
            None => {
                debug!(
                    "acct: share submitted, but no job exists job={} miner={} user={}",
                    share.job_id, share.miner_id, share.user_id
                );
            }
        }
    }

    fn handle_new_job(&self, job_id: JobId) {
        let mut jobs = self.jobs.write().unwrap();
        if jobs.contains_key(&job_id) {
            warn!("acct: new job, but already exists job={}", job_id);
            return;
        }
        jobs.insert(job_id, ShareMap::new());
    }

    fn handle_reward(&self, reward: Reward) {
        let pays = {
            let mut jobs = self.jobs.write().unwrap();
            let ledger = jobs.entry(reward.job_id).or_insert_with(|| {
                // Without a ledger everything lands in dust. Keeping the
                // accounting row means the books still balance.
                warn!("acct: reward for job that does not exist job={}", reward.job_id);
                ShareMap::new()
            });

            let by_user = ledger.user_difficulty_sum();
            let by_miner = ledger.miner_difficulty_sum();
            if (by_user - by_miner).abs() > 1e-9 {
                error!(
                    "acct: miner job sum and user job sum differ job={} user={} miner={}",
                    reward.job_id, by_user, by_miner
                );
            }
            ledger.seal();

            Payouts::new(reward, self.pool_fee_rate, ledger)
        };

        if let Err(e) = self.store.save_owed_payouts(&pays.summary, &pays.users) {
            // Payments failed to persist. Don't kill the pool over it, but
            // make the failure loud enough to recover by hand.
            error!(
                "acct: failed to write payouts to database job={}: {}",
                reward.job_id, e
            );
        }

        info!(
            "acct: pool stats job={} reward={} pool-diff={} users={} dust={}",
            reward.job_id,
            reward.pool_reward as f64 / 1e8,
            pays.summary.pool_difficulty,
            pays.users.len(),
            pays.summary.dust,
        );
    }

    /// Read-only snapshot of a round's totals, for the admin surface.
    pub fn job_totals(&self, job_id: JobId) -> Option<(f64, bool)> {
        let jobs = self.jobs.read().unwrap();
        jobs.get(&job_id).map(|l| (l.total_difficulty, l.sealed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accountant() -> Accountant {
        let store = Arc::new(Store::open_in_memory().unwrap());
        Accountant::new(store, "0.05").unwrap()
    }

    fn submission(job_id: i32, user: &str, miner: &str, target: u64) -> ShareSubmission {
        ShareSubmission {
            job_id,
            username: user.to_string(),
            miner_id: miner.to_string(),
            opr_hash: [0u8; 32],
            nonce: vec![1, 2, 3],
            target,
        }
    }

    #[test]
    fn test_rejects_zero_fee_without_sentinel() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        assert!(Accountant::new(store.clone(), "0").is_err());
        assert!(Accountant::new(store.clone(), "").is_err());
        assert!(Accountant::new(store, "-1").is_ok());
    }

    #[test]
    fn test_share_for_unknown_job_is_dropped() {
        let a = accountant();
        a.handle_share(submission(55, "alice", "m1", u64::MAX / 2));
        assert!(a.job_totals(55).is_none());
    }

    #[test]
    fn test_share_and_reward_flow() {
        let a = accountant();
        a.handle_new_job(60);
        a.handle_share(submission(60, "alice", "m1", u64::MAX - (1 << 30)));
        a.handle_share(submission(60, "bob", "m2", u64::MAX - (1 << 30)));

        let (total, sealed) = a.job_totals(60).unwrap();
        assert!(total > 0.0);
        assert!(!sealed);

        a.handle_reward(Reward {
            job_id: 60,
            pool_reward: 100 * 100_000_000,
            winning_count: 1,
            graded_count: 2,
        });

        let (_, sealed) = a.job_totals(60).unwrap();
        assert!(sealed);

        let summary = a.store.owed_payouts(60).unwrap().unwrap();
        assert_eq!(summary.pool_fee, 5 * 100_000_000);
        let users = a.store.user_owed_payouts(60).unwrap();
        assert_eq!(users.len(), 2);
        let distributed: i64 = users.iter().map(|u| u.payout).sum();
        assert_eq!(
            summary.pool_fee + distributed + summary.dust,
            summary.pool_reward
        );
    }

    #[test]
    fn test_reward_for_unknown_job_is_all_dust() {
        let a = accountant();
        a.handle_reward(Reward {
            job_id: 77,
            pool_reward: 10 * 100_000_000,
            winning_count: 1,
            graded_count: 1,
        });
        let summary = a.store.owed_payouts(77).unwrap().unwrap();
        assert_eq!(summary.pool_fee + summary.dust, 10 * 100_000_000);
        assert!(a.store.user_owed_payouts(77).unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_job_is_idempotent() {
        let a = accountant();
        a.handle_new_job(80);
        a.handle_share(submission(80, "alice", "m1", u64::MAX / 2));
        a.handle_new_job(80);
        let (total, _) = a.job_totals(80).unwrap();
        assert!(total > 0.0, "re-announcing a job must not clear its ledger");
    }

    #[tokio::test]
    async fn test_listen_services_channels() {
        let a = Arc::new(accountant());
        let jobs = a.job_channel();
        let shares = a.share_channel();
        let rewards = a.reward_channel();

        let listener = {
            let a = a.clone();
            tokio::spawn(async move { a.listen().await })
        };

        jobs.send(90).await.unwrap();
        shares.send(submission(90, "alice", "m1", u64::MAX - 100)).await.unwrap();
        rewards
            .send(Reward {
                job_id: 90,
                pool_reward: 100_000_000,
                winning_count: 1,
                graded_count: 1,
            })
            .await
            .unwrap();

        // Give the task a moment to drain, then stop it
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        listener.abort();

        let summary = a.store.owed_payouts(90).unwrap().unwrap();
        assert_eq!(summary.pool_reward, 100_000_000);
    }
}
