//! Proportional payout construction.
//!
//! Given a sealed ledger and the round's reward, compute the pool cut and
//! each user's share. Fee and proportion math runs on decimals truncated to
//! eight digits; every division remainder lands in dust, which is recorded
//! on the round and never distributed.

use rust_decimal::prelude::*;
use rust_decimal::Decimal;

use oprpool_core::difficulty::PDIFF;
use oprpool_core::Reward;
use oprpool_storage::{OwedPayoutsRow, UserOwedPayoutRow};

use crate::share::ShareMap;
use crate::ACCOUNTING_PRECISION;

/// A sealed round's payouts, ready to persist.
#[derive(Debug, Clone, Default)]
pub struct Payouts {
    pub summary: OwedPayoutsRow,
    pub users: Vec<UserOwedPayoutRow>,
}

impl Payouts {
    /// Computes the full payout breakdown for one rewarded round.
    pub fn new(reward: Reward, fee_rate: Decimal, ledger: &ShareMap) -> Payouts {
        let mut summary = OwedPayoutsRow {
            job_id: reward.job_id,
            pool_reward: reward.pool_reward,
            winning_count: reward.winning_count,
            graded_count: reward.graded_count,
            pool_fee_rate: fee_rate.to_string(),
            pool_difficulty: ledger.total_difficulty,
            pdiff: PDIFF as f64,
            ..Default::default()
        };

        let remaining = take_pool_cut(&mut summary, fee_rate);

        let total_diff = ledger.total_difficulty;
        let mut users = Vec::with_capacity(ledger.by_user.len());
        let mut distributed: i64 = 0;

        if total_diff > 0.0 {
            // Deterministic order keeps replays byte-identical
            let mut keys: Vec<&String> = ledger.by_user.keys().collect();
            keys.sort();

            for uid in keys {
                let sum = &ledger.by_user[uid];
                let proportion = Decimal::from_f64(sum.total_difficulty / total_diff)
                    .unwrap_or_default()
                    .trunc_with_scale(ACCOUNTING_PRECISION);
                let payout = (Decimal::from(remaining) * proportion)
                    .floor()
                    .to_i64()
                    .unwrap_or(0);
                distributed += payout;

                users.push(UserOwedPayoutRow {
                    job_id: reward.job_id,
                    user_id: uid.clone(),
                    user_difficulty: sum.total_difficulty,
                    total_submissions: sum.total_shares,
                    proportion: proportion.to_string(),
                    payout,
                    hashrate: sum.hashrate(),
                });
            }
        }

        summary.dust = remaining - distributed;
        summary.total_hashrate = users.iter().map(|u| u.hashrate).sum();

        Payouts { summary, users }
    }
}

/// Takes the pool's cut out of the reward, recording the fee on the
/// summary. Returns what is left for the users.
fn take_pool_cut(summary: &mut OwedPayoutsRow, fee_rate: Decimal) -> i64 {
    if fee_rate.is_zero() {
        return summary.pool_reward;
    }
    let fee = (Decimal::from(summary.pool_reward) * fee_rate)
        .floor()
        .to_i64()
        .unwrap_or(0);
    summary.pool_fee = fee;
    summary.pool_reward - fee
}

/// Parses the configured fee rate string.
///
/// An unset or `"0"` rate is refused so an operator cannot waive the fee by
/// accident; `-1` is the explicit no-fee sentinel. Anything else must be a
/// decimal in [0, 1], truncated to eight digits.
pub fn parse_fee_rate(raw: &str) -> Result<Decimal, crate::AccountingError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "0" {
        return Err(crate::AccountingError::InvalidFee(
            "a 0 fee must be explicit: set the rate to -1 for no fee".to_string(),
        ));
    }
    if trimmed == "-1" {
        return Ok(Decimal::ZERO);
    }
    let rate = Decimal::from_str(trimmed)
        .map_err(|e| crate::AccountingError::InvalidFee(e.to_string()))?;
    if rate < Decimal::ZERO || rate > Decimal::ONE {
        return Err(crate::AccountingError::InvalidFee(format!(
            "pool fee must be between 0 and 1, got {}",
            rate
        )));
    }
    Ok(rate.trunc_with_scale(ACCOUNTING_PRECISION))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::share::Share;
    use rand::Rng;

    fn reward(job_id: i32, pool_reward: i64) -> Reward {
        Reward {
            job_id,
            pool_reward,
            winning_count: 2,
            graded_count: 4,
        }
    }

    fn ledger_with(users: &[(&str, f64)]) -> ShareMap {
        let mut m = ShareMap::new();
        for (uid, diff) in users {
            m.add_share(&Share {
                job_id: 1,
                user_id: uid.to_string(),
                miner_id: format!("{}-miner", uid),
                nonce: vec![0],
                target: u64::MAX / 2,
                difficulty: *diff,
            });
        }
        m.seal();
        m
    }

    #[test]
    fn test_pool_cut_vectors() {
        // (rate, reward, remaining, cut)
        let vecs = [
            ("-1", 10 * 100_000_000i64, 10 * 100_000_000i64, 0i64),
            ("0.01", 100_000_000, 99_000_000, 1_000_000),
            ("0.05", 500 * 100_000_000, 475 * 100_000_000, 25 * 100_000_000),
            ("0.10", 500 * 100_000_000, 450 * 100_000_000, 50 * 100_000_000),
            ("1", 500 * 100_000_000, 0, 500 * 100_000_000),
        ];
        for (rate, r, remaining, cut) in vecs {
            let fee = parse_fee_rate(rate).unwrap();
            let mut summary = OwedPayoutsRow {
                pool_reward: r,
                ..Default::default()
            };
            let left = take_pool_cut(&mut summary, fee);
            assert_eq!(left, remaining, "rate {}", rate);
            assert_eq!(summary.pool_fee, cut, "rate {}", rate);
        }
    }

    #[test]
    fn test_fee_rate_parsing() {
        assert!(parse_fee_rate("0").is_err());
        assert!(parse_fee_rate("").is_err());
        assert!(parse_fee_rate("1.5").is_err());
        assert!(parse_fee_rate("-0.3").is_err());
        assert_eq!(parse_fee_rate("-1").unwrap(), Decimal::ZERO);
        assert_eq!(parse_fee_rate("0.05").unwrap().to_string(), "0.05");
    }

    #[test]
    fn test_single_miner_takes_everything_after_fee() {
        let ledger = ledger_with(&[("alice", 50.0)]);
        let pays = Payouts::new(
            reward(10, 500 * 100_000_000),
            parse_fee_rate("0.05").unwrap(),
            &ledger,
        );
        assert_eq!(pays.summary.pool_fee, 25 * 100_000_000);
        assert_eq!(pays.users.len(), 1);
        assert_eq!(pays.users[0].payout, 475 * 100_000_000);
        assert_eq!(pays.summary.dust, 0);
    }

    #[test]
    fn test_no_fee_sentinel() {
        let ledger = ledger_with(&[("alice", 1.0)]);
        let pays = Payouts::new(
            reward(11, 10 * 100_000_000),
            parse_fee_rate("-1").unwrap(),
            &ledger,
        );
        assert_eq!(pays.summary.pool_fee, 0);
        assert_eq!(pays.summary.dust, 0);
        assert_eq!(pays.users[0].payout, 10 * 100_000_000);
    }

    #[test]
    fn test_conservation_with_random_rounds() {
        let mut rng = rand::thread_rng();
        for _ in 0..50 {
            let n_users = rng.gen_range(1..=100);
            let users: Vec<(String, f64)> = (0..n_users)
                .map(|i| (format!("user-{:03}", i), rng.gen_range(0.001..1000.0)))
                .collect();
            let refs: Vec<(&str, f64)> = users.iter().map(|(u, d)| (u.as_str(), *d)).collect();
            let ledger = ledger_with(&refs);

            let pool_reward = rng.gen_range(1..=1_000_000i64) * 100_000_000;
            let rate = format!("{:.4}", rng.gen_range(0.0f64..1.0));
            let fee_rate = parse_fee_rate(&rate).unwrap_or(Decimal::ZERO);

            let pays = Payouts::new(reward(1, pool_reward), fee_rate, &ledger);

            let distributed: i64 = pays.users.iter().map(|u| u.payout).sum();
            // Exact conservation
            assert_eq!(
                pays.summary.pool_fee + distributed + pays.summary.dust,
                pool_reward
            );
            assert!(pays.summary.dust >= 0);
            // Dust stays under 0.001% of the reward
            assert!(
                (pays.summary.dust as f64) <= 0.00001 * pool_reward as f64 + 1.0,
                "dust {} reward {}",
                pays.summary.dust,
                pool_reward
            );

            // Proportions sum into [0.9999, 1]
            let prop_sum: f64 = pays
                .users
                .iter()
                .map(|u| u.proportion.parse::<f64>().unwrap())
                .sum();
            assert!(prop_sum <= 1.0 + 1e-9, "prop sum {}", prop_sum);
            assert!(prop_sum >= 0.9999, "prop sum {}", prop_sum);
        }
    }

    #[test]
    fn test_zero_users_dust_absorbs_reward() {
        let ledger = ShareMap::new();
        let pays = Payouts::new(
            reward(12, 42 * 100_000_000),
            parse_fee_rate("0.05").unwrap(),
            &ledger,
        );
        assert!(pays.users.is_empty());
        assert_eq!(
            pays.summary.pool_fee + pays.summary.dust,
            42 * 100_000_000
        );
    }
}
