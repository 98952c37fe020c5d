//! Target and difficulty arithmetic.
//!
//! A target is the big-endian u64 read from the leading bytes of the PoW
//! hash. There is no low bar: higher targets are better, and the network
//! keeps the best N per round. Difficulty relates a target to the fixed
//! "difficulty 1" constant `PDIFF`.

use std::time::Duration;

/// The "difficulty 1" target constant.
pub const PDIFF: u64 = 0xffff_0000_0000_0000;

/// Difficulty of a target relative to [`PDIFF`]. Dimensionless, grows as the
/// target approaches `u64::MAX`.
pub fn difficulty(target: u64) -> f64 {
    PDIFF as f64 / (u64::MAX - target) as f64
}

/// Expected number of hashes needed for a miner's best hash to reach the
/// given target.
pub fn total_hashes(target: u64) -> f64 {
    u64::MAX as f64 / (u64::MAX - target) as f64
}

/// Hashrate estimate for a miner whose best observed target over `dur` was
/// `target`.
pub fn hashrate_from_target(target: u64, dur: Duration) -> f64 {
    let secs = dur.as_secs_f64();
    if secs <= 0.0 {
        return 0.0;
    }
    total_hashes(target) / secs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_difficulty_doubles_with_search_space() {
        // Halving the remaining space above the target doubles difficulty.
        let base = u64::MAX - (1u64 << 40);
        let harder = u64::MAX - (1u64 << 39);
        let ratio = difficulty(harder) / difficulty(base);
        assert!((ratio - 2.0).abs() < 1e-9, "ratio {}", ratio);
    }

    #[test]
    fn test_pdiff_is_difficulty_one_scale() {
        // At target == u64::MAX - (u64::MAX - PDIFF), i.e. PDIFF itself,
        // difficulty is PDIFF / (MAX - PDIFF) which is close to 65536.
        let d = difficulty(PDIFF);
        assert!(d > 65_000.0 && d < 66_000.0, "d {}", d);
    }

    #[test]
    fn test_hashrate_scales_inverse_with_time() {
        let t = u64::MAX - (1u64 << 32);
        let fast = hashrate_from_target(t, Duration::from_secs(60));
        let slow = hashrate_from_target(t, Duration::from_secs(120));
        assert!((fast / slow - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_duration_reports_zero() {
        assert_eq!(hashrate_from_target(u64::MAX / 2, Duration::ZERO), 0.0);
    }
}
