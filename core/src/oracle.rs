//! Oracle price source seam.
//!
//! Price polling (the data sources, their retry schedules, API keys) is an
//! external collaborator. The job producer asks only for the active asset
//! set of the version it is building.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OracleError {
    #[error("price source failure: {0}")]
    Source(String),

    #[error("stale quote for {asset}: {age_secs}s old")]
    Stale { asset: String, age_secs: i64 },
}

/// One quoted price.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AssetPrice {
    /// Quote in USD
    pub value: f64,
    /// When the quote was taken
    pub when: DateTime<Utc>,
}

/// A polled set of asset prices, keyed by asset symbol.
pub trait PriceOracle: Send + Sync {
    /// Pulls a quote for every asset in the active set of `version`. An
    /// error skips the round; the pool never mines on partial pricing.
    fn pull_all_prices(&self, version: u8) -> Result<HashMap<String, AssetPrice>, OracleError>;
}

/// Fixed-price oracle for tests and dry runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedOracle {
    /// Price reported for every asset; defaults to 1.0
    pub value: f64,
}

impl PriceOracle for FixedOracle {
    fn pull_all_prices(&self, version: u8) -> Result<HashMap<String, AssetPrice>, OracleError> {
        let value = if self.value == 0.0 { 1.0 } else { self.value };
        let now = Utc::now();
        Ok(crate::opr::assets_for_version(version)
            .iter()
            .map(|name| ((*name).to_string(), AssetPrice { value, when: now }))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opr::assets_for_version;

    #[test]
    fn test_fixed_oracle_covers_active_set() {
        let oracle = FixedOracle { value: 2.5 };
        let prices = oracle.pull_all_prices(4).unwrap();
        for asset in assets_for_version(4) {
            assert_eq!(prices[*asset].value, 2.5);
        }
    }
}
