//! Settings loader.
//!
//! Reads an optional TOML file over built-in defaults. Key names follow
//! the `section.key` scheme throughout the workspace's logs and docs.

use std::path::Path;

use config::{Config, ConfigError, File};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub app: AppSettings,
    pub database: DatabaseSettings,
    pub chain: ChainSettings,
    pub oracle: OracleSettings,
    pub pool: PoolSettings,
    pub stratum: StratumSettings,
    pub submit: SubmitSettings,
    pub pegnet: PegnetSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppSettings {
    /// error | warn | info | debug | trace
    pub loglevel: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainSettings {
    pub endpoint: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OracleSettings {
    /// Only the fixed source ships in-tree; production oracles are linked
    /// by the operator behind the PriceOracle seam
    pub source: String,
    pub fixed_price: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PoolSettings {
    /// Decimal in [0, 1]; -1 means no fee. An implicit 0 is refused.
    pub fee_rate: String,
    pub identity: String,
    pub coinbase_address: String,
    pub es_address: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StratumSettings {
    pub port: u16,
    pub require_auth: bool,
    pub validate_all_shares: bool,
    pub welcome_message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitSettings {
    pub cutoff: i32,
    pub ema_n: i32,
    pub soft_max: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PegnetSettings {
    /// Seconds between height polls once synced
    pub polling_period: u64,
    /// Seconds to back off after an upstream failure
    pub retry_period: u64,
}

impl Settings {
    pub fn load(path: Option<&Path>) -> Result<Settings, ConfigError> {
        let mut builder = Config::builder()
            .set_default("app.loglevel", "info")?
            .set_default("database.path", "oprpool.db")?
            .set_default("chain.endpoint", "http://localhost:8088/v2")?
            .set_default("oracle.source", "fixed")?
            .set_default("oracle.fixed_price", 1.0)?
            .set_default("pool.fee_rate", "")?
            .set_default("pool.identity", "")?
            .set_default("pool.coinbase_address", "")?
            .set_default("pool.es_address", "")?
            .set_default("stratum.port", 1234)?
            .set_default("stratum.require_auth", true)?
            .set_default("stratum.validate_all_shares", false)?
            .set_default("stratum.welcome_message", "")?
            .set_default("submit.cutoff", 200)?
            .set_default("submit.ema_n", 36)?
            .set_default("submit.soft_max", 25)?
            .set_default("pegnet.polling_period", 2)?
            .set_default("pegnet.retry_period", 5)?;

        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }

        builder.build()?.try_deserialize()
    }
}
