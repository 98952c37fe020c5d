//! Versioned oracle price record content.
//!
//! Each round the pool builds one candidate record: the round height, the
//! pool's identity and coinbase address, the previous round's winners, and
//! the current asset prices in protocol order. The marshaled bytes are the
//! entry content submitted on-chain; their hash is the artifact miners grind
//! nonces against.

use std::collections::HashMap;

use crate::constants::winner_count;
use crate::oracle::AssetPrice;
use crate::CoreError;

/// The version 1 asset set, in protocol order.
pub const ASSETS_V1: &[&str] = &[
    "PEG", "USD", "EUR", "JPY", "GBP", "CAD", "CHF", "INR", "SGD", "CNY", "HKD", "KRW", "BRL",
    "PHP", "MXN", "XAU", "XAG", "XPD", "XPT", "XBT", "ETH", "LTC", "RVN", "XBC", "FCT", "BNB",
    "XLM", "ADA", "XMR", "DASH", "ZEC", "DCR",
];

/// Version 2 drops the low-liquidity metals.
pub const ASSETS_V2: &[&str] = &[
    "PEG", "USD", "EUR", "JPY", "GBP", "CAD", "CHF", "INR", "SGD", "CNY", "HKD", "KRW", "BRL",
    "PHP", "MXN", "XAU", "XAG", "XBT", "ETH", "LTC", "RVN", "XBC", "FCT", "BNB", "XLM", "ADA",
    "XMR", "DASH", "ZEC", "DCR",
];

/// Version 4 extends version 2 with additional currencies, cryptos, and the
/// pUSD reference asset.
pub const ASSETS_V4: &[&str] = &[
    "PEG", "USD", "EUR", "JPY", "GBP", "CAD", "CHF", "INR", "SGD", "CNY", "HKD", "KRW", "BRL",
    "PHP", "MXN", "XAU", "XAG", "XBT", "ETH", "LTC", "RVN", "XBC", "FCT", "BNB", "XLM", "ADA",
    "XMR", "DASH", "ZEC", "DCR", "AUD", "NZD", "SEK", "NOK", "RUB", "ZAR", "TRY", "EOS", "LINK",
    "ATOM", "BAT", "XTZ", "pUSD",
];

/// Asset list for a record version.
pub fn assets_for_version(version: u8) -> &'static [&'static str] {
    match version {
        1 => ASSETS_V1,
        4 => ASSETS_V4,
        _ => ASSETS_V2,
    }
}

/// One candidate oracle price record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OprContent {
    /// Height of the round this record competes in
    pub height: i32,
    /// Pool identity string
    pub id: String,
    /// Coinbase address rewards are paid to
    pub address: String,
    /// Short hashes of the previous round's winners (8 bytes each)
    pub winners: Vec<Vec<u8>>,
    /// Prices in protocol asset order, scaled by 1e8
    pub assets: Vec<u64>,
}

impl OprContent {
    /// Orders prices by the protocol asset list and scales them to atomic
    /// units, rounding half up. Every asset in the active set must be
    /// present.
    pub fn assets_from_prices(
        version: u8,
        prices: &HashMap<String, AssetPrice>,
    ) -> Result<Vec<u64>, CoreError> {
        let list = assets_for_version(version);
        let mut out = Vec::with_capacity(list.len());
        for name in list {
            let price = prices
                .get(*name)
                .ok_or_else(|| CoreError::MissingAsset((*name).to_string()))?;
            out.push((price.value * 1e8).round() as u64);
        }
        Ok(out)
    }

    /// Deterministic binary encoding of the record. Callers validate
    /// separately; encoding never fails on well-formed field sizes.
    ///
    /// Layout: version byte, height as big-endian i32, length-prefixed id
    /// and address, winner count plus 8-byte short hashes, asset count as
    /// big-endian u16 plus big-endian u64 prices.
    pub fn marshal(&self, version: u8) -> Result<Vec<u8>, CoreError> {
        let mut buf = Vec::with_capacity(
            1 + 4
                + 1
                + self.id.len()
                + 1
                + self.address.len()
                + 1
                + self.winners.len() * 8
                + 2
                + self.assets.len() * 8,
        );
        buf.push(version);
        buf.extend_from_slice(&self.height.to_be_bytes());
        buf.push(self.id.len() as u8);
        buf.extend_from_slice(self.id.as_bytes());
        buf.push(self.address.len() as u8);
        buf.extend_from_slice(self.address.as_bytes());
        buf.push(self.winners.len() as u8);
        for w in &self.winners {
            buf.extend_from_slice(w);
        }
        buf.extend_from_slice(&(self.assets.len() as u16).to_be_bytes());
        for a in &self.assets {
            buf.extend_from_slice(&a.to_be_bytes());
        }
        Ok(buf)
    }

    /// The version 4 encoding of the same record: wide (u16) length
    /// prefixes throughout, leaving room for the grown identity and asset
    /// fields of later protocol revisions.
    pub fn marshal_v4(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(
            1 + 4
                + 2
                + self.id.len()
                + 2
                + self.address.len()
                + 2
                + self.winners.len() * 8
                + 2
                + self.assets.len() * 8,
        );
        buf.push(4u8);
        buf.extend_from_slice(&self.height.to_be_bytes());
        buf.extend_from_slice(&(self.id.len() as u16).to_be_bytes());
        buf.extend_from_slice(self.id.as_bytes());
        buf.extend_from_slice(&(self.address.len() as u16).to_be_bytes());
        buf.extend_from_slice(self.address.as_bytes());
        buf.extend_from_slice(&(self.winners.len() as u16).to_be_bytes());
        for w in &self.winners {
            buf.extend_from_slice(w);
        }
        buf.extend_from_slice(&(self.assets.len() as u16).to_be_bytes());
        for a in &self.assets {
            buf.extend_from_slice(&a.to_be_bytes());
        }
        buf
    }

    /// Validates the record against the protocol rules for `version`.
    pub fn validate(&self, version: u8) -> Result<(), CoreError> {
        let list = assets_for_version(version);
        if self.assets.len() != list.len() {
            return Err(CoreError::InvalidOpr(format!(
                "expected {} assets, got {}",
                list.len(),
                self.assets.len()
            )));
        }
        if self.assets.iter().any(|a| *a == 0) {
            return Err(CoreError::InvalidOpr("zero price".to_string()));
        }
        if self.winners.len() != winner_count(version) {
            return Err(CoreError::InvalidOpr(format!(
                "expected {} winners, got {}",
                winner_count(version),
                self.winners.len()
            )));
        }
        if self.winners.iter().any(|w| w.len() != 8) {
            return Err(CoreError::InvalidOpr("winner short hash must be 8 bytes".to_string()));
        }
        if self.id.is_empty() || !valid_identity(&self.id) {
            return Err(CoreError::InvalidOpr(format!("bad identity {:?}", self.id)));
        }
        oprpool_util::validate_coinbase_address(&self.address)
            .map_err(|e| CoreError::InvalidAddress(e.to_string()))?;
        Ok(())
    }
}

/// Identities are restricted to alphanumerics and commas.
pub fn valid_identity(id: &str) -> bool {
    !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == ',')
}
