//! Utility functions and types for oprpool

use thiserror::Error;

pub mod address;

pub use address::{validate_coinbase_address, validate_ec_secret_address, AddressError};

#[derive(Error, Debug)]
pub enum UtilError {
    #[error("Hex decoding error: {0}")]
    HexError(#[from] hex::FromHexError),

    #[error("Base58 decoding error: {0}")]
    Base58Error(#[from] bs58::decode::Error),

    #[error("Invalid format: {0}")]
    InvalidFormat(String),
}

/// Converts a hex string to bytes
pub fn hex_to_bytes(hex: &str) -> Result<Vec<u8>, UtilError> {
    Ok(hex::decode(hex)?)
}

/// Converts bytes to a hex string
pub fn bytes_to_hex(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

/// Parses a hex string into a fixed 32 byte array
pub fn hex_to_hash(hex_str: &str) -> Result<[u8; 32], UtilError> {
    let bytes = hex::decode(hex_str)?;
    if bytes.len() != 32 {
        return Err(UtilError::InvalidFormat(format!(
            "expected 32 bytes, got {}",
            bytes.len()
        )));
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_round_trip() {
        let bytes = vec![0xde, 0xad, 0xbe, 0xef];
        assert_eq!(hex_to_bytes(&bytes_to_hex(&bytes)).unwrap(), bytes);
    }

    #[test]
    fn test_hex_to_hash_rejects_short_input() {
        assert!(hex_to_hash("deadbeef").is_err());
        assert!(hex_to_hash(&"00".repeat(32)).is_ok());
    }
}
