//! Human readable address validation.
//!
//! Addresses are base58 strings carrying a two byte kind prefix, a 32 byte
//! payload, and a four byte double-sha256 checksum. The pool only ever needs
//! to check addresses syntactically; key handling lives with the external
//! signer.

use sha2::{Digest, Sha256};
use thiserror::Error;

/// Public factoid address prefix ("FA")
const COINBASE_PREFIX: [u8; 2] = [0x5f, 0xb1];
/// Entry credit secret address prefix ("Es")
const EC_SECRET_PREFIX: [u8; 2] = [0x5d, 0xb6];

/// Decoded address length: 2 prefix + 32 payload + 4 checksum
const ADDRESS_LEN: usize = 38;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum AddressError {
    #[error("invalid base58 encoding")]
    Base58,

    #[error("invalid address length: {0}")]
    Length(usize),

    #[error("wrong address prefix")]
    Prefix,

    #[error("checksum mismatch")]
    Checksum,
}

fn validate(address: &str, prefix: [u8; 2]) -> Result<(), AddressError> {
    let decoded = bs58::decode(address)
        .into_vec()
        .map_err(|_| AddressError::Base58)?;

    if decoded.len() != ADDRESS_LEN {
        return Err(AddressError::Length(decoded.len()));
    }
    if decoded[0..2] != prefix {
        return Err(AddressError::Prefix);
    }

    let body = &decoded[0..34];
    let checksum = &decoded[34..38];

    let first = Sha256::digest(body);
    let second = Sha256::digest(first);
    if second[0..4] != *checksum {
        return Err(AddressError::Checksum);
    }

    Ok(())
}

/// Checks that a payout/coinbase address is a syntactically valid public
/// factoid address.
pub fn validate_coinbase_address(address: &str) -> Result<(), AddressError> {
    validate(address, COINBASE_PREFIX)
}

/// Checks that an entry credit secret address is syntactically valid. The
/// pool pays entry commits with this address.
pub fn validate_ec_secret_address(address: &str) -> Result<(), AddressError> {
    validate(address, EC_SECRET_PREFIX)
}

/// Encodes a 32 byte payload as an address with the given prefix. Test and
/// tooling helper; the pool never mints addresses on its own.
pub fn encode_address(prefix: [u8; 2], payload: &[u8; 32]) -> String {
    let mut body = Vec::with_capacity(ADDRESS_LEN);
    body.extend_from_slice(&prefix);
    body.extend_from_slice(payload);

    let first = Sha256::digest(&body);
    let second = Sha256::digest(first);
    body.extend_from_slice(&second[0..4]);

    bs58::encode(body).into_string()
}

/// Encodes a payload as a public factoid address.
pub fn encode_coinbase_address(payload: &[u8; 32]) -> String {
    encode_address(COINBASE_PREFIX, payload)
}

/// Encodes a payload as an entry credit secret address.
pub fn encode_ec_secret_address(payload: &[u8; 32]) -> String {
    encode_address(EC_SECRET_PREFIX, payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_coinbase() {
        let addr = encode_coinbase_address(&[7u8; 32]);
        assert!(addr.starts_with("FA"));
        assert_eq!(validate_coinbase_address(&addr), Ok(()));
    }

    #[test]
    fn test_round_trip_ec_secret() {
        let addr = encode_ec_secret_address(&[9u8; 32]);
        assert!(addr.starts_with("Es"));
        assert_eq!(validate_ec_secret_address(&addr), Ok(()));
    }

    #[test]
    fn test_rejects_wrong_prefix() {
        let addr = encode_ec_secret_address(&[1u8; 32]);
        assert_eq!(validate_coinbase_address(&addr), Err(AddressError::Prefix));
    }

    #[test]
    fn test_rejects_corrupted_checksum() {
        let mut addr = encode_coinbase_address(&[3u8; 32]);
        // Flip the last character to something else in the base58 alphabet
        let last = addr.pop().unwrap();
        addr.push(if last == '1' { '2' } else { '1' });

        let err = validate_coinbase_address(&addr);
        assert!(matches!(
            err,
            Err(AddressError::Checksum) | Err(AddressError::Length(_))
        ));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(matches!(
            validate_coinbase_address("FAnotanaddress"),
            Err(AddressError::Length(_))
        ));
        assert_eq!(validate_coinbase_address("0OIl"), Err(AddressError::Base58));
    }
}
