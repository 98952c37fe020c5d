//! Proof-of-work hash seam.
//!
//! The production hash function is supplied by the operator's build; the
//! pool only depends on this trait. [`Sha256Hasher`] is the in-tree
//! implementation used by tests and standalone runs.

use sha2::{Digest, Sha256};

/// The PoW primitive: 32 bytes out for arbitrary bytes in.
pub trait PowHasher: Send + Sync {
    fn hash(&self, data: &[u8]) -> [u8; 32];
}

/// sha256 backed [`PowHasher`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Hasher;

impl PowHasher for Sha256Hasher {
    fn hash(&self, data: &[u8]) -> [u8; 32] {
        let digest = Sha256::digest(data);
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        out
    }
}

/// The domain hash over a candidate entry payload. Unlike the PoW hash,
/// this one is fixed by the protocol: plain sha256 of the content bytes.
pub fn opr_hash(content: &[u8]) -> [u8; 32] {
    let digest = Sha256::digest(content);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

/// Computes the target for an (opr hash, nonce) pair.
///
/// The target is the big-endian u64 read from the first eight bytes of
/// `hash(opr_hash || nonce)`. There is no difficulty bar, so the greatest
/// value wins; targets are compared numerically with higher being better.
pub fn compute_target(hasher: &dyn PowHasher, opr_hash: &[u8], nonce: &[u8]) -> u64 {
    let mut buf = Vec::with_capacity(opr_hash.len() + nonce.len());
    buf.extend_from_slice(opr_hash);
    buf.extend_from_slice(nonce);
    let h = hasher.hash(&buf);

    u64::from_be_bytes([h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7]])
}

/// Checks a reported target against a recomputation.
pub fn validate(hasher: &dyn PowHasher, opr_hash: &[u8], nonce: &[u8], target: u64) -> bool {
    compute_target(hasher, opr_hash, nonce) == target
}
