//! Commitment primitives for StepSeal witness bundles.
//!
//! Everything a third-party auditor needs to recompute a step's root
//! from its stored artifacts lives here: canonical JSON bytes, the
//! domain-separated SHA-256 helpers, the Merkle tree over witness
//! leaves, and the ed25519 root-signature scheme. The core crate
//! (contracts, orchestrator, audit scan) builds on top of this one and
//! never hashes anything through a different code path.

pub mod canon;
pub mod merkle;
pub mod signing;

use sha2::{Digest, Sha256};
use thiserror::Error;

/// 32-byte digest used for witness leaves, Merkle nodes and roots.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash32(pub [u8; 32]);

impl Hash32 {
    pub const ZERO: Hash32 = Hash32([0u8; 32]);

    /// Lowercase hex, 64 characters. This is the form stored in
    /// `root_hash.txt` and in every artifact field.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, ProofError> {
        let bytes = hex::decode(s).map_err(|e| ProofError::BadHex(e.to_string()))?;
        if bytes.len() != 32 {
            return Err(ProofError::BadDigestLength(bytes.len()));
        }
        let mut out = [0u8; 32];
        out.copy_from_slice(&bytes);
        Ok(Hash32(out))
    }
}

impl std::fmt::Display for Hash32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

#[derive(Debug, Error)]
pub enum ProofError {
    #[error("invalid hex: {0}")]
    BadHex(String),
    #[error("digest must be 32 bytes, got {0}")]
    BadDigestLength(usize),
    #[error("invalid key material: {0}")]
    BadKey(String),
    #[error("signature must be 64 bytes, got {0}")]
    BadSignatureLength(usize),
    #[error("signature verification failed")]
    SignatureInvalid,
    #[error("unknown signature scheme: {0}")]
    UnknownScheme(String),
    #[error("canonical serialization failed: {0}")]
    Canon(String),
}

// =============================================================================
// Domain separation (v1)
// =============================================================================

/// Tag for hashing a canonical witness serialization into a leaf.
pub const WITNESS_LEAF_DOMAIN_V1: &[u8] = b"STEPSEAL_WITNESS_LEAF_V1";

/// Tag for hashing the previous step's root into the final chain leaf.
pub const CHAIN_LEAF_DOMAIN_V1: &[u8] = b"STEPSEAL_CHAIN_LEAF_V1";

/// Tag for interior Merkle nodes.
pub const MERKLE_NODE_DOMAIN_V1: &[u8] = b"STEPSEAL_MERKLE_NODE_V1";

/// Compute a plain SHA-256 digest.
pub fn sha256(data: &[u8]) -> Hash32 {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    Hash32(out)
}

/// Compute a domain-separated SHA-256 digest: `H(domain || data)`.
pub fn sha256_domain(domain: &[u8], data: &[u8]) -> Hash32 {
    let mut hasher = Sha256::new();
    hasher.update(domain);
    hasher.update(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    Hash32(out)
}

/// Hash canonical witness bytes into a Merkle leaf.
pub fn witness_leaf(canonical_bytes: &[u8]) -> Hash32 {
    sha256_domain(WITNESS_LEAF_DOMAIN_V1, canonical_bytes)
}

/// Hash a previous root (hex form) into the final chain-linkage leaf.
pub fn chain_leaf(previous_root_hex: &str) -> Hash32 {
    sha256_domain(CHAIN_LEAF_DOMAIN_V1, previous_root_hex.as_bytes())
}

/// Hash two child nodes into a parent node.
pub fn hash_pair(left: &Hash32, right: &Hash32) -> Hash32 {
    let mut combined = [0u8; 64];
    combined[..32].copy_from_slice(&left.0);
    combined[32..].copy_from_slice(&right.0);
    sha256_domain(MERKLE_NODE_DOMAIN_V1, &combined)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_deterministic() {
        assert_eq!(sha256(b"witness"), sha256(b"witness"));
        assert_ne!(sha256(b"witness"), sha256(b"witnesz"));
    }

    #[test]
    fn domains_separate() {
        assert_ne!(witness_leaf(b"x"), chain_leaf("x"));
        assert_ne!(witness_leaf(b"x"), sha256(b"x"));
    }

    #[test]
    fn hex_round_trip() {
        let h = sha256(b"abc");
        let parsed = Hash32::from_hex(&h.to_hex()).unwrap();
        assert_eq!(h, parsed);
    }

    #[test]
    fn from_hex_rejects_short_digest() {
        assert!(Hash32::from_hex("deadbeef").is_err());
        assert!(Hash32::from_hex("zz").is_err());
    }
}
