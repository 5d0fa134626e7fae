//! Root signatures.
//!
//! Signing a step is an explicit operation performed after the bundle
//! is sealed; it is never implicit in sealing, and an unsigned step is
//! not a verification failure unless the auditor demands signatures.
//!
//! The message signed is the ASCII lowercase hex of the root, exactly
//! the content of `root_hash.txt` minus the trailing newline, so a
//! holder of the ledger public key can verify a step with nothing but
//! the two small text files.
//!
//! # Security
//!
//! - ed25519 via `ed25519-dalek`
//! - `OsRng` for key generation; production keys should come from
//!   secure storage rather than be generated at runtime
//! - seed material is zeroized after use; never log private keys

use crate::{Hash32, ProofError};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use tracing::{debug, warn};
use zeroize::Zeroize;

/// 64-byte ed25519 signature.
pub type SignatureBytes = [u8; 64];

/// 32-byte ed25519 public key.
pub type PublicKeyBytes = [u8; 32];

/// Identifier of a signature scheme, carried in configuration and
/// checked by the audit verifier. Exactly one scheme exists today.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignatureScheme {
    Ed25519V1,
}

impl SignatureScheme {
    pub const ED25519_V1: &'static str = "ed25519-v1";

    pub fn from_id(id: &str) -> Result<Self, ProofError> {
        match id {
            Self::ED25519_V1 => Ok(Self::Ed25519V1),
            other => Err(ProofError::UnknownScheme(other.to_string())),
        }
    }

    pub fn id(&self) -> &'static str {
        match self {
            Self::Ed25519V1 => Self::ED25519_V1,
        }
    }
}

/// Private key that signs step roots for one stream.
#[derive(Clone)]
pub struct RootSigningKey {
    signing_key: SigningKey,
}

impl RootSigningKey {
    /// Generate a fresh keypair from the OS CSPRNG. Suitable for tests
    /// and ephemeral streams; load long-lived keys from storage.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    /// Load from a hex-encoded 32-byte seed; the intermediate buffer
    /// is zeroized.
    pub fn from_hex(hex_seed: &str) -> Result<Self, ProofError> {
        let mut bytes =
            hex::decode(hex_seed.trim()).map_err(|e| ProofError::BadKey(e.to_string()))?;
        if bytes.len() != 32 {
            bytes.zeroize();
            return Err(ProofError::BadKey("seed must be exactly 32 bytes".into()));
        }
        let mut seed = [0u8; 32];
        seed.copy_from_slice(&bytes);
        bytes.zeroize();
        let key = Self::from_seed(&seed);
        seed.zeroize();
        Ok(key)
    }

    /// Load from a file holding the hex seed. The file content is
    /// zeroized after parsing.
    pub fn from_hex_file(path: &std::path::Path) -> Result<Self, ProofError> {
        let mut text = std::fs::read_to_string(path)
            .map_err(|e| ProofError::BadKey(format!("{}: {e}", path.display())))?;
        let key = Self::from_hex(&text);
        text.zeroize();
        key
    }

    /// Write the hex seed to a file. For tooling and tests; production
    /// keys belong in secure storage.
    pub fn to_hex_file(&self, path: &std::path::Path) -> Result<(), ProofError> {
        let mut hex_seed = hex::encode(self.signing_key.to_bytes());
        let result = std::fs::write(path, format!("{hex_seed}\n"))
            .map_err(|e| ProofError::BadKey(format!("{}: {e}", path.display())));
        hex_seed.zeroize();
        result
    }

    pub fn verifying_key(&self) -> RootVerifyingKey {
        RootVerifyingKey {
            verifying_key: self.signing_key.verifying_key(),
        }
    }

    /// Sign a step root. Message is the ASCII hex of the root.
    pub fn sign_root(&self, root: &Hash32) -> SignatureBytes {
        let signature = self.signing_key.sign(root.to_hex().as_bytes());
        debug!(root = %root, "signed step root");
        signature.to_bytes()
    }
}

/// Ledger public key against which third parties verify step roots.
#[derive(Clone)]
pub struct RootVerifyingKey {
    verifying_key: VerifyingKey,
}

impl RootVerifyingKey {
    pub fn from_bytes(bytes: &PublicKeyBytes) -> Result<Self, ProofError> {
        let verifying_key =
            VerifyingKey::from_bytes(bytes).map_err(|e| ProofError::BadKey(e.to_string()))?;
        Ok(Self { verifying_key })
    }

    pub fn from_hex(hex_key: &str) -> Result<Self, ProofError> {
        let bytes = hex::decode(hex_key.trim()).map_err(|e| ProofError::BadKey(e.to_string()))?;
        if bytes.len() != 32 {
            return Err(ProofError::BadKey("public key must be exactly 32 bytes".into()));
        }
        let mut key_bytes = [0u8; 32];
        key_bytes.copy_from_slice(&bytes);
        Self::from_bytes(&key_bytes)
    }

    pub fn to_bytes(&self) -> PublicKeyBytes {
        self.verifying_key.to_bytes()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.verifying_key.to_bytes())
    }

    /// Verify a signature over a step root.
    pub fn verify_root(&self, root: &Hash32, signature: &[u8]) -> Result<(), ProofError> {
        if signature.len() != 64 {
            warn!(len = signature.len(), "bad signature length");
            return Err(ProofError::BadSignatureLength(signature.len()));
        }
        let mut sig_bytes = [0u8; 64];
        sig_bytes.copy_from_slice(signature);
        let signature = Signature::from_bytes(&sig_bytes);
        self.verifying_key
            .verify(root.to_hex().as_bytes(), &signature)
            .map_err(|_| {
                warn!(root = %root, "root signature verification failed");
                ProofError::SignatureInvalid
            })
    }
}
