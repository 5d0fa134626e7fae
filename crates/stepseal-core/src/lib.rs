//! StepSeal verification kernel.
//!
//! An untrusted proposer hands the kernel one packet per step: a
//! candidate transition model, value claims per action, and a claimed
//! execution outcome. The kernel re-derives or checks every claim
//! against a sealed reference supplied by the caller, commits the
//! evidence into a Merkle-sealed witness bundle, and either commits
//! the best verified action or falls back to `ABSTAIN`.
//!
//! Pipeline per step, strictly forward:
//!
//! ```text
//! packet -> ModelContract -> ValueContract -> RiskGate -> ExecContract -> sealed bundle
//! ```
//!
//! Every contract always runs and always leaves a witness, even
//! downstream of a failure; the only thing that aborts a step is a
//! system fault (malformed packet, storage failure, duplicate seal).
//! [`audit::AuditChainVerifier`] replays stored bundles out-of-band
//! and shares these exact contract implementations in deep mode.

pub mod audit;
pub mod bundle;
pub mod config;
pub mod contracts;
pub mod fixed;
pub mod orchestrator;
pub mod packet;
pub mod reference;
pub mod rollout;
pub mod store;
pub mod witness;

#[cfg(test)]
pub(crate) mod testutil;

use thiserror::Error;

pub use audit::{AuditChainVerifier, AuditOptions, StepAuditReport, StreamAuditReport};
pub use bundle::{Bundle, SealedStep, WitnessRef};
pub use config::KernelConfig;
pub use orchestrator::StepOrchestrator;
pub use packet::ProposalPacket;
pub use reference::SealedReference;
pub use witness::{ReasonCode, Verdict, WitnessRecord};

/// The distinguished safe-fallback action. Always a legal action for
/// every state, whether or not the proposer listed it.
pub const ABSTAIN: &str = "ABSTAIN";

/// System faults. Disjoint from verification outcomes: a contract FAIL
/// is recorded data, never an error; these abort the step and never
/// produce a sealed bundle.
#[derive(Debug, Error)]
pub enum KernelError {
    #[error("malformed packet: {0}")]
    MalformedPacket(String),

    #[error("unsupported packet schema: {0}")]
    UnsupportedSchema(String),

    #[error("step {step} of stream {stream_id} is already sealed")]
    DuplicateSeal { stream_id: String, step: u64 },

    #[error("step {step} already carries a different signature")]
    SignConflict { step: u64 },

    #[error("signing key unavailable: {0}")]
    KeyUnavailable(String),

    #[error("invalid configuration: {0}")]
    ConfigError(String),

    #[error("storage error at {path}: {source}")]
    Storage {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Proof(#[from] stepseal_proof::ProofError),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, KernelError>;
