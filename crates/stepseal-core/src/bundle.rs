//! The sealed per-step record.
//!
//! A bundle aggregates the step's witnesses (by file name and leaf
//! hash), the committed action, the chain linkage, and the full
//! proposal plus sealed reference so that deep audit can replay the
//! contracts byte-for-byte. Immutable once sealed; identified by
//! `(stream_id, step_counter)`.

use crate::packet::ProposalPacket;
use crate::reference::SealedReference;
use crate::witness::Verdict;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use stepseal_proof::{canon, Hash32};

pub const BUNDLE_SCHEMA_V1: &str = "stepseal.bundle.v1";

/// Pointer to one witness artifact.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WitnessRef {
    pub file: String,
    /// Leaf hash of the witness file's canonical bytes, hex.
    pub hash: String,
    pub verdict: Verdict,
}

/// The four leaf witnesses, in leaf order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BundleWitnesses {
    pub model: WitnessRef,
    pub value: WitnessRef,
    pub risk: WitnessRef,
    pub exec: WitnessRef,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bundle {
    pub schema: String,
    pub stream_id: String,
    pub step_counter: u64,
    pub input_state: String,
    pub selected_action: String,
    /// True when abstention dominance, not merit, picked the action.
    pub abstain_forced: bool,
    /// `None` when the execution contract rejected the claimed
    /// outcome; the next step must not proceed from it.
    pub output_state: Option<String>,
    /// Root of the previous step, hex; genesis for step 0.
    pub previous_root: String,
    /// Merkle root over the witness leaves plus the chain leaf, hex.
    pub merkle_root: String,
    pub witnesses: BundleWitnesses,
    /// The untrusted packet this step verified, verbatim.
    pub proposal: ProposalPacket,
    /// The sealed reference the contracts checked against.
    pub sealed_reference: SealedReference,
}

impl Bundle {
    pub fn canonical_bytes(&self) -> Result<Vec<u8>> {
        Ok(canon::to_canonical_bytes(self)?)
    }
}

/// What the orchestrator hands back after a durable seal.
#[derive(Clone, Debug)]
pub struct SealedStep {
    pub step: u64,
    pub root: Hash32,
    pub dir: PathBuf,
    pub bundle: Bundle,
}
