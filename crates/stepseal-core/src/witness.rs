//! Witness records.
//!
//! One record per contract per step. A witness is immutable once
//! produced and is committed to by the hash of its canonical JSON
//! bytes; diagnostics are closed tagged variants carrying fixed-point
//! integers, never free-form maps or floats.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use stepseal_proof::{canon, witness_leaf, Hash32};

use crate::Result;

pub const WITNESS_MODEL_SCHEMA_V1: &str = "stepseal.witness.model.v1";
pub const WITNESS_VALUE_SCHEMA_V1: &str = "stepseal.witness.value.v1";
pub const WITNESS_VALUE_ACTION_SCHEMA_V1: &str = "stepseal.witness.value_action.v1";
pub const WITNESS_RISK_SCHEMA_V1: &str = "stepseal.witness.risk.v1";
pub const WITNESS_EXEC_SCHEMA_V1: &str = "stepseal.witness.exec.v1";

/// Outcome of one contract.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    #[serde(rename = "PASS")]
    Pass,
    #[serde(rename = "FAIL")]
    Fail,
}

impl Verdict {
    pub fn is_pass(&self) -> bool {
        matches!(self, Verdict::Pass)
    }

    pub fn all_pass<'a>(verdicts: impl IntoIterator<Item = &'a Verdict>) -> bool {
        verdicts.into_iter().all(Verdict::is_pass)
    }
}

/// Closed reason taxonomy. Reasons are data attached to witnesses;
/// they never surface as errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    Teleport,
    ForbiddenState,
    DustMass,
    Drift,
    ValueDeviation,
    BelowRiskThreshold,
    AbstainForced,
    EnvLie,
    TraceMismatch,
}

/// Per-row report of the model contract's four guards. The guard
/// fields record the first offending state per guard; the integer
/// metrics are always filled in, pass or fail.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RowCheck {
    pub action: String,
    /// First proposed next-state outside the sealed support, if any.
    pub teleport_state: Option<String>,
    /// First proposed next-state inside the forbidden set, if any.
    pub forbidden_state: Option<String>,
    /// Unmodeled mass, `max(0, 1 - total)`, fixed point.
    pub dust_mass_int: i64,
    /// Largest |proposed - reference| over the shared support.
    pub max_drift_int: i64,
    pub max_drift_state: Option<String>,
    pub verdict: Verdict,
    pub reason: Option<ReasonCode>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelDiagnostics {
    pub scale_bits: u32,
    pub dust_ceiling_int: i64,
    pub drift_tolerance_int: i64,
    /// One entry per proposed row, in sorted action order.
    pub rows: Vec<RowCheck>,
}

/// Reference to one per-action value witness, rolled into the parent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValueChildRef {
    pub action: String,
    pub file: String,
    /// Leaf hash of the child witness's canonical bytes, hex.
    pub hash: String,
    pub verdict: Verdict,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValueDiagnostics {
    /// Children in sorted action order.
    pub children: Vec<ValueChildRef>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValueActionDiagnostics {
    pub action: String,
    pub rollout_seed: u32,
    pub n_rollouts: u32,
    pub horizon: u32,
    pub scale_bits: u32,
    pub proposed_q_int: i64,
    pub proposed_r_int: i64,
    pub q_est_int: i64,
    pub r_est_int: i64,
    pub dq_int: i64,
    pub dr_int: i64,
    pub eps_q_int: i64,
    pub eps_r_int: i64,
    /// Digest over the rollout trajectories, hex. Lets an auditor spot
    /// a diverging rollout implementation immediately.
    pub trajectory_digest: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RiskDiagnostics {
    pub min_return_int: i64,
    pub risk_ceiling_int: i64,
    /// Verified Q per action, fixed point.
    pub q_table_int: BTreeMap<String, i64>,
    /// Verified R per action, fixed point.
    pub r_table_int: BTreeMap<String, i64>,
    /// Actions that survived filtering, sorted.
    pub candidates: Vec<String>,
    /// Why each excluded action was rejected.
    pub rejected: BTreeMap<String, ReasonCode>,
    pub selected_action: String,
    /// True when abstention dominance forced the selection.
    pub forced: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecDiagnostics {
    pub committed_action: String,
    pub observed_next_state: String,
    /// Sealed support for (state, committed_action), sorted.
    pub support: Vec<String>,
    pub in_support: bool,
    pub trace_len: u64,
    pub trace_first_action: Option<String>,
}

/// The contract-specific half of a witness.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "contract", content = "diagnostics", rename_all = "snake_case")]
pub enum WitnessBody {
    Model(ModelDiagnostics),
    Value(ValueDiagnostics),
    ValueAction(ValueActionDiagnostics),
    Risk(RiskDiagnostics),
    Exec(ExecDiagnostics),
}

/// The evidence one contract leaves behind for one step.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WitnessRecord {
    pub schema: String,
    pub stream_id: String,
    pub step: u64,
    pub verdict: Verdict,
    pub reason: Option<ReasonCode>,
    pub body: WitnessBody,
}

impl WitnessRecord {
    /// Canonical bytes, exactly what gets written to disk and hashed.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>> {
        Ok(canon::to_canonical_bytes(self)?)
    }

    /// Merkle leaf for this witness.
    pub fn leaf_hash(&self) -> Result<Hash32> {
        Ok(witness_leaf(&self.canonical_bytes()?))
    }
}
