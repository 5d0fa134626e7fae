//! The untrusted input packet.
//!
//! Everything in here is proposer-controlled and fails closed: an
//! unknown schema version, a missing field, an unknown field, or an
//! out-of-range probability is rejected at this boundary as a system
//! fault before any contract runs. Contracts only ever see packets
//! that are structurally sound; whether their *claims* hold is the
//! contracts' business.

use crate::reference::TransitionRow;
use crate::{KernelError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The only packet schema this kernel accepts.
pub const PACKET_SCHEMA_V1: &str = "stepseal.packet.v1";

/// One entry of the executor's claimed trace.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TraceEntry {
    pub action: String,
    pub state: String,
}

/// The untrusted per-step packet.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProposalPacket {
    pub schema: String,
    pub step_counter: u64,
    /// Current state the step starts from.
    pub state: String,
    /// Candidate actions, in proposer order. `ABSTAIN` need not be
    /// listed; it is always legal.
    pub actions: Vec<String>,
    /// Claimed Q(state, action) per action.
    pub proposed_q: BTreeMap<String, f64>,
    /// Claimed risk R(state, action) per action.
    pub proposed_r: BTreeMap<String, f64>,
    /// Proposed transition rows, keyed by action.
    pub proposed_rows: BTreeMap<String, TransitionRow>,
    /// Proposer's copy of the reference rows, keyed by action. The
    /// kernel verifies against the caller's sealed reference, never
    /// against these; callers may seal them via
    /// [`crate::SealedReference::from_packet`] when they choose to.
    pub reference_rows: BTreeMap<String, TransitionRow>,
    /// Proposer's copy of the forbidden-state list.
    pub forbidden_next_states: Vec<String>,
    /// Proposer's copy of the reward table
    /// (`state -> action -> next_state -> reward`).
    pub reward_table: BTreeMap<String, BTreeMap<String, BTreeMap<String, f64>>>,
    /// Next state the executor claims the environment landed in.
    pub observed_next_state: String,
    /// Claimed execution trace; may be empty.
    pub observed_trace: Vec<TraceEntry>,
}

fn action_token_ok(action: &str) -> bool {
    !action.is_empty()
        && action
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

impl ProposalPacket {
    /// Parse a packet from raw JSON bytes and validate it. Any defect
    /// is a [`KernelError`], never a witness.
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self> {
        let packet: ProposalPacket = serde_json::from_slice(bytes)
            .map_err(|e| KernelError::MalformedPacket(e.to_string()))?;
        packet.validate()?;
        Ok(packet)
    }

    /// Structural validation. Checks, in order: schema version, action
    /// identifiers, per-action value claims, row well-formedness.
    pub fn validate(&self) -> Result<()> {
        if self.schema != PACKET_SCHEMA_V1 {
            return Err(KernelError::UnsupportedSchema(self.schema.clone()));
        }
        if self.actions.is_empty() {
            return Err(KernelError::MalformedPacket("empty action list".into()));
        }
        if self.state.is_empty() {
            return Err(KernelError::MalformedPacket("empty state token".into()));
        }
        for action in &self.actions {
            if !action_token_ok(action) {
                return Err(KernelError::MalformedPacket(format!(
                    "action identifier {action:?} is not a plain token"
                )));
            }
        }
        for action in self.sorted_actions() {
            if !self.proposed_q.contains_key(&action) {
                return Err(KernelError::MalformedPacket(format!(
                    "missing proposed_q for action {action:?}"
                )));
            }
            if !self.proposed_r.contains_key(&action) {
                return Err(KernelError::MalformedPacket(format!(
                    "missing proposed_r for action {action:?}"
                )));
            }
        }
        for (table, rows) in [("proposed", &self.proposed_rows), ("reference", &self.reference_rows)] {
            for (action, row) in rows {
                if !self.actions.contains(action) {
                    return Err(KernelError::MalformedPacket(format!(
                        "{table} row for unlisted action {action:?}"
                    )));
                }
                row.check_well_formed().map_err(|e| {
                    KernelError::MalformedPacket(format!("{table} row for {action:?}: {e}"))
                })?;
            }
        }
        for (q_or_r, claims) in [("proposed_q", &self.proposed_q), ("proposed_r", &self.proposed_r)] {
            for (action, value) in claims {
                if !self.actions.contains(action) {
                    return Err(KernelError::MalformedPacket(format!(
                        "{q_or_r} entry for unlisted action {action:?}"
                    )));
                }
                if !value.is_finite() {
                    return Err(KernelError::MalformedPacket(format!(
                        "{q_or_r} for {action:?} is not finite"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Candidate actions, sorted and deduplicated. This is the fixed
    /// enumeration order every contract iterates in.
    pub fn sorted_actions(&self) -> Vec<String> {
        let mut actions: Vec<String> = self.actions.clone();
        actions.sort();
        actions.dedup();
        actions
    }
}
