//! Sealed reference data and transition rows.
//!
//! States are opaque tokens compared only by equality; the kernel
//! never parses them for meaning. A transition row's probabilities are
//! quantized into sorted integer masses before any contract touches
//! them, which makes support, dust and drift computations exact.

use crate::fixed;
use crate::packet::ProposalPacket;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Tolerated float excess above total mass 1.0 at the packet boundary.
pub const MASS_EPSILON: f64 = 1e-6;

/// Ordered `(next_state, probability)` pairs for one (state, action).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransitionRow(pub Vec<(String, f64)>);

impl TransitionRow {
    /// Total floating-point mass of the row.
    pub fn total_mass(&self) -> f64 {
        self.0.iter().map(|(_, p)| p).sum()
    }

    /// Boundary check: probabilities non-negative, mass at most
    /// `1 + MASS_EPSILON`. Violations are packet faults, not witness
    /// outcomes.
    pub fn check_well_formed(&self) -> std::result::Result<(), String> {
        for (next_state, p) in &self.0 {
            if !p.is_finite() || *p < 0.0 {
                return Err(format!("probability for {next_state:?} is {p}"));
            }
        }
        let mass = self.total_mass();
        if mass > 1.0 + MASS_EPSILON {
            return Err(format!("row mass {mass} exceeds 1"));
        }
        Ok(())
    }

    /// Quantize into sorted integer masses at `2^scale_bits`, dropping
    /// entries that round to zero.
    pub fn quantize(&self, scale_bits: u32) -> IntRow {
        let mut masses = BTreeMap::new();
        for (next_state, p) in &self.0 {
            let m = fixed::quantize(*p, scale_bits);
            if m > 0 {
                *masses.entry(next_state.clone()).or_insert(0u64) += m as u64;
            }
        }
        IntRow { masses }
    }
}

/// A quantized transition row: next-state to integer mass, sorted by
/// next-state. Iteration order is the enumeration order every rollout
/// and guard uses.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct IntRow {
    masses: BTreeMap<String, u64>,
}

impl IntRow {
    /// Degenerate self-loop row with full mass on `state`. Used when
    /// the reference has no row for a (state, action) pair; notably
    /// this is the sealed semantics of `ABSTAIN`.
    pub fn self_loop(state: &str, scale_bits: u32) -> Self {
        let mut masses = BTreeMap::new();
        masses.insert(state.to_string(), fixed::unit(scale_bits) as u64);
        IntRow { masses }
    }

    pub fn total_mass(&self) -> u64 {
        self.masses.values().sum()
    }

    pub fn contains(&self, next_state: &str) -> bool {
        self.masses.contains_key(next_state)
    }

    pub fn mass_of(&self, next_state: &str) -> u64 {
        self.masses.get(next_state).copied().unwrap_or(0)
    }

    /// Sorted (next_state, mass) iteration.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.masses.iter().map(|(s, m)| (s.as_str(), *m))
    }

    /// The sealed support: next-states with non-zero mass, sorted.
    pub fn support(&self) -> Vec<String> {
        self.masses.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.masses.is_empty()
    }
}

/// The trusted reference for one episode: transition table, reward
/// table and forbidden-state set. Immutable for the duration of a
/// step; the kernel never mutates it.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SealedReference {
    /// `state -> action -> row`.
    pub transitions: BTreeMap<String, BTreeMap<String, TransitionRow>>,
    /// `state -> action -> next_state -> reward`.
    pub rewards: BTreeMap<String, BTreeMap<String, BTreeMap<String, f64>>>,
    /// States no verified trajectory may touch.
    pub forbidden: BTreeSet<String>,
}

impl SealedReference {
    /// The reference row for `(state, action)`, if modeled.
    pub fn row(&self, state: &str, action: &str) -> Option<&TransitionRow> {
        self.transitions.get(state).and_then(|by_action| by_action.get(action))
    }

    /// Quantized reference row, falling back to a self-loop when the
    /// pair is unmodeled.
    pub fn int_row_or_self_loop(&self, state: &str, action: &str, scale_bits: u32) -> IntRow {
        match self.row(state, action) {
            Some(row) => {
                let int_row = row.quantize(scale_bits);
                if int_row.is_empty() {
                    IntRow::self_loop(state, scale_bits)
                } else {
                    int_row
                }
            }
            None => IntRow::self_loop(state, scale_bits),
        }
    }

    /// Sealed transition support for `(state, action)`.
    pub fn support(&self, state: &str, action: &str, scale_bits: u32) -> Vec<String> {
        self.int_row_or_self_loop(state, action, scale_bits).support()
    }

    /// Reward for `(state, action, next_state)`; unmodeled triples pay
    /// zero.
    pub fn reward(&self, state: &str, action: &str, next_state: &str) -> f64 {
        self.rewards
            .get(state)
            .and_then(|by_action| by_action.get(action))
            .and_then(|by_next| by_next.get(next_state))
            .copied()
            .unwrap_or(0.0)
    }

    pub fn is_forbidden(&self, state: &str) -> bool {
        self.forbidden.contains(state)
    }

    /// Seal the reference tables a packet carries. The caller decides
    /// whether the packet's copies are trustworthy; the orchestrator
    /// itself only ever reads an explicit `SealedReference`.
    pub fn from_packet(packet: &ProposalPacket) -> Self {
        let mut transitions: BTreeMap<String, BTreeMap<String, TransitionRow>> = BTreeMap::new();
        for (action, row) in &packet.reference_rows {
            transitions
                .entry(packet.state.clone())
                .or_default()
                .insert(action.clone(), row.clone());
        }
        SealedReference {
            transitions,
            rewards: packet.reward_table.clone(),
            forbidden: packet.forbidden_next_states.iter().cloned().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, f64)]) -> TransitionRow {
        TransitionRow(pairs.iter().map(|(s, p)| (s.to_string(), *p)).collect())
    }

    #[test]
    fn quantize_sorts_and_drops_zero_mass() {
        let r = row(&[("b", 0.5), ("a", 0.5), ("c", 0.0)]).quantize(16);
        assert_eq!(r.support(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(r.total_mass(), fixed::unit(16) as u64);
    }

    #[test]
    fn negative_probability_rejected() {
        assert!(row(&[("a", -0.1)]).check_well_formed().is_err());
    }

    #[test]
    fn excess_mass_rejected() {
        assert!(row(&[("a", 0.7), ("b", 0.7)]).check_well_formed().is_err());
        assert!(row(&[("a", 1.0)]).check_well_formed().is_ok());
    }

    #[test]
    fn dust_mass_is_legal_at_boundary() {
        // Under-full rows are well-formed; the dust guard is a
        // contract concern, not a packet fault.
        assert!(row(&[("a", 0.6)]).check_well_formed().is_ok());
    }

    #[test]
    fn unmodeled_pair_is_self_loop() {
        let sealed = SealedReference::default();
        let r = sealed.int_row_or_self_loop("1,1", "ABSTAIN", 16);
        assert_eq!(r.support(), vec!["1,1".to_string()]);
        assert_eq!(r.total_mass(), fixed::unit(16) as u64);
    }

    #[test]
    fn reward_defaults_to_zero() {
        let sealed = SealedReference::default();
        assert_eq!(sealed.reward("s", "a", "s2"), 0.0);
    }
}
