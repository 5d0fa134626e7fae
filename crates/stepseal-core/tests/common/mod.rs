//! Shared fixtures for integration tests: a small grid world where
//! MOVE_RIGHT walks the agent one cell right with reward 1.0.

use std::collections::BTreeMap;
use stepseal_core::packet::{TraceEntry, PACKET_SCHEMA_V1};
use stepseal_core::reference::TransitionRow;
use stepseal_core::{KernelConfig, ProposalPacket};

pub fn config() -> KernelConfig {
    KernelConfig::builder()
        .n_rollouts(16)
        .horizon(4)
        .global_seed(42)
        .build()
        .expect("test config is valid")
}

/// Honest packet for one step: from `state`, MOVE_RIGHT reaches `next`
/// deterministically, "9,9" is forbidden.
pub fn packet_at(step: u64, state: &str, next: &str) -> ProposalPacket {
    let row = TransitionRow(vec![(next.to_string(), 1.0)]);
    let mut reward_table: BTreeMap<String, BTreeMap<String, BTreeMap<String, f64>>> =
        BTreeMap::new();
    reward_table
        .entry(state.to_string())
        .or_default()
        .entry("MOVE_RIGHT".to_string())
        .or_default()
        .insert(next.to_string(), 1.0);

    ProposalPacket {
        schema: PACKET_SCHEMA_V1.into(),
        step_counter: step,
        state: state.into(),
        actions: vec!["MOVE_RIGHT".into(), "ABSTAIN".into()],
        proposed_q: [("MOVE_RIGHT".into(), 1.0), ("ABSTAIN".into(), 0.0)].into(),
        proposed_r: [("MOVE_RIGHT".into(), 0.0), ("ABSTAIN".into(), 0.0)].into(),
        proposed_rows: [("MOVE_RIGHT".into(), row.clone())].into(),
        reference_rows: [("MOVE_RIGHT".into(), row)].into(),
        forbidden_next_states: vec!["9,9".into()],
        reward_table,
        observed_next_state: next.into(),
        observed_trace: vec![TraceEntry {
            action: "MOVE_RIGHT".into(),
            state: next.into(),
        }],
    }
}
