//! Shared unit-test fixtures: a two-action grid step and a matching
//! kernel configuration.

use crate::config::KernelConfig;
use crate::packet::{ProposalPacket, TraceEntry, PACKET_SCHEMA_V1};
use crate::reference::TransitionRow;
use std::collections::BTreeMap;

/// Config with test-sized rollouts and the default tolerances.
pub(crate) fn config() -> KernelConfig {
    KernelConfig::builder()
        .n_rollouts(16)
        .horizon(4)
        .global_seed(7)
        .build()
        .expect("test config is valid")
}

/// Honest packet for state "1,1": MOVE_RIGHT deterministically reaches
/// "1,2" with reward 1.0, ABSTAIN is listed, "9,9" is forbidden.
pub(crate) fn packet() -> ProposalPacket {
    let row = TransitionRow(vec![("1,2".into(), 1.0)]);
    let mut reward_table: BTreeMap<String, BTreeMap<String, BTreeMap<String, f64>>> =
        BTreeMap::new();
    reward_table
        .entry("1,1".into())
        .or_default()
        .entry("MOVE_RIGHT".into())
        .or_default()
        .insert("1,2".into(), 1.0);

    ProposalPacket {
        schema: PACKET_SCHEMA_V1.into(),
        step_counter: 0,
        state: "1,1".into(),
        actions: vec!["MOVE_RIGHT".into(), "ABSTAIN".into()],
        proposed_q: [("MOVE_RIGHT".into(), 1.0), ("ABSTAIN".into(), 0.0)].into(),
        proposed_r: [("MOVE_RIGHT".into(), 0.0), ("ABSTAIN".into(), 0.0)].into(),
        proposed_rows: [("MOVE_RIGHT".into(), row.clone())].into(),
        reference_rows: [("MOVE_RIGHT".into(), row)].into(),
        forbidden_next_states: vec!["9,9".into()],
        reward_table,
        observed_next_state: "1,2".into(),
        observed_trace: vec![TraceEntry {
            action: "MOVE_RIGHT".into(),
            state: "1,2".into(),
        }],
    }
}
