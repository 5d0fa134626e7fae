//! End-to-end pipeline scenarios: packet in, sealed bundle out.

mod common;

use stepseal_core::reference::TransitionRow;
use stepseal_core::witness::WitnessRecord;
use stepseal_core::{ReasonCode, SealedReference, StepOrchestrator, Verdict, ABSTAIN};
use tempfile::TempDir;

#[test]
fn honest_stream_walks_and_chains() {
    let config = common::config();
    let tmp = TempDir::new().unwrap();
    let mut orch = StepOrchestrator::new(&config, tmp.path(), "grid-walk").unwrap();

    let first_packet = common::packet_at(0, "1,1", "1,2");
    let first_sealed = SealedReference::from_packet(&first_packet);
    let first = orch.run_step(&first_packet, &first_sealed).unwrap();
    assert_eq!(first.bundle.selected_action, "MOVE_RIGHT");
    assert!(!first.bundle.abstain_forced);
    assert_eq!(first.bundle.output_state.as_deref(), Some("1,2"));

    let second_packet = common::packet_at(1, "1,2", "1,3");
    let second_sealed = SealedReference::from_packet(&second_packet);
    let second = orch.run_step(&second_packet, &second_sealed).unwrap();
    assert_eq!(second.bundle.previous_root, first.root.to_hex());
    assert_eq!(second.bundle.output_state.as_deref(), Some("1,3"));

    for dir in [&first.dir, &second.dir] {
        for name in [
            "witness_model.json",
            "witness_value.json",
            "witness_value_ABSTAIN.json",
            "witness_value_MOVE_RIGHT.json",
            "witness_risk.json",
            "witness_exec.json",
            "bundle.json",
            "root_hash.txt",
        ] {
            assert!(dir.join(name).is_file(), "missing {name}");
        }
    }
}

#[test]
fn forbidden_proposal_fails_model_and_forces_abstain() {
    let config = common::config();
    let tmp = TempDir::new().unwrap();
    let mut orch = StepOrchestrator::new(&config, tmp.path(), "grid-walk").unwrap();

    let mut packet = common::packet_at(0, "1,1", "1,2");
    packet.proposed_rows.insert(
        "MOVE_RIGHT".into(),
        TransitionRow(vec![("1,2".into(), 0.5), ("9,9".into(), 0.5)]),
    );
    let sealed = SealedReference::from_packet(&common::packet_at(0, "1,1", "1,2"));

    let step = orch.run_step(&packet, &sealed).unwrap();
    assert_eq!(step.bundle.witnesses.model.verdict, Verdict::Fail);
    let model: WitnessRecord =
        serde_json::from_slice(&std::fs::read(step.dir.join("witness_model.json")).unwrap())
            .unwrap();
    assert_eq!(model.reason, Some(ReasonCode::ForbiddenState));
    assert_eq!(step.bundle.selected_action, ABSTAIN);
    assert!(step.bundle.abstain_forced);
}

#[test]
fn inflated_claim_excludes_action_without_forcing_abstain() {
    let config = common::config();
    let tmp = TempDir::new().unwrap();
    let mut orch = StepOrchestrator::new(&config, tmp.path(), "grid-walk").unwrap();

    let mut packet = common::packet_at(0, "1,1", "1,2");
    packet.proposed_q.insert("MOVE_RIGHT".into(), 50.0);
    packet.observed_next_state = "1,1".into();
    packet.observed_trace = vec![];
    let sealed = SealedReference::from_packet(&common::packet_at(0, "1,1", "1,2"));

    let step = orch.run_step(&packet, &sealed).unwrap();
    // The lie fails only that action's child; ABSTAIN still wins on
    // merit, not by dominance.
    assert_eq!(step.bundle.witnesses.value.verdict, Verdict::Fail);
    assert_eq!(step.bundle.selected_action, ABSTAIN);
    assert!(!step.bundle.abstain_forced);
    assert_eq!(step.bundle.witnesses.risk.verdict, Verdict::Pass);
    assert_eq!(step.bundle.output_state.as_deref(), Some("1,1"));
}

#[test]
fn env_lie_seals_with_undefined_output() {
    let config = common::config();
    let tmp = TempDir::new().unwrap();
    let mut orch = StepOrchestrator::new(&config, tmp.path(), "grid-walk").unwrap();

    let mut packet = common::packet_at(0, "1,1", "1,2");
    packet.observed_next_state = "5,5".into();
    let sealed = SealedReference::from_packet(&common::packet_at(0, "1,1", "1,2"));

    let step = orch.run_step(&packet, &sealed).unwrap();
    assert_eq!(step.bundle.witnesses.exec.verdict, Verdict::Fail);
    assert_eq!(step.bundle.output_state, None);
    // Model, value and gate were all honest; only the executor lied.
    assert_eq!(step.bundle.witnesses.model.verdict, Verdict::Pass);
    assert_eq!(step.bundle.selected_action, "MOVE_RIGHT");
}

#[test]
fn identical_streams_produce_identical_roots() {
    let config = common::config();
    let packet = common::packet_at(0, "1,1", "1,2");
    let sealed = SealedReference::from_packet(&packet);

    let mut roots = Vec::new();
    for _ in 0..2 {
        let tmp = TempDir::new().unwrap();
        let mut orch = StepOrchestrator::new(&config, tmp.path(), "grid-walk").unwrap();
        roots.push(orch.run_step(&packet, &sealed).unwrap().root);
    }
    assert_eq!(roots[0], roots[1]);
}

#[test]
fn stream_id_changes_the_root() {
    let config = common::config();
    let packet = common::packet_at(0, "1,1", "1,2");
    let sealed = SealedReference::from_packet(&packet);

    let tmp_a = TempDir::new().unwrap();
    let tmp_b = TempDir::new().unwrap();
    let mut a = StepOrchestrator::new(&config, tmp_a.path(), "stream-a").unwrap();
    let mut b = StepOrchestrator::new(&config, tmp_b.path(), "stream-b").unwrap();
    let root_a = a.run_step(&packet, &sealed).unwrap().root;
    let root_b = b.run_step(&packet, &sealed).unwrap().root;
    assert_ne!(root_a, root_b);
}
