//! StepOrchestrator: one stream, one step at a time.
//!
//! Sequences the four contracts in fixed causal order, short-circuits
//! nothing (every contract always leaves a witness, even downstream of
//! a FAIL), seals the bundle under a Merkle root chained to the
//! previous step, and commits all artifacts atomically. Verification
//! failures are normal, successfully recorded outcomes; only system
//! faults abort a step.

use crate::bundle::{Bundle, BundleWitnesses, SealedStep, WitnessRef, BUNDLE_SCHEMA_V1};
use crate::config::KernelConfig;
use crate::contracts::{ExecContract, ModelContract, RiskGate, ValueContract};
use crate::packet::ProposalPacket;
use crate::reference::SealedReference;
use crate::store::{self, ArtifactStore};
use crate::witness::WitnessRecord;
use crate::{KernelError, Result};
use std::path::Path;
use stepseal_proof::{chain_leaf, merkle, Hash32};
use tracing::{info, warn};

/// Drives one stream. Steps are strictly sequential: the orchestrator
/// owns the previous root and the expected step counter, and a packet
/// carrying any other counter is rejected as malformed.
pub struct StepOrchestrator<'a> {
    config: &'a KernelConfig,
    store: ArtifactStore,
    stream_id: String,
    step_counter: u64,
    previous_root: Hash32,
}

impl<'a> StepOrchestrator<'a> {
    pub fn new(
        config: &'a KernelConfig,
        stream_root: impl AsRef<Path>,
        stream_id: impl Into<String>,
    ) -> Result<Self> {
        let stream_id = stream_id.into();
        Ok(Self {
            config,
            store: ArtifactStore::new(stream_root.as_ref(), stream_id.clone()),
            stream_id,
            step_counter: 0,
            previous_root: config.genesis_hash()?,
        })
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn step_counter(&self) -> u64 {
        self.step_counter
    }

    pub fn previous_root(&self) -> Hash32 {
        self.previous_root
    }

    /// Verify one untrusted packet against the sealed reference and
    /// durably seal the resulting bundle.
    pub fn run_step(
        &mut self,
        packet: &ProposalPacket,
        sealed: &SealedReference,
    ) -> Result<SealedStep> {
        packet.validate()?;
        if packet.step_counter != self.step_counter {
            return Err(KernelError::MalformedPacket(format!(
                "packet step_counter {} but stream {} is at step {}",
                packet.step_counter, self.stream_id, self.step_counter
            )));
        }
        let step = self.step_counter;

        // All four contracts run unconditionally; upstream failures
        // only shrink the risk gate's candidate set.
        let model = ModelContract::new(self.config).verify(&self.stream_id, packet, sealed);
        let value = ValueContract::new(self.config).verify(&self.stream_id, packet, sealed)?;
        let gate = RiskGate::new(self.config).select(
            &self.stream_id,
            step,
            model.verdict.is_pass(),
            &value.estimates,
        );
        let exec = ExecContract::new(self.config).verify(
            &self.stream_id,
            packet,
            sealed,
            &gate.selected_action,
        );

        for witness in [&model, &value.parent, &gate.witness, &exec.witness] {
            if !witness.verdict.is_pass() {
                warn!(
                    stream = %self.stream_id,
                    step,
                    schema = %witness.schema,
                    reason = ?witness.reason,
                    "contract failed"
                );
            }
        }

        let previous_root_hex = self.previous_root.to_hex();
        let leaves = vec![
            model.leaf_hash()?,
            value.parent.leaf_hash()?,
            gate.witness.leaf_hash()?,
            exec.witness.leaf_hash()?,
            chain_leaf(&previous_root_hex),
        ];
        let root = merkle::root_of(&leaves);

        let bundle = Bundle {
            schema: BUNDLE_SCHEMA_V1.into(),
            stream_id: self.stream_id.clone(),
            step_counter: step,
            input_state: packet.state.clone(),
            selected_action: gate.selected_action.clone(),
            abstain_forced: gate.forced,
            output_state: exec.output_state.clone(),
            previous_root: previous_root_hex,
            merkle_root: root.to_hex(),
            witnesses: BundleWitnesses {
                model: witness_ref(store::FILE_WITNESS_MODEL, &model)?,
                value: witness_ref(store::FILE_WITNESS_VALUE, &value.parent)?,
                risk: witness_ref(store::FILE_WITNESS_RISK, &gate.witness)?,
                exec: witness_ref(store::FILE_WITNESS_EXEC, &exec.witness)?,
            },
            proposal: packet.clone(),
            sealed_reference: sealed.clone(),
        };

        let staged = self.store.stage(step)?;
        staged.write_file(store::FILE_WITNESS_MODEL, &model.canonical_bytes()?)?;
        staged.write_file(store::FILE_WITNESS_VALUE, &value.parent.canonical_bytes()?)?;
        for (action, child) in &value.children {
            staged.write_file(&store::value_child_file(action), &child.canonical_bytes()?)?;
        }
        staged.write_file(store::FILE_WITNESS_RISK, &gate.witness.canonical_bytes()?)?;
        staged.write_file(store::FILE_WITNESS_EXEC, &exec.witness.canonical_bytes()?)?;
        staged.write_file(store::FILE_BUNDLE, &bundle.canonical_bytes()?)?;
        staged.write_file(
            store::FILE_ROOT_HASH,
            format!("{}\n", root.to_hex()).as_bytes(),
        )?;
        let dir = staged.commit()?;

        info!(
            stream = %self.stream_id,
            step,
            action = %gate.selected_action,
            root = %root,
            "step sealed"
        );

        self.previous_root = root;
        self.step_counter += 1;

        Ok(SealedStep {
            step,
            root,
            dir,
            bundle,
        })
    }

    /// Sign an already-sealed step of this stream. Explicit, never
    /// implicit in sealing.
    pub fn sign_step(
        &self,
        step: u64,
        key: &stepseal_proof::signing::RootSigningKey,
    ) -> Result<()> {
        self.store.sign_step(step, key)
    }
}

fn witness_ref(file: &str, witness: &WitnessRecord) -> Result<WitnessRef> {
    Ok(WitnessRef {
        file: file.into(),
        hash: witness.leaf_hash()?.to_hex(),
        verdict: witness.verdict,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;
    use crate::witness::{ReasonCode, Verdict};
    use crate::ABSTAIN;
    use tempfile::TempDir;

    #[test]
    fn honest_step_commits_proposed_action() {
        let config = testutil::config();
        let tmp = TempDir::new().unwrap();
        let mut orch = StepOrchestrator::new(&config, tmp.path(), "stream-a").unwrap();
        let packet = testutil::packet();
        let sealed = SealedReference::from_packet(&packet);

        let step = orch.run_step(&packet, &sealed).unwrap();
        assert_eq!(step.bundle.selected_action, "MOVE_RIGHT");
        assert_eq!(step.bundle.output_state.as_deref(), Some("1,2"));
        for w in [
            &step.bundle.witnesses.model,
            &step.bundle.witnesses.value,
            &step.bundle.witnesses.risk,
            &step.bundle.witnesses.exec,
        ] {
            assert_eq!(w.verdict, Verdict::Pass);
        }
        assert!(step.dir.join("witness_value_MOVE_RIGHT.json").is_file());
        assert!(step.dir.join("root_hash.txt").is_file());
    }

    #[test]
    fn forbidden_proposal_forces_abstain_but_seals() {
        let config = testutil::config();
        let tmp = TempDir::new().unwrap();
        let mut orch = StepOrchestrator::new(&config, tmp.path(), "stream-a").unwrap();
        let mut packet = testutil::packet();
        packet.proposed_rows.insert(
            "MOVE_RIGHT".into(),
            crate::reference::TransitionRow(vec![("9,9".into(), 1.0)]),
        );
        let sealed = SealedReference::from_packet(&testutil::packet());

        let step = orch.run_step(&packet, &sealed).unwrap();
        assert_eq!(step.bundle.witnesses.model.verdict, Verdict::Fail);
        assert_eq!(step.bundle.selected_action, ABSTAIN);
        assert!(step.bundle.abstain_forced);
        // The exec contract still ran and judged the claimed outcome
        // against ABSTAIN's self-loop support.
        assert_eq!(step.bundle.witnesses.exec.verdict, Verdict::Fail);
    }

    #[test]
    fn env_lie_leaves_output_state_undefined() {
        let config = testutil::config();
        let tmp = TempDir::new().unwrap();
        let mut orch = StepOrchestrator::new(&config, tmp.path(), "stream-a").unwrap();
        let mut packet = testutil::packet();
        packet.observed_next_state = "5,5".into();
        let sealed = SealedReference::from_packet(&packet);

        let step = orch.run_step(&packet, &sealed).unwrap();
        assert_eq!(step.bundle.witnesses.exec.verdict, Verdict::Fail);
        assert_eq!(step.bundle.output_state, None);
        assert_eq!(step.bundle.selected_action, "MOVE_RIGHT");
        let exec: crate::witness::WitnessRecord = serde_json::from_slice(
            &std::fs::read(step.dir.join("witness_exec.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(exec.reason, Some(ReasonCode::EnvLie));
    }

    #[test]
    fn steps_chain_previous_roots() {
        let config = testutil::config();
        let tmp = TempDir::new().unwrap();
        let mut orch = StepOrchestrator::new(&config, tmp.path(), "stream-a").unwrap();
        let sealed = SealedReference::from_packet(&testutil::packet());

        let first = orch.run_step(&testutil::packet(), &sealed).unwrap();
        assert_eq!(
            first.bundle.previous_root,
            config.genesis_hash().unwrap().to_hex()
        );

        let mut second_packet = testutil::packet();
        second_packet.step_counter = 1;
        let second = orch.run_step(&second_packet, &sealed).unwrap();
        assert_eq!(second.bundle.previous_root, first.root.to_hex());
        assert_ne!(second.root, first.root);
    }

    #[test]
    fn wrong_step_counter_is_a_fault() {
        let config = testutil::config();
        let tmp = TempDir::new().unwrap();
        let mut orch = StepOrchestrator::new(&config, tmp.path(), "stream-a").unwrap();
        let mut packet = testutil::packet();
        packet.step_counter = 3;
        let sealed = SealedReference::from_packet(&packet);
        assert!(matches!(
            orch.run_step(&packet, &sealed),
            Err(KernelError::MalformedPacket(_))
        ));
        // Nothing was sealed.
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[test]
    fn second_orchestrator_cannot_reseal() {
        let config = testutil::config();
        let tmp = TempDir::new().unwrap();
        let packet = testutil::packet();
        let sealed = SealedReference::from_packet(&packet);

        let mut first = StepOrchestrator::new(&config, tmp.path(), "stream-a").unwrap();
        first.run_step(&packet, &sealed).unwrap();

        let mut second = StepOrchestrator::new(&config, tmp.path(), "stream-a").unwrap();
        assert!(matches!(
            second.run_step(&packet, &sealed),
            Err(KernelError::DuplicateSeal { step: 0, .. })
        ));
    }

    #[test]
    fn stored_root_matches_recomputation_from_files() {
        let config = testutil::config();
        let tmp = TempDir::new().unwrap();
        let mut orch = StepOrchestrator::new(&config, tmp.path(), "stream-a").unwrap();
        let packet = testutil::packet();
        let sealed = SealedReference::from_packet(&packet);
        let step = orch.run_step(&packet, &sealed).unwrap();

        let leaf = |name: &str| {
            stepseal_proof::witness_leaf(&std::fs::read(step.dir.join(name)).unwrap())
        };
        let leaves = vec![
            leaf("witness_model.json"),
            leaf("witness_value.json"),
            leaf("witness_risk.json"),
            leaf("witness_exec.json"),
            chain_leaf(&step.bundle.previous_root),
        ];
        assert_eq!(merkle::root_of(&leaves), step.root);

        let stored = std::fs::read_to_string(step.dir.join("root_hash.txt")).unwrap();
        assert_eq!(stored.trim(), step.root.to_hex());
    }
}
