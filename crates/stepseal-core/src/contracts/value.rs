//! ValueContract: independent re-estimation of claimed Q and R.
//!
//! One child witness per action, evaluated in sorted action order; the
//! parent witness rolls the child hashes up. An action whose claim
//! fails is excluded from the risk gate's candidates without failing
//! the step.

use crate::config::KernelConfig;
use crate::fixed;
use crate::packet::ProposalPacket;
use crate::reference::SealedReference;
use crate::rollout::{self, derive_rollout_seed};
use crate::store;
use crate::witness::{
    ReasonCode, ValueActionDiagnostics, ValueChildRef, ValueDiagnostics, Verdict, WitnessBody,
    WitnessRecord, WITNESS_VALUE_ACTION_SCHEMA_V1, WITNESS_VALUE_SCHEMA_V1,
};
use crate::Result;
use std::collections::BTreeMap;
use tracing::debug;

/// Verified estimate for one action, as the risk gate consumes it.
#[derive(Clone, Debug, PartialEq)]
pub struct ActionEstimate {
    pub q_int: i64,
    pub r_int: i64,
    pub verdict: Verdict,
}

/// Output of the value contract for one step.
pub struct ValueOutcome {
    pub parent: WitnessRecord,
    /// `(action, child witness)` in sorted action order.
    pub children: Vec<(String, WitnessRecord)>,
    pub estimates: BTreeMap<String, ActionEstimate>,
}

pub struct ValueContract<'a> {
    config: &'a KernelConfig,
}

impl<'a> ValueContract<'a> {
    pub fn new(config: &'a KernelConfig) -> Self {
        Self { config }
    }

    /// Verify one action's claim. Deterministic: same seed inputs,
    /// same reference, same claim, same witness bytes.
    pub fn verify_action(
        &self,
        stream_id: &str,
        packet: &ProposalPacket,
        sealed: &SealedReference,
        action: &str,
    ) -> WitnessRecord {
        let scale = self.config.rollout.scale_bits;
        let params = self.config.rollout_params();
        let seed = derive_rollout_seed(
            self.config.rollout.global_seed,
            stream_id,
            packet.step_counter,
            action,
        );

        let est = rollout::estimate(&params, sealed, &packet.state, action, seed);

        let proposed_q_int = fixed::quantize(packet.proposed_q[action], scale);
        let proposed_r_int = fixed::quantize(packet.proposed_r[action], scale);
        let eps_q_int = fixed::quantize(self.config.tolerances.eps_q, scale);
        let eps_r_int = fixed::quantize(self.config.tolerances.eps_r, scale);

        let dq_int = (proposed_q_int - est.q_int).abs();
        let dr_int = (proposed_r_int - est.r_int).abs();
        let pass = dq_int <= eps_q_int && dr_int <= eps_r_int;

        WitnessRecord {
            schema: WITNESS_VALUE_ACTION_SCHEMA_V1.into(),
            stream_id: stream_id.into(),
            step: packet.step_counter,
            verdict: if pass { Verdict::Pass } else { Verdict::Fail },
            reason: if pass { None } else { Some(ReasonCode::ValueDeviation) },
            body: WitnessBody::ValueAction(ValueActionDiagnostics {
                action: action.into(),
                rollout_seed: seed,
                n_rollouts: params.n_rollouts,
                horizon: params.horizon,
                scale_bits: scale,
                proposed_q_int,
                proposed_r_int,
                q_est_int: est.q_int,
                r_est_int: est.r_int,
                dq_int,
                dr_int,
                eps_q_int,
                eps_r_int,
                trajectory_digest: est.trajectory_digest,
            }),
        }
    }

    /// Verify every claimed action and assemble the parent witness.
    pub fn verify(
        &self,
        stream_id: &str,
        packet: &ProposalPacket,
        sealed: &SealedReference,
    ) -> Result<ValueOutcome> {
        let mut children = Vec::new();
        let mut child_refs = Vec::new();
        let mut estimates = BTreeMap::new();

        for action in packet.sorted_actions() {
            let child = self.verify_action(stream_id, packet, sealed, &action);
            let WitnessBody::ValueAction(diag) = &child.body else {
                unreachable!("verify_action builds a value_action body")
            };
            estimates.insert(
                action.clone(),
                ActionEstimate {
                    q_int: diag.q_est_int,
                    r_int: diag.r_est_int,
                    verdict: child.verdict,
                },
            );
            child_refs.push(ValueChildRef {
                action: action.clone(),
                file: store::value_child_file(&action),
                hash: child.leaf_hash()?.to_hex(),
                verdict: child.verdict,
            });
            children.push((action, child));
        }

        let all_pass = Verdict::all_pass(child_refs.iter().map(|c| &c.verdict));
        debug!(
            stream = stream_id,
            step = packet.step_counter,
            actions = children.len(),
            all_pass,
            "value contract"
        );

        let parent = WitnessRecord {
            schema: WITNESS_VALUE_SCHEMA_V1.into(),
            stream_id: stream_id.into(),
            step: packet.step_counter,
            verdict: if all_pass { Verdict::Pass } else { Verdict::Fail },
            reason: if all_pass { None } else { Some(ReasonCode::ValueDeviation) },
            body: WitnessBody::Value(ValueDiagnostics { children: child_refs }),
        };

        Ok(ValueOutcome {
            parent,
            children,
            estimates,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;

    #[test]
    fn honest_claims_pass_per_action() {
        let config = testutil::config();
        let packet = testutil::packet();
        let sealed = SealedReference::from_packet(&packet);
        let out = ValueContract::new(&config)
            .verify("test-stream", &packet, &sealed)
            .unwrap();
        assert_eq!(out.parent.verdict, Verdict::Pass);
        assert_eq!(out.children.len(), 2);
        for (_, child) in &out.children {
            assert_eq!(child.verdict, Verdict::Pass);
        }
    }

    #[test]
    fn inflated_claim_fails_only_that_action() {
        let config = testutil::config();
        let mut packet = testutil::packet();
        packet.proposed_q.insert("MOVE_RIGHT".into(), 50.0);
        let sealed = SealedReference::from_packet(&packet);
        let out = ValueContract::new(&config)
            .verify("test-stream", &packet, &sealed)
            .unwrap();
        assert_eq!(out.parent.verdict, Verdict::Fail);
        assert_eq!(out.parent.reason, Some(ReasonCode::ValueDeviation));
        assert_eq!(out.estimates["MOVE_RIGHT"].verdict, Verdict::Fail);
        assert_eq!(out.estimates["ABSTAIN"].verdict, Verdict::Pass);
    }

    #[test]
    fn witness_bytes_reproducible() {
        let config = testutil::config();
        let packet = testutil::packet();
        let sealed = SealedReference::from_packet(&packet);
        let contract = ValueContract::new(&config);
        let a = contract.verify_action("test-stream", &packet, &sealed, "MOVE_RIGHT");
        let b = contract.verify_action("test-stream", &packet, &sealed, "MOVE_RIGHT");
        assert_eq!(a.canonical_bytes().unwrap(), b.canonical_bytes().unwrap());
    }

    #[test]
    fn different_streams_get_different_seeds() {
        let config = testutil::config();
        let packet = testutil::packet();
        let sealed = SealedReference::from_packet(&packet);
        let contract = ValueContract::new(&config);
        let a = contract.verify_action("stream-a", &packet, &sealed, "MOVE_RIGHT");
        let b = contract.verify_action("stream-b", &packet, &sealed, "MOVE_RIGHT");
        let (WitnessBody::ValueAction(da), WitnessBody::ValueAction(db)) = (&a.body, &b.body)
        else {
            panic!("wrong body")
        };
        assert_ne!(da.rollout_seed, db.rollout_seed);
    }

    #[test]
    fn parent_children_sorted_by_action() {
        let config = testutil::config();
        let packet = testutil::packet();
        let sealed = SealedReference::from_packet(&packet);
        let out = ValueContract::new(&config)
            .verify("test-stream", &packet, &sealed)
            .unwrap();
        let WitnessBody::Value(diag) = &out.parent.body else { panic!("wrong body") };
        let actions: Vec<&str> = diag.children.iter().map(|c| c.action.as_str()).collect();
        assert_eq!(actions, vec!["ABSTAIN", "MOVE_RIGHT"]);
        assert_eq!(diag.children[1].file, "witness_value_MOVE_RIGHT.json");
    }
}
