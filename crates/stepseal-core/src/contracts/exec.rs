//! ExecContract: did the environment really do that?
//!
//! The claimed outcome is checked against the *sealed* support for
//! (state, committed action), never the proposed row, and regardless
//! of the model contract's verdict: an honest proposal does not excuse
//! a lying executor. `ENV_LIE` is the strongest signal in the bundle.
//! On failure the step's output state is undefined and the next step
//! must not proceed from the claimed state.

use crate::config::KernelConfig;
use crate::packet::ProposalPacket;
use crate::reference::SealedReference;
use crate::witness::{
    ExecDiagnostics, ReasonCode, Verdict, WitnessBody, WitnessRecord, WITNESS_EXEC_SCHEMA_V1,
};
use tracing::warn;

/// The execution check's result for one step.
pub struct ExecOutcome {
    pub witness: WitnessRecord,
    /// `None` when the claimed outcome was rejected.
    pub output_state: Option<String>,
}

pub struct ExecContract<'a> {
    config: &'a KernelConfig,
}

impl<'a> ExecContract<'a> {
    pub fn new(config: &'a KernelConfig) -> Self {
        Self { config }
    }

    pub fn verify(
        &self,
        stream_id: &str,
        packet: &ProposalPacket,
        sealed: &SealedReference,
        committed_action: &str,
    ) -> ExecOutcome {
        let scale = self.config.rollout.scale_bits;
        let support = sealed.support(&packet.state, committed_action, scale);
        let observed = &packet.observed_next_state;
        let in_support = support.iter().any(|s| s == observed);

        let trace_first_action = packet
            .observed_trace
            .first()
            .map(|entry| entry.action.clone());
        let trace_consistent = trace_first_action
            .as_deref()
            .map_or(true, |first| first == committed_action);

        let reason = if !in_support {
            warn!(
                stream = stream_id,
                step = packet.step_counter,
                observed = %observed,
                action = committed_action,
                "claimed outcome outside sealed support"
            );
            Some(ReasonCode::EnvLie)
        } else if !trace_consistent {
            Some(ReasonCode::TraceMismatch)
        } else {
            None
        };

        let pass = reason.is_none();
        let witness = WitnessRecord {
            schema: WITNESS_EXEC_SCHEMA_V1.into(),
            stream_id: stream_id.into(),
            step: packet.step_counter,
            verdict: if pass { Verdict::Pass } else { Verdict::Fail },
            reason,
            body: WitnessBody::Exec(ExecDiagnostics {
                committed_action: committed_action.into(),
                observed_next_state: observed.clone(),
                support,
                in_support,
                trace_len: packet.observed_trace.len() as u64,
                trace_first_action,
            }),
        };

        ExecOutcome {
            witness,
            output_state: if pass { Some(observed.clone()) } else { None },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;

    fn verify(packet: &ProposalPacket, committed: &str) -> ExecOutcome {
        let config = testutil::config();
        let sealed = SealedReference::from_packet(packet);
        ExecContract::new(&config).verify("test-stream", packet, &sealed, committed)
    }

    #[test]
    fn honest_outcome_passes() {
        let packet = testutil::packet();
        let out = verify(&packet, "MOVE_RIGHT");
        assert_eq!(out.witness.verdict, Verdict::Pass);
        assert_eq!(out.output_state.as_deref(), Some("1,2"));
    }

    #[test]
    fn outcome_outside_support_is_env_lie() {
        let mut packet = testutil::packet();
        packet.observed_next_state = "5,5".into();
        let out = verify(&packet, "MOVE_RIGHT");
        assert_eq!(out.witness.verdict, Verdict::Fail);
        assert_eq!(out.witness.reason, Some(ReasonCode::EnvLie));
        assert_eq!(out.output_state, None);
    }

    #[test]
    fn env_lie_checked_even_when_proposal_dishonest() {
        // The sealed row, not the proposed row, defines the support.
        let mut packet = testutil::packet();
        packet.proposed_rows.insert(
            "MOVE_RIGHT".into(),
            crate::reference::TransitionRow(vec![("5,5".into(), 1.0)]),
        );
        packet.observed_next_state = "5,5".into();
        let out = verify(&packet, "MOVE_RIGHT");
        assert_eq!(out.witness.reason, Some(ReasonCode::EnvLie));
    }

    #[test]
    fn trace_must_start_with_committed_action() {
        let mut packet = testutil::packet();
        packet.observed_trace[0].action = "MOVE_LEFT".into();
        let out = verify(&packet, "MOVE_RIGHT");
        assert_eq!(out.witness.verdict, Verdict::Fail);
        assert_eq!(out.witness.reason, Some(ReasonCode::TraceMismatch));
        assert_eq!(out.output_state, None);
    }

    #[test]
    fn empty_trace_is_consistent() {
        let mut packet = testutil::packet();
        packet.observed_trace.clear();
        let out = verify(&packet, "MOVE_RIGHT");
        assert_eq!(out.witness.verdict, Verdict::Pass);
    }

    #[test]
    fn abstain_support_is_self_loop() {
        let mut packet = testutil::packet();
        packet.observed_next_state = "1,1".into();
        packet.observed_trace = vec![];
        let out = verify(&packet, crate::ABSTAIN);
        assert_eq!(out.witness.verdict, Verdict::Pass);
        assert_eq!(out.output_state.as_deref(), Some("1,1"));
    }
}
