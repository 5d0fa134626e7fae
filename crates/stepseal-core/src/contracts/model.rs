//! ModelContract: proposed transition rows against the sealed rows.
//!
//! Four guards per proposed row, in order: teleportation (no
//! next-state outside the sealed support), forbidden states, dust
//! mass, drift. The witness fails on the first violated guard but the
//! diagnostics always carry all four metrics for every row.

use crate::config::KernelConfig;
use crate::fixed;
use crate::packet::ProposalPacket;
use crate::reference::SealedReference;
use crate::witness::{
    ModelDiagnostics, ReasonCode, RowCheck, Verdict, WitnessBody, WitnessRecord,
    WITNESS_MODEL_SCHEMA_V1,
};
use tracing::debug;

pub struct ModelContract<'a> {
    config: &'a KernelConfig,
}

impl<'a> ModelContract<'a> {
    pub fn new(config: &'a KernelConfig) -> Self {
        Self { config }
    }

    pub fn verify(
        &self,
        stream_id: &str,
        packet: &ProposalPacket,
        sealed: &SealedReference,
    ) -> WitnessRecord {
        let scale = self.config.rollout.scale_bits;
        let dust_ceiling_int = fixed::quantize(self.config.tolerances.dust_ceiling, scale);
        let drift_tolerance_int = fixed::quantize(self.config.tolerances.drift_tolerance, scale);

        let mut rows = Vec::with_capacity(packet.proposed_rows.len());
        for (action, proposed) in &packet.proposed_rows {
            let proposed_int = proposed.quantize(scale);
            let reference_int = sealed.int_row_or_self_loop(&packet.state, action, scale);

            // Forbidden states are the forbidden guard's finding even
            // when they are also outside the sealed support.
            let teleport_state = proposed_int
                .iter()
                .map(|(s, _)| s)
                .find(|s| !reference_int.contains(s) && !sealed.is_forbidden(s))
                .map(str::to_string);

            let forbidden_state = proposed_int
                .iter()
                .map(|(s, _)| s)
                .find(|s| sealed.is_forbidden(s))
                .map(str::to_string);

            let dust_mass_int =
                (fixed::unit(scale) - proposed_int.total_mass() as i64).max(0);

            let mut max_drift_int = 0i64;
            let mut max_drift_state = None;
            for (s, m) in proposed_int.iter() {
                let ref_mass = reference_int.mass_of(s);
                let drift = (m as i64 - ref_mass as i64).abs();
                if ref_mass > 0 && drift > max_drift_int {
                    max_drift_int = drift;
                    max_drift_state = Some(s.to_string());
                }
            }

            // First violated guard wins the reason code.
            let reason = if teleport_state.is_some() {
                Some(ReasonCode::Teleport)
            } else if forbidden_state.is_some() {
                Some(ReasonCode::ForbiddenState)
            } else if dust_mass_int > dust_ceiling_int {
                Some(ReasonCode::DustMass)
            } else if max_drift_int > drift_tolerance_int {
                Some(ReasonCode::Drift)
            } else {
                None
            };

            rows.push(RowCheck {
                action: action.clone(),
                teleport_state,
                forbidden_state,
                dust_mass_int,
                max_drift_int,
                max_drift_state,
                verdict: if reason.is_none() { Verdict::Pass } else { Verdict::Fail },
                reason,
            });
        }

        let first_failure = rows.iter().find(|r| !r.verdict.is_pass());
        let (verdict, reason) = match first_failure {
            Some(row) => (Verdict::Fail, row.reason),
            None => (Verdict::Pass, None),
        };
        debug!(stream = stream_id, step = packet.step_counter, ?verdict, "model contract");

        WitnessRecord {
            schema: WITNESS_MODEL_SCHEMA_V1.into(),
            stream_id: stream_id.into(),
            step: packet.step_counter,
            verdict,
            reason,
            body: WitnessBody::Model(ModelDiagnostics {
                scale_bits: scale,
                dust_ceiling_int,
                drift_tolerance_int,
                rows,
            }),
        }
    }
}
