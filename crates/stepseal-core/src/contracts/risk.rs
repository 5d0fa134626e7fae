//! RiskGate: commit an action, or abstain.
//!
//! Defining invariant: no combination of upstream failures can commit
//! a non-ABSTAIN action. The candidate set is already empty whenever
//! the model contract failed; value failures and threshold filtering
//! only shrink it further. A forced abstention is recorded as
//! `ABSTAIN_FORCED`, distinct from ABSTAIN winning on merit.

use crate::config::KernelConfig;
use crate::contracts::value::ActionEstimate;
use crate::fixed;
use crate::witness::{
    ReasonCode, RiskDiagnostics, Verdict, WitnessBody, WitnessRecord, WITNESS_RISK_SCHEMA_V1,
};
use crate::ABSTAIN;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// The gate's decision for one step.
pub struct GateOutcome {
    pub witness: WitnessRecord,
    pub selected_action: String,
    pub forced: bool,
}

pub struct RiskGate<'a> {
    config: &'a KernelConfig,
}

impl<'a> RiskGate<'a> {
    pub fn new(config: &'a KernelConfig) -> Self {
        Self { config }
    }

    pub fn select(
        &self,
        stream_id: &str,
        step: u64,
        model_passed: bool,
        estimates: &BTreeMap<String, ActionEstimate>,
    ) -> GateOutcome {
        let scale = self.config.rollout.scale_bits;
        let min_return_int = fixed::quantize(self.config.tolerances.min_return, scale);
        let risk_ceiling_int = fixed::quantize(self.config.tolerances.risk_ceiling, scale);

        let mut candidates = Vec::new();
        let mut rejected = BTreeMap::new();
        if model_passed {
            for (action, est) in estimates {
                if !est.verdict.is_pass() {
                    rejected.insert(action.clone(), ReasonCode::ValueDeviation);
                } else if est.q_int < min_return_int || est.r_int > risk_ceiling_int {
                    rejected.insert(action.clone(), ReasonCode::BelowRiskThreshold);
                } else {
                    candidates.push(action.clone());
                }
            }
        }

        // Highest verified Q wins; BTreeMap order plus a strict
        // comparison makes ties resolve to the lowest identifier.
        let mut best: Option<(&str, i64)> = None;
        for action in &candidates {
            let q = estimates[action].q_int;
            if best.map_or(true, |(_, best_q)| q > best_q) {
                best = Some((action, q));
            }
        }

        let (selected_action, forced) = match best {
            Some((action, _)) => (action.to_string(), false),
            None => (ABSTAIN.to_string(), true),
        };

        if forced {
            warn!(
                stream = stream_id,
                step, model_passed, "no acceptable candidate, abstention forced"
            );
        } else {
            debug!(stream = stream_id, step, action = %selected_action, "risk gate committed");
        }

        let witness = WitnessRecord {
            schema: WITNESS_RISK_SCHEMA_V1.into(),
            stream_id: stream_id.into(),
            step,
            verdict: if forced { Verdict::Fail } else { Verdict::Pass },
            reason: if forced { Some(ReasonCode::AbstainForced) } else { None },
            body: WitnessBody::Risk(RiskDiagnostics {
                min_return_int,
                risk_ceiling_int,
                q_table_int: estimates.iter().map(|(a, e)| (a.clone(), e.q_int)).collect(),
                r_table_int: estimates.iter().map(|(a, e)| (a.clone(), e.r_int)).collect(),
                candidates,
                rejected,
                selected_action: selected_action.clone(),
                forced,
            }),
        };

        GateOutcome {
            witness,
            selected_action,
            forced,
        }
    }
}
