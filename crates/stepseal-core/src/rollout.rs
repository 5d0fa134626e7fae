//! Deterministic seeded rollouts.
//!
//! Independence from the proposer's numbers is the whole point: the
//! value contract re-estimates Q and R itself, and the estimate must
//! be bit-identical on every re-run and every conforming
//! reimplementation. So the RNG is a fully specified xorshift32, seeds
//! derive from `(global_seed, step, stream_id, action)` and nothing
//! else, transitions are drawn from the row's integer masses in
//! ascending next-state order, and all accumulation is fixed point.

use crate::fixed;
use crate::reference::{IntRow, SealedReference};
use stepseal_proof::{canon, sha256, Hash32};

/// Minimal deterministic PRNG. Zero seeds are remapped to a fixed
/// non-zero constant (xorshift has no zero state).
#[derive(Clone, Debug)]
pub struct XorShift32 {
    x: u32,
}

impl XorShift32 {
    pub fn new(seed: u32) -> Self {
        Self {
            x: if seed == 0 { 0xA341_316C } else { seed },
        }
    }

    pub fn next_u32(&mut self) -> u32 {
        let mut x = self.x;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.x = x;
        x
    }
}

/// Weyl-style 32-bit mixer used for seed derivation.
pub fn mix32(a: u32, b: u32) -> u32 {
    a.wrapping_mul(0x9E37_79B9).wrapping_add(b)
}

/// First four bytes (little endian) of SHA-256 over a token.
pub fn token_seed(token: &str) -> u32 {
    let Hash32(bytes) = sha256(token.as_bytes());
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// The fixed seed-derivation function: wall clocks and global counters
/// never enter, so per-action rollouts may run anywhere, in any order,
/// without changing a single bit of the estimates.
pub fn derive_rollout_seed(global_seed: u32, stream_id: &str, step: u64, action: &str) -> u32 {
    let base = mix32(global_seed, step as u32);
    mix32(mix32(base, token_seed(stream_id)), token_seed(action))
}

/// Draw a next-state from a quantized row. Cumulative scan in
/// ascending next-state order.
pub fn sample_next_state(rng: &mut XorShift32, row: &IntRow) -> String {
    let total = row.total_mass();
    debug_assert!(total > 0, "sampling from empty row");
    let r = u64::from(rng.next_u32()) % total;
    let mut acc = 0u64;
    let mut last = None;
    for (next_state, mass) in row.iter() {
        acc += mass;
        if r < acc {
            return next_state.to_string();
        }
        last = Some(next_state);
    }
    last.expect("non-empty row").to_string()
}

/// Parameters of one estimation run, already quantization-ready.
#[derive(Clone, Debug)]
pub struct RolloutParams {
    pub n_rollouts: u32,
    pub horizon: u32,
    pub scale_bits: u32,
    /// Discount factor, fixed point.
    pub gamma_int: i64,
    /// Action followed after the first step.
    pub follow_action: String,
}

/// Independent estimates for one (state, action), fixed point.
#[derive(Clone, Debug, PartialEq)]
pub struct ValueEstimate {
    pub q_int: i64,
    pub r_int: i64,
    /// Digest over all rollout trajectories, hex.
    pub trajectory_digest: String,
}

struct RolloutOutcome {
    return_int: i64,
    violated: bool,
    trajectory: Vec<String>,
}

fn rollout_once(
    params: &RolloutParams,
    reference: &SealedReference,
    state: &str,
    first_action: &str,
    rng: &mut XorShift32,
) -> RolloutOutcome {
    let scale = params.scale_bits;
    let mut gamma_pow = fixed::unit(scale);
    let mut s = state.to_string();
    let mut a = first_action.to_string();
    let mut trajectory = vec![s.clone()];
    let mut return_int = 0i64;
    let mut violated = false;

    for _ in 0..params.horizon {
        let row = reference.int_row_or_self_loop(&s, &a, scale);
        let s2 = sample_next_state(rng, &row);
        trajectory.push(s2.clone());

        let r_int = fixed::quantize(reference.reward(&s, &a, &s2), scale);
        return_int += (gamma_pow * r_int) >> scale;

        if reference.is_forbidden(&s2) {
            violated = true;
        }

        gamma_pow = (gamma_pow * params.gamma_int) >> scale;
        s = s2;
        a = params.follow_action.clone();
    }

    RolloutOutcome {
        return_int,
        violated,
        trajectory,
    }
}

/// Run the full batch of seeded rollouts for one (state, action).
///
/// Q̂ is the rounded mean discounted return; R̂ is the fraction of
/// rollouts that touched a forbidden state, fixed point.
pub fn estimate(
    params: &RolloutParams,
    reference: &SealedReference,
    state: &str,
    action: &str,
    seed: u32,
) -> ValueEstimate {
    let mut rng = XorShift32::new(seed);
    let mut returns = Vec::with_capacity(params.n_rollouts as usize);
    let mut violations = Vec::with_capacity(params.n_rollouts as usize);
    let mut trajectory_hashes = Vec::with_capacity(params.n_rollouts as usize);

    for _ in 0..params.n_rollouts {
        let outcome = rollout_once(params, reference, state, action, &mut rng);
        returns.push(outcome.return_int);
        violations.push(if outcome.violated {
            fixed::unit(params.scale_bits)
        } else {
            0
        });
        let bytes = canon::to_canonical_bytes(&outcome.trajectory)
            .expect("trajectory is plain strings");
        trajectory_hashes.push(sha256(&bytes).to_hex());
    }

    let digest_bytes =
        canon::to_canonical_bytes(&trajectory_hashes).expect("hex strings serialize");

    ValueEstimate {
        q_int: fixed::mean_round(&returns),
        r_int: fixed::mean_round(&violations),
        trajectory_digest: sha256(&digest_bytes).to_hex(),
    }
}
