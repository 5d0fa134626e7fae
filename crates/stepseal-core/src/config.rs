//! Kernel configuration.
//!
//! One explicit object, constructed by the caller and passed by
//! reference into the orchestrator and the audit verifier. The core
//! never reads the environment or any other ambient state; everything
//! a contract compares against comes from here or from the sealed
//! reference.

use crate::fixed;
use crate::rollout::RolloutParams;
use crate::{KernelError, Result, ABSTAIN};
use serde::{Deserialize, Serialize};
use stepseal_proof::signing::{RootVerifyingKey, SignatureScheme};
use stepseal_proof::Hash32;

/// Tolerances the contracts gate on. All are non-negative scalars,
/// quantized at verification time.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToleranceConfig {
    /// Ceiling on unmodeled probability mass per proposed row.
    pub dust_ceiling: f64,
    /// Per-state |proposed - reference| probability tolerance.
    pub drift_tolerance: f64,
    /// Tolerated |proposed Q - estimated Q|.
    pub eps_q: f64,
    /// Tolerated |proposed R - estimated R|.
    pub eps_r: f64,
    /// Minimum acceptable verified return for a candidate.
    pub min_return: f64,
    /// Maximum acceptable verified risk for a candidate.
    pub risk_ceiling: f64,
}

impl Default for ToleranceConfig {
    fn default() -> Self {
        Self {
            dust_ceiling: 0.05,
            drift_tolerance: 0.05,
            eps_q: 0.1,
            eps_r: 0.05,
            min_return: 0.0,
            risk_ceiling: 0.05,
        }
    }
}

/// Rollout shape and seed derivation inputs.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RolloutConfig {
    pub n_rollouts: u32,
    pub horizon: u32,
    /// Fixed-point scale; all contract arithmetic runs at `2^scale_bits`.
    pub scale_bits: u32,
    /// Discount factor in `[0, 1)`.
    pub gamma: f64,
    /// Action followed after the first rollout step.
    pub follow_action: String,
    /// Stream-independent seed component; mixed with stream id, step
    /// and action, never with wall clocks.
    pub global_seed: u32,
}

impl Default for RolloutConfig {
    fn default() -> Self {
        Self {
            n_rollouts: 64,
            horizon: 8,
            scale_bits: 16,
            gamma: 0.95,
            follow_action: ABSTAIN.into(),
            global_seed: 0,
        }
    }
}

/// Chain linkage parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Previous-root value of step 0, hex.
    pub genesis_root: String,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            genesis_root: "0".repeat(64),
        }
    }
}

/// Signature scheme and ledger public key.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SignatureConfig {
    pub scheme: String,
    /// Hex ledger public key; required only when an audit demands
    /// signed steps.
    pub verifying_key_hex: Option<String>,
}

impl Default for SignatureConfig {
    fn default() -> Self {
        Self {
            scheme: SignatureScheme::ED25519_V1.into(),
            verifying_key_hex: None,
        }
    }
}

/// Complete kernel configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct KernelConfig {
    pub tolerances: ToleranceConfig,
    pub rollout: RolloutConfig,
    pub chain: ChainConfig,
    pub signature: SignatureConfig,
}

impl KernelConfig {
    pub fn builder() -> KernelConfigBuilder {
        KernelConfigBuilder::default()
    }

    pub fn validate(&self) -> Result<()> {
        let t = &self.tolerances;
        for (name, v) in [
            ("dust_ceiling", t.dust_ceiling),
            ("drift_tolerance", t.drift_tolerance),
            ("eps_q", t.eps_q),
            ("eps_r", t.eps_r),
            ("risk_ceiling", t.risk_ceiling),
        ] {
            if !v.is_finite() || v < 0.0 {
                return Err(KernelError::ConfigError(format!(
                    "{name} must be a non-negative finite number, got {v}"
                )));
            }
        }
        if !t.min_return.is_finite() {
            return Err(KernelError::ConfigError("min_return must be finite".into()));
        }

        let r = &self.rollout;
        if r.n_rollouts == 0 {
            return Err(KernelError::ConfigError("n_rollouts must be at least 1".into()));
        }
        if r.horizon == 0 {
            return Err(KernelError::ConfigError("horizon must be at least 1".into()));
        }
        if !(1..=30).contains(&r.scale_bits) {
            return Err(KernelError::ConfigError(format!(
                "scale_bits must be in 1..=30, got {}",
                r.scale_bits
            )));
        }
        if !r.gamma.is_finite() || !(0.0..1.0).contains(&r.gamma) {
            return Err(KernelError::ConfigError(format!(
                "gamma must be in [0, 1), got {}",
                r.gamma
            )));
        }
        if r.follow_action.is_empty() {
            return Err(KernelError::ConfigError("follow_action must be non-empty".into()));
        }

        Hash32::from_hex(&self.chain.genesis_root)
            .map_err(|e| KernelError::ConfigError(format!("genesis_root: {e}")))?;

        SignatureScheme::from_id(&self.signature.scheme)
            .map_err(|e| KernelError::ConfigError(e.to_string()))?;
        if let Some(key) = &self.signature.verifying_key_hex {
            RootVerifyingKey::from_hex(key)
                .map_err(|e| KernelError::ConfigError(format!("verifying_key_hex: {e}")))?;
        }
        Ok(())
    }

    /// Quantized rollout parameters for the value contract.
    pub fn rollout_params(&self) -> RolloutParams {
        RolloutParams {
            n_rollouts: self.rollout.n_rollouts,
            horizon: self.rollout.horizon,
            scale_bits: self.rollout.scale_bits,
            gamma_int: fixed::quantize(self.rollout.gamma, self.rollout.scale_bits),
            follow_action: self.rollout.follow_action.clone(),
        }
    }

    /// The fixed previous-root of step 0.
    pub fn genesis_hash(&self) -> Result<Hash32> {
        Ok(Hash32::from_hex(&self.chain.genesis_root)?)
    }

    /// The configured ledger public key, if any.
    pub fn verifying_key(&self) -> Result<Option<RootVerifyingKey>> {
        match &self.signature.verifying_key_hex {
            Some(key) => Ok(Some(RootVerifyingKey::from_hex(key)?)),
            None => Ok(None),
        }
    }
}

/// Builder mirroring the flat knobs callers actually tune.
#[derive(Clone, Debug, Default)]
pub struct KernelConfigBuilder {
    config: KernelConfig,
}

impl KernelConfigBuilder {
    pub fn dust_ceiling(mut self, v: f64) -> Self {
        self.config.tolerances.dust_ceiling = v;
        self
    }

    pub fn drift_tolerance(mut self, v: f64) -> Self {
        self.config.tolerances.drift_tolerance = v;
        self
    }

    pub fn eps_q(mut self, v: f64) -> Self {
        self.config.tolerances.eps_q = v;
        self
    }

    pub fn eps_r(mut self, v: f64) -> Self {
        self.config.tolerances.eps_r = v;
        self
    }

    pub fn min_return(mut self, v: f64) -> Self {
        self.config.tolerances.min_return = v;
        self
    }

    pub fn risk_ceiling(mut self, v: f64) -> Self {
        self.config.tolerances.risk_ceiling = v;
        self
    }

    pub fn n_rollouts(mut self, v: u32) -> Self {
        self.config.rollout.n_rollouts = v;
        self
    }

    pub fn horizon(mut self, v: u32) -> Self {
        self.config.rollout.horizon = v;
        self
    }

    pub fn scale_bits(mut self, v: u32) -> Self {
        self.config.rollout.scale_bits = v;
        self
    }

    pub fn gamma(mut self, v: f64) -> Self {
        self.config.rollout.gamma = v;
        self
    }

    pub fn follow_action(mut self, v: impl Into<String>) -> Self {
        self.config.rollout.follow_action = v.into();
        self
    }

    pub fn global_seed(mut self, v: u32) -> Self {
        self.config.rollout.global_seed = v;
        self
    }

    pub fn genesis_root(mut self, v: impl Into<String>) -> Self {
        self.config.chain.genesis_root = v.into();
        self
    }

    pub fn signature_scheme(mut self, v: impl Into<String>) -> Self {
        self.config.signature.scheme = v.into();
        self
    }

    pub fn verifying_key_hex(mut self, v: impl Into<String>) -> Self {
        self.config.signature.verifying_key_hex = Some(v.into());
        self
    }

    pub fn build(self) -> Result<KernelConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
