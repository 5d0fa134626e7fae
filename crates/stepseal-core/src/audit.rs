//! AuditChainVerifier: out-of-band replay of sealed streams.
//!
//! Reads a stream of already-sealed bundles, recomputes each root from
//! the stored witness bytes, checks chain linkage against the prior
//! step's actual root, and optionally verifies root signatures against
//! the configured ledger public key. Never mutates storage, never
//! halts a scan on one step's failure: every verifiable step gets a
//! verdict.
//!
//! Deep mode re-runs the model and value contracts from the proposal
//! stored in each bundle, through the very same implementations the
//! orchestrator used, and compares the regenerated witnesses to the
//! stored leaves. That is what lets a peer audit a producer without
//! trusting the producer's summary.

use crate::config::KernelConfig;
use crate::contracts::{ModelContract, ValueContract};
use crate::store::{self, ArtifactStore};
use crate::witness::{WitnessBody, WitnessRecord};
use crate::{KernelError, Result};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use stepseal_proof::signing::RootVerifyingKey;
use stepseal_proof::{chain_leaf, merkle, witness_leaf, Hash32};
use tracing::{debug, warn};

/// What the caller wants checked beyond hashes and linkage.
#[derive(Clone, Copy, Debug, Default)]
pub struct AuditOptions {
    /// Demand a valid `root.sig` on every step. Requires a configured
    /// ledger public key.
    pub require_signature: bool,
    /// Re-run model and value contracts from the stored proposals.
    pub deep: bool,
}

/// Verdict for one step.
#[derive(Clone, Debug, Serialize)]
pub struct StepAuditReport {
    pub step: u64,
    /// Required artifacts present, no unexpected extras.
    pub files_ok: bool,
    /// Recomputed root matches `root_hash.txt` and `bundle.json`.
    pub same_hash: bool,
    /// Stated previous-root matches the prior step's actual root.
    pub chain_ok: bool,
    /// Per-action value witness files match the parent's child hashes.
    pub children_ok: bool,
    /// `bundle.json` agrees with the witness files it points at.
    pub bundle_ok: bool,
    /// `None` when no signature was demanded or evaluable.
    pub signature_ok: Option<bool>,
    /// `None` unless deep mode ran on this step.
    pub deep_ok: Option<bool>,
    pub ok: bool,
    pub notes: Vec<String>,
}

/// Aggregate verdict for a stream.
#[derive(Clone, Debug, Serialize)]
pub struct StreamAuditReport {
    pub stream_id: Option<String>,
    pub steps: Vec<StepAuditReport>,
    /// Stream-level defects: malformed directory names, gaps, an
    /// empty stream.
    pub layout_notes: Vec<String>,
    pub ok: bool,
}

pub struct AuditChainVerifier<'a> {
    config: &'a KernelConfig,
}

impl<'a> AuditChainVerifier<'a> {
    pub fn new(config: &'a KernelConfig) -> Self {
        Self { config }
    }

    /// Scan and verify one stream root. Returns `Err` only when the
    /// stream root itself is unreadable or a demanded key is missing;
    /// everything else is reported per step.
    pub fn verify_stream(
        &self,
        stream_root: &Path,
        options: &AuditOptions,
    ) -> Result<StreamAuditReport> {
        let verifying_key = self.config.verifying_key()?;
        if options.require_signature && verifying_key.is_none() {
            return Err(KernelError::KeyUnavailable(
                "signature audit demanded but no ledger public key configured".into(),
            ));
        }

        let scan = ArtifactStore::new(stream_root, "audit").scan()?;
        let mut layout_notes: Vec<String> = scan
            .malformed
            .iter()
            .map(|name| format!("directory {name:?} violates step naming"))
            .collect();
        if scan.steps.is_empty() {
            layout_notes.push("stream contains no sealed steps".into());
        }
        for (index, (step, _)) in scan.steps.iter().enumerate() {
            if *step != index as u64 {
                layout_notes.push(format!(
                    "step sequence broken: expected step {index}, found step {step}"
                ));
                break;
            }
        }

        let mut steps = Vec::with_capacity(scan.steps.len());
        let mut stream_id = None;
        let mut prev_actual_root: Option<Hash32> = None;

        for (step, dir) in &scan.steps {
            let report = self.verify_step_dir(
                *step,
                dir,
                prev_actual_root,
                verifying_key.as_ref(),
                options,
                &mut stream_id,
                &mut prev_actual_root,
            );
            if !report.ok {
                warn!(step = report.step, notes = ?report.notes, "step failed audit");
            }
            steps.push(report);
        }

        let ok = layout_notes.is_empty() && steps.iter().all(|s| s.ok);
        Ok(StreamAuditReport {
            stream_id,
            steps,
            layout_notes,
            ok,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn verify_step_dir(
        &self,
        step: u64,
        dir: &Path,
        prev_root: Option<Hash32>,
        verifying_key: Option<&RootVerifyingKey>,
        options: &AuditOptions,
        stream_id: &mut Option<String>,
        next_prev_root: &mut Option<Hash32>,
    ) -> StepAuditReport {
        let mut notes = Vec::new();
        let mut files_ok = true;
        let mut same_hash = false;
        let mut chain_ok = false;
        let mut children_ok = true;
        let mut signature_ok = None;
        let mut deep_ok = None;

        files_ok &= self.check_layout(dir, &mut notes);

        // Stored root, from root_hash.txt.
        let stored_root = match fs::read_to_string(dir.join(store::FILE_ROOT_HASH)) {
            Ok(text) => match Hash32::from_hex(text.trim()) {
                Ok(root) => Some(root),
                Err(e) => {
                    notes.push(format!("root_hash.txt unparseable: {e}"));
                    None
                }
            },
            Err(e) => {
                notes.push(format!("root_hash.txt unreadable: {e}"));
                None
            }
        };

        // Bundle, for the previous-root field and deep replay.
        let bundle = match fs::read(dir.join(store::FILE_BUNDLE)) {
            Ok(bytes) => match serde_json::from_slice::<crate::bundle::Bundle>(&bytes) {
                Ok(bundle) => Some(bundle),
                Err(e) => {
                    notes.push(format!("bundle.json unparseable: {e}"));
                    None
                }
            },
            Err(e) => {
                notes.push(format!("bundle.json unreadable: {e}"));
                None
            }
        };
        if let Some(bundle) = &bundle {
            if stream_id.is_none() {
                *stream_id = Some(bundle.stream_id.clone());
            }
        }

        // Recompute the root from stored witness bytes.
        let recomputed = bundle.as_ref().and_then(|bundle| {
            let mut leaves = Vec::with_capacity(5);
            for name in [
                store::FILE_WITNESS_MODEL,
                store::FILE_WITNESS_VALUE,
                store::FILE_WITNESS_RISK,
                store::FILE_WITNESS_EXEC,
            ] {
                match fs::read(dir.join(name)) {
                    Ok(bytes) => leaves.push(witness_leaf(&bytes)),
                    Err(e) => {
                        notes.push(format!("{name} unreadable: {e}"));
                        return None;
                    }
                }
            }
            leaves.push(chain_leaf(&bundle.previous_root));
            Some(merkle::root_of(&leaves))
        });

        if let (Some(recomputed), Some(stored), Some(bundle)) =
            (recomputed, stored_root, bundle.as_ref())
        {
            same_hash = recomputed == stored && bundle.merkle_root == stored.to_hex();
            if !same_hash {
                notes.push(format!(
                    "root mismatch: recomputed {recomputed}, stored {stored}, bundle {}",
                    bundle.merkle_root
                ));
            }
        }

        // Chain linkage against the prior step's actual root.
        if let Some(bundle) = &bundle {
            let expected_prev = if step == 0 {
                self.config.genesis_hash().ok()
            } else {
                prev_root
            };
            match expected_prev {
                Some(expected) => {
                    chain_ok = bundle.previous_root == expected.to_hex();
                    if !chain_ok {
                        notes.push(format!(
                            "chain break: stated previous root {}, actual {expected}",
                            bundle.previous_root
                        ));
                    }
                }
                None => notes.push("previous step's root unavailable".into()),
            }
        }

        children_ok &= self.check_value_children(dir, &mut notes);

        let bundle_ok = match &bundle {
            Some(bundle) => self.check_bundle_consistency(dir, bundle, &mut notes),
            None => false,
        };

        // Signatures, on demand or opportunistically when material is
        // at hand.
        let sig_path = dir.join(store::FILE_ROOT_SIG);
        if options.require_signature && !sig_path.exists() {
            signature_ok = Some(false);
            notes.push("signature demanded but root.sig missing".into());
        } else if sig_path.exists() {
            if let (Some(key), Some(stored)) = (verifying_key, stored_root) {
                let verified = fs::read_to_string(&sig_path)
                    .ok()
                    .and_then(|text| hex::decode(text.trim()).ok())
                    .map(|sig| key.verify_root(&stored, &sig).is_ok())
                    .unwrap_or(false);
                signature_ok = Some(verified);
                if !verified {
                    notes.push("root.sig does not verify".into());
                }
            } else if options.require_signature {
                signature_ok = Some(false);
                notes.push("root.sig present but not verifiable".into());
            }
        }

        if options.deep {
            if let Some(bundle) = &bundle {
                let replay = self.deep_replay(dir, bundle, &mut notes);
                deep_ok = Some(replay);
            } else {
                deep_ok = Some(false);
            }
        }

        // Pass the actual root (recomputed when possible) forward for
        // the next step's linkage check.
        *next_prev_root = recomputed.or(stored_root);

        let ok = files_ok
            && same_hash
            && chain_ok
            && children_ok
            && bundle_ok
            && signature_ok != Some(false)
            && deep_ok != Some(false);
        debug!(step, ok, "step audited");

        StepAuditReport {
            step,
            files_ok,
            same_hash,
            chain_ok,
            children_ok,
            bundle_ok,
            signature_ok,
            deep_ok,
            ok,
            notes,
        }
    }

    /// The bundle's witness pointers match the files, and the committed
    /// action is the one the exec witness recorded.
    fn check_bundle_consistency(
        &self,
        dir: &Path,
        bundle: &crate::bundle::Bundle,
        notes: &mut Vec<String>,
    ) -> bool {
        let mut ok = true;
        for (name, wref) in [
            (store::FILE_WITNESS_MODEL, &bundle.witnesses.model),
            (store::FILE_WITNESS_VALUE, &bundle.witnesses.value),
            (store::FILE_WITNESS_RISK, &bundle.witnesses.risk),
            (store::FILE_WITNESS_EXEC, &bundle.witnesses.exec),
        ] {
            if wref.file != name {
                notes.push(format!("bundle points {name} at {:?}", wref.file));
                ok = false;
                continue;
            }
            match fs::read(dir.join(name)) {
                Ok(bytes) => {
                    if witness_leaf(&bytes).to_hex() != wref.hash {
                        notes.push(format!("bundle hash for {name} does not match the file"));
                        ok = false;
                    }
                }
                // Missing file already noted during root recomputation.
                Err(_) => ok = false,
            }
        }

        let exec = fs::read(dir.join(store::FILE_WITNESS_EXEC))
            .ok()
            .and_then(|bytes| serde_json::from_slice::<WitnessRecord>(&bytes).ok());
        if let Some(WitnessBody::Exec(diag)) = exec.map(|w| w.body) {
            if diag.committed_action != bundle.selected_action {
                notes.push(format!(
                    "bundle commits {:?} but the exec witness recorded {:?}",
                    bundle.selected_action, diag.committed_action
                ));
                ok = false;
            }
        }
        ok
    }

    /// Required artifacts present; extras limited to per-action value
    /// witnesses and the optional signature.
    fn check_layout(&self, dir: &Path, notes: &mut Vec<String>) -> bool {
        let required = [
            store::FILE_WITNESS_MODEL,
            store::FILE_WITNESS_VALUE,
            store::FILE_WITNESS_RISK,
            store::FILE_WITNESS_EXEC,
            store::FILE_BUNDLE,
            store::FILE_ROOT_HASH,
        ];
        let mut ok = true;
        let present: BTreeSet<String> = match fs::read_dir(dir) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .filter(|e| e.path().is_file())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect(),
            Err(e) => {
                notes.push(format!("step directory unreadable: {e}"));
                return false;
            }
        };
        for name in required {
            if !present.contains(name) {
                notes.push(format!("missing artifact {name}"));
                ok = false;
            }
        }
        for name in &present {
            let expected = required.contains(&name.as_str())
                || name == store::FILE_ROOT_SIG
                || (name.starts_with("witness_value_") && name.ends_with(".json"));
            if !expected {
                notes.push(format!("unexpected artifact {name}"));
                ok = false;
            }
        }
        ok
    }

    /// Every child hash in the parent witness matches its file, and
    /// every child file is accounted for.
    fn check_value_children(&self, dir: &Path, notes: &mut Vec<String>) -> bool {
        let parent: WitnessRecord =
            match fs::read(dir.join(store::FILE_WITNESS_VALUE))
                .ok()
                .and_then(|bytes| serde_json::from_slice(&bytes).ok())
            {
                Some(parent) => parent,
                None => {
                    notes.push("value parent witness unreadable".into());
                    return false;
                }
            };
        let WitnessBody::Value(diag) = &parent.body else {
            notes.push("value parent witness has wrong body".into());
            return false;
        };

        let mut ok = true;
        let mut listed = BTreeSet::new();
        for child in &diag.children {
            listed.insert(child.file.clone());
            match fs::read(dir.join(&child.file)) {
                Ok(bytes) => {
                    if witness_leaf(&bytes).to_hex() != child.hash {
                        notes.push(format!("child witness {} hash mismatch", child.file));
                        ok = false;
                    }
                }
                Err(e) => {
                    notes.push(format!("child witness {} unreadable: {e}", child.file));
                    ok = false;
                }
            }
        }
        if let Ok(entries) = fs::read_dir(dir) {
            for entry in entries.filter_map(|e| e.ok()) {
                let name = entry.file_name().to_string_lossy().into_owned();
                if name.starts_with("witness_value_")
                    && name.ends_with(".json")
                    && !listed.contains(&name)
                {
                    notes.push(format!("stray child witness {name}"));
                    ok = false;
                }
            }
        }
        ok
    }

    /// Re-run model and value contracts from the stored proposal and
    /// compare against the stored witness bytes.
    fn deep_replay(
        &self,
        dir: &Path,
        bundle: &crate::bundle::Bundle,
        notes: &mut Vec<String>,
    ) -> bool {
        if let Err(e) = bundle.proposal.validate() {
            notes.push(format!("stored proposal invalid: {e}"));
            return false;
        }

        let model = ModelContract::new(self.config).verify(
            &bundle.stream_id,
            &bundle.proposal,
            &bundle.sealed_reference,
        );
        let value = match ValueContract::new(self.config).verify(
            &bundle.stream_id,
            &bundle.proposal,
            &bundle.sealed_reference,
        ) {
            Ok(value) => value,
            Err(e) => {
                notes.push(format!("value replay failed: {e}"));
                return false;
            }
        };

        let mut ok = true;
        for (name, regenerated) in [
            (store::FILE_WITNESS_MODEL, &model),
            (store::FILE_WITNESS_VALUE, &value.parent),
        ] {
            let stored = fs::read(dir.join(name)).unwrap_or_default();
            let matches = regenerated
                .canonical_bytes()
                .map(|bytes| bytes == stored)
                .unwrap_or(false);
            if !matches {
                notes.push(format!("deep replay diverges from stored {name}"));
                ok = false;
            }
        }
        ok
    }
}
