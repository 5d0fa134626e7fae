//! Artifact storage for sealed steps.
//!
//! The write side is the kernel's single mutation point: every file of
//! a step is written into a staging directory, then one atomic rename
//! commits the whole step. A crash leaves at most an orphaned staging
//! directory, never a half-written step a reader could observe.
//! Sealing an already-sealed step fails loudly; it never overwrites.

use crate::bundle::Bundle;
use crate::{KernelError, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use stepseal_proof::signing::RootSigningKey;
use stepseal_proof::Hash32;
use tracing::{debug, info};

pub const FILE_WITNESS_MODEL: &str = "witness_model.json";
pub const FILE_WITNESS_VALUE: &str = "witness_value.json";
pub const FILE_WITNESS_RISK: &str = "witness_risk.json";
pub const FILE_WITNESS_EXEC: &str = "witness_exec.json";
pub const FILE_BUNDLE: &str = "bundle.json";
pub const FILE_ROOT_HASH: &str = "root_hash.txt";
pub const FILE_ROOT_SIG: &str = "root.sig";

/// Per-action value witness file name. Action identifiers are plain
/// tokens by packet validation, so this is always a single path
/// component.
pub fn value_child_file(action: &str) -> String {
    format!("witness_value_{action}.json")
}

/// `step_<step>` directory name, zero-padded to at least six digits.
/// Steps past 999999 widen naturally.
pub fn step_dir_name(step: u64) -> String {
    format!("step_{step:06}")
}

/// Strict inverse of [`step_dir_name`]: only the canonical rendering
/// of a step number parses, so excess zero padding stays malformed.
pub fn parse_step_dir_name(name: &str) -> Option<u64> {
    let digits = name.strip_prefix("step_")?;
    if digits.len() < 6 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let step: u64 = digits.parse().ok()?;
    (step_dir_name(step) == name).then_some(step)
}

fn io_err(path: &Path, source: std::io::Error) -> KernelError {
    KernelError::Storage {
        path: path.to_path_buf(),
        source,
    }
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut f = fs::File::create(path).map_err(|e| io_err(path, e))?;
    f.write_all(bytes).map_err(|e| io_err(path, e))?;
    f.sync_all().map_err(|e| io_err(path, e))?;
    Ok(())
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| io_err(path, e))
}

/// Storage for one stream's step directories.
pub struct ArtifactStore {
    stream_root: PathBuf,
    stream_id: String,
}

impl ArtifactStore {
    pub fn new(stream_root: impl Into<PathBuf>, stream_id: impl Into<String>) -> Self {
        Self {
            stream_root: stream_root.into(),
            stream_id: stream_id.into(),
        }
    }

    pub fn stream_root(&self) -> &Path {
        &self.stream_root
    }

    pub fn step_dir(&self, step: u64) -> PathBuf {
        self.stream_root.join(step_dir_name(step))
    }

    pub fn is_sealed(&self, step: u64) -> bool {
        self.step_dir(step).is_dir()
    }

    /// Open a staging directory for one step. Fails immediately if the
    /// step is already sealed.
    pub fn stage(&self, step: u64) -> Result<StagedStep> {
        let final_dir = self.step_dir(step);
        if final_dir.exists() {
            return Err(KernelError::DuplicateSeal {
                stream_id: self.stream_id.clone(),
                step,
            });
        }
        fs::create_dir_all(&self.stream_root).map_err(|e| io_err(&self.stream_root, e))?;
        let nonce: u32 = rand::random();
        let staging = self
            .stream_root
            .join(format!(".staging_{}_{nonce:08x}", step_dir_name(step)));
        fs::create_dir(&staging).map_err(|e| io_err(&staging, e))?;
        debug!(staging = %staging.display(), "staged step directory");
        Ok(StagedStep {
            staging,
            final_dir,
            stream_id: self.stream_id.clone(),
            step,
            committed: false,
        })
    }

    pub fn read_step_file(&self, step: u64, name: &str) -> Result<Vec<u8>> {
        read_file(&self.step_dir(step).join(name))
    }

    pub fn read_root(&self, step: u64) -> Result<Hash32> {
        let bytes = self.read_step_file(step, FILE_ROOT_HASH)?;
        let text = String::from_utf8_lossy(&bytes);
        Ok(Hash32::from_hex(text.trim())?)
    }

    pub fn read_bundle(&self, step: u64) -> Result<Bundle> {
        let bytes = self.read_step_file(step, FILE_BUNDLE)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Sign a sealed step's root. Idempotent: re-signing with the same
    /// key is a no-op; a conflicting existing signature is an error,
    /// never silently replaced.
    pub fn sign_step(&self, step: u64, key: &RootSigningKey) -> Result<()> {
        let root = self.read_root(step)?;
        let sig_hex = hex::encode(key.sign_root(&root));
        let sig_path = self.step_dir(step).join(FILE_ROOT_SIG);

        if sig_path.exists() {
            let existing = read_file(&sig_path)?;
            if String::from_utf8_lossy(&existing).trim() == sig_hex {
                debug!(step, "step already signed identically");
                return Ok(());
            }
            return Err(KernelError::SignConflict { step });
        }

        let tmp = self
            .step_dir(step)
            .join(format!(".{FILE_ROOT_SIG}.{:08x}", rand::random::<u32>()));
        write_file(&tmp, format!("{sig_hex}\n").as_bytes())?;
        fs::rename(&tmp, &sig_path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            io_err(&sig_path, e)
        })?;
        info!(step, "step root signed");
        Ok(())
    }

    /// List sealed step directories, sorted by step number, plus the
    /// names of `step_*` entries that violate the naming contract.
    pub fn scan(&self) -> Result<StreamScan> {
        let mut steps = Vec::new();
        let mut malformed = Vec::new();
        let entries = fs::read_dir(&self.stream_root).map_err(|e| io_err(&self.stream_root, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| io_err(&self.stream_root, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            if !entry.path().is_dir() {
                // A plain file squatting on a step name is a layout
                // defect, not something to skip over.
                if name.starts_with("step_") {
                    malformed.push(name);
                }
                continue;
            }
            if let Some(step) = parse_step_dir_name(&name) {
                steps.push((step, entry.path()));
            } else if name.starts_with("step_") {
                malformed.push(name);
            }
        }
        steps.sort_by_key(|(step, _)| *step);
        malformed.sort();
        Ok(StreamScan { steps, malformed })
    }
}

/// Result of enumerating a stream root.
pub struct StreamScan {
    pub steps: Vec<(u64, PathBuf)>,
    pub malformed: Vec<String>,
}

/// A step being written. Dropping without committing removes the
/// staging directory.
pub struct StagedStep {
    staging: PathBuf,
    final_dir: PathBuf,
    stream_id: String,
    step: u64,
    committed: bool,
}

impl StagedStep {
    pub fn write_file(&self, name: &str, bytes: &[u8]) -> Result<()> {
        write_file(&self.staging.join(name), bytes)
    }

    /// Atomically publish the staged step. After this returns, readers
    /// see either nothing or the complete step.
    pub fn commit(mut self) -> Result<PathBuf> {
        if self.final_dir.exists() {
            // A concurrent writer won the race; the Drop impl cleans
            // our staging directory up.
            return Err(KernelError::DuplicateSeal {
                stream_id: self.stream_id.clone(),
                step: self.step,
            });
        }
        match fs::rename(&self.staging, &self.final_dir) {
            Ok(()) => {
                self.committed = true;
                Ok(self.final_dir.clone())
            }
            Err(e) if self.final_dir.exists() => {
                debug!(error = %e, "rename lost seal race");
                Err(KernelError::DuplicateSeal {
                    stream_id: self.stream_id.clone(),
                    step: self.step,
                })
            }
            Err(e) => Err(io_err(&self.final_dir, e)),
        }
    }
}

impl Drop for StagedStep {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_dir_all(&self.staging);
        }
    }
}
