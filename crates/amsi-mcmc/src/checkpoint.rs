use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use amsi_core::errors::{AmsiError, ErrorInfo};
use amsi_hist::{BinGrid, Histogram};
use serde::{Deserialize, Serialize};

use crate::chain::{ChainState, NonFiniteBatch};
use crate::config::{ChainRun, SamplerConfig};

/// Partial chain reduction that can be resumed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReductionCheckpoint {
    /// Chain seed the run was started with.
    pub seed: u64,
    /// Sampler configuration of the run.
    pub config: SamplerConfig,
    /// Chain extent of the run.
    pub run: ChainRun,
    /// Grid the histogram is binned on.
    pub grid: BinGrid,
    /// Chain state at the checkpointed chunk boundary.
    pub state: ChainState,
    /// Coalesced histogram folded up to that boundary.
    pub histogram: Histogram,
    /// Samples folded so far.
    pub samples: u64,
    /// Chunks folded so far.
    pub chunks: u64,
    /// Steps skipped so far.
    #[serde(default)]
    pub warnings: Vec<NonFiniteBatch>,
}

impl ReductionCheckpoint {
    /// Restores a checkpoint from disk.
    pub fn load(path: &Path) -> Result<Self, AmsiError> {
        let contents = fs::read_to_string(path).map_err(|err| {
            AmsiError::Serde(
                ErrorInfo::new("checkpoint-read", err.to_string()).with_context("path", path.display()),
            )
        })?;
        serde_json::from_str(&contents).map_err(|err| {
            AmsiError::Serde(
                ErrorInfo::new("checkpoint-parse", err.to_string()).with_context("path", path.display()),
            )
        })
    }

    /// Writes the checkpoint as pretty JSON, creating parent directories.
    pub fn store(&self, path: &Path) -> Result<(), AmsiError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| {
                AmsiError::Serde(
                    ErrorInfo::new("checkpoint-mkdir", err.to_string())
                        .with_context("path", parent.display()),
                )
            })?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|err| {
            AmsiError::Serde(
                ErrorInfo::new("checkpoint-serialize", err.to_string())
                    .with_context("path", path.display()),
            )
        })?;
        fs::write(path, json).map_err(|err| {
            AmsiError::Serde(
                ErrorInfo::new("checkpoint-write", err.to_string()).with_context("path", path.display()),
            )
        })
    }

    /// Rejects a checkpoint written by a differently configured run.
    pub fn check_compatible(&self, seed: u64, config: &SamplerConfig) -> Result<(), AmsiError> {
        if self.seed != seed || &self.config != config {
            return Err(AmsiError::Serde(
                ErrorInfo::new("checkpoint-mismatch", "checkpoint belongs to another run")
                    .with_context("checkpoint_seed", self.seed)
                    .with_context("seed", seed)
                    .with_hint("resume with the seed and sampler config the checkpoint was written with"),
            ));
        }
        Ok(())
    }
}

/// Location of the checkpoint written after `step` chain steps.
pub fn checkpoint_path(root: &Path, step: u64) -> PathBuf {
    root.join(format!("ckpt_{step:08}.json"))
}

/// Checkpoints already present under `root`, oldest first. A missing
/// directory holds none.
pub(crate) fn existing_checkpoints(root: &Path) -> Result<Vec<PathBuf>, AmsiError> {
    let scan_error = |err: std::io::Error| {
        AmsiError::Serde(ErrorInfo::new("checkpoint-scan", err.to_string()).with_context("path", root.display()))
    };
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(scan_error(err)),
    };
    let mut paths = Vec::new();
    for entry in entries {
        let path = entry.map_err(scan_error)?.path();
        let is_checkpoint = path
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(|name| name.strip_prefix("ckpt_"))
            .and_then(|name| name.strip_suffix(".json"))
            .is_some_and(|step| !step.is_empty() && step.bytes().all(|b| b.is_ascii_digit()));
        if is_checkpoint {
            paths.push(path);
        }
    }
    // Steps are zero-padded, so names sort by step.
    paths.sort();
    Ok(paths)
}

/// Deletes the oldest checkpoints until at most `max_to_keep` remain.
pub(crate) fn enforce_retention(paths: &mut Vec<PathBuf>, max_to_keep: usize) -> Result<(), AmsiError> {
    if max_to_keep == 0 {
        return Ok(());
    }
    while paths.len() > max_to_keep {
        let path = paths.remove(0);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => {
                return Err(AmsiError::Serde(
                    ErrorInfo::new("checkpoint-remove", err.to_string()).with_context("path", path.display()),
                ))
            }
        }
    }
    Ok(())
}
