use std::fs;
use std::path::{Path, PathBuf};

use amsi_core::errors::{AmsiError, ErrorInfo};
use serde::{Deserialize, Serialize};

/// How proposals turn into histogram mass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Acceptance {
    /// Random-walk Metropolis over parallel chains; every kept state carries
    /// unit mass.
    #[default]
    Metropolis,
    /// Independent prior draws weighted by the ratio `target / prior`.
    Importance,
}

/// Parameters shared by the grid and chain modes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplerConfig {
    /// Rows per density evaluation; also the number of parallel chains.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Proposal standard deviation relative to each dimension's range.
    #[serde(default = "default_sigma")]
    pub sigma: f64,
    /// Acceptance rule of the chain mode.
    #[serde(default)]
    pub acceptance: Acceptance,
}

fn default_batch_size() -> usize {
    1 << 12
}

fn default_sigma() -> f64 {
    2e-2
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            sigma: default_sigma(),
            acceptance: Acceptance::default(),
        }
    }
}

impl SamplerConfig {
    /// Rejects configurations the sampler cannot run with.
    pub fn validate(&self) -> Result<(), AmsiError> {
        if self.batch_size == 0 {
            return Err(AmsiError::Sampling(ErrorInfo::new(
                "batch-size-zero",
                "batch_size must be at least one",
            )));
        }
        if !(self.sigma.is_finite() && self.sigma > 0.0) {
            return Err(AmsiError::Sampling(
                ErrorInfo::new("sigma-invalid", "sigma must be positive and finite")
                    .with_context("sigma", self.sigma),
            ));
        }
        Ok(())
    }

    /// Loads a configuration from a YAML file.
    pub fn from_yaml_path(path: &Path) -> Result<Self, AmsiError> {
        let contents = fs::read_to_string(path).map_err(|err| {
            AmsiError::Serde(
                ErrorInfo::new("config-read", err.to_string())
                    .with_context("path", path.display()),
            )
        })?;
        serde_yaml::from_str(&contents).map_err(|err| {
            AmsiError::Serde(
                ErrorInfo::new("config-parse", err.to_string())
                    .with_context("path", path.display()),
            )
        })
    }
}

/// Extent of a chain run, counted in chain steps. Every step draws one state
/// per parallel chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainRun {
    /// Burn-in steps discarded before accumulation starts.
    #[serde(default = "default_start")]
    pub start: u64,
    /// Step at which the run ends (exclusive).
    #[serde(default = "default_stop")]
    pub stop: u64,
    /// Steps concatenated into one chunk handed to the reducer.
    #[serde(default = "default_groupby")]
    pub groupby: usize,
}

fn default_start() -> u64 {
    1 << 6
}

fn default_stop() -> u64 {
    1 << 14
}

fn default_groupby() -> usize {
    1 << 8
}

impl Default for ChainRun {
    fn default() -> Self {
        Self {
            start: default_start(),
            stop: default_stop(),
            groupby: default_groupby(),
        }
    }
}

impl ChainRun {
    /// Rejects empty groups and inverted ranges.
    pub fn validate(&self) -> Result<(), AmsiError> {
        if self.groupby == 0 || self.start > self.stop {
            return Err(AmsiError::Sampling(
                ErrorInfo::new("chain-run", "need groupby >= 1 and start <= stop")
                    .with_context("start", self.start)
                    .with_context("stop", self.stop)
                    .with_context("groupby", self.groupby),
            ));
        }
        Ok(())
    }
}

/// Checkpointing configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Interval in reduced chunks between checkpoint writes (0 disables checkpoints).
    #[serde(default)]
    pub interval: usize,
    /// Directory where checkpoints are stored.
    #[serde(default)]
    pub directory: Option<PathBuf>,
    /// Maximum number of checkpoints to retain (0 keeps all of them).
    #[serde(default = "default_checkpoint_retention")]
    pub max_to_keep: usize,
}

fn default_checkpoint_retention() -> usize {
    4
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            interval: 0,
            directory: None,
            max_to_keep: default_checkpoint_retention(),
        }
    }
}

impl CheckpointConfig {
    /// Directory to write into, when checkpointing is enabled.
    pub fn active_directory(&self) -> Option<&Path> {
        if self.interval == 0 {
            return None;
        }
        self.directory.as_deref()
    }
}
