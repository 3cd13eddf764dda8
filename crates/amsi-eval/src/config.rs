//! Evaluation settings.

use std::fs;
use std::path::{Path, PathBuf};

use amsi_core::errors::{AmsiError, ErrorInfo};
use amsi_core::rng::derive_labelled_seed;
use amsi_hist::{ReduceOptions, TransportOptions, DEFAULT_DENSE_LIMIT};
use amsi_mcmc::{Acceptance, ChainRun, CheckpointConfig, SamplerConfig};
use serde::{Deserialize, Serialize};

/// How run seeds are derived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedPolicy {
    /// Master seed of the whole evaluation.
    #[serde(default)]
    pub master_seed: u64,
    /// Label mixed into the master seed, so runs sharing a seed can differ.
    #[serde(default = "SeedPolicy::default_label")]
    pub label: String,
}

impl SeedPolicy {
    fn default_label() -> String {
        "amsi-eval".to_string()
    }

    /// Seed every chain seed is derived from.
    pub fn run_seed(&self) -> u64 {
        derive_labelled_seed(self.master_seed, &self.label)
    }
}

impl Default for SeedPolicy {
    fn default() -> Self {
        Self {
            master_seed: 0,
            label: Self::default_label(),
        }
    }
}

/// Histogram storage settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReductionConfig {
    /// Histograms with at most this many bins are stored densely.
    #[serde(default = "ReductionConfig::default_dense_limit")]
    pub dense_limit: u64,
}

impl ReductionConfig {
    fn default_dense_limit() -> u64 {
        DEFAULT_DENSE_LIMIT as u64
    }
}

impl Default for ReductionConfig {
    fn default() -> Self {
        Self {
            dense_limit: Self::default_dense_limit(),
        }
    }
}

/// Sinkhorn controls of the transport distance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WassersteinConfig {
    #[serde(default = "WassersteinConfig::default_reg")]
    pub reg: f64,
    #[serde(default = "WassersteinConfig::default_max_iter")]
    pub max_iter: usize,
    #[serde(default = "WassersteinConfig::default_tol")]
    pub tol: f64,
}

impl WassersteinConfig {
    fn default_reg() -> f64 {
        TransportOptions::default().reg
    }

    fn default_max_iter() -> usize {
        TransportOptions::default().max_iter
    }

    fn default_tol() -> f64 {
        TransportOptions::default().tol
    }
}

impl Default for WassersteinConfig {
    fn default() -> Self {
        Self {
            reg: Self::default_reg(),
            max_iter: Self::default_max_iter(),
            tol: Self::default_tol(),
        }
    }
}

/// Full evaluation configuration, passed explicitly to the driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalConfig {
    /// Rows per density evaluation and number of parallel chains.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Proposal standard deviation relative to each parameter range.
    #[serde(default = "default_sigma")]
    pub sigma: f64,
    /// Acceptance rule of the chain mode.
    #[serde(default)]
    pub acceptance: Acceptance,
    /// Burn-in chain steps.
    #[serde(default = "default_start")]
    pub start: u64,
    /// Last chain step (exclusive).
    #[serde(default = "default_stop")]
    pub stop: u64,
    /// Chain steps per reduced chunk.
    #[serde(default = "default_groupby")]
    pub groupby: usize,
    /// Bins per parameter.
    #[serde(default = "default_bins")]
    pub bins: usize,
    /// Joint bin counts above this use the chain mode instead of the grid mode.
    #[serde(default = "default_mcmc_limit")]
    pub mcmc_limit: u64,
    /// Joint bin counts above this skip the transport distance.
    #[serde(default = "default_wd_limit")]
    pub wd_limit: u64,
    /// Compare against the ground-truth posterior when one is available.
    #[serde(default)]
    pub accuracy: bool,
    /// Record the highest-density quantile of the true parameters.
    #[serde(default)]
    pub coverage: bool,
    /// Build the mask-by-mask divergence matrix.
    #[serde(default)]
    pub consistence: bool,
    /// Assemble 1-D and 2-D marginals into a pair table.
    #[serde(default)]
    pub composition: bool,
    #[serde(default)]
    pub seed_policy: SeedPolicy,
    #[serde(default)]
    pub reduction: ReductionConfig,
    #[serde(default)]
    pub wasserstein: WassersteinConfig,
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
}

fn default_batch_size() -> usize {
    1 << 12
}

fn default_sigma() -> f64 {
    2e-2
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

fn default_bins() -> usize {
    50
}

fn default_mcmc_limit() -> u64 {
    10_000_000
}

fn default_wd_limit() -> u64 {
    10_000
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            sigma: default_sigma(),
            acceptance: Acceptance::default(),
            start: default_start(),
            stop: default_stop(),
            groupby: default_groupby(),
            bins: default_bins(),
            mcmc_limit: default_mcmc_limit(),
            wd_limit: default_wd_limit(),
            accuracy: false,
            coverage: false,
            consistence: false,
            composition: false,
            seed_policy: SeedPolicy::default(),
            reduction: ReductionConfig::default(),
            wasserstein: WassersteinConfig::default(),
            checkpoint: CheckpointConfig::default(),
        }
    }
}

impl EvalConfig {
    /// Loads a configuration, as YAML for `.yaml`/`.yml` files and JSON otherwise.
    pub fn load(path: &Path) -> Result<Self, AmsiError> {
        let contents = fs::read_to_string(path).map_err(|err| {
            AmsiError::Serde(ErrorInfo::new("config-read", err.to_string()).with_context("path", path.display()))
        })?;
        let yaml = matches!(
            path.extension().and_then(|ext| ext.to_str()),
            Some("yaml") | Some("yml")
        );
        let parsed: Result<Self, String> = if yaml {
            serde_yaml::from_str(&contents).map_err(|err| err.to_string())
        } else {
            serde_json::from_str(&contents).map_err(|err| err.to_string())
        };
        let config = parsed.map_err(|err| {
            AmsiError::Serde(ErrorInfo::new("config-parse", err).with_context("path", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects settings no evaluation can run with.
    pub fn validate(&self) -> Result<(), AmsiError> {
        if self.bins == 0 {
            return Err(AmsiError::Shape(ErrorInfo::new("bins-zero", "bins must be at least one")));
        }
        self.sampler_config().validate()?;
        self.chain_run().validate()
    }

    /// Sampler settings shared by every mask.
    pub fn sampler_config(&self) -> SamplerConfig {
        SamplerConfig {
            batch_size: self.batch_size,
            sigma: self.sigma,
            acceptance: self.acceptance,
        }
    }

    /// Chain extent shared by every mask.
    pub fn chain_run(&self) -> ChainRun {
        ChainRun {
            start: self.start,
            stop: self.stop,
            groupby: self.groupby,
        }
    }

    /// Reducer settings; one chain step is folded at a time.
    pub fn reduce_options(&self) -> ReduceOptions {
        ReduceOptions {
            groupby: self.batch_size,
            dense_limit: self.reduction.dense_limit as u128,
        }
    }

    /// Transport settings bounded by `wd_limit`.
    pub fn transport_options(&self) -> TransportOptions {
        TransportOptions {
            limit: self.wd_limit as u128,
            reg: self.wasserstein.reg,
            max_iter: self.wasserstein.max_iter,
            tol: self.wasserstein.tol,
        }
    }

    /// Checkpoint settings of one chain, stored under `<directory>/<name>`.
    pub fn checkpoint_for(&self, name: &str) -> CheckpointConfig {
        let directory: Option<PathBuf> = self.checkpoint.directory.as_ref().map(|dir| dir.join(name));
        CheckpointConfig {
            directory,
            ..self.checkpoint.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_the_evaluation_options() {
        let config: EvalConfig = serde_yaml::from_str("bins: 20\ncoverage: true\n").unwrap();
        assert_eq!(config.bins, 20);
        assert!(config.coverage);
        assert_eq!(config.batch_size, 4096);
        assert_eq!(config.stop, 16384);
        assert_eq!(config.mcmc_limit, 10_000_000);
        assert_eq!(config.transport_options().limit, 10_000);
        assert_eq!(config.checkpoint.interval, 0);
    }

    #[test]
    fn checkpoint_directories_are_per_chain() {
        let mut config = EvalConfig::default();
        config.checkpoint.directory = Some(PathBuf::from("ckpt"));
        config.checkpoint.interval = 2;
        let chain = config.checkpoint_for("3_101");
        assert_eq!(chain.directory, Some(PathBuf::from("ckpt").join("3_101")));
        assert_eq!(chain.interval, 2);
    }
}
