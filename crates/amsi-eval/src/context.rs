//! Collaborators of an evaluation run.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use amsi_core::errors::{AmsiError, ErrorInfo};
use amsi_core::Mask;
use amsi_hist::{CancelToken, Histogram};
use amsi_mcmc::{DensityModel, Estimator, Prior};
use serde::{Deserialize, Serialize};

/// One simulated pair: the true parameters and the observation they produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub theta: Vec<f64>,
    pub x: Vec<f64>,
}

/// Storage for unnormalized ground-truth histograms, keyed by index.
pub trait TruthCache: Send + Sync {
    fn load(&self, index: usize) -> Result<Option<Histogram>, AmsiError>;
    fn store(&self, index: usize, truth: &Histogram) -> Result<(), AmsiError>;
}

/// In-process cache.
#[derive(Debug, Default)]
pub struct MemoryTruthCache {
    entries: Mutex<BTreeMap<usize, Histogram>>,
}

impl MemoryTruthCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TruthCache for MemoryTruthCache {
    fn load(&self, index: usize) -> Result<Option<Histogram>, AmsiError> {
        let entries = self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(entries.get(&index).cloned())
    }

    fn store(&self, index: usize, truth: &Histogram) -> Result<(), AmsiError> {
        let mut entries = self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        entries.insert(index, truth.clone());
        Ok(())
    }
}

/// Cache of JSON files `truth_{index}.json` in one directory.
#[derive(Debug, Clone)]
pub struct DirectoryTruthCache {
    root: PathBuf,
}

impl DirectoryTruthCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path(&self, index: usize) -> PathBuf {
        self.root.join(format!("truth_{index}.json"))
    }
}

impl TruthCache for DirectoryTruthCache {
    fn load(&self, index: usize) -> Result<Option<Histogram>, AmsiError> {
        let path = self.path(index);
        if !path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&path).map_err(|err| {
            AmsiError::Serde(ErrorInfo::new("truth-read", err.to_string()).with_context("path", path.display()))
        })?;
        serde_json::from_str(&contents).map(Some).map_err(|err| {
            AmsiError::Serde(ErrorInfo::new("truth-parse", err.to_string()).with_context("path", path.display()))
        })
    }

    fn store(&self, index: usize, truth: &Histogram) -> Result<(), AmsiError> {
        fs::create_dir_all(&self.root).map_err(|err| {
            AmsiError::Serde(
                ErrorInfo::new("truth-mkdir", err.to_string()).with_context("path", self.root.display()),
            )
        })?;
        let path = self.path(index);
        let json = serde_json::to_vec(truth)
            .map_err(|err| AmsiError::Serde(ErrorInfo::new("truth-serialize", err.to_string())))?;
        fs::write(&path, json).map_err(|err| {
            AmsiError::Serde(ErrorInfo::new("truth-write", err.to_string()).with_context("path", path.display()))
        })
    }
}

/// Everything the driver needs besides the configuration.
pub struct EvalContext<'a> {
    /// Prior over the full parameter vector.
    pub prior: &'a dyn Prior,
    /// Estimator evaluated per mask.
    pub estimator: &'a Estimator,
    /// Tractable log-likelihood used to sample the ground truth, if any.
    pub likelihood: Option<&'a dyn DensityModel>,
    /// Masks to evaluate, in order.
    pub masks: Vec<Mask>,
    pub truth_cache: Option<&'a dyn TruthCache>,
    pub cancel: Option<CancelToken>,
}

impl<'a> EvalContext<'a> {
    /// Context evaluating every mask the estimator supports.
    pub fn new(prior: &'a dyn Prior, estimator: &'a Estimator) -> Self {
        Self {
            prior,
            estimator,
            likelihood: None,
            masks: estimator.masks(prior.dim()),
            truth_cache: None,
            cancel: None,
        }
    }

    /// Restricts the run to `masks`. A single estimator only ever answers the
    /// full mask, so the list is ignored for it.
    pub fn with_masks(mut self, masks: Vec<Mask>) -> Result<Self, AmsiError> {
        for mask in &masks {
            mask.validate(self.prior.dim())?;
        }
        if matches!(self.estimator, Estimator::MaskedEnsemble(_)) {
            self.masks = masks;
        }
        Ok(self)
    }

    pub fn with_likelihood(mut self, likelihood: &'a dyn DensityModel) -> Self {
        self.likelihood = Some(likelihood);
        self
    }

    pub fn with_truth_cache(mut self, cache: &'a dyn TruthCache) -> Self {
        self.truth_cache = Some(cache);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelToken::is_cancelled)
    }
}
