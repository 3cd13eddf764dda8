use std::path::PathBuf;

use amsi_core::errors::{AmsiError, ErrorInfo};
use amsi_hist::{BinGrid, CancelToken, ReduceOptions, ReduceOutcome, Reducer};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::chain::{Chain, ChainState, NonFiniteBatch};
use crate::checkpoint::{checkpoint_path, enforce_retention, existing_checkpoints, ReductionCheckpoint};
use crate::config::{ChainRun, CheckpointConfig, SamplerConfig};
use crate::grid::{evaluate_grid, GridOutcome};
use crate::model::{DensityModel, Prior};

/// Diagnostics of a chain reduction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainReport {
    /// Steps completed, burn-in included.
    pub steps: u64,
    /// Accepted proposals (finite-weight proposals in importance mode).
    pub accepted: u64,
    /// Proposals made.
    pub proposed: u64,
    /// Steps skipped because the model returned no finite density.
    pub warnings: Vec<NonFiniteBatch>,
    /// Checkpoints still on disk, oldest first.
    pub checkpoints: Vec<PathBuf>,
}

impl ChainReport {
    /// Fraction of accepted proposals.
    pub fn acceptance_rate(&self) -> f64 {
        if self.proposed == 0 {
            0.0
        } else {
            self.accepted as f64 / self.proposed as f64
        }
    }
}

/// Histogram and diagnostics of a chain reduction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainOutcome {
    /// Folded histogram; partial when `reduced.interrupted` is set.
    pub reduced: ReduceOutcome,
    /// Chain diagnostics.
    pub report: ChainReport,
}

/// Samples the posterior `r(theta, observation) * prior(theta)`.
///
/// The sampler only borrows its collaborators; every run parameter lives in
/// the [`SamplerConfig`] passed at construction.
pub struct Sampler<'a> {
    model: &'a dyn DensityModel,
    prior: &'a dyn Prior,
    observation: &'a [f64],
    config: SamplerConfig,
    seed: u64,
}

impl<'a> Sampler<'a> {
    /// Creates a sampler with seed zero.
    pub fn new(
        model: &'a dyn DensityModel,
        prior: &'a dyn Prior,
        observation: &'a [f64],
        config: SamplerConfig,
    ) -> Result<Self, AmsiError> {
        config.validate()?;
        Ok(Self {
            model,
            prior,
            observation,
            config,
            seed: 0,
        })
    }

    /// Replaces the chain seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Chain seed.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Sampler configuration.
    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    /// Grid with `bins` bins per dimension over the prior support.
    pub fn grid(&self, bins: usize) -> Result<BinGrid, AmsiError> {
        let (low, high) = self.prior.bounds();
        BinGrid::new(low.to_vec(), high.to_vec(), bins)
    }

    /// Grid mode: evaluates the posterior mass of every cell directly.
    ///
    /// Fails with `SizeLimit` when the grid has more than `limit` cells.
    pub fn histogram(&self, bins: usize, limit: u128) -> Result<GridOutcome, AmsiError> {
        let grid = self.grid(bins)?;
        info!(numel = %grid.numel(), mode = "grid", "sampling histogram");
        evaluate_grid(
            self.model,
            self.prior,
            self.observation,
            &grid,
            self.config.batch_size,
            limit,
        )
    }

    /// Chain mode: lazy chunks of samples for `run`.
    pub fn chain(&self, run: &ChainRun) -> Result<Chain<'a>, AmsiError> {
        self.chain_from(run, None)
    }

    /// Continues a chain from a saved state.
    pub fn resume_chain(&self, run: &ChainRun, state: ChainState) -> Result<Chain<'a>, AmsiError> {
        self.chain_from(run, Some(state))
    }

    fn chain_from(&self, run: &ChainRun, state: Option<ChainState>) -> Result<Chain<'a>, AmsiError> {
        Chain::new(
            self.model,
            self.prior,
            self.observation,
            self.config.clone(),
            run.clone(),
            self.seed,
            state,
        )
    }

    /// Chain mode folded into a histogram over `grid`, chunk by chunk.
    ///
    /// Cancellation is honoured between chunks. When checkpointing is enabled
    /// a checkpoint is written every `interval` chunks and on cancellation.
    pub fn reduce(
        &self,
        run: &ChainRun,
        grid: &BinGrid,
        options: &ReduceOptions,
        checkpoints: &CheckpointConfig,
        cancel: Option<&CancelToken>,
    ) -> Result<ChainOutcome, AmsiError> {
        self.check_grid(grid)?;
        let chain = self.chain(run)?;
        let reducer = Reducer::new(grid.clone(), options.clone())?;
        info!(numel = %grid.numel(), mode = "chain", start = run.start, stop = run.stop, "sampling histogram");
        self.drive(chain, reducer, run, Vec::new(), checkpoints, cancel)
    }

    /// Continues a checkpointed reduction to the end of its run.
    pub fn resume(
        &self,
        checkpoint: ReductionCheckpoint,
        options: &ReduceOptions,
        checkpoints: &CheckpointConfig,
        cancel: Option<&CancelToken>,
    ) -> Result<ChainOutcome, AmsiError> {
        checkpoint.check_compatible(self.seed, &self.config)?;
        self.check_grid(&checkpoint.grid)?;
        let ReductionCheckpoint {
            run,
            grid,
            state,
            histogram,
            samples,
            chunks,
            warnings,
            ..
        } = checkpoint;
        info!(step = state.step, stop = run.stop, "resuming chain reduction");
        let chain = self.resume_chain(&run, state)?;
        let reducer = Reducer::resume(grid, options.clone(), histogram, samples, chunks)?;
        self.drive(chain, reducer, &run, warnings, checkpoints, cancel)
    }

    fn check_grid(&self, grid: &BinGrid) -> Result<(), AmsiError> {
        if grid.dim() != self.prior.dim() {
            return Err(AmsiError::Shape(
                ErrorInfo::new("grid-rank", "grid rank differs from the prior dimension")
                    .with_context("grid", grid.dim())
                    .with_context("prior", self.prior.dim()),
            ));
        }
        Ok(())
    }

    fn drive(
        &self,
        mut chain: Chain<'a>,
        mut reducer: Reducer,
        run: &ChainRun,
        mut warnings: Vec<NonFiniteBatch>,
        checkpoints: &CheckpointConfig,
        cancel: Option<&CancelToken>,
    ) -> Result<ChainOutcome, AmsiError> {
        // Checkpoints left by earlier runs count towards `max_to_keep`.
        let mut written = match checkpoints.active_directory() {
            Some(directory) => existing_checkpoints(directory)?,
            None => Vec::new(),
        };
        let mut emitted = 0usize;
        let mut interrupted = false;
        loop {
            if cancel.is_some_and(CancelToken::is_cancelled) {
                interrupted = true;
                break;
            }
            let Some(chunk) = chain.next() else {
                break;
            };
            reducer.accumulate(&chunk?)?;
            emitted += 1;
            debug!(chunk = emitted, samples = reducer.samples(), "chain chunk folded");
            if checkpoints.interval > 0 && emitted % checkpoints.interval == 0 && !chain.is_finished() {
                self.write_checkpoint(&chain, &reducer, run, &warnings, checkpoints, &mut written)?;
            }
        }
        if interrupted {
            info!(samples = reducer.samples(), "chain reduction cancelled");
            self.write_checkpoint(&chain, &reducer, run, &warnings, checkpoints, &mut written)?;
        }

        warnings.extend_from_slice(chain.warnings());
        let (steps, accepted, proposed) = chain
            .state()
            .map_or((0, 0, 0), |s| (s.step, s.accepted, s.proposed));
        let mut reduced = reducer.finish();
        reduced.interrupted = interrupted;
        Ok(ChainOutcome {
            reduced,
            report: ChainReport {
                steps,
                accepted,
                proposed,
                warnings,
                checkpoints: written,
            },
        })
    }

    fn write_checkpoint(
        &self,
        chain: &Chain<'_>,
        reducer: &Reducer,
        run: &ChainRun,
        warnings: &[NonFiniteBatch],
        checkpoints: &CheckpointConfig,
        written: &mut Vec<PathBuf>,
    ) -> Result<(), AmsiError> {
        let (Some(directory), Some(state)) = (checkpoints.active_directory(), chain.state()) else {
            return Ok(());
        };
        let snapshot = reducer.snapshot(false);
        let mut all_warnings = warnings.to_vec();
        all_warnings.extend_from_slice(chain.warnings());
        let payload = ReductionCheckpoint {
            seed: self.seed,
            config: self.config.clone(),
            run: run.clone(),
            grid: reducer.grid().clone(),
            state: state.clone(),
            histogram: snapshot.histogram,
            samples: snapshot.samples,
            chunks: snapshot.chunks,
            warnings: all_warnings,
        };
        let path = checkpoint_path(directory, state.step);
        payload.store(&path)?;
        debug!(path = %path.display(), step = state.step, "checkpoint written");
        written.retain(|kept| kept != &path);
        written.push(path);
        enforce_retention(written, checkpoints.max_to_keep)
    }
}
