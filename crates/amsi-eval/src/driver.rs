//! Per-index evaluation.

use std::ops::Range;
use std::path::Path;

use amsi_core::errors::{AmsiError, ErrorInfo};
use amsi_core::Mask;
use amsi_hist::{
    entropy, kl_divergence, normalize, quantile_at, restrict, w_distance, BinGrid, Histogram,
};
use amsi_mcmc::determinism::chain_seed;
use amsi_mcmc::{Acceptance, DensityModel, Sampler, SamplerConfig};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::composition::{Composition, CompositionBuilder};
use crate::config::EvalConfig;
use crate::consistence::{ConsistenceBuilder, ConsistenceMatrix};
use crate::context::{EvalContext, Observation};
use crate::export::{append_records, consistence_path, write_consistence, EvalManifest};
use crate::record::MeasureRecord;

/// Label of the ground-truth chain in seed derivation.
const TRUTH_LABEL: &str = "truth";

/// Everything measured at one observation index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexReport {
    pub index: usize,
    pub records: Vec<MeasureRecord>,
    pub consistence: Option<ConsistenceMatrix>,
    pub composition: Option<Composition>,
    /// Density batches skipped or zeroed because they were entirely non-finite.
    pub skipped_batches: usize,
}

/// An index whose evaluation failed; the run carried on without it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexFailure {
    pub index: usize,
    pub error: AmsiError,
}

/// Outcome of a range of indices.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RangeReport {
    pub reports: Vec<IndexReport>,
    pub failures: Vec<IndexFailure>,
    /// Whether the run stopped early on cancellation.
    pub cancelled: bool,
}

struct Posterior {
    grid: BinGrid,
    histogram: Histogram,
    skipped_batches: usize,
}

fn cancelled() -> AmsiError {
    AmsiError::Sampling(ErrorInfo::new("evaluation-cancelled", "evaluation was cancelled"))
}

/// Evaluates every mask of `ctx` for one observation.
///
/// Configuration problems (mask length, parameter count) and degenerate
/// posteriors fail the whole index. Transport distances over the size limit
/// are recorded as absent.
pub fn evaluate_index(
    ctx: &EvalContext<'_>,
    config: &EvalConfig,
    index: usize,
    observation: &Observation,
) -> Result<IndexReport, AmsiError> {
    let dim = ctx.prior.dim();
    if observation.theta.len() != dim {
        return Err(AmsiError::Shape(
            ErrorInfo::new("theta-length", "true parameters differ from the prior dimension")
                .with_context("index", index)
                .with_context("theta", observation.theta.len())
                .with_context("dim", dim),
        ));
    }
    for mask in &ctx.masks {
        mask.validate(dim)?;
    }
    info!(index, masks = ctx.masks.len(), "evaluating index");

    let truth = match (config.accuracy, ctx.likelihood) {
        (true, Some(likelihood)) => Some(ground_truth(ctx, likelihood, config, index, observation)?),
        _ => None,
    };

    let mut records = Vec::with_capacity(ctx.masks.len());
    let mut consistence = config.consistence.then(ConsistenceBuilder::default);
    let mut composition = config.composition.then(|| CompositionBuilder::new(dim));
    let mut skipped_batches = 0;

    for mask in &ctx.masks {
        let Some(model) = ctx.estimator.select(mask) else {
            debug!(index, mask = %mask, "no estimator for mask");
            continue;
        };
        let posterior = sample_posterior(ctx, model, config, index, mask, observation)?;
        skipped_batches += posterior.skipped_batches;
        let (hist, total) = normalize(&posterior.histogram)?;

        let mut record = MeasureRecord::new(index, mask.label(), total, entropy(&hist));
        if let Some(truth) = &truth {
            let target = restrict(truth, &mask.selected())?;
            record.entropy_truth = Some(entropy(&target));
            record.kl_truth = Some(kl_divergence(&target, &hist)?);
            record.wd_truth = transport(&target, &hist, config, index, mask)?;
        }
        if config.coverage {
            let coord = posterior.grid.bin_of(&mask.select(&observation.theta))?;
            record.quantile = Some(quantile_at(&hist, &coord)?);
        }
        if let Some(builder) = consistence.as_mut() {
            if !hist.is_sparse() {
                builder.insert(mask, &hist)?;
            }
        }
        if let Some(builder) = composition.as_mut() {
            if hist.rank() <= 2 {
                builder.insert(mask, hist);
            }
        }
        records.push(record);
    }

    let composition = match composition {
        Some(builder) => builder.finish()?,
        None => None,
    };
    Ok(IndexReport {
        index,
        records,
        consistence: consistence.map(ConsistenceBuilder::finish),
        composition,
        skipped_batches,
    })
}

/// Grid mode below `mcmc_limit` joint bins, chain mode above.
fn sample_posterior(
    ctx: &EvalContext<'_>,
    model: &dyn DensityModel,
    config: &EvalConfig,
    index: usize,
    mask: &Mask,
    observation: &Observation,
) -> Result<Posterior, AmsiError> {
    let label = mask.label();
    let prior = ctx.prior.marginal(mask)?;
    let seed = chain_seed(config.seed_policy.run_seed(), index as u64, &label);
    let sampler = Sampler::new(model, prior.as_ref(), &observation.x, config.sampler_config())?.with_seed(seed);
    let grid = sampler.grid(config.bins)?;
    let numel = grid.numel();
    let mcmc_limit = config.mcmc_limit as u128;

    if numel > mcmc_limit {
        info!(index, mask = %label, numel = %numel, mode = "chain", "sampling posterior");
        let checkpoints = config.checkpoint_for(&format!("{index}_{label}"));
        let outcome = sampler.reduce(
            &config.chain_run(),
            &grid,
            &config.reduce_options(),
            &checkpoints,
            ctx.cancel.as_ref(),
        )?;
        if outcome.reduced.interrupted {
            return Err(cancelled());
        }
        Ok(Posterior {
            grid,
            histogram: outcome.reduced.histogram,
            skipped_batches: outcome.report.warnings.len(),
        })
    } else {
        info!(index, mask = %label, numel = %numel, mode = "grid", "sampling posterior");
        let outcome = sampler.histogram(config.bins, mcmc_limit)?;
        Ok(Posterior {
            grid,
            histogram: outcome.histogram.with_layout(config.reduction.dense_limit as u128)?,
            skipped_batches: outcome.warnings.len(),
        })
    }
}

/// Normalized ground-truth posterior over the full parameter vector.
fn ground_truth(
    ctx: &EvalContext<'_>,
    likelihood: &dyn DensityModel,
    config: &EvalConfig,
    index: usize,
    observation: &Observation,
) -> Result<Histogram, AmsiError> {
    if let Some(cache) = ctx.truth_cache {
        if let Some(truth) = cache.load(index)? {
            debug!(index, "ground truth loaded from cache");
            return normalize(&truth).map(|(hist, _)| hist);
        }
    }

    let sampler_config = SamplerConfig {
        acceptance: Acceptance::Metropolis,
        ..config.sampler_config()
    };
    let seed = chain_seed(config.seed_policy.run_seed(), index as u64, TRUTH_LABEL);
    let sampler = Sampler::new(likelihood, ctx.prior, &observation.x, sampler_config)?.with_seed(seed);
    let grid = sampler.grid(config.bins)?;
    info!(index, numel = %grid.numel(), "sampling ground truth");
    let outcome = sampler.reduce(
        &config.chain_run(),
        &grid,
        &config.reduce_options(),
        &config.checkpoint_for(&format!("{index}_{TRUTH_LABEL}")),
        ctx.cancel.as_ref(),
    )?;
    if outcome.reduced.interrupted {
        return Err(cancelled());
    }
    if let Some(cache) = ctx.truth_cache {
        cache.store(index, &outcome.reduced.histogram)?;
    }
    normalize(&outcome.reduced.histogram).map(|(hist, _)| hist)
}

/// Transport distance, or `None` above `wd_limit` joint bins or when the
/// transport plan does not converge.
fn transport(
    target: &Histogram,
    hist: &Histogram,
    config: &EvalConfig,
    index: usize,
    mask: &Mask,
) -> Result<Option<f64>, AmsiError> {
    match w_distance(target, hist, &config.transport_options()) {
        Ok(distance) => Ok(Some(distance)),
        Err(AmsiError::SizeLimit(info)) => {
            warn!(index, mask = %mask, reason = %info, "transport distance skipped");
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

/// Evaluates `range`, recording failing indices instead of aborting.
///
/// Stops early, with `cancelled` set, once the context's token fires.
pub fn evaluate_range(
    ctx: &EvalContext<'_>,
    config: &EvalConfig,
    observations: &[Observation],
    range: Range<usize>,
) -> RangeReport {
    let mut report = RangeReport::default();
    for index in range {
        if ctx.is_cancelled() {
            report.cancelled = true;
            break;
        }
        match evaluate_observation(ctx, config, observations, index) {
            Ok(index_report) => report.reports.push(index_report),
            Err(error) => {
                if ctx.is_cancelled() {
                    report.cancelled = true;
                    break;
                }
                warn!(index, error = %error, "index evaluation failed");
                report.failures.push(IndexFailure { index, error });
            }
        }
    }
    report
}

fn evaluate_observation(
    ctx: &EvalContext<'_>,
    config: &EvalConfig,
    observations: &[Observation],
    index: usize,
) -> Result<IndexReport, AmsiError> {
    let observation = observations.get(index).ok_or_else(|| {
        AmsiError::Shape(
            ErrorInfo::new("index-range", "index beyond the observation set")
                .with_context("index", index)
                .with_context("len", observations.len()),
        )
    })?;
    evaluate_index(ctx, config, index, observation)
}

/// Evaluates `range` and writes its artefacts next to `output`.
///
/// Measure records are appended to the `output` CSV after every index. The
/// consistence matrix of index `i` goes to `<output stem>_<i>.csv` and the
/// run manifest to `<output stem>.manifest.json`. Serialization failures
/// abort the run; other failures are recorded per index.
pub fn run_evaluation(
    ctx: &EvalContext<'_>,
    config: &EvalConfig,
    observations: &[Observation],
    range: Range<usize>,
    output: &Path,
) -> Result<RangeReport, AmsiError> {
    config.validate()?;
    let mut report = RangeReport::default();
    for index in range {
        let partial = evaluate_range(ctx, config, observations, index..index + 1);
        for index_report in &partial.reports {
            append_records(output, &index_report.records)?;
            if let Some(matrix) = &index_report.consistence {
                write_consistence(&consistence_path(output, index_report.index), matrix)?;
            }
        }
        if let Some(failure) = partial.failures.iter().find(|f| !f.error.is_local()) {
            return Err(failure.error.clone());
        }
        report.reports.extend(partial.reports);
        report.failures.extend(partial.failures);
        if partial.cancelled {
            report.cancelled = true;
            break;
        }
    }
    let manifest = EvalManifest::new(config, &report)?;
    manifest.store(&output.with_extension("manifest.json"))?;
    info!(
        indices = report.reports.len(),
        failures = report.failures.len(),
        cancelled = report.cancelled,
        "evaluation finished"
    );
    Ok(report)
}
