use amsi_core::errors::{AmsiError, ErrorInfo};
use amsi_hist::{BinGrid, Histogram, SampleBatch};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::chain::NonFiniteBatch;
use crate::model::{evaluate_checked, DensityModel, Prior};

/// Result of an exhaustive grid evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridOutcome {
    /// Dense, unnormalized posterior mass per cell.
    pub histogram: Histogram,
    /// Sum of all cell masses; close to one for a calibrated estimator.
    pub total_probability: f64,
    /// Batches whose density values were all non-finite (recorded as zero mass).
    pub warnings: Vec<NonFiniteBatch>,
}

struct CellBatch {
    masses: Vec<f64>,
    skipped: bool,
}

/// Evaluates `exp(log r + log prior) * cell_volume` at every cell center.
///
/// Cells are enumerated in row-major order and evaluated `batch_size` at a
/// time; batches run in parallel and are stitched back in order.
pub(crate) fn evaluate_grid(
    model: &dyn DensityModel,
    prior: &dyn Prior,
    observation: &[f64],
    grid: &BinGrid,
    batch_size: usize,
    dense_limit: u128,
) -> Result<GridOutcome, AmsiError> {
    let numel = grid.numel();
    if numel > dense_limit {
        return Err(AmsiError::SizeLimit(
            ErrorInfo::new("grid-mode-size", "grid has too many cells for exhaustive evaluation")
                .with_context("numel", numel)
                .with_context("limit", dense_limit)
                .with_hint("use the chain mode for large joint grids"),
        ));
    }
    let numel = numel as usize;
    let batch_size = batch_size.max(1);
    let volume = grid.cell_volume();
    let starts: Vec<usize> = (0..numel).step_by(batch_size).collect();

    let batches: Result<Vec<CellBatch>, AmsiError> = starts
        .par_iter()
        .map(|&start| -> Result<CellBatch, AmsiError> {
            let end = (start + batch_size).min(numel);
            let centers = cell_centers(grid, start, end)?;
            let log_ratios = evaluate_checked(model, &centers, observation)?;
            let masses: Vec<f64> = log_ratios
                .iter()
                .zip(centers.rows())
                .map(|(log_r, theta)| {
                    let mass = (log_r + prior.log_prob(theta)).exp() * volume;
                    if mass.is_finite() {
                        mass
                    } else {
                        0.0
                    }
                })
                .collect();
            let skipped = log_ratios.iter().all(|v| !v.is_finite());
            Ok(CellBatch { masses, skipped })
        })
        .collect();

    let mut values = Vec::with_capacity(numel);
    let mut warnings = Vec::new();
    for (index, batch) in batches?.into_iter().enumerate() {
        if batch.skipped {
            let batch_len = batch.masses.len();
            warn!(batch = index, batch_len, "non-finite grid batch recorded as zero mass");
            warnings.push(NonFiniteBatch {
                step: index as u64,
                batch_len,
            });
        }
        values.extend(batch.masses);
    }
    let histogram = Histogram::dense(grid.shape().to_vec(), values)?;
    let total_probability = histogram.total();
    debug!(numel, total_probability, "grid evaluated");
    Ok(GridOutcome {
        histogram,
        total_probability,
        warnings,
    })
}

/// Centers of the cells with row-major linear indices `start..end`.
fn cell_centers(grid: &BinGrid, start: usize, end: usize) -> Result<SampleBatch, AmsiError> {
    let shape = grid.shape();
    let mut coord = vec![0u32; shape.len()];
    let mut values = Vec::with_capacity((end - start) * shape.len());
    for linear in start..end {
        let mut rest = linear;
        for (axis, &bins) in shape.iter().enumerate().rev() {
            coord[axis] = (rest % bins) as u32;
            rest /= bins;
        }
        values.extend(grid.center(&coord));
    }
    SampleBatch::new(shape.len(), values)
}
