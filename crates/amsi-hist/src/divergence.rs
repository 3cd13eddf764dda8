use amsi_core::errors::{AmsiError, ErrorInfo};
use amsi_core::Mask;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::histogram::Histogram;
use crate::marginal::restrict;

/// Shannon entropy `-sum p ln p` over the non-zero bins of a normalized
/// histogram. Empty bins contribute nothing.
pub fn entropy(hist: &Histogram) -> f64 {
    let mut acc = 0.0;
    hist.for_each_nonzero(|_, p| {
        if p > 0.0 {
            acc -= p * p.ln();
        }
    });
    acc
}

/// Kullback-Leibler divergence `KL(p || q) = sum p ln(p / q)`.
///
/// Returns `+inf` when `p` puts mass on a bin where `q` has none; callers
/// treat non-finite results as incomparable.
pub fn kl_divergence(p: &Histogram, q: &Histogram) -> Result<f64, AmsiError> {
    p.check_same_shape(q)?;
    let q = q.canonical();
    let mut acc = 0.0;
    let mut unsupported = false;
    p.for_each_nonzero(|coord, pv| {
        let qv = q.get_unchecked(coord);
        if qv > 0.0 {
            acc += pv * (pv / qv).ln();
        } else {
            unsupported = true;
        }
    });
    Ok(if unsupported { f64::INFINITY } else { acc })
}

/// Mass thresholds delimiting highest-density regions.
///
/// Bin masses are sorted in decreasing order and accumulated; for every
/// fraction `f` the result holds the mass of the first bin at which the
/// cumulative sum reaches `f` times the total.
pub fn coverage(hist: &Histogram, percentiles: &[f64]) -> Vec<f64> {
    let mut masses = hist.nonzero_values();
    masses.sort_by(|a, b| b.total_cmp(a));
    let has_empty_bins = hist.numel() > masses.len() as u128;

    let mut cdf = Vec::with_capacity(masses.len());
    let mut running = 0.0;
    for &mass in &masses {
        running += mass;
        cdf.push(running);
    }

    percentiles
        .iter()
        .map(|&fraction| {
            let target = fraction * running;
            let index = cdf.partition_point(|&c| c < target);
            match masses.get(index) {
                Some(&mass) => mass,
                None if has_empty_bins => 0.0,
                None => masses.last().copied().unwrap_or(0.0),
            }
        })
        .collect()
}

/// Total mass of the bins at least as dense as the bin at `coord`.
///
/// For a calibrated posterior this is uniformly distributed when `coord` is
/// the bin of the true parameter.
pub fn quantile_at(hist: &Histogram, coord: &[u32]) -> Result<f64, AmsiError> {
    let level = hist.get(coord)?;
    let mut acc = 0.0;
    hist.for_each_nonzero(|_, mass| {
        if mass >= level {
            acc += mass;
        }
    });
    Ok(acc)
}

/// Restricts two histograms, defined over the dimensions selected by their
/// masks, to the dimensions both masks share. `None` when they share none.
pub fn align_common(
    p: &Histogram,
    p_mask: &Mask,
    q: &Histogram,
    q_mask: &Mask,
) -> Result<Option<(Histogram, Histogram)>, AmsiError> {
    for (hist, mask) in [(p, p_mask), (q, q_mask)] {
        if hist.rank() != mask.count() {
            return Err(AmsiError::Mask(
                ErrorInfo::new("mask-rank", "histogram rank differs from selected dimensions")
                    .with_context("mask", mask.label())
                    .with_context("rank", hist.rank()),
            ));
        }
    }
    let Some(common) = p_mask.intersect(q_mask) else {
        return Ok(None);
    };
    let p = restrict(p, &p_mask.positions_of(&common))?;
    let q = restrict(q, &q_mask.positions_of(&common))?;
    Ok(Some((p, q)))
}

/// Controls for the transport distance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportOptions {
    /// Largest bin count for which the distance is computed.
    #[serde(default = "default_wd_limit")]
    pub limit: u128,
    /// Entropic regularization, in bin-width units of the ground cost.
    #[serde(default = "default_reg")]
    pub reg: f64,
    /// Maximum number of Sinkhorn sweeps, over all annealing stages.
    #[serde(default = "default_max_iter")]
    pub max_iter: usize,
    /// Tolerance on the L1 marginal violation.
    #[serde(default = "default_tol")]
    pub tol: f64,
}

fn default_wd_limit() -> u128 {
    10_000
}

fn default_reg() -> f64 {
    0.05
}

fn default_max_iter() -> usize {
    1_000
}

fn default_tol() -> f64 {
    1e-6
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            limit: default_wd_limit(),
            reg: default_reg(),
            max_iter: default_max_iter(),
            tol: default_tol(),
        }
    }
}

/// Wasserstein-1 distance between two histograms of the same shape, with the
/// Euclidean distance between bin coordinates as ground cost.
///
/// One-dimensional problems (at most one axis longer than one bin) are solved
/// exactly through cumulative sums; others with log-domain Sinkhorn
/// iterations. Histograms with more than `options.limit` bins, and plans that
/// do not converge within `options.max_iter` sweeps, are refused with
/// [`AmsiError::SizeLimit`] so the caller can record the value as absent.
pub fn w_distance(p: &Histogram, q: &Histogram, options: &TransportOptions) -> Result<f64, AmsiError> {
    p.check_same_shape(q)?;
    if p.numel() > options.limit {
        return Err(AmsiError::SizeLimit(
            ErrorInfo::new("wd-limit", "too many bins for the transport distance")
                .with_context("numel", p.numel())
                .with_context("limit", options.limit),
        ));
    }
    let (p_total, q_total) = (p.total(), q.total());
    for total in [p_total, q_total] {
        if !(total.is_finite() && total > 0.0) {
            return Err(AmsiError::Degenerate(
                ErrorInfo::new("zero-mass", "transport needs positive finite mass")
                    .with_context("total", total),
            ));
        }
    }

    let long_axes: Vec<usize> = (0..p.rank()).filter(|&axis| p.shape()[axis] > 1).collect();
    if long_axes.len() <= 1 {
        let axis = long_axes.first().copied();
        let p_line = line_masses(p, axis, p_total);
        let q_line = line_masses(q, axis, q_total);
        let mut cum = 0.0;
        let mut acc = 0.0;
        for (a, b) in p_line.iter().zip(q_line.iter()) {
            cum += a - b;
            acc += cum.abs();
        }
        return Ok(acc);
    }

    let (xs, a) = support(p, p_total);
    let (ys, b) = support(q, q_total);
    sinkhorn(&xs, &a, &ys, &b, p.shape(), options)
}

/// Masses along the single long axis, divided by `total`.
fn line_masses(hist: &Histogram, axis: Option<usize>, total: f64) -> Vec<f64> {
    let len = axis.map_or(1, |axis| hist.shape()[axis]);
    let mut out = vec![0.0; len];
    hist.for_each_nonzero(|coord, mass| {
        let index = axis.map_or(0, |axis| coord[axis] as usize);
        out[index] += mass / total;
    });
    out
}

fn support(hist: &Histogram, total: f64) -> (Vec<u32>, Vec<f64>) {
    let mut coords = Vec::new();
    let mut masses = Vec::new();
    hist.for_each_nonzero(|coord, mass| {
        coords.extend_from_slice(coord);
        masses.push(mass / total);
    });
    (coords, masses)
}

/// Euclidean lengths of every coordinate offset within a grid, indexed by
/// the per-axis absolute differences.
struct CostTable {
    strides: Vec<usize>,
    lengths: Vec<f64>,
}

impl CostTable {
    fn new(shape: &[usize]) -> Self {
        let mut strides = vec![1; shape.len()];
        for axis in (0..shape.len().saturating_sub(1)).rev() {
            strides[axis] = strides[axis + 1] * shape[axis + 1];
        }
        let numel: usize = shape.iter().product();
        let lengths = (0..numel)
            .map(|flat| {
                shape
                    .iter()
                    .zip(&strides)
                    .map(|(&len, &stride)| {
                        let d = ((flat / stride) % len) as f64;
                        d * d
                    })
                    .sum::<f64>()
                    .sqrt()
            })
            .collect();
        Self { strides, lengths }
    }

    fn between(&self, x: &[u32], y: &[u32]) -> f64 {
        let flat: usize = x
            .iter()
            .zip(y)
            .zip(&self.strides)
            .map(|((&x, &y), &stride)| x.abs_diff(y) as usize * stride)
            .sum();
        self.lengths[flat]
    }

    fn diameter(&self) -> f64 {
        self.lengths.last().copied().unwrap_or(0.0)
    }
}

/// Factor applied to the regularization between annealing stages.
const EPS_SCALING: f64 = 0.5;
/// Row violation at which an intermediate stage hands over to the next.
const STAGE_TOL: f64 = 1e-3;

/// Log-domain Sinkhorn with epsilon scaling.
///
/// The regularization starts at the grid diameter and halves down to
/// `options.reg`, each stage warm-started from the previous potentials.
/// `options.max_iter` bounds the sweeps over all stages. A plan whose row
/// violation is still above `options.tol` is refused with
/// [`AmsiError::SizeLimit`].
fn sinkhorn(
    xs: &[u32],
    a: &[f64],
    ys: &[u32],
    b: &[f64],
    shape: &[usize],
    options: &TransportOptions,
) -> Result<f64, AmsiError> {
    let rank = shape.len();
    let table = CostTable::new(shape);
    let cost = |i: usize, j: usize| table.between(&xs[i * rank..(i + 1) * rank], &ys[j * rank..(j + 1) * rank]);
    let log_a: Vec<f64> = a.iter().map(|v| v.ln()).collect();
    let log_b: Vec<f64> = b.iter().map(|v| v.ln()).collect();
    let mut f = vec![0.0; a.len()];
    let mut g = vec![0.0; b.len()];
    let mut f_next = vec![0.0; a.len()];
    let mut terms = Vec::with_capacity(a.len().max(b.len()));

    let mut eps = table.diameter().max(options.reg);
    let mut sweeps = 0;
    let mut violation = f64::INFINITY;
    let converged = loop {
        let last = eps <= options.reg;
        let stage_tol = if last { options.tol } else { options.tol.max(STAGE_TOL) };
        let mut stage_sweep = 0;
        let mut settled = false;
        while sweeps < options.max_iter {
            // Columns are exact after a g update, so the f update measures
            // how far the rows are from their marginals.
            violation = 0.0;
            for (i, next) in f_next.iter_mut().enumerate() {
                terms.clear();
                terms.extend((0..b.len()).map(|j| (g[j] - cost(i, j)) / eps + log_b[j]));
                *next = -eps * log_sum_exp(&terms);
                violation += (a[i] * ((f[i] - *next) / eps).exp() - a[i]).abs();
            }
            if stage_sweep > 0 && violation < stage_tol {
                settled = true;
                break;
            }
            std::mem::swap(&mut f, &mut f_next);
            for (j, gj) in g.iter_mut().enumerate() {
                terms.clear();
                terms.extend((0..a.len()).map(|i| (f[i] - cost(i, j)) / eps + log_a[i]));
                *gj = -eps * log_sum_exp(&terms);
            }
            sweeps += 1;
            stage_sweep += 1;
        }
        if last || !settled {
            break last && settled;
        }
        eps = (eps * EPS_SCALING).max(options.reg);
    };

    if !converged {
        return Err(AmsiError::SizeLimit(
            ErrorInfo::new("wd-no-convergence", "transport plan did not converge")
                .with_context("sweeps", sweeps)
                .with_context("violation", violation)
                .with_context("reg", eps)
                .with_hint("raise wasserstein.max_iter or wasserstein.reg"),
        ));
    }
    debug!(sweeps, violation, "sinkhorn converged");

    let mut total = 0.0;
    for i in 0..a.len() {
        for j in 0..b.len() {
            let c = cost(i, j);
            total += ((f[i] + g[j] - c) / eps + log_a[i] + log_b[j]).exp() * c;
        }
    }
    Ok(total)
}

fn log_sum_exp(values: &[f64]) -> f64 {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    max + values.iter().map(|v| (v - max).exp()).sum::<f64>().ln()
}
