use std::collections::BTreeMap;
use std::fmt;

use amsi_core::errors::{AmsiError, ErrorInfo};
use amsi_core::mask::Mask;
use amsi_core::rng::RngHandle;
use amsi_hist::SampleBatch;
use rand::Rng;

/// Log-ratio (or log-likelihood) collaborator evaluated one batch at a time.
pub trait DensityModel: Send + Sync {
    /// Returns `log r(theta_i, observation)` for every row of `theta`.
    ///
    /// Non-finite entries are tolerated: they are treated as zero density.
    fn evaluate(&self, theta: &SampleBatch, observation: &[f64]) -> Result<Vec<f64>, AmsiError>;
}

impl<F> DensityModel for F
where
    F: Fn(&[f64], &[f64]) -> f64 + Send + Sync,
{
    fn evaluate(&self, theta: &SampleBatch, observation: &[f64]) -> Result<Vec<f64>, AmsiError> {
        Ok(theta.rows().map(|row| self(row, observation)).collect())
    }
}

/// Evaluates `model` and checks it returned one value per row.
pub(crate) fn evaluate_checked(
    model: &dyn DensityModel,
    theta: &SampleBatch,
    observation: &[f64],
) -> Result<Vec<f64>, AmsiError> {
    let values = model.evaluate(theta, observation)?;
    if values.len() != theta.len() {
        return Err(AmsiError::Sampling(
            ErrorInfo::new("batch-length", "density returned the wrong number of values")
                .with_context("expected", theta.len())
                .with_context("actual", values.len()),
        ));
    }
    Ok(values)
}

/// Prior over the parameter box.
pub trait Prior: Send + Sync {
    /// Lower and upper bounds of the support.
    fn bounds(&self) -> (&[f64], &[f64]);

    /// Number of parameters.
    fn dim(&self) -> usize {
        self.bounds().0.len()
    }

    /// Draws `n` parameter vectors.
    fn sample(&self, n: usize, rng: &mut RngHandle) -> Result<SampleBatch, AmsiError>;

    /// Log density at `theta`; `-inf` outside the support.
    fn log_prob(&self, theta: &[f64]) -> f64;

    /// Marginal prior over the dimensions selected by `mask`.
    fn marginal(&self, mask: &Mask) -> Result<Box<dyn Prior>, AmsiError>;
}

/// Uniform prior on an axis-aligned box.
#[derive(Debug, Clone, PartialEq)]
pub struct BoxUniform {
    low: Vec<f64>,
    high: Vec<f64>,
    log_density: f64,
}

impl BoxUniform {
    /// Creates the prior, rejecting empty or unbounded boxes.
    pub fn new(low: Vec<f64>, high: Vec<f64>) -> Result<Self, AmsiError> {
        if low.is_empty() || low.len() != high.len() {
            return Err(AmsiError::Shape(
                ErrorInfo::new("prior-rank", "bounds must be non-empty and of equal length")
                    .with_context("low", low.len())
                    .with_context("high", high.len()),
            ));
        }
        let mut log_volume = 0.0;
        for (dim, (&lo, &hi)) in low.iter().zip(&high).enumerate() {
            if !(lo.is_finite() && hi.is_finite() && lo < hi) {
                return Err(AmsiError::Shape(
                    ErrorInfo::new("prior-bounds", "prior support must be a finite non-empty box")
                        .with_context("dim", dim)
                        .with_context("low", lo)
                        .with_context("high", hi),
                ));
            }
            log_volume += (hi - lo).ln();
        }
        Ok(Self {
            low,
            high,
            log_density: -log_volume,
        })
    }
}

impl Prior for BoxUniform {
    fn bounds(&self) -> (&[f64], &[f64]) {
        (&self.low, &self.high)
    }

    fn sample(&self, n: usize, rng: &mut RngHandle) -> Result<SampleBatch, AmsiError> {
        let dim = self.low.len();
        let mut values = Vec::with_capacity(n * dim);
        for _ in 0..n {
            for (lo, hi) in self.low.iter().zip(&self.high) {
                values.push(lo + (hi - lo) * rng.gen::<f64>());
            }
        }
        SampleBatch::new(dim, values)
    }

    fn log_prob(&self, theta: &[f64]) -> f64 {
        let inside = theta
            .iter()
            .zip(self.low.iter().zip(&self.high))
            .all(|(v, (lo, hi))| *lo <= *v && *v <= *hi);
        if inside && theta.len() == self.low.len() {
            self.log_density
        } else {
            f64::NEG_INFINITY
        }
    }

    fn marginal(&self, mask: &Mask) -> Result<Box<dyn Prior>, AmsiError> {
        mask.validate(self.low.len())?;
        Ok(Box::new(Self::new(mask.select(&self.low), mask.select(&self.high))?))
    }
}

/// Which estimator answers a given mask.
pub enum Estimator {
    /// One estimator over the whole parameter vector; answers the full mask only.
    Single(Box<dyn DensityModel>),
    /// One estimator per mask; masks without an entry are skipped.
    MaskedEnsemble(BTreeMap<Mask, Box<dyn DensityModel>>),
}

impl Estimator {
    /// Estimator responsible for `mask`, if any.
    pub fn select(&self, mask: &Mask) -> Option<&dyn DensityModel> {
        match self {
            Estimator::Single(model) => (mask.count() == mask.len()).then_some(model.as_ref()),
            Estimator::MaskedEnsemble(models) => models.get(mask).map(|model| model.as_ref()),
        }
    }

    /// Masks this estimator can evaluate for a `dim`-parameter problem.
    pub fn masks(&self, dim: usize) -> Vec<Mask> {
        match self {
            Estimator::Single(_) => vec![Mask::full(dim)],
            Estimator::MaskedEnsemble(models) => models.keys().cloned().collect(),
        }
    }
}

impl fmt::Debug for Estimator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Estimator::Single(_) => f.write_str("Estimator::Single"),
            Estimator::MaskedEnsemble(models) => f
                .debug_tuple("Estimator::MaskedEnsemble")
                .field(&models.keys().map(Mask::label).collect::<Vec<_>>())
                .finish(),
        }
    }
}
