use amsi_core::errors::{AmsiError, ErrorInfo};
use amsi_core::rng::RngHandle;
use amsi_hist::SampleBatch;
use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::{Acceptance, ChainRun, SamplerConfig};
use crate::determinism::{init_rng, step_rng};
use crate::model::{evaluate_checked, DensityModel, Prior};

/// A chain step whose model output was non-finite for every row. The step emitted
/// nothing and the chains kept their previous states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NonFiniteBatch {
    /// Step index (or grid batch index in grid mode).
    pub step: u64,
    /// Number of rows in the skipped batch.
    pub batch_len: usize,
}

/// Everything needed to continue a chain from a step boundary.
///
/// The RNG is not part of the state: each step reseeds from its index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainState {
    /// Steps completed so far, burn-in included.
    pub step: u64,
    /// Current position of every parallel chain, row-major.
    pub thetas: Vec<f64>,
    /// Log target at `thetas`; `None` stands for zero density.
    #[serde(with = "log_values")]
    pub log_probs: Vec<f64>,
    /// Accepted proposals so far.
    pub accepted: u64,
    /// Proposals made so far.
    pub proposed: u64,
}

/// JSON has no infinities, so zero densities travel as `null`.
mod log_values {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(values: &[f64], serializer: S) -> Result<S::Ok, S::Error> {
        values
            .iter()
            .map(|v| v.is_finite().then_some(*v))
            .collect::<Vec<_>>()
            .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<f64>, D::Error> {
        let values = Vec::<Option<f64>>::deserialize(deserializer)?;
        Ok(values.into_iter().map(|v| v.unwrap_or(f64::NEG_INFINITY)).collect())
    }
}

/// Lazy, finite sequence of sample chunks.
///
/// Chunk `k` holds the states of steps `start + k * groupby` up to the next
/// boundary (or `stop`), for every parallel chain. Burn-in steps run inside
/// the first call to `next` and are never emitted.
pub struct Chain<'a> {
    model: &'a dyn DensityModel,
    prior: &'a dyn Prior,
    observation: &'a [f64],
    config: SamplerConfig,
    run: ChainRun,
    seed: u64,
    state: Option<ChainState>,
    warnings: Vec<NonFiniteBatch>,
    failed: bool,
}

impl<'a> Chain<'a> {
    pub(crate) fn new(
        model: &'a dyn DensityModel,
        prior: &'a dyn Prior,
        observation: &'a [f64],
        config: SamplerConfig,
        run: ChainRun,
        seed: u64,
        state: Option<ChainState>,
    ) -> Result<Self, AmsiError> {
        config.validate()?;
        run.validate()?;
        if let Some(state) = &state {
            let rows = config.batch_size;
            if state.thetas.len() != rows * prior.dim() || state.log_probs.len() != rows {
                return Err(AmsiError::Sampling(
                    ErrorInfo::new("chain-state", "state does not match the sampler")
                        .with_context("batch_size", rows)
                        .with_context("dim", prior.dim())
                        .with_context("thetas", state.thetas.len()),
                ));
            }
        }
        Ok(Self {
            model,
            prior,
            observation,
            config,
            run,
            seed,
            state,
            warnings: Vec::new(),
            failed: false,
        })
    }

    /// State at the last chunk boundary, once the chain is initialised.
    pub fn state(&self) -> Option<&ChainState> {
        self.state.as_ref()
    }

    /// Steps skipped since this `Chain` value was created.
    pub fn warnings(&self) -> &[NonFiniteBatch] {
        &self.warnings
    }

    /// Whether every step up to `stop` has been generated.
    pub fn is_finished(&self) -> bool {
        self.state.as_ref().is_some_and(|s| s.step >= self.run.stop)
    }

    fn dim(&self) -> usize {
        self.prior.dim()
    }

    /// Log target for every row, plus whether the collaborator returned at
    /// least one finite density.
    ///
    /// Usability is judged on the model output alone. A row outside the prior
    /// support gets `-inf` afterwards and is an ordinary rejection.
    fn log_target(&self, thetas: &SampleBatch) -> Result<(Vec<f64>, bool), AmsiError> {
        let mut values = evaluate_checked(self.model, thetas, self.observation)?;
        let usable = values.iter().any(|v| v.is_finite());
        if self.config.acceptance == Acceptance::Metropolis {
            for (value, row) in values.iter_mut().zip(thetas.rows()) {
                *value += self.prior.log_prob(row);
            }
        }
        for value in &mut values {
            if value.is_nan() {
                *value = f64::NEG_INFINITY;
            }
        }
        Ok((values, usable))
    }

    fn initialise(&self) -> Result<ChainState, AmsiError> {
        let mut rng = init_rng(self.seed);
        let thetas = self.prior.sample(self.config.batch_size, &mut rng)?;
        let log_probs = match self.config.acceptance {
            Acceptance::Metropolis => self.log_target(&thetas)?.0,
            Acceptance::Importance => vec![f64::NEG_INFINITY; thetas.len()],
        };
        Ok(ChainState {
            step: 0,
            thetas: thetas.values().to_vec(),
            log_probs,
            accepted: 0,
            proposed: 0,
        })
    }

    fn skip(&mut self, step: u64, batch_len: usize) {
        warn!(step, batch_len, "non-finite density batch skipped");
        self.warnings.push(NonFiniteBatch { step, batch_len });
    }

    /// Runs one Metropolis step on every chain. Returns whether the step
    /// produced usable density values; rejected chains keep their state and
    /// are emitted again.
    fn metropolis_step(&self, state: &mut ChainState, rng: &mut RngHandle) -> Result<bool, AmsiError> {
        let dim = self.dim();
        let (low, high) = self.prior.bounds();
        let scales: Vec<f64> = low
            .iter()
            .zip(high)
            .map(|(lo, hi)| self.config.sigma * (hi - lo))
            .collect();
        let mut proposals = state.thetas.clone();
        for row in proposals.chunks_mut(dim) {
            for (value, scale) in row.iter_mut().zip(&scales) {
                let noise: f64 = rng.sample(StandardNormal);
                *value += scale * noise;
            }
        }
        let proposals = SampleBatch::new(dim, proposals)?;
        let (log_probs, usable) = self.log_target(&proposals)?;
        state.proposed += log_probs.len() as u64;
        if !usable {
            return Ok(false);
        }
        for (chain, proposed) in log_probs.iter().enumerate() {
            let u: f64 = rng.gen();
            if u.ln() < proposed - state.log_probs[chain] {
                state.thetas[chain * dim..(chain + 1) * dim].copy_from_slice(proposals.row(chain));
                state.log_probs[chain] = *proposed;
                state.accepted += 1;
            }
        }
        Ok(true)
    }

    /// Draws fresh prior proposals and weights them by the density.
    fn importance_step(&self, state: &mut ChainState, rng: &mut RngHandle) -> Result<bool, AmsiError> {
        let proposals = self.prior.sample(self.config.batch_size, rng)?;
        let (log_weights, usable) = self.log_target(&proposals)?;
        state.proposed += log_weights.len() as u64;
        if !usable {
            return Ok(false);
        }
        state.accepted += log_weights.iter().filter(|v| v.is_finite()).count() as u64;
        state.thetas.copy_from_slice(proposals.values());
        state.log_probs = log_weights;
        Ok(true)
    }

    fn next_chunk(&mut self) -> Result<Option<SampleBatch>, AmsiError> {
        let mut state = match self.state.take() {
            Some(state) => state,
            None => self.initialise()?,
        };
        if state.step >= self.run.stop {
            self.state = Some(state);
            return Ok(None);
        }

        let first = state.step.max(self.run.start);
        let offset = (first - self.run.start) / self.run.groupby as u64;
        let end = (self.run.start + (offset + 1) * self.run.groupby as u64).min(self.run.stop);

        let weighted = self.config.acceptance == Acceptance::Importance;
        let mut values = Vec::new();
        let mut weights = Vec::new();
        while state.step < end {
            let step = state.step;
            let mut rng = step_rng(self.seed, step + 1);
            let usable = match self.config.acceptance {
                Acceptance::Metropolis => self.metropolis_step(&mut state, &mut rng)?,
                Acceptance::Importance => self.importance_step(&mut state, &mut rng)?,
            };
            state.step += 1;
            if !usable {
                self.skip(step, self.config.batch_size);
                continue;
            }
            if step < self.run.start {
                continue;
            }
            values.extend_from_slice(&state.thetas);
            if weighted {
                weights.extend(state.log_probs.iter().map(|v| importance_weight(*v)));
            }
        }
        let exhausted = state.step >= self.run.stop;
        self.state = Some(state);
        if values.is_empty() && exhausted {
            return Ok(None);
        }

        let chunk = SampleBatch::new(self.dim(), values)?;
        if weighted {
            return chunk.with_weights(weights).map(Some);
        }
        Ok(Some(chunk))
    }
}

/// `exp(log_weight)` clamped into the finite range; zero density stays zero.
fn importance_weight(log_weight: f64) -> f64 {
    if log_weight.is_finite() {
        log_weight.min(f64::MAX.ln()).exp()
    } else {
        0.0
    }
}

impl Iterator for Chain<'_> {
    type Item = Result<SampleBatch, AmsiError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.next_chunk() {
            Ok(chunk) => chunk.map(Ok),
            Err(err) => {
                self.failed = true;
                Some(Err(err))
            }
        }
    }
}
