#![deny(missing_docs)]

//! Posterior samplers for ratio estimators and tractable densities.
//!
//! The target density is `r(theta, x*) * prior(theta)` where `r` is supplied by
//! an opaque [`DensityModel`]. Small joint grids are evaluated exhaustively at
//! every cell center ([`Sampler::histogram`]); large ones are explored by a
//! restartable batch of parallel chains ([`Sampler::chain`]) whose output is
//! folded into sparse histograms chunk by chunk ([`Sampler::reduce`]).

/// Serializable reduction checkpoints.
pub mod checkpoint;
/// Lazy chain generation and its state.
pub mod chain;
/// Sampler and checkpoint configuration.
pub mod config;
/// Deterministic seed derivation helpers.
pub mod determinism;
/// Exhaustive evaluation on grid cell centers.
pub mod grid;
/// Collaborator contracts and the box-uniform prior.
pub mod model;
/// Sampler facade combining a model, a prior and an observation.
pub mod sampler;

pub use chain::{Chain, ChainState, NonFiniteBatch};
pub use checkpoint::ReductionCheckpoint;
pub use config::{Acceptance, ChainRun, CheckpointConfig, SamplerConfig};
pub use grid::GridOutcome;
pub use model::{BoxUniform, DensityModel, Estimator, Prior};
pub use sampler::{ChainOutcome, ChainReport, Sampler};
