#![deny(missing_docs)]

//! Discretized probability mass over bounded parameter spaces.
//!
//! A [`BinGrid`] maps parameter vectors onto bin coordinates, a [`Reducer`]
//! folds arbitrarily long sample streams into a [`Histogram`] in bounded
//! groups, and the marginal and divergence helpers compare histograms over
//! matching or overlapping dimension subsets. Histograms are dense arrays or
//! sparse coordinate lists depending on their bin count; every operation in
//! this crate behaves the same for both.

/// Sample batches exchanged between samplers and reducers.
pub mod batch;
/// Entropy, KL, transport distance and highest-density coverage.
pub mod divergence;
/// Regular bin grids over bounded boxes.
pub mod grid;
/// Dense and sparse histogram storage.
pub mod histogram;
/// Marginalization, restriction and normalization.
pub mod marginal;
/// Group-wise streaming reduction of samples into histograms.
pub mod reduce;

pub use batch::SampleBatch;
pub use divergence::{
    align_common, coverage, entropy, kl_divergence, quantile_at, w_distance, TransportOptions,
};
pub use grid::BinGrid;
pub use histogram::{Histogram, DEFAULT_DENSE_LIMIT};
pub use marginal::{marginalize, normalize, pairs, restrict};
pub use reduce::{reduce_histogram, CancelToken, ReduceOptions, ReduceOutcome, Reducer};
