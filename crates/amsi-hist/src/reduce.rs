use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use amsi_core::errors::{AmsiError, ErrorInfo};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::batch::SampleBatch;
use crate::grid::BinGrid;
use crate::histogram::{Histogram, DEFAULT_DENSE_LIMIT};

/// Cooperative cancellation flag checked between reduction chunks.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Creates an untriggered token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation; every clone observes it.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Reduction parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReduceOptions {
    /// Number of samples mapped and folded at once.
    #[serde(default = "default_groupby")]
    pub groupby: usize,
    /// Histograms with at most this many bins are accumulated densely.
    #[serde(default = "default_dense_limit")]
    pub dense_limit: u128,
}

fn default_groupby() -> usize {
    256
}

fn default_dense_limit() -> u128 {
    DEFAULT_DENSE_LIMIT
}

impl Default for ReduceOptions {
    fn default() -> Self {
        Self {
            groupby: default_groupby(),
            dense_limit: default_dense_limit(),
        }
    }
}

/// Final or partial result of a reduction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReduceOutcome {
    /// Coalesced histogram over the reducer's grid.
    pub histogram: Histogram,
    /// Number of samples folded in.
    pub samples: u64,
    /// Number of groups folded in.
    pub chunks: u64,
    /// Whether the stream was cancelled before it was exhausted.
    pub interrupted: bool,
}

/// Folds sample batches into a histogram, `groupby` samples at a time.
///
/// Sparse accumulators receive each group as raw entries and are coalesced
/// whenever the uncoalesced tail outgrows both the group size and the
/// coalesced part, so memory stays proportional to the occupied bins plus one
/// group.
#[derive(Debug, Clone)]
pub struct Reducer {
    grid: BinGrid,
    options: ReduceOptions,
    histogram: Histogram,
    settled: usize,
    samples: u64,
    chunks: u64,
    coord: Vec<u32>,
}

impl Reducer {
    /// Creates an empty reducer over `grid`.
    pub fn new(grid: BinGrid, options: ReduceOptions) -> Result<Self, AmsiError> {
        let histogram = Histogram::zeros(grid.shape().to_vec(), options.dense_limit)?;
        Self::resume(grid, options, histogram, 0, 0)
    }

    /// Continues a reduction from a previously folded histogram.
    pub fn resume(
        grid: BinGrid,
        options: ReduceOptions,
        histogram: Histogram,
        samples: u64,
        chunks: u64,
    ) -> Result<Self, AmsiError> {
        if options.groupby == 0 {
            return Err(AmsiError::Shape(ErrorInfo::new(
                "groupby-zero",
                "groupby must be at least one sample",
            )));
        }
        if histogram.shape() != grid.shape() {
            return Err(AmsiError::Shape(
                ErrorInfo::new("reducer-shape", "histogram does not match the grid")
                    .with_context("grid", format!("{:?}", grid.shape()))
                    .with_context("histogram", format!("{:?}", histogram.shape())),
            ));
        }
        let histogram = histogram.coalesced();
        let settled = histogram.nnz();
        let coord = vec![0u32; grid.dim()];
        Ok(Self {
            grid,
            options,
            histogram,
            settled,
            samples,
            chunks,
            coord,
        })
    }

    /// Grid the samples are binned on.
    pub fn grid(&self) -> &BinGrid {
        &self.grid
    }

    /// Histogram folded so far (possibly uncoalesced).
    pub fn histogram(&self) -> &Histogram {
        &self.histogram
    }

    /// Samples folded so far.
    pub fn samples(&self) -> u64 {
        self.samples
    }

    /// Groups folded so far.
    pub fn chunks(&self) -> u64 {
        self.chunks
    }

    /// Folds every row of `batch`, one group of `groupby` rows at a time.
    pub fn accumulate(&mut self, batch: &SampleBatch) -> Result<(), AmsiError> {
        self.grid.check_len(batch.dim())?;
        let groupby = self.options.groupby;
        let mut start = 0;
        while start < batch.len() {
            let end = (start + groupby).min(batch.len());
            self.fold_group(batch, start, end)?;
            start = end;
        }
        Ok(())
    }

    fn fold_group(&mut self, batch: &SampleBatch, start: usize, end: usize) -> Result<(), AmsiError> {
        if let Some(weights) = batch.weights() {
            if let Some(bad) = weights[start..end].iter().find(|w| !(w.is_finite() && **w >= 0.0)) {
                return Err(AmsiError::Sampling(
                    ErrorInfo::new("weight-invalid", "sample weights must be finite and non-negative")
                        .with_context("weight", bad),
                ));
            }
        }
        for index in start..end {
            self.grid.bin_into(batch.row(index), &mut self.coord);
            self.histogram.push_unchecked(&self.coord, batch.weight(index));
        }
        self.samples += (end - start) as u64;
        self.chunks += 1;

        let stored = self.histogram.pending_len();
        if stored > 0 && stored - self.settled > self.options.groupby.max(self.settled) {
            self.histogram.coalesce();
            self.settled = self.histogram.nnz();
        }
        Ok(())
    }

    /// Folds batches from `stream` until it ends or `cancel` fires.
    ///
    /// Cancellation is checked before each batch is pulled, so the histogram
    /// always reflects whole batches. Returns `false` when interrupted.
    pub fn fold_stream<I>(&mut self, stream: I, cancel: Option<&CancelToken>) -> Result<bool, AmsiError>
    where
        I: IntoIterator<Item = Result<SampleBatch, AmsiError>>,
    {
        let mut stream = stream.into_iter();
        loop {
            if cancel.is_some_and(CancelToken::is_cancelled) {
                debug!(samples = self.samples, chunks = self.chunks, "reduction cancelled");
                return Ok(false);
            }
            let Some(batch) = stream.next() else {
                return Ok(true);
            };
            self.accumulate(&batch?)?;
            debug!(samples = self.samples, nnz_bound = self.histogram.pending_len(), "chunk folded");
        }
    }

    /// Coalesced copy of the current state.
    pub fn snapshot(&self, interrupted: bool) -> ReduceOutcome {
        ReduceOutcome {
            histogram: self.histogram.canonical().into_owned(),
            samples: self.samples,
            chunks: self.chunks,
            interrupted,
        }
    }

    /// Consumes the reducer, returning the coalesced histogram.
    pub fn finish(self) -> ReduceOutcome {
        ReduceOutcome {
            histogram: self.histogram.coalesced(),
            samples: self.samples,
            chunks: self.chunks,
            interrupted: false,
        }
    }
}

/// Reduces a whole stream of batches over `grid`.
pub fn reduce_histogram<I>(
    stream: I,
    grid: &BinGrid,
    options: &ReduceOptions,
    cancel: Option<&CancelToken>,
) -> Result<ReduceOutcome, AmsiError>
where
    I: IntoIterator<Item = Result<SampleBatch, AmsiError>>,
{
    let mut reducer = Reducer::new(grid.clone(), options.clone())?;
    let completed = reducer.fold_stream(stream, cancel)?;
    let mut outcome = reducer.finish();
    outcome.interrupted = !completed;
    Ok(outcome)
}
