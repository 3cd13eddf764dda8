use amsi_core::errors::{AmsiError, ErrorInfo};
use serde::{Deserialize, Serialize};

/// Row-major block of parameter vectors with optional per-row weights.
///
/// Unweighted rows each carry unit mass when folded into a histogram.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleBatch {
    dim: usize,
    values: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    weights: Option<Vec<f64>>,
}

impl SampleBatch {
    /// Wraps `values`, whose length must be a multiple of `dim`.
    pub fn new(dim: usize, values: Vec<f64>) -> Result<Self, AmsiError> {
        if dim == 0 || values.len() % dim != 0 {
            return Err(AmsiError::Shape(
                ErrorInfo::new("batch-shape", "batch length is not a multiple of the dimension")
                    .with_context("dim", dim)
                    .with_context("len", values.len()),
            ));
        }
        Ok(Self {
            dim,
            values,
            weights: None,
        })
    }

    /// Empty batch of the given dimension.
    pub fn empty(dim: usize) -> Self {
        Self {
            dim,
            values: Vec::new(),
            weights: None,
        }
    }

    /// Builds a batch from individual rows.
    pub fn from_rows(dim: usize, rows: &[Vec<f64>]) -> Result<Self, AmsiError> {
        let mut values = Vec::with_capacity(rows.len() * dim);
        for row in rows {
            if row.len() != dim {
                return Err(AmsiError::Shape(
                    ErrorInfo::new("batch-row", "row length differs from the dimension")
                        .with_context("dim", dim)
                        .with_context("row", row.len()),
                ));
            }
            values.extend_from_slice(row);
        }
        Self::new(dim, values)
    }

    /// Attaches one weight per row.
    pub fn with_weights(mut self, weights: Vec<f64>) -> Result<Self, AmsiError> {
        if weights.len() != self.len() {
            return Err(AmsiError::Shape(
                ErrorInfo::new("batch-weights", "one weight per row is required")
                    .with_context("rows", self.len())
                    .with_context("weights", weights.len()),
            ));
        }
        self.weights = Some(weights);
        Ok(self)
    }

    /// Parameter dimension.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        if self.dim == 0 {
            0
        } else {
            self.values.len() / self.dim
        }
    }

    /// Whether the batch holds no rows.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Row `index`.
    pub fn row(&self, index: usize) -> &[f64] {
        &self.values[index * self.dim..(index + 1) * self.dim]
    }

    /// Iterator over rows.
    pub fn rows(&self) -> impl Iterator<Item = &[f64]> + '_ {
        self.values.chunks_exact(self.dim.max(1))
    }

    /// Flat row-major values.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Per-row weights, if any.
    pub fn weights(&self) -> Option<&[f64]> {
        self.weights.as_deref()
    }

    /// Mass carried by row `index`.
    pub fn weight(&self, index: usize) -> f64 {
        self.weights.as_ref().map_or(1.0, |w| w[index])
    }

    /// Appends the rows of `other`. Mixing weighted and unweighted batches
    /// gives the unweighted rows unit weight.
    pub fn extend(&mut self, other: &SampleBatch) -> Result<(), AmsiError> {
        if other.dim != self.dim {
            return Err(AmsiError::Shape(
                ErrorInfo::new("batch-concat", "cannot concatenate batches of different dimension")
                    .with_context("left", self.dim)
                    .with_context("right", other.dim),
            ));
        }
        let rows = self.len();
        match (self.weights.take(), other.weights.as_ref()) {
            (None, None) => {}
            (Some(mut mine), theirs) => {
                match theirs {
                    Some(theirs) => mine.extend_from_slice(theirs),
                    None => mine.extend(std::iter::repeat(1.0).take(other.len())),
                }
                self.weights = Some(mine);
            }
            (None, Some(theirs)) => {
                let mut weights = vec![1.0; rows];
                weights.extend_from_slice(theirs);
                self.weights = Some(weights);
            }
        }
        self.values.extend_from_slice(&other.values);
        Ok(())
    }
}
