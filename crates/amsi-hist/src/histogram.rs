use std::borrow::Cow;
use std::cmp::Ordering;

use amsi_core::errors::{AmsiError, ErrorInfo};
use serde::{Deserialize, Serialize};

/// Histograms with at most this many bins are stored densely unless the
/// caller picks another threshold.
pub const DEFAULT_DENSE_LIMIT: u128 = 1 << 22;

/// Largest bin count that may ever be materialized as a dense array.
const DENSE_HARD_LIMIT: u128 = 1 << 32;

pub(crate) fn shape_numel(shape: &[usize]) -> u128 {
    shape
        .iter()
        .fold(1u128, |acc, &n| acc.saturating_mul(n as u128))
}

/// Accumulated mass over the cells of a regular grid.
///
/// The storage is either a dense row-major array (last axis fastest) or a
/// sparse list of `(coordinate, mass)` entries. Sparse entries may contain
/// duplicate coordinates until [`Histogram::coalesce`] merges them; every read
/// operation behaves as if the histogram were coalesced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    shape: Vec<usize>,
    storage: Storage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "layout", rename_all = "kebab-case")]
enum Storage {
    Dense {
        values: Vec<f64>,
    },
    Sparse {
        coords: Vec<u32>,
        values: Vec<f64>,
        coalesced: bool,
    },
}

impl Histogram {
    /// Empty histogram, dense when the bin count is at most `dense_limit`.
    pub fn zeros(shape: Vec<usize>, dense_limit: u128) -> Result<Self, AmsiError> {
        check_shape(&shape)?;
        let numel = shape_numel(&shape);
        if numel <= dense_limit.min(DENSE_HARD_LIMIT) {
            Ok(Self {
                storage: Storage::Dense {
                    values: vec![0.0; numel as usize],
                },
                shape,
            })
        } else {
            Self::sparse(shape)
        }
    }

    /// Empty sparse histogram.
    pub fn sparse(shape: Vec<usize>) -> Result<Self, AmsiError> {
        check_shape(&shape)?;
        Ok(Self {
            shape,
            storage: Storage::Sparse {
                coords: Vec::new(),
                values: Vec::new(),
                coalesced: true,
            },
        })
    }

    /// Dense histogram over row-major `values`.
    pub fn dense(shape: Vec<usize>, values: Vec<f64>) -> Result<Self, AmsiError> {
        check_shape(&shape)?;
        let numel = shape_numel(&shape);
        if numel != values.len() as u128 {
            return Err(AmsiError::Shape(
                ErrorInfo::new("dense-length", "value count differs from the bin count")
                    .with_context("numel", numel)
                    .with_context("values", values.len()),
            ));
        }
        Ok(Self {
            shape,
            storage: Storage::Dense { values },
        })
    }

    /// Rank-0 histogram holding a single mass.
    pub fn scalar(mass: f64) -> Self {
        Self {
            shape: Vec::new(),
            storage: Storage::Dense { values: vec![mass] },
        }
    }

    /// Builds a histogram from `(coordinate, mass)` pairs.
    pub fn from_entries<I>(shape: Vec<usize>, entries: I, dense_limit: u128) -> Result<Self, AmsiError>
    where
        I: IntoIterator<Item = (Vec<u32>, f64)>,
    {
        let mut hist = Self::zeros(shape, dense_limit)?;
        for (coord, mass) in entries {
            hist.add(&coord, mass)?;
        }
        hist.coalesce();
        Ok(hist)
    }

    /// Number of bins along every axis.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Number of axes.
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Total number of bins, saturating at `u128::MAX`.
    pub fn numel(&self) -> u128 {
        shape_numel(&self.shape)
    }

    /// Whether the histogram uses the sparse layout.
    pub fn is_sparse(&self) -> bool {
        matches!(self.storage, Storage::Sparse { .. })
    }

    /// Whether no duplicate coordinates are stored. Always true when dense.
    pub fn is_coalesced(&self) -> bool {
        match &self.storage {
            Storage::Dense { .. } => true,
            Storage::Sparse { coalesced, .. } => *coalesced,
        }
    }

    /// Number of bins holding non-zero mass.
    pub fn nnz(&self) -> usize {
        match &self.storage {
            Storage::Dense { values } => values.iter().filter(|&&v| v != 0.0).count(),
            Storage::Sparse { .. } => self.canonical().stored_len(),
        }
    }

    /// Adds `mass` to the bin at `coord`.
    pub fn add(&mut self, coord: &[u32], mass: f64) -> Result<(), AmsiError> {
        self.check_coord(coord)?;
        self.push_unchecked(coord, mass);
        Ok(())
    }

    pub(crate) fn push_unchecked(&mut self, coord: &[u32], mass: f64) {
        if mass == 0.0 {
            return;
        }
        match &mut self.storage {
            Storage::Dense { values } => values[linear_index(&self.shape, coord)] += mass,
            Storage::Sparse {
                coords,
                values,
                coalesced,
            } => {
                coords.extend_from_slice(coord);
                values.push(mass);
                *coalesced = false;
            }
        }
    }

    /// Stored sparse entries while duplicates may exist (0 when dense or coalesced).
    pub(crate) fn pending_len(&self) -> usize {
        match &self.storage {
            Storage::Sparse {
                coalesced: false,
                values,
                ..
            } => values.len(),
            _ => 0,
        }
    }

    /// Merges duplicate sparse coordinates by summation and sorts entries
    /// lexicographically. Idempotent; a no-op on dense histograms.
    pub fn coalesce(&mut self) {
        let rank = self.rank();
        let Storage::Sparse {
            coords,
            values,
            coalesced,
        } = &mut self.storage
        else {
            return;
        };
        if *coalesced {
            return;
        }
        let slot = |i: usize| i * rank..(i + 1) * rank;
        let mut order: Vec<usize> = (0..values.len()).collect();
        order.sort_by(|&a, &b| coords[slot(a)].cmp(&coords[slot(b)]));

        let mut merged_coords: Vec<u32> = Vec::with_capacity(coords.len());
        let mut merged_values: Vec<f64> = Vec::with_capacity(values.len());
        for index in order {
            let coord = &coords[slot(index)];
            let same = merged_values
                .len()
                .checked_sub(1)
                .map(|last| &merged_coords[slot(last)] == coord)
                .unwrap_or(false);
            if same {
                if let Some(last) = merged_values.last_mut() {
                    *last += values[index];
                }
            } else {
                merged_coords.extend_from_slice(coord);
                merged_values.push(values[index]);
            }
        }

        // Drop bins whose mass cancelled out entirely.
        let mut kept_coords = Vec::with_capacity(merged_coords.len());
        let mut kept_values = Vec::with_capacity(merged_values.len());
        for (i, &value) in merged_values.iter().enumerate() {
            if value != 0.0 {
                kept_coords.extend_from_slice(&merged_coords[slot(i)]);
                kept_values.push(value);
            }
        }
        *coords = kept_coords;
        *values = kept_values;
        *coalesced = true;
    }

    /// Consuming variant of [`Histogram::coalesce`].
    pub fn coalesced(mut self) -> Self {
        self.coalesce();
        self
    }

    /// Borrowed view when already canonical, coalesced copy otherwise.
    pub(crate) fn canonical(&self) -> Cow<'_, Histogram> {
        if self.is_coalesced() {
            Cow::Borrowed(self)
        } else {
            Cow::Owned(self.clone().coalesced())
        }
    }

    fn stored_len(&self) -> usize {
        match &self.storage {
            Storage::Dense { values } | Storage::Sparse { values, .. } => values.len(),
        }
    }

    /// Mass of the bin at `coord`.
    pub fn get(&self, coord: &[u32]) -> Result<f64, AmsiError> {
        self.check_coord(coord)?;
        Ok(self.get_unchecked(coord))
    }

    pub(crate) fn get_unchecked(&self, coord: &[u32]) -> f64 {
        let rank = self.rank();
        match &self.storage {
            Storage::Dense { values } => values[linear_index(&self.shape, coord)],
            Storage::Sparse {
                coords,
                values,
                coalesced: true,
            } => {
                let (mut lo, mut hi) = (0usize, values.len());
                while lo < hi {
                    let mid = (lo + hi) / 2;
                    match coords[mid * rank..(mid + 1) * rank].cmp(coord) {
                        Ordering::Less => lo = mid + 1,
                        Ordering::Greater => hi = mid,
                        Ordering::Equal => return values[mid],
                    }
                }
                0.0
            }
            Storage::Sparse { coords, values, .. } => values
                .iter()
                .enumerate()
                .filter(|(i, _)| &coords[i * rank..(i + 1) * rank] == coord)
                .map(|(_, v)| v)
                .sum(),
        }
    }

    /// Sum of all bin masses.
    pub fn total(&self) -> f64 {
        match &self.storage {
            Storage::Dense { values } | Storage::Sparse { values, .. } => values.iter().sum(),
        }
    }

    /// Visits every non-zero bin once, in lexicographic coordinate order.
    pub fn for_each_nonzero(&self, mut visit: impl FnMut(&[u32], f64)) {
        let view = self.canonical();
        let rank = view.rank();
        match &view.storage {
            Storage::Dense { values } => {
                let mut coord = vec![0u32; rank];
                for (i, &value) in values.iter().enumerate() {
                    if i > 0 {
                        advance(&mut coord, &view.shape);
                    }
                    if value != 0.0 {
                        visit(&coord, value);
                    }
                }
            }
            Storage::Sparse { coords, values, .. } => {
                for (i, &value) in values.iter().enumerate() {
                    visit(&coords[i * rank..(i + 1) * rank], value);
                }
            }
        }
    }

    /// Non-zero `(coordinate, mass)` pairs in lexicographic order.
    pub fn entries(&self) -> Vec<(Vec<u32>, f64)> {
        let mut out = Vec::new();
        self.for_each_nonzero(|coord, value| out.push((coord.to_vec(), value)));
        out
    }

    /// Masses of the non-zero bins.
    pub fn nonzero_values(&self) -> Vec<f64> {
        let mut out = Vec::new();
        self.for_each_nonzero(|_, value| out.push(value));
        out
    }

    /// Multiplies every bin by `factor`.
    pub fn scale(&mut self, factor: f64) {
        match &mut self.storage {
            Storage::Dense { values } | Storage::Sparse { values, .. } => {
                values.iter_mut().for_each(|v| *v *= factor)
            }
        }
    }

    /// Dense copy of the histogram.
    pub fn to_dense(&self) -> Result<Histogram, AmsiError> {
        if !self.is_sparse() {
            return Ok(self.clone());
        }
        let numel = self.numel();
        if numel > DENSE_HARD_LIMIT {
            return Err(AmsiError::SizeLimit(
                ErrorInfo::new("dense-too-large", "histogram is too large to densify")
                    .with_context("numel", numel)
                    .with_context("limit", DENSE_HARD_LIMIT),
            ));
        }
        let mut values = vec![0.0; numel as usize];
        self.for_each_nonzero(|coord, value| values[linear_index(&self.shape, coord)] += value);
        Ok(Self {
            shape: self.shape.clone(),
            storage: Storage::Dense { values },
        })
    }

    /// Coalesced sparse copy of the histogram.
    pub fn to_sparse(&self) -> Histogram {
        if self.is_sparse() {
            return self.canonical().into_owned();
        }
        let mut coords = Vec::new();
        let mut values = Vec::new();
        self.for_each_nonzero(|coord, value| {
            coords.extend_from_slice(coord);
            values.push(value);
        });
        Self {
            shape: self.shape.clone(),
            storage: Storage::Sparse {
                coords,
                values,
                coalesced: true,
            },
        }
    }

    /// Copy in the layout `dense_limit` would pick for this shape.
    pub fn with_layout(&self, dense_limit: u128) -> Result<Histogram, AmsiError> {
        if self.numel() <= dense_limit.min(DENSE_HARD_LIMIT) {
            self.to_dense()
        } else {
            Ok(self.to_sparse())
        }
    }

    /// Largest absolute per-bin difference between two histograms of equal
    /// shape, whatever their layouts.
    pub fn max_abs_diff(&self, other: &Histogram) -> Result<f64, AmsiError> {
        self.check_same_shape(other)?;
        let (a, b) = (self.canonical(), other.canonical());
        let mut worst = 0.0f64;
        a.for_each_nonzero(|coord, value| {
            worst = worst.max((value - b.get_unchecked(coord)).abs());
        });
        b.for_each_nonzero(|coord, value| {
            worst = worst.max((value - a.get_unchecked(coord)).abs());
        });
        Ok(worst)
    }

    pub(crate) fn check_same_shape(&self, other: &Histogram) -> Result<(), AmsiError> {
        if self.shape != other.shape {
            return Err(AmsiError::Shape(
                ErrorInfo::new("shape-mismatch", "histograms have different shapes")
                    .with_context("left", format!("{:?}", self.shape))
                    .with_context("right", format!("{:?}", other.shape)),
            ));
        }
        Ok(())
    }

    pub(crate) fn check_coord(&self, coord: &[u32]) -> Result<(), AmsiError> {
        let in_range = coord.len() == self.rank()
            && coord
                .iter()
                .zip(self.shape.iter())
                .all(|(&c, &n)| (c as usize) < n);
        if !in_range {
            return Err(AmsiError::Shape(
                ErrorInfo::new("coord-range", "coordinate outside the histogram")
                    .with_context("coord", format!("{coord:?}"))
                    .with_context("shape", format!("{:?}", self.shape)),
            ));
        }
        Ok(())
    }
}

fn check_shape(shape: &[usize]) -> Result<(), AmsiError> {
    if let Some(axis) = shape.iter().position(|&n| n == 0 || n > u32::MAX as usize) {
        return Err(AmsiError::Shape(
            ErrorInfo::new("shape-axis", "every axis needs between 1 and u32::MAX bins")
                .with_context("axis", axis)
                .with_context("bins", shape[axis]),
        ));
    }
    Ok(())
}

fn linear_index(shape: &[usize], coord: &[u32]) -> usize {
    coord
        .iter()
        .zip(shape.iter())
        .fold(0usize, |acc, (&c, &n)| acc * n + c as usize)
}

/// Row-major odometer step.
fn advance(coord: &mut [u32], shape: &[usize]) {
    for axis in (0..coord.len()).rev() {
        coord[axis] += 1;
        if (coord[axis] as usize) < shape[axis] {
            return;
        }
        coord[axis] = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coalesce_merges_duplicates_in_order() {
        let mut hist = Histogram::sparse(vec![3, 3]).unwrap();
        hist.add(&[2, 0], 1.0).unwrap();
        hist.add(&[0, 1], 2.0).unwrap();
        hist.add(&[2, 0], 0.5).unwrap();
        assert!(!hist.is_coalesced());
        assert_eq!(hist.get(&[2, 0]).unwrap(), 1.5);

        hist.coalesce();
        assert_eq!(
            hist.entries(),
            vec![(vec![0, 1], 2.0), (vec![2, 0], 1.5)]
        );
        let once = hist.clone();
        hist.coalesce();
        assert_eq!(hist, once);
    }

    #[test]
    fn layout_follows_dense_limit() {
        assert!(!Histogram::zeros(vec![10, 10], 100).unwrap().is_sparse());
        assert!(Histogram::zeros(vec![10, 10], 99).unwrap().is_sparse());
        let huge = Histogram::zeros(vec![50; 20], DEFAULT_DENSE_LIMIT).unwrap();
        assert!(huge.is_sparse());
        assert!(huge.to_dense().is_err());
    }

    #[test]
    fn dense_and_sparse_round_trip() {
        let dense = Histogram::dense(vec![2, 3], vec![0.0, 1.0, 0.0, 2.0, 0.0, 3.0]).unwrap();
        let sparse = dense.to_sparse();
        assert_eq!(sparse.nnz(), 3);
        assert_eq!(sparse.get(&[1, 2]).unwrap(), 3.0);
        assert_eq!(sparse.to_dense().unwrap(), dense);
        assert_eq!(dense.max_abs_diff(&sparse).unwrap(), 0.0);
    }

    #[test]
    fn out_of_range_coordinates_are_rejected() {
        let mut hist = Histogram::zeros(vec![2, 2], DEFAULT_DENSE_LIMIT).unwrap();
        assert_eq!(hist.add(&[2, 0], 1.0).unwrap_err().info().code, "coord-range");
        assert!(hist.get(&[0]).is_err());
    }

    #[test]
    fn rank_zero_sparse_collapses_to_one_entry() {
        let mut hist = Histogram::sparse(Vec::new()).unwrap();
        hist.add(&[], 1.0).unwrap();
        hist.add(&[], 2.0).unwrap();
        hist.coalesce();
        assert_eq!(hist.entries(), vec![(Vec::new(), 3.0)]);
        assert_eq!(hist.total(), Histogram::scalar(3.0).total());
    }
}
