use amsi_core::errors::{AmsiError, ErrorInfo};
use amsi_core::Mask;
use serde::{Deserialize, Serialize};

/// Regular discretization of the box `[low, high)` into `bins[d]` cells per
/// dimension.
///
/// Values map to `clip(floor(bins * (v - low) / (high - low)), 0, bins - 1)`,
/// so mass outside the box lands in the edge cells instead of being dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinGrid {
    low: Vec<f64>,
    high: Vec<f64>,
    bins: Vec<usize>,
}

impl BinGrid {
    /// Grid with the same resolution along every dimension.
    pub fn new(low: Vec<f64>, high: Vec<f64>, bins: usize) -> Result<Self, AmsiError> {
        let dims = low.len();
        Self::with_bins(low, high, vec![bins; dims])
    }

    /// Grid with a per-dimension resolution.
    pub fn with_bins(low: Vec<f64>, high: Vec<f64>, bins: Vec<usize>) -> Result<Self, AmsiError> {
        if low.len() != high.len() || low.len() != bins.len() {
            return Err(AmsiError::Shape(
                ErrorInfo::new("grid-rank", "low, high and bins must have equal length")
                    .with_context("low", low.len())
                    .with_context("high", high.len())
                    .with_context("bins", bins.len()),
            ));
        }
        for (dim, ((&lo, &hi), &n)) in low.iter().zip(high.iter()).zip(bins.iter()).enumerate() {
            if !(lo.is_finite() && hi.is_finite() && lo < hi) {
                return Err(AmsiError::Shape(
                    ErrorInfo::new("grid-bounds", "bounds must be finite with low < high")
                        .with_context("dim", dim)
                        .with_context("low", lo)
                        .with_context("high", hi),
                ));
            }
            if n == 0 || n > u32::MAX as usize {
                return Err(AmsiError::Shape(
                    ErrorInfo::new("grid-bins", "bin count must be in 1..=u32::MAX")
                        .with_context("dim", dim)
                        .with_context("bins", n),
                ));
            }
        }
        Ok(Self { low, high, bins })
    }

    /// Number of dimensions.
    pub fn dim(&self) -> usize {
        self.bins.len()
    }

    /// Per-dimension bin counts; this is the shape of histograms on the grid.
    pub fn shape(&self) -> &[usize] {
        &self.bins
    }

    /// Lower bounds.
    pub fn low(&self) -> &[f64] {
        &self.low
    }

    /// Upper bounds.
    pub fn high(&self) -> &[f64] {
        &self.high
    }

    /// Bounds of one dimension.
    pub fn bounds(&self, dim: usize) -> (f64, f64) {
        (self.low[dim], self.high[dim])
    }

    /// Total number of cells, saturating at `u128::MAX`.
    pub fn numel(&self) -> u128 {
        crate::histogram::shape_numel(&self.bins)
    }

    /// Volume of a single cell.
    pub fn cell_volume(&self) -> f64 {
        (0..self.dim())
            .map(|d| (self.high[d] - self.low[d]) / self.bins[d] as f64)
            .product()
    }

    /// Maps one parameter vector to its bin coordinate.
    pub fn bin_of(&self, value: &[f64]) -> Result<Vec<u32>, AmsiError> {
        self.check_len(value.len())?;
        let mut coord = vec![0u32; self.dim()];
        self.bin_into(value, &mut coord);
        Ok(coord)
    }

    /// Allocation-free variant of [`BinGrid::bin_of`]; lengths must match.
    pub(crate) fn bin_into(&self, value: &[f64], coord: &mut [u32]) {
        for d in 0..self.bins.len() {
            let n = self.bins[d];
            let scaled = n as f64 * (value[d] - self.low[d]) / (self.high[d] - self.low[d]);
            // `as` saturates: NaN maps to 0, +inf to i64::MAX.
            let index = (scaled.floor() as i64).clamp(0, n as i64 - 1);
            coord[d] = index as u32;
        }
    }

    /// Center of the cell at `coord`.
    pub fn center(&self, coord: &[u32]) -> Vec<f64> {
        coord
            .iter()
            .enumerate()
            .map(|(d, &index)| {
                let width = (self.high[d] - self.low[d]) / self.bins[d] as f64;
                self.low[d] + (index as f64 + 0.5) * width
            })
            .collect()
    }

    /// Sub-grid over the dimensions selected by `mask`.
    pub fn select(&self, mask: &Mask) -> Result<Self, AmsiError> {
        mask.validate(self.dim())?;
        Ok(Self {
            low: mask.select(&self.low),
            high: mask.select(&self.high),
            bins: mask.select(&self.bins),
        })
    }

    /// Per-dimension width `high - low`.
    pub fn widths(&self) -> Vec<f64> {
        self.low
            .iter()
            .zip(self.high.iter())
            .map(|(lo, hi)| hi - lo)
            .collect()
    }

    pub(crate) fn check_len(&self, len: usize) -> Result<(), AmsiError> {
        if len != self.dim() {
            return Err(AmsiError::Shape(
                ErrorInfo::new("grid-dim", "value length differs from grid dimension")
                    .with_context("expected", self.dim())
                    .with_context("actual", len),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_outside_the_box_are_clipped() {
        let grid = BinGrid::new(vec![0.0, -1.0], vec![1.0, 1.0], 10).unwrap();
        assert_eq!(grid.bin_of(&[0.05, 0.0]).unwrap(), vec![0, 5]);
        assert_eq!(grid.bin_of(&[1.0, 1.0]).unwrap(), vec![9, 9]);
        assert_eq!(grid.bin_of(&[-3.0, 7.5]).unwrap(), vec![0, 9]);
        assert_eq!(grid.bin_of(&[f64::NAN, f64::NEG_INFINITY]).unwrap(), vec![0, 0]);
    }

    #[test]
    fn centers_fall_back_into_their_bin() {
        let grid = BinGrid::with_bins(vec![0.0, 2.0], vec![1.0, 4.0], vec![4, 3]).unwrap();
        let coord = [3u32, 1];
        assert_eq!(grid.bin_of(&grid.center(&coord)).unwrap(), coord.to_vec());
        assert!((grid.cell_volume() - 0.25 * (2.0 / 3.0)).abs() < 1e-12);
    }

    #[test]
    fn invalid_grids_are_rejected() {
        assert!(BinGrid::new(vec![1.0], vec![1.0], 4).is_err());
        assert!(BinGrid::new(vec![0.0], vec![1.0], 0).is_err());
        assert!(BinGrid::with_bins(vec![0.0], vec![1.0, 2.0], vec![2]).is_err());
    }
}
