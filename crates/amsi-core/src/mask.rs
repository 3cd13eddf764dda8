//! Boolean selectors over parameter dimensions.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::{AmsiError, ErrorInfo};

/// Selects the subset of parameters that are jointly estimated; the
/// remaining ones are marginalized out.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Mask {
    bits: Vec<bool>,
}

impl Mask {
    /// Builds a mask from explicit bits. At least one bit must be set.
    pub fn new(bits: Vec<bool>) -> Result<Self, AmsiError> {
        if !bits.iter().any(|&bit| bit) {
            return Err(AmsiError::Mask(
                ErrorInfo::new("mask-empty", "mask selects no dimension")
                    .with_context("len", bits.len()),
            ));
        }
        Ok(Self { bits })
    }

    /// Mask selecting every one of `dim` parameters.
    pub fn full(dim: usize) -> Self {
        Self {
            bits: vec![true; dim],
        }
    }

    /// Mask selecting exactly the given indices among `dim` parameters.
    pub fn from_indices(dim: usize, indices: &[usize]) -> Result<Self, AmsiError> {
        let mut bits = vec![false; dim];
        for &index in indices {
            let slot = bits.get_mut(index).ok_or_else(|| {
                AmsiError::Mask(
                    ErrorInfo::new("mask-index", "index exceeds parameter count")
                        .with_context("index", index)
                        .with_context("dim", dim),
                )
            })?;
            *slot = true;
        }
        Self::new(bits)
    }

    /// Parses the canonical bit-string label produced by [`Mask::label`].
    pub fn from_label(label: &str) -> Result<Self, AmsiError> {
        let bits = label
            .chars()
            .map(|c| match c {
                '1' => Ok(true),
                '0' => Ok(false),
                other => Err(AmsiError::Mask(
                    ErrorInfo::new("mask-label", "labels only contain '0' and '1'")
                        .with_context("label", label)
                        .with_context("char", other),
                )),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(bits)
    }

    /// Checks that the mask applies to a parameter vector of length `dim`.
    pub fn validate(&self, dim: usize) -> Result<(), AmsiError> {
        if self.bits.len() != dim {
            return Err(AmsiError::Mask(
                ErrorInfo::new("mask-length", "mask length differs from parameter count")
                    .with_context("mask", self.label())
                    .with_context("dim", dim),
            ));
        }
        Ok(())
    }

    /// Number of parameters the mask applies to.
    pub fn len(&self) -> usize {
        self.bits.len()
    }

    /// Whether the mask covers zero parameters. Never true for a constructed mask.
    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// Number of selected dimensions.
    pub fn count(&self) -> usize {
        self.bits.iter().filter(|&&bit| bit).count()
    }

    /// Whether dimension `dim` is selected.
    pub fn contains(&self, dim: usize) -> bool {
        self.bits.get(dim).copied().unwrap_or(false)
    }

    /// Raw bits.
    pub fn bits(&self) -> &[bool] {
        &self.bits
    }

    /// Indices of the selected dimensions, ascending.
    pub fn selected(&self) -> Vec<usize> {
        self.bits
            .iter()
            .enumerate()
            .filter_map(|(idx, &bit)| bit.then_some(idx))
            .collect()
    }

    /// Indices of the dimensions left out, ascending.
    pub fn excluded(&self) -> Vec<usize> {
        self.bits
            .iter()
            .enumerate()
            .filter_map(|(idx, &bit)| (!bit).then_some(idx))
            .collect()
    }

    /// Element-wise conjunction. `None` when the masks share no dimension.
    pub fn intersect(&self, other: &Mask) -> Option<Mask> {
        let bits: Vec<bool> = self
            .bits
            .iter()
            .zip(other.bits.iter())
            .map(|(&a, &b)| a && b)
            .collect();
        Mask::new(bits).ok()
    }

    /// Element-wise disjunction over the longer of both masks.
    pub fn union(&self, other: &Mask) -> Mask {
        let len = self.bits.len().max(other.bits.len());
        let bits = (0..len)
            .map(|idx| self.contains(idx) || other.contains(idx))
            .collect();
        Mask { bits }
    }

    /// Positions of `dims` within the reduced (masked) parameter vector.
    ///
    /// A selected dimension `d` sits at position `#{selected < d}` once the
    /// unselected dimensions are dropped. Dimensions outside the mask are
    /// skipped.
    pub fn positions_of(&self, dims: &Mask) -> Vec<usize> {
        let mut position = 0usize;
        let mut out = Vec::new();
        for (idx, &bit) in self.bits.iter().enumerate() {
            if bit {
                if dims.contains(idx) {
                    out.push(position);
                }
                position += 1;
            }
        }
        out
    }

    /// Applies the mask to a parameter vector.
    pub fn select<T: Copy>(&self, values: &[T]) -> Vec<T> {
        values
            .iter()
            .zip(self.bits.iter())
            .filter_map(|(&value, &bit)| bit.then_some(value))
            .collect()
    }

    /// Canonical bit-string label, e.g. `"01100"`.
    pub fn label(&self) -> String {
        self.bits
            .iter()
            .map(|&bit| if bit { '1' } else { '0' })
            .collect()
    }
}

impl fmt::Display for Mask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}
