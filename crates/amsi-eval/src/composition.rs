//! Corner-plot tables assembled from low-dimensional mask posteriors.

use std::collections::BTreeMap;

use amsi_core::errors::AmsiError;
use amsi_core::Mask;
use amsi_hist::Histogram;
use serde::{Deserialize, Serialize};

/// Lower-triangular table over the parameters covered by the inserted masks.
///
/// With `present` listing those parameters in increasing order, `table[a][a]`
/// is the 1-D posterior of `present[a]` and `table[a][b]` (`b < a`) the 2-D
/// posterior over `(present[b], present[a])`, when such a mask was evaluated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Composition {
    pub present: Mask,
    pub table: Vec<Vec<Option<Histogram>>>,
}

#[derive(Debug)]
pub(crate) struct CompositionBuilder {
    dim: usize,
    cells: BTreeMap<(usize, usize), Histogram>,
}

impl CompositionBuilder {
    pub(crate) fn new(dim: usize) -> Self {
        Self {
            dim,
            cells: BTreeMap::new(),
        }
    }

    /// Files `hist` under its mask; masks over more than two parameters are ignored.
    pub(crate) fn insert(&mut self, mask: &Mask, hist: Histogram) {
        let selected = mask.selected();
        let key = match selected.as_slice() {
            [i] => (*i, *i),
            [i, j] => (*j, *i),
            _ => return,
        };
        self.cells.insert(key, hist);
    }

    pub(crate) fn finish(mut self) -> Result<Option<Composition>, AmsiError> {
        let mut covered: Vec<usize> = self.cells.keys().flat_map(|&(a, b)| [a, b]).collect();
        covered.sort_unstable();
        covered.dedup();
        if covered.is_empty() {
            return Ok(None);
        }
        let present = Mask::from_indices(self.dim, &covered)?;
        let table = covered
            .iter()
            .enumerate()
            .map(|(a, &row)| {
                covered[..=a]
                    .iter()
                    .map(|&column| self.cells.remove(&(row, column)))
                    .collect()
            })
            .collect();
        Ok(Some(Composition { present, table }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hist(shape: Vec<usize>) -> Histogram {
        let numel = shape.iter().product();
        Histogram::dense(shape, vec![1.0; numel]).unwrap()
    }

    #[test]
    fn cells_land_below_the_diagonal() {
        let mut builder = CompositionBuilder::new(4);
        builder.insert(&Mask::from_label("0100").unwrap(), hist(vec![3]));
        builder.insert(&Mask::from_label("0101").unwrap(), hist(vec![3, 5]));
        builder.insert(&Mask::from_label("0111").unwrap(), hist(vec![3, 4, 5]));
        let composition = builder.finish().unwrap().unwrap();

        assert_eq!(composition.present.label(), "0101");
        assert_eq!(composition.table.len(), 2);
        assert_eq!(composition.table[0][0].as_ref().unwrap().shape(), &[3]);
        assert_eq!(composition.table[1][0].as_ref().unwrap().shape(), &[3, 5]);
        assert!(composition.table[1][1].is_none());
    }

    #[test]
    fn nothing_inserted_gives_nothing() {
        assert!(CompositionBuilder::new(3).finish().unwrap().is_none());
    }
}
