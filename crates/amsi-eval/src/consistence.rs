//! Pairwise divergences between the posteriors of different masks.

use amsi_core::errors::AmsiError;
use amsi_core::Mask;
use amsi_hist::{align_common, kl_divergence, Histogram};
use serde::{Deserialize, Serialize};

/// `values[i][j]` is `KL(p_i || p_j)` on the dimensions masks `i` and `j`
/// share; zero on the diagonal and for disjoint masks.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConsistenceMatrix {
    pub labels: Vec<String>,
    pub values: Vec<Vec<f64>>,
}

impl ConsistenceMatrix {
    /// Divergence of the posterior of `row` from the one of `column`.
    pub fn get(&self, row: &str, column: &str) -> Option<f64> {
        let i = self.labels.iter().position(|label| label == row)?;
        let j = self.labels.iter().position(|label| label == column)?;
        Some(self.values[i][j])
    }
}

/// Grows the matrix one normalized posterior at a time.
#[derive(Debug, Default)]
pub(crate) struct ConsistenceBuilder {
    entries: Vec<(Mask, Histogram)>,
    matrix: ConsistenceMatrix,
}

impl ConsistenceBuilder {
    pub(crate) fn insert(&mut self, mask: &Mask, hist: &Histogram) -> Result<(), AmsiError> {
        let mut row = Vec::with_capacity(self.entries.len() + 1);
        for (index, (other_mask, other)) in self.entries.iter().enumerate() {
            let (forward, backward) = match align_common(hist, mask, other, other_mask)? {
                Some((p, q)) => (kl_divergence(&p, &q)?, kl_divergence(&q, &p)?),
                None => (0.0, 0.0),
            };
            row.push(forward);
            self.matrix.values[index].push(backward);
        }
        row.push(0.0);
        self.matrix.values.push(row);
        self.matrix.labels.push(mask.label());
        self.entries.push((mask.clone(), hist.clone()));
        Ok(())
    }

    pub(crate) fn finish(self) -> ConsistenceMatrix {
        self.matrix
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matrix_compares_shared_dimensions_only() {
        // p over (0, 1), q over (1, 2), r over (2,): p and r are disjoint.
        let p = Histogram::dense(vec![2, 2], vec![0.1, 0.4, 0.2, 0.3]).unwrap();
        let q = Histogram::dense(vec![2, 2], vec![0.25, 0.25, 0.25, 0.25]).unwrap();
        let r = Histogram::dense(vec![2], vec![0.5, 0.5]).unwrap();
        let p_mask = Mask::from_label("110").unwrap();
        let q_mask = Mask::from_label("011").unwrap();
        let r_mask = Mask::from_label("001").unwrap();

        let mut builder = ConsistenceBuilder::default();
        builder.insert(&p_mask, &p).unwrap();
        builder.insert(&q_mask, &q).unwrap();
        builder.insert(&r_mask, &r).unwrap();
        let matrix = builder.finish();

        assert_eq!(matrix.labels, vec!["110", "011", "001"]);
        // Dimension 1: p gives (0.3, 0.7), q gives (0.5, 0.5).
        let expected = 0.3 * (0.3f64 / 0.5).ln() + 0.7 * (0.7f64 / 0.5).ln();
        assert!((matrix.get("110", "011").unwrap() - expected).abs() < 1e-12);
        assert!(matrix.get("011", "110").unwrap() > 0.0);
        assert!(matrix.get("001", "011").unwrap().abs() < 1e-12);
        assert_eq!(matrix.get("110", "001"), Some(0.0));
        assert_eq!(matrix.get("001", "001"), Some(0.0));
        assert_eq!(matrix.values.iter().map(Vec::len).collect::<Vec<_>>(), vec![3, 3, 3]);
    }
}
