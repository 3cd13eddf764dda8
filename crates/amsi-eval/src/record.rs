use serde::{Deserialize, Serialize};

/// Column order of the measure table.
pub const RECORD_COLUMNS: [&str; 8] = [
    "index",
    "mask",
    "total_probability",
    "entropy",
    "entropy_truth",
    "kl_truth",
    "wd_truth",
    "quantile",
];

/// Measures of one mask at one observation index. Absent values are `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasureRecord {
    pub index: usize,
    /// Mask label, one `0`/`1` per parameter.
    pub mask: String,
    /// Mass of the histogram before normalization.
    pub total_probability: f64,
    pub entropy: f64,
    pub entropy_truth: Option<f64>,
    pub kl_truth: Option<f64>,
    pub wd_truth: Option<f64>,
    pub quantile: Option<f64>,
}

impl MeasureRecord {
    /// Record holding only the always-present measures.
    pub fn new(index: usize, mask: String, total_probability: f64, entropy: f64) -> Self {
        Self {
            index,
            mask,
            total_probability,
            entropy,
            entropy_truth: None,
            kl_truth: None,
            wd_truth: None,
            quantile: None,
        }
    }
}
