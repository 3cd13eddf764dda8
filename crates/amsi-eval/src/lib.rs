//! Evaluation driver for amortized posterior estimators.
//!
//! For every observation index the driver samples one histogram per mask,
//! normalizes it, and measures it against an optional ground-truth posterior:
//! entropy, KL divergence, transport distance and the highest-density
//! quantile of the true parameters. Optional extras are the mask-by-mask
//! consistence matrix and the composition of low-dimensional marginals.

pub mod composition;
pub mod config;
pub mod consistence;
pub mod context;
pub mod driver;
pub mod export;
pub mod record;

pub use composition::Composition;
pub use config::{EvalConfig, ReductionConfig, SeedPolicy, WassersteinConfig};
pub use consistence::ConsistenceMatrix;
pub use context::{DirectoryTruthCache, EvalContext, MemoryTruthCache, Observation, TruthCache};
pub use driver::{evaluate_index, evaluate_range, run_evaluation, IndexFailure, IndexReport, RangeReport};
pub use export::{
    append_records, consistence_path, read_records, write_consistence, EvalManifest, CONSISTENCE_CORNER,
};
pub use record::MeasureRecord;
