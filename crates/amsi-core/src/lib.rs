#![deny(missing_docs)]
#![doc = "Core types shared by the AMSI evaluation crates: the canonical error surface, dimension masks, deterministic seeding and run provenance."]

pub mod errors;
pub mod mask;
pub mod provenance;
pub mod rng;

pub use errors::{AmsiError, ErrorInfo};
pub use mask::Mask;
pub use provenance::{stable_hash_string, RunProvenance, SchemaVersion};
pub use rng::{derive_substream_seed, RngHandle};
