//! Provenance and schema descriptors attached to serialized artefacts.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::errors::{AmsiError, ErrorInfo};

/// Semantic version describing the schema of serialized payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SchemaVersion {
    /// Major version incremented for breaking changes.
    pub major: u32,
    /// Minor version incremented for additive changes.
    pub minor: u32,
    /// Patch version incremented for bug fixes.
    pub patch: u32,
}

impl SchemaVersion {
    /// Creates a new schema version descriptor.
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl Default for SchemaVersion {
    fn default() -> Self {
        Self::new(1, 0, 0)
    }
}

/// Provenance information attached to checkpoints and evaluation manifests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RunProvenance {
    /// Schema of the enclosing payload.
    #[serde(default)]
    pub schema_version: SchemaVersion,
    /// Hash of the configuration used to produce the data.
    pub config_hash: String,
    /// Master deterministic seed used for all randomness.
    pub seed: u64,
    /// ISO-8601 timestamp recording when the artefact was generated.
    pub created_at: String,
    /// Version map for all tools involved in the run.
    pub tool_versions: BTreeMap<String, String>,
}

/// Computes a stable hexadecimal SHA-256 hash for a serializable payload.
pub fn stable_hash_string<T: Serialize>(value: &T) -> Result<String, AmsiError> {
    let bytes = serde_json::to_vec(value)
        .map_err(|err| AmsiError::Serde(ErrorInfo::new("json-encode", err.to_string())))?;
    let digest = Sha256::digest(bytes);
    Ok(format!("{:x}", digest))
}
