//! CSV tables and the run manifest.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use amsi_core::errors::{AmsiError, ErrorInfo};
use amsi_core::provenance::{stable_hash_string, RunProvenance, SchemaVersion};
use chrono::Utc;
use csv::{ReaderBuilder, WriterBuilder};
use serde::{Deserialize, Serialize};

use crate::config::EvalConfig;
use crate::consistence::ConsistenceMatrix;
use crate::driver::{IndexFailure, RangeReport};
use crate::record::{MeasureRecord, RECORD_COLUMNS};

fn wrap_csv(code: &str, path: &Path, err: csv::Error) -> AmsiError {
    AmsiError::Serde(ErrorInfo::new(code, err.to_string()).with_context("path", path.display()))
}

fn ensure_parent(path: &Path) -> Result<(), AmsiError> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent).map_err(|err| {
            AmsiError::Serde(ErrorInfo::new("output-mkdir", err.to_string()).with_context("path", parent.display()))
        }),
        _ => Ok(()),
    }
}

/// Appends `records` to the CSV at `path`, writing the header only when the
/// file is created.
pub fn append_records(path: &Path, records: &[MeasureRecord]) -> Result<(), AmsiError> {
    ensure_parent(path)?;
    let file_exists = path.exists();
    let file = OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)
        .map_err(|err| {
            AmsiError::Serde(
                ErrorInfo::new("records-open", "failed to open the measure table")
                    .with_context("path", path.display())
                    .with_hint(err.to_string()),
            )
        })?;
    let mut writer = WriterBuilder::new()
        .has_headers(false)
        .from_writer(BufWriter::new(file));
    if !file_exists {
        writer
            .write_record(RECORD_COLUMNS)
            .map_err(|err| wrap_csv("records-write-header", path, err))?;
    }
    for record in records {
        writer
            .serialize(record)
            .map_err(|err| wrap_csv("records-write-row", path, err))?;
    }
    writer
        .flush()
        .map_err(|err| wrap_csv("records-flush", path, err.into()))
}

/// Reads a measure table written by [`append_records`].
pub fn read_records(path: &Path) -> Result<Vec<MeasureRecord>, AmsiError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(|err| wrap_csv("records-read", path, err))?;
    reader
        .deserialize::<MeasureRecord>()
        .map(|row| row.map_err(|err| wrap_csv("records-row", path, err)))
        .collect()
}

/// `<stem>_<index>.csv` next to `output`.
pub fn consistence_path(output: &Path, index: usize) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    output.with_file_name(format!("{stem}_{index}.csv"))
}

/// Corner cell of the consistence table, naming its orientation.
pub const CONSISTENCE_CORNER: &str = "kl(row||col)";

/// Writes the matrix as a labelled table: one row per mask, one column per
/// mask, cell `(r, c)` holding `KL(p_r || p_c)`.
pub fn write_consistence(path: &Path, matrix: &ConsistenceMatrix) -> Result<(), AmsiError> {
    ensure_parent(path)?;
    let mut writer = WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .map_err(|err| wrap_csv("consistence-open", path, err))?;
    let header = std::iter::once(CONSISTENCE_CORNER.to_string()).chain(matrix.labels.iter().cloned());
    writer
        .write_record(header)
        .map_err(|err| wrap_csv("consistence-write-header", path, err))?;
    for (label, row) in matrix.labels.iter().zip(&matrix.values) {
        let record = std::iter::once(label.clone()).chain(row.iter().map(f64::to_string));
        writer
            .write_record(record)
            .map_err(|err| wrap_csv("consistence-write-row", path, err))?;
    }
    writer
        .flush()
        .map_err(|err| wrap_csv("consistence-flush", path, err.into()))
}

/// Summary of an evaluation run persisted for reproducibility.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalManifest {
    pub provenance: RunProvenance,
    pub config: EvalConfig,
    /// Indices that produced measures.
    pub indices: Vec<usize>,
    pub failures: Vec<IndexFailure>,
    pub cancelled: bool,
}

impl EvalManifest {
    pub fn new(config: &EvalConfig, report: &RangeReport) -> Result<Self, AmsiError> {
        let mut tool_versions = BTreeMap::new();
        tool_versions.insert("amsi-eval".to_string(), env!("CARGO_PKG_VERSION").to_string());
        Ok(Self {
            provenance: RunProvenance {
                schema_version: SchemaVersion::new(1, 0, 0),
                config_hash: stable_hash_string(config)?,
                seed: config.seed_policy.master_seed,
                created_at: Utc::now().to_rfc3339(),
                tool_versions,
            },
            config: config.clone(),
            indices: report.reports.iter().map(|r| r.index).collect(),
            failures: report.failures.clone(),
            cancelled: report.cancelled,
        })
    }

    pub fn store(&self, path: &Path) -> Result<(), AmsiError> {
        ensure_parent(path)?;
        let json = serde_json::to_string_pretty(self)
            .map_err(|err| AmsiError::Serde(ErrorInfo::new("manifest-serialize", err.to_string())))?;
        fs::write(path, json).map_err(|err| {
            AmsiError::Serde(ErrorInfo::new("manifest-write", err.to_string()).with_context("path", path.display()))
        })
    }

    pub fn load(path: &Path) -> Result<Self, AmsiError> {
        let contents = fs::read_to_string(path).map_err(|err| {
            AmsiError::Serde(ErrorInfo::new("manifest-read", err.to_string()).with_context("path", path.display()))
        })?;
        serde_json::from_str(&contents).map_err(|err| {
            AmsiError::Serde(ErrorInfo::new("manifest-parse", err.to_string()).with_context("path", path.display()))
        })
    }
}
