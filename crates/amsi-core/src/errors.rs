//! Structured error types shared across AMSI crates.

use std::collections::BTreeMap;
use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured payload attached to every [`AmsiError`] variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable machine readable error code.
    pub code: String,
    /// Human readable diagnostic message.
    pub message: String,
    /// Contextual key value pairs (dimensions, sizes, limits, etc.).
    #[serde(default)]
    pub context: BTreeMap<String, String>,
    /// Optional hint that may help the caller resolve the issue.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl ErrorInfo {
    /// Creates a new error payload with the provided code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            context: BTreeMap::new(),
            hint: None,
        }
    }

    /// Adds a context entry to the payload.
    pub fn with_context(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.context.insert(key.into(), value.to_string());
        self
    }

    /// Sets a human readable hint for remediation.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

/// Canonical error type for the AMSI engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "family", content = "detail")]
pub enum AmsiError {
    /// Total mass is zero or non-finite, so the histogram cannot be normalized.
    #[error("degenerate distribution: {0}")]
    Degenerate(ErrorInfo),
    /// A joint bin count or transport problem exceeds its configured limit.
    #[error("size limit exceeded: {0}")]
    SizeLimit(ErrorInfo),
    /// The mask selects no dimension or does not match the parameter count.
    #[error("unsupported mask: {0}")]
    Mask(ErrorInfo),
    /// Grid, coordinate or histogram shape errors.
    #[error("shape error: {0}")]
    Shape(ErrorInfo),
    /// A density or prior collaborator broke its contract.
    #[error("sampling error: {0}")]
    Sampling(ErrorInfo),
    /// Serialization, schema and file errors.
    #[error("serde error: {0}")]
    Serde(ErrorInfo),
}

impl Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code: {})", self.message, self.code)?;
        if !self.context.is_empty() {
            write!(f, " | context: [")?;
            for (idx, (key, value)) in self.context.iter().enumerate() {
                if idx > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{key}={value}")?;
            }
            write!(f, "]")?;
        }
        if let Some(hint) = &self.hint {
            write!(f, " | hint: {hint}")?;
        }
        Ok(())
    }
}

impl AmsiError {
    /// Returns a reference to the payload describing the error.
    pub fn info(&self) -> &ErrorInfo {
        match self {
            AmsiError::Degenerate(info)
            | AmsiError::SizeLimit(info)
            | AmsiError::Mask(info)
            | AmsiError::Shape(info)
            | AmsiError::Sampling(info)
            | AmsiError::Serde(info) => info,
        }
    }

    /// Stable family name, matching the serialized `family` tag.
    pub fn family(&self) -> &'static str {
        match self {
            AmsiError::Degenerate(_) => "Degenerate",
            AmsiError::SizeLimit(_) => "SizeLimit",
            AmsiError::Mask(_) => "Mask",
            AmsiError::Shape(_) => "Shape",
            AmsiError::Sampling(_) => "Sampling",
            AmsiError::Serde(_) => "Serde",
        }
    }

    /// Whether the error only invalidates a single evaluation index.
    ///
    /// Serialization failures usually mean the output location is broken and
    /// affect every subsequent index as well.
    pub fn is_local(&self) -> bool {
        !matches!(self, AmsiError::Serde(_))
    }
}
