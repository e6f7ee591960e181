//! Error types for schema evaluation.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Every variant maps to an [`ErrorKind`] so callers can branch on the
//! condition without matching message text.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;

/// The top-level error type for all evaluation operations.
#[derive(Debug, Clone, Error)]
pub enum Error {
    // --- Path resolution ---
    #[error("Target unavailable: cannot resolve '{path}' on an absent container")]
    TargetUnavailable { path: String },

    // --- Array operations ---
    #[error("Not an array: '{key}' requires a sequence, got {found}")]
    NotAnArray { key: String, found: String },

    // --- Structural checks ---
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    // --- Cooperative abort ---
    #[error("Evaluation cancelled")]
    Cancelled,

    // --- Fetch collaborator ---
    #[error("Upstream failed: {message} (status: {status:?})")]
    UpstreamFailed { status: Option<u16>, message: String },

    // --- Operator table ---
    #[error("Unknown operator: {0}")]
    UnknownOperator(String),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(String),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Discriminant of [`Error`], stable across message changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    TargetUnavailable,
    NotAnArray,
    ValidationFailed,
    Cancelled,
    UpstreamFailed,
    UnknownOperator,
    Config,
    Serialization,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::TargetUnavailable => "target_unavailable",
            ErrorKind::NotAnArray => "not_an_array",
            ErrorKind::ValidationFailed => "validation_failed",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::UpstreamFailed => "upstream_failed",
            ErrorKind::UnknownOperator => "unknown_operator",
            ErrorKind::Config => "config",
            ErrorKind::Serialization => "serialization",
            ErrorKind::Internal => "internal",
        }
    }
}

impl Error {
    /// Shorthand for [`Error::ValidationFailed`].
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::ValidationFailed(msg.into())
    }

    /// Build a [`Error::NotAnArray`] describing the offending value.
    pub fn not_an_array(key: impl Into<String>, found: &Value) -> Self {
        Error::NotAnArray {
            key: key.into(),
            found: crate::value::type_name(found).to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::TargetUnavailable { .. } => ErrorKind::TargetUnavailable,
            Error::NotAnArray { .. } => ErrorKind::NotAnArray,
            Error::ValidationFailed(_) => ErrorKind::ValidationFailed,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::UpstreamFailed { .. } => ErrorKind::UpstreamFailed,
            Error::UnknownOperator(_) => ErrorKind::UnknownOperator,
            Error::Config { .. } => ErrorKind::Config,
            Error::Serialization(_) => ErrorKind::Serialization,
            Error::Internal(_) => ErrorKind::Internal,
        }
    }

    /// `true` for the cooperative-abort condition.
    ///
    /// Cancellation is never conflated with a genuine failure: recovery
    /// steps skip it and error policies never swallow it.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// Condition object handed to `onError` recovery schemas.
    pub fn to_value(&self) -> Value {
        let mut descriptor = json!({
            "kind": self.kind().as_str(),
            "message": self.to_string(),
        });
        if let Error::UpstreamFailed {
            status: Some(status),
            ..
        } = self
        {
            descriptor["status"] = json!(status);
        }
        descriptor
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
