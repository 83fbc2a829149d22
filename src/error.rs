//! Error types and the audit reason-code taxonomy.
//!
//! Every failure that can surface on a bundle reference maps onto a
//! [`ReasonCode`], which is what the access-log consumers key on.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reason codes recorded on bundle references in access records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReasonCode {
    /// Evaluation completed and produced the recorded decision.
    #[serde(rename = "POLICY_OUTCOME")]
    PolicyOutcome,

    /// A referenced entity was missing at decision time.
    #[serde(rename = "NOTFOUND_ERROR")]
    NotFound,

    /// Policy compilation failed.
    #[serde(rename = "COMPILATION_ERROR")]
    Compilation,

    /// The evaluator returned no rows, a runtime error, or breached a deadline.
    #[serde(rename = "EVALUATION_ERROR")]
    Evaluation,

    /// Malformed input (non-serializable PORC, wrong types).
    #[serde(rename = "INVALPARAM_ERROR")]
    InvalidParam,

    /// Reserved for remote backends.
    #[serde(rename = "NETWORK_ERROR")]
    Network,

    /// Catch-all.
    #[serde(rename = "UNKNOWN_ERROR")]
    Unknown,
}

impl std::fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ReasonCode::PolicyOutcome => "POLICY_OUTCOME",
            ReasonCode::NotFound => "NOTFOUND_ERROR",
            ReasonCode::Compilation => "COMPILATION_ERROR",
            ReasonCode::Evaluation => "EVALUATION_ERROR",
            ReasonCode::InvalidParam => "INVALPARAM_ERROR",
            ReasonCode::Network => "NETWORK_ERROR",
            ReasonCode::Unknown => "UNKNOWN_ERROR",
        };
        f.write_str(s)
    }
}

/// Library-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("compilation failed: {0}")]
    Compilation(String),

    #[error("evaluation failed: {0}")]
    Evaluation(String),

    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    #[error("network failure: {0}")]
    Network(String),

    #[error("load error: {0}")]
    Load(String),

    #[error("validation failed:\n{0}")]
    Validation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("{0}")]
    Unknown(String),
}

impl Error {
    /// The audit reason code this error surfaces as on a bundle reference.
    pub fn reason_code(&self) -> ReasonCode {
        match self {
            Error::NotFound(_) => ReasonCode::NotFound,
            Error::Compilation(_) => ReasonCode::Compilation,
            Error::Evaluation(_) => ReasonCode::Evaluation,
            Error::InvalidParam(_) | Error::Json(_) => ReasonCode::InvalidParam,
            Error::Network(_) => ReasonCode::Network,
            _ => ReasonCode::Unknown,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
