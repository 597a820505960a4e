//! Error types for sheetflow.
//!
//! Failures that stop a run are reported as [`PipelineError`]. Collaborator
//! faults are [`CollaboratorError`]s and get folded into stage results before
//! the gate sees them.

use crate::core::StageName;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// The main error type for sheetflow operations.
#[derive(Debug, Error)]
pub enum SheetflowError {
    /// A pipeline run failed.
    #[error("{0}")]
    Pipeline(#[from] PipelineError),

    /// A collaborator failed outside of a pipeline run.
    #[error("{0}")]
    Collaborator(#[from] CollaboratorError),

    /// Configuration was invalid.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// CSV reading or writing failed.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why a gated stage gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The collaborator failed or returned an explicit error.
    Collaborator,
    /// A checker kept reporting the payload as invalid.
    Validation,
    /// The sink reported an append point that does not fit the row groups.
    InconsistentState,
    /// The gate never allowed the stage to proceed.
    Exhausted,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Collaborator => write!(f, "collaborator error"),
            Self::Validation => write!(f, "validation failure"),
            Self::InconsistentState => write!(f, "inconsistent state"),
            Self::Exhausted => write!(f, "attempts exhausted"),
        }
    }
}

/// The reason a stage was aborted by the gate or the retry controller.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct AbortReason {
    /// The failure category.
    pub kind: FailureKind,
    /// The last reason reported for the stage.
    pub message: String,
}

impl AbortReason {
    /// Creates a new abort reason.
    #[must_use]
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Abort caused by a collaborator error.
    #[must_use]
    pub fn collaborator(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Collaborator, message)
    }

    /// Abort raised when the retry loop ran out of attempts.
    #[must_use]
    pub fn exhausted() -> Self {
        Self::new(FailureKind::Exhausted, "attempts exhausted")
    }
}

/// Errors that end a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A stage was aborted.
    #[error("Stage '{stage}' aborted after {attempts} attempt(s): {reason}")]
    StageAborted {
        /// The stage that failed.
        stage: StageName,
        /// Why it failed.
        reason: AbortReason,
        /// Attempts consumed before the abort.
        attempts: usize,
    },

    /// A stage produced a payload the next stage cannot use.
    #[error("Stage '{stage}' produced unusable output: {message}")]
    UnexpectedContent {
        /// The producing stage.
        stage: StageName,
        /// What was wrong.
        message: String,
    },

    /// A stage read a ledger entry it did not declare.
    #[error("{0}")]
    UndeclaredDependency(#[from] UndeclaredDependencyError),

    /// A stage was recorded twice.
    #[error("{0}")]
    LedgerConflict(#[from] LedgerConflictError),

    /// Writing a snapshot file failed.
    #[error("Failed to write snapshot '{path}': {source}")]
    Snapshot {
        /// The snapshot path.
        path: PathBuf,
        /// The IO error.
        #[source]
        source: std::io::Error,
    },

    /// The modified table could not be parsed as CSV.
    #[error("Stage '{stage}' returned malformed CSV: {source}")]
    MalformedCsv {
        /// The stage whose output was parsed.
        stage: StageName,
        /// The CSV error.
        #[source]
        source: csv::Error,
    },

    /// Configuration was invalid.
    #[error("{0}")]
    Config(#[from] ConfigError),
}

impl PipelineError {
    /// Creates a stage-aborted error.
    #[must_use]
    pub fn aborted(stage: StageName, reason: AbortReason, attempts: usize) -> Self {
        Self::StageAborted {
            stage,
            reason,
            attempts,
        }
    }

    /// Returns the stage that failed, if the error is tied to one.
    #[must_use]
    pub fn stage(&self) -> Option<StageName> {
        match self {
            Self::StageAborted { stage, .. }
            | Self::UnexpectedContent { stage, .. }
            | Self::MalformedCsv { stage, .. } => Some(*stage),
            Self::UndeclaredDependency(err) => Some(err.stage),
            Self::LedgerConflict(err) => Some(err.stage),
            Self::Snapshot { .. } | Self::Config(_) => None,
        }
    }

    /// Returns the failure kind for aborted stages.
    #[must_use]
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::StageAborted { reason, .. } => Some(reason.kind),
            _ => None,
        }
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("message".to_string(), serde_json::json!(self.to_string()));
        if let Some(stage) = self.stage() {
            map.insert("stage".to_string(), serde_json::json!(stage));
        }
        if let Self::StageAborted { reason, attempts, .. } = self {
            map.insert("kind".to_string(), serde_json::json!(reason.kind));
            map.insert("reason".to_string(), serde_json::json!(reason.message));
            map.insert("attempts".to_string(), serde_json::json!(attempts));
        }
        map
    }
}

/// Errors raised by collaborators before a structured result exists.
#[derive(Debug, Clone, Error)]
pub enum CollaboratorError {
    /// The request could not be delivered or timed out.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The remote side answered with a non-success status.
    #[error("Collaborator returned HTTP {status}: {body}")]
    Status {
        /// The HTTP status code.
        status: u16,
        /// The response body, possibly truncated.
        body: String,
    },

    /// The answer was not a valid stage result.
    #[error("Could not decode collaborator response: {0}")]
    Decode(String),

    /// The request was missing data the collaborator needs.
    #[error("Collaborator '{collaborator}' needs {expected}")]
    MissingAttachment {
        /// The collaborator name.
        collaborator: String,
        /// A description of the expected attachment.
        expected: String,
    },

    /// A local collaborator failed.
    #[error("Collaborator '{collaborator}' failed: {reason}")]
    Local {
        /// The collaborator name.
        collaborator: String,
        /// The reason for failure.
        reason: String,
    },
}

impl CollaboratorError {
    /// Creates a missing attachment error.
    #[must_use]
    pub fn missing_attachment(collaborator: impl Into<String>, expected: impl Into<String>) -> Self {
        Self::MissingAttachment {
            collaborator: collaborator.into(),
            expected: expected.into(),
        }
    }

    /// Creates a local failure.
    #[must_use]
    pub fn local(collaborator: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::Local {
            collaborator: collaborator.into(),
            reason: reason.to_string(),
        }
    }
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        /// The config path.
        path: PathBuf,
        /// The IO error.
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid JSON for the expected shape.
    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    /// A value failed validation.
    #[error("Config validation failed: {message}")]
    Validation {
        /// What is wrong.
        message: String,
    },

    /// A task template references an unknown placeholder.
    #[error("Task template for '{stage}' uses unknown placeholder '{{{placeholder}}}'")]
    UnknownPlaceholder {
        /// The stage the template belongs to.
        stage: StageName,
        /// The unknown placeholder name.
        placeholder: String,
    },

    /// A collaborator kind is not available in this build.
    #[error("Collaborator type '{0}' is not available in this build")]
    Unsupported(String),
}

impl ConfigError {
    /// Creates a validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}

/// Error raised when a stage reads a ledger entry it did not declare.
#[derive(Debug, Clone, Error)]
#[error("Undeclared dependency: stage '{stage}' attempted to read '{key}' which was not declared as an input")]
pub struct UndeclaredDependencyError {
    /// The stage attempting access.
    pub stage: StageName,
    /// The undeclared stage.
    pub key: StageName,
}

impl UndeclaredDependencyError {
    /// Creates a new undeclared dependency error.
    #[must_use]
    pub fn new(stage: StageName, key: StageName) -> Self {
        Self { stage, key }
    }
}

/// Error raised when a stage is recorded twice in one run.
#[derive(Debug, Clone, Error)]
#[error("Ledger conflict: stage '{stage}' was already recorded")]
pub struct LedgerConflictError {
    /// The conflicting stage.
    pub stage: StageName,
}

impl LedgerConflictError {
    /// Creates a new ledger conflict error.
    #[must_use]
    pub fn new(stage: StageName) -> Self {
        Self { stage }
    }
}
