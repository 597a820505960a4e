//! Assertions for stage results and pipeline reports.

use crate::core::{StageName, StageResult};
use crate::errors::{FailureKind, PipelineError};

/// Asserts that a result can be handed to the next stage.
///
/// # Panics
///
/// Panics if the result carries an error or is invalid.
pub fn assert_usable(result: &StageResult) {
    assert!(
        result.is_usable(),
        "Expected usable result, got failure: {:?}",
        result.failure_reason()
    );
}

/// Asserts that a checker result is invalid and its reason contains `text`.
///
/// # Panics
///
/// Panics if the result is not invalid or the reason does not match.
pub fn assert_invalid_with(result: &StageResult, text: &str) {
    assert!(result.is_invalid(), "Expected invalid result, got {result:?}");
    let reason = result.reason_message.as_deref().unwrap_or_default();
    assert!(
        reason.contains(text),
        "Expected reason containing '{text}', got '{reason}'"
    );
}

/// Asserts that a run was aborted at `stage` with `kind`.
///
/// # Panics
///
/// Panics if the error is not a stage abort or does not match.
pub fn assert_aborted_at(error: &PipelineError, stage: StageName, kind: FailureKind) {
    match error {
        PipelineError::StageAborted {
            stage: actual,
            reason,
            ..
        } => {
            assert_eq!(*actual, stage, "Aborted at '{actual}', expected '{stage}'");
            assert_eq!(reason.kind, kind, "Abort kind mismatch: {reason}");
        }
        other => panic!("Expected stage '{stage}' to abort, got: {other}"),
    }
}
