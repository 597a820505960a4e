//! Result gate: decides whether a stage proceeds, retries or aborts.

use super::retry::RetryPolicy;
use super::row_group::RowGroupValidator;
use crate::core::{StageKind, StageResult};
use crate::errors::{AbortReason, FailureKind};

/// The outcome of evaluating one stage result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Hand the result to the next stage.
    Proceed,
    /// Run the same stage again; carries the reason for the retry.
    Retry(String),
    /// Stop the run.
    Abort(AbortReason),
}

impl Decision {
    /// Returns true for [`Decision::Proceed`].
    #[must_use]
    pub fn is_proceed(&self) -> bool {
        matches!(self, Self::Proceed)
    }
}

/// Decides what to do with a stage result on a given attempt (0-indexed).
pub trait Gate: Send + Sync {
    /// Evaluates the result. Must be free of side effects.
    fn evaluate(&self, result: &StageResult, attempt: usize) -> Decision;
}

impl<F> Gate for F
where
    F: Fn(&StageResult, usize) -> Decision + Send + Sync,
{
    fn evaluate(&self, result: &StageResult, attempt: usize) -> Decision {
        self(result, attempt)
    }
}

/// The standard gate used by the pipeline driver.
///
/// Errors from fetch, transform, locate and append collaborators abort at
/// once. Invalid checker results, checker errors and rejected append points
/// retry until the last attempt, then abort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResultGate {
    max_attempts: usize,
    row_groups: Option<RowGroupValidator>,
}

impl ResultGate {
    /// Creates a gate allowing `max_attempts` attempts.
    #[must_use]
    pub fn new(max_attempts: usize) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            row_groups: None,
        }
    }

    /// Creates a gate matching a retry policy.
    #[must_use]
    pub fn for_policy(policy: &RetryPolicy) -> Self {
        Self::new(policy.max_attempts)
    }

    /// Enables append-point validation for locate results.
    #[must_use]
    pub fn with_row_groups(mut self, validator: RowGroupValidator) -> Self {
        self.row_groups = Some(validator);
        self
    }

    /// The attempt budget of this gate.
    #[must_use]
    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    fn retry_or_abort(&self, attempt: usize, kind: FailureKind, reason: String) -> Decision {
        if attempt + 1 < self.max_attempts {
            Decision::Retry(reason)
        } else {
            Decision::Abort(AbortReason::new(
                kind,
                format!("max retries exceeded (last reason: {reason})"),
            ))
        }
    }

    fn evaluate_append_point(&self, result: &StageResult, attempt: usize) -> Decision {
        let Some(validator) = self.row_groups else {
            return Decision::Proceed;
        };
        let Some(point) = result.content.append_point() else {
            return self.retry_or_abort(
                attempt,
                FailureKind::InconsistentState,
                "locator returned no append point".to_string(),
            );
        };
        if !validator.is_in_expected_group(point.next_row) {
            return self.retry_or_abort(
                attempt,
                FailureKind::InconsistentState,
                format!("row {} is not a valid append point", point.next_row),
            );
        }
        if validator.header_contradicts(&point) {
            return self.retry_or_abort(
                attempt,
                FailureKind::InconsistentState,
                format!(
                    "header flag {:?} contradicts append row {}",
                    point.header_present, point.next_row
                ),
            );
        }
        Decision::Proceed
    }
}

impl Gate for ResultGate {
    fn evaluate(&self, result: &StageResult, attempt: usize) -> Decision {
        if let Some(error) = &result.error_message {
            if result.origin.retries_on_error() {
                return self.retry_or_abort(attempt, FailureKind::Collaborator, error.clone());
            }
            return Decision::Abort(AbortReason::collaborator(error.clone()));
        }

        if result.is_invalid() {
            let reason = result
                .reason_message
                .clone()
                .unwrap_or_else(|| "no reason given".to_string());
            let kind = match result.origin {
                StageKind::Locate => FailureKind::InconsistentState,
                _ => FailureKind::Validation,
            };
            return self.retry_or_abort(attempt, kind, reason);
        }

        if result.origin == StageKind::Locate {
            return self.evaluate_append_point(result, attempt);
        }

        Decision::Proceed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{AppendPoint, StageKind};

    fn abort_kind(decision: &Decision) -> Option<FailureKind> {
        match decision {
            Decision::Abort(reason) => Some(reason.kind),
            _ => None,
        }
    }

    #[test]
    fn test_usable_results_proceed() {
        let gate = ResultGate::new(3);
        assert!(gate.evaluate(&StageResult::text("a,b"), 0).is_proceed());
        assert!(gate
            .evaluate(&StageResult::valid().with_origin(StageKind::Checker), 2)
            .is_proceed());
    }

    #[test]
    fn test_non_checker_error_aborts_immediately() {
        let gate = ResultGate::new(3);
        for origin in [StageKind::Fetch, StageKind::Transform, StageKind::Append, StageKind::Locate] {
            let result = StageResult::failed("connection reset").with_origin(origin);
            let decision = gate.evaluate(&result, 0);
            assert_eq!(abort_kind(&decision), Some(FailureKind::Collaborator), "{origin}");
        }
    }

    #[test]
    fn test_invalid_checker_retries_then_aborts() {
        let gate = ResultGate::new(3);
        let result = StageResult::invalid("19 data rows").with_origin(StageKind::Checker);

        assert_eq!(gate.evaluate(&result, 0), Decision::Retry("19 data rows".to_string()));
        assert_eq!(gate.evaluate(&result, 1), Decision::Retry("19 data rows".to_string()));

        let last = gate.evaluate(&result, 2);
        assert_eq!(abort_kind(&last), Some(FailureKind::Validation));
        if let Decision::Abort(reason) = last {
            assert!(reason.message.starts_with("max retries exceeded"));
            assert!(reason.message.contains("19 data rows"));
        }
    }

    #[test]
    fn test_checker_error_is_retryable() {
        let gate = ResultGate::new(2);
        let result = StageResult::failed("model timeout").with_origin(StageKind::Checker);
        assert_eq!(gate.evaluate(&result, 0), Decision::Retry("model timeout".to_string()));
        assert_eq!(abort_kind(&gate.evaluate(&result, 1)), Some(FailureKind::Collaborator));
    }

    #[test]
    fn test_single_attempt_gate_aborts_first_invalid() {
        let gate = ResultGate::new(1);
        let result = StageResult::invalid("bad").with_origin(StageKind::Checker);
        assert_eq!(abort_kind(&gate.evaluate(&result, 0)), Some(FailureKind::Validation));
    }

    #[test]
    fn test_append_point_validation() {
        let gate = ResultGate::new(3).with_row_groups(RowGroupValidator::default());
        let locate = |point: AppendPoint| StageResult::append_point(point).with_origin(StageKind::Locate);

        assert!(gate.evaluate(&locate(AppendPoint::new(22)), 0).is_proceed());
        assert!(gate.evaluate(&locate(AppendPoint::new(1)), 0).is_proceed());
        assert!(matches!(gate.evaluate(&locate(AppendPoint::new(23)), 0), Decision::Retry(_)));
        assert_eq!(
            abort_kind(&gate.evaluate(&locate(AppendPoint::new(23)), 2)),
            Some(FailureKind::InconsistentState)
        );

        let contradictory = locate(AppendPoint::new(42).with_header_present(false));
        assert!(matches!(gate.evaluate(&contradictory, 0), Decision::Retry(_)));
    }

    #[test]
    fn test_headerless_append_points() {
        let gate = ResultGate::new(3).with_row_groups(RowGroupValidator::new(20).with_header_rows(0));
        let locate = |point: AppendPoint| StageResult::append_point(point).with_origin(StageKind::Locate);

        assert!(gate.evaluate(&locate(AppendPoint::new(21).with_header_present(false)), 0).is_proceed());
        assert!(gate.evaluate(&locate(AppendPoint::new(41)), 0).is_proceed());
        assert!(matches!(gate.evaluate(&locate(AppendPoint::new(22)), 0), Decision::Retry(_)));
    }

    #[test]
    fn test_locate_without_point_is_inconsistent() {
        let gate = ResultGate::new(1).with_row_groups(RowGroupValidator::default());
        let result = StageResult::text("no idea").with_origin(StageKind::Locate);
        assert_eq!(abort_kind(&gate.evaluate(&result, 0)), Some(FailureKind::InconsistentState));
    }

    #[test]
    fn test_closure_gate() {
        let gate = |result: &StageResult, attempt: usize| {
            if attempt == 0 && result.is_usable() {
                Decision::Retry("always once".to_string())
            } else {
                Decision::Proceed
            }
        };
        assert!(matches!(gate.evaluate(&StageResult::valid(), 0), Decision::Retry(_)));
        assert!(gate.evaluate(&StageResult::valid(), 1).is_proceed());
    }
}
