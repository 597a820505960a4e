//! The retry controller.
//!
//! Every gated stage runs through [`run_with_retry`]: invoke, evaluate with a
//! [`Gate`], then proceed, pause and try again, or abort.

use super::gate::{Decision, Gate};
use crate::core::StageResult;
use crate::errors::AbortReason;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Attempt budget and pause for one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum attempts, including the first one. Must be at least 1.
    pub max_attempts: usize,
    /// Pause between attempts in milliseconds.
    #[serde(default)]
    pub delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_ms: 0,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with no delay.
    #[must_use]
    pub fn new(max_attempts: usize) -> Self {
        Self {
            max_attempts,
            delay_ms: 0,
        }
    }

    /// A single attempt, used for stages that are not gated.
    #[must_use]
    pub fn once() -> Self {
        Self::new(1)
    }

    /// Sets the delay between attempts.
    #[must_use]
    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    /// The delay between attempts.
    #[must_use]
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    /// Validates the policy.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts < 1 {
            return Err("max_attempts must be >= 1".to_string());
        }
        Ok(())
    }
}

/// A result the gate allowed through.
#[derive(Debug, Clone, PartialEq)]
pub struct GatedResult {
    /// The accepted result.
    pub result: StageResult,
    /// Attempts consumed, including the successful one.
    pub attempts: usize,
    /// Reasons given for each retry, in order.
    pub retry_reasons: Vec<String>,
}

impl GatedResult {
    /// Number of retries consumed.
    #[must_use]
    pub fn retries(&self) -> usize {
        self.attempts.saturating_sub(1)
    }
}

/// A stage the gate refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryAbort {
    /// Why the stage was aborted.
    pub reason: AbortReason,
    /// Attempts consumed.
    pub attempts: usize,
    /// Reasons given for each retry before the abort.
    pub retry_reasons: Vec<String>,
}

/// Runs `invoker` until the gate lets a result through or aborts.
///
/// The invoker receives the 0-indexed attempt number. At most
/// `policy.max_attempts` invocations happen; an `Abort` stops the loop at
/// once. The pause between attempts is a `tokio` sleep, so other tasks keep
/// running.
pub async fn run_with_retry<G, F, Fut>(
    policy: &RetryPolicy,
    gate: &G,
    mut invoker: F,
) -> Result<GatedResult, RetryAbort>
where
    G: Gate + ?Sized,
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = StageResult>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut retry_reasons = Vec::new();

    for attempt in 0..max_attempts {
        let result = invoker(attempt).await;

        match gate.evaluate(&result, attempt) {
            Decision::Proceed => {
                return Ok(GatedResult {
                    result,
                    attempts: attempt + 1,
                    retry_reasons,
                });
            }
            Decision::Retry(reason) => {
                tracing::debug!(
                    attempt = attempt + 1,
                    max_attempts,
                    delay_ms = policy.delay_ms,
                    reason = %reason,
                    "Retrying stage"
                );
                retry_reasons.push(reason);
                if attempt + 1 < max_attempts && policy.delay_ms > 0 {
                    tokio::time::sleep(policy.delay()).await;
                }
            }
            Decision::Abort(reason) => {
                return Err(RetryAbort {
                    reason,
                    attempts: attempt + 1,
                    retry_reasons,
                });
            }
        }
    }

    Err(RetryAbort {
        reason: AbortReason::exhausted(),
        attempts: max_attempts,
        retry_reasons,
    })
}
