//! Retry policy — what happens to an action after a failed attempt.

use serde::{Deserialize, Serialize};

use crate::action::QueuedAction;
use crate::time::{Timestamp, after_millis};

/// Exponential backoff parameters resolved for one action.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

/// Decision for a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RetryDecision {
    Retry {
        attempt: u32,
        delay_ms: u64,
        next_retry_at: Timestamp,
    },
    Exhausted,
}

impl RetryPolicy {
    /// Delay before the retry that follows the `retry_count`-th failure:
    /// `base_delay_ms * factor^retry_count`, capped at `max_delay_ms`.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn delay_ms(&self, factor: f64, retry_count: u32) -> u64 {
        let exponent = i32::try_from(retry_count).unwrap_or(i32::MAX);
        let raw = self.base_delay_ms as f64 * factor.powi(exponent);
        if !raw.is_finite() || raw >= self.max_delay_ms as f64 {
            return self.max_delay_ms;
        }
        raw.round() as u64
    }

    /// Decide the next step after `action` failed with a retryable error at `now`.
    #[must_use]
    pub fn decide(&self, action: &QueuedAction, now: Timestamp) -> RetryDecision {
        if !action.can_retry() {
            return RetryDecision::Exhausted;
        }
        let attempt = action.retry_count + 1;
        let delay_ms = self.delay_ms(action.retry_backoff_factor, attempt);
        RetryDecision::Retry {
            attempt,
            delay_ms,
            next_retry_at: after_millis(now, delay_ms),
        }
    }
}
