//! Execution reports — what a worker hands back after running an action.

use serde::{Deserialize, Serialize};

use crate::time::Timestamp;

/// Failure reported by the handler that executed an action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{message}")]
pub struct ExecutionError {
    pub code: Option<String>,
    pub message: String,
    pub details: Option<serde_json::Value>,
    /// `false` fails the action immediately, whatever its retry budget.
    pub retryable: bool,
}

impl ExecutionError {
    /// A retryable failure.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
            details: None,
            retryable: true,
        }
    }

    /// A failure that must not be retried.
    #[must_use]
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            retryable: false,
            ..Self::new(message)
        }
    }

    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// One attempt's outcome, as reported through `complete`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub outcome: Result<Option<serde_json::Value>, ExecutionError>,
    pub duration_ms: u64,
    /// Free-form context stored with the attempt (host, handler, ...).
    pub context: Option<serde_json::Value>,
}

impl ExecutionReport {
    #[must_use]
    pub fn success(result_data: Option<serde_json::Value>, duration_ms: u64) -> Self {
        Self {
            outcome: Ok(result_data),
            duration_ms,
            context: None,
        }
    }

    #[must_use]
    pub fn failure(error: ExecutionError, duration_ms: u64) -> Self {
        Self {
            outcome: Err(error),
            duration_ms,
            context: None,
        }
    }

    #[must_use]
    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = Some(context);
        self
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// What `complete` did with the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CompletionOutcome {
    Completed,
    Retrying {
        retry_count: u32,
        next_retry_at: Timestamp,
    },
    Failed {
        /// `false` when the error was not retryable.
        retries_exhausted: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_be_retryable_by_default() {
        let err = ExecutionError::new("device unreachable");
        assert!(err.retryable);
        assert_eq!(err.to_string(), "device unreachable");
    }

    #[test]
    fn should_mark_permanent_errors_not_retryable() {
        let err = ExecutionError::permanent("bad payload").with_code("E_PAYLOAD");
        assert!(!err.retryable);
        assert_eq!(err.code.as_deref(), Some("E_PAYLOAD"));
    }

    #[test]
    fn should_report_success_flag() {
        assert!(ExecutionReport::success(None, 3).is_success());
        assert!(!ExecutionReport::failure(ExecutionError::new("x"), 3).is_success());
    }
}
