//! Action results — the append-only history of execution attempts.

use serde::{Deserialize, Serialize};

use crate::action::{ActionStatus, QueuedAction};
use crate::execution::ExecutionReport;
use crate::id::{ActionId, ActionResultId};
use crate::time::Timestamp;

/// One execution attempt. Never updated once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub id: ActionResultId,
    pub action_id: ActionId,
    pub attempt_number: u32,
    /// Status the action was left in by this attempt.
    pub status: ActionStatus,
    pub started_at: Option<Timestamp>,
    pub completed_at: Timestamp,
    pub duration_ms: u64,
    pub success: bool,
    pub result_data: Option<serde_json::Value>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub worker_id: Option<String>,
    pub execution_context: Option<serde_json::Value>,
}

impl ActionResult {
    /// Build the attempt record from the claimed snapshot of `action`.
    #[must_use]
    pub fn record(
        action: &QueuedAction,
        worker_id: &str,
        report: &ExecutionReport,
        status: ActionStatus,
        completed_at: Timestamp,
    ) -> Self {
        let (result_data, error_code, error_message) = match &report.outcome {
            Ok(data) => (data.clone(), None, None),
            Err(err) => (None, err.code.clone(), Some(err.message.clone())),
        };
        Self {
            id: ActionResultId::new(),
            action_id: action.id,
            attempt_number: action.retry_count + 1,
            status,
            started_at: action.started_at,
            completed_at,
            duration_ms: report.duration_ms,
            success: report.is_success(),
            result_data,
            error_code,
            error_message,
            worker_id: Some(worker_id.to_string()),
            execution_context: report.context.clone(),
        }
    }
}
