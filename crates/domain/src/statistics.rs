//! Queue statistics and health classification.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::action::ActionStatus;
use crate::id::ActionId;
use crate::settings::HealthThresholds;
use crate::time::Timestamp;

/// Overall queue health, derived from the pending count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueHealth {
    Healthy,
    Active,
    Warning,
    Critical,
}

impl QueueHealth {
    #[must_use]
    pub fn classify(pending: u64, processing: u64, thresholds: HealthThresholds) -> Self {
        if pending > thresholds.critical {
            Self::Critical
        } else if pending > thresholds.warning {
            Self::Warning
        } else if pending > 0 || processing > 0 {
            Self::Active
        } else {
            Self::Healthy
        }
    }
}

/// What a pool worker is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Idle,
    Busy,
    Stopped,
}

/// Snapshot of one pool worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub worker_id: String,
    pub state: WorkerState,
    pub current_action: Option<ActionId>,
    pub processed: u64,
    pub errors: u64,
    pub last_activity: Option<Timestamp>,
}

impl WorkerStatus {
    #[must_use]
    pub fn idle(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            state: WorkerState::Idle,
            current_action: None,
            processed: 0,
            errors: 0,
            last_activity: None,
        }
    }
}

/// Raw aggregates as computed by the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub by_status: BTreeMap<String, u64>,
    pub by_priority: BTreeMap<String, u64>,
    pub by_action_type: BTreeMap<String, u64>,
    pub average_execution_ms: Option<f64>,
    pub oldest_pending_at: Option<Timestamp>,
    pub last_completed_at: Option<Timestamp>,
}

impl QueueCounts {
    #[must_use]
    pub fn status(&self, status: ActionStatus) -> u64 {
        self.by_status.get(status.as_str()).copied().unwrap_or(0)
    }
}

/// Point-in-time view of the whole queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueStatistics {
    pub total: u64,
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
    pub retrying: u64,
    pub cancelled: u64,
    pub timeout: u64,
    pub by_priority: BTreeMap<String, u64>,
    pub by_action_type: BTreeMap<String, u64>,
    pub average_execution_ms: Option<f64>,
    /// `completed / (completed + failed)`, `None` while both are zero.
    pub success_rate: Option<f64>,
    pub oldest_pending_at: Option<Timestamp>,
    pub last_completed_at: Option<Timestamp>,
    pub health: QueueHealth,
    pub workers: Vec<WorkerStatus>,
}

impl QueueStatistics {
    #[must_use]
    pub fn from_counts(
        counts: QueueCounts,
        thresholds: HealthThresholds,
        workers: Vec<WorkerStatus>,
    ) -> Self {
        let pending = counts.status(ActionStatus::Pending);
        let processing = counts.status(ActionStatus::Processing);
        let completed = counts.status(ActionStatus::Completed);
        let failed = counts.status(ActionStatus::Failed);
        let finished = completed + failed;
        #[allow(clippy::cast_precision_loss)]
        let success_rate = (finished > 0).then(|| completed as f64 / finished as f64);
        Self {
            total: counts.by_status.values().sum(),
            pending,
            processing,
            completed,
            failed,
            retrying: counts.status(ActionStatus::Retrying),
            cancelled: counts.status(ActionStatus::Cancelled),
            timeout: counts.status(ActionStatus::Timeout),
            success_rate,
            health: QueueHealth::classify(pending, processing, thresholds),
            by_priority: counts.by_priority,
            by_action_type: counts.by_action_type,
            average_execution_ms: counts.average_execution_ms,
            oldest_pending_at: counts.oldest_pending_at,
            last_completed_at: counts.last_completed_at,
            workers,
        }
    }

    /// Sum of the per-status counters.
    #[must_use]
    pub fn status_sum(&self) -> u64 {
        self.pending
            + self.processing
            + self.completed
            + self.failed
            + self.retrying
            + self.cancelled
            + self.timeout
    }
}
