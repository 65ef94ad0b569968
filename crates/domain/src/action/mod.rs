//! Queued action — one submitted unit of work and its full lifecycle record.
//!
//! A [`QueuedAction`] is created `pending` by [`NewAction`] submission and is
//! afterwards mutated only through [`StatusChange`]s, each applied as a single
//! guarded write (see [`TransitionGuard`]). The storage adapter mirrors
//! [`QueuedAction::apply`] in SQL so both stores agree on every field.

mod status;
mod submission;

pub use status::{ActionStatus, UnknownStatus};
pub use submission::{ActionUpdate, NewAction, NewActionBuilder, required_payload_fields};

use serde::{Deserialize, Serialize};

use crate::catalog::{ActionTypeId, PriorityId};
use crate::id::ActionId;
use crate::time::{Timestamp, gate_open};

/// A unit of work in the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedAction {
    pub id: ActionId,
    pub action_type_id: ActionTypeId,
    pub priority_id: PriorityId,
    pub status: ActionStatus,
    pub name: String,
    pub description: Option<String>,
    pub user_id: Option<i64>,
    pub correlation_id: Option<String>,
    pub parent_action_id: Option<ActionId>,
    /// Opaque to the queue; interpreted by the dispatcher.
    pub payload: serde_json::Value,
    pub target_entity_id: Option<String>,
    pub timeout_seconds: i64,
    pub max_retries: u32,
    pub retry_count: u32,
    pub retry_backoff_factor: f64,
    pub scheduled_at: Option<Timestamp>,
    pub execute_after: Option<Timestamp>,
    pub deadline: Option<Timestamp>,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub last_attempt_at: Option<Timestamp>,
    pub next_retry_at: Option<Timestamp>,
    pub result_data: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub error_details: Option<serde_json::Value>,
    /// Worker holding the current (or last) claim.
    pub claimed_by: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub created_by: Option<String>,
    pub execution_duration_ms: Option<u64>,
    /// Bumped on every write; used as the optimistic-concurrency token.
    pub version: u32,
}

impl QueuedAction {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether another failure would still be retried.
    #[must_use]
    pub fn can_retry(&self) -> bool {
        self.retry_count + 1 < self.max_retries
    }

    /// The deadline has passed (deadline is exclusive: ready requires `deadline > now`).
    #[must_use]
    pub fn is_overdue(&self, now: Timestamp) -> bool {
        self.deadline.is_some_and(|deadline| deadline <= now)
    }

    /// A claimed action has run longer than its `timeout_seconds`.
    #[must_use]
    pub fn execution_timed_out(&self, now: Timestamp) -> bool {
        if self.status != ActionStatus::Processing || self.timeout_seconds <= 0 {
            return false;
        }
        // a limit past the representable range never elapses
        self.started_at.is_some_and(|started| {
            chrono::Duration::try_seconds(self.timeout_seconds)
                .and_then(|limit| started.checked_add_signed(limit))
                .is_some_and(|expires_at| expires_at <= now)
        })
    }

    /// Time gates only: schedule, execute-after, retry delay and deadline.
    #[must_use]
    pub fn time_gates_open(&self, now: Timestamp) -> bool {
        gate_open(self.scheduled_at, now)
            && gate_open(self.execute_after, now)
            && gate_open(self.next_retry_at, now)
            && !self.is_overdue(now)
    }

    /// The guard a write of `change` must hold against this exact snapshot.
    #[must_use]
    pub fn guard_for(&self, change: &StatusChange) -> TransitionGuard {
        TransitionGuard {
            statuses: change.allowed_from().to_vec(),
            version: Some(self.version),
        }
    }

    /// Apply `change` in place at time `at`.
    ///
    /// Callers are expected to have checked the guard; this only mutates fields.
    pub fn apply(&mut self, change: &StatusChange, at: Timestamp) {
        self.status = change.target();
        self.updated_at = at;
        self.version += 1;
        match change {
            StatusChange::Claim { worker_id } => {
                self.started_at = Some(at);
                self.last_attempt_at = Some(at);
                self.claimed_by = Some(worker_id.clone());
            }
            StatusChange::Complete {
                result_data,
                duration_ms,
            } => {
                self.completed_at = Some(at);
                self.result_data.clone_from(result_data);
                self.error_message = None;
                self.error_details = None;
                self.execution_duration_ms = Some(*duration_ms);
            }
            StatusChange::Retry {
                next_retry_at,
                error_message,
                error_details,
                duration_ms,
            } => {
                self.retry_count = (self.retry_count + 1).min(self.max_retries);
                self.next_retry_at = Some(*next_retry_at);
                self.error_message = Some(error_message.clone());
                self.error_details.clone_from(error_details);
                self.execution_duration_ms = Some(*duration_ms);
            }
            StatusChange::Fail {
                error_message,
                error_details,
                duration_ms,
            } => {
                self.retry_count = (self.retry_count + 1).min(self.max_retries);
                self.completed_at = Some(at);
                self.error_message = Some(error_message.clone());
                self.error_details.clone_from(error_details);
                self.execution_duration_ms = Some(*duration_ms);
            }
            StatusChange::Cancel { reason } => {
                self.completed_at = Some(at);
                if reason.is_some() {
                    self.error_message.clone_from(reason);
                }
            }
            StatusChange::Timeout { reason } => {
                self.completed_at = Some(at);
                self.error_message = Some(reason.clone());
            }
        }
    }
}

/// A lifecycle transition and the fields it writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StatusChange {
    /// `pending | retrying → processing`.
    Claim { worker_id: String },
    /// `processing → completed`.
    Complete {
        result_data: Option<serde_json::Value>,
        duration_ms: u64,
    },
    /// `processing → retrying`, bumping `retry_count`.
    Retry {
        next_retry_at: Timestamp,
        error_message: String,
        error_details: Option<serde_json::Value>,
        duration_ms: u64,
    },
    /// `processing → failed`, the final attempt.
    Fail {
        error_message: String,
        error_details: Option<serde_json::Value>,
        duration_ms: u64,
    },
    /// `pending | retrying | processing → cancelled`.
    Cancel { reason: Option<String> },
    /// `pending | retrying | processing → timeout`.
    Timeout { reason: String },
}

impl StatusChange {
    #[must_use]
    pub fn target(&self) -> ActionStatus {
        match self {
            Self::Claim { .. } => ActionStatus::Processing,
            Self::Complete { .. } => ActionStatus::Completed,
            Self::Retry { .. } => ActionStatus::Retrying,
            Self::Fail { .. } => ActionStatus::Failed,
            Self::Cancel { .. } => ActionStatus::Cancelled,
            Self::Timeout { .. } => ActionStatus::Timeout,
        }
    }

    /// Statuses this change may start from.
    #[must_use]
    pub fn allowed_from(&self) -> &'static [ActionStatus] {
        match self {
            Self::Claim { .. } => &ActionStatus::CLAIMABLE,
            Self::Complete { .. } | Self::Retry { .. } | Self::Fail { .. } => {
                &[ActionStatus::Processing]
            }
            Self::Cancel { .. } | Self::Timeout { .. } => &ActionStatus::ACTIVE,
        }
    }
}

/// Compare-and-swap condition for a single-row write.
///
/// The write applies only when the row's current status is in `statuses`
/// and, if set, its `version` matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionGuard {
    pub statuses: Vec<ActionStatus>,
    pub version: Option<u32>,
}

impl TransitionGuard {
    /// Guard on status only.
    #[must_use]
    pub fn from_statuses(statuses: &[ActionStatus]) -> Self {
        Self {
            statuses: statuses.to_vec(),
            version: None,
        }
    }

    #[must_use]
    pub fn holds_for(&self, action: &QueuedAction) -> bool {
        self.statuses.contains(&action.status)
            && self.version.is_none_or(|version| version == action.version)
    }
}

/// Result of a claim attempt. Losing the race is an expected outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    Claimed(Box<QueuedAction>),
    AlreadyClaimed,
}

impl ClaimOutcome {
    #[must_use]
    pub fn into_claimed(self) -> Option<QueuedAction> {
        match self {
            Self::Claimed(action) => Some(*action),
            Self::AlreadyClaimed => None,
        }
    }
}
