//! Common error types used across the workspace.
//!
//! Each layer defines its own typed errors and converts into [`QueueError`]
//! via `#[from]`. Lost claim races are deliberately *not* errors: see
//! [`ClaimOutcome`](crate::action::ClaimOutcome).

use crate::action::ActionStatus;

/// Top-level error returned by every queue operation.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("validation error")]
    Validation(#[from] ValidationError),

    #[error("not found")]
    NotFound(#[from] NotFoundError),

    #[error("invalid transition")]
    InvalidTransition(#[from] InvalidTransitionError),

    #[error("conflict")]
    Conflict(#[from] ConflictError),

    #[error("storage error")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// A submitted action or setting violates a domain rule.
///
/// Rejected submissions never reach the store.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("name must not be empty")]
    EmptyName,

    #[error("unknown action type `{0}`")]
    UnknownActionType(String),

    #[error("action type `{0}` is disabled")]
    DisabledActionType(String),

    #[error("unknown priority `{0}`")]
    UnknownPriority(String),

    #[error("unknown dependency type `{0}`")]
    UnknownDependencyType(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("payload for `{action_type}` requires `{field}`")]
    MissingPayloadField {
        action_type: String,
        field: &'static str,
    },

    #[error("retry backoff factor must be a finite number >= 1.0, got {0}")]
    InvalidBackoffFactor(f64),

    #[error("timeout must be between 1 and 604800 seconds, got {0}")]
    InvalidTimeout(i64),

    #[error("deadline is earlier than the scheduled time")]
    DeadlineBeforeSchedule,

    #[error("an action cannot depend on itself")]
    SelfDependency,

    #[error("dependency target `{0}` does not exist")]
    MissingDependency(String),

    #[error("dependency on `{0}` would create a cycle")]
    DependencyCycle(String),

    #[error("cannot {operation} an action that is {status}")]
    ActionLocked {
        status: ActionStatus,
        operation: &'static str,
    },

    #[error("setting `{0}` is read-only")]
    ReadonlySetting(String),

    #[error("value `{value}` is not a valid {data_type} for setting `{key}`")]
    InvalidSettingValue {
        key: String,
        value: String,
        data_type: String,
    },

    #[error("setting `{key}` must be between {min} and {max}, got {value}")]
    SettingOutOfRange {
        key: String,
        value: i64,
        min: i64,
        max: i64,
    },
}

/// The referenced record does not exist.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{entity} `{id}` not found")]
pub struct NotFoundError {
    pub entity: &'static str,
    pub id: String,
}

/// A status change that the lifecycle state machine forbids, or that lost
/// a race against another writer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("action `{id}` cannot move from {from} to {to}")]
pub struct InvalidTransitionError {
    pub id: String,
    pub from: ActionStatus,
    pub to: ActionStatus,
}

/// The record changed between read and guarded write.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("action `{id}` was modified concurrently")]
pub struct ConflictError {
    pub id: String,
}
