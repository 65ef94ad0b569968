//! Action status — the lifecycle state machine.
//!
//! ```text
//! pending ──► processing ──► completed
//!    ▲            │  │
//!    │            │  └─────► failed
//!    └─ retrying ◄┘
//!
//! pending | retrying | processing ──► cancelled | timeout
//! ```
//!
//! `completed`, `failed`, `cancelled` and `timeout` are terminal.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Current lifecycle state of a queued action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
    Retrying,
    Cancelled,
    Timeout,
}

impl ActionStatus {
    /// Every status, in catalog order.
    pub const ALL: [Self; 7] = [
        Self::Pending,
        Self::Processing,
        Self::Completed,
        Self::Failed,
        Self::Retrying,
        Self::Cancelled,
        Self::Timeout,
    ];

    /// Statuses a worker may claim from.
    pub const CLAIMABLE: [Self; 2] = [Self::Pending, Self::Retrying];

    /// Statuses an administrator may cancel from.
    pub const ACTIVE: [Self; 3] = [Self::Pending, Self::Retrying, Self::Processing];

    /// Terminal statuses that count as an unsuccessful outcome.
    pub const UNSUCCESSFUL: [Self; 3] = [Self::Failed, Self::Timeout, Self::Cancelled];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Retrying => "retrying",
            Self::Cancelled => "cancelled",
            Self::Timeout => "timeout",
        }
    }

    #[must_use]
    pub fn description(self) -> &'static str {
        match self {
            Self::Pending => "Waiting to be picked up by a worker",
            Self::Processing => "Claimed by a worker and executing",
            Self::Completed => "Finished successfully",
            Self::Failed => "Failed and will not be retried",
            Self::Retrying => "Failed and waiting for the next retry",
            Self::Cancelled => "Cancelled before completion",
            Self::Timeout => "Deadline or execution timeout exceeded",
        }
    }

    /// Whether no further transition can leave this status.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::Timeout
        )
    }

    /// Whether a worker may claim an action in this status.
    #[must_use]
    pub fn is_claimable(self) -> bool {
        Self::CLAIMABLE.contains(&self)
    }

    /// Whether the state machine allows `self → next`.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        match self {
            Self::Pending | Self::Retrying => matches!(
                next,
                Self::Processing | Self::Cancelled | Self::Timeout
            ),
            Self::Processing => matches!(
                next,
                Self::Completed | Self::Failed | Self::Retrying | Self::Cancelled | Self::Timeout
            ),
            Self::Completed | Self::Failed | Self::Cancelled | Self::Timeout => false,
        }
    }
}

impl std::fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The string is not one of the known status names.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown action status `{0}`")]
pub struct UnknownStatus(pub String);

impl FromStr for ActionStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}
