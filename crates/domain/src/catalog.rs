//! Catalog — reference data every queued action points at.
//!
//! Action types carry the handler name and the default timeout/retry policy,
//! priorities carry the integer weight the scheduler orders by. Both are
//! seeded by the storage adapter and edited rarely.

use serde::{Deserialize, Serialize};

use crate::action::ActionStatus;
use crate::error::{QueueError, ValidationError};
use crate::time::Timestamp;

/// Priority name used when a submission does not specify one.
pub const DEFAULT_PRIORITY: &str = "normal";

/// Identifier of an [`ActionType`] row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActionTypeId(pub i64);

/// Identifier of a [`Priority`] row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PriorityId(pub i64);

impl std::fmt::Display for ActionTypeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::fmt::Display for PriorityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// A kind of work the queue knows how to dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionType {
    pub id: ActionTypeId,
    pub name: String,
    pub description: String,
    /// Name the dispatcher routes on.
    pub handler_name: String,
    pub default_timeout_secs: i64,
    pub max_retries: u32,
    pub retry_backoff_factor: f64,
    /// Base delay of the exponential backoff; `None` falls back to the
    /// `default_retry_base_delay_ms` queue setting.
    pub retry_base_delay_ms: Option<u64>,
    pub enabled: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// Scheduling priority. Higher weight is more urgent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Priority {
    pub id: PriorityId,
    pub name: String,
    pub weight: i32,
    pub description: String,
}

/// Reporting metadata attached to an [`ActionStatus`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusInfo {
    pub status: ActionStatus,
    pub description: String,
    pub is_terminal: bool,
}

/// In-memory snapshot of the reference tables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    pub action_types: Vec<ActionType>,
    pub priorities: Vec<Priority>,
}

impl Catalog {
    #[must_use]
    pub fn action_type(&self, id: ActionTypeId) -> Option<&ActionType> {
        self.action_types.iter().find(|t| t.id == id)
    }

    #[must_use]
    pub fn action_type_by_name(&self, name: &str) -> Option<&ActionType> {
        self.action_types.iter().find(|t| t.name == name)
    }

    #[must_use]
    pub fn priority(&self, id: PriorityId) -> Option<&Priority> {
        self.priorities.iter().find(|p| p.id == id)
    }

    #[must_use]
    pub fn priority_by_name(&self, name: &str) -> Option<&Priority> {
        self.priorities.iter().find(|p| p.name == name)
    }

    /// Resolve a submission's action type by name, refusing disabled types.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::UnknownActionType`] or
    /// [`ValidationError::DisabledActionType`].
    pub fn resolve_action_type(&self, name: &str) -> Result<&ActionType, QueueError> {
        let action_type = self
            .action_type_by_name(name)
            .ok_or_else(|| ValidationError::UnknownActionType(name.to_string()))?;
        if !action_type.enabled {
            return Err(ValidationError::DisabledActionType(name.to_string()).into());
        }
        Ok(action_type)
    }

    /// Resolve a priority by name; `None` selects [`DEFAULT_PRIORITY`].
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::UnknownPriority`].
    pub fn resolve_priority(&self, name: Option<&str>) -> Result<&Priority, QueueError> {
        let name = name.unwrap_or(DEFAULT_PRIORITY);
        self.priority_by_name(name)
            .ok_or_else(|| ValidationError::UnknownPriority(name.to_string()).into())
    }

    /// Check that the foreign keys of a stored action resolve.
    ///
    /// # Errors
    ///
    /// Returns a validation error naming the dangling reference.
    pub fn check_references(
        &self,
        action_type_id: ActionTypeId,
        priority_id: PriorityId,
    ) -> Result<(), QueueError> {
        if self.action_type(action_type_id).is_none() {
            return Err(ValidationError::UnknownActionType(action_type_id.to_string()).into());
        }
        if self.priority(priority_id).is_none() {
            return Err(ValidationError::UnknownPriority(priority_id.to_string()).into());
        }
        Ok(())
    }
}

/// Status metadata for every [`ActionStatus`], in lifecycle order.
#[must_use]
pub fn status_table() -> Vec<StatusInfo> {
    ActionStatus::ALL
        .iter()
        .map(|status| StatusInfo {
            status: *status,
            description: status.description().to_string(),
            is_terminal: status.is_terminal(),
        })
        .collect()
}
