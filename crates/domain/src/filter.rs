//! Query filters for listing and bulk-deleting actions.

use serde::{Deserialize, Serialize};

use crate::action::{ActionStatus, QueuedAction};
use crate::time::Timestamp;

/// Column an action listing is sorted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderBy {
    #[default]
    CreatedAt,
    Priority,
    UpdatedAt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

/// Listing filter. Empty sets and `None` fields impose no constraint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionFilter {
    pub statuses: Vec<ActionStatus>,
    /// Priority names.
    pub priorities: Vec<String>,
    /// Action type names.
    pub action_types: Vec<String>,
    pub user_id: Option<i64>,
    pub correlation_id: Option<String>,
    pub target_entity_id: Option<String>,
    pub created_after: Option<Timestamp>,
    pub created_before: Option<Timestamp>,
    pub updated_after: Option<Timestamp>,
    pub updated_before: Option<Timestamp>,
    pub limit: Option<u32>,
    pub offset: u32,
    pub order_by: OrderBy,
    pub direction: SortDirection,
}

impl ActionFilter {
    #[must_use]
    pub fn with_statuses(mut self, statuses: &[ActionStatus]) -> Self {
        self.statuses = statuses.to_vec();
        self
    }

    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    #[must_use]
    pub fn with_page(mut self, limit: u32, offset: u32) -> Self {
        self.limit = Some(limit);
        self.offset = offset;
        self
    }

    #[must_use]
    pub fn ordered(mut self, order_by: OrderBy, direction: SortDirection) -> Self {
        self.order_by = order_by;
        self.direction = direction;
        self
    }

    /// Whether `action` passes every predicate (pagination aside).
    #[must_use]
    pub fn matches(&self, action: &QueuedAction, type_name: &str, priority_name: &str) -> bool {
        (self.statuses.is_empty() || self.statuses.contains(&action.status))
            && (self.priorities.is_empty() || self.priorities.iter().any(|p| p == priority_name))
            && (self.action_types.is_empty() || self.action_types.iter().any(|t| t == type_name))
            && self.user_id.is_none_or(|user| action.user_id == Some(user))
            && equals(self.correlation_id.as_deref(), action.correlation_id.as_deref())
            && equals(self.target_entity_id.as_deref(), action.target_entity_id.as_deref())
            && self.created_after.is_none_or(|ts| action.created_at >= ts)
            && self.created_before.is_none_or(|ts| action.created_at < ts)
            && self.updated_after.is_none_or(|ts| action.updated_at >= ts)
            && self.updated_before.is_none_or(|ts| action.updated_at < ts)
    }
}

/// Bulk-delete filter for `clear_queue`. An empty filter clears everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearFilter {
    pub statuses: Vec<ActionStatus>,
    /// Only actions created before this instant.
    pub older_than: Option<Timestamp>,
    pub action_type: Option<String>,
    pub correlation_id: Option<String>,
}

impl ClearFilter {
    #[must_use]
    pub fn matches(&self, action: &QueuedAction, type_name: &str) -> bool {
        (self.statuses.is_empty() || self.statuses.contains(&action.status))
            && self.older_than.is_none_or(|ts| action.created_at < ts)
            && equals(self.action_type.as_deref(), Some(type_name))
            && equals(self.correlation_id.as_deref(), action.correlation_id.as_deref())
    }
}

fn equals(expected: Option<&str>, actual: Option<&str>) -> bool {
    expected.is_none_or(|expected| actual == Some(expected))
}
