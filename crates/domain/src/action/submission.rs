//! Submission — what a caller hands to the queue, before it is resolved
//! against the catalog.

use serde::{Deserialize, Serialize};

use crate::catalog::{ActionType, Priority};
use crate::dependency::DependencySpec;
use crate::error::{QueueError, ValidationError};
use crate::id::ActionId;
use crate::time::Timestamp;

use super::{ActionStatus, QueuedAction};

/// Longest execution timeout a submission may ask for (one week).
pub const MAX_TIMEOUT_SECONDS: i64 = 7 * 24 * 60 * 60;

/// Payload keys each built-in action type requires.
#[must_use]
pub fn required_payload_fields(action_type: &str) -> &'static [&'static str] {
    match action_type {
        "entity_state_change" => &["entity_id", "state"],
        "service_call" => &["domain", "service"],
        "scene_activation" => &["scene_id"],
        "notification_send" => &["message"],
        _ => &[],
    }
}

/// A request to enqueue one action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAction {
    pub id: ActionId,
    pub action_type: String,
    pub priority: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub payload: serde_json::Value,
    pub user_id: Option<i64>,
    pub created_by: Option<String>,
    pub correlation_id: Option<String>,
    pub parent_action_id: Option<ActionId>,
    pub target_entity_id: Option<String>,
    pub timeout_seconds: Option<i64>,
    pub max_retries: Option<u32>,
    pub retry_backoff_factor: Option<f64>,
    pub scheduled_at: Option<Timestamp>,
    pub execute_after: Option<Timestamp>,
    pub deadline: Option<Timestamp>,
    pub dependencies: Vec<DependencySpec>,
}

impl NewAction {
    /// Create a builder for constructing a [`NewAction`].
    #[must_use]
    pub fn builder() -> NewActionBuilder {
        NewActionBuilder::default()
    }

    /// Check the rules that do not need the catalog or the store.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Validation`] when the name is empty, the payload is
    /// not a JSON object, the retry/timeout overrides are out of range, the
    /// deadline precedes the schedule, or the action depends on itself.
    pub fn validate(&self) -> Result<(), QueueError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyName.into());
        }
        if !self.payload.is_object() {
            return Err(
                ValidationError::InvalidPayload("payload must be a JSON object".into()).into(),
            );
        }
        for field in required_payload_fields(&self.action_type) {
            if self.payload.get(field).is_none() {
                return Err(ValidationError::MissingPayloadField {
                    action_type: self.action_type.clone(),
                    field,
                }
                .into());
            }
        }
        if let Some(factor) = self.retry_backoff_factor {
            validate_backoff_factor(factor)?;
        }
        if let Some(timeout) = self.timeout_seconds {
            if !(1..=MAX_TIMEOUT_SECONDS).contains(&timeout) {
                return Err(ValidationError::InvalidTimeout(timeout).into());
            }
        }
        let start = self.scheduled_at.or(self.execute_after);
        if let (Some(deadline), Some(start)) = (self.deadline, start) {
            if deadline <= start {
                return Err(ValidationError::DeadlineBeforeSchedule.into());
            }
        }
        if self.dependencies.iter().any(|dep| dep.depends_on == self.id) {
            return Err(ValidationError::SelfDependency.into());
        }
        Ok(())
    }

    /// Resolve into a `pending` record, inheriting the type's defaults for
    /// anything the submission left unset.
    #[must_use]
    pub fn into_queued(
        self,
        action_type: &ActionType,
        priority: &Priority,
        now: Timestamp,
    ) -> QueuedAction {
        QueuedAction {
            id: self.id,
            action_type_id: action_type.id,
            priority_id: priority.id,
            status: ActionStatus::Pending,
            name: self.name,
            description: self.description,
            user_id: self.user_id,
            correlation_id: self.correlation_id,
            parent_action_id: self.parent_action_id,
            payload: self.payload,
            target_entity_id: self.target_entity_id,
            timeout_seconds: self
                .timeout_seconds
                .unwrap_or(action_type.default_timeout_secs),
            max_retries: self.max_retries.unwrap_or(action_type.max_retries),
            retry_count: 0,
            retry_backoff_factor: self
                .retry_backoff_factor
                .unwrap_or(action_type.retry_backoff_factor),
            scheduled_at: self.scheduled_at,
            execute_after: self.execute_after,
            deadline: self.deadline,
            started_at: None,
            completed_at: None,
            last_attempt_at: None,
            next_retry_at: None,
            result_data: None,
            error_message: None,
            error_details: None,
            claimed_by: None,
            created_at: now,
            updated_at: now,
            created_by: self.created_by.or_else(|| {
                Some(
                    self.user_id
                        .map_or_else(|| "system".to_string(), |user| format!("user_{user}")),
                )
            }),
            execution_duration_ms: None,
            version: 0,
        }
    }
}

/// # Errors
///
/// Returns [`ValidationError::InvalidBackoffFactor`] for non-finite or `< 1.0` factors.
pub fn validate_backoff_factor(factor: f64) -> Result<(), QueueError> {
    if !factor.is_finite() || factor < 1.0 {
        return Err(ValidationError::InvalidBackoffFactor(factor).into());
    }
    Ok(())
}

/// Step-by-step builder for [`NewAction`].
#[derive(Debug, Default)]
pub struct NewActionBuilder {
    id: Option<ActionId>,
    action_type: Option<String>,
    priority: Option<String>,
    name: Option<String>,
    description: Option<String>,
    payload: Option<serde_json::Value>,
    user_id: Option<i64>,
    created_by: Option<String>,
    correlation_id: Option<String>,
    parent_action_id: Option<ActionId>,
    target_entity_id: Option<String>,
    timeout_seconds: Option<i64>,
    max_retries: Option<u32>,
    retry_backoff_factor: Option<f64>,
    scheduled_at: Option<Timestamp>,
    execute_after: Option<Timestamp>,
    deadline: Option<Timestamp>,
    dependencies: Vec<DependencySpec>,
}

impl NewActionBuilder {
    #[must_use]
    pub fn id(mut self, id: ActionId) -> Self {
        self.id = Some(id);
        self
    }

    #[must_use]
    pub fn action_type(mut self, action_type: impl Into<String>) -> Self {
        self.action_type = Some(action_type.into());
        self
    }

    #[must_use]
    pub fn priority(mut self, priority: impl Into<String>) -> Self {
        self.priority = Some(priority.into());
        self
    }

    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    #[must_use]
    pub fn user_id(mut self, user_id: i64) -> Self {
        self.user_id = Some(user_id);
        self
    }

    #[must_use]
    pub fn created_by(mut self, created_by: impl Into<String>) -> Self {
        self.created_by = Some(created_by.into());
        self
    }

    #[must_use]
    pub fn correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    #[must_use]
    pub fn parent_action_id(mut self, parent: ActionId) -> Self {
        self.parent_action_id = Some(parent);
        self
    }

    #[must_use]
    pub fn target_entity_id(mut self, target: impl Into<String>) -> Self {
        self.target_entity_id = Some(target.into());
        self
    }

    #[must_use]
    pub fn timeout_seconds(mut self, timeout: i64) -> Self {
        self.timeout_seconds = Some(timeout);
        self
    }

    #[must_use]
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    #[must_use]
    pub fn retry_backoff_factor(mut self, factor: f64) -> Self {
        self.retry_backoff_factor = Some(factor);
        self
    }

    #[must_use]
    pub fn scheduled_at(mut self, ts: Timestamp) -> Self {
        self.scheduled_at = Some(ts);
        self
    }

    #[must_use]
    pub fn execute_after(mut self, ts: Timestamp) -> Self {
        self.execute_after = Some(ts);
        self
    }

    #[must_use]
    pub fn deadline(mut self, ts: Timestamp) -> Self {
        self.deadline = Some(ts);
        self
    }

    #[must_use]
    pub fn dependency(mut self, dependency: DependencySpec) -> Self {
        self.dependencies.push(dependency);
        self
    }

    /// Consume the builder, validate, and return a [`NewAction`].
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Validation`] if required fields are missing or invalid.
    pub fn build(self) -> Result<NewAction, QueueError> {
        let action = NewAction {
            id: self.id.unwrap_or_default(),
            action_type: self.action_type.unwrap_or_default(),
            priority: self.priority,
            name: self.name.unwrap_or_default(),
            description: self.description,
            payload: self
                .payload
                .unwrap_or_else(|| serde_json::Value::Object(serde_json::Map::new())),
            user_id: self.user_id,
            created_by: self.created_by,
            correlation_id: self.correlation_id,
            parent_action_id: self.parent_action_id,
            target_entity_id: self.target_entity_id,
            timeout_seconds: self.timeout_seconds,
            max_retries: self.max_retries,
            retry_backoff_factor: self.retry_backoff_factor,
            scheduled_at: self.scheduled_at,
            execute_after: self.execute_after,
            deadline: self.deadline,
            dependencies: self.dependencies,
        };
        action.validate()?;
        Ok(action)
    }
}

/// Editable fields of a not-yet-running action.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub priority: Option<String>,
    pub scheduled_at: Option<Timestamp>,
    pub execute_after: Option<Timestamp>,
    pub deadline: Option<Timestamp>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::fixtures;
    use crate::dependency::DependencyType;
    use crate::time::now;
    use chrono::Duration;

    fn service_call() -> NewActionBuilder {
        NewAction::builder()
            .action_type("service_call")
            .name("Turn on porch light")
            .payload(serde_json::json!({"domain": "light", "service": "turn_on"}))
    }

    #[test]
    fn should_build_valid_submission() {
        let action = service_call().build().unwrap();
        assert_eq!(action.action_type, "service_call");
        assert!(action.priority.is_none());
        assert!(action.dependencies.is_empty());
    }

    #[test]
    fn should_reject_empty_name() {
        let result = service_call().name("  ").build();
        assert!(matches!(
            result,
            Err(QueueError::Validation(ValidationError::EmptyName))
        ));
    }

    #[test]
    fn should_reject_payload_missing_required_field() {
        let result = service_call()
            .payload(serde_json::json!({"domain": "light"}))
            .build();
        assert!(matches!(
            result,
            Err(QueueError::Validation(
                ValidationError::MissingPayloadField { field: "service", .. }
            ))
        ));
    }

    #[test]
    fn should_reject_non_object_payload() {
        let result = NewAction::builder()
            .action_type("bulk_operation")
            .name("bulk")
            .payload(serde_json::json!([1, 2, 3]))
            .build();
        assert!(matches!(
            result,
            Err(QueueError::Validation(ValidationError::InvalidPayload(_)))
        ));
    }

    #[test]
    fn should_reject_backoff_factor_below_one() {
        let result = service_call().retry_backoff_factor(0.5).build();
        assert!(matches!(
            result,
            Err(QueueError::Validation(ValidationError::InvalidBackoffFactor(_)))
        ));
        assert!(service_call().retry_backoff_factor(f64::NAN).build().is_err());
    }

    #[test]
    fn should_reject_non_positive_timeout() {
        assert!(service_call().timeout_seconds(0).build().is_err());
    }

    #[test]
    fn should_reject_timeout_longer_than_a_week() {
        let result = service_call().timeout_seconds(10_000_000_000_000).build();
        assert!(matches!(
            result,
            Err(QueueError::Validation(ValidationError::InvalidTimeout(10_000_000_000_000)))
        ));
        assert!(
            service_call()
                .timeout_seconds(MAX_TIMEOUT_SECONDS)
                .build()
                .is_ok()
        );
    }

    #[test]
    fn should_reject_deadline_before_schedule() {
        let now = now();
        let result = service_call()
            .scheduled_at(now + Duration::minutes(10))
            .deadline(now + Duration::minutes(5))
            .build();
        assert!(matches!(
            result,
            Err(QueueError::Validation(ValidationError::DeadlineBeforeSchedule))
        ));
    }

    #[test]
    fn should_reject_self_dependency() {
        let id = ActionId::new();
        let result = service_call()
            .id(id)
            .dependency(DependencySpec::new(id, DependencyType::Success))
            .build();
        assert!(matches!(
            result,
            Err(QueueError::Validation(ValidationError::SelfDependency))
        ));
    }

    #[test]
    fn should_inherit_action_type_defaults_when_not_overridden() {
        let catalog = fixtures::catalog();
        let action_type = catalog.action_type_by_name("service_call").unwrap();
        let priority = catalog.priority_by_name("high").unwrap();
        let now = now();

        let queued = service_call().build().unwrap().into_queued(action_type, priority, now);

        assert_eq!(queued.status, ActionStatus::Pending);
        assert_eq!(queued.timeout_seconds, 30);
        assert_eq!(queued.max_retries, 3);
        assert!((queued.retry_backoff_factor - 2.0).abs() < f64::EPSILON);
        assert_eq!(queued.created_at, now);
        assert_eq!(queued.updated_at, now);
        assert_eq!(queued.created_by.as_deref(), Some("system"));
    }

    #[test]
    fn should_prefer_per_action_overrides() {
        let catalog = fixtures::catalog();
        let action_type = catalog.action_type_by_name("service_call").unwrap();
        let priority = catalog.priority_by_name("normal").unwrap();

        let queued = service_call()
            .max_retries(7)
            .retry_backoff_factor(3.0)
            .timeout_seconds(5)
            .user_id(42)
            .build()
            .unwrap()
            .into_queued(action_type, priority, now());

        assert_eq!(queued.max_retries, 7);
        assert_eq!(queued.timeout_seconds, 5);
        assert!((queued.retry_backoff_factor - 3.0).abs() < f64::EPSILON);
        assert_eq!(queued.created_by.as_deref(), Some("user_42"));
    }
}
