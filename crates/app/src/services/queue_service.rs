//! Queue service — submission, completion and administration use-cases.

use actionq_domain::action::{
    ActionStatus, ActionUpdate, NewAction, QueuedAction, StatusChange, TransitionGuard,
};
use actionq_domain::catalog::{ActionType, Catalog, Priority, StatusInfo, status_table};
use actionq_domain::dependency::{
    ActionDependency, DependencyGraph, DependencySpec, DependencyType,
};
use actionq_domain::error::{
    ConflictError, InvalidTransitionError, NotFoundError, QueueError, ValidationError,
};
use actionq_domain::event::{QueueEvent, QueueEventKind};
use actionq_domain::execution::{CompletionOutcome, ExecutionReport};
use actionq_domain::filter::{ActionFilter, ClearFilter};
use actionq_domain::id::{ActionId, DependencyId};
use actionq_domain::result::ActionResult;
use actionq_domain::retry::RetryDecision;
use actionq_domain::settings::{QueueSetting, QueueSettings};
use actionq_domain::statistics::QueueStatistics;
use actionq_domain::time::{Timestamp, days_before, now};

use crate::ports::{EventPublisher, QueueStore};
use crate::services::worker_pool::WorkerRegistry;

/// Options shared by every action of a bulk submission.
#[derive(Debug, Clone, Default)]
pub struct BulkOptions {
    /// Chain each action to the previously queued one with a `completion` edge.
    pub sequential: bool,
    /// Abort at the first rejected action instead of skipping it.
    pub stop_on_error: bool,
    /// Shared correlation id; generated when absent.
    pub correlation_id: Option<String>,
    /// Priority override applied to every action.
    pub priority: Option<String>,
}

/// What a bulk submission queued and what it skipped.
#[derive(Debug)]
pub struct BulkOutcome {
    pub correlation_id: String,
    pub queued: Vec<QueuedAction>,
    /// Index in the submitted list and the rejection.
    pub rejected: Vec<(usize, QueueError)>,
}

/// Application service for the queue's inbound operations.
pub struct QueueService<R, P> {
    store: R,
    publisher: P,
    workers: WorkerRegistry,
}

impl<R, P> QueueService<R, P>
where
    R: QueueStore + Send + Sync,
    P: EventPublisher + Send + Sync,
{
    /// Create a new service backed by the given store and publisher.
    pub fn new(store: R, publisher: P) -> Self {
        Self {
            store,
            publisher,
            workers: WorkerRegistry::default(),
        }
    }

    /// Registry the worker pool reports into; shown in statistics.
    #[must_use]
    pub fn workers(&self) -> &WorkerRegistry {
        &self.workers
    }

    async fn publish(&self, event: QueueEvent) {
        if let Err(err) = self.publisher.publish(event).await {
            tracing::warn!(error = %err, "failed to publish queue event");
        }
    }

    // ── Submission ────────────────────────────────────────────────

    /// Validate and persist a new `pending` action with its dependencies.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Validation`] for an unknown or disabled action
    /// type, unknown priority, malformed payload, missing dependency target or
    /// a dependency cycle; nothing is stored in that case.
    #[tracing::instrument(
        skip(self, new),
        fields(action_type = %new.action_type, action_id = %new.id)
    )]
    pub async fn enqueue(&self, new: NewAction) -> Result<QueuedAction, QueueError> {
        new.validate()?;
        let catalog = self.store.load_catalog().await?;
        let action_type = catalog.resolve_action_type(&new.action_type)?.clone();
        let priority = catalog.resolve_priority(new.priority.as_deref())?.clone();

        if let Some(parent) = new.parent_action_id {
            self.get(parent).await?;
        }
        let at = now();
        let dependencies = self
            .check_new_dependencies(new.id, &new.dependencies, at)
            .await?;

        let action = new.into_queued(&action_type, &priority, at);
        let created = self.store.create(action, dependencies).await?;
        tracing::info!(
            action_id = %created.id,
            priority = %priority.name,
            "action queued"
        );
        self.publish(
            QueueEvent::for_action(QueueEventKind::ActionQueued, created.id).with_data(
                serde_json::json!({
                    "name": created.name,
                    "action_type": action_type.name,
                    "priority": priority.name,
                }),
            ),
        )
        .await;
        Ok(created)
    }

    /// Enqueue several actions under one correlation id.
    ///
    /// # Errors
    ///
    /// With `stop_on_error`, returns the first rejection. Otherwise every
    /// rejection is collected in [`BulkOutcome::rejected`].
    #[tracing::instrument(skip(self, actions, options), fields(count = actions.len()))]
    pub async fn enqueue_bulk(
        &self,
        actions: Vec<NewAction>,
        options: BulkOptions,
    ) -> Result<BulkOutcome, QueueError> {
        let correlation_id = options.correlation_id.clone().unwrap_or_else(|| {
            format!("bulk_{}", now().timestamp_nanos_opt().unwrap_or_default())
        });
        let mut outcome = BulkOutcome {
            correlation_id: correlation_id.clone(),
            queued: Vec::with_capacity(actions.len()),
            rejected: Vec::new(),
        };
        let mut previous: Option<ActionId> = None;

        for (index, mut action) in actions.into_iter().enumerate() {
            action.correlation_id = Some(correlation_id.clone());
            if let Some(priority) = &options.priority {
                action.priority = Some(priority.clone());
            }
            if options.sequential {
                if let Some(previous) = previous {
                    action
                        .dependencies
                        .push(DependencySpec::new(previous, DependencyType::Completion));
                }
            }
            match self.enqueue(action).await {
                Ok(queued) => {
                    previous = Some(queued.id);
                    outcome.queued.push(queued);
                }
                Err(err) if options.stop_on_error => return Err(err),
                Err(err) => {
                    tracing::warn!(index, error = %err, "bulk action rejected, skipping");
                    outcome.rejected.push((index, err));
                }
            }
        }

        tracing::info!(
            correlation_id = %outcome.correlation_id,
            queued = outcome.queued.len(),
            rejected = outcome.rejected.len(),
            "bulk submission processed"
        );
        Ok(outcome)
    }

    /// Edit a not-yet-running action.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::NotFound`], [`QueueError::Validation`] when the
    /// action is already running or finished or the new values are invalid,
    /// and [`QueueError::Conflict`] when the action changed meanwhile.
    #[tracing::instrument(skip(self, update))]
    pub async fn update(
        &self,
        id: ActionId,
        update: ActionUpdate,
    ) -> Result<QueuedAction, QueueError> {
        let current = self.get(id).await?;
        if !current.status.is_claimable() {
            return Err(ValidationError::ActionLocked {
                status: current.status,
                operation: "update",
            }
            .into());
        }

        let mut next = current.clone();
        if let Some(name) = update.name {
            if name.trim().is_empty() {
                return Err(ValidationError::EmptyName.into());
            }
            next.name = name;
        }
        if update.description.is_some() {
            next.description = update.description;
        }
        if let Some(priority) = update.priority {
            let catalog = self.store.load_catalog().await?;
            next.priority_id = catalog.resolve_priority(Some(&priority))?.id;
        }
        if update.scheduled_at.is_some() {
            next.scheduled_at = update.scheduled_at;
        }
        if update.execute_after.is_some() {
            next.execute_after = update.execute_after;
        }
        if update.deadline.is_some() {
            next.deadline = update.deadline;
        }
        let start = next.scheduled_at.or(next.execute_after);
        if let (Some(deadline), Some(start)) = (next.deadline, start) {
            if deadline <= start {
                return Err(ValidationError::DeadlineBeforeSchedule.into());
            }
        }
        next.updated_at = now();

        let guard = TransitionGuard {
            statuses: ActionStatus::CLAIMABLE.to_vec(),
            version: Some(current.version),
        };
        let updated = self.store.replace(next, guard).await?.ok_or_else(|| ConflictError {
            id: id.to_string(),
        })?;
        tracing::info!(action_id = %id, "action updated");
        Ok(updated)
    }

    /// Add a dependency edge to a not-yet-running action.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::NotFound`] for an unknown action, and
    /// [`QueueError::Validation`] for a missing target, a cycle or an action
    /// that is no longer waiting.
    #[tracing::instrument(skip(self))]
    pub async fn add_dependency(
        &self,
        action_id: ActionId,
        spec: DependencySpec,
    ) -> Result<ActionDependency, QueueError> {
        let action = self.get(action_id).await?;
        if !action.status.is_claimable() {
            return Err(ValidationError::ActionLocked {
                status: action.status,
                operation: "add a dependency to",
            }
            .into());
        }
        let mut edges = self
            .check_new_dependencies(action_id, std::slice::from_ref(&spec), now())
            .await?;
        let dependency = edges.pop().ok_or(ValidationError::SelfDependency)?;
        // the store re-checks against committed edges while inserting
        let stored = self.store.add_dependency(dependency).await?;
        tracing::info!(action_id = %action_id, depends_on = %spec.depends_on, "dependency added");
        Ok(stored)
    }

    /// Remove a dependency edge.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::NotFound`] when the edge does not exist.
    #[tracing::instrument(skip(self))]
    pub async fn remove_dependency(&self, id: DependencyId) -> Result<(), QueueError> {
        if !self.store.remove_dependency(id).await? {
            return Err(NotFoundError {
                entity: "ActionDependency",
                id: id.to_string(),
            }
            .into());
        }
        Ok(())
    }

    async fn check_new_dependencies(
        &self,
        action_id: ActionId,
        specs: &[DependencySpec],
        at: Timestamp,
    ) -> Result<Vec<ActionDependency>, QueueError> {
        if specs.is_empty() {
            return Ok(Vec::new());
        }
        for spec in specs {
            if self.store.get_by_id(spec.depends_on).await?.is_none() {
                return Err(ValidationError::MissingDependency(spec.depends_on.to_string()).into());
            }
        }
        let mut graph = DependencyGraph::from_edges(self.store.edges().await?);
        graph.add_all(action_id, specs.iter().map(|spec| spec.depends_on))?;
        Ok(specs
            .iter()
            .map(|spec| ActionDependency::new(action_id, *spec, at))
            .collect())
    }

    // ── Queries ───────────────────────────────────────────────────

    /// Look up an action by id.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::NotFound`] when no action with `id` exists.
    pub async fn get(&self, id: ActionId) -> Result<QueuedAction, QueueError> {
        self.store.get_by_id(id).await?.ok_or_else(|| {
            NotFoundError {
                entity: "QueuedAction",
                id: id.to_string(),
            }
            .into()
        })
    }

    /// List actions matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns a storage error propagated from the repository.
    pub async fn list(&self, filter: ActionFilter) -> Result<Vec<QueuedAction>, QueueError> {
        self.store.list(filter).await
    }

    /// Attempt history of an action.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::NotFound`] for an unknown action.
    pub async fn results(&self, id: ActionId) -> Result<Vec<ActionResult>, QueueError> {
        self.get(id).await?;
        self.store.results(id).await
    }

    /// Outgoing dependency edges of an action.
    ///
    /// # Errors
    ///
    /// Returns a storage error propagated from the repository.
    pub async fn dependencies(&self, id: ActionId) -> Result<Vec<ActionDependency>, QueueError> {
        self.store.dependencies_of(id).await
    }

    /// # Errors
    ///
    /// Returns a storage error propagated from the repository.
    pub async fn catalog(&self) -> Result<Catalog, QueueError> {
        self.store.load_catalog().await
    }

    /// # Errors
    ///
    /// Returns a storage error propagated from the repository.
    pub async fn list_action_types(&self) -> Result<Vec<ActionType>, QueueError> {
        Ok(self.store.load_catalog().await?.action_types)
    }

    /// # Errors
    ///
    /// Returns a storage error propagated from the repository.
    pub async fn list_priorities(&self) -> Result<Vec<Priority>, QueueError> {
        Ok(self.store.load_catalog().await?.priorities)
    }

    #[must_use]
    pub fn list_statuses(&self) -> Vec<StatusInfo> {
        status_table()
    }

    /// Enable or disable an action type; disabled types reject submissions.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::NotFound`] for an unknown action type.
    #[tracing::instrument(skip(self))]
    pub async fn set_action_type_enabled(
        &self,
        name: &str,
        enabled: bool,
    ) -> Result<(), QueueError> {
        if !self
            .store
            .set_action_type_enabled(name.to_string(), enabled)
            .await?
        {
            return Err(NotFoundError {
                entity: "ActionType",
                id: name.to_string(),
            }
            .into());
        }
        tracing::info!(action_type = name, enabled, "action type toggled");
        Ok(())
    }

    // ── Completion ────────────────────────────────────────────────

    /// Record the outcome of a claimed action and apply the retry policy.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::NotFound`] for an unknown action and
    /// [`QueueError::InvalidTransition`] when the action is not (or no
    /// longer) `processing`, e.g. it was cancelled or timed out meanwhile.
    #[tracing::instrument(skip(self, report), fields(success = report.is_success()))]
    pub async fn complete(
        &self,
        id: ActionId,
        worker_id: &str,
        report: ExecutionReport,
    ) -> Result<CompletionOutcome, QueueError> {
        let action = self.get(id).await?;
        let at = now();

        let (change, outcome) = match &report.outcome {
            Ok(result_data) => (
                StatusChange::Complete {
                    result_data: result_data.clone(),
                    duration_ms: report.duration_ms,
                },
                CompletionOutcome::Completed,
            ),
            Err(err) => {
                let decision = if err.retryable {
                    let catalog = self.store.load_catalog().await?;
                    let settings = QueueSettings::from_rows(&self.store.get_settings().await?);
                    let base_delay = catalog
                        .action_type(action.action_type_id)
                        .and_then(|t| t.retry_base_delay_ms);
                    Some(settings.retry_policy(base_delay).decide(&action, at))
                } else {
                    None
                };
                match decision {
                    Some(RetryDecision::Retry {
                        attempt,
                        next_retry_at,
                        ..
                    }) => (
                        StatusChange::Retry {
                            next_retry_at,
                            error_message: err.message.clone(),
                            error_details: err.details.clone(),
                            duration_ms: report.duration_ms,
                        },
                        CompletionOutcome::Retrying {
                            retry_count: attempt,
                            next_retry_at,
                        },
                    ),
                    other => (
                        StatusChange::Fail {
                            error_message: err.message.clone(),
                            error_details: err.details.clone(),
                            duration_ms: report.duration_ms,
                        },
                        CompletionOutcome::Failed {
                            retries_exhausted: other.is_some(),
                        },
                    ),
                }
            }
        };

        let target = change.target();
        if action.status != ActionStatus::Processing {
            return Err(InvalidTransitionError {
                id: id.to_string(),
                from: action.status,
                to: target,
            }
            .into());
        }

        let result = ActionResult::record(&action, worker_id, &report, target, at);
        let guard = action.guard_for(&change);
        let Some(updated) = self
            .store
            .transition(id, change, guard, at, Some(result))
            .await?
        else {
            let from = self
                .store
                .get_by_id(id)
                .await?
                .map_or(action.status, |current| current.status);
            return Err(InvalidTransitionError {
                id: id.to_string(),
                from,
                to: target,
            }
            .into());
        };

        match outcome {
            CompletionOutcome::Completed => {
                tracing::info!(
                    action_id = %id,
                    worker_id,
                    duration_ms = report.duration_ms,
                    "action completed"
                );
            }
            CompletionOutcome::Retrying {
                retry_count,
                next_retry_at,
            } => {
                tracing::warn!(
                    action_id = %id,
                    worker_id,
                    retry_count,
                    %next_retry_at,
                    error = updated.error_message.as_deref().unwrap_or_default(),
                    "action failed, retry scheduled"
                );
            }
            CompletionOutcome::Failed { retries_exhausted } => {
                tracing::warn!(
                    action_id = %id,
                    worker_id,
                    retry_count = updated.retry_count,
                    retries_exhausted,
                    error = updated.error_message.as_deref().unwrap_or_default(),
                    "action failed"
                );
            }
        }
        self.publish(QueueEvent::status_changed(id, ActionStatus::Processing, target))
            .await;
        Ok(outcome)
    }

    // ── Administration ────────────────────────────────────────────

    /// Cancel a non-terminal action.
    ///
    /// A `processing` action is only marked; its handler is not interrupted.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::NotFound`] for an unknown action and
    /// [`QueueError::InvalidTransition`] when it is already terminal.
    #[tracing::instrument(skip(self))]
    pub async fn cancel(
        &self,
        id: ActionId,
        reason: Option<String>,
    ) -> Result<QueuedAction, QueueError> {
        let action = self.get(id).await?;
        let change = StatusChange::Cancel { reason };
        let invalid = |from| InvalidTransitionError {
            id: id.to_string(),
            from,
            to: ActionStatus::Cancelled,
        };
        if !action.status.can_transition_to(ActionStatus::Cancelled) {
            return Err(invalid(action.status).into());
        }

        let guard = TransitionGuard::from_statuses(change.allowed_from());
        let Some(cancelled) = self.store.transition(id, change, guard, now(), None).await? else {
            let from = self
                .store
                .get_by_id(id)
                .await?
                .map_or(action.status, |current| current.status);
            return Err(invalid(from).into());
        };

        tracing::info!(action_id = %id, from = %action.status, "action cancelled");
        self.publish(
            QueueEvent::for_action(QueueEventKind::ActionCancelled, id)
                .with_data(serde_json::json!({ "from": action.status })),
        )
        .await;
        Ok(cancelled)
    }

    /// Delete a `pending` or terminal action together with its edges and results.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::NotFound`] for an unknown action and
    /// [`QueueError::Validation`] when it is running or awaiting a retry.
    #[tracing::instrument(skip(self))]
    pub async fn delete(&self, id: ActionId) -> Result<(), QueueError> {
        let action = self.get(id).await?;
        let deletable: Vec<_> = ActionStatus::ALL
            .into_iter()
            .filter(|status| status.is_terminal() || *status == ActionStatus::Pending)
            .collect();
        if !self.store.delete(id, deletable).await? {
            let status = self
                .store
                .get_by_id(id)
                .await?
                .map_or(action.status, |current| current.status);
            return Err(ValidationError::ActionLocked {
                status,
                operation: "delete",
            }
            .into());
        }
        tracing::info!(action_id = %id, "action deleted");
        self.publish(QueueEvent::for_action(QueueEventKind::ActionDeleted, id))
            .await;
        Ok(())
    }

    /// Delete every action matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns a storage error propagated from the repository.
    #[tracing::instrument(skip(self))]
    pub async fn clear_queue(&self, filter: ClearFilter) -> Result<u64, QueueError> {
        let data = serde_json::json!({
            "statuses": filter.statuses,
            "action_type": filter.action_type,
            "correlation_id": filter.correlation_id,
        });
        let deleted = self.store.clear(filter).await?;
        tracing::info!(deleted, "queue cleared");
        self.publish(
            QueueEvent::new(QueueEventKind::QueueCleared { deleted }, None).with_data(data),
        )
        .await;
        Ok(deleted)
    }

    /// Delete terminal actions in `statuses` finished before `cutoff`.
    ///
    /// Non-terminal statuses are ignored; an empty list means every terminal
    /// status. Calling it twice with the same cutoff deletes nothing the
    /// second time.
    ///
    /// # Errors
    ///
    /// Returns a storage error propagated from the repository.
    #[tracing::instrument(skip(self, statuses))]
    pub async fn cleanup_older_than(
        &self,
        cutoff: Timestamp,
        statuses: &[ActionStatus],
    ) -> Result<u64, QueueError> {
        let statuses: Vec<_> = if statuses.is_empty() {
            ActionStatus::ALL.into_iter().filter(|s| s.is_terminal()).collect()
        } else {
            statuses.iter().copied().filter(|s| s.is_terminal()).collect()
        };
        if statuses.is_empty() {
            return Ok(0);
        }
        let deleted = self.store.cleanup(cutoff, statuses).await?;
        if deleted > 0 {
            tracing::info!(deleted, %cutoff, "old actions cleaned up");
            self.publish(QueueEvent::new(QueueEventKind::ActionsCleaned { deleted }, None))
                .await;
        }
        Ok(deleted)
    }

    /// Apply the retention settings: completed actions and unsuccessful
    /// ("dead letter") actions each have their own window.
    ///
    /// # Errors
    ///
    /// Returns a storage error propagated from the repository.
    pub async fn cleanup_by_retention(&self, at: Timestamp) -> Result<u64, QueueError> {
        let settings = QueueSettings::from_rows(&self.store.get_settings().await?);
        let windows = [
            (settings.completed_action_retention_days, &[ActionStatus::Completed][..]),
            (settings.dead_letter_retention_days, &ActionStatus::UNSUCCESSFUL[..]),
        ];
        let mut deleted = 0;
        for (days, statuses) in windows {
            // a window reaching past the time range keeps everything
            let Some(cutoff) = days_before(at, days) else {
                tracing::debug!(days, "retention window exceeds time range, nothing to clean");
                continue;
            };
            deleted += self.cleanup_older_than(cutoff, statuses).await?;
        }
        Ok(deleted)
    }

    /// Aggregate statistics, with health classified from the threshold settings.
    ///
    /// # Errors
    ///
    /// Returns a storage error propagated from the repository.
    pub async fn statistics(&self) -> Result<QueueStatistics, QueueError> {
        let counts = self.store.counts().await?;
        let settings = QueueSettings::from_rows(&self.store.get_settings().await?);
        Ok(QueueStatistics::from_counts(
            counts,
            settings.health,
            self.workers.snapshot(),
        ))
    }

    // ── Settings ──────────────────────────────────────────────────

    /// # Errors
    ///
    /// Returns a storage error propagated from the repository.
    pub async fn settings(&self) -> Result<Vec<QueueSetting>, QueueError> {
        self.store.get_settings().await
    }

    /// Typed view of the current settings.
    ///
    /// # Errors
    ///
    /// Returns a storage error propagated from the repository.
    pub async fn queue_settings(&self) -> Result<QueueSettings, QueueError> {
        Ok(QueueSettings::from_rows(&self.store.get_settings().await?))
    }

    /// Change a setting after checking its type and read-only flag.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::NotFound`] for an unknown key and
    /// [`QueueError::Validation`] for a read-only key or a mistyped value.
    #[tracing::instrument(skip(self))]
    pub async fn update_setting(&self, key: &str, value: &str) -> Result<QueueSetting, QueueError> {
        let setting = self
            .store
            .get_setting(key.to_string())
            .await?
            .ok_or_else(|| NotFoundError {
                entity: "QueueSetting",
                id: key.to_string(),
            })?;
        setting.validate_update(value)?;
        let updated = self
            .store
            .set_setting(key.to_string(), value.to_string(), now())
            .await?
            .ok_or_else(|| ValidationError::ReadonlySetting(key.to_string()))?;
        tracing::info!(key, value, "setting updated");
        self.publish(QueueEvent::new(
            QueueEventKind::SettingChanged {
                key: key.to_string(),
                value: value.to_string(),
            },
            None,
        ))
        .await;
        Ok(updated)
    }
}
