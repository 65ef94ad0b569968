//! Scheduler — picks ready actions and claims them for workers.
//!
//! Selection is two-stage: the store returns time-gated candidates in
//! priority order, then the pure readiness predicate filters them against a
//! dependency snapshot. Claiming is a single guarded write per action, so
//! any number of schedulers may run against the same store.

use actionq_domain::action::{
    ActionStatus, ClaimOutcome, QueuedAction, StatusChange, TransitionGuard,
};
use actionq_domain::error::QueueError;
use actionq_domain::event::QueueEvent;
use actionq_domain::filter::ActionFilter;
use actionq_domain::id::ActionId;
use actionq_domain::readiness::{DependencySnapshot, Readiness, evaluate};
use actionq_domain::time::{Timestamp, now};

use crate::ports::{EventPublisher, QueueStore};

const MIN_PAGE_SIZE: u32 = 32;

/// Counts of actions moved to `timeout` by [`Scheduler::expire_overdue`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpiryReport {
    pub deadline_expired: u64,
    pub execution_timed_out: u64,
}

/// Selects and claims ready actions.
pub struct Scheduler<R, P> {
    store: R,
    publisher: P,
}

impl<R, P> Scheduler<R, P>
where
    R: QueueStore + Send + Sync,
    P: EventPublisher + Send + Sync,
{
    pub fn new(store: R, publisher: P) -> Self {
        Self { store, publisher }
    }

    async fn publish(&self, event: QueueEvent) {
        if let Err(err) = self.publisher.publish(event).await {
            tracing::warn!(error = %err, "failed to publish queue event");
        }
    }

    /// Up to `limit` ready actions, by priority weight then age.
    ///
    /// Actions found with a dependency that can never be met are cancelled
    /// on the way, with the blocking edge named in `error_message`.
    ///
    /// # Errors
    ///
    /// Returns a storage error propagated from the repository.
    pub async fn select_ready(
        &self,
        limit: u32,
        at: Timestamp,
    ) -> Result<Vec<QueuedAction>, QueueError> {
        let page_size = limit.saturating_mul(2).max(MIN_PAGE_SIZE);
        let mut ready = Vec::new();
        let mut offset = 0;

        while (ready.len() as u64) < u64::from(limit) {
            let candidates = self.store.find_candidates(at, page_size, offset).await?;
            let fetched = candidates.len();
            if fetched == 0 {
                break;
            }
            let ids = candidates.iter().map(|action| action.id).collect();
            let states = self.store.dependency_states(ids).await?;
            let snapshot = DependencySnapshot::from_states(states);

            let mut removed = 0;
            for action in candidates {
                match evaluate(&action, &snapshot, at) {
                    Readiness::Ready => {
                        ready.push(action);
                        if ready.len() as u64 == u64::from(limit) {
                            break;
                        }
                    }
                    Readiness::Blocked(dependency) => {
                        if self.cancel_blocked(&action, &dependency.blocking_reason()).await? {
                            removed += 1;
                        }
                    }
                    _ => {}
                }
            }

            if fetched < page_size as usize {
                break;
            }
            offset += u32::try_from(fetched - removed).unwrap_or(u32::MAX);
        }

        Ok(ready)
    }

    async fn cancel_blocked(
        &self,
        action: &QueuedAction,
        reason: &str,
    ) -> Result<bool, QueueError> {
        let change = StatusChange::Cancel {
            reason: Some(reason.to_string()),
        };
        let guard = action.guard_for(&change);
        let cancelled = self
            .store
            .transition(action.id, change, guard, now(), None)
            .await?;
        if cancelled.is_some() {
            tracing::warn!(
                action_id = %action.id,
                reason,
                "dependency can never be met, action cancelled"
            );
            self.publish(
                QueueEvent::status_changed(action.id, action.status, ActionStatus::Cancelled)
                    .with_data(serde_json::json!({ "reason": reason })),
            )
            .await;
        }
        Ok(cancelled.is_some())
    }

    /// Atomically move one action from `pending`/`retrying` to `processing`.
    ///
    /// Losing the race is not an error: it yields [`ClaimOutcome::AlreadyClaimed`].
    ///
    /// # Errors
    ///
    /// Returns a storage error propagated from the repository.
    pub async fn claim(&self, id: ActionId, worker_id: &str) -> Result<ClaimOutcome, QueueError> {
        let change = StatusChange::Claim {
            worker_id: worker_id.to_string(),
        };
        let guard = TransitionGuard::from_statuses(change.allowed_from());
        match self.store.transition(id, change, guard, now(), None).await? {
            Some(action) => {
                tracing::debug!(
                    action_id = %id,
                    worker_id,
                    attempt = action.retry_count + 1,
                    "action claimed"
                );
                // retry_count is only bumped on the way to `retrying`
                let from = if action.retry_count > 0 {
                    ActionStatus::Retrying
                } else {
                    ActionStatus::Pending
                };
                self.publish(QueueEvent::status_changed(id, from, ActionStatus::Processing))
                    .await;
                Ok(ClaimOutcome::Claimed(Box::new(action)))
            }
            None => {
                tracing::debug!(action_id = %id, worker_id, "action already claimed, skipping");
                Ok(ClaimOutcome::AlreadyClaimed)
            }
        }
    }

    /// Select up to `limit` ready actions and claim them for `worker_id`.
    ///
    /// # Errors
    ///
    /// Returns a storage error propagated from the repository.
    #[tracing::instrument(skip(self))]
    pub async fn claim_batch(
        &self,
        worker_id: &str,
        limit: u32,
    ) -> Result<Vec<QueuedAction>, QueueError> {
        let ready = self.select_ready(limit, now()).await?;
        let mut claimed = Vec::with_capacity(ready.len());
        for action in ready {
            if let Some(action) = self.claim(action.id, worker_id).await?.into_claimed() {
                claimed.push(action);
            }
        }
        Ok(claimed)
    }

    /// Move overdue work to `timeout`: waiting actions whose deadline passed
    /// and running actions past their `timeout_seconds`.
    ///
    /// Running handlers are not interrupted; their late completion is refused.
    ///
    /// # Errors
    ///
    /// Returns a storage error propagated from the repository.
    #[tracing::instrument(skip(self))]
    pub async fn expire_overdue(&self, at: Timestamp) -> Result<ExpiryReport, QueueError> {
        let mut report = ExpiryReport::default();

        for action in self.store.find_overdue(at).await? {
            let reason = "deadline passed before the action was claimed".to_string();
            if self.time_out(&action, reason).await? {
                report.deadline_expired += 1;
            }
        }

        let running = self
            .store
            .list(ActionFilter::default().with_statuses(&[ActionStatus::Processing]))
            .await?;
        for action in running.into_iter().filter(|a| a.execution_timed_out(at)) {
            let reason = format!(
                "execution exceeded the {}s timeout",
                action.timeout_seconds
            );
            if self.time_out(&action, reason).await? {
                report.execution_timed_out += 1;
            }
        }

        Ok(report)
    }

    async fn time_out(&self, action: &QueuedAction, reason: String) -> Result<bool, QueueError> {
        let change = StatusChange::Timeout { reason };
        let guard = action.guard_for(&change);
        let updated = self
            .store
            .transition(action.id, change, guard, now(), None)
            .await?;
        if updated.is_some() {
            tracing::warn!(action_id = %action.id, from = %action.status, "action timed out");
            self.publish(QueueEvent::status_changed(
                action.id,
                action.status,
                ActionStatus::Timeout,
            ))
            .await;
        }
        Ok(updated.is_some())
    }
}
