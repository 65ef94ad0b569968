//! Action repository port — persistence for queued actions and their attempts.

use std::future::Future;

use actionq_domain::action::{ActionStatus, QueuedAction, StatusChange, TransitionGuard};
use actionq_domain::dependency::ActionDependency;
use actionq_domain::error::QueueError;
use actionq_domain::filter::{ActionFilter, ClearFilter};
use actionq_domain::id::ActionId;
use actionq_domain::result::ActionResult;
use actionq_domain::statistics::QueueCounts;
use actionq_domain::time::Timestamp;

/// Repository for persisting and querying [`QueuedAction`]s.
///
/// Every mutation of an existing row is a single conditional write: it
/// applies only while the [`TransitionGuard`] holds and returns `None`
/// otherwise. Implementations must never read-modify-write without it.
pub trait ActionRepository {
    /// Insert a new action together with its dependency edges, atomically.
    fn create(
        &self,
        action: QueuedAction,
        dependencies: Vec<ActionDependency>,
    ) -> impl Future<Output = Result<QueuedAction, QueueError>> + Send;

    /// Get an action by its unique identifier.
    fn get_by_id(
        &self,
        id: ActionId,
    ) -> impl Future<Output = Result<Option<QueuedAction>, QueueError>> + Send;

    /// List actions matching `filter`, honoring its ordering and page.
    fn list(
        &self,
        filter: ActionFilter,
    ) -> impl Future<Output = Result<Vec<QueuedAction>, QueueError>> + Send;

    /// Replace the whole record while `guard` holds; bumps `version`.
    fn replace(
        &self,
        action: QueuedAction,
        guard: TransitionGuard,
    ) -> impl Future<Output = Result<Option<QueuedAction>, QueueError>> + Send;

    /// Apply `change` at `at` while `guard` holds, appending `result` in the
    /// same write when given.
    ///
    /// Returns `None` when the guard no longer holds (or the row is gone).
    fn transition(
        &self,
        id: ActionId,
        change: StatusChange,
        guard: TransitionGuard,
        at: Timestamp,
        result: Option<ActionResult>,
    ) -> impl Future<Output = Result<Option<QueuedAction>, QueueError>> + Send;

    /// Claimable actions whose time gates are open at `now`, ordered by
    /// priority weight (descending) then creation time (ascending).
    ///
    /// Dependencies are not evaluated here.
    fn find_candidates(
        &self,
        now: Timestamp,
        limit: u32,
        offset: u32,
    ) -> impl Future<Output = Result<Vec<QueuedAction>, QueueError>> + Send;

    /// Claimable actions whose deadline is at or before `now`.
    fn find_overdue(
        &self,
        now: Timestamp,
    ) -> impl Future<Output = Result<Vec<QueuedAction>, QueueError>> + Send;

    /// Delete an action if its current status is one of `statuses`.
    fn delete(
        &self,
        id: ActionId,
        statuses: Vec<ActionStatus>,
    ) -> impl Future<Output = Result<bool, QueueError>> + Send;

    /// Delete every action matching `filter`, returning the count.
    fn clear(&self, filter: ClearFilter) -> impl Future<Output = Result<u64, QueueError>> + Send;

    /// Delete actions in `statuses` last touched before `cutoff`.
    fn cleanup(
        &self,
        cutoff: Timestamp,
        statuses: Vec<ActionStatus>,
    ) -> impl Future<Output = Result<u64, QueueError>> + Send;

    /// Aggregate counts for statistics.
    fn counts(&self) -> impl Future<Output = Result<QueueCounts, QueueError>> + Send;

    /// Attempt history of an action, ordered by attempt number.
    fn results(
        &self,
        id: ActionId,
    ) -> impl Future<Output = Result<Vec<ActionResult>, QueueError>> + Send;
}
