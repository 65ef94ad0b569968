//! Dependency repository port — edges between actions.

use std::future::Future;

use actionq_domain::dependency::{ActionDependency, DependencyState};
use actionq_domain::error::QueueError;
use actionq_domain::id::{ActionId, DependencyId};

/// Repository for [`ActionDependency`] edges.
pub trait DependencyRepository {
    /// Every `(action_id, depends_on_action_id)` pair, for cycle detection.
    fn edges(&self) -> impl Future<Output = Result<Vec<(ActionId, ActionId)>, QueueError>> + Send;

    /// Add one edge to an existing action.
    ///
    /// The cycle check and the insert happen atomically: an edge closing a
    /// cycle with any committed edge is refused with `DependencyCycle` and a
    /// self edge with `SelfDependency`.
    fn add_dependency(
        &self,
        dependency: ActionDependency,
    ) -> impl Future<Output = Result<ActionDependency, QueueError>> + Send;

    /// Remove one edge. Returns `false` when it does not exist.
    fn remove_dependency(
        &self,
        id: DependencyId,
    ) -> impl Future<Output = Result<bool, QueueError>> + Send;

    /// Outgoing edges of `action_id`.
    fn dependencies_of(
        &self,
        action_id: ActionId,
    ) -> impl Future<Output = Result<Vec<ActionDependency>, QueueError>> + Send;

    /// Outgoing edges of every action in `action_ids`, joined with the
    /// current status of their targets.
    fn dependency_states(
        &self,
        action_ids: Vec<ActionId>,
    ) -> impl Future<Output = Result<Vec<DependencyState>, QueueError>> + Send;
}
