//! Dispatcher port — the boundary to whatever actually performs an action.

use std::future::Future;

use actionq_domain::action::QueuedAction;
use actionq_domain::catalog::ActionType;
use actionq_domain::execution::ExecutionError;

/// Executes claimed actions.
///
/// Implementations route on [`ActionType::handler_name`]. Once the action's
/// timeout elapses the worker drops the returned future, so work spawned
/// elsewhere by the handler keeps running.
pub trait ActionDispatcher {
    /// Run `action` and return its result data.
    fn dispatch(
        &self,
        action: QueuedAction,
        action_type: ActionType,
    ) -> impl Future<Output = Result<Option<serde_json::Value>, ExecutionError>> + Send;
}

impl<T: ActionDispatcher + Send + Sync> ActionDispatcher for std::sync::Arc<T> {
    fn dispatch(
        &self,
        action: QueuedAction,
        action_type: ActionType,
    ) -> impl Future<Output = Result<Option<serde_json::Value>, ExecutionError>> + Send {
        (**self).dispatch(action, action_type)
    }
}
