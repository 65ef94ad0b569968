//! The daemon's built-in dispatcher.
//!
//! Concrete handlers live outside the queue. Until one is plugged in the
//! daemon either acknowledges actions without running them (dry run) or
//! fails them permanently so they surface as `failed` instead of looping
//! through retries.

use std::future::Future;

use actionq_app::ports::ActionDispatcher;
use actionq_domain::action::QueuedAction;
use actionq_domain::catalog::ActionType;
use actionq_domain::execution::ExecutionError;

pub struct LoggingDispatcher {
    dry_run: bool,
}

impl LoggingDispatcher {
    #[must_use]
    pub fn new(dry_run: bool) -> Self {
        Self { dry_run }
    }
}

impl ActionDispatcher for LoggingDispatcher {
    fn dispatch(
        &self,
        action: QueuedAction,
        action_type: ActionType,
    ) -> impl Future<Output = Result<Option<serde_json::Value>, ExecutionError>> + Send {
        let outcome = if self.dry_run {
            tracing::info!(
                action_id = %action.id,
                handler = %action_type.handler_name,
                name = %action.name,
                payload = %action.payload,
                "dry run, action acknowledged"
            );
            Ok(Some(serde_json::json!({
                "dry_run": true,
                "handler": action_type.handler_name,
            })))
        } else {
            Err(ExecutionError::permanent(format!(
                "no handler registered for `{}`",
                action_type.handler_name
            ))
            .with_code("no_handler"))
        };
        async move { outcome }
    }
}
