//! Readiness — whether a queued action may be claimed right now.
//!
//! Pure over `(action, dependency snapshot, now)`; the store only supplies an
//! index-friendly candidate list and the snapshot.

use std::collections::HashMap;

use crate::action::QueuedAction;
use crate::dependency::DependencyState;
use crate::id::ActionId;
use crate::time::Timestamp;

/// Outgoing dependency edges of a set of actions, joined with target statuses.
#[derive(Debug, Clone, Default)]
pub struct DependencySnapshot {
    by_action: HashMap<ActionId, Vec<DependencyState>>,
}

impl DependencySnapshot {
    #[must_use]
    pub fn from_states(states: impl IntoIterator<Item = DependencyState>) -> Self {
        let mut by_action: HashMap<ActionId, Vec<DependencyState>> = HashMap::new();
        for state in states {
            by_action.entry(state.action_id).or_default().push(state);
        }
        Self { by_action }
    }

    #[must_use]
    pub fn for_action(&self, id: ActionId) -> &[DependencyState] {
        self.by_action.get(&id).map_or(&[], Vec::as_slice)
    }
}

/// Outcome of evaluating one action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    /// Not `pending` or `retrying`.
    NotClaimable,
    /// Scheduled time, execute-after or retry delay still in the future.
    NotYetDue,
    /// The deadline has passed; the action should time out.
    Overdue,
    /// At least one dependency is still open.
    AwaitingDependencies,
    /// A dependency can never be met.
    Blocked(DependencyState),
}

/// Evaluate every readiness condition for `action`.
#[must_use]
pub fn evaluate(
    action: &QueuedAction,
    snapshot: &DependencySnapshot,
    now: Timestamp,
) -> Readiness {
    if !action.status.is_claimable() {
        return Readiness::NotClaimable;
    }
    if action.is_overdue(now) {
        return Readiness::Overdue;
    }
    if !action.time_gates_open(now) {
        return Readiness::NotYetDue;
    }
    let deps = snapshot.for_action(action.id);
    if let Some(blocking) = deps.iter().find(|dep| dep.is_unsatisfiable()) {
        return Readiness::Blocked(blocking.clone());
    }
    if deps.iter().all(DependencyState::is_satisfied) {
        Readiness::Ready
    } else {
        Readiness::AwaitingDependencies
    }
}

#[must_use]
pub fn is_ready(action: &QueuedAction, snapshot: &DependencySnapshot, now: Timestamp) -> bool {
    evaluate(action, snapshot, now) == Readiness::Ready
}
