//! Queue events — notifications published after state changes are persisted.

use serde::{Deserialize, Serialize};

use crate::action::ActionStatus;
use crate::id::{ActionId, EventId};
use crate::time::{Timestamp, now};

/// What happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueEventKind {
    ActionQueued,
    StatusChanged {
        from: ActionStatus,
        to: ActionStatus,
    },
    ActionCancelled,
    ActionDeleted,
    QueueCleared {
        deleted: u64,
    },
    ActionsCleaned {
        deleted: u64,
    },
    SettingChanged {
        key: String,
        value: String,
    },
}

/// A notification about the queue, delivered to every subscriber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEvent {
    pub id: EventId,
    pub kind: QueueEventKind,
    pub action_id: Option<ActionId>,
    pub data: serde_json::Value,
    pub timestamp: Timestamp,
}

impl QueueEvent {
    #[must_use]
    pub fn new(kind: QueueEventKind, action_id: Option<ActionId>) -> Self {
        Self {
            id: EventId::new(),
            kind,
            action_id,
            data: serde_json::Value::Null,
            timestamp: now(),
        }
    }

    #[must_use]
    pub fn for_action(kind: QueueEventKind, action_id: ActionId) -> Self {
        Self::new(kind, Some(action_id))
    }

    #[must_use]
    pub fn status_changed(action_id: ActionId, from: ActionStatus, to: ActionStatus) -> Self {
        Self::for_action(QueueEventKind::StatusChanged { from, to }, action_id)
    }

    #[must_use]
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}
