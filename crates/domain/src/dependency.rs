//! Dependency graph — edges that gate an action on another action's outcome.
//!
//! An edge `action → depends_on` is satisfied once `depends_on` reaches a
//! terminal status matching the edge's [`DependencyType`]. Once satisfied it
//! stays satisfied: terminal statuses never change.

use std::collections::{HashMap, HashSet};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::action::ActionStatus;
use crate::error::{QueueError, ValidationError};
use crate::id::{ActionId, DependencyId};
use crate::time::Timestamp;

/// What outcome of the referenced action unblocks the dependent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyType {
    /// Any terminal status.
    #[default]
    Completion,
    /// Only `completed`.
    Success,
    /// Only `failed`, `timeout` or `cancelled`.
    Failure,
}

impl DependencyType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completion => "completion",
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }

    /// Whether `status` of the referenced action satisfies this edge.
    #[must_use]
    pub fn is_satisfied_by(self, status: ActionStatus) -> bool {
        match self {
            Self::Completion => status.is_terminal(),
            Self::Success => status == ActionStatus::Completed,
            Self::Failure => ActionStatus::UNSUCCESSFUL.contains(&status),
        }
    }

    /// Whether `status` can never satisfy this edge anymore.
    #[must_use]
    pub fn is_unsatisfiable_by(self, status: ActionStatus) -> bool {
        status.is_terminal() && !self.is_satisfied_by(status)
    }
}

impl std::fmt::Display for DependencyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DependencyType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "completion" => Ok(Self::Completion),
            "success" => Ok(Self::Success),
            "failure" => Ok(Self::Failure),
            other => Err(ValidationError::UnknownDependencyType(other.to_string())),
        }
    }
}

/// A dependency as given at submission time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencySpec {
    pub depends_on: ActionId,
    #[serde(default)]
    pub dependency_type: DependencyType,
}

impl DependencySpec {
    #[must_use]
    pub fn new(depends_on: ActionId, dependency_type: DependencyType) -> Self {
        Self {
            depends_on,
            dependency_type,
        }
    }
}

/// A stored dependency edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionDependency {
    pub id: DependencyId,
    pub action_id: ActionId,
    pub depends_on_action_id: ActionId,
    pub dependency_type: DependencyType,
    pub created_at: Timestamp,
}

impl ActionDependency {
    #[must_use]
    pub fn new(action_id: ActionId, spec: DependencySpec, created_at: Timestamp) -> Self {
        Self {
            id: DependencyId::new(),
            action_id,
            depends_on_action_id: spec.depends_on,
            dependency_type: spec.dependency_type,
            created_at,
        }
    }
}

/// An edge joined with the current status of its target.
///
/// `target_status` is `None` when the referenced action no longer exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyState {
    pub action_id: ActionId,
    pub depends_on_action_id: ActionId,
    pub dependency_type: DependencyType,
    pub target_status: Option<ActionStatus>,
}

impl DependencyState {
    #[must_use]
    pub fn is_satisfied(&self) -> bool {
        self.target_status
            .is_some_and(|status| self.dependency_type.is_satisfied_by(status))
    }

    /// A missing target is unsatisfiable as well.
    #[must_use]
    pub fn is_unsatisfiable(&self) -> bool {
        self.target_status
            .is_none_or(|status| self.dependency_type.is_unsatisfiable_by(status))
    }

    /// Human-readable reason the edge blocks forever.
    #[must_use]
    pub fn blocking_reason(&self) -> String {
        match self.target_status {
            Some(status) => format!(
                "dependency on {} requires {} but it ended {}",
                self.depends_on_action_id, self.dependency_type, status
            ),
            None => format!(
                "dependency on {} can never be met: action no longer exists",
                self.depends_on_action_id
            ),
        }
    }
}

/// Adjacency view of the existing `action → depends_on` edges.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    edges: HashMap<ActionId, Vec<ActionId>>,
}

impl DependencyGraph {
    #[must_use]
    pub fn from_edges(edges: impl IntoIterator<Item = (ActionId, ActionId)>) -> Self {
        let mut graph = Self::default();
        for (from, to) in edges {
            graph.insert(from, to);
        }
        graph
    }

    pub fn insert(&mut self, from: ActionId, to: ActionId) {
        self.edges.entry(from).or_default().push(to);
    }

    /// Whether `to` is reachable from `from` following existing edges.
    #[must_use]
    pub fn reaches(&self, from: ActionId, to: ActionId) -> bool {
        let mut stack = vec![from];
        let mut seen = HashSet::new();
        while let Some(node) = stack.pop() {
            if node == to {
                return true;
            }
            if !seen.insert(node) {
                continue;
            }
            if let Some(next) = self.edges.get(&node) {
                stack.extend(next.iter().copied());
            }
        }
        false
    }

    /// Check that adding `from → to` keeps the graph acyclic.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::SelfDependency`] or
    /// [`ValidationError::DependencyCycle`].
    pub fn check_new_edge(&self, from: ActionId, to: ActionId) -> Result<(), QueueError> {
        if from == to {
            return Err(ValidationError::SelfDependency.into());
        }
        if self.reaches(to, from) {
            return Err(ValidationError::DependencyCycle(to.to_string()).into());
        }
        Ok(())
    }

    /// Check then insert each edge in turn, so edges of one submission are
    /// checked against each other as well.
    ///
    /// # Errors
    ///
    /// See [`DependencyGraph::check_new_edge`].
    pub fn add_all(
        &mut self,
        from: ActionId,
        targets: impl IntoIterator<Item = ActionId>,
    ) -> Result<(), QueueError> {
        for to in targets {
            self.check_new_edge(from, to)?;
            self.insert(from, to);
        }
        Ok(())
    }
}
