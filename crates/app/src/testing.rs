//! In-memory store and dispatcher shared by the service tests.
//!
//! Writes follow the same guarded semantics as the SQLite adapter: a
//! transition applies only while its guard holds against the stored row.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use actionq_domain::action::{ActionStatus, QueuedAction, StatusChange, TransitionGuard};
use actionq_domain::catalog::{ActionType, ActionTypeId, Catalog, Priority, PriorityId};
use actionq_domain::dependency::{ActionDependency, DependencyGraph, DependencyState};
use actionq_domain::error::QueueError;
use actionq_domain::execution::ExecutionError;
use actionq_domain::filter::{ActionFilter, ClearFilter, OrderBy, SortDirection};
use actionq_domain::id::{ActionId, DependencyId};
use actionq_domain::result::ActionResult;
use actionq_domain::settings::{self, QueueSetting, SettingType};
use actionq_domain::statistics::QueueCounts;
use actionq_domain::time::{Timestamp, now};

use crate::ports::{
    ActionDispatcher, ActionRepository, CatalogRepository, DependencyRepository,
    SettingsRepository,
};

#[derive(Default)]
struct State {
    catalog: Catalog,
    actions: HashMap<ActionId, (u64, QueuedAction)>,
    sequence: u64,
    dependencies: Vec<ActionDependency>,
    results: Vec<ActionResult>,
    settings: Vec<QueueSetting>,
    failing_catalog_loads: usize,
}

impl State {
    fn type_name(&self, action: &QueuedAction) -> String {
        self.catalog
            .action_type(action.action_type_id)
            .map(|t| t.name.clone())
            .unwrap_or_default()
    }

    fn priority(&self, action: &QueuedAction) -> (String, i32) {
        self.catalog
            .priority(action.priority_id)
            .map(|p| (p.name.clone(), p.weight))
            .unwrap_or_default()
    }

    fn remove(&mut self, id: ActionId) {
        self.actions.remove(&id);
        self.dependencies
            .retain(|dep| dep.action_id != id && dep.depends_on_action_id != id);
        self.results.retain(|result| result.action_id != id);
    }

    fn sorted(&self, mut rows: Vec<(u64, QueuedAction)>) -> Vec<QueuedAction> {
        rows.sort_by(|(seq_a, a), (seq_b, b)| {
            let (_, weight_a) = self.priority(a);
            let (_, weight_b) = self.priority(b);
            weight_b
                .cmp(&weight_a)
                .then(a.created_at.cmp(&b.created_at))
                .then(seq_a.cmp(seq_b))
        });
        rows.into_iter().map(|(_, action)| action).collect()
    }
}

/// Mutex-guarded maps implementing every storage port.
#[derive(Clone)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        let now = now();
        let action_type = |id: i64, name: &str, enabled: bool| ActionType {
            id: ActionTypeId(id),
            name: name.to_string(),
            description: String::new(),
            handler_name: format!("{name}_handler"),
            default_timeout_secs: 30,
            max_retries: 3,
            retry_backoff_factor: 2.0,
            retry_base_delay_ms: Some(1_000),
            enabled,
            created_at: now,
            updated_at: now,
        };
        let priority = |id: i64, name: &str, weight: i32| Priority {
            id: PriorityId(id),
            name: name.to_string(),
            weight,
            description: String::new(),
        };
        let setting = |key: &str, value: &str, is_readonly: bool| QueueSetting {
            key: key.to_string(),
            value: value.to_string(),
            data_type: SettingType::Int,
            description: String::new(),
            is_readonly,
            updated_at: now,
        };
        let state = State {
            catalog: Catalog {
                action_types: vec![
                    action_type(1, "service_call", true),
                    action_type(2, "notification_send", true),
                    action_type(3, "legacy", false),
                ],
                priorities: vec![
                    priority(1, "low", 1),
                    priority(2, "normal", 5),
                    priority(3, "high", 10),
                ],
            },
            settings: vec![
                setting(settings::MAX_CONCURRENT_WORKERS, "5", false),
                setting(settings::WORKER_POLL_INTERVAL_MS, "1000", false),
                setting(settings::DEFAULT_RETRY_BASE_DELAY_MS, "1000", false),
                setting(settings::MAX_RETRY_DELAY_MS, "300000", false),
                setting(settings::COMPLETED_ACTION_RETENTION_DAYS, "30", false),
                setting(settings::DEAD_LETTER_RETENTION_DAYS, "7", false),
                setting(settings::HEALTH_WARNING_THRESHOLD, "50", false),
                setting(settings::HEALTH_CRITICAL_THRESHOLD, "100", false),
                setting(settings::QUEUE_SCHEMA_VERSION, "1", true),
            ],
            ..State::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }
}

impl InMemoryStore {
    /// Make the next `times` catalog loads fail with a storage error.
    pub fn fail_catalog_loads(&self, times: usize) {
        self.state.lock().unwrap().failing_catalog_loads = times;
    }

    /// Overwrite a stored action, bypassing the guards.
    pub fn force(&self, action: QueuedAction) {
        let mut state = self.state.lock().unwrap();
        let seq = state.actions.get(&action.id).map_or(0, |(seq, _)| *seq);
        state.actions.insert(action.id, (seq, action));
    }

    pub fn snapshot(&self, id: ActionId) -> QueuedAction {
        self.state.lock().unwrap().actions[&id].1.clone()
    }
}

impl ActionRepository for InMemoryStore {
    fn create(
        &self,
        action: QueuedAction,
        dependencies: Vec<ActionDependency>,
    ) -> impl Future<Output = Result<QueuedAction, QueueError>> + Send {
        let mut state = self.state.lock().unwrap();
        state.sequence += 1;
        let seq = state.sequence;
        state.actions.insert(action.id, (seq, action.clone()));
        state.dependencies.extend(dependencies);
        async { Ok(action) }
    }

    fn get_by_id(
        &self,
        id: ActionId,
    ) -> impl Future<Output = Result<Option<QueuedAction>, QueueError>> + Send {
        let state = self.state.lock().unwrap();
        let result = state.actions.get(&id).map(|(_, action)| action.clone());
        async { Ok(result) }
    }

    fn list(
        &self,
        filter: ActionFilter,
    ) -> impl Future<Output = Result<Vec<QueuedAction>, QueueError>> + Send {
        let state = self.state.lock().unwrap();
        let mut rows: Vec<_> = state
            .actions
            .values()
            .filter(|(_, action)| {
                filter.matches(action, &state.type_name(action), &state.priority(action).0)
            })
            .cloned()
            .collect();
        rows.sort_by(|(seq_a, a), (seq_b, b)| {
            let ordering = match filter.order_by {
                OrderBy::CreatedAt => a.created_at.cmp(&b.created_at),
                OrderBy::UpdatedAt => a.updated_at.cmp(&b.updated_at),
                OrderBy::Priority => state.priority(a).1.cmp(&state.priority(b).1),
            }
            .then(seq_a.cmp(seq_b));
            match filter.direction {
                SortDirection::Asc => ordering,
                SortDirection::Desc => ordering.reverse(),
            }
        });
        let limit = filter.limit.map_or(usize::MAX, |limit| limit as usize);
        let result: Vec<_> = rows
            .into_iter()
            .map(|(_, action)| action)
            .skip(filter.offset as usize)
            .take(limit)
            .collect();
        async { Ok(result) }
    }

    fn replace(
        &self,
        mut action: QueuedAction,
        guard: TransitionGuard,
    ) -> impl Future<Output = Result<Option<QueuedAction>, QueueError>> + Send {
        let mut state = self.state.lock().unwrap();
        let result = match state.actions.get_mut(&action.id) {
            Some((_, current)) if guard.holds_for(current) => {
                action.version = current.version + 1;
                *current = action.clone();
                Some(action)
            }
            _ => None,
        };
        async { Ok(result) }
    }

    fn transition(
        &self,
        id: ActionId,
        change: StatusChange,
        guard: TransitionGuard,
        at: Timestamp,
        result: Option<ActionResult>,
    ) -> impl Future<Output = Result<Option<QueuedAction>, QueueError>> + Send {
        let mut state = self.state.lock().unwrap();
        let updated = match state.actions.get_mut(&id) {
            Some((_, current)) if guard.holds_for(current) => {
                current.apply(&change, at);
                Some(current.clone())
            }
            _ => None,
        };
        if updated.is_some() {
            state.results.extend(result);
        }
        async { Ok(updated) }
    }

    fn find_candidates(
        &self,
        now: Timestamp,
        limit: u32,
        offset: u32,
    ) -> impl Future<Output = Result<Vec<QueuedAction>, QueueError>> + Send {
        let state = self.state.lock().unwrap();
        let rows: Vec<_> = state
            .actions
            .values()
            .filter(|(_, action)| action.status.is_claimable() && action.time_gates_open(now))
            .cloned()
            .collect();
        let result: Vec<_> = state
            .sorted(rows)
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect();
        async { Ok(result) }
    }

    fn find_overdue(
        &self,
        now: Timestamp,
    ) -> impl Future<Output = Result<Vec<QueuedAction>, QueueError>> + Send {
        let state = self.state.lock().unwrap();
        let rows: Vec<_> = state
            .actions
            .values()
            .filter(|(_, action)| action.status.is_claimable() && action.is_overdue(now))
            .cloned()
            .collect();
        let result = state.sorted(rows);
        async { Ok(result) }
    }

    fn delete(
        &self,
        id: ActionId,
        statuses: Vec<ActionStatus>,
    ) -> impl Future<Output = Result<bool, QueueError>> + Send {
        let mut state = self.state.lock().unwrap();
        let allowed = state
            .actions
            .get(&id)
            .is_some_and(|(_, action)| statuses.contains(&action.status));
        if allowed {
            state.remove(id);
        }
        async move { Ok(allowed) }
    }

    fn clear(&self, filter: ClearFilter) -> impl Future<Output = Result<u64, QueueError>> + Send {
        let mut state = self.state.lock().unwrap();
        let ids: Vec<_> = state
            .actions
            .values()
            .filter(|(_, action)| filter.matches(action, &state.type_name(action)))
            .map(|(_, action)| action.id)
            .collect();
        for id in &ids {
            state.remove(*id);
        }
        let count = ids.len() as u64;
        async move { Ok(count) }
    }

    fn cleanup(
        &self,
        cutoff: Timestamp,
        statuses: Vec<ActionStatus>,
    ) -> impl Future<Output = Result<u64, QueueError>> + Send {
        let mut state = self.state.lock().unwrap();
        let ids: Vec<_> = state
            .actions
            .values()
            .filter(|(_, action)| {
                statuses.contains(&action.status)
                    && action.completed_at.unwrap_or(action.updated_at) < cutoff
            })
            .map(|(_, action)| action.id)
            .collect();
        for id in &ids {
            state.remove(*id);
        }
        let count = ids.len() as u64;
        async move { Ok(count) }
    }

    fn counts(&self) -> impl Future<Output = Result<QueueCounts, QueueError>> + Send {
        let state = self.state.lock().unwrap();
        let mut counts = QueueCounts::default();
        let mut durations = Vec::new();
        for (_, action) in state.actions.values() {
            *counts
                .by_status
                .entry(action.status.to_string())
                .or_default() += 1;
            *counts.by_priority.entry(state.priority(action).0).or_default() += 1;
            *counts
                .by_action_type
                .entry(state.type_name(action))
                .or_default() += 1;
            match action.status {
                ActionStatus::Pending => {
                    counts.oldest_pending_at = Some(
                        counts
                            .oldest_pending_at
                            .map_or(action.created_at, |ts| ts.min(action.created_at)),
                    );
                }
                ActionStatus::Completed => {
                    durations.extend(action.execution_duration_ms);
                    counts.last_completed_at = counts.last_completed_at.max(action.completed_at);
                }
                _ => {}
            }
        }
        if !durations.is_empty() {
            #[allow(clippy::cast_precision_loss)]
            let average = durations.iter().sum::<u64>() as f64 / durations.len() as f64;
            counts.average_execution_ms = Some(average);
        }
        async { Ok(counts) }
    }

    fn results(
        &self,
        id: ActionId,
    ) -> impl Future<Output = Result<Vec<ActionResult>, QueueError>> + Send {
        let state = self.state.lock().unwrap();
        let mut result: Vec<_> = state
            .results
            .iter()
            .filter(|result| result.action_id == id)
            .cloned()
            .collect();
        result.sort_by_key(|result| result.attempt_number);
        async { Ok(result) }
    }
}

impl CatalogRepository for InMemoryStore {
    fn load_catalog(&self) -> impl Future<Output = Result<Catalog, QueueError>> + Send {
        let mut state = self.state.lock().unwrap();
        let result = if state.failing_catalog_loads > 0 {
            state.failing_catalog_loads -= 1;
            Err(QueueError::Storage("catalog unavailable".into()))
        } else {
            Ok(state.catalog.clone())
        };
        async { result }
    }

    fn set_action_type_enabled(
        &self,
        name: String,
        enabled: bool,
    ) -> impl Future<Output = Result<bool, QueueError>> + Send {
        let mut state = self.state.lock().unwrap();
        let found = state
            .catalog
            .action_types
            .iter_mut()
            .find(|t| t.name == name)
            .map(|t| t.enabled = enabled)
            .is_some();
        async move { Ok(found) }
    }
}

impl DependencyRepository for InMemoryStore {
    fn edges(&self) -> impl Future<Output = Result<Vec<(ActionId, ActionId)>, QueueError>> + Send {
        let state = self.state.lock().unwrap();
        let edges: Vec<_> = state
            .dependencies
            .iter()
            .map(|dep| (dep.action_id, dep.depends_on_action_id))
            .collect();
        async { Ok(edges) }
    }

    fn add_dependency(
        &self,
        dependency: ActionDependency,
    ) -> impl Future<Output = Result<ActionDependency, QueueError>> + Send {
        let mut state = self.state.lock().unwrap();
        let graph = DependencyGraph::from_edges(
            state
                .dependencies
                .iter()
                .map(|dep| (dep.action_id, dep.depends_on_action_id)),
        );
        let outcome = graph
            .check_new_edge(dependency.action_id, dependency.depends_on_action_id)
            .map(|()| {
                state.dependencies.push(dependency.clone());
                dependency
            });
        async { outcome }
    }

    fn remove_dependency(
        &self,
        id: DependencyId,
    ) -> impl Future<Output = Result<bool, QueueError>> + Send {
        let mut state = self.state.lock().unwrap();
        let before = state.dependencies.len();
        state.dependencies.retain(|dep| dep.id != id);
        let removed = state.dependencies.len() != before;
        async move { Ok(removed) }
    }

    fn dependencies_of(
        &self,
        action_id: ActionId,
    ) -> impl Future<Output = Result<Vec<ActionDependency>, QueueError>> + Send {
        let state = self.state.lock().unwrap();
        let result: Vec<_> = state
            .dependencies
            .iter()
            .filter(|dep| dep.action_id == action_id)
            .cloned()
            .collect();
        async { Ok(result) }
    }

    fn dependency_states(
        &self,
        action_ids: Vec<ActionId>,
    ) -> impl Future<Output = Result<Vec<DependencyState>, QueueError>> + Send {
        let state = self.state.lock().unwrap();
        let result: Vec<_> = state
            .dependencies
            .iter()
            .filter(|dep| action_ids.contains(&dep.action_id))
            .map(|dep| DependencyState {
                action_id: dep.action_id,
                depends_on_action_id: dep.depends_on_action_id,
                dependency_type: dep.dependency_type,
                target_status: state
                    .actions
                    .get(&dep.depends_on_action_id)
                    .map(|(_, target)| target.status),
            })
            .collect();
        async { Ok(result) }
    }
}

impl SettingsRepository for InMemoryStore {
    fn get_settings(&self) -> impl Future<Output = Result<Vec<QueueSetting>, QueueError>> + Send {
        let result = self.state.lock().unwrap().settings.clone();
        async { Ok(result) }
    }

    fn get_setting(
        &self,
        key: String,
    ) -> impl Future<Output = Result<Option<QueueSetting>, QueueError>> + Send {
        let state = self.state.lock().unwrap();
        let result = state.settings.iter().find(|s| s.key == key).cloned();
        async { Ok(result) }
    }

    fn set_setting(
        &self,
        key: String,
        value: String,
        at: Timestamp,
    ) -> impl Future<Output = Result<Option<QueueSetting>, QueueError>> + Send {
        let mut state = self.state.lock().unwrap();
        let result = state
            .settings
            .iter_mut()
            .find(|s| s.key == key && !s.is_readonly)
            .map(|setting| {
                setting.value = value;
                setting.updated_at = at;
                setting.clone()
            });
        async { Ok(result) }
    }
}

/// Dispatcher that replays scripted outcomes, then succeeds.
#[derive(Clone, Default)]
pub struct ScriptedDispatcher {
    outcomes: Arc<Mutex<VecDeque<Result<Option<serde_json::Value>, ExecutionError>>>>,
    calls: Arc<AtomicUsize>,
    delay: Option<std::time::Duration>,
}

impl ScriptedDispatcher {
    pub fn failing_with(errors: impl IntoIterator<Item = ExecutionError>) -> Self {
        let dispatcher = Self::default();
        dispatcher
            .outcomes
            .lock()
            .unwrap()
            .extend(errors.into_iter().map(Err));
        dispatcher
    }

    pub fn sleeping(delay: std::time::Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ActionDispatcher for ScriptedDispatcher {
    fn dispatch(
        &self,
        action: QueuedAction,
        _action_type: ActionType,
    ) -> impl Future<Output = Result<Option<serde_json::Value>, ExecutionError>> + Send {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let outcome = self
            .outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Some(serde_json::json!({"handled": action.id.to_string()}))));
        let delay = self.delay;
        async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            outcome
        }
    }
}
