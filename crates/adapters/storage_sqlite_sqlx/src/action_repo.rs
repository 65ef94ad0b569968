//! `SQLite` implementation of [`ActionRepository`].

use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, QueryBuilder, Row, Sqlite, Transaction};

use actionq_app::ports::ActionRepository;
use actionq_domain::action::{ActionStatus, QueuedAction, StatusChange, TransitionGuard};
use actionq_domain::dependency::ActionDependency;
use actionq_domain::error::QueueError;
use actionq_domain::filter::{ActionFilter, ClearFilter, OrderBy, SortDirection};
use actionq_domain::id::{ActionId, ActionResultId};
use actionq_domain::result::ActionResult;
use actionq_domain::statistics::QueueCounts;
use actionq_domain::time::Timestamp;

use crate::SqliteQueueStore;
use crate::codec::{
    ActionRow, json, maybe_json, maybe_timestamp, parse, parse_maybe_json, parse_maybe_timestamp,
    parse_timestamp, timestamp, unsigned,
};
use crate::dependency_repo::insert_dependency;
use crate::error::StorageError;

/// Attempts of a status-only guarded write racing with unrelated updates.
const MAX_WRITE_ATTEMPTS: usize = 3;

struct ResultRow(ActionResult);

impl<'r> FromRow<'r, SqliteRow> for ResultRow {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let id: String = row.try_get("id")?;
        let action_id: String = row.try_get("action_id")?;
        let attempt_number: i64 = row.try_get("attempt_number")?;
        let status: String = row.try_get("status")?;
        let completed_at: String = row.try_get("completed_at")?;
        let duration_ms: i64 = row.try_get("duration_ms")?;

        Ok(Self(ActionResult {
            id: parse::<ActionResultId>(&id)?,
            action_id: parse::<ActionId>(&action_id)?,
            attempt_number: unsigned(attempt_number)?,
            status: parse(&status)?,
            started_at: parse_maybe_timestamp(row.try_get("started_at")?)?,
            completed_at: parse_timestamp(&completed_at)?,
            duration_ms: unsigned(duration_ms)?,
            success: row.try_get("success")?,
            result_data: parse_maybe_json(row.try_get("result_data")?)?,
            error_code: row.try_get("error_code")?,
            error_message: row.try_get("error_message")?,
            worker_id: row.try_get("worker_id")?,
            execution_context: parse_maybe_json(row.try_get("execution_context")?)?,
        }))
    }
}

const INSERT: &str = r"
    INSERT INTO queued_actions (
        id, action_type_id, priority_id, status, name, description, user_id, correlation_id,
        parent_action_id, payload, target_entity_id, timeout_seconds, max_retries, retry_count,
        retry_backoff_factor, scheduled_at, execute_after, deadline, started_at, completed_at,
        last_attempt_at, next_retry_at, result_data, error_message, error_details, claimed_by,
        created_at, updated_at, created_by, execution_duration_ms, version
    )
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?,
            ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
";

const SELECT_BY_ID: &str = "SELECT * FROM queued_actions WHERE id = ?";

// The version predicate pins the snapshot the new row was computed from.
const UPDATE_GUARDED: &str = r"
    UPDATE queued_actions
    SET priority_id = ?, status = ?, name = ?, description = ?, scheduled_at = ?,
        execute_after = ?, deadline = ?, started_at = ?, completed_at = ?, last_attempt_at = ?,
        next_retry_at = ?, retry_count = ?, result_data = ?, error_message = ?,
        error_details = ?, claimed_by = ?, updated_at = ?, execution_duration_ms = ?,
        version = version + 1
    WHERE id = ? AND version = ? AND status IN (SELECT value FROM json_each(?))
";

const INSERT_RESULT: &str = r"
    INSERT INTO action_results (
        id, action_id, attempt_number, status, started_at, completed_at, duration_ms, success,
        result_data, error_code, error_message, worker_id, execution_context
    )
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
";

const SELECT_CANDIDATES: &str = r"
    SELECT a.* FROM queued_actions a
    JOIN action_priorities p ON p.id = a.priority_id
    WHERE a.status IN ('pending', 'retrying')
      AND (a.scheduled_at IS NULL OR a.scheduled_at <= ?1)
      AND (a.execute_after IS NULL OR a.execute_after <= ?1)
      AND (a.next_retry_at IS NULL OR a.next_retry_at <= ?1)
      AND (a.deadline IS NULL OR a.deadline > ?1)
    ORDER BY p.weight DESC, a.created_at ASC, a.rowid ASC
    LIMIT ?2 OFFSET ?3
";

const SELECT_OVERDUE: &str = r"
    SELECT a.* FROM queued_actions a
    JOIN action_priorities p ON p.id = a.priority_id
    WHERE a.status IN ('pending', 'retrying')
      AND a.deadline IS NOT NULL AND a.deadline <= ?
    ORDER BY p.weight DESC, a.created_at ASC, a.rowid ASC
";

const DELETE_IN_STATUSES: &str =
    "DELETE FROM queued_actions WHERE id = ? AND status IN (SELECT value FROM json_each(?))";

const DELETE_OLDER_THAN: &str = r"
    DELETE FROM queued_actions
    WHERE status IN (SELECT value FROM json_each(?))
      AND COALESCE(completed_at, updated_at) < ?
";

const COUNT_BY_STATUS: &str = "SELECT status, COUNT(*) FROM queued_actions GROUP BY status";

const COUNT_BY_PRIORITY: &str = r"
    SELECT p.name, COUNT(*) FROM queued_actions a
    JOIN action_priorities p ON p.id = a.priority_id
    GROUP BY p.name
";

const COUNT_BY_TYPE: &str = r"
    SELECT t.name, COUNT(*) FROM queued_actions a
    JOIN action_types t ON t.id = a.action_type_id
    GROUP BY t.name
";

const SELECT_TIMINGS: &str = r"
    SELECT
        (SELECT AVG(execution_duration_ms) FROM queued_actions
            WHERE status = 'completed' AND execution_duration_ms IS NOT NULL),
        (SELECT MIN(created_at) FROM queued_actions WHERE status = 'pending'),
        (SELECT MAX(completed_at) FROM queued_actions WHERE status = 'completed')
";

const SELECT_RESULTS: &str =
    "SELECT * FROM action_results WHERE action_id = ? ORDER BY attempt_number, completed_at";

fn statuses_json(statuses: &[ActionStatus]) -> String {
    serde_json::Value::from(
        statuses
            .iter()
            .map(|status| status.as_str())
            .collect::<Vec<_>>(),
    )
    .to_string()
}

fn strings_json(values: &[String]) -> String {
    serde_json::Value::from(values.to_vec()).to_string()
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn tally(rows: Vec<(String, i64)>) -> Result<std::collections::BTreeMap<String, u64>, sqlx::Error> {
    rows.into_iter()
        .map(|(key, count)| Ok((key, unsigned(count)?)))
        .collect()
}

impl SqliteQueueStore {
    async fn fetch(&self, id: ActionId) -> Result<Option<QueuedAction>, StorageError> {
        let row: Option<ActionRow> = sqlx::query_as(SELECT_BY_ID)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Ok(ActionRow::maybe(row))
    }

    /// Store `action` over the row still at `expected_version`, appending
    /// `result` in the same transaction. Returns `false` when the row moved on.
    async fn write(
        &self,
        action: &QueuedAction,
        expected_version: u32,
        statuses: &[ActionStatus],
        result: Option<&ActionResult>,
    ) -> Result<bool, StorageError> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(UPDATE_GUARDED)
            .bind(action.priority_id.0)
            .bind(action.status.as_str())
            .bind(&action.name)
            .bind(&action.description)
            .bind(maybe_timestamp(action.scheduled_at))
            .bind(maybe_timestamp(action.execute_after))
            .bind(maybe_timestamp(action.deadline))
            .bind(maybe_timestamp(action.started_at))
            .bind(maybe_timestamp(action.completed_at))
            .bind(maybe_timestamp(action.last_attempt_at))
            .bind(maybe_timestamp(action.next_retry_at))
            .bind(i64::from(action.retry_count))
            .bind(maybe_json(action.result_data.as_ref()))
            .bind(&action.error_message)
            .bind(maybe_json(action.error_details.as_ref()))
            .bind(&action.claimed_by)
            .bind(timestamp(action.updated_at))
            .bind(action.execution_duration_ms.map(to_i64))
            .bind(action.id.to_string())
            .bind(i64::from(expected_version))
            .bind(statuses_json(statuses))
            .execute(&mut *tx)
            .await?
            .rows_affected();

        if updated == 0 {
            tx.rollback().await?;
            return Ok(false);
        }
        if let Some(result) = result {
            insert_result(&mut tx, result).await?;
        }
        tx.commit().await?;
        Ok(true)
    }
}

async fn insert_result(
    tx: &mut Transaction<'_, Sqlite>,
    result: &ActionResult,
) -> Result<(), StorageError> {
    sqlx::query(INSERT_RESULT)
        .bind(result.id.to_string())
        .bind(result.action_id.to_string())
        .bind(i64::from(result.attempt_number))
        .bind(result.status.as_str())
        .bind(maybe_timestamp(result.started_at))
        .bind(timestamp(result.completed_at))
        .bind(to_i64(result.duration_ms))
        .bind(result.success)
        .bind(maybe_json(result.result_data.as_ref()))
        .bind(&result.error_code)
        .bind(&result.error_message)
        .bind(&result.worker_id)
        .bind(maybe_json(result.execution_context.as_ref()))
        .execute(&mut **tx)
        .await?;
    Ok(())
}

fn push_filter<'a>(builder: &mut QueryBuilder<'a, Sqlite>, filter: &'a ActionFilter) {
    if !filter.statuses.is_empty() {
        builder
            .push(" AND a.status IN (SELECT value FROM json_each(")
            .push_bind(statuses_json(&filter.statuses))
            .push("))");
    }
    if !filter.priorities.is_empty() {
        builder
            .push(" AND p.name IN (SELECT value FROM json_each(")
            .push_bind(strings_json(&filter.priorities))
            .push("))");
    }
    if !filter.action_types.is_empty() {
        builder
            .push(" AND t.name IN (SELECT value FROM json_each(")
            .push_bind(strings_json(&filter.action_types))
            .push("))");
    }
    if let Some(user_id) = filter.user_id {
        builder.push(" AND a.user_id = ").push_bind(user_id);
    }
    if let Some(correlation_id) = &filter.correlation_id {
        builder
            .push(" AND a.correlation_id = ")
            .push_bind(correlation_id.as_str());
    }
    if let Some(target) = &filter.target_entity_id {
        builder
            .push(" AND a.target_entity_id = ")
            .push_bind(target.as_str());
    }
    let ranges = [
        (" AND a.created_at >= ", filter.created_after),
        (" AND a.created_at < ", filter.created_before),
        (" AND a.updated_at >= ", filter.updated_after),
        (" AND a.updated_at < ", filter.updated_before),
    ];
    for (clause, bound) in ranges {
        if let Some(bound) = bound {
            builder.push(clause).push_bind(timestamp(bound));
        }
    }
}

impl ActionRepository for SqliteQueueStore {
    async fn create(
        &self,
        action: QueuedAction,
        dependencies: Vec<ActionDependency>,
    ) -> Result<QueuedAction, QueueError> {
        let mut tx = self.pool.begin().await.map_err(StorageError::from)?;

        sqlx::query(INSERT)
            .bind(action.id.to_string())
            .bind(action.action_type_id.0)
            .bind(action.priority_id.0)
            .bind(action.status.as_str())
            .bind(&action.name)
            .bind(&action.description)
            .bind(action.user_id)
            .bind(&action.correlation_id)
            .bind(action.parent_action_id.map(|id| id.to_string()))
            .bind(json(&action.payload))
            .bind(&action.target_entity_id)
            .bind(action.timeout_seconds)
            .bind(i64::from(action.max_retries))
            .bind(i64::from(action.retry_count))
            .bind(action.retry_backoff_factor)
            .bind(maybe_timestamp(action.scheduled_at))
            .bind(maybe_timestamp(action.execute_after))
            .bind(maybe_timestamp(action.deadline))
            .bind(maybe_timestamp(action.started_at))
            .bind(maybe_timestamp(action.completed_at))
            .bind(maybe_timestamp(action.last_attempt_at))
            .bind(maybe_timestamp(action.next_retry_at))
            .bind(maybe_json(action.result_data.as_ref()))
            .bind(&action.error_message)
            .bind(maybe_json(action.error_details.as_ref()))
            .bind(&action.claimed_by)
            .bind(timestamp(action.created_at))
            .bind(timestamp(action.updated_at))
            .bind(&action.created_by)
            .bind(action.execution_duration_ms.map(to_i64))
            .bind(i64::from(action.version))
            .execute(&mut *tx)
            .await
            .map_err(StorageError::from)?;

        for dependency in &dependencies {
            insert_dependency(&mut *tx, dependency).await?;
        }

        tx.commit().await.map_err(StorageError::from)?;
        Ok(action)
    }

    async fn get_by_id(&self, id: ActionId) -> Result<Option<QueuedAction>, QueueError> {
        Ok(self.fetch(id).await?)
    }

    async fn list(&self, filter: ActionFilter) -> Result<Vec<QueuedAction>, QueueError> {
        let mut builder = QueryBuilder::<Sqlite>::new(
            r"SELECT a.* FROM queued_actions a
            JOIN action_types t ON t.id = a.action_type_id
            JOIN action_priorities p ON p.id = a.priority_id
            WHERE 1 = 1",
        );
        push_filter(&mut builder, &filter);

        let column = match filter.order_by {
            OrderBy::CreatedAt => "a.created_at",
            OrderBy::Priority => "p.weight",
            OrderBy::UpdatedAt => "a.updated_at",
        };
        let direction = match filter.direction {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        };
        builder.push(format!(
            " ORDER BY {column} {direction}, a.rowid {direction}"
        ));
        builder
            .push(" LIMIT ")
            .push_bind(filter.limit.map_or(-1, i64::from))
            .push(" OFFSET ")
            .push_bind(i64::from(filter.offset));

        let rows: Vec<ActionRow> = builder
            .build_query_as::<ActionRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(StorageError::from)?;

        Ok(ActionRow::all(rows))
    }

    async fn replace(
        &self,
        action: QueuedAction,
        guard: TransitionGuard,
    ) -> Result<Option<QueuedAction>, QueueError> {
        for _ in 0..MAX_WRITE_ATTEMPTS {
            let Some(current) = self.fetch(action.id).await? else {
                return Ok(None);
            };
            if !guard.holds_for(&current) {
                return Ok(None);
            }
            let mut next = action.clone();
            next.version = current.version + 1;
            if self
                .write(&next, current.version, &guard.statuses, None)
                .await?
            {
                return Ok(Some(next));
            }
            if guard.version.is_some() {
                return Ok(None);
            }
        }
        Ok(None)
    }

    async fn transition(
        &self,
        id: ActionId,
        change: StatusChange,
        guard: TransitionGuard,
        at: Timestamp,
        result: Option<ActionResult>,
    ) -> Result<Option<QueuedAction>, QueueError> {
        for _ in 0..MAX_WRITE_ATTEMPTS {
            let Some(mut action) = self.fetch(id).await? else {
                return Ok(None);
            };
            if !guard.holds_for(&action) {
                return Ok(None);
            }
            let expected_version = action.version;
            action.apply(&change, at);
            if self
                .write(&action, expected_version, &guard.statuses, result.as_ref())
                .await?
            {
                return Ok(Some(action));
            }
            if guard.version.is_some() {
                return Ok(None);
            }
            tracing::debug!(action_id = %id, "row changed during a status-guarded write, retrying");
        }
        Ok(None)
    }

    async fn find_candidates(
        &self,
        now: Timestamp,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<QueuedAction>, QueueError> {
        let rows: Vec<ActionRow> = sqlx::query_as(SELECT_CANDIDATES)
            .bind(timestamp(now))
            .bind(i64::from(limit))
            .bind(i64::from(offset))
            .fetch_all(&self.pool)
            .await
            .map_err(StorageError::from)?;

        Ok(ActionRow::all(rows))
    }

    async fn find_overdue(&self, now: Timestamp) -> Result<Vec<QueuedAction>, QueueError> {
        let rows: Vec<ActionRow> = sqlx::query_as(SELECT_OVERDUE)
            .bind(timestamp(now))
            .fetch_all(&self.pool)
            .await
            .map_err(StorageError::from)?;

        Ok(ActionRow::all(rows))
    }

    async fn delete(&self, id: ActionId, statuses: Vec<ActionStatus>) -> Result<bool, QueueError> {
        let deleted = sqlx::query(DELETE_IN_STATUSES)
            .bind(id.to_string())
            .bind(statuses_json(&statuses))
            .execute(&self.pool)
            .await
            .map_err(StorageError::from)?
            .rows_affected();

        Ok(deleted > 0)
    }

    async fn clear(&self, filter: ClearFilter) -> Result<u64, QueueError> {
        let mut builder = QueryBuilder::<Sqlite>::new("DELETE FROM queued_actions WHERE 1 = 1");
        if !filter.statuses.is_empty() {
            builder
                .push(" AND status IN (SELECT value FROM json_each(")
                .push_bind(statuses_json(&filter.statuses))
                .push("))");
        }
        if let Some(older_than) = filter.older_than {
            builder
                .push(" AND created_at < ")
                .push_bind(timestamp(older_than));
        }
        if let Some(action_type) = &filter.action_type {
            builder
                .push(" AND action_type_id IN (SELECT id FROM action_types WHERE name = ")
                .push_bind(action_type.as_str())
                .push(")");
        }
        if let Some(correlation_id) = &filter.correlation_id {
            builder
                .push(" AND correlation_id = ")
                .push_bind(correlation_id.as_str());
        }

        let deleted = builder
            .build()
            .execute(&self.pool)
            .await
            .map_err(StorageError::from)?
            .rows_affected();

        Ok(deleted)
    }

    async fn cleanup(
        &self,
        cutoff: Timestamp,
        statuses: Vec<ActionStatus>,
    ) -> Result<u64, QueueError> {
        let deleted = sqlx::query(DELETE_OLDER_THAN)
            .bind(statuses_json(&statuses))
            .bind(timestamp(cutoff))
            .execute(&self.pool)
            .await
            .map_err(StorageError::from)?
            .rows_affected();

        Ok(deleted)
    }

    async fn counts(&self) -> Result<QueueCounts, QueueError> {
        let by_status: Vec<(String, i64)> = sqlx::query_as(COUNT_BY_STATUS)
            .fetch_all(&self.pool)
            .await
            .map_err(StorageError::from)?;
        let by_priority: Vec<(String, i64)> = sqlx::query_as(COUNT_BY_PRIORITY)
            .fetch_all(&self.pool)
            .await
            .map_err(StorageError::from)?;
        let by_action_type: Vec<(String, i64)> = sqlx::query_as(COUNT_BY_TYPE)
            .fetch_all(&self.pool)
            .await
            .map_err(StorageError::from)?;
        let (average_execution_ms, oldest_pending_at, last_completed_at): (
            Option<f64>,
            Option<String>,
            Option<String>,
        ) = sqlx::query_as(SELECT_TIMINGS)
            .fetch_one(&self.pool)
            .await
            .map_err(StorageError::from)?;

        let decode = |err: sqlx::Error| QueueError::from(StorageError::from(err));
        Ok(QueueCounts {
            by_status: tally(by_status).map_err(decode)?,
            by_priority: tally(by_priority).map_err(decode)?,
            by_action_type: tally(by_action_type).map_err(decode)?,
            average_execution_ms,
            oldest_pending_at: parse_maybe_timestamp(oldest_pending_at).map_err(decode)?,
            last_completed_at: parse_maybe_timestamp(last_completed_at).map_err(decode)?,
        })
    }

    async fn results(&self, id: ActionId) -> Result<Vec<ActionResult>, QueueError> {
        let rows: Vec<ResultRow> = sqlx::query_as(SELECT_RESULTS)
            .bind(id.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(StorageError::from)?;

        Ok(rows.into_iter().map(|w| w.0).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::Config;
    use actionq_app::ports::DependencyRepository;
    use actionq_domain::catalog::{ActionTypeId, PriorityId};
    use actionq_domain::dependency::{DependencySpec, DependencyType};
    use actionq_domain::time::now;
    use chrono::Duration;
    use std::sync::Arc;

    async fn setup() -> SqliteQueueStore {
        Config::new("sqlite::memory:").build().await.unwrap().store()
    }

    // priority ids follow the seed: 1 low, 2 normal, 3 high
    fn action(name: &str, priority: i64) -> QueuedAction {
        let at = now();
        QueuedAction {
            id: ActionId::new(),
            action_type_id: ActionTypeId(2),
            priority_id: PriorityId(priority),
            status: ActionStatus::Pending,
            name: name.to_string(),
            description: None,
            user_id: Some(7),
            correlation_id: None,
            parent_action_id: None,
            payload: serde_json::json!({"domain": "light", "service": "turn_on"}),
            target_entity_id: Some("light.kitchen".to_string()),
            timeout_seconds: 60,
            max_retries: 3,
            retry_count: 0,
            retry_backoff_factor: 2.0,
            scheduled_at: None,
            execute_after: None,
            deadline: None,
            started_at: None,
            completed_at: None,
            last_attempt_at: None,
            next_retry_at: None,
            result_data: None,
            error_message: None,
            error_details: None,
            claimed_by: None,
            created_at: at,
            updated_at: at,
            created_by: Some("system".to_string()),
            execution_duration_ms: None,
            version: 0,
        }
    }

    fn claim(worker: &str) -> StatusChange {
        StatusChange::Claim {
            worker_id: worker.to_string(),
        }
    }

    #[tokio::test]
    async fn should_create_and_retrieve_action() {
        let store = setup().await;
        let created = store.create(action("porch", 2), Vec::new()).await.unwrap();

        let fetched = store.get_by_id(created.id).await.unwrap().unwrap();

        assert_eq!(fetched, created);
    }

    #[tokio::test]
    async fn should_return_none_when_action_not_found() {
        let store = setup().await;
        assert!(store.get_by_id(ActionId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn should_store_dependencies_with_action() {
        let store = setup().await;
        let first = store.create(action("first", 2), Vec::new()).await.unwrap();
        let second = action("second", 2);
        let edge = ActionDependency::new(
            second.id,
            DependencySpec::new(first.id, DependencyType::Success),
            now(),
        );

        store.create(second.clone(), vec![edge.clone()]).await.unwrap();

        assert_eq!(store.dependencies_of(second.id).await.unwrap(), vec![edge]);
    }

    #[tokio::test]
    async fn should_order_candidates_by_weight_then_age() {
        let store = setup().await;
        let base = now() - Duration::seconds(10);
        let mut low = action("low", 1);
        low.created_at = base;
        let mut high_late = action("high late", 3);
        high_late.created_at = base + Duration::seconds(2);
        let mut high_early = action("high early", 3);
        high_early.created_at = base + Duration::seconds(1);
        for a in [&low, &high_late, &high_early] {
            store.create(a.clone(), Vec::new()).await.unwrap();
        }

        let names: Vec<_> = store
            .find_candidates(now(), 10, 0)
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.name)
            .collect();

        assert_eq!(names, vec!["high early", "high late", "low"]);
    }

    #[tokio::test]
    async fn should_skip_candidates_with_closed_time_gates() {
        let store = setup().await;
        let at = now();
        let mut scheduled = action("later", 2);
        scheduled.scheduled_at = Some(at + Duration::minutes(5));
        let mut backing_off = action("backing off", 2);
        backing_off.status = ActionStatus::Retrying;
        backing_off.next_retry_at = Some(at + Duration::seconds(30));
        let mut expired = action("expired", 2);
        expired.deadline = Some(at - Duration::seconds(1));
        let mut due = action("due", 2);
        due.execute_after = Some(at - Duration::seconds(1));
        for a in [&scheduled, &backing_off, &expired, &due] {
            store.create(a.clone(), Vec::new()).await.unwrap();
        }

        let candidates = store.find_candidates(at, 10, 0).await.unwrap();
        let overdue = store.find_overdue(at).await.unwrap();

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].id, due.id);
        assert_eq!(overdue.len(), 1);
        assert_eq!(overdue[0].id, expired.id);
    }

    #[tokio::test]
    async fn should_page_candidates() {
        let store = setup().await;
        for i in 0..5 {
            store
                .create(action(&format!("a{i}"), 2), Vec::new())
                .await
                .unwrap();
        }
        let page = store.find_candidates(now(), 2, 3).await.unwrap();
        assert_eq!(page.len(), 2);
    }

    #[tokio::test]
    async fn should_apply_transition_when_guard_holds() {
        let store = setup().await;
        let created = store.create(action("porch", 2), Vec::new()).await.unwrap();
        let change = claim("worker_1");
        let at = now();

        let claimed = store
            .transition(created.id, change.clone(), created.guard_for(&change), at, None)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(claimed.status, ActionStatus::Processing);
        assert_eq!(claimed.version, 1);
        assert_eq!(claimed.claimed_by.as_deref(), Some("worker_1"));
        assert_eq!(store.get_by_id(created.id).await.unwrap().unwrap(), claimed);
    }

    #[tokio::test]
    async fn should_refuse_transition_when_version_is_stale() {
        let store = setup().await;
        let created = store.create(action("porch", 2), Vec::new()).await.unwrap();
        let change = claim("worker_1");
        let guard = created.guard_for(&change);
        store
            .transition(created.id, change.clone(), guard.clone(), now(), None)
            .await
            .unwrap()
            .unwrap();

        let second = store
            .transition(created.id, claim("worker_2"), guard, now(), None)
            .await
            .unwrap();

        assert!(second.is_none());
        let stored = store.get_by_id(created.id).await.unwrap().unwrap();
        assert_eq!(stored.claimed_by.as_deref(), Some("worker_1"));
    }

    #[tokio::test]
    async fn should_refuse_transition_from_wrong_status() {
        let store = setup().await;
        let created = store.create(action("porch", 2), Vec::new()).await.unwrap();
        let change = StatusChange::Complete {
            result_data: None,
            duration_ms: 5,
        };
        let outcome = store
            .transition(
                created.id,
                change.clone(),
                TransitionGuard::from_statuses(change.allowed_from()),
                now(),
                None,
            )
            .await
            .unwrap();
        assert!(outcome.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn should_let_exactly_one_claim_win_a_race() {
        let store = setup().await;
        let created = store.create(action("porch", 2), Vec::new()).await.unwrap();
        let store = Arc::new(store);

        let mut handles = Vec::new();
        for n in 0..8 {
            let store = Arc::clone(&store);
            let snapshot = created.clone();
            handles.push(tokio::spawn(async move {
                let change = claim(&format!("worker_{n}"));
                let guard = snapshot.guard_for(&change);
                store
                    .transition(snapshot.id, change, guard, now(), None)
                    .await
                    .unwrap()
            }));
        }
        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().is_some() {
                winners += 1;
            }
        }

        assert_eq!(winners, 1);
        let stored = store.get_by_id(created.id).await.unwrap().unwrap();
        assert_eq!(stored.version, 1);
    }

    #[tokio::test]
    async fn should_append_result_with_transition() {
        let store = setup().await;
        let created = store.create(action("porch", 2), Vec::new()).await.unwrap();
        let change = claim("worker_1");
        let claimed = store
            .transition(created.id, change.clone(), created.guard_for(&change), now(), None)
            .await
            .unwrap()
            .unwrap();
        let done = StatusChange::Complete {
            result_data: Some(serde_json::json!({"ok": true})),
            duration_ms: 12,
        };
        let at = now();
        let result = ActionResult {
            id: ActionResultId::new(),
            action_id: claimed.id,
            attempt_number: 1,
            status: ActionStatus::Completed,
            started_at: claimed.started_at,
            completed_at: at,
            duration_ms: 12,
            success: true,
            result_data: Some(serde_json::json!({"ok": true})),
            error_code: None,
            error_message: None,
            worker_id: Some("worker_1".to_string()),
            execution_context: Some(serde_json::json!({"handler": "service_call_handler"})),
        };

        store
            .transition(
                claimed.id,
                done.clone(),
                claimed.guard_for(&done),
                at,
                Some(result.clone()),
            )
            .await
            .unwrap()
            .unwrap();

        assert_eq!(store.results(claimed.id).await.unwrap(), vec![result]);
    }

    #[tokio::test]
    async fn should_not_append_result_when_guard_fails() {
        let store = setup().await;
        let created = store.create(action("porch", 2), Vec::new()).await.unwrap();
        let done = StatusChange::Complete {
            result_data: None,
            duration_ms: 1,
        };
        let result = ActionResult {
            id: ActionResultId::new(),
            action_id: created.id,
            attempt_number: 1,
            status: ActionStatus::Completed,
            started_at: None,
            completed_at: now(),
            duration_ms: 1,
            success: true,
            result_data: None,
            error_code: None,
            error_message: None,
            worker_id: None,
            execution_context: None,
        };

        let outcome = store
            .transition(created.id, done.clone(), created.guard_for(&done), now(), Some(result))
            .await
            .unwrap();

        assert!(outcome.is_none());
        assert!(store.results(created.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn should_replace_record_when_version_matches() {
        let store = setup().await;
        let created = store.create(action("porch", 2), Vec::new()).await.unwrap();
        let mut edited = created.clone();
        edited.name = "front porch".to_string();
        edited.priority_id = PriorityId(3);
        let guard = TransitionGuard {
            statuses: ActionStatus::CLAIMABLE.to_vec(),
            version: Some(created.version),
        };

        let replaced = store.replace(edited, guard.clone()).await.unwrap().unwrap();
        let stale = store.replace(created.clone(), guard).await.unwrap();

        assert_eq!(replaced.version, 1);
        assert_eq!(replaced.name, "front porch");
        assert!(stale.is_none());
    }

    #[tokio::test]
    async fn should_filter_and_sort_listing() {
        let store = setup().await;
        let base = now() - Duration::minutes(1);
        let mut first = action("first", 1);
        first.created_at = base;
        first.correlation_id = Some("bulk_1".to_string());
        let mut second = action("second", 3);
        second.created_at = base + Duration::seconds(1);
        second.correlation_id = Some("bulk_1".to_string());
        let mut other = action("other", 2);
        other.created_at = base + Duration::seconds(2);
        for a in [&first, &second, &other] {
            store.create(a.clone(), Vec::new()).await.unwrap();
        }

        let newest_first = store
            .list(ActionFilter::default().with_correlation_id("bulk_1"))
            .await
            .unwrap();
        let by_priority = store
            .list(
                ActionFilter::default()
                    .ordered(OrderBy::Priority, SortDirection::Asc)
                    .with_page(2, 0),
            )
            .await
            .unwrap();
        let high_only = store
            .list(ActionFilter {
                priorities: vec!["high".to_string()],
                action_types: vec!["service_call".to_string()],
                ..ActionFilter::default()
            })
            .await
            .unwrap();

        let names = |rows: Vec<QueuedAction>| rows.into_iter().map(|a| a.name).collect::<Vec<_>>();
        assert_eq!(names(newest_first), vec!["second", "first"]);
        assert_eq!(names(by_priority), vec!["first", "other"]);
        assert_eq!(names(high_only), vec!["second"]);
    }

    #[tokio::test]
    async fn should_delete_only_in_allowed_statuses() {
        let store = setup().await;
        let created = store.create(action("porch", 2), Vec::new()).await.unwrap();

        let refused = store
            .delete(created.id, vec![ActionStatus::Completed])
            .await
            .unwrap();
        let deleted = store
            .delete(created.id, vec![ActionStatus::Pending])
            .await
            .unwrap();

        assert!(!refused);
        assert!(deleted);
        assert!(store.get_by_id(created.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn should_cascade_delete_to_dependencies() {
        let store = setup().await;
        let first = store.create(action("first", 2), Vec::new()).await.unwrap();
        let second = action("second", 2);
        let edge = ActionDependency::new(
            second.id,
            DependencySpec::new(first.id, DependencyType::Completion),
            now(),
        );
        store.create(second.clone(), vec![edge]).await.unwrap();

        store
            .delete(first.id, vec![ActionStatus::Pending])
            .await
            .unwrap();

        assert!(store.dependencies_of(second.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn should_clear_matching_actions() {
        let store = setup().await;
        let mut tagged = action("tagged", 2);
        tagged.correlation_id = Some("bulk_9".to_string());
        store.create(tagged, Vec::new()).await.unwrap();
        store.create(action("kept", 2), Vec::new()).await.unwrap();

        let deleted = store
            .clear(ClearFilter {
                correlation_id: Some("bulk_9".to_string()),
                action_type: Some("service_call".to_string()),
                ..ClearFilter::default()
            })
            .await
            .unwrap();

        assert_eq!(deleted, 1);
        assert_eq!(store.list(ActionFilter::default()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn should_cleanup_terminal_actions_before_cutoff() {
        let store = setup().await;
        let at = now();
        let mut old = action("old", 2);
        old.status = ActionStatus::Completed;
        old.completed_at = Some(at - Duration::days(40));
        let mut recent = action("recent", 2);
        recent.status = ActionStatus::Completed;
        recent.completed_at = Some(at - Duration::days(1));
        let mut failed = action("failed", 2);
        failed.status = ActionStatus::Failed;
        failed.completed_at = Some(at - Duration::days(40));
        for a in [&old, &recent, &failed] {
            store.create(a.clone(), Vec::new()).await.unwrap();
        }

        let deleted = store
            .cleanup(at - Duration::days(30), vec![ActionStatus::Completed])
            .await
            .unwrap();

        assert_eq!(deleted, 1);
        assert!(store.get_by_id(old.id).await.unwrap().is_none());
        assert!(store.get_by_id(failed.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn should_aggregate_counts() {
        let store = setup().await;
        let mut done = action("done", 3);
        done.status = ActionStatus::Completed;
        done.completed_at = Some(now());
        done.execution_duration_ms = Some(100);
        let mut done_slow = action("done slow", 3);
        done_slow.status = ActionStatus::Completed;
        done_slow.completed_at = Some(now());
        done_slow.execution_duration_ms = Some(300);
        let waiting = action("waiting", 1);
        for a in [&done, &done_slow, &waiting] {
            store.create(a.clone(), Vec::new()).await.unwrap();
        }

        let counts = store.counts().await.unwrap();

        assert_eq!(counts.status(ActionStatus::Completed), 2);
        assert_eq!(counts.status(ActionStatus::Pending), 1);
        assert_eq!(counts.by_priority.get("high"), Some(&2));
        assert_eq!(counts.by_action_type.get("service_call"), Some(&3));
        assert_eq!(counts.average_execution_ms, Some(200.0));
        assert_eq!(counts.oldest_pending_at, Some(waiting.created_at));
        assert!(counts.last_completed_at.is_some());
    }
}
