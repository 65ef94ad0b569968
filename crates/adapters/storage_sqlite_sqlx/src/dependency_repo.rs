//! `SQLite` implementation of [`DependencyRepository`].

use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row, SqliteConnection};

use actionq_app::ports::DependencyRepository;
use actionq_domain::action::ActionStatus;
use actionq_domain::dependency::{ActionDependency, DependencyState, DependencyType};
use actionq_domain::error::{QueueError, ValidationError};
use actionq_domain::id::{ActionId, DependencyId};

use crate::SqliteQueueStore;
use crate::codec::{parse, parse_timestamp, timestamp};
use crate::error::StorageError;

struct Wrapper(ActionDependency);

impl<'r> FromRow<'r, SqliteRow> for Wrapper {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let id: String = row.try_get("id")?;
        let action_id: String = row.try_get("action_id")?;
        let depends_on: String = row.try_get("depends_on_action_id")?;
        let dependency_type: String = row.try_get("dependency_type")?;
        let created_at: String = row.try_get("created_at")?;

        Ok(Self(ActionDependency {
            id: parse::<DependencyId>(&id)?,
            action_id: parse::<ActionId>(&action_id)?,
            depends_on_action_id: parse::<ActionId>(&depends_on)?,
            dependency_type: parse::<DependencyType>(&dependency_type)?,
            created_at: parse_timestamp(&created_at)?,
        }))
    }
}

struct StateWrapper(DependencyState);

impl<'r> FromRow<'r, SqliteRow> for StateWrapper {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let action_id: String = row.try_get("action_id")?;
        let depends_on: String = row.try_get("depends_on_action_id")?;
        let dependency_type: String = row.try_get("dependency_type")?;
        let target_status: Option<String> = row.try_get("target_status")?;

        Ok(Self(DependencyState {
            action_id: parse::<ActionId>(&action_id)?,
            depends_on_action_id: parse::<ActionId>(&depends_on)?,
            dependency_type: parse::<DependencyType>(&dependency_type)?,
            target_status: target_status
                .as_deref()
                .map(parse::<ActionStatus>)
                .transpose()?,
        }))
    }
}

const INSERT: &str = r"
    INSERT INTO action_dependencies
        (id, action_id, depends_on_action_id, dependency_type, created_at)
    VALUES (?, ?, ?, ?, ?)
";

// Whether the first bound action reaches the second along existing edges.
const REACHES: &str = r"
    WITH RECURSIVE reach(id) AS (
        SELECT ?
        UNION
        SELECT d.depends_on_action_id
        FROM action_dependencies d
        JOIN reach r ON d.action_id = r.id
    )
    SELECT EXISTS (SELECT 1 FROM reach WHERE id = ?)
";

const SELECT_EDGES: &str = "SELECT action_id, depends_on_action_id FROM action_dependencies";
const SELECT_BY_ACTION: &str =
    "SELECT * FROM action_dependencies WHERE action_id = ? ORDER BY created_at, rowid";
const DELETE_BY_ID: &str = "DELETE FROM action_dependencies WHERE id = ?";

const SELECT_STATES: &str = r"
    SELECT d.action_id, d.depends_on_action_id, d.dependency_type, t.status AS target_status
    FROM action_dependencies d
    LEFT JOIN queued_actions t ON t.id = d.depends_on_action_id
    WHERE d.action_id IN (SELECT value FROM json_each(?))
";

/// Insert one edge on `conn`, usually inside the transaction creating its action.
pub(crate) async fn insert_dependency(
    conn: &mut SqliteConnection,
    dependency: &ActionDependency,
) -> Result<(), StorageError> {
    sqlx::query(INSERT)
        .bind(dependency.id.to_string())
        .bind(dependency.action_id.to_string())
        .bind(dependency.depends_on_action_id.to_string())
        .bind(dependency.dependency_type.as_str())
        .bind(timestamp(dependency.created_at))
        .execute(conn)
        .await?;
    Ok(())
}

impl DependencyRepository for SqliteQueueStore {
    async fn edges(&self) -> Result<Vec<(ActionId, ActionId)>, QueueError> {
        let rows: Vec<(String, String)> = sqlx::query_as(SELECT_EDGES)
            .fetch_all(&self.pool)
            .await
            .map_err(StorageError::from)?;

        rows.iter()
            .map(|(from, to)| Ok((parse::<ActionId>(from)?, parse::<ActionId>(to)?)))
            .collect::<Result<_, sqlx::Error>>()
            .map_err(|err| StorageError::from(err).into())
    }

    async fn add_dependency(
        &self,
        dependency: ActionDependency,
    ) -> Result<ActionDependency, QueueError> {
        if dependency.action_id == dependency.depends_on_action_id {
            return Err(ValidationError::SelfDependency.into());
        }
        let mut tx = self.pool.begin().await.map_err(StorageError::from)?;

        // the insert takes the write lock ahead of the reachability read
        insert_dependency(&mut *tx, &dependency).await?;
        let cycle: bool = sqlx::query_scalar(REACHES)
            .bind(dependency.depends_on_action_id.to_string())
            .bind(dependency.action_id.to_string())
            .fetch_one(&mut *tx)
            .await
            .map_err(StorageError::from)?;
        if cycle {
            tx.rollback().await.map_err(StorageError::from)?;
            return Err(ValidationError::DependencyCycle(
                dependency.depends_on_action_id.to_string(),
            )
            .into());
        }

        tx.commit().await.map_err(StorageError::from)?;
        Ok(dependency)
    }

    async fn remove_dependency(&self, id: DependencyId) -> Result<bool, QueueError> {
        let removed = sqlx::query(DELETE_BY_ID)
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(StorageError::from)?
            .rows_affected();

        Ok(removed > 0)
    }

    async fn dependencies_of(
        &self,
        action_id: ActionId,
    ) -> Result<Vec<ActionDependency>, QueueError> {
        let rows: Vec<Wrapper> = sqlx::query_as(SELECT_BY_ACTION)
            .bind(action_id.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(StorageError::from)?;

        Ok(rows.into_iter().map(|w| w.0).collect())
    }

    async fn dependency_states(
        &self,
        action_ids: Vec<ActionId>,
    ) -> Result<Vec<DependencyState>, QueueError> {
        if action_ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids = serde_json::Value::from(
            action_ids
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>(),
        );
        let rows: Vec<StateWrapper> = sqlx::query_as(SELECT_STATES)
            .bind(ids.to_string())
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
    use actionq_app::ports::ActionRepository;
    use actionq_domain::action::{QueuedAction, StatusChange};
    use actionq_domain::catalog::{ActionTypeId, PriorityId};
    use actionq_domain::dependency::DependencySpec;
    use actionq_domain::time::now;

    async fn setup() -> SqliteQueueStore {
        Config::new("sqlite::memory:").build().await.unwrap().store()
    }

    async fn stored(store: &SqliteQueueStore, name: &str) -> QueuedAction {
        let at = now();
        let action = QueuedAction {
            id: ActionId::new(),
            action_type_id: ActionTypeId(7),
            priority_id: PriorityId(2),
            status: ActionStatus::Pending,
            name: name.to_string(),
            description: None,
            user_id: None,
            correlation_id: None,
            parent_action_id: None,
            payload: serde_json::json!({"message": name}),
            target_entity_id: None,
            timeout_seconds: 30,
            max_retries: 5,
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
            created_by: None,
            execution_duration_ms: None,
            version: 0,
        };
        store.create(action, Vec::new()).await.unwrap()
    }

    #[tokio::test]
    async fn should_add_list_and_remove_dependency() {
        let store = setup().await;
        let first = stored(&store, "first").await;
        let second = stored(&store, "second").await;
        let edge = ActionDependency::new(
            second.id,
            DependencySpec::new(first.id, DependencyType::Failure),
            now(),
        );

        store.add_dependency(edge.clone()).await.unwrap();
        assert_eq!(store.dependencies_of(second.id).await.unwrap(), vec![edge.clone()]);
        assert_eq!(store.edges().await.unwrap(), vec![(second.id, first.id)]);

        assert!(store.remove_dependency(edge.id).await.unwrap());
        assert!(!store.remove_dependency(edge.id).await.unwrap());
        assert!(store.dependencies_of(second.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn should_reject_duplicate_edge() {
        let store = setup().await;
        let first = stored(&store, "first").await;
        let second = stored(&store, "second").await;
        let spec = DependencySpec::new(first.id, DependencyType::Completion);

        store
            .add_dependency(ActionDependency::new(second.id, spec, now()))
            .await
            .unwrap();
        let duplicate = store
            .add_dependency(ActionDependency::new(second.id, spec, now()))
            .await;

        assert!(matches!(duplicate, Err(QueueError::Storage(_))));
    }

    #[tokio::test]
    async fn should_refuse_edge_closing_a_cycle_and_keep_graph_unchanged() {
        let store = setup().await;
        let first = stored(&store, "first").await;
        let second = stored(&store, "second").await;
        let third = stored(&store, "third").await;
        let edge = |from: &QueuedAction, to: &QueuedAction| {
            ActionDependency::new(
                from.id,
                DependencySpec::new(to.id, DependencyType::Completion),
                now(),
            )
        };
        store.add_dependency(edge(&second, &first)).await.unwrap();
        store.add_dependency(edge(&third, &second)).await.unwrap();

        let closing = store.add_dependency(edge(&first, &third)).await;
        assert!(matches!(
            closing,
            Err(QueueError::Validation(ValidationError::DependencyCycle(_)))
        ));
        let own = store.add_dependency(edge(&first, &first)).await;
        assert!(matches!(
            own,
            Err(QueueError::Validation(ValidationError::SelfDependency))
        ));

        assert!(store.dependencies_of(first.id).await.unwrap().is_empty());
        assert_eq!(store.edges().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn should_join_target_status_into_states() {
        let store = setup().await;
        let first = stored(&store, "first").await;
        let second = stored(&store, "second").await;
        let third = stored(&store, "third").await;
        store
            .add_dependency(ActionDependency::new(
                third.id,
                DependencySpec::new(first.id, DependencyType::Success),
                now(),
            ))
            .await
            .unwrap();
        let change = StatusChange::Cancel { reason: None };
        store
            .transition(first.id, change.clone(), first.guard_for(&change), now(), None)
            .await
            .unwrap()
            .unwrap();

        let states = store
            .dependency_states(vec![second.id, third.id])
            .await
            .unwrap();

        assert_eq!(states.len(), 1);
        assert_eq!(states[0].action_id, third.id);
        assert_eq!(states[0].target_status, Some(ActionStatus::Cancelled));
        assert!(states[0].is_unsatisfiable());
    }

    #[tokio::test]
    async fn should_return_no_states_for_empty_input() {
        let store = setup().await;
        assert!(store.dependency_states(Vec::new()).await.unwrap().is_empty());
    }
}
