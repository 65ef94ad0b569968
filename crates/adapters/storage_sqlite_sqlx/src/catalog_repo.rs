//! `SQLite` implementation of [`CatalogRepository`].

use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row};

use actionq_app::ports::CatalogRepository;
use actionq_domain::catalog::{ActionType, ActionTypeId, Catalog, Priority, PriorityId};
use actionq_domain::error::QueueError;
use actionq_domain::time::now;

use crate::SqliteQueueStore;
use crate::codec::{parse_timestamp, timestamp, unsigned};
use crate::error::StorageError;

struct TypeWrapper(ActionType);

impl<'r> FromRow<'r, SqliteRow> for TypeWrapper {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let max_retries: i64 = row.try_get("max_retries")?;
        let retry_base_delay_ms: Option<i64> = row.try_get("retry_base_delay_ms")?;
        let created_at: String = row.try_get("created_at")?;
        let updated_at: String = row.try_get("updated_at")?;

        Ok(Self(ActionType {
            id: ActionTypeId(row.try_get("id")?),
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            handler_name: row.try_get("handler_name")?,
            default_timeout_secs: row.try_get("default_timeout_secs")?,
            max_retries: unsigned(max_retries)?,
            retry_backoff_factor: row.try_get("retry_backoff_factor")?,
            retry_base_delay_ms: retry_base_delay_ms.map(unsigned::<u64>).transpose()?,
            enabled: row.try_get("enabled")?,
            created_at: parse_timestamp(&created_at)?,
            updated_at: parse_timestamp(&updated_at)?,
        }))
    }
}

struct PriorityWrapper(Priority);

impl<'r> FromRow<'r, SqliteRow> for PriorityWrapper {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self(Priority {
            id: PriorityId(row.try_get("id")?),
            name: row.try_get("name")?,
            weight: row.try_get("weight")?,
            description: row.try_get("description")?,
        }))
    }
}

const SELECT_TYPES: &str = "SELECT * FROM action_types ORDER BY id";
const SELECT_PRIORITIES: &str = "SELECT * FROM action_priorities ORDER BY weight";
const UPDATE_ENABLED: &str = "UPDATE action_types SET enabled = ?, updated_at = ? WHERE name = ?";

impl CatalogRepository for SqliteQueueStore {
    async fn load_catalog(&self) -> Result<Catalog, QueueError> {
        let action_types: Vec<TypeWrapper> = sqlx::query_as(SELECT_TYPES)
            .fetch_all(&self.pool)
            .await
            .map_err(StorageError::from)?;
        let priorities: Vec<PriorityWrapper> = sqlx::query_as(SELECT_PRIORITIES)
            .fetch_all(&self.pool)
            .await
            .map_err(StorageError::from)?;

        Ok(Catalog {
            action_types: action_types.into_iter().map(|w| w.0).collect(),
            priorities: priorities.into_iter().map(|w| w.0).collect(),
        })
    }

    async fn set_action_type_enabled(
        &self,
        name: String,
        enabled: bool,
    ) -> Result<bool, QueueError> {
        let updated = sqlx::query(UPDATE_ENABLED)
            .bind(enabled)
            .bind(timestamp(now()))
            .bind(&name)
            .execute(&self.pool)
            .await
            .map_err(StorageError::from)?
            .rows_affected();

        Ok(updated > 0)
    }
}
