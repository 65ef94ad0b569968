//! `SQLite` implementation of [`SettingsRepository`].

use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row};

use actionq_app::ports::SettingsRepository;
use actionq_domain::error::QueueError;
use actionq_domain::settings::{QueueSetting, SettingType};
use actionq_domain::time::Timestamp;

use crate::SqliteQueueStore;
use crate::codec::{parse, parse_timestamp, timestamp};
use crate::error::StorageError;

struct Wrapper(QueueSetting);

impl Wrapper {
    fn maybe(value: Option<Self>) -> Option<QueueSetting> {
        value.map(|w| w.0)
    }
}

impl<'r> FromRow<'r, SqliteRow> for Wrapper {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let data_type: String = row.try_get("data_type")?;
        let updated_at: String = row.try_get("updated_at")?;

        Ok(Self(QueueSetting {
            key: row.try_get("key")?,
            value: row.try_get("value")?,
            data_type: parse::<SettingType>(&data_type)?,
            description: row.try_get("description")?,
            is_readonly: row.try_get("is_readonly")?,
            updated_at: parse_timestamp(&updated_at)?,
        }))
    }
}

const SELECT_ALL: &str = "SELECT * FROM queue_settings ORDER BY key";
const SELECT_BY_KEY: &str = "SELECT * FROM queue_settings WHERE key = ?";
const UPDATE_VALUE: &str = r"
    UPDATE queue_settings SET value = ?, updated_at = ?
    WHERE key = ? AND is_readonly = 0
    RETURNING *
";

impl SettingsRepository for SqliteQueueStore {
    async fn get_settings(&self) -> Result<Vec<QueueSetting>, QueueError> {
        let rows: Vec<Wrapper> = sqlx::query_as(SELECT_ALL)
            .fetch_all(&self.pool)
            .await
            .map_err(StorageError::from)?;

        Ok(rows.into_iter().map(|w| w.0).collect())
    }

    async fn get_setting(&self, key: String) -> Result<Option<QueueSetting>, QueueError> {
        let row: Option<Wrapper> = sqlx::query_as(SELECT_BY_KEY)
            .bind(&key)
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::from)?;

        Ok(Wrapper::maybe(row))
    }

    async fn set_setting(
        &self,
        key: String,
        value: String,
        at: Timestamp,
    ) -> Result<Option<QueueSetting>, QueueError> {
        let row: Option<Wrapper> = sqlx::query_as(UPDATE_VALUE)
            .bind(&value)
            .bind(timestamp(at))
            .bind(&key)
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::from)?;

        Ok(Wrapper::maybe(row))
    }
}
