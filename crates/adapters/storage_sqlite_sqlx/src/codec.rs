//! Column encoding shared by the repositories.
//!
//! Timestamps are stored as fixed-width RFC 3339 text in UTC with nanosecond
//! precision, so lexicographic order in SQL is chronological order.

use std::error::Error;
use std::str::FromStr;

use chrono::SecondsFormat;
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row};

use actionq_domain::action::QueuedAction;
use actionq_domain::catalog::{ActionTypeId, PriorityId};
use actionq_domain::id::ActionId;
use actionq_domain::time::Timestamp;

pub(crate) fn timestamp(ts: Timestamp) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub(crate) fn maybe_timestamp(ts: Option<Timestamp>) -> Option<String> {
    ts.map(timestamp)
}

pub(crate) fn json(value: &serde_json::Value) -> String {
    value.to_string()
}

pub(crate) fn maybe_json(value: Option<&serde_json::Value>) -> Option<String> {
    value.map(json)
}

fn decode_error(err: impl Into<Box<dyn Error + Send + Sync>>) -> sqlx::Error {
    sqlx::Error::Decode(err.into())
}

pub(crate) fn parse<T>(raw: &str) -> Result<T, sqlx::Error>
where
    T: FromStr,
    T::Err: Into<Box<dyn Error + Send + Sync>>,
{
    raw.parse().map_err(decode_error)
}

pub(crate) fn parse_timestamp(raw: &str) -> Result<Timestamp, sqlx::Error> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.to_utc())
        .map_err(decode_error)
}

pub(crate) fn parse_maybe_timestamp(raw: Option<String>) -> Result<Option<Timestamp>, sqlx::Error> {
    raw.as_deref().map(parse_timestamp).transpose()
}

pub(crate) fn parse_json(raw: &str) -> Result<serde_json::Value, sqlx::Error> {
    serde_json::from_str(raw).map_err(decode_error)
}

pub(crate) fn parse_maybe_json(
    raw: Option<String>,
) -> Result<Option<serde_json::Value>, sqlx::Error> {
    raw.as_deref().map(parse_json).transpose()
}

pub(crate) fn unsigned<T: TryFrom<i64>>(raw: i64) -> Result<T, sqlx::Error>
where
    T::Error: Into<Box<dyn Error + Send + Sync>>,
{
    T::try_from(raw).map_err(decode_error)
}

/// Wrapper for converting database rows into domain types without polluting
/// domain structs with database concerns.
pub(crate) struct ActionRow(pub QueuedAction);

impl<'r> FromRow<'r, SqliteRow> for ActionRow {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let id: String = row.try_get("id")?;
        let status: String = row.try_get("status")?;
        let parent_action_id: Option<String> = row.try_get("parent_action_id")?;
        let payload: String = row.try_get("payload")?;
        let max_retries: i64 = row.try_get("max_retries")?;
        let retry_count: i64 = row.try_get("retry_count")?;
        let created_at: String = row.try_get("created_at")?;
        let updated_at: String = row.try_get("updated_at")?;
        let execution_duration_ms: Option<i64> = row.try_get("execution_duration_ms")?;
        let version: i64 = row.try_get("version")?;

        Ok(Self(QueuedAction {
            id: parse(&id)?,
            action_type_id: ActionTypeId(row.try_get("action_type_id")?),
            priority_id: PriorityId(row.try_get("priority_id")?),
            status: parse(&status)?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            user_id: row.try_get("user_id")?,
            correlation_id: row.try_get("correlation_id")?,
            parent_action_id: parent_action_id.as_deref().map(parse::<ActionId>).transpose()?,
            payload: parse_json(&payload)?,
            target_entity_id: row.try_get("target_entity_id")?,
            timeout_seconds: row.try_get("timeout_seconds")?,
            max_retries: unsigned(max_retries)?,
            retry_count: unsigned(retry_count)?,
            retry_backoff_factor: row.try_get("retry_backoff_factor")?,
            scheduled_at: parse_maybe_timestamp(row.try_get("scheduled_at")?)?,
            execute_after: parse_maybe_timestamp(row.try_get("execute_after")?)?,
            deadline: parse_maybe_timestamp(row.try_get("deadline")?)?,
            started_at: parse_maybe_timestamp(row.try_get("started_at")?)?,
            completed_at: parse_maybe_timestamp(row.try_get("completed_at")?)?,
            last_attempt_at: parse_maybe_timestamp(row.try_get("last_attempt_at")?)?,
            next_retry_at: parse_maybe_timestamp(row.try_get("next_retry_at")?)?,
            result_data: parse_maybe_json(row.try_get("result_data")?)?,
            error_message: row.try_get("error_message")?,
            error_details: parse_maybe_json(row.try_get("error_details")?)?,
            claimed_by: row.try_get("claimed_by")?,
            created_at: parse_timestamp(&created_at)?,
            updated_at: parse_timestamp(&updated_at)?,
            created_by: row.try_get("created_by")?,
            execution_duration_ms: execution_duration_ms.map(unsigned::<u64>).transpose()?,
            version: unsigned(version)?,
        }))
    }
}

impl ActionRow {
    pub(crate) fn maybe(value: Option<Self>) -> Option<QueuedAction> {
        value.map(|w| w.0)
    }

    pub(crate) fn all(rows: Vec<Self>) -> Vec<QueuedAction> {
        rows.into_iter().map(|w| w.0).collect()
    }
}
