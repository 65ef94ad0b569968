//! Queue settings — runtime-tunable parameters stored next to the queue.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{QueueError, ValidationError};
use crate::retry::RetryPolicy;
use crate::time::Timestamp;

pub const MAX_CONCURRENT_WORKERS: &str = "max_concurrent_workers";
pub const WORKER_POLL_INTERVAL_MS: &str = "worker_poll_interval_ms";
pub const DEFAULT_RETRY_BASE_DELAY_MS: &str = "default_retry_base_delay_ms";
pub const MAX_RETRY_DELAY_MS: &str = "max_retry_delay_ms";
pub const COMPLETED_ACTION_RETENTION_DAYS: &str = "completed_action_retention_days";
pub const DEAD_LETTER_RETENTION_DAYS: &str = "dead_letter_retention_days";
pub const HEALTH_WARNING_THRESHOLD: &str = "health_warning_threshold";
pub const HEALTH_CRITICAL_THRESHOLD: &str = "health_critical_threshold";
pub const QUEUE_SCHEMA_VERSION: &str = "queue_schema_version";

/// How a setting's text value is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettingType {
    Int,
    Float,
    Bool,
    String,
}

impl SettingType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Int => "int",
            Self::Float => "float",
            Self::Bool => "bool",
            Self::String => "string",
        }
    }

    #[must_use]
    pub fn accepts(self, value: &str) -> bool {
        match self {
            Self::Int => value.parse::<i64>().is_ok(),
            Self::Float => value.parse::<f64>().is_ok_and(f64::is_finite),
            Self::Bool => value.parse::<bool>().is_ok(),
            Self::String => true,
        }
    }
}

impl std::fmt::Display for SettingType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SettingType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "int" => Ok(Self::Int),
            "float" => Ok(Self::Float),
            "bool" => Ok(Self::Bool),
            "string" => Ok(Self::String),
            other => Err(format!("unknown setting type `{other}`")),
        }
    }
}

/// One row of the settings table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSetting {
    pub key: String,
    pub value: String,
    pub data_type: SettingType,
    pub description: String,
    pub is_readonly: bool,
    pub updated_at: Timestamp,
}

impl QueueSetting {
    /// Check that `value` may replace the current one.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::ReadonlySetting`] or
    /// [`ValidationError::InvalidSettingValue`].
    pub fn validate_update(&self, value: &str) -> Result<(), QueueError> {
        if self.is_readonly {
            return Err(ValidationError::ReadonlySetting(self.key.clone()).into());
        }
        if !self.data_type.accepts(value) {
            return Err(ValidationError::InvalidSettingValue {
                key: self.key.clone(),
                value: value.to_string(),
                data_type: self.data_type.to_string(),
            }
            .into());
        }
        if let (Some((min, max)), Ok(parsed)) = (int_bounds(&self.key), value.parse::<i64>()) {
            if !(min..=max).contains(&parsed) {
                return Err(ValidationError::SettingOutOfRange {
                    key: self.key.clone(),
                    value: parsed,
                    min,
                    max,
                }
                .into());
            }
        }
        Ok(())
    }
}

/// Accepted range of the integer settings the engine turns into durations.
fn int_bounds(key: &str) -> Option<(i64, i64)> {
    const DAY_MS: i64 = 24 * 60 * 60 * 1_000;
    match key {
        MAX_CONCURRENT_WORKERS => Some((1, 20)),
        WORKER_POLL_INTERVAL_MS => Some((1, 60 * 60 * 1_000)),
        DEFAULT_RETRY_BASE_DELAY_MS | MAX_RETRY_DELAY_MS => Some((0, DAY_MS)),
        COMPLETED_ACTION_RETENTION_DAYS | DEAD_LETTER_RETENTION_DAYS => Some((0, 36_500)),
        HEALTH_WARNING_THRESHOLD | HEALTH_CRITICAL_THRESHOLD => Some((0, i64::MAX)),
        _ => None,
    }
}

/// Pending-count thresholds used to classify queue health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthThresholds {
    pub warning: u64,
    pub critical: u64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            warning: 50,
            critical: 100,
        }
    }
}

/// Typed view over the settings the engine reads.
///
/// Missing or malformed rows fall back to the seeded defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSettings {
    pub max_concurrent_workers: u32,
    pub worker_poll_interval_ms: u64,
    pub default_retry_base_delay_ms: u64,
    pub max_retry_delay_ms: u64,
    pub completed_action_retention_days: u32,
    pub dead_letter_retention_days: u32,
    pub health: HealthThresholds,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_concurrent_workers: 5,
            worker_poll_interval_ms: 1_000,
            default_retry_base_delay_ms: 1_000,
            max_retry_delay_ms: 300_000,
            completed_action_retention_days: 30,
            dead_letter_retention_days: 7,
            health: HealthThresholds::default(),
        }
    }
}

impl QueueSettings {
    #[must_use]
    pub fn from_rows(rows: &[QueueSetting]) -> Self {
        fn read<T: FromStr>(rows: &[QueueSetting], key: &str, fallback: T) -> T {
            rows.iter()
                .find(|row| row.key == key)
                .and_then(|row| row.value.parse().ok())
                .unwrap_or(fallback)
        }

        let defaults = Self::default();
        Self {
            max_concurrent_workers: read(
                rows,
                MAX_CONCURRENT_WORKERS,
                defaults.max_concurrent_workers,
            ),
            worker_poll_interval_ms: read(
                rows,
                WORKER_POLL_INTERVAL_MS,
                defaults.worker_poll_interval_ms,
            ),
            default_retry_base_delay_ms: read(
                rows,
                DEFAULT_RETRY_BASE_DELAY_MS,
                defaults.default_retry_base_delay_ms,
            ),
            max_retry_delay_ms: read(rows, MAX_RETRY_DELAY_MS, defaults.max_retry_delay_ms),
            completed_action_retention_days: read(
                rows,
                COMPLETED_ACTION_RETENTION_DAYS,
                defaults.completed_action_retention_days,
            ),
            dead_letter_retention_days: read(
                rows,
                DEAD_LETTER_RETENTION_DAYS,
                defaults.dead_letter_retention_days,
            ),
            health: HealthThresholds {
                warning: read(rows, HEALTH_WARNING_THRESHOLD, defaults.health.warning),
                critical: read(rows, HEALTH_CRITICAL_THRESHOLD, defaults.health.critical),
            },
        }
    }

    /// Backoff policy for an action type whose own base delay may be unset.
    #[must_use]
    pub fn retry_policy(&self, type_base_delay_ms: Option<u64>) -> RetryPolicy {
        RetryPolicy {
            base_delay_ms: type_base_delay_ms.unwrap_or(self.default_retry_base_delay_ms),
            max_delay_ms: self.max_retry_delay_ms,
        }
    }
}
