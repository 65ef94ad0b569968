//! Configuration loading — TOML file with environment variable overrides.
//!
//! Looks for `actionq.toml` in the working directory. Every field has a
//! sensible default so the file is optional. Environment variables take
//! precedence over file values.

use std::time::Duration;

use serde::Deserialize;

use actionq_app::services::worker_pool::WorkerPoolConfig;
use actionq_domain::settings::QueueSettings;

/// Most workers a single daemon runs.
pub const MAX_WORKERS: usize = 20;

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Database settings.
    pub database: DatabaseConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
    /// Worker pool settings.
    pub worker: WorkerConfig,
}

/// `SQLite` database configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// `SQLite` connection URL or file path.
    pub url: String,
    pub max_connections: u32,
}

/// Logging configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive (`RUST_LOG` syntax).
    pub filter: String,
}

/// Worker pool configuration.
///
/// `count` and `poll_interval_ms` fall back to the `max_concurrent_workers`
/// and `worker_poll_interval_ms` queue settings when unset.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub count: Option<usize>,
    pub poll_interval_ms: Option<u64>,
    pub batch_size: u32,
    pub maintenance_interval_secs: u64,
    pub worker_id_prefix: String,
    /// Log claimed actions and report them as done without running anything.
    pub dry_run: bool,
}

impl Config {
    /// Load configuration from `actionq.toml` (if present) then apply
    /// environment-variable overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML file exists but is malformed, or if the
    /// resulting values are out of range.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::from_file("actionq.toml")?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(ConfigError::Parse),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(ConfigError::Io(err)),
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("ACTIONQ_DATABASE_URL") {
            self.database.url = val;
        }
        if let Ok(val) = std::env::var("ACTIONQ_WORKERS") {
            if let Ok(count) = val.parse() {
                self.worker.count = Some(count);
            }
        }
        if let Ok(val) = std::env::var("ACTIONQ_POLL_INTERVAL_MS") {
            if let Ok(interval) = val.parse() {
                self.worker.poll_interval_ms = Some(interval);
            }
        }
        if let Ok(val) = std::env::var("ACTIONQ_LOG") {
            self.logging.filter = val;
        }
        if let Ok(val) = std::env::var("RUST_LOG") {
            self.logging.filter = val;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(count) = self.worker.count {
            if !(1..=MAX_WORKERS).contains(&count) {
                return Err(ConfigError::Validation(format!(
                    "worker count must be between 1 and {MAX_WORKERS}, got {count}"
                )));
            }
        }
        if self.worker.poll_interval_ms == Some(0) {
            return Err(ConfigError::Validation(
                "poll interval must be non-zero".to_string(),
            ));
        }
        if self.worker.batch_size == 0 {
            return Err(ConfigError::Validation(
                "batch size must be non-zero".to_string(),
            ));
        }
        if self.worker.maintenance_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "maintenance interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Return the database URL in `sqlx`-compatible format.
    #[must_use]
    pub fn database_url(&self) -> &str {
        &self.database.url
    }

    /// Pool tuning seeded from the stored queue settings, with explicit
    /// file or environment values taking precedence.
    #[must_use]
    pub fn worker_pool(&self, settings: &QueueSettings) -> WorkerPoolConfig {
        let seeded = WorkerPoolConfig::from_settings(settings);
        WorkerPoolConfig {
            workers: self.worker.count.unwrap_or(seeded.workers.min(MAX_WORKERS)),
            poll_interval: self
                .worker
                .poll_interval_ms
                .map_or(seeded.poll_interval, Duration::from_millis),
            batch_size: self.worker.batch_size,
            maintenance_interval: Duration::from_secs(self.worker.maintenance_interval_secs),
            worker_id_prefix: self.worker.worker_id_prefix.clone(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:actionq.db?mode=rwc".to_string(),
            max_connections: 5,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "actionqd=info,actionq_app=info,actionq_adapter_storage_sqlite_sqlx=info"
                .to_string(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: None,
            poll_interval_ms: None,
            batch_size: 1,
            maintenance_interval_secs: 600,
            worker_id_prefix: "worker".to_string(),
            dry_run: true,
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parse failure.
    #[error("failed to parse config file")]
    Parse(#[from] toml::de::Error),
    /// File I/O failure.
    #[error("failed to read config file")]
    Io(#[from] std::io::Error),
    /// Semantic validation failure.
    #[error("invalid configuration: {0}")]
    Validation(String),
}
