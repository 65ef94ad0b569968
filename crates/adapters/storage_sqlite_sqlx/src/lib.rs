//! # actionq-adapter-storage-sqlite-sqlx
//!
//! `SQLite` persistence adapter using [sqlx](https://docs.rs/sqlx).
//!
//! ## Responsibilities
//! - Implement every storage port of `actionq-app` on a single [`SqliteQueueStore`]
//! - Manage `SQLite` connection pool lifecycle
//! - Run the embedded migrations, which also seed the catalog and settings
//! - Map between domain types and database rows
//!
//! Every write to an existing action is one conditional `UPDATE` on its
//! `version` and `status`, so concurrent workers (or processes) sharing a
//! database never both win the same claim.
//!
//! ## Dependency rule
//! Depends on `actionq-app` (for port traits) and `actionq-domain` (for domain types).
//! The `app` and `domain` crates must never reference this adapter.

mod action_repo;
mod catalog_repo;
mod codec;
mod dependency_repo;
pub mod error;
pub mod pool;
mod settings_repo;

use sqlx::SqlitePool;

pub use pool::{Config, Database};

/// `SQLite`-backed implementation of every queue storage port.
#[derive(Debug, Clone)]
pub struct SqliteQueueStore {
    pool: SqlitePool,
}

impl SqliteQueueStore {
    /// Create a new store using the given connection pool.
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}
