//! # actionq-app
//!
//! Application layer — use-cases and **port definitions** (traits).
//!
//! ## Responsibilities
//! - Define **port traits** that adapters must implement (driven/outbound ports):
//!   - `CatalogRepository` — action types and priorities
//!   - `ActionRepository` — queued actions, guarded status changes, attempt history
//!   - `DependencyRepository` — dependency edges and their target statuses
//!   - `SettingsRepository` — runtime-tunable queue settings
//!   - `EventPublisher` — queue event notifications
//!   - `ActionDispatcher` — runs a claimed action
//! - Define **driving/inbound** use-cases:
//!   - `QueueService` — enqueue, complete, cancel, clear, cleanup, statistics
//!   - `Scheduler` — select ready actions, claim, expire overdue work
//!   - `WorkerPool` — polling workers and the maintenance loop
//! - Provide **in-process infrastructure** (event bus) that doesn't need IO
//!
//! ## Dependency rule
//! Depends on `actionq-domain` only (plus `tokio` for channels, timers and tasks).
//! Never imports adapter crates. Adapters depend on *this* crate, not the reverse.

pub mod event_bus;
pub mod ports;
pub mod services;

#[cfg(test)]
mod testing;
