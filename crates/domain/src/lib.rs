//! # actionq-domain
//!
//! Pure domain model for the actionq action queue.
//!
//! ## Responsibilities
//! - Foundational types: typed identifiers, error conventions, timestamps
//! - Define the **Catalog** (action types, priorities, statuses)
//! - Define **Queued actions** and their lifecycle state machine
//! - Define **Dependencies** between actions and reject cycles
//! - Decide **Readiness** as a pure predicate over an action, its dependency
//!   snapshot and the current time
//! - Define the **Retry policy** (exponential backoff, capped)
//! - Aggregate **Statistics** and classify queue health
//!
//! ## Dependency rule
//! This crate has **no internal dependencies**.
//! It must never import anything from `app`, adapters, or external IO crates.
//! All IO boundaries are expressed as traits in the `app` crate (ports).

pub mod error;
pub mod id;
pub mod time;

pub mod action;
pub mod catalog;
pub mod dependency;
pub mod event;
pub mod execution;
pub mod filter;
pub mod readiness;
pub mod result;
pub mod retry;
pub mod settings;
pub mod statistics;
