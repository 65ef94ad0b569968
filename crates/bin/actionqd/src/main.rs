//! # actionqd — actionq daemon
//!
//! Composition root that wires storage, the queue services and the worker
//! pool together, then runs until asked to stop.
//!
//! ## Responsibilities
//! - Parse configuration (config file, env vars)
//! - Install the `tracing` subscriber
//! - Initialize the `SQLite` connection pool and run migrations
//! - Construct the store, the event bus and the application services
//! - Spawn the worker pool and its maintenance loop
//! - Handle graceful shutdown (SIGTERM/SIGINT), letting in-flight actions finish
//!
//! ## Dependency rule
//! This is the **only** crate that depends on all other crates.
//! It is the wiring layer — no domain logic belongs here.

mod config;
mod dispatcher;

use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tracing_subscriber::EnvFilter;

use actionq_adapter_storage_sqlite_sqlx::{Config as StorageConfig, SqliteQueueStore};
use actionq_app::event_bus::InProcessEventBus;
use actionq_app::services::queue_service::QueueService;
use actionq_app::services::scheduler::Scheduler;
use actionq_app::services::worker_pool::WorkerPool;

use crate::config::Config;
use crate::dispatcher::LoggingDispatcher;

type Pool = WorkerPool<SqliteQueueStore, Arc<InProcessEventBus>, LoggingDispatcher>;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&config.logging.filter)?)
        .init();

    // Database
    let db = StorageConfig {
        database_url: config.database_url().to_string(),
        max_connections: config.database.max_connections,
    }
    .build()
    .await?;
    let store = db.store();

    // Event bus
    let event_bus = Arc::new(InProcessEventBus::new(256));

    // Services
    let service = Arc::new(QueueService::new(store.clone(), Arc::clone(&event_bus)));
    let scheduler = Arc::new(Scheduler::new(store, Arc::clone(&event_bus)));

    let stats = service.statistics().await?;
    tracing::info!(
        pending = stats.pending,
        processing = stats.processing,
        retrying = stats.retrying,
        health = ?stats.health,
        "queue opened"
    );

    // Workers
    let settings = service.queue_settings().await?;
    let pool = Arc::new(WorkerPool::new(
        Arc::clone(&service),
        scheduler,
        LoggingDispatcher::new(config.worker.dry_run),
        config.worker_pool(&settings),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let event_log = tokio::spawn(follow_events(
        event_bus.subscribe(),
        Arc::clone(&pool),
        shutdown_rx.clone(),
    ));
    let handles = pool.spawn(&shutdown_rx);

    shutdown_signal().await;
    tracing::info!("shutdown requested, waiting for workers");
    shutdown_tx.send_replace(true);

    for handle in handles {
        handle.await?;
    }
    event_log.await?;
    tracing::info!("actionqd stopped");

    Ok(())
}

/// Logs queue events and hands them to the pool so setting changes apply live.
async fn follow_events(
    mut events: broadcast::Receiver<actionq_domain::event::QueueEvent>,
    pool: Arc<Pool>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    tracing::debug!(
                        kind = ?event.kind,
                        action_id = ?event.action_id,
                        "queue event"
                    );
                    pool.apply_event(&event);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event log lagging behind");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = shutdown.changed() => break,
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
