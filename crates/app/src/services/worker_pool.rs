//! Worker pool — polling workers that claim, dispatch and complete actions,
//! plus a maintenance loop for deadline expiry and retention cleanup.
//!
//! Workers share nothing but the store: every claim goes through the
//! scheduler's guarded write, so running several pools (or processes)
//! against one database is safe.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinHandle;

use actionq_domain::action::QueuedAction;
use actionq_domain::catalog::ActionType;
use actionq_domain::error::QueueError;
use actionq_domain::event::{QueueEvent, QueueEventKind};
use actionq_domain::execution::{ExecutionError, ExecutionReport};
use actionq_domain::id::ActionId;
use actionq_domain::settings::{QueueSettings, WORKER_POLL_INTERVAL_MS};
use actionq_domain::statistics::{WorkerState, WorkerStatus};
use actionq_domain::time::{Timestamp, now};

use crate::ports::{ActionDispatcher, EventPublisher, QueueStore};
use crate::services::queue_service::QueueService;
use crate::services::scheduler::{ExpiryReport, Scheduler};

/// Live status of every worker, shared between the pool and statistics.
#[derive(Debug, Clone, Default)]
pub struct WorkerRegistry {
    inner: Arc<Mutex<BTreeMap<String, WorkerStatus>>>,
}

impl WorkerRegistry {
    fn with<T>(&self, f: impl FnOnce(&mut BTreeMap<String, WorkerStatus>) -> T) -> T {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    pub fn register(&self, worker_id: &str) {
        self.with(|workers| {
            workers.insert(worker_id.to_string(), WorkerStatus::idle(worker_id));
        });
    }

    pub fn mark_busy(&self, worker_id: &str, action_id: ActionId) {
        self.with(|workers| {
            let status = workers
                .entry(worker_id.to_string())
                .or_insert_with(|| WorkerStatus::idle(worker_id));
            status.state = WorkerState::Busy;
            status.current_action = Some(action_id);
            status.last_activity = Some(now());
        });
    }

    pub fn mark_idle(&self, worker_id: &str, succeeded: bool) {
        self.with(|workers| {
            if let Some(status) = workers.get_mut(worker_id) {
                status.state = WorkerState::Idle;
                status.current_action = None;
                status.last_activity = Some(now());
                if succeeded {
                    status.processed += 1;
                } else {
                    status.errors += 1;
                }
            }
        });
    }

    pub fn mark_stopped(&self, worker_id: &str) {
        self.with(|workers| {
            if let Some(status) = workers.get_mut(worker_id) {
                status.state = WorkerState::Stopped;
                status.current_action = None;
            }
        });
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<WorkerStatus> {
        self.with(|workers| workers.values().cloned().collect())
    }
}

/// Tuning of a [`WorkerPool`].
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    pub workers: usize,
    pub poll_interval: Duration,
    /// Actions claimed per poll and worker.
    pub batch_size: u32,
    pub maintenance_interval: Duration,
    pub worker_id_prefix: String,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self::from_settings(&QueueSettings::default())
    }
}

impl WorkerPoolConfig {
    /// Worker count and poll interval taken from the queue settings table.
    #[must_use]
    pub fn from_settings(settings: &QueueSettings) -> Self {
        Self {
            workers: usize::try_from(settings.max_concurrent_workers)
                .unwrap_or(1)
                .max(1),
            poll_interval: Duration::from_millis(settings.worker_poll_interval_ms.max(1)),
            batch_size: 1,
            maintenance_interval: Duration::from_secs(600),
            worker_id_prefix: "worker".to_string(),
        }
    }
}

/// What one maintenance pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub expired: ExpiryReport,
    pub cleaned: u64,
}

/// Polling workers executing queued actions through an [`ActionDispatcher`].
pub struct WorkerPool<R, P, D> {
    service: Arc<QueueService<R, P>>,
    scheduler: Arc<Scheduler<R, P>>,
    dispatcher: D,
    config: WorkerPoolConfig,
    poll_interval: watch::Sender<Duration>,
}

impl<R, P, D> WorkerPool<R, P, D>
where
    R: QueueStore + Send + Sync + 'static,
    P: EventPublisher + Send + Sync + 'static,
    D: ActionDispatcher + Send + Sync + 'static,
{
    pub fn new(
        service: Arc<QueueService<R, P>>,
        scheduler: Arc<Scheduler<R, P>>,
        dispatcher: D,
        config: WorkerPoolConfig,
    ) -> Self {
        let (poll_interval, _) = watch::channel(config.poll_interval);
        Self {
            service,
            scheduler,
            dispatcher,
            config,
            poll_interval,
        }
    }

    /// Interval idle workers currently wait between polls.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        *self.poll_interval.borrow()
    }

    /// Follow runtime setting changes; the poll interval applies from the
    /// next idle wait of every worker.
    pub fn apply_event(&self, event: &QueueEvent) {
        let QueueEventKind::SettingChanged { key, value } = &event.kind else {
            return;
        };
        if key != WORKER_POLL_INTERVAL_MS {
            return;
        }
        match value.parse::<u64>() {
            Ok(millis) if millis > 0 => {
                self.poll_interval.send_replace(Duration::from_millis(millis));
                tracing::info!(poll_interval_ms = millis, "worker poll interval changed");
            }
            _ => tracing::warn!(value, "ignoring invalid worker poll interval"),
        }
    }

    #[must_use]
    pub fn worker_ids(&self) -> Vec<String> {
        (1..=self.config.workers)
            .map(|n| format!("{}_{n}", self.config.worker_id_prefix))
            .collect()
    }

    /// Claim one batch for `worker_id` and run every claimed action.
    ///
    /// Returns how many actions were processed. A failure on one action is
    /// logged and does not stop the rest of the batch.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the batch cannot be claimed.
    pub async fn tick(&self, worker_id: &str) -> Result<usize, QueueError> {
        let claimed = self
            .scheduler
            .claim_batch(worker_id, self.config.batch_size)
            .await?;
        let count = claimed.len();
        for action in claimed {
            let action_id = action.id;
            if let Err(err) = self.process(worker_id, action).await {
                tracing::error!(
                    %action_id,
                    worker_id,
                    error = %err,
                    "failed to report action outcome"
                );
            }
        }
        Ok(count)
    }

    async fn process(&self, worker_id: &str, action: QueuedAction) -> Result<(), QueueError> {
        let registry = self.service.workers();
        registry.mark_busy(worker_id, action.id);

        let started = Instant::now();
        let (outcome, handler) = match self.service.catalog().await {
            Err(err) => (
                Err(ExecutionError::new(format!("could not load the catalog: {err}"))
                    .with_code("catalog_unavailable")),
                String::new(),
            ),
            Ok(catalog) => {
                let action_type = catalog.action_type(action.action_type_id).cloned();
                self.execute(&action, action_type).await
            }
        };
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        if let Err(err) = &outcome {
            tracing::warn!(
                action_id = %action.id,
                worker_id,
                %handler,
                error = %err,
                "handler failed"
            );
        }
        let succeeded = outcome.is_ok();
        let report = ExecutionReport {
            outcome,
            duration_ms,
            context: None,
        }
        .with_context(serde_json::json!({
            "worker_id": worker_id,
            "handler": handler,
        }));

        let completion = self.service.complete(action.id, worker_id, report).await;
        registry.mark_idle(worker_id, succeeded && completion.is_ok());
        match completion {
            Ok(_) => Ok(()),
            Err(QueueError::InvalidTransition(err)) => {
                tracing::warn!(
                    action_id = %action.id,
                    worker_id,
                    error = %err,
                    "completion refused, action changed while running"
                );
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn execute(
        &self,
        action: &QueuedAction,
        action_type: Option<ActionType>,
    ) -> (Result<Option<serde_json::Value>, ExecutionError>, String) {
        match action_type {
            Some(action_type) => {
                let handler = action_type.handler_name.clone();
                let limit = Duration::from_secs(
                    u64::try_from(action.timeout_seconds).unwrap_or(1).max(1),
                );
                let outcome = match tokio::time::timeout(
                    limit,
                    self.dispatcher.dispatch(action.clone(), action_type),
                )
                .await
                {
                    Ok(outcome) => outcome,
                    Err(_) => Err(ExecutionError::new(format!(
                        "handler did not finish within {}s",
                        limit.as_secs()
                    ))
                    .with_code("handler_timeout")),
                };
                (outcome, handler)
            }
            None => (
                Err(ExecutionError::permanent(format!(
                    "action type {} is not in the catalog",
                    action.action_type_id
                ))
                .with_code("unknown_action_type")),
                String::new(),
            ),
        }
    }

    /// Expire overdue work and apply the retention windows.
    ///
    /// # Errors
    ///
    /// Returns a storage error propagated from the scheduler or the service.
    pub async fn run_maintenance(&self, at: Timestamp) -> Result<MaintenanceReport, QueueError> {
        let expired = self.scheduler.expire_overdue(at).await?;
        let cleaned = self.service.cleanup_by_retention(at).await?;
        if expired != ExpiryReport::default() || cleaned > 0 {
            tracing::info!(
                deadline_expired = expired.deadline_expired,
                execution_timed_out = expired.execution_timed_out,
                cleaned,
                "maintenance pass finished"
            );
        }
        Ok(MaintenanceReport { expired, cleaned })
    }

    /// Spawn every worker and the maintenance loop onto the current runtime.
    ///
    /// Tasks stop once `shutdown` turns `true`; an in-flight action is always
    /// finished and reported first.
    pub fn spawn(self: Arc<Self>, shutdown: &watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::with_capacity(self.config.workers + 1);
        for worker_id in self.worker_ids() {
            self.service.workers().register(&worker_id);
            handles.push(tokio::spawn(
                Arc::clone(&self).run_worker(worker_id, shutdown.clone()),
            ));
        }
        handles.push(tokio::spawn(
            Arc::clone(&self).run_maintenance_loop(shutdown.clone()),
        ));
        tracing::info!(
            workers = self.config.workers,
            poll_interval_ms = u64::try_from(self.poll_interval().as_millis()).unwrap_or(u64::MAX),
            "worker pool started"
        );
        handles
    }

    async fn run_worker(self: Arc<Self>, worker_id: String, mut shutdown: watch::Receiver<bool>) {
        tracing::debug!(worker_id, "worker started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.tick(&worker_id).await {
                Ok(0) => {}
                Ok(_) => continue,
                Err(err) => {
                    tracing::error!(worker_id, error = %err, "worker tick failed");
                }
            }

            tokio::select! {
                () = tokio::time::sleep(self.poll_interval()) => {}
                _ = shutdown.changed() => {}
            }
        }

        self.service.workers().mark_stopped(&worker_id);
        tracing::debug!(worker_id, "worker stopped");
    }

    async fn run_maintenance_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.maintenance_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(err) = self.run_maintenance(now()).await {
                        tracing::error!(error = %err, "maintenance pass failed");
                    }
                }
                _ = shutdown.changed() => {}
            }
            if *shutdown.borrow() {
                break;
            }
        }
        tracing::debug!("maintenance loop stopped");
    }
}
