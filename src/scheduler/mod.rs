//! Job scheduling: bounded queue, worker pool, per-repository exclusion,
//! retries with exponential backoff, and cooperative cancellation.
//!
//! The scheduler is the single producer of truth for what runs when. At
//! most one job executes per repository at any time (keyed lock); a
//! worker that pops a busy repository requeues the task. Transient
//! failures retry with exponential backoff (base 2s, cap 5min, max 5
//! attempts); everything else marks the repository failed through the
//! runner.

pub mod pipeline;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::core::errors::{KvasirError, Result};

/// Executes jobs on behalf of the scheduler.
#[async_trait]
pub trait JobRunner: Send + Sync + 'static {
    /// Run the full ingest pipeline for one repository.
    ///
    /// Implementations observe `cancel` at suspension points and return
    /// `KvasirError::Cancelled` when tripped.
    async fn run_ingest(&self, repo_id: Uuid, cancel: CancellationToken) -> Result<()>;

    /// Record a terminal failure for the repository.
    async fn mark_failed(&self, repo_id: Uuid, reason: &str);
}

/// Scheduler tuning knobs.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub workers: usize,
    pub queue_capacity: usize,
    pub retry_base: Duration,
    pub retry_cap: Duration,
    pub max_attempts: u32,
    pub ingest_timeout: Duration,
    /// Delay before requeueing a task whose repository is busy
    pub busy_requeue_delay: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self {
            workers: cpus * 2,
            queue_capacity: 256,
            retry_base: Duration::from_secs(2),
            retry_cap: Duration::from_secs(300),
            max_attempts: 5,
            ingest_timeout: Duration::from_secs(30 * 60),
            busy_requeue_delay: Duration::from_millis(250),
        }
    }
}

#[derive(Debug, Clone)]
struct QueuedTask {
    repo_id: Uuid,
    attempt: u32,
}

/// The job scheduler: enqueue ingests, cancel repositories, shut down.
pub struct JobScheduler {
    tx: mpsc::Sender<QueuedTask>,
    inflight: Arc<DashMap<Uuid, CancellationToken>>,
    cancelled: Arc<DashMap<Uuid, ()>>,
    workers: Vec<JoinHandle<()>>,
    shutdown: CancellationToken,
}

impl JobScheduler {
    /// Start the worker pool.
    pub fn start(runner: Arc<dyn JobRunner>, config: SchedulerConfig) -> Self {
        let (tx, rx) = mpsc::channel::<QueuedTask>(config.queue_capacity.max(1));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let inflight: Arc<DashMap<Uuid, CancellationToken>> = Arc::new(DashMap::new());
        let cancelled: Arc<DashMap<Uuid, ()>> = Arc::new(DashMap::new());
        let shutdown = CancellationToken::new();

        let mut workers = Vec::with_capacity(config.workers);
        for worker_id in 0..config.workers.max(1) {
            let rx = rx.clone();
            let tx = tx.clone();
            let runner = runner.clone();
            let inflight = inflight.clone();
            let cancelled = cancelled.clone();
            let config = config.clone();
            let shutdown = shutdown.clone();

            workers.push(tokio::spawn(async move {
                loop {
                    let task = {
                        let mut guard = rx.lock().await;
                        tokio::select! {
                            task = guard.recv() => task,
                            _ = shutdown.cancelled() => None,
                        }
                    };
                    let Some(task) = task else { break };

                    if cancelled.remove(&task.repo_id).is_some() {
                        runner.mark_failed(task.repo_id, "cancelled").await;
                        continue;
                    }

                    // Keyed lock: at most one job per repository. The
                    // entry call is atomic, so two workers cannot both
                    // claim the same repository.
                    let token = CancellationToken::new();
                    let claimed = {
                        let entry = inflight.entry(task.repo_id);
                        match entry {
                            dashmap::mapref::entry::Entry::Occupied(_) => false,
                            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                                vacant.insert(token.clone());
                                true
                            }
                        }
                    };
                    if !claimed {
                        requeue_later(&tx, task, config.busy_requeue_delay);
                        continue;
                    }

                    info!(worker_id, repo_id = %task.repo_id, attempt = task.attempt, "job started");
                    let outcome = tokio::time::timeout(
                        config.ingest_timeout,
                        runner.run_ingest(task.repo_id, token.clone()),
                    )
                    .await;
                    inflight.remove(&task.repo_id);

                    match outcome {
                        Ok(Ok(())) => {
                            info!(repo_id = %task.repo_id, "job completed");
                        }
                        Ok(Err(e)) if matches!(e, KvasirError::Cancelled { .. }) => {
                            runner.mark_failed(task.repo_id, "cancelled").await;
                        }
                        Ok(Err(e)) if e.is_transient() && task.attempt + 1 < config.max_attempts => {
                            let attempt = task.attempt + 1;
                            let delay = backoff(&config, attempt);
                            warn!(repo_id = %task.repo_id, attempt, ?delay, "transient failure, retrying: {e}");
                            requeue_later(
                                &tx,
                                QueuedTask {
                                    repo_id: task.repo_id,
                                    attempt,
                                },
                                delay,
                            );
                        }
                        Ok(Err(e)) => {
                            warn!(repo_id = %task.repo_id, "job failed: {e}");
                            runner.mark_failed(task.repo_id, &e.to_string()).await;
                        }
                        Err(_elapsed) => {
                            token.cancel();
                            runner.mark_failed(task.repo_id, "cancelled: ingest timeout").await;
                        }
                    }
                }
            }));
        }

        Self {
            tx,
            inflight,
            cancelled,
            workers,
            shutdown,
        }
    }

    /// Queue an ingest job for the repository.
    pub async fn enqueue_ingest(&self, repo_id: Uuid) -> Result<()> {
        self.cancelled.remove(&repo_id);
        self.tx
            .send(QueuedTask {
                repo_id,
                attempt: 0,
            })
            .await
            .map_err(|_| KvasirError::internal("scheduler queue closed"))
    }

    /// Cancel queued and in-flight work for the repository.
    ///
    /// In-flight jobs observe the cancellation at their next suspension
    /// point; queued jobs are dropped when popped.
    pub fn cancel(&self, repo_id: Uuid) {
        self.cancelled.insert(repo_id, ());
        if let Some(entry) = self.inflight.get(&repo_id) {
            entry.value().cancel();
        }
    }

    /// Whether a job for this repository is currently executing.
    pub fn is_running(&self, repo_id: Uuid) -> bool {
        self.inflight.contains_key(&repo_id)
    }

    /// Stop accepting work and wait for workers to drain.
    pub async fn shutdown(self) {
        drop(self.tx);
        self.shutdown.cancel();
        for worker in self.workers {
            let _ = worker.await;
        }
    }
}

fn requeue_later(tx: &mpsc::Sender<QueuedTask>, task: QueuedTask, delay: Duration) {
    let tx = tx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let _ = tx.send(task).await;
    });
}

/// Exponential backoff: base * 2^(attempt-1), capped.
fn backoff(config: &SchedulerConfig, attempt: u32) -> Duration {
    let factor = 1u32 << (attempt.saturating_sub(1)).min(16);
    (config.retry_base * factor).min(config.retry_cap)
}
