//! Worker loop: pop tasks shard by shard, run them, record outcomes.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{dispatcher, QueueKind};
use crate::error::{Result, TaskQueueError};
use crate::sharding::{ConnectionRouter, ShardDirectory};
use crate::tasks::{failure_tail, SharedTaskRegistry, Task, TaskContext, TaskStatus};

/// Configuration for one worker instance.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How long to sleep after a full shard sweep.
    pub gap: Duration,
    /// Worker ID for this instance (log correlation only).
    pub worker_id: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            gap: Duration::from_millis(500),
            worker_id: format!("worker-{}", Uuid::new_v4()),
        }
    }
}

impl WorkerConfig {
    pub fn with_gap(gap: Duration) -> Self {
        Self {
            gap,
            ..Default::default()
        }
    }
}

/// Long-running driver for one queue variant.
///
/// Each worker owns its own database sessions (acquired from the shard's
/// pool, never a request-scoped one). Correctness under concurrent workers
/// comes entirely from the dispatcher's row lock: two workers racing on
/// one shard never lease the same row.
pub struct Worker {
    queue: QueueKind,
    directory: Arc<ShardDirectory>,
    router: Arc<ConnectionRouter>,
    registry: SharedTaskRegistry,
    config: WorkerConfig,
    shutdown: CancellationToken,
}

impl Worker {
    pub fn new(
        queue: QueueKind,
        directory: Arc<ShardDirectory>,
        router: Arc<ConnectionRouter>,
        registry: SharedTaskRegistry,
        config: WorkerConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            queue,
            directory,
            router,
            registry,
            config,
            shutdown,
        }
    }

    /// Run until cancelled, or — when `tries >= 0` — until that many empty
    /// polls have been consumed (bounded test mode). `tries = -1` runs
    /// unbounded.
    ///
    /// Returns the `(task_id, terminal_status)` pairs processed, in order.
    pub async fn run(
        &self,
        statuses: &[TaskStatus],
        filter: Option<&str>,
        tries: i64,
    ) -> Result<Vec<(i64, TaskStatus)>> {
        info!(
            queue = self.queue.label(),
            worker_id = %self.config.worker_id,
            gap_ms = self.config.gap.as_millis() as u64,
            "worker starting"
        );

        let mut results = Vec::new();
        let mut tries = tries;
        let mut counter: u64 = 0;

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            // Snapshot the shard set for this sweep.
            let shard_keys = match self.directory.list_shards().await {
                Ok(keys) => keys,
                Err(e) => {
                    error!(queue = self.queue.label(), error = %e, "failed to list shards");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };

            for shard_key in &shard_keys {
                if self.shutdown.is_cancelled() {
                    return Ok(results);
                }

                counter += 1;

                let popped = match self.pop_from_shard(shard_key, statuses, filter).await {
                    Ok(popped) => popped,
                    Err(e) => {
                        error!(
                            queue = self.queue.label(),
                            shard_key = %shard_key,
                            error = %e,
                            "failed to pop task"
                        );
                        tokio::time::sleep(Duration::from_secs(1)).await;
                        continue;
                    }
                };

                let Some((task, pool)) = popped else {
                    if tries > -1 {
                        tries -= 1;
                        if tries <= 0 {
                            return Ok(results);
                        }
                    }
                    continue;
                };

                let outcome = self
                    .execute_one(task, &pool, shard_key, counter)
                    .await?;
                results.push(outcome);
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.config.gap) => {}
            }
        }

        info!(
            queue = self.queue.label(),
            worker_id = %self.config.worker_id,
            processed = results.len(),
            "worker stopped"
        );
        Ok(results)
    }

    async fn pop_from_shard(
        &self,
        shard_key: &str,
        statuses: &[TaskStatus],
        filter: Option<&str>,
    ) -> Result<Option<(Task, sqlx::PgPool)>> {
        let pool = self.router.bind(shard_key).await?;
        let task = dispatcher::pop(&pool, self.queue, statuses, filter).await?;
        Ok(task.map(|task| (task, pool)))
    }

    /// Run one leased task to its terminal state.
    ///
    /// Only bookkeeping failures escape: once the body has run, failing to
    /// record the outcome is data-integrity loss, so the worker aborts and
    /// leaves the lease for the renewer.
    async fn execute_one(
        &self,
        task: Task,
        pool: &sqlx::PgPool,
        shard_key: &str,
        counter: u64,
    ) -> Result<(i64, TaskStatus)> {
        let id = task.id;

        // Retry budget: a row past its subtype's cap is refused outright.
        if let Some(max_retries) = self.registry.max_retries(&task.kind) {
            if task.retries > max_retries {
                let refusal = TaskQueueError::MaxRetriesExceeded {
                    id,
                    retries: task.retries,
                    max_retries,
                };
                warn!(
                    queue = self.queue.label(),
                    task_id = id,
                    shard_key = %shard_key,
                    retries = task.retries,
                    max_retries,
                    "refusing task past its retry budget"
                );
                Task::record_failure(pool, self.queue, id, TaskStatus::Failed, &refusal.to_string())
                    .await
                    .map_err(|e| bookkeeping(id, e))?;
                return Ok((id, TaskStatus::Failed));
            }
        }

        let ctx = TaskContext {
            pool: pool.clone(),
            shard_key: shard_key.to_string(),
            counter,
        };

        debug!(
            queue = self.queue.label(),
            task_id = id,
            task_type = %task.kind,
            shard_key = %shard_key,
            "executing task"
        );

        match self.registry.execute(&task, ctx).await {
            Ok(()) => {
                Task::record_success(pool, self.queue, id)
                    .await
                    .map_err(|e| bookkeeping(id, e))?;
                info!(
                    queue = self.queue.label(),
                    task_id = id,
                    task_type = %task.kind,
                    "task succeeded"
                );
                Ok((id, TaskStatus::Success))
            }
            Err(body_error) => {
                let trace = format!("{body_error:?}");
                let reason = failure_tail(&trace);
                let status = self.queue.failure_status();

                if task.fail_reason.as_deref() != Some(reason) {
                    error!(
                        queue = self.queue.label(),
                        task_id = id,
                        shard_key = %shard_key,
                        error = %body_error,
                        fail_reason = %reason,
                        "task execution failed"
                    );
                }

                Task::record_failure(pool, self.queue, id, status, reason)
                    .await
                    .map_err(|e| bookkeeping(id, e))?;
                Ok((id, status))
            }
        }
    }
}

fn bookkeeping(id: i64, error: TaskQueueError) -> TaskQueueError {
    match error {
        TaskQueueError::Database(source) => TaskQueueError::Bookkeeping { id, source },
        other => other,
    }
}
