//! Lease renewal: reclaim in-progress rows orphaned by crashed workers.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::QueueKind;
use crate::error::Result;
use crate::sharding::{ConnectionRouter, ShardDirectory};

#[derive(Debug, Clone)]
pub struct RenewerConfig {
    /// Lease age beyond which an in-progress row is considered orphaned.
    pub window: chrono::Duration,
    /// Sleep between sweeps.
    pub gap: Duration,
}

impl Default for RenewerConfig {
    fn default() -> Self {
        Self {
            window: chrono::Duration::minutes(5),
            gap: Duration::from_secs(300),
        }
    }
}

/// Long-running driver that rescues stale leases, one row per shard per
/// cycle. Bounded work per iteration keeps renewal latency predictable and
/// stops a pathological backlog from monopolising a connection.
pub struct Renewer {
    queue: QueueKind,
    directory: Arc<ShardDirectory>,
    router: Arc<ConnectionRouter>,
    config: RenewerConfig,
    shutdown: CancellationToken,
}

impl Renewer {
    pub fn new(
        queue: QueueKind,
        directory: Arc<ShardDirectory>,
        router: Arc<ConnectionRouter>,
        config: RenewerConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            queue,
            directory,
            router,
            config,
            shutdown,
        }
    }

    /// Run until cancelled. Operational errors abort the loop so the
    /// process supervisor restarts it; anything else is logged and the
    /// sweep continues.
    pub async fn run(&self) -> Result<()> {
        info!(
            queue = self.queue.label(),
            window_minutes = self.config.window.num_minutes(),
            gap_ms = self.config.gap.as_millis() as u64,
            "renewer starting"
        );

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            let threshold = Utc::now() - self.config.window;
            let shard_keys = self.directory.list_shards().await?;

            for shard_key in &shard_keys {
                if self.shutdown.is_cancelled() {
                    return Ok(());
                }

                let pool = self.router.bind(shard_key).await?;
                match renew_one(&pool, self.queue, threshold).await {
                    Ok(Some(task_id)) => {
                        info!(
                            queue = self.queue.label(),
                            task_id,
                            shard_key = %shard_key,
                            "task successfully renewed"
                        );
                    }
                    Ok(None) => {}
                    Err(e) if e.is_operational() => return Err(e),
                    Err(e) => {
                        error!(
                            queue = self.queue.label(),
                            shard_key = %shard_key,
                            error = %e,
                            "error while renewing task"
                        );
                    }
                }
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.config.gap) => {}
            }
        }

        info!(queue = self.queue.label(), "renewer stopped");
        Ok(())
    }
}

/// Reset the oldest stale in-progress row, if any, back to `new`.
async fn renew_one(
    pool: &PgPool,
    queue: QueueKind,
    threshold: DateTime<Utc>,
) -> Result<Option<i64>> {
    let table = queue.table();
    let sql = format!(
        r#"
        WITH stale AS (
            SELECT id
            FROM {table}
            WHERE status = 'in-progress'
              AND started_at <= $1
            ORDER BY id ASC
            LIMIT 1
            FOR UPDATE
        )
        UPDATE {table}
        SET status = 'new',
            started_at = NULL,
            terminated_at = NULL
        FROM stale
        WHERE {table}.id = stale.id
        RETURNING {table}.id
        "#
    );

    let mut tx = pool.begin().await?;
    let renewed = sqlx::query_scalar::<_, i64>(&sql)
        .bind(threshold)
        .fetch_optional(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(renewed)
}
