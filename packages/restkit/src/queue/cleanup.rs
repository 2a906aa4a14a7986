//! Pruning of old successful tasks.

use chrono::{DateTime, Utc};
use tracing::info;

use super::QueueKind;
use crate::error::Result;
use crate::sharding::{ConnectionRouter, ShardDirectory};
use crate::tasks::TaskRegistry;

/// Delete successful tasks whose lease started before `older_than`.
///
/// For each shard: collect the matching ids, delete them from every
/// subtype table registered for this queue variant, then from the base
/// table, and commit before moving to the next shard. Intended to be
/// invoked by an operator, not as a long-running loop.
///
/// Returns the number of base rows deleted across all shards.
pub async fn cleanup(
    queue: QueueKind,
    directory: &ShardDirectory,
    router: &ConnectionRouter,
    registry: &TaskRegistry,
    older_than: DateTime<Utc>,
) -> Result<u64> {
    let table = queue.table();
    let mut total_deleted: u64 = 0;

    for shard_key in directory.list_shards().await? {
        let pool = router.bind(&shard_key).await?;
        let mut tx = pool.begin().await?;

        let select_sql = format!(
            "SELECT id FROM {table} WHERE status = 'success' AND started_at < $1"
        );
        let ids: Vec<i64> = sqlx::query_scalar(&select_sql)
            .bind(older_than)
            .fetch_all(&mut *tx)
            .await?;

        if ids.is_empty() {
            tx.rollback().await?;
            continue;
        }

        for subtype_table in registry.subtype_tables(queue) {
            let delete_sql = format!("DELETE FROM {subtype_table} WHERE id = ANY($1)");
            sqlx::query(&delete_sql).bind(&ids).execute(&mut *tx).await?;
        }

        let delete_sql = format!("DELETE FROM {table} WHERE id = ANY($1)");
        let deleted = sqlx::query(&delete_sql)
            .bind(&ids)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;

        info!(
            queue = queue.label(),
            shard_key = %shard_key,
            deleted,
            "cleaned up successful tasks"
        );
        total_deleted += deleted;
    }

    Ok(total_deleted)
}
