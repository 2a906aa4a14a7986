//! The atomic pop: locked select, transition, return.
//!
//! Correctness rests on the `SELECT … FOR UPDATE` CTE feeding an
//! `UPDATE … RETURNING` in the same statement: the select narrows the
//! candidate under a row-level exclusive lock, and the update applies to
//! that still-locked row. A concurrent worker either blocks on the lock
//! (and skips the row once it sees the committed `in-progress` status) or
//! selects a different row. No row is ever observed `in-progress` without
//! `started_at` set in the same transaction.

use sqlx::PgPool;

use super::QueueKind;
use crate::error::Result;
use crate::tasks::{Task, TaskStatus};

/// Build the pop statement for a variant.
///
/// `filter` is a raw SQL expression supplied by the operator
/// (`--filter "type = 'awesome_task'"`); it is trusted input, interpolated
/// the way the operator wrote it.
fn build_pop_sql(queue: QueueKind, filter: Option<&str>) -> String {
    let table = queue.table();
    let filter_clause = filter
        .map(|f| format!("AND ({f})"))
        .unwrap_or_default();

    match queue {
        QueueKind::Priority => format!(
            r#"
            WITH candidate AS (
                SELECT id
                FROM {table}
                WHERE status = ANY($1)
                  {filter_clause}
                ORDER BY priority DESC, created_at ASC
                LIMIT 1
                FOR UPDATE
            )
            UPDATE {table}
            SET status = 'in-progress',
                started_at = now(),
                retries = retries + 1
            FROM candidate
            WHERE {table}.id = candidate.id
            RETURNING {table}.id
            "#
        ),
        QueueKind::Scheduled => format!(
            r#"
            WITH candidate AS (
                SELECT id
                FROM {table}
                WHERE at <= now()
                  AND (
                      status = 'in-progress'
                      OR status = 'new'
                      OR (status = 'failed' AND expired_at > now())
                  )
                  {filter_clause}
                ORDER BY id ASC
                LIMIT 1
                FOR UPDATE
            )
            UPDATE {table}
            SET status = 'in-progress',
                started_at = now()
            FROM candidate
            WHERE {table}.id = candidate.id
            RETURNING {table}.id
            "#
        ),
    }
}

/// Atomically lease one eligible task.
///
/// Returns `None` when no eligible row exists (the caller backs off). The
/// caller's status set drives the priority predicate only; the scheduled
/// predicate is fixed, with the renewer authoritative for stale
/// `in-progress` rows.
pub async fn pop(
    pool: &PgPool,
    queue: QueueKind,
    statuses: &[TaskStatus],
    filter: Option<&str>,
) -> Result<Option<Task>> {
    let sql = build_pop_sql(queue, filter);

    let mut tx = pool.begin().await?;
    let query = sqlx::query_scalar::<_, i64>(&sql);
    let popped = match queue {
        QueueKind::Priority => {
            query
                .bind(statuses.to_vec())
                .fetch_optional(&mut *tx)
                .await?
        }
        QueueKind::Scheduled => query.fetch_optional(&mut *tx).await?,
    };

    let Some(id) = popped else {
        tx.rollback().await?;
        return Ok(None);
    };
    tx.commit().await?;

    let task = Task::find_by_id(pool, queue, id).await?;
    Ok(Some(task))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_pop_orders_by_priority_then_age() {
        let sql = build_pop_sql(QueueKind::Priority, None);
        assert!(sql.contains("FROM restkit_task"));
        assert!(sql.contains("ORDER BY priority DESC, created_at ASC"));
        assert!(sql.contains("FOR UPDATE"));
        assert!(sql.contains("retries = retries + 1"));
    }

    #[test]
    fn scheduled_pop_gates_on_at_and_expiry() {
        let sql = build_pop_sql(QueueKind::Scheduled, None);
        assert!(sql.contains("FROM mule_task"));
        assert!(sql.contains("at <= now()"));
        assert!(sql.contains("expired_at > now()"));
        assert!(sql.contains("ORDER BY id ASC"));
        assert!(!sql.contains("retries = retries + 1"));
    }

    #[test]
    fn filter_is_appended_to_the_candidate_query() {
        let sql = build_pop_sql(QueueKind::Priority, Some("type = 'awesome_task'"));
        assert!(sql.contains("AND (type = 'awesome_task')"));
    }
}
