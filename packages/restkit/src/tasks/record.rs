//! Task records: one persistent row per unit of work.
//!
//! Both queue variants store the same base columns; the `type` column is a
//! polymorphic discriminator that selects the registered subtype behavior
//! at pop time. Subtype tables may add columns, linked by shared primary
//! key.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use typed_builder::TypedBuilder;

use crate::error::Result;
use crate::queue::QueueKind;

/// `fail_reason` keeps at most this many bytes of the rendered error.
pub const MAX_FAIL_REASON_BYTES: usize = 4096;

/// Base columns shared by both task tables.
pub(crate) const COLUMNS: &str = r#"id, created_at, "type", status, priority, at, expired_at, started_at, terminated_at, retries, fail_reason"#;

/// Lifecycle state of a task row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "task_status", rename_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    #[default]
    New,
    InProgress,
    Success,
    Failed,
    /// Scheduled variant only: failed past its retry deadline.
    Expired,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::New => "new",
            TaskStatus::InProgress => "in-progress",
            TaskStatus::Success => "success",
            TaskStatus::Failed => "failed",
            TaskStatus::Expired => "expired",
        }
    }

    /// Terminal states are never popped again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Success | TaskStatus::Failed | TaskStatus::Expired
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "new" => Ok(TaskStatus::New),
            "in-progress" => Ok(TaskStatus::InProgress),
            "success" => Ok(TaskStatus::Success),
            "failed" => Ok(TaskStatus::Failed),
            "expired" => Ok(TaskStatus::Expired),
            other => Err(format!("unknown task status '{other}'")),
        }
    }
}

/// One unit of work, loaded from either task table.
#[derive(FromRow, Debug, Clone, Serialize)]
pub struct Task {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    /// Discriminator for subtype dispatch.
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub kind: String,
    pub status: TaskStatus,
    /// Higher first; priority variant only.
    pub priority: i32,
    /// Not-before time; scheduled variant only.
    pub at: Option<DateTime<Utc>>,
    /// Deadline beyond which a failed row is no longer retried.
    pub expired_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub terminated_at: Option<DateTime<Utc>>,
    /// Counts pops, including successful ones, not failures.
    pub retries: i32,
    pub fail_reason: Option<String>,
}

impl Task {
    pub async fn find_by_id(pool: &PgPool, queue: QueueKind, id: i64) -> Result<Self> {
        let sql = format!(
            "SELECT {COLUMNS} FROM {table} WHERE id = $1",
            table = queue.table()
        );
        let task = sqlx::query_as::<_, Self>(&sql).bind(id).fetch_one(pool).await?;
        Ok(task)
    }

    /// Force an in-progress row back to `new`. Operator/test facility.
    pub async fn reset_status(pool: &PgPool, queue: QueueKind, id: i64) -> Result<bool> {
        let sql = format!(
            r#"
            UPDATE {table}
            SET status = 'new', started_at = NULL, terminated_at = NULL
            WHERE id = $1 AND status = 'in-progress'
            "#,
            table = queue.table()
        );
        let result = sqlx::query(&sql).bind(id).execute(pool).await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn record_success(pool: &PgPool, queue: QueueKind, id: i64) -> Result<()> {
        let sql = format!(
            "UPDATE {table} SET status = 'success', terminated_at = now() WHERE id = $1",
            table = queue.table()
        );
        sqlx::query(&sql).bind(id).execute(pool).await?;
        Ok(())
    }

    /// Record a failed execution.
    ///
    /// A reset to `new` (priority variant) clears the lease timestamps so
    /// the row is indistinguishable from a freshly created one apart from
    /// `retries` and `fail_reason`; any other status is terminal and stamps
    /// `terminated_at`.
    pub async fn record_failure(
        pool: &PgPool,
        queue: QueueKind,
        id: i64,
        status: TaskStatus,
        reason: &str,
    ) -> Result<()> {
        let sql = if status == TaskStatus::New {
            format!(
                r#"
                UPDATE {table}
                SET status = $2, started_at = NULL, terminated_at = NULL, fail_reason = $3
                WHERE id = $1
                "#,
                table = queue.table()
            )
        } else {
            format!(
                r#"
                UPDATE {table}
                SET status = $2, terminated_at = now(), fail_reason = $3
                WHERE id = $1
                "#,
                table = queue.table()
            )
        };
        sqlx::query(&sql)
            .bind(id)
            .bind(status)
            .bind(reason)
            .execute(pool)
            .await?;
        Ok(())
    }
}

/// Builder for inserting a task row. Application code creates tasks as
/// `new`; the status/lease overrides exist for fixtures and operational
/// tooling.
#[derive(Debug, Clone, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct NewTask {
    pub kind: String,
    #[builder(default = 50)]
    pub priority: i32,
    #[builder(default, setter(strip_option))]
    pub at: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    pub expired_at: Option<DateTime<Utc>>,
    #[builder(default)]
    pub status: TaskStatus,
    #[builder(default, setter(strip_option))]
    pub started_at: Option<DateTime<Utc>>,
}

impl NewTask {
    pub async fn insert(self, pool: &PgPool, queue: QueueKind) -> Result<Task> {
        // Scheduled rows default their not-before time to now.
        let at = match (queue, self.at) {
            (QueueKind::Scheduled, None) => Some(Utc::now()),
            (_, at) => at,
        };

        let sql = format!(
            r#"
            INSERT INTO {table} ("type", status, priority, at, expired_at, started_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {COLUMNS}
            "#,
            table = queue.table()
        );
        let task = sqlx::query_as::<_, Task>(&sql)
            .bind(&self.kind)
            .bind(self.status)
            .bind(self.priority)
            .bind(at)
            .bind(self.expired_at)
            .bind(self.started_at)
            .fetch_one(pool)
            .await?;
        Ok(task)
    }
}

/// The last [`MAX_FAIL_REASON_BYTES`] of a rendered failure, cut on a char
/// boundary.
pub fn failure_tail(trace: &str) -> &str {
    if trace.len() <= MAX_FAIL_REASON_BYTES {
        return trace;
    }
    let mut start = trace.len() - MAX_FAIL_REASON_BYTES;
    while !trace.is_char_boundary(start) {
        start += 1;
    }
    &trace[start..]
}
