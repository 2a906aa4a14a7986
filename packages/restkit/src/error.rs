//! Error types for the task queue engine.
//!
//! Task bodies (`do_` handlers) return `anyhow::Result` and are free to fail
//! however they like; the engine itself surfaces typed errors so callers can
//! distinguish operational trouble (database unreachable, pool exhausted)
//! from policy outcomes.

use thiserror::Error;

/// Errors surfaced by the queue engine.
#[derive(Debug, Error)]
pub enum TaskQueueError {
    /// No connection string is registered for the shard key.
    #[error("no connection string registered for shard '{0}'")]
    DirectoryMiss(String),

    /// The subtype's retry budget refused execution of a popped task.
    #[error("task {id} exceeded max retries ({retries} > {max_retries})")]
    MaxRetriesExceeded {
        id: i64,
        retries: i32,
        max_retries: i32,
    },

    /// Any database failure, including connection/pool trouble.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The shard directory store failed.
    #[error("shard directory error: {0}")]
    Directory(#[from] redis::RedisError),

    /// Writing a task's terminal status failed after its body already ran.
    ///
    /// Treated as data-integrity loss: the worker loop aborts and the lease
    /// is later reclaimed by the renewer.
    #[error("failed to record terminal status for task {id}: {source}")]
    Bookkeeping {
        id: i64,
        #[source]
        source: sqlx::Error,
    },
}

impl TaskQueueError {
    /// Whether this error is operational (transient infrastructure failure)
    /// rather than a logic or policy error.
    ///
    /// The renewer aborts its loop on operational errors so the process
    /// supervisor can restart it; the worker logs them and keeps polling.
    pub fn is_operational(&self) -> bool {
        match self {
            TaskQueueError::Database(e) => is_operational_sqlx(e),
            TaskQueueError::Bookkeeping { source, .. } => is_operational_sqlx(source),
            TaskQueueError::Directory(_) => true,
            _ => false,
        }
    }
}

fn is_operational_sqlx(error: &sqlx::Error) -> bool {
    matches!(
        error,
        sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
    )
}

pub type Result<T> = std::result::Result<T, TaskQueueError>;
