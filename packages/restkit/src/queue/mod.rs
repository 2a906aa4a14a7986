//! The durable task queue engine.
//!
//! Two parallel variants share one engine, distinguished by dispatch
//! policy:
//!
//! - [`QueueKind::Priority`] — the general queue, ordered by
//!   `priority DESC, created_at ASC`; a failed body goes back to `new` for
//!   natural retry.
//! - [`QueueKind::Scheduled`] — the time-gated "mule" queue, eligible once
//!   `at` has passed; a failed body is recorded as `failed` and retried
//!   only while `expired_at` is in the future.
//!
//! ```text
//! Worker / Renewer
//!     │
//!     ├─► ShardDirectory.list_shards()          (snapshot per cycle)
//!     ├─► ConnectionRouter.bind(shard_key)      (pool per shard)
//!     ├─► dispatcher::pop(...)                  (locked select + transition)
//!     ├─► TaskRegistry.execute(task, ctx)       (subtype `do_` body)
//!     └─► Task::record_success / record_failure (terminal bookkeeping)
//! ```

pub mod cleanup;
pub mod dispatcher;
pub mod renewer;
pub mod worker;

use crate::tasks::TaskStatus;

/// Dispatch policy selector for the two queue variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
    Priority,
    Scheduled,
}

impl QueueKind {
    pub fn table(&self) -> &'static str {
        match self {
            QueueKind::Priority => "restkit_task",
            QueueKind::Scheduled => "mule_task",
        }
    }

    /// Status written when a task body fails.
    ///
    /// The priority variant's natural "failed" is `new` (the retries
    /// counter keeps the history); terminal `failed` is reserved for the
    /// max-retries refusal. The scheduled variant records `failed` and
    /// relies on `expired_at` to gate further pops.
    pub fn failure_status(&self) -> TaskStatus {
        match self {
            QueueKind::Priority => TaskStatus::New,
            QueueKind::Scheduled => TaskStatus::Failed,
        }
    }

    /// Whether a pop transition increments the retries counter.
    pub fn increments_retries(&self) -> bool {
        matches!(self, QueueKind::Priority)
    }

    /// Short label for log lines.
    pub fn label(&self) -> &'static str {
        match self {
            QueueKind::Priority => "worker",
            QueueKind::Scheduled => "mule",
        }
    }
}

pub use cleanup::cleanup;
pub use renewer::{Renewer, RenewerConfig};
pub use worker::{Worker, WorkerConfig};
