// Restkit - toolkit for building REST services
//
// The heart of the crate is a durable, database-backed, shard-aware task
// queue: at-least-once execution of persisted jobs, exclusive leasing via
// row-level locks, automatic recovery of orphaned leases, periodic purging
// of completed work, optional horizontal partitioning by shard key, and
// cooperative shutdown on process signals.
//
// Applications register their task subtypes in a `TaskRegistry`, insert
// rows with `NewTask`, and drive execution through the `worker`/`mule`
// CLI subcommands or by embedding `Worker`/`Renewer` directly.

pub mod cli;
pub mod config;
pub mod error;
pub mod queue;
pub mod sharding;
pub mod tasks;

pub use config::Settings;
pub use error::{Result, TaskQueueError};
pub use queue::{cleanup, QueueKind, Renewer, RenewerConfig, Worker, WorkerConfig};
pub use sharding::{ConnectionRouter, ShardDirectory, MASTER_SHARD_KEY};
pub use tasks::{
    NewTask, SharedTaskRegistry, Task, TaskContext, TaskRegistry, TaskStatus, TaskTypeOptions,
};
