//! Subtype registry: discriminator string to task behavior.
//!
//! The base record is sealed; each subtype registers, for one queue
//! variant, its `do_` behavior (an async handler), an optional extension
//! table sharing the base primary key, and an optional retry budget. The
//! worker uses the registry to dispatch a popped row by its `type` column;
//! cleanup uses it to cascade deletes into the extension tables of the
//! variant being cleaned. The two base tables draw ids from independent
//! sequences, so an extension table is only ever addressed with ids from
//! its own variant.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use sqlx::PgPool;

use super::record::Task;
use crate::queue::QueueKind;

/// Per-execution context handed to task bodies.
///
/// The pool targets the shard the task was popped from; handlers must not
/// touch any request-scoped session. `counter` counts pop attempts made by
/// the owning worker across all shards.
#[derive(Clone)]
pub struct TaskContext {
    pub pool: PgPool,
    pub shard_key: String,
    pub counter: u64,
}

type BoxedHandler = Box<
    dyn Fn(Task, TaskContext) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> + Send + Sync,
>;

/// Static facts a subtype declares alongside its handler.
#[derive(Debug, Default, Clone, Copy)]
pub struct TaskTypeOptions {
    /// Extension table sharing the base primary key, if the subtype adds
    /// columns of its own.
    pub subtype_table: Option<&'static str>,
    /// When set, a popped row whose `retries` exceeds this value is refused
    /// and recorded as failed. A row at exactly the cap still runs once.
    pub max_retries: Option<i32>,
}

struct TaskRegistration {
    queue: QueueKind,
    handler: BoxedHandler,
    options: TaskTypeOptions,
}

/// Maps task type strings to their registered behavior.
#[derive(Default)]
pub struct TaskRegistry {
    registrations: HashMap<&'static str, TaskRegistration>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            registrations: HashMap::new(),
        }
    }

    /// Register a task type for a queue variant with default options.
    pub fn register<F, Fut>(&mut self, queue: QueueKind, task_type: &'static str, handler: F)
    where
        F: Fn(Task, TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.register_with(queue, task_type, TaskTypeOptions::default(), handler);
    }

    /// Register a task type for a queue variant with an extension table
    /// and/or retry budget.
    pub fn register_with<F, Fut>(
        &mut self,
        queue: QueueKind,
        task_type: &'static str,
        options: TaskTypeOptions,
        handler: F,
    ) where
        F: Fn(Task, TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let boxed: BoxedHandler = Box::new(move |task, ctx| Box::pin(handler(task, ctx)));
        self.registrations.insert(
            task_type,
            TaskRegistration {
                queue,
                handler: boxed,
                options,
            },
        );
    }

    /// Execute a popped task through its registered handler.
    pub async fn execute(&self, task: &Task, ctx: TaskContext) -> Result<()> {
        let registration = self
            .registrations
            .get(task.kind.as_str())
            .ok_or_else(|| anyhow!("unknown task type: {}", task.kind))?;
        (registration.handler)(task.clone(), ctx).await
    }

    /// The retry budget declared by a subtype, if any.
    pub fn max_retries(&self, task_type: &str) -> Option<i32> {
        self.registrations
            .get(task_type)
            .and_then(|r| r.options.max_retries)
    }

    /// The extension tables registered for one queue variant, for cleanup
    /// cascades. Tables belonging to the other variant are never touched
    /// with this variant's ids.
    pub fn subtype_tables(&self, queue: QueueKind) -> Vec<&'static str> {
        self.registrations
            .values()
            .filter(|r| r.queue == queue)
            .filter_map(|r| r.options.subtype_table)
            .collect()
    }

    pub fn is_registered(&self, task_type: &str) -> bool {
        self.registrations.contains_key(task_type)
    }

    pub fn registered_types(&self) -> Vec<&'static str> {
        self.registrations.keys().copied().collect()
    }
}

/// Thread-safe registry wrapped in Arc.
pub type SharedTaskRegistry = Arc<TaskRegistry>;
