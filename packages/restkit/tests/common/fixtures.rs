//! Task fixtures: registries and rows used across the queue tests.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use anyhow::Result;
use sqlx::PgPool;

use restkit::{NewTask, QueueKind, Task, TaskRegistry, TaskTypeOptions};

/// Observable side effects of the fixture task types.
#[derive(Clone, Default)]
pub struct TaskProbe {
    pub awesome_done: Arc<AtomicBool>,
    pub another_done: Arc<AtomicBool>,
    pub executions: Arc<AtomicU32>,
}

impl TaskProbe {
    pub fn awesome_is_done(&self) -> bool {
        self.awesome_done.load(Ordering::SeqCst)
    }

    pub fn another_is_done(&self) -> bool {
        self.another_done.load(Ordering::SeqCst)
    }

    pub fn execution_count(&self) -> u32 {
        self.executions.load(Ordering::SeqCst)
    }
}

/// Registry with the standard fixture types for one queue variant:
/// - `awesome_task` / `another_task` — succeed and flip their probe flag.
/// - `bad_task` — bumps its subtype `tries` column and fails while odd.
pub fn fixture_registry(queue: QueueKind) -> (Arc<TaskRegistry>, TaskProbe) {
    let probe = TaskProbe::default();
    let mut registry = TaskRegistry::new();

    {
        let done = probe.awesome_done.clone();
        let executions = probe.executions.clone();
        registry.register(queue, "awesome_task", move |_task, _ctx| {
            let done = done.clone();
            let executions = executions.clone();
            async move {
                executions.fetch_add(1, Ordering::SeqCst);
                done.store(true, Ordering::SeqCst);
                Ok(())
            }
        });
    }

    {
        let done = probe.another_done.clone();
        let executions = probe.executions.clone();
        registry.register(queue, "another_task", move |_task, _ctx| {
            let done = done.clone();
            let executions = executions.clone();
            async move {
                executions.fetch_add(1, Ordering::SeqCst);
                done.store(true, Ordering::SeqCst);
                Ok(())
            }
        });
    }

    {
        let executions = probe.executions.clone();
        registry.register_with(
            queue,
            "bad_task",
            TaskTypeOptions {
                subtype_table: Some("bad_task"),
                max_retries: None,
            },
            move |task, ctx| {
                let executions = executions.clone();
                async move {
                    executions.fetch_add(1, Ordering::SeqCst);
                    let tries: i32 = sqlx::query_scalar(
                        "UPDATE bad_task SET tries = tries + 1 WHERE id = $1 RETURNING tries",
                    )
                    .bind(task.id)
                    .fetch_one(&ctx.pool)
                    .await?;

                    if tries % 2 != 0 {
                        anyhow::bail!("bad task failed on try {tries}");
                    }
                    Ok(())
                }
            },
        );
    }

    (Arc::new(registry), probe)
}

/// Extension table for `bad_task`, sharing the base primary key.
pub async fn create_bad_task_table(pool: &PgPool) -> Result<()> {
    sqlx::query("CREATE TABLE IF NOT EXISTS bad_task (id BIGINT PRIMARY KEY, tries INT NOT NULL DEFAULT 0)")
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn insert_task(pool: &PgPool, queue: QueueKind, kind: &str) -> Task {
    NewTask::builder()
        .kind(kind)
        .build()
        .insert(pool, queue)
        .await
        .expect("failed to insert task")
}

/// Insert a `bad_task` row plus its extension row.
pub async fn insert_bad_task(pool: &PgPool, queue: QueueKind) -> Task {
    let task = insert_task(pool, queue, "bad_task").await;
    sqlx::query("INSERT INTO bad_task (id, tries) VALUES ($1, 0)")
        .bind(task.id)
        .execute(pool)
        .await
        .expect("failed to insert bad_task extension row");
    task
}

pub async fn bad_task_tries(pool: &PgPool, id: i64) -> i32 {
    sqlx::query_scalar("SELECT tries FROM bad_task WHERE id = $1")
        .bind(id)
        .fetch_one(pool)
        .await
        .expect("failed to read bad_task tries")
}

pub async fn reload(pool: &PgPool, queue: QueueKind, id: i64) -> Task {
    Task::find_by_id(pool, queue, id)
        .await
        .expect("failed to reload task")
}
