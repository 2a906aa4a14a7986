//! Integration tests for lease renewal.

mod common;

use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use test_context::test_context;

use common::*;
use restkit::{NewTask, QueueKind, TaskStatus};

const QUEUE: QueueKind = QueueKind::Priority;

async fn insert_with_lease(
    ctx: &TestHarness,
    status: TaskStatus,
    started_minutes_ago: i64,
) -> restkit::Task {
    NewTask::builder()
        .kind("awesome_task")
        .status(status)
        .started_at(Utc::now() - Duration::minutes(started_minutes_ago))
        .build()
        .insert(&ctx.db_pool, QUEUE)
        .await
        .unwrap()
}

#[test_context(TestHarness)]
#[tokio::test]
async fn stale_lease_is_reclaimed(ctx: &TestHarness) {
    let stale = insert_with_lease(ctx, TaskStatus::InProgress, 10).await;
    let fresh = insert_with_lease(ctx, TaskStatus::InProgress, 2).await;
    let finished = insert_with_lease(ctx, TaskStatus::Success, 10).await;

    let renewer = ctx.renewer(QUEUE, Duration::minutes(5), StdDuration::from_millis(100));
    let handle = tokio::spawn(async move { renewer.run().await });

    tokio::time::sleep(StdDuration::from_millis(600)).await;
    ctx.shutdown.cancel();
    handle.await.unwrap().unwrap();

    let stale = reload(&ctx.db_pool, QUEUE, stale.id).await;
    assert_eq!(stale.status, TaskStatus::New);
    assert!(stale.started_at.is_none());
    assert!(stale.terminated_at.is_none());

    let fresh = reload(&ctx.db_pool, QUEUE, fresh.id).await;
    assert_eq!(fresh.status, TaskStatus::InProgress);
    assert!(fresh.started_at.is_some());

    let finished = reload(&ctx.db_pool, QUEUE, finished.id).await;
    assert_eq!(finished.status, TaskStatus::Success);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn one_lease_reclaimed_per_cycle(ctx: &TestHarness) {
    let older = insert_with_lease(ctx, TaskStatus::InProgress, 20).await;
    let newer = insert_with_lease(ctx, TaskStatus::InProgress, 10).await;

    // A long gap bounds the run to a single sweep before cancellation.
    let renewer = ctx.renewer(QUEUE, Duration::minutes(5), StdDuration::from_secs(60));
    let handle = tokio::spawn(async move { renewer.run().await });

    tokio::time::sleep(StdDuration::from_millis(400)).await;
    ctx.shutdown.cancel();
    handle.await.unwrap().unwrap();

    // Oldest id wins; the other stale lease waits for the next cycle.
    let older = reload(&ctx.db_pool, QUEUE, older.id).await;
    let newer = reload(&ctx.db_pool, QUEUE, newer.id).await;
    assert_eq!(older.status, TaskStatus::New);
    assert_eq!(newer.status, TaskStatus::InProgress);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn renewed_task_is_popped_again(ctx: &TestHarness) {
    let (registry, probe) = fixture_registry(QUEUE);
    let stale = insert_with_lease(ctx, TaskStatus::InProgress, 10).await;

    let renewer = ctx.renewer(QUEUE, Duration::minutes(5), StdDuration::from_millis(100));
    let handle = tokio::spawn(async move { renewer.run().await });
    tokio::time::sleep(StdDuration::from_millis(400)).await;
    ctx.shutdown.cancel();
    handle.await.unwrap().unwrap();

    // The reclaimed row is ordinary `new` work again.
    let harness_token = tokio_util::sync::CancellationToken::new();
    let worker = restkit::Worker::new(
        QUEUE,
        ctx.directory.clone(),
        ctx.router.clone(),
        registry,
        restkit::WorkerConfig::with_gap(StdDuration::from_millis(50)),
        harness_token,
    );
    let results = worker.run(&[TaskStatus::New], None, 0).await.unwrap();

    assert_eq!(results, vec![(stale.id, TaskStatus::Success)]);
    assert!(probe.awesome_is_done());
}
