mod common;

use chrono::{TimeZone, Utc};
use common::{base_time, price, FaultyStore, TestContext, UndeletableLock, UnreachableLock};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use subscription_service::billing::CycleOutcome;
use subscription_service::error::BillingError;
use subscription_service::models::SubscriptionStatus;
use subscription_service::services::{DistributedLock, InMemoryStore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const LOCK_KEY: &str = "billing_job_lock";

fn slow_cycle_context(delay: Duration) -> TestContext {
    let memory = Arc::new(InMemoryStore::new());
    let slow = Arc::new(FaultyStore::new(memory.clone()).with_due_query_delay(delay));
    TestContext::with_store(memory, slow)
}

#[tokio::test(start_paused = true)]
async fn concurrent_schedulers_bill_each_subscription_once() {
    let ctx = slow_cycle_context(Duration::from_secs(10));
    let due = ctx.seed_due_subscriptions(4, price(30, 0)).await;
    let a = ctx.scheduler("instance-a");
    let b = ctx.scheduler("instance-b");

    let (first, second) = tokio::join!(a.run_scheduled_cycle(), b.run_scheduled_cycle());

    let mut labels = vec![first.label(), second.label()];
    labels.sort();
    assert_eq!(labels, vec!["completed", "skipped"]);

    for subscription in &due {
        assert_eq!(ctx.bills(subscription.subscription_id).len(), 1);
    }
    assert!(!ctx.lock.is_held(LOCK_KEY));
}

#[tokio::test(start_paused = true)]
async fn waiting_scheduler_proceeds_once_the_holder_releases() {
    let ctx = slow_cycle_context(Duration::from_secs(2));
    let due = ctx.seed_due_subscriptions(2, price(30, 0)).await;
    let a = ctx.scheduler("instance-a");
    let b = ctx.scheduler("instance-b");

    let (first, second) = tokio::join!(a.run_scheduled_cycle(), b.run_scheduled_cycle());

    let (first, second) = match (first, second) {
        (CycleOutcome::Completed(first), CycleOutcome::Completed(second)) => (first, second),
        (first, second) => panic!(
            "both schedulers should complete, got {} and {}",
            first.label(),
            second.label()
        ),
    };
    assert_eq!(first.bills.len(), 2);
    // Everything was already on hold by the time the second one ran
    assert_eq!(second.due, 0);

    for subscription in &due {
        assert_eq!(ctx.bills(subscription.subscription_id).len(), 1);
    }
}

#[tokio::test(start_paused = true)]
async fn lock_is_released_after_a_failed_cycle() {
    let memory = Arc::new(InMemoryStore::new());
    let faulty = Arc::new(FaultyStore::new(memory.clone()).failing_bills_after(1));
    let ctx = TestContext::with_store(memory, faulty);
    ctx.seed_due_subscriptions(2, price(8, 0)).await;

    let outcome = ctx.scheduler("instance-a").run_scheduled_cycle().await;

    assert!(matches!(
        outcome,
        CycleOutcome::Failed(BillingError::CycleAborted { processed: 1, due: 2, .. })
    ));
    assert!(!ctx.lock.is_held(LOCK_KEY));
}

#[tokio::test(start_paused = true)]
async fn crashed_holder_blocks_until_ttl_expires() {
    let ctx = TestContext::new();
    let due = ctx.seed_due_subscriptions(1, price(8, 0)).await;
    ctx.lock
        .set_if_absent(LOCK_KEY, "crashed-instance", Duration::from_secs(600))
        .await
        .unwrap();
    let scheduler = ctx.scheduler("instance-a");

    let started = Instant::now();
    let outcome = scheduler.run_scheduled_cycle().await;

    assert!(matches!(outcome, CycleOutcome::Skipped));
    // 1s + 2s of backoff, nothing after the last attempt
    assert_eq!(started.elapsed(), Duration::from_secs(3));
    assert!(ctx.bills(due[0].subscription_id).is_empty());
    assert_eq!(
        ctx.subscription(due[0].subscription_id).await.status(),
        SubscriptionStatus::Active
    );
    assert_eq!(ctx.lock.holder(LOCK_KEY).as_deref(), Some("crashed-instance"));

    tokio::time::advance(Duration::from_secs(600)).await;

    let outcome = scheduler.run_scheduled_cycle().await;
    assert!(matches!(outcome, CycleOutcome::Completed(ref report) if report.bills.len() == 1));
    assert!(!ctx.lock.is_held(LOCK_KEY));
}

#[tokio::test(start_paused = true)]
async fn unreachable_lock_backend_skips_after_bounded_attempts() {
    let ctx = TestContext::new();
    let due = ctx.seed_due_subscriptions(1, price(8, 0)).await;
    let lock = Arc::new(UnreachableLock::new());
    let scheduler = ctx.scheduler_with_lock(lock.clone(), "instance-a");

    let outcome = scheduler.run_scheduled_cycle().await;

    assert!(matches!(outcome, CycleOutcome::Skipped));
    assert_eq!(lock.attempts.load(Ordering::SeqCst), 3);
    assert!(ctx.bills(due[0].subscription_id).is_empty());
}

#[tokio::test(start_paused = true)]
async fn release_failure_leaves_lock_to_expire_without_changing_outcome() {
    let ctx = TestContext::new();
    ctx.seed_due_subscriptions(1, price(8, 0)).await;
    let lock = Arc::new(UndeletableLock::new(ctx.lock.clone()));
    let scheduler = ctx.scheduler_with_lock(lock.clone(), "instance-a");

    let outcome = scheduler.run_scheduled_cycle().await;

    assert!(matches!(outcome, CycleOutcome::Completed(_)));
    assert_eq!(lock.delete_calls.load(Ordering::SeqCst), 1);
    assert_eq!(ctx.lock.holder(LOCK_KEY).as_deref(), Some("instance-a"));

    tokio::time::advance(Duration::from_secs(601)).await;
    assert!(!ctx.lock.is_held(LOCK_KEY));
}

#[tokio::test(start_paused = true)]
async fn scheduler_loop_fires_at_the_daily_trigger_and_stops_on_cancel() {
    let ctx = TestContext::new();
    let due = ctx.seed_due_subscriptions(1, price(8, 0)).await;
    // One second before the default 00:00 UTC trigger
    ctx.clock
        .set(Utc.with_ymd_and_hms(2024, 1, 15, 23, 59, 59).unwrap());
    assert!(base_time() < Utc.with_ymd_and_hms(2024, 1, 15, 23, 59, 59).unwrap());

    let scheduler = Arc::new(ctx.scheduler("instance-a"));
    let shutdown = CancellationToken::new();
    let handle = scheduler.spawn(shutdown.clone());

    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(
        ctx.subscription(due[0].subscription_id).await.status(),
        SubscriptionStatus::Hold
    );
    assert_eq!(ctx.bills(due[0].subscription_id).len(), 1);
    assert!(!ctx.lock.is_held(LOCK_KEY));

    shutdown.cancel();
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn cancelled_scheduler_never_fires() {
    let ctx = TestContext::new();
    let due = ctx.seed_due_subscriptions(1, price(8, 0)).await;

    let scheduler = Arc::new(ctx.scheduler("instance-a"));
    let shutdown = CancellationToken::new();
    shutdown.cancel();
    scheduler.spawn(shutdown).await.unwrap();

    assert!(ctx.bills(due[0].subscription_id).is_empty());
}
