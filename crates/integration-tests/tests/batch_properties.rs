//! Batch coordinator behaviour: retries, settlement, insertion

use ferry_core::application::{FailurePolicy, RetryScope};
use ferry_core::domain::BatchStatus;
use ferry_core::port::work_unit::mocks::MockWorkUnit;
use ferry_core::{BatchError, BatchOptions, Placement};
use ferry_integration_tests::{coordinator, eventually, runner, Harness, Unit};
use std::sync::Arc;
use tokio_test::{assert_pending, assert_ready};

#[tokio::test]
async fn test_retry_until_success_within_budget() {
    let runner = runner(2);
    let coordinator = coordinator(&runner);
    let flaky = Arc::new(MockWorkUnit::new_flaky("flaky", 2));
    let units: Vec<Unit> = vec![flaky.clone()];

    let handle = coordinator
        .start(units, BatchOptions::default().with_retries(2))
        .unwrap();

    let report = handle.done().await.unwrap();
    assert_eq!(flaky.call_count(), 3);
    assert_eq!(report.retries_used, 2);
    assert_eq!(report.succeeded, 1);
    assert_eq!(handle.status(), BatchStatus::Fulfilled);
}

#[tokio::test]
async fn test_retry_exhaustion_rejects_batch() {
    let runner = runner(2);
    let coordinator = coordinator(&runner);
    let broken = Arc::new(MockWorkUnit::new_fail("broken", "503 from upstream"));
    let units: Vec<Unit> = vec![broken.clone()];

    let handle = coordinator
        .start(units, BatchOptions::default().with_retries(1))
        .unwrap();

    let BatchError::Rejected { failures, .. } = handle.done().await.unwrap_err() else {
        panic!("expected rejection");
    };
    assert_eq!(broken.call_count(), 2);
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].attempts, 2);
    assert_eq!(failures[0].reason, "unit failed: broken: 503 from upstream");
}

/// A retry is admitted ahead of everything already waiting in the runner
#[tokio::test]
async fn test_retry_jumps_runner_queue() {
    let runner = runner(1);
    let coordinator = coordinator(&runner);
    let harness = Harness::new();

    let flaky: Unit = Arc::new(harness.wire(MockWorkUnit::new_flaky("flaky", 1)));
    let handle = coordinator
        .start(vec![flaky], BatchOptions::default().with_retries(1))
        .unwrap();

    let others: Vec<_> = ["o1", "o2", "o3"]
        .into_iter()
        .map(|name| runner.submit(harness.gated_call(name), Placement::Back))
        .collect();

    // First attempt fails, o1 takes the freed slot, the retry queues at the head
    harness.release(1);
    eventually(|| runner.stats().queued == 3 && harness.journal.entries().len() == 2).await;
    assert_eq!(harness.journal.entries(), vec!["flaky", "o1"]);

    harness.release(4);
    handle.done().await.unwrap();
    for admission in others {
        admission.await.unwrap();
    }

    assert_eq!(
        harness.journal.entries(),
        vec!["flaky", "o1", "flaky", "o2", "o3"]
    );
}

/// A front-inserted group keeps its order when the runner is already full
#[tokio::test]
async fn test_front_insert_keeps_order_in_saturated_runner() {
    let runner = runner(3);
    let coordinator = coordinator(&runner);
    let harness = Harness::new();

    let blockers: Vec<_> = ["blk0", "blk1", "blk2"]
        .into_iter()
        .map(|name| runner.submit(harness.gated_call(name), Placement::Back))
        .collect();

    let handle = coordinator
        .start(vec![harness.gated_success("a")], BatchOptions::default())
        .unwrap();
    handle
        .insert(
            vec![harness.gated_success("x"), harness.gated_success("y")],
            Placement::Front,
        )
        .unwrap();
    assert_eq!(runner.stats().queued, 3);
    assert_eq!(handle.snapshot().waiting, 0);

    harness.release(6);
    handle.done().await.unwrap();
    for admission in blockers {
        admission.await.unwrap();
    }

    assert_eq!(
        harness.journal.entries(),
        vec!["blk0", "blk1", "blk2", "x", "y", "a"]
    );
}

#[tokio::test]
async fn test_mid_flight_insert_delays_settlement() {
    let runner = runner(2);
    let coordinator = coordinator(&runner);
    let harness = Harness::new();

    let handle = coordinator
        .start(
            vec![harness.gated_success("a"), harness.gated_success("b")],
            BatchOptions::default(),
        )
        .unwrap();

    let ids = handle
        .insert(
            vec![harness.gated_success("c"), harness.gated_success("d")],
            Placement::Back,
        )
        .unwrap();
    assert_eq!(ids, vec![2, 3]);
    assert_eq!(handle.snapshot().waiting, 2);

    let mut done = tokio_test::task::spawn(handle.done());

    harness.release(2);
    eventually(|| handle.snapshot().succeeded == 2).await;
    assert_pending!(done.poll());
    assert!(!handle.is_settled());

    harness.release(2);
    let report = handle.done().await.unwrap();
    assert_eq!(report.submitted, 4);
    assert_eq!(report.succeeded, 4);
    assert!(done.is_woken());
    assert_eq!(assert_ready!(done.poll()), Ok(report));
}

#[tokio::test]
async fn test_settlement_observed_identically() {
    let runner = runner(2);
    let coordinator = coordinator(&runner);
    let units: Vec<Unit> = vec![
        Arc::new(MockWorkUnit::new_success("a")),
        Arc::new(MockWorkUnit::new_fail("b", "denied")),
    ];

    let handle = coordinator.start(units, BatchOptions::default()).unwrap();
    let clone = handle.clone();

    let (first, second) = tokio::join!(handle.done(), clone.done());
    let third = handle.done().await;

    assert!(matches!(first, Err(BatchError::Rejected { .. })));
    assert_eq!(first, second);
    assert_eq!(first, third);
}

/// Capacity 2, unit 2 of 3 always fails, no retries
#[tokio::test]
async fn test_failure_mid_batch_with_drain_all() {
    let runner = runner(2);
    let coordinator = coordinator(&runner);
    let harness = Harness::new();

    let units: Vec<Unit> = vec![
        harness.gated_success("u1"),
        Arc::new(harness.wire(MockWorkUnit::new_fail("u2", "bad part"))),
        harness.gated_success("u3"),
    ];
    let options = BatchOptions::default().with_failure_policy(FailurePolicy::DrainAll);
    let handle = coordinator.start(units, options).unwrap();

    harness.release(3);
    let BatchError::Rejected { failures, report, .. } = handle.done().await.unwrap_err() else {
        panic!("expected rejection");
    };

    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].unit_id, 1);
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.abandoned, 0);
    assert_eq!(harness.journal.count("u1"), 1);
    assert_eq!(harness.journal.count("u3"), 1);
}

/// Same shape under the default policy: the waiting unit is abandoned
#[tokio::test]
async fn test_failure_mid_batch_cancels_waiting() {
    let runner = runner(2);
    let coordinator = coordinator(&runner);
    let harness = Harness::new();

    let units: Vec<Unit> = vec![
        harness.gated_success("u1"),
        Arc::new(MockWorkUnit::new_fail("u2", "bad part")),
        harness.gated_success("u3"),
    ];
    let handle = coordinator.start(units, BatchOptions::default()).unwrap();

    eventually(|| handle.status() == BatchStatus::Rejected).await;
    // u1 is still in flight, so the batch has not settled
    assert!(!handle.is_settled());
    assert_eq!(handle.snapshot().abandoned, 1);

    harness.release(1);
    let BatchError::Rejected { report, .. } = handle.done().await.unwrap_err() else {
        panic!("expected rejection");
    };
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.abandoned, 1);
    assert_eq!(harness.journal.entries(), vec!["u1"]);
}

#[tokio::test]
async fn test_shared_budget_runs_out_across_units() {
    let runner = runner(1);
    let coordinator = coordinator(&runner);
    let units: Vec<Arc<MockWorkUnit>> = (0..3)
        .map(|i| Arc::new(MockWorkUnit::new_flaky(format!("p{}", i), 1)))
        .collect();
    let shared: Vec<Unit> = units.iter().map(|u| u.clone() as Unit).collect();

    let options = BatchOptions::default()
        .with_retries(2)
        .with_retry_scope(RetryScope::Shared)
        .with_failure_policy(FailurePolicy::DrainAll);
    let handle = coordinator.start(shared, options).unwrap();

    let BatchError::Rejected { failures, report, .. } = handle.done().await.unwrap_err() else {
        panic!("expected rejection");
    };
    assert_eq!(report.retries_used, 2);
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].unit_id, 2);
    assert_eq!(units[0].call_count(), 2);
    assert_eq!(units[1].call_count(), 2);
    assert_eq!(units[2].call_count(), 1);
}

#[tokio::test]
async fn test_per_unit_budget_is_independent() {
    let runner = runner(1);
    let coordinator = coordinator(&runner);
    let units: Vec<Unit> = (0..3)
        .map(|i| Arc::new(MockWorkUnit::new_flaky(format!("p{}", i), 1)) as Unit)
        .collect();

    let handle = coordinator
        .start(units, BatchOptions::default().with_retries(1))
        .unwrap();

    let report = handle.done().await.unwrap();
    assert_eq!(report.retries_used, 3);
    assert_eq!(report.succeeded, 3);
}

#[tokio::test]
async fn test_report_carries_label_and_timing() {
    let runner = runner(2);
    let coordinator = coordinator(&runner);
    let units: Vec<Unit> = vec![Arc::new(MockWorkUnit::new_success("only"))];

    let handle = coordinator
        .start(units, BatchOptions::default().with_label("upload/video-42"))
        .unwrap();

    let report = handle.done().await.unwrap();
    assert_eq!(report.batch_id, "batch-1");
    assert_eq!(report.label.as_deref(), Some("upload/video-42"));
    assert!(report.duration_ms() > 0);
    assert_eq!(handle.label(), Some("upload/video-42"));
}
