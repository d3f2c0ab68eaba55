//! Edge cases: cancellation, panics, late inserts, misconfiguration

use ferry_core::application::{FailurePolicy, RunnerConfig};
use ferry_core::application::runner::constants::MAX_RETRIES;
use ferry_core::domain::{BatchStatus, DomainError};
use ferry_core::port::work_unit::mocks::MockWorkUnit;
use ferry_core::{AppError, BatchError, BatchOptions, Placement, TaskRunner, UnitError};
use ferry_integration_tests::{coordinator, eventually, runner, Harness, Unit};
use std::sync::Arc;

/// Units of a rejected batch still queued in the runner are skipped, not run
#[tokio::test]
async fn test_rejection_cancels_units_queued_in_runner() {
    let runner = runner(2);
    let coordinator = coordinator(&runner);
    let harness = Harness::new();

    let b1 = runner.submit(harness.gated_call("b1"), Placement::Back);
    let b2 = runner.submit(harness.gated_call("b2"), Placement::Back);

    let bad: Unit = Arc::new(MockWorkUnit::new_fail("bad", "rejected by server"));
    let handle = coordinator.start(vec![bad], BatchOptions::default()).unwrap();
    let other = runner.submit(harness.gated_call("other"), Placement::Back);
    handle
        .insert(vec![harness.gated_success("good")], Placement::Back)
        .unwrap();
    // runner queue: bad, other, good
    assert_eq!(runner.stats().queued, 3);

    // One blocker finishes, bad runs and fails, other takes the freed slot
    harness.release(1);
    eventually(|| handle.status() == BatchStatus::Rejected).await;
    assert!(!handle.is_settled());

    harness.release(2);
    let BatchError::Rejected { report, .. } = handle.done().await.unwrap_err() else {
        panic!("expected rejection");
    };
    assert_eq!(report.abandoned, 1);
    assert_eq!(report.succeeded, 0);
    assert_eq!(harness.journal.count("good"), 0);

    for admission in [b1, b2, other] {
        admission.await.unwrap();
    }
    eventually(|| runner.stats().in_flight == 0).await;
}

#[tokio::test]
async fn test_drain_all_runs_units_queued_in_runner() {
    let runner = runner(1);
    let coordinator = coordinator(&runner);
    let harness = Harness::new();

    let blocker = runner.submit(harness.gated_call("blocker"), Placement::Back);
    let units: Vec<Unit> = vec![
        Arc::new(MockWorkUnit::new_fail("bad", "rejected by server")),
        harness.gated_success("good"),
    ];
    let options = BatchOptions::default().with_failure_policy(FailurePolicy::DrainAll);
    let handle = coordinator.start(units, options).unwrap();

    harness.release(2);
    let BatchError::Rejected { report, .. } = handle.done().await.unwrap_err() else {
        panic!("expected rejection");
    };
    blocker.await.unwrap();

    assert_eq!(report.succeeded, 1);
    assert_eq!(report.abandoned, 0);
    assert_eq!(harness.journal.entries(), vec!["blocker", "good"]);
}

#[tokio::test]
async fn test_panicking_unit_frees_its_slot() {
    let runner = runner(1);

    let panicky = runner.submit(
        || async {
            if true {
                panic!("disk on fire");
            }
            Ok::<String, String>("never".to_string())
        },
        Placement::Back,
    );
    let next = runner.submit(
        || async { Ok::<String, String>("next".to_string()) },
        Placement::Back,
    );

    match panicky.await {
        Err(UnitError::Panicked(msg)) => assert!(msg.contains("disk on fire")),
        other => panic!("expected panic outcome, got {:?}", other),
    }
    assert_eq!(next.await, Ok("next".to_string()));

    eventually(|| runner.stats().in_flight == 0).await;
    assert_eq!(runner.stats().settled_total, 2);
}

#[tokio::test]
async fn test_dropped_admission_keeps_unit_running() {
    let runner = runner(1);
    let harness = Harness::new();

    drop(runner.submit(harness.gated_call("orphan"), Placement::Back));
    let follower = runner.submit(harness.gated_call("follower"), Placement::Back);

    harness.release(2);
    assert_eq!(follower.await, Ok("follower".to_string()));
    assert_eq!(harness.journal.entries(), vec!["orphan", "follower"]);
}

#[tokio::test]
async fn test_insert_after_rejection_settled_fails() {
    let runner = runner(2);
    let coordinator = coordinator(&runner);
    let units: Vec<Unit> = vec![Arc::new(MockWorkUnit::new_fail("bad", "nope"))];

    let handle = coordinator.start(units, BatchOptions::default()).unwrap();
    assert!(handle.done().await.is_err());

    let err = handle
        .insert(vec![Arc::new(MockWorkUnit::new_success("late"))], Placement::Front)
        .unwrap_err();
    assert_eq!(
        err,
        BatchError::Settled {
            batch_id: handle.id().to_string(),
            status: BatchStatus::Rejected,
        }
    );
}

/// Rejected but still draining: inserts are accepted and abandoned
#[tokio::test]
async fn test_insert_into_rejected_unsettled_batch() {
    let runner = runner(2);
    let coordinator = coordinator(&runner);
    let harness = Harness::new();

    let units: Vec<Unit> = vec![
        harness.gated_success("slow"),
        Arc::new(MockWorkUnit::new_fail("bad", "nope")),
    ];
    let handle = coordinator.start(units, BatchOptions::default()).unwrap();
    eventually(|| handle.status() == BatchStatus::Rejected).await;

    let ids = handle
        .insert(vec![harness.gated_success("late")], Placement::Back)
        .unwrap();
    assert_eq!(ids, vec![2]);
    let snapshot = handle.snapshot();
    assert_eq!(snapshot.abandoned, 1);
    assert_eq!(snapshot.waiting, 0);

    harness.release(1);
    let BatchError::Rejected { report, .. } = handle.done().await.unwrap_err() else {
        panic!("expected rejection");
    };
    assert_eq!(report.submitted, 3);
    assert_eq!(report.abandoned, 1);
    assert_eq!(harness.journal.count("late"), 0);
}

#[tokio::test]
async fn test_front_batch_placement_overtakes_runner_queue() {
    let runner = runner(1);
    let coordinator = coordinator(&runner);
    let harness = Harness::new();

    let blocker = runner.submit(harness.gated_call("blocker"), Placement::Back);
    let queued = runner.submit(harness.gated_call("queued"), Placement::Back);

    let handle = coordinator
        .start(
            vec![harness.gated_success("urgent")],
            BatchOptions::default().with_placement(Placement::Front),
        )
        .unwrap();

    harness.release(3);
    handle.done().await.unwrap();
    blocker.await.unwrap();
    queued.await.unwrap();

    assert_eq!(harness.journal.entries(), vec!["blocker", "urgent", "queued"]);
}

#[tokio::test]
async fn test_zero_concurrency_rejected() {
    let result = TaskRunner::new(RunnerConfig::new(0));
    assert!(matches!(
        result,
        Err(AppError::Domain(DomainError::InvalidConcurrency(0)))
    ));
}

#[test]
fn test_runner_requires_runtime() {
    let result = TaskRunner::new(RunnerConfig::new(2));
    assert!(matches!(result, Err(AppError::Config(_))));
}

#[tokio::test]
async fn test_excessive_retry_budget_rejected() {
    let runner = runner(2);
    let coordinator = coordinator(&runner);

    let result = coordinator.start::<String, String>(
        vec![],
        BatchOptions::default().with_retries(MAX_RETRIES + 1),
    );
    assert!(matches!(result, Err(AppError::Validation(_))));
}
