// tests/cancel_behaviour.rs

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use scanflow::dag::RunState;
use scanflow::engine::{RunOptions, Workflow};
use scanflow::errors::ScanflowError;
use scanflow_test_utils::recording::{
    OrderRecorder, failing_task, sleeping_task, stubborn_task,
};
use scanflow_test_utils::{init_tracing, with_timeout};

fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

fn cancel_after(token: &CancellationToken, after: Duration) {
    let token = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(after).await;
        token.cancel();
    });
}

#[tokio::test(start_paused = true)]
async fn caller_cancel_returns_promptly() {
    init_tracing();

    let workflow: Workflow<OrderRecorder> = Workflow::new(vec![
        stubborn_task("scan", &[], secs(10)),
        sleeping_task("report", &["scan"], secs(1)),
    ])
    .unwrap();
    let rec = OrderRecorder::new();
    let cancel = CancellationToken::new();
    cancel_after(&cancel, secs(1));

    let started = Instant::now();
    let (result, snapshot) = with_timeout(workflow.run_with_snapshot(&cancel, rec.clone())).await;
    let elapsed = started.elapsed();

    assert!(matches!(result, Err(ScanflowError::Cancelled)));
    assert!(elapsed >= secs(1) && elapsed < secs(2), "took {elapsed:?}");
    assert_eq!(snapshot.state_of("scan"), Some(RunState::Running));
    assert_eq!(snapshot.state_of("report"), Some(RunState::Pending));
    assert!(!rec.was_started("report"));
}

#[tokio::test(start_paused = true)]
async fn caller_cancel_reaches_running_bodies() {
    init_tracing();

    let workflow: Workflow<OrderRecorder> =
        Workflow::new(vec![sleeping_task("scan", &[], secs(10))]).unwrap();
    let rec = OrderRecorder::new();
    let cancel = CancellationToken::new();
    cancel_after(&cancel, secs(1));

    let err = with_timeout(workflow.run(&cancel, rec.clone()))
        .await
        .unwrap_err();
    assert!(err.is_cancellation());

    tokio::time::sleep(secs(20)).await;
    assert!(rec.was_started("scan"));
    assert!(rec.finished().is_empty());
}

#[tokio::test(start_paused = true)]
async fn stragglers_keep_running_after_fail_fast() {
    init_tracing();

    let workflow: Workflow<OrderRecorder> = Workflow::new(vec![
        sleeping_task("slow", &[], secs(3)),
        failing_task("bad", &[], secs(1)),
    ])
    .unwrap();
    let rec = OrderRecorder::new();

    let err = with_timeout(workflow.run(&CancellationToken::new(), rec.clone()))
        .await
        .unwrap_err();
    assert!(err.task_failures().is_some_and(|f| f.contains_task("bad")));
    assert!(!rec.finished().contains(&"slow".to_string()));

    // Nothing cancelled the token handed to "slow".
    tokio::time::sleep(secs(5)).await;
    assert!(rec.finished().contains(&"slow".to_string()));
}

#[tokio::test(start_paused = true)]
async fn cancel_in_flight_on_exit_stops_stragglers() {
    init_tracing();

    let workflow: Workflow<OrderRecorder> = Workflow::with_options(
        vec![
            sleeping_task("slow", &[], secs(3)),
            failing_task("bad", &[], secs(1)),
        ],
        RunOptions::default().with_cancel_in_flight_on_exit(true),
    )
    .unwrap();
    let rec = OrderRecorder::new();

    with_timeout(workflow.run(&CancellationToken::new(), rec.clone()))
        .await
        .unwrap_err();

    tokio::time::sleep(secs(5)).await;
    assert!(rec.was_started("slow"));
    assert!(!rec.finished().contains(&"slow".to_string()));
}

#[tokio::test(start_paused = true)]
async fn configured_timeout_cancels_task_token() {
    init_tracing();

    let workflow: Workflow<OrderRecorder> = Workflow::with_options(
        vec![sleeping_task("scan", &[], secs(10))],
        RunOptions::default().with_timeout(secs(1)),
    )
    .unwrap();
    let rec = OrderRecorder::new();
    let cancel = CancellationToken::new();

    let err = with_timeout(workflow.run(&cancel, rec.clone()))
        .await
        .unwrap_err();
    assert!(matches!(err, ScanflowError::DeadlineExceeded(_)));

    // The deadline only cancels the run's own child token.
    assert!(!cancel.is_cancelled());

    tokio::time::sleep(secs(20)).await;
    assert!(rec.finished().is_empty());
}

#[tokio::test(start_paused = true)]
async fn failure_wins_over_later_cancel() {
    init_tracing();

    let workflow: Workflow<OrderRecorder> =
        Workflow::new(vec![failing_task("bad", &[], Duration::ZERO)]).unwrap();
    let rec = OrderRecorder::new();
    let cancel = CancellationToken::new();
    cancel_after(&cancel, secs(5));

    let err = with_timeout(workflow.run(&cancel, rec.clone()))
        .await
        .unwrap_err();
    assert!(!err.is_cancellation());
    assert!(err.task_failures().is_some());
}
