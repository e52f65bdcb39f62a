//! Integration tests for [`MigrationRunner`] against the in-process ledger.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use common::{broken_step, cancelling_step, counted_step, edited, step, steps, Schema};
use stagehand_core::error::ConfigError;
use stagehand_core::migration::{MemoryLedger, MigrationError, MigrationLedger, MigrationRunner};
use tokio_util::sync::CancellationToken;

fn runner(ledger: &Arc<MemoryLedger<Schema>>) -> MigrationRunner<MemoryLedger<Schema>> {
    MigrationRunner::new(Arc::clone(ledger))
}

async fn recorded_ids(ledger: &MemoryLedger<Schema>) -> Vec<String> {
    ledger
        .entries()
        .await
        .into_iter()
        .map(|e| e.step_id)
        .collect()
}

// ---------------------------------------------------------------------------
// Test: steps apply in order and are recorded
// ---------------------------------------------------------------------------

#[tokio::test]
async fn applies_pending_steps_in_order() {
    let ledger = Arc::new(MemoryLedger::new(Schema::new()));

    let report = runner(&ledger)
        .run(&steps(&["0001_init", "0002_add_users"]), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.applied, 2);
    assert_eq!(report.already_applied, 0);
    assert_eq!(report.applied_steps, vec!["0001_init", "0002_add_users"]);
    assert_eq!(ledger.target().await, vec!["0001_init", "0002_add_users"]);
    assert_eq!(recorded_ids(&ledger).await, vec!["0001_init", "0002_add_users"]);
}

// ---------------------------------------------------------------------------
// Test: a second run is a no-op
// ---------------------------------------------------------------------------

#[tokio::test]
async fn second_run_applies_nothing() {
    let ledger = Arc::new(MemoryLedger::new(Schema::new()));
    let (init, init_runs) = counted_step("0001_init");
    let (users, users_runs) = counted_step("0002_add_users");
    let all = vec![init, users];
    let cancel = CancellationToken::new();

    runner(&ledger).run(&all, &cancel).await.unwrap();
    let second = runner(&ledger).run(&all, &cancel).await.unwrap();

    assert_eq!(second.applied, 0);
    assert_eq!(second.already_applied, 2);
    assert_eq!(init_runs.load(Ordering::SeqCst), 1);
    assert_eq!(users_runs.load(Ordering::SeqCst), 1);
    assert_eq!(ledger.target().await.len(), 2);
}

// ---------------------------------------------------------------------------
// Test: an edited applied step is drift and blocks later steps
// ---------------------------------------------------------------------------

#[tokio::test]
async fn checksum_change_is_drift() {
    let ledger = Arc::new(MemoryLedger::new(Schema::new()));
    let cancel = CancellationToken::new();
    let original = steps(&["0001_init", "0002_add_users"]);
    runner(&ledger).run(&original, &cancel).await.unwrap();

    let (later, later_runs) = counted_step("0003_add_index");
    let changed = vec![edited(&original[0]), original[1].clone(), later];
    let err = runner(&ledger).run(&changed, &cancel).await.unwrap_err();

    assert_matches!(err, MigrationError::Drift(ref id) if id == "0001_init");
    assert_eq!(later_runs.load(Ordering::SeqCst), 0);
    assert_eq!(recorded_ids(&ledger).await, vec!["0001_init", "0002_add_users"]);
}

// ---------------------------------------------------------------------------
// Test: failure at step 3 of 5, then recovery
// ---------------------------------------------------------------------------

#[tokio::test]
async fn partial_failure_then_resume() {
    let ledger = Arc::new(MemoryLedger::new(Schema::new()));
    let cancel = CancellationToken::new();

    let mut first_attempt = steps(&["0001", "0002"]);
    first_attempt.push(broken_step("0003"));
    let (fourth, fourth_runs) = counted_step("0004");
    first_attempt.push(fourth);
    first_attempt.push(step("0005"));

    let err = runner(&ledger).run(&first_attempt, &cancel).await.unwrap_err();

    assert_matches!(err, MigrationError::StepFailed { ref step_id, .. } if step_id == "0003");
    assert_eq!(fourth_runs.load(Ordering::SeqCst), 0);
    assert_eq!(recorded_ids(&ledger).await, vec!["0001", "0002"]);
    // The failed step's partial effect was rolled back.
    assert_eq!(ledger.target().await, vec!["0001", "0002"]);

    let (first, first_runs) = counted_step("0001");
    let (second, second_runs) = counted_step("0002");
    let mut fixed = vec![first, second];
    fixed.extend(steps(&["0003", "0004", "0005"]));

    let report = runner(&ledger).run(&fixed, &cancel).await.unwrap();

    assert_eq!(report.applied, 3);
    assert_eq!(report.applied_steps, vec!["0003", "0004", "0005"]);
    assert_eq!(first_runs.load(Ordering::SeqCst), 0);
    assert_eq!(second_runs.load(Ordering::SeqCst), 0);
    assert_eq!(
        recorded_ids(&ledger).await,
        vec!["0001", "0002", "0003", "0004", "0005"]
    );
}

// ---------------------------------------------------------------------------
// Test: cancellation is honoured between steps
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancelled_before_first_step() {
    let ledger = Arc::new(MemoryLedger::new(Schema::new()));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = runner(&ledger)
        .run(&steps(&["0001_init"]), &cancel)
        .await
        .unwrap_err();

    assert_matches!(err, MigrationError::Cancelled { applied: 0 });
    assert!(ledger.entries().await.is_empty());
}

#[tokio::test]
async fn cancel_during_step_lets_it_finish() {
    let ledger = Arc::new(MemoryLedger::new(Schema::new()));
    let cancel = CancellationToken::new();
    let (third, third_runs) = counted_step("0003");
    let all = vec![
        step("0001"),
        cancelling_step("0002", cancel.clone()),
        third,
    ];

    let err = runner(&ledger).run(&all, &cancel).await.unwrap_err();

    assert_matches!(err, MigrationError::Cancelled { applied: 2 });
    assert_eq!(third_runs.load(Ordering::SeqCst), 0);
    assert_eq!(recorded_ids(&ledger).await, vec!["0001", "0002"]);
    assert_eq!(ledger.target().await, vec!["0001", "0002"]);
}

#[tokio::test(start_paused = true)]
async fn cancel_while_waiting_for_lock() {
    let ledger = Arc::new(MemoryLedger::new(Schema::new()));
    let _held = ledger
        .lock(Duration::from_secs(1), &CancellationToken::new())
        .await
        .unwrap();
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        trigger.cancel();
    });

    let started = tokio::time::Instant::now();
    let err = runner(&ledger)
        .with_lock_timeout(Duration::from_secs(60))
        .run(&steps(&["0001_init"]), &cancel)
        .await
        .unwrap_err();

    assert_matches!(err, MigrationError::Cancelled { applied: 0 });
    assert!(started.elapsed() < Duration::from_secs(2));
}

// ---------------------------------------------------------------------------
// Test: misordered steps are rejected before the lock is taken
// ---------------------------------------------------------------------------

#[tokio::test]
async fn misordered_steps_rejected() {
    let ledger = Arc::new(MemoryLedger::new(Schema::new()));

    let err = runner(&ledger)
        .run(&steps(&["0002_add_users", "0001_init"]), &CancellationToken::new())
        .await
        .unwrap_err();

    assert_matches!(err, MigrationError::InvalidSteps(ConfigError::StepOrder { .. }));
    assert!(ledger.entries().await.is_empty());
}

// ---------------------------------------------------------------------------
// Test: lock timeout is distinct from a migration failure
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn lock_timeout_when_another_runner_holds_the_ledger() {
    let ledger = Arc::new(MemoryLedger::new(Schema::new()));
    let _held = ledger
        .lock(Duration::from_secs(1), &CancellationToken::new())
        .await
        .unwrap();

    let err = runner(&ledger)
        .with_lock_timeout(Duration::from_millis(500))
        .run(&steps(&["0001_init"]), &CancellationToken::new())
        .await
        .unwrap_err();

    assert_matches!(err, MigrationError::LockTimeout { waited } if waited == Duration::from_millis(500));
}

// ---------------------------------------------------------------------------
// Test: recorded steps no longer defined are left alone
// ---------------------------------------------------------------------------

#[tokio::test]
async fn orphaned_ledger_rows_are_ignored() {
    let ledger = Arc::new(MemoryLedger::new(Schema::new()));
    let cancel = CancellationToken::new();
    runner(&ledger)
        .run(&steps(&["0001", "0002", "0003"]), &cancel)
        .await
        .unwrap();

    let report = runner(&ledger)
        .run(&steps(&["0001", "0002"]), &cancel)
        .await
        .unwrap();

    assert_eq!(report.applied, 0);
    assert_eq!(recorded_ids(&ledger).await.len(), 3);
}

// ---------------------------------------------------------------------------
// Test: concurrent runners apply each step exactly once
// ---------------------------------------------------------------------------

async fn run_concurrently(instances: usize) -> (Vec<usize>, Vec<String>, Schema) {
    let ledger = Arc::new(MemoryLedger::new(Schema::new()));
    let all = steps(&["0001_init", "0002_add_users", "0003_add_index"]);

    let handles: Vec<_> = (0..instances)
        .map(|_| {
            let instance = runner(&ledger);
            let all = all.clone();
            tokio::spawn(async move { instance.run(&all, &CancellationToken::new()).await })
        })
        .collect();

    let mut applied = Vec::new();
    for handle in handles {
        applied.push(handle.await.unwrap().unwrap().applied);
    }

    (applied, recorded_ids(&ledger).await, ledger.target().await)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_runners_apply_exactly_once() {
    let (applied, ids, schema) = run_concurrently(8).await;

    assert_eq!(applied.iter().filter(|&&n| n == 3).count(), 1);
    assert_eq!(applied.iter().filter(|&&n| n == 0).count(), 7);
    assert_eq!(ids, vec!["0001_init", "0002_add_users", "0003_add_index"]);

    let (_, single_ids, single_schema) = run_concurrently(1).await;
    assert_eq!(ids, single_ids);
    assert_eq!(schema, single_schema);
}
