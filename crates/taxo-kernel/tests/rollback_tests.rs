//! Rollback against concurrent migrations, slow storage and overlapping requests.

use std::sync::Arc;
use std::time::Duration;
use taxo_kernel::error::{RollbackFailure, TaxonomyError};
use taxo_kernel::logging::{AuditOperation, AuditOutcome};
use taxo_kernel::persistence::MemoryBackend;
use taxo_kernel::state_machine::RollbackPhase;
use taxo_kernel::VersionId;
use taxo_test_utils::{
    add_child, curator, engine_at_v1, id, open_engine, root_and_child, test_config, v, wait_until,
    GatedBackend, SlowBackend, A, B,
};

#[tokio::test]
async fn migration_parked_mid_write_finishes_and_a_queued_one_is_cancelled() {
    let backend = Arc::new(GatedBackend::new());
    let t = engine_at_v1(backend.clone()).await;
    let v11 = t.engine.apply(v(1, 0), &add_child(A, B, "B")).await.unwrap();
    t.engine.activate(v11, curator()).await.unwrap();

    backend.arm();
    let first = tokio::spawn({
        let engine = t.engine.clone();
        async move { engine.apply(v11, &add_child(B, id(0x400), "C")).await }
    });
    backend.wait_entered().await;

    let second = tokio::spawn({
        let engine = t.engine.clone();
        async move { engine.apply(v11, &add_child(A, id(0x500), "D")).await }
    });
    wait_until(|| t.engine.migrations().in_flight() == 2).await;

    let rollback = tokio::spawn({
        let engine = t.engine.clone();
        async move { engine.rollback(v(1, 0), curator()).await }
    });
    wait_until(|| t.engine.migrations().current_epoch() == 1).await;
    backend.release(2);

    let first = first.await.unwrap();
    let second = second.await.unwrap();
    let outcome = rollback.await.unwrap().unwrap();

    // The parked write had passed its epoch check, so it lands but stays inactive.
    assert_eq!(first.unwrap(), v(1, 2));
    assert!(matches!(
        second,
        Err(TaxonomyError::StaleEpoch { started: 0, current: 1 })
    ));

    assert!(outcome.succeeded);
    assert_eq!(outcome.cancelled_migrations, 1);
    assert_eq!(t.engine.active_version(), v(1, 0));
    assert!(t.engine.versions().contains(v(1, 2)));
    assert!(!t.engine.versions().contains(v(1, 3)));
    assert_eq!(t.engine.migrations().in_flight(), 0);
}

#[tokio::test]
async fn migration_started_after_rollback_is_not_cancelled() {
    let t = engine_at_v1(Arc::new(MemoryBackend::new())).await;
    let outcome = t.engine.rollback(v(1, 0), curator()).await.unwrap();
    assert!(outcome.succeeded);
    assert_eq!(outcome.cancelled_migrations, 0);

    let next = t.engine.apply(v(1, 0), &add_child(A, B, "B")).await.unwrap();
    assert_eq!(next, v(1, 1));
}

#[tokio::test]
async fn slow_activation_exceeds_the_budget() {
    let backend = Arc::new(SlowBackend::new());
    let config = test_config().with_ttr_budget(Duration::from_millis(50));
    let t = open_engine(config, backend.clone()).await;
    let v1 = t.engine.apply(VersionId::BOOTSTRAP, &root_and_child()).await.unwrap();
    let v11 = t.engine.apply(v1, &add_child(A, B, "B")).await.unwrap();
    t.engine.activate(v11, curator()).await.unwrap();

    backend.set_active_delay(Duration::from_secs(2));
    let outcome = t.engine.rollback(v1, curator()).await.unwrap();

    assert!(!outcome.succeeded);
    assert_eq!(
        outcome.failure,
        Some(RollbackFailure::DeadlineExceeded { budget_ms: 50 })
    );
    assert!(outcome.elapsed_ms >= 50);
    assert!(outcome.elapsed_ms < 2_000);
    assert_eq!(t.engine.active_version(), v11);
    assert_eq!(t.engine.rollback_phase(), RollbackPhase::RollbackFailed);

    let err = outcome.into_result().unwrap_err();
    assert!(matches!(err, TaxonomyError::RollbackFailed { .. }));

    // The abandoned attempt released the activation lock.
    backend.set_active_delay(Duration::ZERO);
    t.engine.activate(v1, curator()).await.unwrap();
    assert_eq!(t.engine.active_version(), v1);
}

#[tokio::test]
async fn overlapping_rollback_is_refused() {
    let backend = Arc::new(SlowBackend::new());
    let t = engine_at_v1(backend.clone()).await;
    let v11 = t.engine.apply(v(1, 0), &add_child(A, B, "B")).await.unwrap();

    backend.set_active_delay(Duration::from_millis(300));
    let running = tokio::spawn({
        let engine = t.engine.clone();
        async move { engine.rollback(v11, curator()).await }
    });
    wait_until(|| t.engine.rollback_phase() == RollbackPhase::RollbackInProgress).await;

    let refused = t.engine.rollback(v(1, 0), curator()).await;
    assert!(matches!(refused, Err(TaxonomyError::RollbackAlreadyInProgress)));

    let outcome = running.await.unwrap().unwrap();
    assert!(outcome.succeeded);
    assert_eq!(t.engine.active_version(), v11);
    assert_eq!(t.engine.rollback_phase(), RollbackPhase::RollbackSucceeded);
}

#[tokio::test]
async fn every_rollback_attempt_is_audited() {
    let t = engine_at_v1(Arc::new(MemoryBackend::new())).await;
    t.engine.rollback(v(1, 0), curator()).await.unwrap();
    t.engine.rollback(v(7, 0), curator()).await.unwrap();

    let rollbacks: Vec<_> = t
        .audit
        .events()
        .into_iter()
        .filter(|e| e.operation == AuditOperation::Rollback)
        .collect();
    assert_eq!(rollbacks.len(), 2);
    assert_eq!(rollbacks[0].outcome, AuditOutcome::Succeeded);
    assert_eq!(rollbacks[0].to_version, Some(v(1, 0)));
    assert_eq!(rollbacks[1].outcome, AuditOutcome::Rejected);
    assert_eq!(rollbacks[1].actor, curator());
    t.audit.verify_integrity().unwrap();
}

#[tokio::test]
async fn activate_is_refused_while_a_rollback_drains() {
    let backend = Arc::new(GatedBackend::new());
    let t = engine_at_v1(backend.clone()).await;
    let v11 = t.engine.apply(v(1, 0), &add_child(A, B, "B")).await.unwrap();
    t.engine.activate(v11, curator()).await.unwrap();

    backend.arm();
    let parked = tokio::spawn({
        let engine = t.engine.clone();
        async move { engine.apply(v11, &add_child(B, id(0x400), "C")).await }
    });
    backend.wait_entered().await;

    let rollback = tokio::spawn({
        let engine = t.engine.clone();
        async move { engine.rollback(v(1, 0), curator()).await }
    });
    wait_until(|| t.engine.migrations().current_epoch() == 1).await;
    assert_eq!(t.engine.rollback_phase(), RollbackPhase::RollbackInProgress);

    let audited = t.audit.events().len();
    let during = t.engine.activate(v11, curator()).await;
    assert!(matches!(during, Err(TaxonomyError::ConcurrentActivation)));
    assert_eq!(t.engine.active_version(), v11);
    assert_eq!(t.audit.events().len(), audited);

    backend.release(1);
    assert_eq!(parked.await.unwrap().unwrap(), v(1, 2));
    let outcome = rollback.await.unwrap().unwrap();
    assert!(outcome.succeeded);
    assert_eq!(t.engine.active_version(), v(1, 0));

    // Once the rollback is done, activation works again.
    t.engine.activate(v11, curator()).await.unwrap();
    assert_eq!(t.engine.active_version(), v11);
}

#[tokio::test]
async fn prune_waits_for_a_draining_rollback() {
    let backend = Arc::new(GatedBackend::new());
    let t = open_engine(test_config().with_rollback_targets(1), backend.clone()).await;
    let v1 = t.engine.apply(VersionId::BOOTSTRAP, &root_and_child()).await.unwrap();
    let v11 = t.engine.apply(v1, &add_child(A, B, "B")).await.unwrap();
    t.engine.activate(v11, curator()).await.unwrap();

    backend.arm();
    let first = tokio::spawn({
        let engine = t.engine.clone();
        async move { engine.apply(v11, &add_child(B, id(0x400), "C")).await }
    });
    backend.wait_entered().await;
    let second = tokio::spawn({
        let engine = t.engine.clone();
        async move { engine.apply(v11, &add_child(A, id(0x500), "D")).await }
    });
    wait_until(|| t.engine.migrations().in_flight() == 2).await;

    let rollback = tokio::spawn({
        let engine = t.engine.clone();
        async move { engine.rollback(v1, curator()).await }
    });
    wait_until(|| t.engine.migrations().current_epoch() == 1).await;

    let prune = tokio::spawn({
        let engine = t.engine.clone();
        async move { engine.prune(VersionId::BOOTSTRAP, curator()).await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!prune.is_finished());

    backend.release(2);
    let settled = tokio::time::timeout(Duration::from_secs(2), async {
        (
            first.await.unwrap(),
            second.await.unwrap(),
            rollback.await.unwrap(),
            prune.await.unwrap(),
        )
    })
    .await
    .expect("no lock cycle between prune, migrations and rollback");
    let (first, second, outcome, pruned) = settled;

    assert_eq!(first.unwrap(), v(1, 2));
    assert!(matches!(second, Err(TaxonomyError::StaleEpoch { .. })));
    let outcome = outcome.unwrap();
    assert!(outcome.succeeded);
    assert_eq!(outcome.cancelled_migrations, 1);
    pruned.unwrap();
    assert!(!t.engine.versions().contains(VersionId::BOOTSTRAP));
    assert_eq!(t.engine.active_version(), v1);
}
