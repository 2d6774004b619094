use std::time::Duration;

use pharmachain_common::order::OrderKind;
use pharmachain_service_integration::harness::TestHarness;

/// Two distributors ordered; the manufacturer tries to give both the same
/// batch at once. The ledger accepts exactly one.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_assignment_has_one_winner() {
    let h = TestHarness::with_confirmation_delay(Duration::from_millis(50)).await;
    h.register_all().await;
    let batch = h.create_batch(&h.acme, 100).await;
    let north = h
        .place_order(&h.northwind, &h.acme, OrderKind::Distributor, 40)
        .await;
    let south = h
        .place_order(&h.southgate, &h.acme, OrderKind::Distributor, 40)
        .await;

    let (a, b) = tokio::join!(
        h.assign(&h.acme, batch, north),
        h.assign(&h.acme, batch, south),
    );
    let (wins, losses): (Vec<_>, Vec<_>) = [a, b].into_iter().partition(|r| r.is_ok());
    assert_eq!(wins.len(), 1);
    let loss = losses.into_iter().next().unwrap().unwrap_err();
    assert_eq!(loss.kind(), "AssignmentConflict");

    let state = h.ledger.snapshot().await;
    assert_eq!(state.assignments.len(), 1);
    assert!(state.assignments.is_consistent());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn transient_ledger_failures_are_retried() {
    let h = TestHarness::registered().await;
    h.ledger.inject_failures(2);
    let batch = h.create_batch(&h.acme, 100).await;
    let state = h.ledger.snapshot().await;
    assert!(state.batches.contains_key(&batch));
    assert_eq!(state.sequence, 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn exhausted_retries_surface_as_500() {
    let h = TestHarness::registered().await;
    h.ledger.inject_failures(3);
    let request = h.acme.sign(pharmachain_common::transition::Transition::CreateBatch(
        pharmachain_service_integration::new_batch(100),
    ));
    let err = h.post("/batches", &request).await.unwrap_err();
    assert_eq!(err.status, 500);
    assert_eq!(err.kind(), "LedgerSubmissionFailed");
    assert!(h.ledger.snapshot().await.batches.is_empty());
}
