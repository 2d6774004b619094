use pharmachain_common::order::{Order, OrderKind};
use pharmachain_common::projection::TimelineEventKind;
use pharmachain_common::status::{OrderStatus, QualityState};
use pharmachain_common::transition::Checkpoint;
use pharmachain_node::tracker::BatchView;
use pharmachain_service_integration::harness::TestHarness;
use pharmachain_service_integration::TAG;

/// Manufacturer to provider, then a consumer looks the package up by tag.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn batch_travels_to_provider_and_verifies_authentic() {
    let h = TestHarness::registered().await;
    let batch = h.create_batch(&h.acme, 100).await;
    h.judge(&h.acme, batch, QualityState::Approved).await.unwrap();

    let upstream = h.deliver_to_distributor(batch).await;
    let downstream = h.deliver_to_provider(batch).await;

    let order: Order = h.get(&format!("/orders/{upstream}")).await.unwrap();
    assert_eq!(order.status, OrderStatus::Reached);
    let order: Order = h.get(&format!("/orders/{downstream}")).await.unwrap();
    assert_eq!(order.status, OrderStatus::Reached);
    assert_eq!(order.linked_batch, Some(batch));

    let view: BatchView = h.get(&format!("/batches/{TAG}")).await.unwrap();
    assert!(view.timeline.is_authentic);
    assert_eq!(
        view.timeline.kinds(),
        vec![
            TimelineEventKind::BatchCreated,
            TimelineEventKind::QualityApproved,
            TimelineEventKind::DispatchedToDistributor,
            TimelineEventKind::ArrivedAtDistributor,
            TimelineEventKind::DispatchedToProvider,
            TimelineEventKind::ArrivedAtProvider,
            TimelineEventKind::ConsumerScan,
        ]
    );
    assert_eq!(view.orders.len(), 2);
    assert_eq!(view.batch.assigned_provider, Some(h.carepoint.id()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn disapproved_batch_is_not_authentic() {
    let h = TestHarness::registered().await;
    let batch = h.create_batch(&h.acme, 100).await;
    h.judge(&h.acme, batch, QualityState::Disapproved).await.unwrap();
    h.deliver_to_distributor(batch).await;
    h.deliver_to_provider(batch).await;

    let view: BatchView = h.get(&format!("/batches/{batch}")).await.unwrap();
    assert!(view.timeline.kinds().contains(&TimelineEventKind::ArrivedAtProvider));
    assert!(!view.timeline.is_authentic);

    let again = h.judge(&h.acme, batch, QualityState::Approved).await.unwrap_err();
    assert_eq!(again.kind(), "AlreadyJudged");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn oversized_order_is_rejected_without_changes() {
    let h = TestHarness::registered().await;
    let batch = h.create_batch(&h.acme, 20).await;
    let order = h
        .place_order(&h.northwind, &h.acme, OrderKind::Distributor, 40)
        .await;
    let before = h.ledger.snapshot().await;

    let err = h.assign(&h.acme, batch, order).await.unwrap_err();
    assert_eq!(err.status, 400);
    assert_eq!(err.kind(), "QuantityMismatch");

    let after = h.ledger.snapshot().await;
    assert_eq!(after.sequence, before.sequence);
    assert_eq!(after.batches, before.batches);
    assert_eq!(after.orders, before.orders);
    assert!(after.assignments.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn recall_reaches_open_orders_only() {
    let h = TestHarness::registered().await;
    let batch = h.create_batch(&h.acme, 100).await;
    let upstream = h.deliver_to_distributor(batch).await;
    let downstream = h
        .place_order(&h.carepoint, &h.northwind, OrderKind::Provider, 10)
        .await;
    h.assign(&h.northwind, batch, downstream).await.unwrap();
    h.scan(&h.northwind, Checkpoint::DistributorOutgoing)
        .await
        .unwrap();

    let execution = h.recall(&h.acme, batch).await.unwrap();
    assert_eq!(execution.receipt.orders, vec![downstream]);

    let order: Order = h.get(&format!("/orders/{upstream}")).await.unwrap();
    assert_eq!(order.status, OrderStatus::Reached);
    let order: Order = h.get(&format!("/orders/{downstream}")).await.unwrap();
    assert_eq!(order.status, OrderStatus::Recalled);
    assert!(order.recalled_at.is_some());

    let err = h
        .scan(&h.carepoint, Checkpoint::ProviderIncoming)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "InvalidTransition");

    let view: BatchView = h.get(&format!("/batches/{batch}")).await.unwrap();
    assert!(view.timeline.kinds().contains(&TimelineEventKind::BatchRecalled));
    assert!(!view.timeline.is_authentic);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn provider_leg_waits_for_distributor_arrival() {
    let h = TestHarness::registered().await;
    let batch = h.create_batch(&h.acme, 100).await;
    let upstream = h
        .place_order(&h.northwind, &h.acme, OrderKind::Distributor, 40)
        .await;
    h.assign(&h.acme, batch, upstream).await.unwrap();

    let downstream = h
        .place_order(&h.carepoint, &h.northwind, OrderKind::Provider, 10)
        .await;
    let err = h.assign(&h.northwind, batch, downstream).await.unwrap_err();
    assert_eq!(err.kind(), "InvalidTransition");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn checkpoints_enforce_order_of_legs() {
    let h = TestHarness::registered().await;
    let batch = h.create_batch(&h.acme, 100).await;
    let order = h
        .place_order(&h.northwind, &h.acme, OrderKind::Distributor, 40)
        .await;

    // Nothing assigned yet, so no order holds the batch.
    let err = h
        .scan(&h.acme, Checkpoint::ManufacturerOutgoing)
        .await
        .unwrap_err();
    assert_eq!(err.status, 404);
    assert_eq!(err.kind(), "OrderNotFound");

    h.assign(&h.acme, batch, order).await.unwrap();
    let err = h
        .scan(&h.northwind, Checkpoint::DistributorIncoming)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "InvalidTransition");

    h.scan(&h.acme, Checkpoint::ManufacturerOutgoing).await.unwrap();
    let repeat = h
        .scan(&h.acme, Checkpoint::ManufacturerOutgoing)
        .await
        .unwrap();
    assert_eq!(
        repeat.receipt.outcome,
        pharmachain_common::transition::Outcome::Unchanged
    );
}
