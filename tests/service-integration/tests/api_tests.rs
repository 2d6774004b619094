use pharmachain_common::identity::{Actor, Role};
use pharmachain_common::transition::{Outcome, Transition};
use pharmachain_node::tracker::BatchView;
use pharmachain_service_integration::harness::TestHarness;
use pharmachain_service_integration::new_batch;
use serde_json::Value;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn health_reports_ledger_sequence() {
    let h = TestHarness::registered().await;
    let health: Value = h.get("/health").await.unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["sequence"], 4);
    assert_eq!(health["scanner"], false);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn registered_actor_is_readable_by_address() {
    let h = TestHarness::registered().await;
    let actor: Actor = h
        .get(&format!("/actors/{}", h.northwind.id().address()))
        .await
        .unwrap();
    assert_eq!(actor.role, Role::Distributor);
    assert_eq!(actor.company_name, "northwind");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_records_are_404() {
    let h = TestHarness::registered().await;
    let err = h.get::<BatchView>("/batches/42").await.unwrap_err();
    assert_eq!(err.status, 404);
    assert_eq!(err.kind(), "BatchNotFound");

    let err = h.get::<Value>("/orders/42").await.unwrap_err();
    assert_eq!(err.status, 404);
    assert_eq!(err.kind(), "OrderNotFound");

    let err = h
        .get::<Value>("/batches/ffffffffffffffffffffffff")
        .await
        .unwrap_err();
    assert_eq!(err.status, 404);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn malformed_input_is_400() {
    let h = TestHarness::registered().await;
    let err = h.get::<Value>("/batches/not-a-tag").await.unwrap_err();
    assert_eq!(err.status, 400);
    assert_eq!(err.kind(), "InvalidRfidTag");

    let response = h
        .client
        .post(format!("{}/batches", h.base_url))
        .header("content-type", "application/json")
        .body("{\"id\": 5")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "InvalidPayload");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn transitions_must_match_their_route() {
    let h = TestHarness::registered().await;
    let request = h.acme.sign(Transition::CreateBatch(new_batch(10)));
    let err = h.post("/orders", &request).await.unwrap_err();
    assert_eq!(err.status, 400);
    assert_eq!(err.kind(), "InvalidPayload");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unauthorized_actor_is_400() {
    let h = TestHarness::registered().await;
    let request = h.northwind.sign(Transition::CreateBatch(new_batch(10)));
    let err = h.post("/batches", &request).await.unwrap_err();
    assert_eq!(err.status, 400);
    assert_eq!(err.kind(), "UnauthorizedActor");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn tampered_request_fails_signature_check() {
    let h = TestHarness::registered().await;
    let mut request = h.acme.sign(Transition::CreateBatch(new_batch(10)));
    if let Transition::CreateBatch(new) = &mut request.transition {
        new.quantity = 10_000;
    }
    let err = h.post("/batches", &request).await.unwrap_err();
    assert_eq!(err.kind(), "InvalidSignature");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn replayed_request_returns_original_receipt() {
    let h = TestHarness::registered().await;
    let request = h
        .acme
        .sign_with_id("acme-batch-1", Transition::CreateBatch(new_batch(100)));
    let first = h.post("/batches", &request).await.unwrap();
    let second = h.post("/batches", &request).await.unwrap();
    assert_eq!(first.receipt, second.receipt);
    assert_eq!(first.receipt.outcome, Outcome::Applied);
    assert_eq!(h.ledger.snapshot().await.batches.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reused_request_id_is_a_conflict() {
    let h = TestHarness::registered().await;
    let original = h
        .acme
        .sign_with_id("acme-batch-1", Transition::CreateBatch(new_batch(100)));
    h.post("/batches", &original).await.unwrap();

    let mut other = new_batch(250);
    other.product_name = "Ibuprofen 200mg".into();
    let reused = h
        .acme
        .sign_with_id("acme-batch-1", Transition::CreateBatch(other));
    let err = h.post("/batches", &reused).await.unwrap_err();
    assert_eq!(err.status, 409);
    assert_eq!(err.kind(), "DuplicateRequest");
    assert_eq!(h.ledger.snapshot().await.batches.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn consumer_lookup_is_recorded_once() {
    let h = TestHarness::registered().await;
    let batch = h.create_batch(&h.acme, 100).await;

    let quiet: BatchView = h
        .get(&format!("/batches/{batch}?record_scan=false"))
        .await
        .unwrap();
    assert!(quiet.batch.consumer_scanned_at.is_none());

    let first: BatchView = h.get(&format!("/batches/{batch}")).await.unwrap();
    let second: BatchView = h.get(&format!("/batches/{batch}")).await.unwrap();
    assert!(first.batch.consumer_scanned_at.is_some());
    assert_eq!(first.batch.consumer_scanned_at, second.batch.consumer_scanned_at);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn scanning_without_a_reader_fails() {
    let h = TestHarness::setup().await;
    let err = h.get::<Value>("/rfid/scan?timeout_ms=10").await.unwrap_err();
    assert_eq!(err.status, 500);
    assert_eq!(err.kind(), "ScannerFailed");
}
