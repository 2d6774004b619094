use std::sync::Arc;
use std::time::Duration;

use ed25519_dalek::SigningKey;
use pharmachain_common::batch::BatchId;
use pharmachain_common::identity::{ActorId, Role};
use pharmachain_common::order::{NewOrder, OrderId, OrderKind};
use pharmachain_common::status::QualityState;
use pharmachain_common::transition::{Checkpoint, RequestId, Transition, TransitionRequest};
use pharmachain_node::http::{router, AppState, ErrorResponse};
use pharmachain_node::ledger::{LedgerBackend, MemoryLedger};
use pharmachain_node::store::{MemoryStore, StoreBackend};
use pharmachain_node::tracker::{Execution, Tracker};
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use tokio::net::TcpListener;
use tracing::info;

use crate::{new_batch, TIMEOUT};

/// A company acting on the supply chain, holding its own signing key.
pub struct Participant {
    pub name: String,
    pub role: Role,
    key: SigningKey,
}

impl Participant {
    pub fn new(name: &str, role: Role, seed: u8) -> Self {
        Self {
            name: name.to_string(),
            role,
            key: SigningKey::from_bytes(&[seed; 32]),
        }
    }

    pub fn id(&self) -> ActorId {
        ActorId(self.key.verifying_key())
    }

    /// Sign `transition` under a fresh request id.
    pub fn sign(&self, transition: Transition) -> TransitionRequest {
        let id = format!("{}-{}-{:016x}", self.name, transition.name(), rand::random::<u64>());
        self.sign_with_id(&id, transition)
    }

    pub fn sign_with_id(&self, id: &str, transition: Transition) -> TransitionRequest {
        TransitionRequest::signed(RequestId::new(id), transition, chrono::Utc::now(), &self.key)
            .expect("request serializes")
    }
}

/// A non-2xx response.
#[derive(Debug)]
pub struct ApiFailure {
    pub status: u16,
    pub body: ErrorResponse,
}

impl ApiFailure {
    pub fn kind(&self) -> &str {
        &self.body.error
    }
}

/// One node on an ephemeral port with in-memory backends, plus four
/// participants: a manufacturer, two distributors and a provider.
pub struct TestHarness {
    pub base_url: String,
    pub client: reqwest::Client,
    pub ledger: MemoryLedger,
    pub acme: Participant,
    pub northwind: Participant,
    pub southgate: Participant,
    pub carepoint: Participant,
}

impl TestHarness {
    pub async fn setup() -> Self {
        Self::with_confirmation_delay(Duration::ZERO).await
    }

    pub async fn with_confirmation_delay(delay: Duration) -> Self {
        tracing_subscriber::fmt::try_init().ok();

        let ledger = MemoryLedger::new(delay);
        let state = Arc::new(AppState {
            tracker: Tracker::new(
                LedgerBackend::Memory(ledger.clone()),
                StoreBackend::Memory(MemoryStore::new()),
                TIMEOUT,
                2,
            ),
            scanner: None,
            scan_timeout: Duration::from_secs(1),
        });
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(state)).await.unwrap();
        });
        info!(%addr, "test node started");

        Self {
            base_url: format!("http://{addr}"),
            client: reqwest::Client::new(),
            ledger,
            acme: Participant::new("acme", Role::Manufacturer, 1),
            northwind: Participant::new("northwind", Role::Distributor, 2),
            carepoint: Participant::new("carepoint", Role::Provider, 3),
            southgate: Participant::new("southgate", Role::Distributor, 4),
        }
    }

    /// Harness with every participant registered.
    pub async fn registered() -> Self {
        let h = Self::setup().await;
        h.register_all().await;
        h
    }

    pub async fn register_all(&self) {
        for p in [&self.acme, &self.northwind, &self.southgate, &self.carepoint] {
            self.register(p).await.expect("registration succeeds");
        }
    }

    // ─── Raw HTTP ───────────────────────────────────────────────────────────

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{path}", self.base_url))
            .timeout(TIMEOUT)
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, ApiFailure> {
        let response = builder.send().await.expect("node is reachable");
        let status = response.status();
        if status.is_success() {
            Ok(response.json().await.expect("success body parses"))
        } else {
            Err(ApiFailure {
                status: status.as_u16(),
                body: response.json().await.expect("error body parses"),
            })
        }
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiFailure> {
        self.send(self.request(Method::GET, path)).await
    }

    pub async fn post(&self, path: &str, request: &TransitionRequest) -> Result<Execution, ApiFailure> {
        self.send(self.request(Method::POST, path).json(request)).await
    }

    pub async fn patch(&self, path: &str, request: &TransitionRequest) -> Result<Execution, ApiFailure> {
        self.send(self.request(Method::PATCH, path).json(request)).await
    }

    // ─── Domain helpers ─────────────────────────────────────────────────────

    pub async fn register(&self, p: &Participant) -> Result<Execution, ApiFailure> {
        let request = p.sign(Transition::RegisterActor {
            role: p.role,
            company_name: p.name.clone(),
            contact_email: format!("ops@{}.example", p.name),
        });
        self.post("/actors", &request).await
    }

    pub async fn create_batch(&self, maker: &Participant, quantity: u32) -> BatchId {
        let request = maker.sign(Transition::CreateBatch(new_batch(quantity)));
        let execution = self.post("/batches", &request).await.expect("batch created");
        execution.receipt.batch.expect("receipt names the batch")
    }

    pub async fn judge(
        &self,
        maker: &Participant,
        batch: BatchId,
        verdict: QualityState,
    ) -> Result<Execution, ApiFailure> {
        let request = maker.sign(Transition::JudgeQuality { batch, verdict });
        self.patch(&format!("/batches/{batch}"), &request).await
    }

    pub async fn place_order(
        &self,
        buyer: &Participant,
        seller: &Participant,
        kind: OrderKind,
        quantity: u32,
    ) -> OrderId {
        let request = buyer.sign(Transition::PlaceOrder(NewOrder {
            kind,
            fulfiller: seller.id(),
            product_name: "Amoxicillin 500mg".into(),
            quantity,
        }));
        let execution = self.post("/orders", &request).await.expect("order placed");
        execution.receipt.orders[0]
    }

    pub async fn assign(
        &self,
        fulfiller: &Participant,
        batch: BatchId,
        order: OrderId,
    ) -> Result<Execution, ApiFailure> {
        let request = fulfiller.sign(Transition::AssignBatch { batch, order });
        self.patch(&format!("/orders/{order}"), &request).await
    }

    pub async fn approve(&self, fulfiller: &Participant, order: OrderId) -> Result<Execution, ApiFailure> {
        let request = fulfiller.sign(Transition::ApproveOrder { order });
        self.patch(&format!("/orders/{order}"), &request).await
    }

    pub async fn scan(&self, p: &Participant, checkpoint: Checkpoint) -> Result<Execution, ApiFailure> {
        let request = p.sign(Transition::CheckpointScan {
            rfid_tag: crate::tag(),
            checkpoint,
        });
        self.post("/checkpoints", &request).await
    }

    pub async fn recall(&self, maker: &Participant, batch: BatchId) -> Result<Execution, ApiFailure> {
        let request = maker.sign(Transition::RecallBatch { batch });
        self.patch(&format!("/batches/{batch}"), &request).await
    }

    /// Walk a batch through the distributor leg until it has reached
    /// northwind.
    pub async fn deliver_to_distributor(&self, batch: BatchId) -> OrderId {
        let order = self
            .place_order(&self.northwind, &self.acme, OrderKind::Distributor, 40)
            .await;
        self.assign(&self.acme, batch, order).await.expect("assigned");
        self.scan(&self.acme, Checkpoint::ManufacturerOutgoing)
            .await
            .expect("dispatched");
        self.approve(&self.acme, order).await.expect("approved");
        self.scan(&self.northwind, Checkpoint::DistributorIncoming)
            .await
            .expect("received");
        order
    }

    /// Continue from the distributor to carepoint.
    pub async fn deliver_to_provider(&self, batch: BatchId) -> OrderId {
        let order = self
            .place_order(&self.carepoint, &self.northwind, OrderKind::Provider, 10)
            .await;
        self.assign(&self.northwind, batch, order).await.expect("assigned");
        self.scan(&self.northwind, Checkpoint::DistributorOutgoing)
            .await
            .expect("dispatched");
        self.approve(&self.northwind, order).await.expect("approved");
        self.scan(&self.carepoint, Checkpoint::ProviderIncoming)
            .await
            .expect("received");
        order
    }
}
