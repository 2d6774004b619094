//! Read, submit, confirm, mirror.
//!
//! The tracker is the only writer of the document mirror. Every change goes
//! through the ledger first; documents are refreshed from ledger reads once
//! the ledger has confirmed.

use std::str::FromStr;
use std::time::Duration;

use chrono::Utc;
use futures::future::try_join_all;
use pharmachain_common::batch::{Batch, BatchId};
use pharmachain_common::identity::{Actor, ActorId};
use pharmachain_common::ledger::LedgerQuery;
use pharmachain_common::order::{Order, OrderId};
use pharmachain_common::projection::{project, ConsumerTimeline};
use pharmachain_common::rfid::RfidTag;
use pharmachain_common::transition::{
    ExpectedVersions, Receipt, RequestId, Transition, TransitionRequest,
};
use pharmachain_common::TrackerError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::ledger::Ledger;
use crate::store::DocumentStore;

pub const BATCHES: &str = "batches";
pub const ORDERS: &str = "orders";
pub const ACTORS: &str = "actors";

/// Result of a confirmed transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Execution {
    pub receipt: Receipt,
    /// False when the ledger confirmed but a mirror write failed.
    pub mirrored: bool,
}

/// How a consumer names a batch: by id, or by the tag on the package.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchKey {
    Id(BatchId),
    Tag(RfidTag),
}

impl FromStr for BatchKey {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        // A 24-digit tag overflows u64 and falls through to the tag parser.
        match s.parse::<u64>() {
            Ok(id) => Ok(BatchKey::Id(BatchId(id))),
            Err(_) => RfidTag::normalize(s).map(BatchKey::Tag),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchView {
    pub batch: Batch,
    pub orders: Vec<Order>,
    pub timeline: ConsumerTimeline,
}

#[derive(Clone)]
pub struct Tracker<L, S> {
    ledger: L,
    store: S,
    confirmation_timeout: Duration,
    max_submit_retries: u32,
}

impl<L: Ledger, S: DocumentStore> Tracker<L, S> {
    pub fn new(ledger: L, store: S, confirmation_timeout: Duration, max_submit_retries: u32) -> Self {
        Self {
            ledger,
            store,
            confirmation_timeout,
            max_submit_retries,
        }
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Submit `request`, wait for the ledger, then refresh the mirror.
    pub async fn execute(&self, mut request: TransitionRequest) -> Result<Execution, TrackerError> {
        if let Transition::AssignBatch { batch, order } = request.transition {
            if request.expected_versions.is_none() {
                request.expected_versions = Some(self.observed_versions(batch, order).await?);
            }
        }

        let receipt = self.submit_with_retry(&request).await?;
        info!(
            request = %receipt.request_id,
            transition = %receipt.transition,
            outcome = ?receipt.outcome,
            sequence = receipt.sequence,
            "transition confirmed"
        );

        let mirrored = match self.mirror(&request.transition, &receipt).await {
            Ok(()) => true,
            Err(e) => {
                warn!(request = %receipt.request_id, "mirror update failed: {e}");
                false
            }
        };
        Ok(Execution { receipt, mirrored })
    }

    async fn observed_versions(
        &self,
        batch: BatchId,
        order: OrderId,
    ) -> Result<ExpectedVersions, TrackerError> {
        let (batch, order) = futures::try_join!(
            self.ledger.read(LedgerQuery::Batch(batch)),
            self.ledger.read(LedgerQuery::Order(order)),
        )?;
        Ok(ExpectedVersions {
            batch: batch.into_batch()?.version,
            order: order.into_order()?.version,
        })
    }

    async fn submit_with_retry(&self, request: &TransitionRequest) -> Result<Receipt, TrackerError> {
        let mut attempt = 0;
        loop {
            let result = match self.ledger.submit(request.clone()).await {
                Ok(pending) => {
                    self.ledger
                        .await_confirmation(pending, self.confirmation_timeout)
                        .await
                }
                Err(e) => Err(e),
            };
            match result {
                Err(e) if e.is_transient() && attempt < self.max_submit_retries => {
                    attempt += 1;
                    warn!(request = %request.id, attempt, "retrying submission: {e}");
                }
                other => return other,
            }
        }
    }

    /// Batches and orders are written only over older versions, so a slow
    /// mirror write cannot undo a faster one.
    async fn mirror(&self, transition: &Transition, receipt: &Receipt) -> Result<(), TrackerError> {
        if let (Transition::RegisterActor { .. }, Some(actor)) = (transition, receipt.actor) {
            let actor = self.ledger.read(LedgerQuery::Actor(actor)).await?.into_actor()?;
            self.store
                .upsert(ACTORS, json!({ "id": actor.id }), to_document(&actor)?)
                .await?;
        }
        if let Some(id) = receipt.batch {
            let batch = self.ledger.read(LedgerQuery::Batch(id)).await?.into_batch()?;
            self.store
                .upsert_versioned(
                    BATCHES,
                    json!({ "id": id }),
                    to_document(&batch)?,
                    batch.version,
                )
                .await?;
        }
        try_join_all(receipt.orders.iter().map(|id| async move {
            let order = self.ledger.read(LedgerQuery::Order(*id)).await?.into_order()?;
            self.store
                .upsert_versioned(
                    ORDERS,
                    json!({ "id": id }),
                    to_document(&order)?,
                    order.version,
                )
                .await
        }))
        .await?;
        Ok(())
    }

    async fn mirrored<T: DeserializeOwned>(
        &self,
        collection: &str,
        filter: Value,
    ) -> Option<T> {
        match self.store.find_one(collection, filter).await {
            Ok(Some(doc)) => match serde_json::from_value(doc) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(collection, "unreadable mirror document: {e}");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(collection, "mirror read failed: {e}");
                None
            }
        }
    }

    pub async fn batch(&self, id: BatchId) -> Result<Batch, TrackerError> {
        if let Some(batch) = self.mirrored(BATCHES, json!({ "id": id })).await {
            return Ok(batch);
        }
        debug!(batch = %id, "batch not mirrored, reading ledger");
        self.ledger.read(LedgerQuery::Batch(id)).await?.into_batch()
    }

    pub async fn batch_by_tag(&self, tag: RfidTag) -> Result<Batch, TrackerError> {
        self.ledger.read(LedgerQuery::BatchByTag(tag)).await?.into_batch()
    }

    pub async fn order(&self, id: OrderId) -> Result<Order, TrackerError> {
        if let Some(order) = self.mirrored(ORDERS, json!({ "id": id })).await {
            return Ok(order);
        }
        debug!(order = %id, "order not mirrored, reading ledger");
        self.ledger.read(LedgerQuery::Order(id)).await?.into_order()
    }

    pub async fn actor(&self, id: ActorId) -> Result<Actor, TrackerError> {
        if let Some(actor) = self.mirrored(ACTORS, json!({ "id": id })).await {
            return Ok(actor);
        }
        self.ledger.read(LedgerQuery::Actor(id)).await?.into_actor()
    }

    pub async fn linked_orders(&self, batch: BatchId) -> Result<Vec<Order>, TrackerError> {
        self.ledger
            .read(LedgerQuery::OrdersForBatch(batch))
            .await?
            .into_orders()
    }

    /// Batch, its orders and the consumer timeline, read from the ledger.
    ///
    /// With `record_scan`, the first lookup of a batch is recorded as a
    /// consumer scan. Later lookups see the recorded scan and submit nothing;
    /// racing first lookups are settled by the ledger, first one wins.
    pub async fn batch_view(&self, key: BatchKey, record_scan: bool) -> Result<BatchView, TrackerError> {
        let mut batch = match key {
            BatchKey::Id(id) => self.ledger.read(LedgerQuery::Batch(id)).await?.into_batch()?,
            BatchKey::Tag(tag) => self.batch_by_tag(tag).await?,
        };

        if record_scan && batch.consumer_scanned_at.is_none() {
            let now = Utc::now();
            let id = format!("consumer-scan-{}-{}", batch.id, now.timestamp_micros());
            let request = TransitionRequest::unsigned(
                RequestId::new(id),
                Transition::ConsumerScan { batch: batch.id },
                now,
            );
            match self.execute(request).await {
                Ok(_) => {
                    batch = self
                        .ledger
                        .read(LedgerQuery::Batch(batch.id))
                        .await?
                        .into_batch()?;
                }
                Err(e) => warn!(batch = %batch.id, "consumer scan not recorded: {e}"),
            }
        }

        let orders = self.linked_orders(batch.id).await?;
        let timeline = project(&batch, &orders);
        Ok(BatchView {
            batch,
            orders,
            timeline,
        })
    }
}

fn to_document<T: Serialize>(record: &T) -> Result<Value, TrackerError> {
    serde_json::to_value(record).map_err(|e| TrackerError::StoreFailed(e.to_string()))
}
