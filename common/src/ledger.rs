//! Authoritative ledger state and the single entry point that mutates it.
//!
//! Every handler validates against copies of the touched records and only
//! writes them back once all checks passed, so a rejected request leaves the
//! state exactly as it was.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::assignment::AssignmentLedger;
use crate::batch::{Batch, BatchId, NewBatch};
use crate::error::TrackerError;
use crate::identity::{Actor, ActorId, Role};
use crate::order::{NewOrder, Order, OrderId, OrderKind, OrderTrigger};
use crate::rfid::RfidTag;
use crate::status::{OrderStatus, QualityState};
use crate::transition::{
    Checkpoint, ExpectedVersions, Outcome, Receipt, RequestId, Transition, TransitionRequest,
};

/// Receipts kept for replay detection. Older ones are dropped first.
pub const RECEIPT_RETENTION: usize = 10_000;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerState {
    /// Bumped once per applied request.
    pub sequence: u64,
    pub actors: BTreeMap<ActorId, Actor>,
    pub batches: BTreeMap<BatchId, Batch>,
    pub orders: BTreeMap<OrderId, Order>,
    pub assignments: AssignmentLedger,
    pub receipts: BTreeMap<RequestId, Receipt>,
    /// Request ids of `receipts`, oldest first.
    #[serde(default)]
    pub receipt_log: VecDeque<RequestId>,
    /// Latest `requested_at` among dropped receipts. Unknown requests at or
    /// before it are refused, since they may be replays.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replay_horizon: Option<DateTime<Utc>>,
}

/// What a handler touched.
struct Effect {
    outcome: Outcome,
    batch: Option<BatchId>,
    orders: Vec<OrderId>,
}

impl Effect {
    fn new(outcome: Outcome) -> Self {
        Self {
            outcome,
            batch: None,
            orders: Vec::new(),
        }
    }

    fn batch(mut self, id: BatchId) -> Self {
        self.batch = Some(id);
        self
    }

    fn order(mut self, id: OrderId) -> Self {
        self.orders.push(id);
        self
    }
}

impl LedgerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one request. Replaying a known request returns its receipt
    /// without touching state; reusing its id for anything else is refused.
    pub fn apply(&mut self, request: &TransitionRequest) -> Result<Receipt, TrackerError> {
        if request.id.as_str().trim().is_empty() {
            return Err(TrackerError::InvalidPayload("request id must not be empty".into()));
        }
        let signer = request.verify()?;
        let digest = request.digest()?;
        if let Some(receipt) = self.receipts.get(&request.id) {
            if receipt.digest != digest || receipt.actor != signer {
                return Err(TrackerError::DuplicateRequest(request.id.to_string()));
            }
            return Ok(receipt.clone());
        }
        let now = request.requested_at;
        if let Some(horizon) = self.replay_horizon.filter(|h| now <= *h) {
            return Err(out_of_order(now, horizon));
        }
        if let Some(last) = self.last_event(&request.transition).filter(|l| now < *l) {
            return Err(out_of_order(now, last));
        }

        let effect = match &request.transition {
            Transition::RegisterActor {
                role,
                company_name,
                contact_email,
            } => {
                let signer = Self::require_signer(signer, &request.transition)?;
                self.register_actor(signer, *role, company_name, contact_email, now)?
            }
            Transition::ConsumerScan { batch } => self.consumer_scan(*batch, now)?,
            Transition::CreateBatch(new) => {
                let actor = self.signing_actor(signer, &request.transition)?;
                self.create_batch(&actor, new.clone(), now)?
            }
            Transition::JudgeQuality { batch, verdict } => {
                let actor = self.signing_actor(signer, &request.transition)?;
                self.judge_quality(&actor, *batch, *verdict, now)?
            }
            Transition::PlaceOrder(new) => {
                let actor = self.signing_actor(signer, &request.transition)?;
                self.place_order(&actor, new.clone(), now)?
            }
            Transition::AssignBatch { batch, order } => {
                let actor = self.signing_actor(signer, &request.transition)?;
                self.assign_batch(&actor, *batch, *order, request.expected_versions)?
            }
            Transition::ApproveOrder { order } => {
                let actor = self.signing_actor(signer, &request.transition)?;
                self.approve_order(&actor, *order, now)?
            }
            Transition::CheckpointScan {
                rfid_tag,
                checkpoint,
            } => {
                let actor = self.signing_actor(signer, &request.transition)?;
                self.checkpoint_scan(&actor, rfid_tag, *checkpoint, now)?
            }
            Transition::RecallBatch { batch } => {
                let actor = self.signing_actor(signer, &request.transition)?;
                self.recall_batch(&actor, *batch, now)?
            }
        };

        if effect.outcome == Outcome::Applied {
            self.sequence += 1;
        }
        let receipt = Receipt {
            request_id: request.id.clone(),
            sequence: self.sequence,
            transition: request.transition.name().to_string(),
            outcome: effect.outcome,
            actor: signer,
            batch: effect.batch,
            orders: effect.orders,
            requested_at: now,
            digest,
        };
        self.remember(receipt.clone());
        Ok(receipt)
    }

    fn remember(&mut self, receipt: Receipt) {
        self.receipt_log.push_back(receipt.request_id.clone());
        self.receipts.insert(receipt.request_id.clone(), receipt);
        self.prune_receipts(RECEIPT_RETENTION);
    }

    /// Drop the oldest receipts beyond `retention`.
    fn prune_receipts(&mut self, retention: usize) {
        let excess = self.receipt_log.len().saturating_sub(retention);
        for id in self.receipt_log.drain(..excess) {
            if let Some(dropped) = self.receipts.remove(&id) {
                self.replay_horizon = self.replay_horizon.max(Some(dropped.requested_at));
            }
        }
    }

    /// Latest event already on the timeline that `transition` would stamp.
    fn last_event(&self, transition: &Transition) -> Option<DateTime<Utc>> {
        let batch = match transition {
            Transition::JudgeQuality { batch, .. }
            | Transition::RecallBatch { batch }
            | Transition::ConsumerScan { batch } => *batch,
            Transition::CheckpointScan { rfid_tag, .. } => self.batch_by_tag(rfid_tag)?.id,
            Transition::ApproveOrder { order } => {
                let order = self.orders.get(order)?;
                match order.linked_batch {
                    Some(batch) => batch,
                    None => return Some(order.last_event()),
                }
            }
            Transition::RegisterActor { .. }
            | Transition::CreateBatch(_)
            | Transition::PlaceOrder(_)
            | Transition::AssignBatch { .. } => return None,
        };
        let batch = self.batches.get(&batch)?;
        self.linked_orders(batch.id)
            .iter()
            .map(Order::last_event)
            .chain([batch.last_event()])
            .max()
    }

    fn require_signer(
        signer: Option<ActorId>,
        transition: &Transition,
    ) -> Result<ActorId, TrackerError> {
        signer.ok_or_else(|| TrackerError::unauthorized("anonymous", transition.name()))
    }

    /// The registered actor behind a signed request.
    fn signing_actor(
        &self,
        signer: Option<ActorId>,
        transition: &Transition,
    ) -> Result<Actor, TrackerError> {
        let id = Self::require_signer(signer, transition)?;
        self.actors
            .get(&id)
            .cloned()
            .ok_or_else(|| TrackerError::unauthorized(id, "act before registering"))
    }

    fn batch(&self, id: BatchId) -> Result<&Batch, TrackerError> {
        self.batches
            .get(&id)
            .ok_or_else(|| TrackerError::BatchNotFound(id.to_string()))
    }

    fn order(&self, id: OrderId) -> Result<&Order, TrackerError> {
        self.orders
            .get(&id)
            .ok_or_else(|| TrackerError::OrderNotFound(id.to_string()))
    }

    /// The live batch carrying `tag`, or the most recent recalled one.
    pub fn batch_by_tag(&self, tag: &RfidTag) -> Option<&Batch> {
        let mut latest_recalled = None;
        for batch in self.batches.values().filter(|b| b.rfid_tag == *tag) {
            if !batch.is_recalled() {
                return Some(batch);
            }
            latest_recalled = Some(batch);
        }
        latest_recalled
    }

    pub fn linked_orders(&self, batch: BatchId) -> Vec<Order> {
        self.assignments
            .orders_for_batch(batch)
            .into_iter()
            .filter_map(|id| self.orders.get(&id).cloned())
            .collect()
    }

    fn register_actor(
        &mut self,
        signer: ActorId,
        role: Role,
        company_name: &str,
        contact_email: &str,
        now: DateTime<Utc>,
    ) -> Result<Effect, TrackerError> {
        if let Some(existing) = self.actors.get(&signer) {
            if existing.role == role {
                return Ok(Effect::new(Outcome::Unchanged));
            }
            return Err(TrackerError::invalid_transition(
                &format!("register as {role}"),
                format!("registered as {}", existing.role),
            ));
        }
        let company_name = company_name.trim();
        if company_name.is_empty() {
            return Err(TrackerError::InvalidPayload(
                "company name must not be empty".into(),
            ));
        }
        let contact_email = contact_email.trim();
        if !contact_email.contains('@') {
            return Err(TrackerError::InvalidPayload(format!(
                "{contact_email:?} is not an email address"
            )));
        }
        self.actors.insert(
            signer,
            Actor {
                id: signer,
                role,
                company_name: company_name.to_string(),
                contact_email: contact_email.to_string(),
                registered_at: now,
            },
        );
        Ok(Effect::new(Outcome::Applied))
    }

    fn create_batch(
        &mut self,
        actor: &Actor,
        new: NewBatch,
        now: DateTime<Utc>,
    ) -> Result<Effect, TrackerError> {
        if actor.role != Role::Manufacturer {
            return Err(TrackerError::unauthorized(actor.id, "create batches"));
        }
        if self
            .batches
            .values()
            .any(|b| b.rfid_tag == new.rfid_tag && !b.is_recalled())
        {
            return Err(TrackerError::DuplicateRfidTag(new.rfid_tag.to_string()));
        }
        let id = BatchId(self.batches.keys().next_back().map_or(1, |last| last.0 + 1));
        let batch = Batch::create(id, actor.id, new, now)?;
        self.batches.insert(id, batch);
        Ok(Effect::new(Outcome::Applied).batch(id))
    }

    fn judge_quality(
        &mut self,
        actor: &Actor,
        id: BatchId,
        verdict: QualityState,
        now: DateTime<Utc>,
    ) -> Result<Effect, TrackerError> {
        let mut batch = self.batch(id)?.clone();
        let outcome = batch.judge_quality(verdict, &actor.id, now)?;
        if outcome == Outcome::Applied {
            self.batches.insert(id, batch);
        }
        Ok(Effect::new(outcome).batch(id))
    }

    fn place_order(
        &mut self,
        actor: &Actor,
        new: NewOrder,
        now: DateTime<Utc>,
    ) -> Result<Effect, TrackerError> {
        if actor.role != new.kind.requester_role() {
            return Err(TrackerError::unauthorized(
                actor.id,
                &format!("place {:?} orders", new.kind),
            ));
        }
        let fulfiller = self
            .actors
            .get(&new.fulfiller)
            .ok_or_else(|| TrackerError::ActorNotFound(new.fulfiller.address()))?;
        if fulfiller.role != new.kind.fulfiller_role() {
            return Err(TrackerError::InvalidPayload(format!(
                "{:?} orders are fulfilled by a {}, not a {}",
                new.kind,
                new.kind.fulfiller_role(),
                fulfiller.role
            )));
        }
        let id = OrderId(self.orders.keys().next_back().map_or(1, |last| last.0 + 1));
        let order = Order::place(id, actor.id, new, now)?;
        self.orders.insert(id, order);
        Ok(Effect::new(Outcome::Applied).order(id))
    }

    fn assign_batch(
        &mut self,
        actor: &Actor,
        batch_id: BatchId,
        order_id: OrderId,
        expected: Option<ExpectedVersions>,
    ) -> Result<Effect, TrackerError> {
        let mut batch = self.batch(batch_id)?.clone();
        let mut order = self.order(order_id)?.clone();
        let effect = |outcome| Effect::new(outcome).batch(batch_id).order(order_id);

        if let Some(expected) = expected {
            if expected.batch != batch.version || expected.order != order.version {
                return Err(TrackerError::AssignmentConflict(format!(
                    "batch {batch_id} or order {order_id} changed since it was read"
                )));
            }
        }
        if order.fulfiller != actor.id {
            return Err(TrackerError::unauthorized(
                actor.id,
                &format!("fulfil order {order_id}"),
            ));
        }
        let kind = order.kind;
        if self.assignments.lookup_batch_for_order(order_id) == Some(batch_id) {
            return Ok(effect(Outcome::Unchanged));
        }

        match kind {
            OrderKind::Distributor => {
                if batch.manufacturer != actor.id {
                    return Err(TrackerError::unauthorized(
                        actor.id,
                        &format!("assign batch {batch_id}"),
                    ));
                }
            }
            OrderKind::Provider => {
                if batch.assigned_distributor != Some(actor.id) {
                    return Err(TrackerError::unauthorized(
                        actor.id,
                        &format!("assign batch {batch_id}"),
                    ));
                }
                let upstream = self
                    .assignments
                    .lookup_order_for_batch(batch_id, OrderKind::Distributor)
                    .and_then(|id| self.orders.get(&id));
                if upstream.map(|o| o.status) != Some(OrderStatus::Reached) {
                    return Err(TrackerError::invalid_transition(
                        "assign to a provider",
                        "batch has not reached the distributor",
                    ));
                }
            }
        }

        batch.check_assignable(kind)?;
        self.assignments.check_link(batch_id, order_id, kind)?;
        if order.status != OrderStatus::Pending {
            return Err(TrackerError::invalid_transition("assign", order.status));
        }
        if batch.quantity < order.quantity {
            return Err(TrackerError::QuantityMismatch {
                batch_quantity: batch.quantity,
                order_quantity: order.quantity,
            });
        }

        self.assignments.link(batch_id, order_id, kind)?;
        batch.mark_assigned(kind, order.requester);
        order.linked_batch = Some(batch_id);
        order.version += 1;
        self.batches.insert(batch_id, batch);
        self.orders.insert(order_id, order);
        Ok(effect(Outcome::Applied))
    }

    fn approve_order(
        &mut self,
        actor: &Actor,
        id: OrderId,
        now: DateTime<Utc>,
    ) -> Result<Effect, TrackerError> {
        let mut order = self.order(id)?.clone();
        if order.fulfiller != actor.id {
            return Err(TrackerError::unauthorized(actor.id, &format!("approve order {id}")));
        }
        let outcome = order.apply_trigger(OrderTrigger::FulfillerApproval, actor.role, now)?;
        let batch = order.linked_batch;
        if outcome == Outcome::Applied {
            self.orders.insert(id, order);
        }
        let mut effect = Effect::new(outcome).order(id);
        effect.batch = batch;
        Ok(effect)
    }

    fn checkpoint_scan(
        &mut self,
        actor: &Actor,
        tag: &RfidTag,
        checkpoint: Checkpoint,
        now: DateTime<Utc>,
    ) -> Result<Effect, TrackerError> {
        let batch = self
            .batch_by_tag(tag)
            .ok_or_else(|| TrackerError::BatchNotFound(tag.to_string()))?;
        if batch.is_recalled() {
            return Err(TrackerError::invalid_transition(
                &format!("scan at {checkpoint:?}"),
                "recalled",
            ));
        }
        let batch_id = batch.id;
        let leg = checkpoint.leg();
        let order_id = self
            .assignments
            .lookup_order_for_batch(batch_id, leg)
            .ok_or_else(|| {
                TrackerError::OrderNotFound(format!("no {leg:?} order holds batch {batch_id}"))
            })?;
        let mut order = self.order(order_id)?.clone();

        let trigger = checkpoint.trigger();
        let expected = match trigger {
            OrderTrigger::DestinationScan => order.requester,
            _ => order.fulfiller,
        };
        if expected != actor.id {
            return Err(TrackerError::unauthorized(
                actor.id,
                &format!("scan order {order_id} at {checkpoint:?}"),
            ));
        }
        let outcome = order.apply_trigger(trigger, actor.role, now)?;
        if outcome == Outcome::Applied {
            self.orders.insert(order_id, order);
        }
        Ok(Effect::new(outcome).batch(batch_id).order(order_id))
    }

    fn recall_batch(
        &mut self,
        actor: &Actor,
        id: BatchId,
        now: DateTime<Utc>,
    ) -> Result<Effect, TrackerError> {
        let mut batch = self.batch(id)?.clone();
        let outcome = batch.recall(&actor.id, now)?;
        if outcome == Outcome::Unchanged {
            return Ok(Effect::new(outcome).batch(id));
        }

        let mut recalled = Vec::new();
        for mut order in self.linked_orders(id) {
            if order.is_terminal() {
                continue;
            }
            order.apply_trigger(OrderTrigger::Recall, actor.role, now)?;
            recalled.push(order);
        }

        self.batches.insert(id, batch);
        let mut effect = Effect::new(Outcome::Applied).batch(id);
        for order in recalled {
            effect = effect.order(order.id);
            self.orders.insert(order.id, order);
        }
        Ok(effect)
    }

    fn consumer_scan(&mut self, id: BatchId, now: DateTime<Utc>) -> Result<Effect, TrackerError> {
        let mut batch = self.batch(id)?.clone();
        let outcome = batch.record_consumer_scan(now);
        if outcome == Outcome::Applied {
            self.batches.insert(id, batch);
        }
        Ok(Effect::new(outcome).batch(id))
    }
}

/// Typed read against the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerQuery {
    Batch(BatchId),
    BatchByTag(RfidTag),
    Order(OrderId),
    OrdersForBatch(BatchId),
    Actor(ActorId),
    Sequence,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerValue {
    Batch(Batch),
    Order(Order),
    Orders(Vec<Order>),
    Actor(Actor),
    Sequence(u64),
}

impl LedgerValue {
    fn mismatch(&self, wanted: &str) -> TrackerError {
        TrackerError::InvalidPayload(format!("expected {wanted}, ledger returned {self:?}"))
    }

    pub fn into_batch(self) -> Result<Batch, TrackerError> {
        match self {
            LedgerValue::Batch(batch) => Ok(batch),
            other => Err(other.mismatch("a batch")),
        }
    }

    pub fn into_order(self) -> Result<Order, TrackerError> {
        match self {
            LedgerValue::Order(order) => Ok(order),
            other => Err(other.mismatch("an order")),
        }
    }

    pub fn into_orders(self) -> Result<Vec<Order>, TrackerError> {
        match self {
            LedgerValue::Orders(orders) => Ok(orders),
            other => Err(other.mismatch("orders")),
        }
    }

    pub fn into_actor(self) -> Result<Actor, TrackerError> {
        match self {
            LedgerValue::Actor(actor) => Ok(actor),
            other => Err(other.mismatch("an actor")),
        }
    }

    pub fn into_sequence(self) -> Result<u64, TrackerError> {
        match self {
            LedgerValue::Sequence(seq) => Ok(seq),
            other => Err(other.mismatch("a sequence number")),
        }
    }
}

impl LedgerState {
    pub fn query(&self, query: &LedgerQuery) -> Result<LedgerValue, TrackerError> {
        match query {
            LedgerQuery::Batch(id) => self.batch(*id).cloned().map(LedgerValue::Batch),
            LedgerQuery::BatchByTag(tag) => self
                .batch_by_tag(tag)
                .cloned()
                .map(LedgerValue::Batch)
                .ok_or_else(|| TrackerError::BatchNotFound(tag.to_string())),
            LedgerQuery::Order(id) => self.order(*id).cloned().map(LedgerValue::Order),
            LedgerQuery::OrdersForBatch(id) => {
                self.batch(*id)?;
                Ok(LedgerValue::Orders(self.linked_orders(*id)))
            }
            LedgerQuery::Actor(id) => self
                .actors
                .get(id)
                .cloned()
                .map(LedgerValue::Actor)
                .ok_or_else(|| TrackerError::ActorNotFound(id.address())),
            LedgerQuery::Sequence => Ok(LedgerValue::Sequence(self.sequence)),
        }
    }

    /// Structural invariants: keys match records, links agree in both
    /// directions, and no two live batches share a tag.
    pub fn validate(&self) -> bool {
        let keys_match = self.actors.iter().all(|(k, a)| *k == a.id)
            && self.batches.iter().all(|(k, b)| *k == b.id)
            && self.orders.iter().all(|(k, o)| *k == o.id);
        if !keys_match || !self.assignments.is_consistent() {
            return false;
        }

        let links_match = self.orders.values().all(|o| {
            o.linked_batch == self.assignments.lookup_batch_for_order(o.id)
                && o.linked_batch.is_none_or(|b| self.batches.contains_key(&b))
        });
        let statuses_ok = self
            .orders
            .values()
            .all(|o| o.linked_batch.is_some() || o.status == OrderStatus::Pending);

        let mut live_tags: Vec<&RfidTag> = self
            .batches
            .values()
            .filter(|b| !b.is_recalled())
            .map(|b| &b.rfid_tag)
            .collect();
        let live = live_tags.len();
        live_tags.sort();
        live_tags.dedup();

        let receipts_logged = self.receipt_log.len() == self.receipts.len()
            && self.receipt_log.iter().all(|id| self.receipts.contains_key(id));

        links_match && statuses_ok && receipts_logged && live_tags.len() == live
    }

    /// Adopt `other` if it has applied more requests and only extends this
    /// state.
    pub fn merge(&mut self, other: LedgerState) -> Result<(), TrackerError> {
        if other.sequence > self.sequence {
            self.check_extended_by(&other)?;
            *self = other;
        }
        Ok(())
    }

    /// Every record here must survive in `next` with its recorded history
    /// intact: actors unchanged, batches and orders only moved forward, and
    /// shared receipts identical.
    fn check_extended_by(&self, next: &LedgerState) -> Result<(), TrackerError> {
        let diverged = |what: String| Err(TrackerError::DivergentState(what));
        for (id, actor) in &self.actors {
            if next.actors.get(id) != Some(actor) {
                return diverged(format!("actor {} was altered", id.address()));
            }
        }
        for (id, batch) in &self.batches {
            if !next.batches.get(id).is_some_and(|b| batch.is_extended_by(b)) {
                return diverged(format!("batch {id} was rewritten"));
            }
        }
        for (id, order) in &self.orders {
            if !next.orders.get(id).is_some_and(|o| order.is_extended_by(o)) {
                return diverged(format!("order {id} was rewritten"));
            }
        }
        for (id, receipt) in &next.receipts {
            if self.receipts.get(id).is_some_and(|ours| ours != receipt) {
                return diverged(format!("receipt {id} differs"));
            }
        }
        if next.replay_horizon < self.replay_horizon {
            return diverged("replay horizon moved back".into());
        }
        Ok(())
    }

    pub fn summarize(&self) -> LedgerSummary {
        LedgerSummary {
            sequence: self.sequence,
        }
    }

    /// Full state if the peer is behind, nothing otherwise.
    pub fn delta(&self, summary: &LedgerSummary) -> Option<LedgerState> {
        (self.sequence > summary.sequence).then(|| self.clone())
    }

    /// Apply an update sent to the contract.
    pub fn apply_delta(&mut self, delta: LedgerDelta) -> Result<(), TrackerError> {
        match delta {
            LedgerDelta::Apply(request) => self.apply(&request).map(|_| ()),
            LedgerDelta::Sync(state) => {
                if !state.validate() {
                    return Err(TrackerError::InvalidPayload(
                        "synced ledger state is inconsistent".into(),
                    ));
                }
                self.merge(state)
            }
        }
    }
}

fn out_of_order(at: DateTime<Utc>, last: DateTime<Utc>) -> TrackerError {
    TrackerError::OutOfOrder {
        at: at.to_rfc3339(),
        last: last.to_rfc3339(),
    }
}

/// Parameters that make each ledger contract instance unique.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerParameters {
    pub network: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSummary {
    pub sequence: u64,
}

/// Update payload accepted by the ledger contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerDelta {
    Apply(TransitionRequest),
    Sync(LedgerState),
}
