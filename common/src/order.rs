use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::batch::{kept, BatchId};
use crate::error::TrackerError;
use crate::identity::{ActorId, Role};
use crate::status::OrderStatus;
use crate::transition::Outcome;

/// Ledger-assigned order number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(pub u64);

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fulfilment leg an order covers. Both legs share one lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum OrderKind {
    /// Distributor orders from a manufacturer.
    Distributor,
    /// Provider orders from a distributor.
    Provider,
}

impl OrderKind {
    pub fn requester_role(self) -> Role {
        match self {
            OrderKind::Distributor => Role::Distributor,
            OrderKind::Provider => Role::Provider,
        }
    }

    pub fn fulfiller_role(self) -> Role {
        match self {
            OrderKind::Distributor => Role::Manufacturer,
            OrderKind::Provider => Role::Distributor,
        }
    }
}

/// Event that moves an order along its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderTrigger {
    /// Outgoing RFID scan at the fulfiller.
    OriginScan,
    FulfillerApproval,
    /// Incoming RFID scan at the requester.
    DestinationScan,
    Recall,
}

impl OrderTrigger {
    pub fn target(self) -> OrderStatus {
        match self {
            OrderTrigger::OriginScan => OrderStatus::InTransit,
            OrderTrigger::FulfillerApproval => OrderStatus::Approved,
            OrderTrigger::DestinationScan => OrderStatus::Reached,
            OrderTrigger::Recall => OrderStatus::Recalled,
        }
    }

    fn action(self) -> &'static str {
        match self {
            OrderTrigger::OriginScan => "dispatch",
            OrderTrigger::FulfillerApproval => "approve",
            OrderTrigger::DestinationScan => "receive",
            OrderTrigger::Recall => "recall",
        }
    }

    fn required_role(self, kind: OrderKind) -> Role {
        match self {
            OrderTrigger::OriginScan | OrderTrigger::FulfillerApproval => kind.fulfiller_role(),
            OrderTrigger::DestinationScan => kind.requester_role(),
            OrderTrigger::Recall => Role::Manufacturer,
        }
    }
}

/// What a requester supplies when placing an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrder {
    pub kind: OrderKind,
    pub fulfiller: ActorId,
    pub product_name: String,
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub kind: OrderKind,
    pub requester: ActorId,
    pub fulfiller: ActorId,
    pub product_name: String,
    pub quantity: u32,
    pub status: OrderStatus,
    pub linked_batch: Option<BatchId>,
    pub order_date: DateTime<Utc>,
    pub dispatched_at: Option<DateTime<Utc>>,
    pub approved_date: Option<DateTime<Utc>>,
    pub reached_at: Option<DateTime<Utc>>,
    pub recalled_at: Option<DateTime<Utc>>,
    pub version: u64,
}

impl Order {
    pub fn place(
        id: OrderId,
        requester: ActorId,
        new: NewOrder,
        now: DateTime<Utc>,
    ) -> Result<Self, TrackerError> {
        let product_name = new.product_name.trim().to_string();
        if product_name.is_empty() {
            return Err(TrackerError::InvalidPayload(
                "product name must not be empty".into(),
            ));
        }
        if new.quantity == 0 {
            return Err(TrackerError::InvalidPayload(
                "quantity must be positive".into(),
            ));
        }
        if new.fulfiller == requester {
            return Err(TrackerError::InvalidPayload(
                "an actor cannot order from itself".into(),
            ));
        }
        Ok(Self {
            id,
            kind: new.kind,
            requester,
            fulfiller: new.fulfiller,
            product_name,
            quantity: new.quantity,
            status: OrderStatus::Pending,
            linked_batch: None,
            order_date: now,
            dispatched_at: None,
            approved_date: None,
            reached_at: None,
            recalled_at: None,
            version: 0,
        })
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Latest timestamp recorded on the order.
    pub fn last_event(&self) -> DateTime<Utc> {
        [
            self.dispatched_at,
            self.approved_date,
            self.reached_at,
            self.recalled_at,
        ]
        .into_iter()
        .flatten()
        .fold(self.order_date, Ord::max)
    }

    /// Whether `next` is this order after zero or more ledger transitions.
    pub fn is_extended_by(&self, next: &Order) -> bool {
        if next.version <= self.version {
            return next == self;
        }
        let status_forward = next.status == self.status
            || (!self.is_terminal() && next.status.encode() > self.status.encode());
        status_forward
            && next.id == self.id
            && next.kind == self.kind
            && next.requester == self.requester
            && next.fulfiller == self.fulfiller
            && next.product_name == self.product_name
            && next.quantity == self.quantity
            && next.order_date == self.order_date
            && kept(&self.linked_batch, &next.linked_batch)
            && kept(&self.dispatched_at, &next.dispatched_at)
            && kept(&self.approved_date, &next.approved_date)
            && kept(&self.reached_at, &next.reached_at)
            && kept(&self.recalled_at, &next.recalled_at)
    }

    /// Returns true if the lifecycle allows moving from the current status to `next`.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        matches!(
            (self.status, next),
            (OrderStatus::Pending, OrderStatus::InTransit)
                | (OrderStatus::InTransit, OrderStatus::Approved)
                | (OrderStatus::Approved, OrderStatus::Reached)
        ) || (next == OrderStatus::Recalled && !self.is_terminal())
    }

    /// Fire `trigger` on behalf of an actor holding `role`. Firing a trigger
    /// whose target is the current status is a no-op.
    pub fn apply_trigger(
        &mut self,
        trigger: OrderTrigger,
        role: Role,
        now: DateTime<Utc>,
    ) -> Result<Outcome, TrackerError> {
        if role != trigger.required_role(self.kind) {
            return Err(TrackerError::unauthorized(
                role,
                &format!("{} a {:?} order", trigger.action(), self.kind),
            ));
        }
        let target = trigger.target();
        if self.status == target {
            return Ok(Outcome::Unchanged);
        }
        if !self.can_transition_to(target) {
            return Err(TrackerError::invalid_transition(trigger.action(), self.status));
        }
        if trigger == OrderTrigger::OriginScan && self.linked_batch.is_none() {
            return Err(TrackerError::invalid_transition(
                trigger.action(),
                "no batch is assigned",
            ));
        }

        self.status = target;
        match trigger {
            OrderTrigger::OriginScan => self.dispatched_at = Some(now),
            OrderTrigger::FulfillerApproval => self.approved_date = Some(now),
            OrderTrigger::DestinationScan => self.reached_at = Some(now),
            OrderTrigger::Recall => self.recalled_at = Some(now),
        }
        self.version += 1;
        Ok(Outcome::Applied)
    }
}
