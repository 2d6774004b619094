use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TrackerError;
use crate::identity::ActorId;
use crate::order::OrderKind;
use crate::rfid::RfidTag;
use crate::status::QualityState;
use crate::transition::Outcome;

/// Ledger-assigned batch number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(pub u64);

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a manufacturer supplies when creating a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBatch {
    pub product_name: String,
    pub rfid_tag: RfidTag,
    pub quantity: u32,
    pub expiry_date: DateTime<Utc>,
}

/// A manufactured lot of one product, tracked by its RFID tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub id: BatchId,
    pub rfid_tag: RfidTag,
    pub manufacturer: ActorId,
    pub product_name: String,
    pub quantity: u32,
    pub manufacture_date: DateTime<Utc>,
    pub expiry_date: DateTime<Utc>,
    pub quality: QualityState,
    pub quality_judged_at: Option<DateTime<Utc>>,
    pub recalled_at: Option<DateTime<Utc>>,
    pub assigned_distributor: Option<ActorId>,
    pub assigned_provider: Option<ActorId>,
    pub consumer_scanned_at: Option<DateTime<Utc>>,
    pub version: u64,
}

impl Batch {
    /// Validate the payload and build a fresh batch. Tag uniqueness is the
    /// ledger's concern.
    pub fn create(
        id: BatchId,
        manufacturer: ActorId,
        new: NewBatch,
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
        if new.expiry_date <= now {
            return Err(TrackerError::InvalidPayload(format!(
                "expiry {} is not after manufacture {}",
                new.expiry_date, now
            )));
        }
        Ok(Self {
            id,
            rfid_tag: new.rfid_tag,
            manufacturer,
            product_name,
            quantity: new.quantity,
            manufacture_date: now,
            expiry_date: new.expiry_date,
            quality: QualityState::Pending,
            quality_judged_at: None,
            recalled_at: None,
            assigned_distributor: None,
            assigned_provider: None,
            consumer_scanned_at: None,
            version: 0,
        })
    }

    pub fn is_recalled(&self) -> bool {
        self.recalled_at.is_some()
    }

    pub fn judge_quality(
        &mut self,
        verdict: QualityState,
        actor: &ActorId,
        now: DateTime<Utc>,
    ) -> Result<Outcome, TrackerError> {
        if *actor != self.manufacturer {
            return Err(TrackerError::unauthorized(actor, "judge quality of this batch"));
        }
        if !verdict.is_judged() {
            return Err(TrackerError::InvalidPayload(
                "verdict must be Approved or Disapproved".into(),
            ));
        }
        if self.quality == verdict {
            return Ok(Outcome::Unchanged);
        }
        if self.quality.is_judged() {
            return Err(TrackerError::AlreadyJudged {
                batch: self.id,
                verdict: self.quality,
            });
        }
        if self.is_recalled() {
            return Err(TrackerError::invalid_transition("judge quality", "recalled"));
        }
        self.quality = verdict;
        self.quality_judged_at = Some(now);
        self.version += 1;
        Ok(Outcome::Applied)
    }

    pub fn assignee(&self, kind: OrderKind) -> Option<&ActorId> {
        match kind {
            OrderKind::Distributor => self.assigned_distributor.as_ref(),
            OrderKind::Provider => self.assigned_provider.as_ref(),
        }
    }

    pub fn check_assignable(&self, kind: OrderKind) -> Result<(), TrackerError> {
        if self.is_recalled() {
            return Err(TrackerError::invalid_transition("assign", "recalled"));
        }
        if self.assignee(kind).is_some() {
            return Err(TrackerError::AlreadyAssigned(self.id));
        }
        Ok(())
    }

    /// Caller must have run [`Batch::check_assignable`] first.
    pub fn mark_assigned(&mut self, kind: OrderKind, assignee: ActorId) {
        match kind {
            OrderKind::Distributor => self.assigned_distributor = Some(assignee),
            OrderKind::Provider => self.assigned_provider = Some(assignee),
        }
        self.version += 1;
    }

    pub fn recall(&mut self, actor: &ActorId, now: DateTime<Utc>) -> Result<Outcome, TrackerError> {
        if *actor != self.manufacturer {
            return Err(TrackerError::unauthorized(actor, "recall this batch"));
        }
        if self.is_recalled() {
            return Ok(Outcome::Unchanged);
        }
        self.recalled_at = Some(now);
        self.version += 1;
        Ok(Outcome::Applied)
    }

    /// Latest timestamp recorded on the batch.
    pub fn last_event(&self) -> DateTime<Utc> {
        [self.quality_judged_at, self.recalled_at, self.consumer_scanned_at]
            .into_iter()
            .flatten()
            .fold(self.manufacture_date, Ord::max)
    }

    /// Whether `next` is this batch after zero or more ledger transitions.
    pub fn is_extended_by(&self, next: &Batch) -> bool {
        if next.version <= self.version {
            return next == self;
        }
        next.id == self.id
            && next.rfid_tag == self.rfid_tag
            && next.manufacturer == self.manufacturer
            && next.product_name == self.product_name
            && next.quantity == self.quantity
            && next.manufacture_date == self.manufacture_date
            && next.expiry_date == self.expiry_date
            && (!self.quality.is_judged() || next.quality == self.quality)
            && kept(&self.quality_judged_at, &next.quality_judged_at)
            && kept(&self.recalled_at, &next.recalled_at)
            && kept(&self.assigned_distributor, &next.assigned_distributor)
            && kept(&self.assigned_provider, &next.assigned_provider)
            && kept(&self.consumer_scanned_at, &next.consumer_scanned_at)
    }

    /// Only the first consumer lookup is recorded.
    pub fn record_consumer_scan(&mut self, now: DateTime<Utc>) -> Outcome {
        if self.consumer_scanned_at.is_some() {
            return Outcome::Unchanged;
        }
        self.consumer_scanned_at = Some(now);
        self.version += 1;
        Outcome::Applied
    }
}

/// A value, once set, is never cleared or replaced.
pub(crate) fn kept<T: PartialEq>(before: &Option<T>, after: &Option<T>) -> bool {
    before.is_none() || before == after
}
