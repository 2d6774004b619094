use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::batch::BatchId;
use crate::error::TrackerError;
use crate::order::{OrderId, OrderKind};
use crate::transition::Outcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub batch: BatchId,
    pub kind: OrderKind,
}

/// One-to-one batch/order links, kept per fulfilment leg. A batch can be
/// linked to one distributor order and one provider order; an order to
/// exactly one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentLedger {
    links: BTreeMap<OrderId, Link>,
    by_batch: BTreeMap<BatchId, BTreeMap<OrderKind, OrderId>>,
}

impl AssignmentLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check whether `batch` and `order` may be linked on leg `kind` without
    /// mutating anything.
    pub fn check_link(
        &self,
        batch: BatchId,
        order: OrderId,
        kind: OrderKind,
    ) -> Result<Outcome, TrackerError> {
        let existing_batch = self.links.get(&order).map(|l| l.batch);
        let existing_order = self.lookup_order_for_batch(batch, kind);
        match (existing_batch, existing_order) {
            (Some(b), Some(o)) if b == batch && o == order => Ok(Outcome::Unchanged),
            (Some(b), _) => Err(TrackerError::AssignmentConflict(format!(
                "order {order} is already linked to batch {b}"
            ))),
            (None, Some(o)) => Err(TrackerError::AssignmentConflict(format!(
                "batch {batch} is already linked to order {o} on the {kind:?} leg"
            ))),
            (None, None) => Ok(Outcome::Applied),
        }
    }

    pub fn link(
        &mut self,
        batch: BatchId,
        order: OrderId,
        kind: OrderKind,
    ) -> Result<Outcome, TrackerError> {
        let outcome = self.check_link(batch, order, kind)?;
        if outcome == Outcome::Applied {
            self.links.insert(order, Link { batch, kind });
            self.by_batch.entry(batch).or_default().insert(kind, order);
        }
        Ok(outcome)
    }

    pub fn lookup_batch_for_order(&self, order: OrderId) -> Option<BatchId> {
        self.links.get(&order).map(|l| l.batch)
    }

    pub fn lookup_order_for_batch(&self, batch: BatchId, kind: OrderKind) -> Option<OrderId> {
        self.by_batch
            .get(&batch)
            .and_then(|legs| legs.get(&kind))
            .copied()
    }

    /// Orders linked to `batch`, distributor leg first.
    pub fn orders_for_batch(&self, batch: BatchId) -> Vec<OrderId> {
        self.by_batch
            .get(&batch)
            .map(|legs| legs.values().copied().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Both indexes describe the same set of links.
    pub fn is_consistent(&self) -> bool {
        let forward_ok = self.links.iter().all(|(order, link)| {
            self.lookup_order_for_batch(link.batch, link.kind) == Some(*order)
        });
        let reverse_count: usize = self.by_batch.values().map(|legs| legs.len()).sum();
        forward_ok && reverse_count == self.links.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_is_symmetric() {
        let mut ledger = AssignmentLedger::new();
        assert_eq!(
            ledger.link(BatchId(1), OrderId(10), OrderKind::Distributor),
            Ok(Outcome::Applied)
        );
        assert_eq!(ledger.lookup_batch_for_order(OrderId(10)), Some(BatchId(1)));
        assert_eq!(
            ledger.lookup_order_for_batch(BatchId(1), OrderKind::Distributor),
            Some(OrderId(10))
        );
        assert!(ledger.is_consistent());
    }

    #[test]
    fn relinking_the_same_pair_is_unchanged() {
        let mut ledger = AssignmentLedger::new();
        ledger
            .link(BatchId(1), OrderId(10), OrderKind::Distributor)
            .unwrap();
        assert_eq!(
            ledger.link(BatchId(1), OrderId(10), OrderKind::Distributor),
            Ok(Outcome::Unchanged)
        );
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn either_side_already_linked_conflicts() {
        let mut ledger = AssignmentLedger::new();
        ledger
            .link(BatchId(1), OrderId(10), OrderKind::Distributor)
            .unwrap();
        assert!(matches!(
            ledger.link(BatchId(1), OrderId(11), OrderKind::Distributor),
            Err(TrackerError::AssignmentConflict(_))
        ));
        assert!(matches!(
            ledger.link(BatchId(2), OrderId(10), OrderKind::Distributor),
            Err(TrackerError::AssignmentConflict(_))
        ));
        assert_eq!(ledger.len(), 1);
        assert!(ledger.is_consistent());
    }

    #[test]
    fn legs_are_independent() {
        let mut ledger = AssignmentLedger::new();
        ledger
            .link(BatchId(1), OrderId(10), OrderKind::Distributor)
            .unwrap();
        ledger
            .link(BatchId(1), OrderId(20), OrderKind::Provider)
            .unwrap();
        assert_eq!(
            ledger.orders_for_batch(BatchId(1)),
            vec![OrderId(10), OrderId(20)]
        );
        assert!(ledger.orders_for_batch(BatchId(2)).is_empty());
        assert!(ledger.is_consistent());
    }
}
