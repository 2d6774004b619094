//! Consumer-facing timeline of a batch, derived from ledger records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::batch::{Batch, BatchId};
use crate::order::{Order, OrderKind};
use crate::status::QualityState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimelineEventKind {
    BatchCreated,
    QualityApproved,
    QualityDisapproved,
    BatchRecalled,
    DispatchedToDistributor,
    ArrivedAtDistributor,
    DispatchedToProvider,
    ArrivedAtProvider,
    ConsumerScan,
}

impl TimelineEventKind {
    pub fn label(self) -> &'static str {
        match self {
            TimelineEventKind::BatchCreated => "Batch Created",
            TimelineEventKind::QualityApproved => "Batch Approved",
            TimelineEventKind::QualityDisapproved => "Batch Disapproved",
            TimelineEventKind::BatchRecalled => "Batch Recalled",
            TimelineEventKind::DispatchedToDistributor => "Dispatched to Distributor",
            TimelineEventKind::ArrivedAtDistributor => "Arrived at Distributor",
            TimelineEventKind::DispatchedToProvider => "Dispatched to Provider",
            TimelineEventKind::ArrivedAtProvider => "Arrived at Provider",
            TimelineEventKind::ConsumerScan => "QR Scanned",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub kind: TimelineEventKind,
    pub label: String,
    pub timestamp: DateTime<Utc>,
    pub completed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerTimeline {
    pub batch: BatchId,
    pub events: Vec<TimelineEvent>,
    pub is_authentic: bool,
}

impl ConsumerTimeline {
    pub fn kinds(&self) -> Vec<TimelineEventKind> {
        self.events.iter().map(|e| e.kind).collect()
    }
}

/// Build the timeline for `batch` from the orders linked to it. Orders for
/// other batches are ignored. Events without a timestamp are omitted.
pub fn project(batch: &Batch, linked_orders: &[Order]) -> ConsumerTimeline {
    let leg = |kind: OrderKind| {
        linked_orders
            .iter()
            .find(|o| o.kind == kind && o.linked_batch == Some(batch.id))
    };
    let distributor = leg(OrderKind::Distributor);
    let provider = leg(OrderKind::Provider);

    let quality = match batch.quality {
        QualityState::Approved => Some(TimelineEventKind::QualityApproved),
        QualityState::Disapproved => Some(TimelineEventKind::QualityDisapproved),
        QualityState::Pending => None,
    };

    let candidates = [
        (TimelineEventKind::BatchCreated, Some(batch.manufacture_date)),
        (
            quality.unwrap_or(TimelineEventKind::QualityApproved),
            quality.and(batch.quality_judged_at),
        ),
        (TimelineEventKind::BatchRecalled, batch.recalled_at),
        (
            TimelineEventKind::DispatchedToDistributor,
            distributor.and_then(|o| o.dispatched_at),
        ),
        (
            TimelineEventKind::ArrivedAtDistributor,
            distributor.and_then(|o| o.reached_at),
        ),
        (
            TimelineEventKind::DispatchedToProvider,
            provider.and_then(|o| o.dispatched_at),
        ),
        (
            TimelineEventKind::ArrivedAtProvider,
            provider.and_then(|o| o.reached_at),
        ),
        (TimelineEventKind::ConsumerScan, batch.consumer_scanned_at),
    ];

    let events: Vec<TimelineEvent> = candidates
        .into_iter()
        .filter_map(|(kind, ts)| {
            ts.map(|timestamp| TimelineEvent {
                kind,
                label: kind.label().to_string(),
                timestamp,
                completed: true,
            })
        })
        .collect();

    let arrived_at_provider = events
        .iter()
        .any(|e| e.kind == TimelineEventKind::ArrivedAtProvider);
    let is_authentic = !batch.is_recalled()
        && batch.quality != QualityState::Disapproved
        && arrived_at_provider;

    ConsumerTimeline {
        batch: batch.id,
        events,
        is_authentic,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::tests::{actor, new_batch, t0};
    use crate::order::{NewOrder, OrderId};
    use crate::status::OrderStatus;
    use chrono::Duration;

    fn batch() -> Batch {
        Batch::create(BatchId(1), actor(1), new_batch(100), t0()).unwrap()
    }

    fn order(id: u64, kind: OrderKind, hours: i64, reached: bool) -> Order {
        let mut o = Order::place(
            OrderId(id),
            actor(2),
            NewOrder {
                kind,
                fulfiller: actor(1),
                product_name: "Amoxicillin".into(),
                quantity: 10,
            },
            t0(),
        )
        .unwrap();
        o.linked_batch = Some(BatchId(1));
        o.status = OrderStatus::InTransit;
        o.dispatched_at = Some(t0() + Duration::hours(hours));
        if reached {
            o.status = OrderStatus::Reached;
            o.reached_at = Some(t0() + Duration::hours(hours + 1));
        }
        o
    }

    #[test]
    fn fresh_batch_only_shows_creation() {
        let timeline = project(&batch(), &[]);
        assert_eq!(timeline.kinds(), vec![TimelineEventKind::BatchCreated]);
        assert!(!timeline.is_authentic);
    }

    #[test]
    fn distributor_leg_in_canonical_order() {
        let mut b = batch();
        b.quality = QualityState::Approved;
        b.quality_judged_at = Some(t0() + Duration::minutes(30));
        let timeline = project(&b, &[order(1, OrderKind::Distributor, 1, true)]);
        assert_eq!(
            timeline.kinds(),
            vec![
                TimelineEventKind::BatchCreated,
                TimelineEventKind::QualityApproved,
                TimelineEventKind::DispatchedToDistributor,
                TimelineEventKind::ArrivedAtDistributor,
            ]
        );
        assert_eq!(timeline.events[1].label, "Batch Approved");
        assert!(timeline.events.iter().all(|e| e.completed));
        assert!(!timeline.is_authentic);
    }

    #[test]
    fn authentic_once_at_provider() {
        let mut b = batch();
        b.quality = QualityState::Approved;
        b.quality_judged_at = Some(t0());
        let orders = [
            order(1, OrderKind::Distributor, 1, true),
            order(2, OrderKind::Provider, 5, true),
        ];
        let timeline = project(&b, &orders);
        assert_eq!(timeline.events.len(), 6);
        assert!(timeline.is_authentic);
    }

    #[test]
    fn recall_and_disapproval_are_never_authentic() {
        let orders = [
            order(1, OrderKind::Distributor, 1, true),
            order(2, OrderKind::Provider, 5, true),
        ];

        let mut recalled = batch();
        recalled.quality = QualityState::Approved;
        recalled.quality_judged_at = Some(t0());
        recalled.recalled_at = Some(t0() + Duration::days(1));
        let timeline = project(&recalled, &orders);
        assert!(timeline.kinds().contains(&TimelineEventKind::BatchRecalled));
        assert!(!timeline.is_authentic);

        let mut rejected = batch();
        rejected.quality = QualityState::Disapproved;
        rejected.quality_judged_at = Some(t0());
        let timeline = project(&rejected, &orders);
        assert_eq!(timeline.events[1].label, "Batch Disapproved");
        assert!(!timeline.is_authentic);
    }

    #[test]
    fn is_deterministic_and_ignores_foreign_orders() {
        let b = batch();
        let mut foreign = order(9, OrderKind::Distributor, 1, true);
        foreign.linked_batch = Some(BatchId(2));
        assert_eq!(project(&b, &[foreign.clone()]), project(&b, &[foreign]));
        assert_eq!(project(&b, &[]).events.len(), 1);
    }

    #[test]
    fn consumer_scan_comes_last() {
        let mut b = batch();
        b.consumer_scanned_at = Some(t0() + Duration::days(10));
        let timeline = project(&b, &[order(1, OrderKind::Distributor, 1, false)]);
        assert_eq!(
            timeline.kinds(),
            vec![
                TimelineEventKind::BatchCreated,
                TimelineEventKind::DispatchedToDistributor,
                TimelineEventKind::ConsumerScan,
            ]
        );
        assert_eq!(timeline.events[2].label, "QR Scanned");
    }
}
