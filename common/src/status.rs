use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TrackerError;

/// Order status as stored on the ledger. The numeric codes are part of the
/// persisted format and must not be reordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    InTransit,
    Approved,
    Reached,
    Recalled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 5] = [
        OrderStatus::Pending,
        OrderStatus::InTransit,
        OrderStatus::Approved,
        OrderStatus::Reached,
        OrderStatus::Recalled,
    ];

    pub fn encode(self) -> u8 {
        match self {
            OrderStatus::Pending => 0,
            OrderStatus::InTransit => 1,
            OrderStatus::Approved => 2,
            OrderStatus::Reached => 3,
            OrderStatus::Recalled => 4,
        }
    }

    pub fn decode(code: i64) -> Result<Self, TrackerError> {
        match code {
            0 => Ok(OrderStatus::Pending),
            1 => Ok(OrderStatus::InTransit),
            2 => Ok(OrderStatus::Approved),
            3 => Ok(OrderStatus::Reached),
            4 => Ok(OrderStatus::Recalled),
            other => Err(TrackerError::InvalidStateCode(other)),
        }
    }

    /// Display string shown to every client.
    pub fn label(self) -> &'static str {
        match self {
            OrderStatus::Pending => "Pending",
            OrderStatus::InTransit => "In Transit",
            OrderStatus::Approved => "Approved",
            OrderStatus::Reached => "Reached",
            OrderStatus::Recalled => "Recalled",
        }
    }

    /// Reached and Recalled accept no further triggers.
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Reached | OrderStatus::Recalled)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for OrderStatus {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(code) = s.trim().parse::<i64>() {
            return Self::decode(code);
        }
        let wanted: String = s.chars().filter(|c| !c.is_whitespace()).collect();
        Self::ALL
            .into_iter()
            .find(|status| format!("{status:?}").eq_ignore_ascii_case(&wanted))
            .ok_or_else(|| TrackerError::InvalidPayload(format!("unknown order status {s:?}")))
    }
}

/// Quality verdict on a batch. Stored on the ledger as two boolean flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum QualityState {
    #[default]
    Pending,
    Approved,
    Disapproved,
}

impl QualityState {
    pub fn from_flags(approved: bool, disapproved: bool) -> Result<Self, TrackerError> {
        match (approved, disapproved) {
            (false, false) => Ok(QualityState::Pending),
            (true, false) => Ok(QualityState::Approved),
            (false, true) => Ok(QualityState::Disapproved),
            (true, true) => Err(TrackerError::InconsistentQualityFlags),
        }
    }

    /// `(is_quality_approved, is_quality_disapproved)`
    pub fn to_flags(self) -> (bool, bool) {
        match self {
            QualityState::Pending => (false, false),
            QualityState::Approved => (true, false),
            QualityState::Disapproved => (false, true),
        }
    }

    pub fn is_judged(self) -> bool {
        self != QualityState::Pending
    }

    pub fn label(self) -> &'static str {
        match self {
            QualityState::Pending => "Pending",
            QualityState::Approved => "Approved",
            QualityState::Disapproved => "Disapproved",
        }
    }
}

impl fmt::Display for QualityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
