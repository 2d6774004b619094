use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::batch::BatchId;
use crate::status::QualityState;

/// Every failure the tracker can report, from codec errors up to ledger and
/// scanner boundaries.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail")]
pub enum TrackerError {
    #[error("invalid state code {0}")]
    InvalidStateCode(i64),

    #[error("quality flags claim both approval and disapproval")]
    InconsistentQualityFlags,

    #[error("actor {actor} may not {action}")]
    UnauthorizedActor { actor: String, action: String },

    #[error("cannot {action} while {state}")]
    InvalidTransition { action: String, state: String },

    #[error("order not found: {0}")]
    OrderNotFound(String),

    #[error("batch not found: {0}")]
    BatchNotFound(String),

    #[error("actor not found: {0}")]
    ActorNotFound(String),

    #[error("rfid tag {0} is already bound to a live batch")]
    DuplicateRfidTag(String),

    #[error("batch {batch} was already judged {verdict}")]
    AlreadyJudged { batch: BatchId, verdict: QualityState },

    #[error("batch {0} is already assigned on this leg")]
    AlreadyAssigned(BatchId),

    #[error("batch holds {batch_quantity} units but the order needs {order_quantity}")]
    QuantityMismatch {
        batch_quantity: u32,
        order_quantity: u32,
    },

    #[error("assignment conflict: {0}")]
    AssignmentConflict(String),

    #[error("ledger submission failed: {0}")]
    LedgerSubmissionFailed(String),

    #[error("ledger did not confirm request {0} in time")]
    LedgerTimeout(String),

    #[error("request signature does not verify")]
    InvalidSignature,

    #[error("request id {0} was already used for a different request")]
    DuplicateRequest(String),

    #[error("requested at {at}, before the last recorded event at {last}")]
    OutOfOrder { at: String, last: String },

    #[error("synced state does not extend the local ledger: {0}")]
    DivergentState(String),

    #[error("invalid rfid tag: {0}")]
    InvalidRfidTag(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("document store failure: {0}")]
    StoreFailed(String),

    #[error("no tag read within {0} ms")]
    ScanTimeout(u64),

    #[error("rfid reader failure: {0}")]
    ScannerFailed(String),
}

impl TrackerError {
    /// Stable name of the error kind, shown to API clients.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidStateCode(_) => "InvalidStateCode",
            Self::InconsistentQualityFlags => "InconsistentQualityFlags",
            Self::UnauthorizedActor { .. } => "UnauthorizedActor",
            Self::InvalidTransition { .. } => "InvalidTransition",
            Self::OrderNotFound(_) => "OrderNotFound",
            Self::BatchNotFound(_) => "BatchNotFound",
            Self::ActorNotFound(_) => "ActorNotFound",
            Self::DuplicateRfidTag(_) => "DuplicateRfidTag",
            Self::AlreadyJudged { .. } => "AlreadyJudged",
            Self::AlreadyAssigned(_) => "AlreadyAssigned",
            Self::QuantityMismatch { .. } => "QuantityMismatch",
            Self::AssignmentConflict(_) => "AssignmentConflict",
            Self::LedgerSubmissionFailed(_) => "LedgerSubmissionFailed",
            Self::LedgerTimeout(_) => "LedgerTimeout",
            Self::InvalidSignature => "InvalidSignature",
            Self::DuplicateRequest(_) => "DuplicateRequest",
            Self::OutOfOrder { .. } => "OutOfOrder",
            Self::DivergentState(_) => "DivergentState",
            Self::InvalidRfidTag(_) => "InvalidRfidTag",
            Self::InvalidPayload(_) => "InvalidPayload",
            Self::StoreFailed(_) => "StoreFailed",
            Self::ScanTimeout(_) => "ScanTimeout",
            Self::ScannerFailed(_) => "ScannerFailed",
        }
    }

    /// Ledger transport failures that a caller may retry with the same request id.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::LedgerSubmissionFailed(_) | Self::LedgerTimeout(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::OrderNotFound(_) | Self::BatchNotFound(_) | Self::ActorNotFound(_)
        )
    }

    pub(crate) fn unauthorized(actor: impl ToString, action: &str) -> Self {
        Self::UnauthorizedActor {
            actor: actor.to_string(),
            action: action.to_string(),
        }
    }

    pub(crate) fn invalid_transition(action: &str, state: impl ToString) -> Self {
        Self::InvalidTransition {
            action: action.to_string(),
            state: state.to_string(),
        }
    }
}
