use std::fmt;

use chrono::{DateTime, Utc};
use ed25519_dalek::{Signer, SigningKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::batch::{BatchId, NewBatch};
use crate::error::TrackerError;
use crate::identity::{ActorId, Authorization, Role};
use crate::order::{NewOrder, OrderId, OrderKind, OrderTrigger};
use crate::rfid::RfidTag;
use crate::status::QualityState;

/// Idempotency key chosen by the submitter. Replaying the same request under
/// its id returns the original receipt.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Whether a transition changed ledger state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Applied,
    /// The target state was already reached; nothing was written.
    Unchanged,
}

/// Physical RFID reader positions along the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Checkpoint {
    ManufacturerOutgoing,
    DistributorIncoming,
    DistributorOutgoing,
    ProviderIncoming,
}

impl Checkpoint {
    pub fn leg(self) -> OrderKind {
        match self {
            Checkpoint::ManufacturerOutgoing | Checkpoint::DistributorIncoming => {
                OrderKind::Distributor
            }
            Checkpoint::DistributorOutgoing | Checkpoint::ProviderIncoming => OrderKind::Provider,
        }
    }

    pub fn trigger(self) -> OrderTrigger {
        match self {
            Checkpoint::ManufacturerOutgoing | Checkpoint::DistributorOutgoing => {
                OrderTrigger::OriginScan
            }
            Checkpoint::DistributorIncoming | Checkpoint::ProviderIncoming => {
                OrderTrigger::DestinationScan
            }
        }
    }
}

/// Every state change the ledger accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Transition {
    RegisterActor {
        role: Role,
        company_name: String,
        contact_email: String,
    },
    CreateBatch(NewBatch),
    JudgeQuality {
        batch: BatchId,
        verdict: QualityState,
    },
    PlaceOrder(NewOrder),
    AssignBatch {
        batch: BatchId,
        order: OrderId,
    },
    ApproveOrder {
        order: OrderId,
    },
    CheckpointScan {
        rfid_tag: RfidTag,
        checkpoint: Checkpoint,
    },
    RecallBatch {
        batch: BatchId,
    },
    /// Anonymous: recorded on the first consumer lookup.
    ConsumerScan {
        batch: BatchId,
    },
}

impl Transition {
    pub fn name(&self) -> &'static str {
        match self {
            Transition::RegisterActor { .. } => "register_actor",
            Transition::CreateBatch(_) => "create_batch",
            Transition::JudgeQuality { .. } => "judge_quality",
            Transition::PlaceOrder(_) => "place_order",
            Transition::AssignBatch { .. } => "assign_batch",
            Transition::ApproveOrder { .. } => "approve_order",
            Transition::CheckpointScan { .. } => "checkpoint_scan",
            Transition::RecallBatch { .. } => "recall_batch",
            Transition::ConsumerScan { .. } => "consumer_scan",
        }
    }

    pub fn requires_authorization(&self) -> bool {
        !matches!(self, Transition::ConsumerScan { .. })
    }
}

/// Record versions the submitter observed before an assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectedVersions {
    pub batch: u64,
    pub order: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRequest {
    pub id: RequestId,
    pub transition: Transition,
    pub requested_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization: Option<Authorization>,
    /// Filled in by the tracker; not covered by the signature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_versions: Option<ExpectedVersions>,
}

#[derive(Serialize)]
struct SignableRequest<'a> {
    id: &'a RequestId,
    transition: &'a Transition,
    requested_at: &'a DateTime<Utc>,
}

impl TransitionRequest {
    pub fn unsigned(id: RequestId, transition: Transition, requested_at: DateTime<Utc>) -> Self {
        Self {
            id,
            transition,
            requested_at,
            authorization: None,
            expected_versions: None,
        }
    }

    pub fn signed(
        id: RequestId,
        transition: Transition,
        requested_at: DateTime<Utc>,
        key: &SigningKey,
    ) -> Result<Self, TrackerError> {
        let mut request = Self::unsigned(id, transition, requested_at);
        let signature = key.sign(&request.signable_bytes()?);
        request.authorization = Some(Authorization {
            signer: ActorId(key.verifying_key()),
            signature,
        });
        Ok(request)
    }

    /// Canonical bytes covered by the signature.
    pub fn signable_bytes(&self) -> Result<Vec<u8>, TrackerError> {
        let signable = SignableRequest {
            id: &self.id,
            transition: &self.transition,
            requested_at: &self.requested_at,
        };
        serde_json::to_vec(&signable).map_err(|e| TrackerError::InvalidPayload(e.to_string()))
    }

    /// Hex SHA-256 of the signable bytes. Two requests under one id are the
    /// same request only if their digests agree.
    pub fn digest(&self) -> Result<String, TrackerError> {
        Ok(hex::encode(Sha256::digest(self.signable_bytes()?)))
    }

    pub fn signer(&self) -> Option<ActorId> {
        self.authorization.as_ref().map(|auth| auth.signer)
    }

    /// Returns the verified signer, or `None` for anonymous transitions.
    pub fn verify(&self) -> Result<Option<ActorId>, TrackerError> {
        match &self.authorization {
            Some(auth) => {
                if auth.verify(&self.signable_bytes()?) {
                    Ok(Some(auth.signer))
                } else {
                    Err(TrackerError::InvalidSignature)
                }
            }
            None if self.transition.requires_authorization() => {
                Err(TrackerError::unauthorized("anonymous", self.transition.name()))
            }
            None => Ok(None),
        }
    }
}

/// Confirmation of an applied (or already-applied) request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub request_id: RequestId,
    /// Ledger sequence after this request.
    pub sequence: u64,
    pub transition: String,
    pub outcome: Outcome,
    pub actor: Option<ActorId>,
    pub requested_at: DateTime<Utc>,
    /// [`TransitionRequest::digest`] of the request that produced this receipt.
    pub digest: String,
    pub batch: Option<BatchId>,
    pub orders: Vec<OrderId>,
}
