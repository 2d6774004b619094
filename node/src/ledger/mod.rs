//! Boundary to the authoritative ledger.
//!
//! Submitting and confirming are separate steps: `submit` hands the request to
//! the ledger and returns immediately, `await_confirmation` waits for the
//! outcome with a bound.

mod freenet;
mod memory;

use std::future::Future;
use std::time::Duration;

use pharmachain_common::ledger::{LedgerQuery, LedgerValue};
use pharmachain_common::transition::{Receipt, RequestId, TransitionRequest};
use pharmachain_common::TrackerError;
use tokio::sync::oneshot;

pub use freenet::FreenetLedger;
pub use memory::MemoryLedger;

pub trait Ledger: Send + Sync + 'static {
    /// Read as of the last confirmed submission.
    fn read(
        &self,
        query: LedgerQuery,
    ) -> impl Future<Output = Result<LedgerValue, TrackerError>> + Send;

    fn submit(
        &self,
        request: TransitionRequest,
    ) -> impl Future<Output = Result<PendingSubmission, TrackerError>> + Send;

    fn await_confirmation(
        &self,
        pending: PendingSubmission,
        timeout: Duration,
    ) -> impl Future<Output = Result<Receipt, TrackerError>> + Send {
        pending.wait(timeout)
    }
}

/// A request handed to the ledger whose outcome is not known yet.
#[derive(Debug)]
pub struct PendingSubmission {
    pub request_id: RequestId,
    outcome: oneshot::Receiver<Result<Receipt, TrackerError>>,
}

impl PendingSubmission {
    pub fn new(
        request_id: RequestId,
    ) -> (Self, oneshot::Sender<Result<Receipt, TrackerError>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                request_id,
                outcome: rx,
            },
            tx,
        )
    }

    pub async fn wait(self, timeout: Duration) -> Result<Receipt, TrackerError> {
        match tokio::time::timeout(timeout, self.outcome).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(TrackerError::LedgerSubmissionFailed(format!(
                "ledger dropped request {}",
                self.request_id
            ))),
            Err(_) => Err(TrackerError::LedgerTimeout(self.request_id.to_string())),
        }
    }
}

/// Ledger selected at start-up.
#[derive(Clone)]
pub enum LedgerBackend {
    Memory(MemoryLedger),
    Freenet(FreenetLedger),
}

impl Ledger for LedgerBackend {
    async fn read(&self, query: LedgerQuery) -> Result<LedgerValue, TrackerError> {
        match self {
            LedgerBackend::Memory(ledger) => ledger.read(query).await,
            LedgerBackend::Freenet(ledger) => ledger.read(query).await,
        }
    }

    async fn submit(&self, request: TransitionRequest) -> Result<PendingSubmission, TrackerError> {
        match self {
            LedgerBackend::Memory(ledger) => ledger.submit(request).await,
            LedgerBackend::Freenet(ledger) => ledger.submit(request).await,
        }
    }
}
