use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pharmachain_common::ledger::{LedgerQuery, LedgerState, LedgerValue};
use pharmachain_common::transition::TransitionRequest;
use pharmachain_common::TrackerError;
use tokio::sync::Mutex;
use tracing::debug;

use super::{Ledger, PendingSubmission};

/// In-process ledger. Requests are applied one at a time after
/// `confirmation_delay`, standing in for block confirmation latency.
#[derive(Clone)]
pub struct MemoryLedger {
    state: Arc<Mutex<LedgerState>>,
    confirmation_delay: Duration,
    failures_to_inject: Arc<AtomicU32>,
}

impl MemoryLedger {
    pub fn new(confirmation_delay: Duration) -> Self {
        Self::with_state(LedgerState::new(), confirmation_delay)
    }

    pub fn with_state(state: LedgerState, confirmation_delay: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
            confirmation_delay,
            failures_to_inject: Arc::new(AtomicU32::new(0)),
        }
    }

    pub async fn snapshot(&self) -> LedgerState {
        self.state.lock().await.clone()
    }

    /// Make the next `count` submissions fail as if the transport dropped them.
    pub fn inject_failures(&self, count: u32) {
        self.failures_to_inject.store(count, Ordering::SeqCst);
    }

    fn take_injected_failure(&self) -> bool {
        self.failures_to_inject
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Ledger for MemoryLedger {
    async fn read(&self, query: LedgerQuery) -> Result<LedgerValue, TrackerError> {
        self.state.lock().await.query(&query)
    }

    async fn submit(&self, request: TransitionRequest) -> Result<PendingSubmission, TrackerError> {
        if self.take_injected_failure() {
            return Err(TrackerError::LedgerSubmissionFailed(format!(
                "injected failure for {}",
                request.id
            )));
        }
        let (pending, confirm) = PendingSubmission::new(request.id.clone());
        let state = self.state.clone();
        let delay = self.confirmation_delay;
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let outcome = state.lock().await.apply(&request);
            debug!(request = %request.id, ok = outcome.is_ok(), "memory ledger applied");
            // The submitter may have given up waiting.
            let _ = confirm.send(outcome);
        });
        Ok(pending)
    }
}
