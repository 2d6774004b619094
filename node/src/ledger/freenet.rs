//! Ledger hosted as a Freenet contract.
//!
//! One worker task owns the WebSocket connection and handles commands in
//! order, so this node never races itself. Each submission is dry-run against
//! freshly fetched state first; the contract re-validates when the delta
//! lands.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use freenet_stdlib::client_api::{
    ClientRequest, ContractRequest, ContractResponse, HostResponse, WebApi,
};
use freenet_stdlib::prelude::*;
use pharmachain_common::ledger::{
    LedgerDelta, LedgerParameters, LedgerQuery, LedgerState, LedgerValue,
};
use pharmachain_common::transition::{Receipt, TransitionRequest};
use pharmachain_common::TrackerError;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{Ledger, PendingSubmission};

const RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);
const COMMAND_QUEUE: usize = 64;

#[derive(Debug, Error)]
enum LinkError {
    #[error("websocket: {0}")]
    Connect(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("node: {0}")]
    Node(String),
    #[error("no {0} from node in time")]
    NoResponse(&'static str),
    #[error("ledger state: {0}")]
    State(#[from] serde_json::Error),
}

impl From<LinkError> for TrackerError {
    fn from(err: LinkError) -> Self {
        TrackerError::LedgerSubmissionFailed(err.to_string())
    }
}

enum Command {
    Read {
        query: LedgerQuery,
        reply: oneshot::Sender<Result<LedgerValue, TrackerError>>,
    },
    Submit {
        request: TransitionRequest,
        reply: oneshot::Sender<Result<Receipt, TrackerError>>,
    },
}

#[derive(Clone)]
pub struct FreenetLedger {
    commands: mpsc::Sender<Command>,
    key: ContractKey,
}

fn make_contract(wasm_bytes: &[u8], params: Parameters<'static>) -> ContractContainer {
    let code = ContractCode::from(wasm_bytes.to_vec());
    let wrapped = WrappedContract::new(Arc::new(code), params);
    ContractContainer::Wasm(ContractWasmAPIVersion::V1(wrapped))
}

impl FreenetLedger {
    /// Connect to the node, make sure the ledger contract exists, and start
    /// the worker.
    pub async fn connect(
        node_url: &str,
        contract_wasm: &Path,
        network: &str,
    ) -> Result<Self, TrackerError> {
        let wasm = tokio::fs::read(contract_wasm).await.map_err(|e| {
            TrackerError::LedgerSubmissionFailed(format!(
                "reading {}: {e}",
                contract_wasm.display()
            ))
        })?;
        let params = LedgerParameters {
            network: network.to_string(),
        };
        let params_bytes = serde_json::to_vec(&params).map_err(LinkError::from)?;
        let contract = make_contract(&wasm, Parameters::from(params_bytes));
        let key = contract.key();

        let (ws_conn, _) = tokio_tungstenite::connect_async(node_url)
            .await
            .map_err(LinkError::from)?;
        let mut api = WebApi::start(ws_conn);

        let genesis = serde_json::to_vec(&LedgerState::new()).map_err(LinkError::from)?;
        api.send(ClientRequest::ContractOp(ContractRequest::Put {
            contract,
            state: WrappedState::new(genesis),
            related_contracts: RelatedContracts::default(),
            subscribe: false,
            blocking_subscribe: false,
        }))
        .await
        .map_err(|e| LinkError::Node(e.to_string()))?;
        match recv_matching(&mut api, is_put_response, RESPONSE_TIMEOUT).await {
            Ok(_) => info!(contract = %key, "ledger contract ready"),
            Err(e) => info!(contract = %key, "no put confirmation ({e}), assuming ledger exists"),
        }

        let (tx, rx) = mpsc::channel(COMMAND_QUEUE);
        tokio::spawn(run_worker(api, key, rx));
        Ok(Self { commands: tx, key })
    }

    pub fn key(&self) -> ContractKey {
        self.key
    }

    async fn send(&self, command: Command) -> Result<(), TrackerError> {
        self.commands.send(command).await.map_err(|_| {
            TrackerError::LedgerSubmissionFailed("ledger worker has stopped".into())
        })
    }
}

impl Ledger for FreenetLedger {
    async fn read(&self, query: LedgerQuery) -> Result<LedgerValue, TrackerError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Read { query, reply }).await?;
        rx.await.map_err(|_| {
            TrackerError::LedgerSubmissionFailed("ledger worker dropped a read".into())
        })?
    }

    async fn submit(&self, request: TransitionRequest) -> Result<PendingSubmission, TrackerError> {
        let (pending, reply) = PendingSubmission::new(request.id.clone());
        self.send(Command::Submit { request, reply }).await?;
        Ok(pending)
    }
}

async fn run_worker(mut api: WebApi, key: ContractKey, mut commands: mpsc::Receiver<Command>) {
    while let Some(command) = commands.recv().await {
        match command {
            Command::Read { query, reply } => {
                let result = match fetch_state(&mut api, &key).await {
                    Ok(state) => state.query(&query),
                    Err(e) => Err(e.into()),
                };
                let _ = reply.send(result);
            }
            Command::Submit { request, reply } => {
                let result = submit(&mut api, &key, request).await;
                if let Err(e) = &result {
                    debug!(kind = e.kind(), "ledger submission rejected: {e}");
                }
                let _ = reply.send(result);
            }
        }
    }
    info!(contract = %key, "ledger worker stopped");
}

async fn submit(
    api: &mut WebApi,
    key: &ContractKey,
    request: TransitionRequest,
) -> Result<Receipt, TrackerError> {
    let mut state = fetch_state(api, key).await?;
    let replayed = state.receipts.contains_key(&request.id);
    let receipt = state.apply(&request)?;
    if replayed {
        return Ok(receipt);
    }

    let delta = serde_json::to_vec(&LedgerDelta::Apply(request))
        .map_err(|e| TrackerError::InvalidPayload(e.to_string()))?;
    api.send(ClientRequest::ContractOp(ContractRequest::Update {
        key: *key,
        data: UpdateData::Delta(StateDelta::from(delta)),
    }))
    .await
    .map_err(|e| LinkError::Node(e.to_string()))?;
    recv_matching(api, is_update_response, RESPONSE_TIMEOUT)
        .await
        .map_err(|e| match e {
            LinkError::NoResponse(_) => TrackerError::LedgerTimeout(receipt.request_id.to_string()),
            other => other.into(),
        })?;
    Ok(receipt)
}

async fn fetch_state(api: &mut WebApi, key: &ContractKey) -> Result<LedgerState, LinkError> {
    api.send(ClientRequest::ContractOp(ContractRequest::Get {
        key: *key.id(),
        return_contract_code: false,
        subscribe: false,
        blocking_subscribe: false,
    }))
    .await
    .map_err(|e| LinkError::Node(e.to_string()))?;
    let response = recv_matching(api, is_get_response, RESPONSE_TIMEOUT).await?;
    match response {
        HostResponse::ContractResponse(ContractResponse::GetResponse { state, .. }) => {
            if state.as_ref().is_empty() {
                return Ok(LedgerState::new());
            }
            Ok(serde_json::from_slice(state.as_ref())?)
        }
        _ => Err(LinkError::NoResponse("get response")),
    }
}

/// Receive until `predicate` matches, discarding notifications and other
/// traffic.
async fn recv_matching<F>(
    api: &mut WebApi,
    predicate: F,
    timeout: Duration,
) -> Result<HostResponse, LinkError>
where
    F: Fn(&HostResponse) -> bool,
{
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(LinkError::NoResponse("matching response"));
        }
        match tokio::time::timeout(remaining, api.recv()).await {
            Ok(Ok(resp)) if predicate(&resp) => return Ok(resp),
            Ok(Ok(other)) => {
                debug!("discarding non-matching response: {:?}", other);
            }
            Ok(Err(e)) => {
                warn!("node error while waiting: {e}");
                return Err(LinkError::Node(e.to_string()));
            }
            Err(_) => return Err(LinkError::NoResponse("matching response")),
        }
    }
}

fn is_put_response(resp: &HostResponse) -> bool {
    matches!(
        resp,
        HostResponse::ContractResponse(ContractResponse::PutResponse { .. })
    )
}

fn is_update_response(resp: &HostResponse) -> bool {
    matches!(
        resp,
        HostResponse::ContractResponse(ContractResponse::UpdateResponse { .. })
    )
}

fn is_get_response(resp: &HostResponse) -> bool {
    matches!(
        resp,
        HostResponse::ContractResponse(ContractResponse::GetResponse { .. })
    )
}
