//! HTTP surface of the tracker.
//!
//! Write routes take a complete [`TransitionRequest`] as the body. The route
//! only decides which transitions it accepts; authorization is checked by the
//! ledger from the request's signature.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::{Method, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use pharmachain_common::batch::BatchId;
use pharmachain_common::identity::{Actor, ActorId};
use pharmachain_common::ledger::LedgerQuery;
use pharmachain_common::order::{Order, OrderId};
use pharmachain_common::rfid::RfidTag;
use pharmachain_common::transition::{Transition, TransitionRequest};
use pharmachain_common::TrackerError;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, error};

use crate::ledger::{Ledger, LedgerBackend};
use crate::scanner::DeviceScanner;
use crate::store::StoreBackend;
use crate::tracker::{BatchKey, BatchView, Execution, Tracker};

pub struct AppState {
    pub tracker: Tracker<LedgerBackend, StoreBackend>,
    pub scanner: Option<DeviceScanner>,
    pub scan_timeout: Duration,
}

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PATCH])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/actors", post(register_actor_handler))
        .route("/actors/{address}", get(actor_handler))
        .route("/batches", post(create_batch_handler))
        .route(
            "/batches/{key}",
            get(batch_view_handler).patch(update_batch_handler),
        )
        .route("/orders", post(place_order_handler))
        .route("/orders/{id}", get(order_handler).patch(update_order_handler))
        .route("/checkpoints", post(checkpoint_handler))
        .route("/rfid/scan", get(rfid_scan_handler))
        .layer(cors)
        .with_state(state)
}

// ─── Errors ─────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Stable error kind, e.g. `"BatchNotFound"`.
    pub error: String,
    pub message: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);
type ApiResult<T> = Result<Json<T>, ApiError>;

fn status_for(err: &TrackerError) -> StatusCode {
    match err {
        e if e.is_not_found() => StatusCode::NOT_FOUND,
        TrackerError::ScanTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        TrackerError::DuplicateRequest(_) => StatusCode::CONFLICT,
        TrackerError::LedgerSubmissionFailed(_)
        | TrackerError::LedgerTimeout(_)
        | TrackerError::StoreFailed(_)
        | TrackerError::ScannerFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::BAD_REQUEST,
    }
}

fn api_error(err: TrackerError) -> ApiError {
    let status = status_for(&err);
    if status.is_server_error() {
        error!(kind = err.kind(), "request failed: {err}");
    } else {
        debug!(kind = err.kind(), "request rejected: {err}");
    }
    (
        status,
        Json(ErrorResponse {
            error: err.kind().to_string(),
            message: err.to_string(),
        }),
    )
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| api_error(TrackerError::InvalidPayload(rejection.body_text())))
}

fn wrong_route(transition: &Transition, route: &str) -> ApiError {
    api_error(TrackerError::InvalidPayload(format!(
        "{} is not accepted on {route}",
        transition.name()
    )))
}

// ─── Handlers ───────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    sequence: u64,
    scanner: bool,
}

async fn health_handler(State(state): State<Arc<AppState>>) -> ApiResult<HealthResponse> {
    let sequence = state
        .tracker
        .ledger()
        .read(LedgerQuery::Sequence)
        .await
        .and_then(|v| v.into_sequence())
        .map_err(api_error)?;
    Ok(Json(HealthResponse {
        status: "ok",
        sequence,
        scanner: state.scanner.is_some(),
    }))
}

async fn execute(state: &AppState, request: TransitionRequest) -> ApiResult<Execution> {
    state
        .tracker
        .execute(request)
        .await
        .map(Json)
        .map_err(api_error)
}

async fn register_actor_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<TransitionRequest>, JsonRejection>,
) -> ApiResult<Execution> {
    let request = body(payload)?;
    if !matches!(request.transition, Transition::RegisterActor { .. }) {
        return Err(wrong_route(&request.transition, "/actors"));
    }
    execute(&state, request).await
}

async fn actor_handler(
    State(state): State<Arc<AppState>>,
    Path(address): Path<String>,
) -> ApiResult<Actor> {
    let id = ActorId::from_address(&address).map_err(api_error)?;
    state.tracker.actor(id).await.map(Json).map_err(api_error)
}

async fn create_batch_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<TransitionRequest>, JsonRejection>,
) -> ApiResult<Execution> {
    let request = body(payload)?;
    if !matches!(request.transition, Transition::CreateBatch(_)) {
        return Err(wrong_route(&request.transition, "/batches"));
    }
    execute(&state, request).await
}

#[derive(Deserialize)]
struct ViewParams {
    #[serde(default = "record_by_default")]
    record_scan: bool,
}

fn record_by_default() -> bool {
    true
}

async fn batch_view_handler(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    Query(params): Query<ViewParams>,
) -> ApiResult<BatchView> {
    let key: BatchKey = key.parse().map_err(api_error)?;
    state
        .tracker
        .batch_view(key, params.record_scan)
        .await
        .map(Json)
        .map_err(api_error)
}

async fn resolve_batch(state: &AppState, key: &str) -> Result<BatchId, ApiError> {
    match key.parse::<BatchKey>().map_err(api_error)? {
        BatchKey::Id(id) => Ok(id),
        BatchKey::Tag(tag) => state
            .tracker
            .batch_by_tag(tag)
            .await
            .map(|batch| batch.id)
            .map_err(api_error),
    }
}

async fn update_batch_handler(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    payload: Result<Json<TransitionRequest>, JsonRejection>,
) -> ApiResult<Execution> {
    let request = body(payload)?;
    let id = resolve_batch(&state, &key).await?;
    let target = match &request.transition {
        Transition::JudgeQuality { batch, .. }
        | Transition::AssignBatch { batch, .. }
        | Transition::RecallBatch { batch }
        | Transition::ConsumerScan { batch } => *batch,
        other => return Err(wrong_route(other, "/batches/{key}")),
    };
    if target != id {
        return Err(api_error(TrackerError::InvalidPayload(format!(
            "request targets batch {target}, path names batch {id}"
        ))));
    }
    execute(&state, request).await
}

async fn place_order_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<TransitionRequest>, JsonRejection>,
) -> ApiResult<Execution> {
    let request = body(payload)?;
    if !matches!(request.transition, Transition::PlaceOrder(_)) {
        return Err(wrong_route(&request.transition, "/orders"));
    }
    execute(&state, request).await
}

fn parse_order_id(raw: &str) -> Result<OrderId, ApiError> {
    raw.trim()
        .parse()
        .map(OrderId)
        .map_err(|e| api_error(TrackerError::InvalidPayload(format!("order id {raw:?}: {e}"))))
}

async fn order_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Order> {
    let id = parse_order_id(&id)?;
    state.tracker.order(id).await.map(Json).map_err(api_error)
}

async fn update_order_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    payload: Result<Json<TransitionRequest>, JsonRejection>,
) -> ApiResult<Execution> {
    let id = parse_order_id(&id)?;
    let request = body(payload)?;
    let target = match &request.transition {
        Transition::ApproveOrder { order } | Transition::AssignBatch { order, .. } => *order,
        other => return Err(wrong_route(other, "/orders/{id}")),
    };
    if target != id {
        return Err(api_error(TrackerError::InvalidPayload(format!(
            "request targets order {target}, path names order {id}"
        ))));
    }
    execute(&state, request).await
}

async fn checkpoint_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<TransitionRequest>, JsonRejection>,
) -> ApiResult<Execution> {
    let request = body(payload)?;
    if !matches!(request.transition, Transition::CheckpointScan { .. }) {
        return Err(wrong_route(&request.transition, "/checkpoints"));
    }
    execute(&state, request).await
}

/// Longest scan a client may ask for. The reader is held for the whole wait.
pub const MAX_SCAN_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Deserialize)]
struct ScanParams {
    timeout_ms: Option<u64>,
}

impl ScanParams {
    fn timeout(&self, default: Duration) -> Duration {
        self.timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(default)
            .min(MAX_SCAN_TIMEOUT)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ScanResponse {
    pub rfid_tag: RfidTag,
}

async fn rfid_scan_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ScanParams>,
) -> ApiResult<ScanResponse> {
    let scanner = state.scanner.as_ref().ok_or_else(|| {
        api_error(TrackerError::ScannerFailed("no rfid reader attached".into()))
    })?;
    let rfid_tag = scanner
        .scan(params.timeout(state.scan_timeout))
        .await
        .map_err(api_error)?;
    Ok(Json(ScanResponse { rfid_tag }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_error_kind() {
        assert_eq!(
            status_for(&TrackerError::BatchNotFound("7".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(&TrackerError::InvalidTransition {
                action: "approve".into(),
                state: "Reached".into(),
            }),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(status_for(&TrackerError::ScanTimeout(500)), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(
            status_for(&TrackerError::LedgerTimeout("r-1".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_for(&TrackerError::AssignmentConflict("batch 1".into())),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn reused_request_ids_conflict() {
        assert_eq!(
            status_for(&TrackerError::DuplicateRequest("r-1".into())),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn scan_timeouts_are_capped() {
        let default = Duration::from_secs(30);
        let params = |timeout_ms| ScanParams { timeout_ms };
        assert_eq!(params(None).timeout(default), default);
        assert_eq!(params(Some(250)).timeout(default), Duration::from_millis(250));
        assert_eq!(params(Some(u64::MAX)).timeout(default), MAX_SCAN_TIMEOUT);
        assert_eq!(
            params(None).timeout(Duration::from_secs(600)),
            MAX_SCAN_TIMEOUT
        );
    }

    #[test]
    fn error_body_carries_kind_and_message() {
        let (status, Json(body)) = api_error(TrackerError::OrderNotFound("3".into()));
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body.error, "OrderNotFound");
        assert!(body.message.contains('3'));
    }
}
