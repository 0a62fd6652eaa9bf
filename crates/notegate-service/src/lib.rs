#![deny(unsafe_code)]

pub mod sweeper;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use notegate_adapters::{HttpLedgerClient, ProcessWalletTool};
use notegate_core::{
    ChainTip, CommandRequest, CommandResult, GateConfig, GateError, LedgerBlock,
    LedgerTransaction, SignatureCheck, SwapInitiation, SwapRequest, SwapStore, SwapTransaction,
    WalletGateway,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::info;

const DEFAULT_TX_LIMIT: usize = 10;
const MAX_TX_LIMIT: usize = 100;

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub gate: GateConfig,
    pub wallet_bin: PathBuf,
    pub ledger_url: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            gate: GateConfig::default(),
            wallet_bin: PathBuf::from("nockchain-wallet"),
            ledger_url: "http://127.0.0.1:3000/api".to_string(),
        }
    }
}

#[derive(Clone)]
pub struct ServiceState {
    pub gateway: Arc<WalletGateway>,
}

impl ServiceState {
    /// Wire the process wallet and HTTP ledger into a gateway.
    pub async fn bootstrap(config: ServiceConfig) -> Result<Self, ServiceError> {
        let ServiceConfig {
            gate,
            wallet_bin,
            ledger_url,
        } = config;

        tokio::fs::create_dir_all(&gate.drafts_dir)
            .await
            .map_err(|source| ServiceError::DraftsDir {
                path: gate.drafts_dir.clone(),
                source,
            })?;

        let tool = ProcessWalletTool::new(wallet_bin)
            .with_socket(gate.wallet_socket.clone())
            .with_max_output_bytes(gate.max_output_bytes);
        let ledger = HttpLedgerClient::new(ledger_url, gate.command_timeout)?;
        let gateway = WalletGateway::new(
            &gate,
            Arc::new(tool),
            Arc::new(ledger),
            Arc::new(SwapStore::new()),
        )?;

        info!(
            open_mode = gateway.authority().open_mode(),
            local_signing = gateway.local_signing_enabled(),
            "gateway ready"
        );
        Ok(Self::new(gateway))
    }

    pub fn new(gateway: WalletGateway) -> Self {
        Self {
            gateway: Arc::new(gateway),
        }
    }
}

pub fn build_router(state: ServiceState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/commands", post(submit_command))
        .route("/v1/commands/sign", post(create_signed_command))
        .route("/v1/commands/verify", post(verify_signature))
        .route("/v1/swaps", post(initiate_swap))
        .route("/v1/swaps/:swap_id", get(swap_status))
        .route("/v1/ledger/tip", get(ledger_tip))
        .route("/v1/ledger/height", get(ledger_height))
        .route("/v1/ledger/blocks/:height", get(block_by_height))
        .route("/v1/ledger/blocks/hash/:hash", get(block_by_hash))
        .route("/v1/ledger/transactions", get(latest_transactions))
        .route("/v1/ledger/transactions/:tx_id", get(transaction))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("gateway error: {0}")]
    Gate(#[from] GateError),
    #[error("cannot create drafts directory {path}: {source}")]
    DraftsDir {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{message}")]
    Http { status: StatusCode, message: String },
    #[error(transparent)]
    Gate(#[from] GateError),
}

impl ApiError {
    fn not_found(message: impl Into<String>) -> Self {
        Self::Http {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::Http {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

pub fn status_for(err: &GateError) -> StatusCode {
    match err {
        GateError::MissingFields(_)
        | GateError::Envelope(_)
        | GateError::EnvelopeFields(_)
        | GateError::Validation(_) => StatusCode::BAD_REQUEST,
        GateError::Signature | GateError::Timestamp(_) | GateError::Replay => {
            StatusCode::UNAUTHORIZED
        }
        GateError::Authorization => StatusCode::FORBIDDEN,
        GateError::Conflict(_) => StatusCode::CONFLICT,
        GateError::NotFound(_) => StatusCode::NOT_FOUND,
        GateError::InsufficientBalance { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        GateError::Execution { .. } | GateError::Ledger(_) => StatusCode::BAD_GATEWAY,
        GateError::KeyLoad(_) | GateError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_body(message: String, code: &str) -> Json<Value> {
    Json(serde_json::json!({
        "success": false,
        "error": message,
        "code": code,
    }))
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Http { status, message } => {
                let code = match status {
                    StatusCode::NOT_FOUND => "NOT_FOUND",
                    _ => "BAD_REQUEST",
                };
                (status, error_body(message, code)).into_response()
            }
            ApiError::Gate(err) => {
                (status_for(&err), error_body(err.to_string(), err.code())).into_response()
            }
        }
    }
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| ApiError::bad_request(rejection.body_text()))
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    open_mode: bool,
    local_signing: bool,
    tracked_swaps: usize,
}

async fn health(State(state): State<ServiceState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: "notegate-service",
        open_mode: state.gateway.authority().open_mode(),
        local_signing: state.gateway.local_signing_enabled(),
        tracked_swaps: state.gateway.store().len().await,
    })
}

async fn submit_command(
    State(state): State<ServiceState>,
    payload: Result<Json<CommandRequest>, JsonRejection>,
) -> Result<Json<CommandResult>, ApiError> {
    let request = json_body(payload)?;
    let output = state.gateway.submit_command(&request).await?;
    Ok(Json(CommandResult::from(Ok(output))))
}

#[derive(Debug, Clone, Deserialize)]
struct SignCommandBody {
    action: String,
    #[serde(default)]
    params: Value,
}

async fn create_signed_command(
    State(state): State<ServiceState>,
    payload: Result<Json<SignCommandBody>, JsonRejection>,
) -> Result<Json<CommandRequest>, ApiError> {
    if !state.gateway.local_signing_enabled() {
        return Err(ApiError::not_found("local signing is disabled"));
    }
    let body = json_body(payload)?;
    Ok(Json(
        state
            .gateway
            .create_signed_command(&body.action, body.params)?,
    ))
}

async fn verify_signature(
    State(state): State<ServiceState>,
    payload: Result<Json<CommandRequest>, JsonRejection>,
) -> Result<Json<SignatureCheck>, ApiError> {
    let request = json_body(payload)?;
    Ok(Json(state.gateway.verify_signature(&request)))
}

/// Swap terms alongside the signed request that authorizes them.
#[derive(Debug, Clone, Deserialize)]
struct InitiateSwapBody {
    swap_id: String,
    recipient: String,
    amount: u64,
    fee: u64,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    sig: Option<String>,
    #[serde(default, rename = "publicKey", alias = "public_key")]
    public_key: Option<String>,
}

impl InitiateSwapBody {
    fn into_parts(self) -> (SwapRequest, CommandRequest) {
        (
            SwapRequest {
                swap_id: self.swap_id,
                recipient: self.recipient,
                amount: self.amount,
                fee: self.fee,
            },
            CommandRequest {
                msg: self.msg,
                sig: self.sig,
                public_key: self.public_key,
            },
        )
    }
}

async fn initiate_swap(
    State(state): State<ServiceState>,
    payload: Result<Json<InitiateSwapBody>, JsonRejection>,
) -> Result<(StatusCode, Json<SwapInitiation>), ApiError> {
    let (terms, request) = json_body(payload)?.into_parts();
    let initiation = state.gateway.initiate_swap(&terms, &request).await?;
    Ok((StatusCode::ACCEPTED, Json(initiation)))
}

async fn swap_status(
    State(state): State<ServiceState>,
    Path(swap_id): Path<String>,
) -> Result<Json<SwapTransaction>, ApiError> {
    Ok(Json(state.gateway.swap_status(&swap_id).await?))
}

async fn ledger_tip(State(state): State<ServiceState>) -> Result<Json<ChainTip>, ApiError> {
    Ok(Json(state.gateway.ledger().tip().await?))
}

#[derive(Debug, Clone, Serialize)]
struct HeightResponse {
    height: u64,
}

async fn ledger_height(State(state): State<ServiceState>) -> Result<Json<HeightResponse>, ApiError> {
    Ok(Json(HeightResponse {
        height: state.gateway.ledger().height().await?,
    }))
}

async fn block_by_height(
    State(state): State<ServiceState>,
    Path(height): Path<u64>,
) -> Result<Json<LedgerBlock>, ApiError> {
    state
        .gateway
        .ledger()
        .block_by_height(height)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("block {} not found", height)))
}

async fn block_by_hash(
    State(state): State<ServiceState>,
    Path(hash): Path<String>,
) -> Result<Json<LedgerBlock>, ApiError> {
    state
        .gateway
        .ledger()
        .block_by_hash(&hash)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("block '{}' not found", hash)))
}

async fn transaction(
    State(state): State<ServiceState>,
    Path(tx_id): Path<String>,
) -> Result<Json<LedgerTransaction>, ApiError> {
    state
        .gateway
        .ledger()
        .transaction(&tx_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("transaction '{}' not found", tx_id)))
}

#[derive(Debug, Clone, Deserialize)]
struct LatestTransactionsQuery {
    limit: Option<usize>,
}

async fn latest_transactions(
    State(state): State<ServiceState>,
    Query(query): Query<LatestTransactionsQuery>,
) -> Result<Json<Vec<LedgerTransaction>>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_TX_LIMIT);
    if limit == 0 || limit > MAX_TX_LIMIT {
        return Err(ApiError::bad_request(format!(
            "limit must be between 1 and {}",
            MAX_TX_LIMIT
        )));
    }
    Ok(Json(state.gateway.ledger().latest_transactions(limit).await?))
}
