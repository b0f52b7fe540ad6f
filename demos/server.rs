//! Simple REST API server example for the reconciliation engine.
//!
//! Run with: `cargo run --example server`
//!
//! ## Endpoints
//!
//! - `POST /transactions` - Record an incoming payment notification
//! - `GET /transactions` - List all transactions
//! - `GET /transactions/{id}` - Get a transaction by ID
//! - `POST /transactions/{id}/status` - Explicit status change
//! - `POST /transactions/{id}/payment` - Record a manual payment amount
//! - `POST /sessions` - Activate an issuance session
//! - `GET /sessions/current/{operator}` - The operator's active session
//! - `POST /sessions/{id}/items` - Add a scanned product to the session
//! - `POST /sessions/{id}/complete` - Commit the session
//! - `POST /sessions/{id}/cancel` - Cancel the session
//!
//! ## Example Usage
//!
//! ```bash
//! # Record a payment notification
//! curl -X POST http://localhost:3000/transactions \
//!   -H "Content-Type: application/json" \
//!   -d '{"tx_code": "QJL7XK2M9P", "amount_expected": "3000.00", "sender": {"name": "JOHN DOE", "phone": "255700000001"}}'
//!
//! # Activate an issuance session for transaction 1
//! curl -X POST http://localhost:3000/sessions \
//!   -H "Content-Type: application/json" \
//!   -d '{"transaction_id": 1, "operator": "op-1"}'
//!
//! # Scan two units of a product into session 1
//! curl -X POST http://localhost:3000/sessions/1/items \
//!   -H "Content-Type: application/json" \
//!   -d '{"product": {"code": "AP004E"}, "quantity": 2}'
//!
//! # Commit the session
//! curl -X POST http://localhost:3000/sessions/1/complete \
//!   -H "Content-Type: application/json" \
//!   -d '{"performed_by": "op-1"}'
//! ```

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use payfill_rs::{
    CompletionReport, Engine, EngineError, OperatorId, OrderStatus, Product, ProductCode,
    ProductRef, SenderInfo, SessionId, SessionSnapshot, TransactionId, TransactionSnapshot, TxCode,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;

// === Request/Response DTOs ===

/// Request body for recording a payment notification.
#[derive(Debug, Deserialize)]
pub struct CreateTransactionRequest {
    pub tx_code: String,
    pub amount_expected: Decimal,
    #[serde(default)]
    pub sender: SenderInfo,
}

/// Request body for an explicit status change.
#[derive(Debug, Deserialize)]
pub struct ChangeStatusRequest {
    pub status: OrderStatus,
}

/// Request body for a manual payment entry.
#[derive(Debug, Deserialize)]
pub struct RecordPaymentRequest {
    pub amount_paid: Decimal,
}

/// Request body for activating an issuance session.
#[derive(Debug, Deserialize)]
pub struct ActivateSessionRequest {
    pub transaction_id: u64,
    pub operator: String,
}

/// Request body for scanning a product into a session.
#[derive(Debug, Deserialize)]
pub struct AddItemRequest {
    pub product: ProductRef,
    pub quantity: i64,
}

/// Request body for completing a session.
#[derive(Debug, Deserialize)]
pub struct CompleteSessionRequest {
    pub performed_by: String,
}

/// Request body for cancelling a session.
#[derive(Debug, Default, Deserialize)]
pub struct CancelSessionRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

/// Response body for errors.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

// === Application State ===

/// Shared application state containing the reconciliation engine.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
}

// === Error Handling ===

/// Wrapper for converting `EngineError` into HTTP responses.
pub struct AppError(EngineError);

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        AppError(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            EngineError::TransactionLocked => (StatusCode::FORBIDDEN, "TRANSACTION_LOCKED"),
            EngineError::InvalidStatusTransition { .. } => {
                (StatusCode::CONFLICT, "INVALID_STATUS_TRANSITION")
            }
            EngineError::InvalidAmount => (StatusCode::BAD_REQUEST, "INVALID_AMOUNT"),
            EngineError::InsufficientAmount { .. } => {
                (StatusCode::UNPROCESSABLE_ENTITY, "INSUFFICIENT_AMOUNT")
            }
            EngineError::InsufficientStock { .. } => {
                (StatusCode::UNPROCESSABLE_ENTITY, "INSUFFICIENT_STOCK")
            }
            EngineError::InvalidQuantity => (StatusCode::BAD_REQUEST, "INVALID_QUANTITY"),
            EngineError::ProductNotFound => (StatusCode::NOT_FOUND, "PRODUCT_NOT_FOUND"),
            EngineError::SessionConflict => (StatusCode::CONFLICT, "SESSION_CONFLICT"),
            EngineError::EmptySession => (StatusCode::BAD_REQUEST, "EMPTY_SESSION"),
            EngineError::SessionAlreadyClosed => (StatusCode::CONFLICT, "SESSION_ALREADY_CLOSED"),
            EngineError::DuplicateTransaction => (StatusCode::CONFLICT, "DUPLICATE_TRANSACTION"),
            EngineError::TransactionNotFound => (StatusCode::NOT_FOUND, "TRANSACTION_NOT_FOUND"),
            EngineError::SessionNotFound => (StatusCode::NOT_FOUND, "SESSION_NOT_FOUND"),
        };

        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
                code: code.to_string(),
            }),
        )
            .into_response()
    }
}

// === Handlers ===

/// POST /transactions - Record a payment notification.
async fn create_transaction(
    State(state): State<AppState>,
    Json(request): Json<CreateTransactionRequest>,
) -> Result<(StatusCode, Json<TransactionSnapshot>), AppError> {
    let snapshot = state.engine.create_transaction(
        TxCode::new(request.tx_code),
        request.amount_expected,
        request.sender,
    )?;
    Ok((StatusCode::CREATED, Json(snapshot)))
}

/// GET /transactions - List all transactions.
async fn list_transactions(State(state): State<AppState>) -> Json<Vec<TransactionSnapshot>> {
    Json(state.engine.transactions())
}

/// GET /transactions/{id} - Get a transaction by ID.
async fn get_transaction(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<TransactionSnapshot>, AppError> {
    Ok(Json(state.engine.get(TransactionId(id))?))
}

/// POST /transactions/{id}/status - Explicit status change.
async fn change_status(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(request): Json<ChangeStatusRequest>,
) -> Result<Json<TransactionSnapshot>, AppError> {
    Ok(Json(
        state.engine.change_status(TransactionId(id), request.status)?,
    ))
}

/// POST /transactions/{id}/payment - Record a manual payment amount.
async fn record_payment(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(request): Json<RecordPaymentRequest>,
) -> Result<Json<TransactionSnapshot>, AppError> {
    Ok(Json(
        state
            .engine
            .record_payment(TransactionId(id), request.amount_paid)?,
    ))
}

/// POST /sessions - Activate an issuance session.
async fn activate_session(
    State(state): State<AppState>,
    Json(request): Json<ActivateSessionRequest>,
) -> Result<(StatusCode, Json<SessionSnapshot>), AppError> {
    let snapshot = state.engine.activate_session(
        TransactionId(request.transaction_id),
        OperatorId::new(request.operator),
    )?;
    Ok((StatusCode::CREATED, Json(snapshot)))
}

/// GET /sessions/current/{operator} - The operator's active session.
async fn current_session(
    State(state): State<AppState>,
    Path(operator): Path<String>,
) -> Result<Json<SessionSnapshot>, (StatusCode, Json<ErrorResponse>)> {
    state
        .engine
        .current_session(&OperatorId::new(operator))
        .map(Json)
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                Json(ErrorResponse {
                    error: "No active session".to_string(),
                    code: "SESSION_NOT_FOUND".to_string(),
                }),
            )
        })
}

/// POST /sessions/{id}/items - Add a scanned product to the session.
async fn add_item(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(request): Json<AddItemRequest>,
) -> Result<Json<SessionSnapshot>, AppError> {
    let (_item, snapshot) =
        state
            .engine
            .add_line_item(SessionId(id), &request.product, request.quantity)?;
    Ok(Json(snapshot))
}

/// POST /sessions/{id}/complete - Commit the session.
async fn complete_session(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(request): Json<CompleteSessionRequest>,
) -> Result<Json<CompletionReport>, AppError> {
    Ok(Json(
        state
            .engine
            .complete_session(SessionId(id), &request.performed_by)?,
    ))
}

/// POST /sessions/{id}/cancel - Cancel the session.
async fn cancel_session(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(request): Json<CancelSessionRequest>,
) -> Result<Json<SessionSnapshot>, AppError> {
    Ok(Json(
        state
            .engine
            .cancel_session(SessionId(id), request.reason.as_deref())?,
    ))
}

// === Router ===

fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/transactions", post(create_transaction).get(list_transactions))
        .route("/transactions/{id}", get(get_transaction))
        .route("/transactions/{id}/status", post(change_status))
        .route("/transactions/{id}/payment", post(record_payment))
        .route("/sessions", post(activate_session))
        .route("/sessions/current/{operator}", get(current_session))
        .route("/sessions/{id}/items", post(add_item))
        .route("/sessions/{id}/complete", post(complete_session))
        .route("/sessions/{id}/cancel", post(cancel_session))
        .with_state(state)
}

// === Main ===

fn seed_inventory(engine: &Engine) {
    engine.inventory().upsert(Product::new(
        ProductCode::new("AP004E"),
        "MicroQ2 Cycle Tablets",
        "AP004E-100",
        "100 tablets",
        dec!(2970.00),
        dec!(2079.00),
        dec!(11.00),
        50,
    ));
    engine.inventory().upsert(Product::new(
        ProductCode::new("CF001"),
        "Black Coffee",
        "CF001-30",
        "30 sachets",
        dec!(1500.00),
        dec!(1050.00),
        dec!(5.00),
        5,
    ));
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "payfill_rs=debug".into()),
        )
        .init();

    let engine = Arc::new(Engine::new());
    seed_inventory(&engine);

    let state = AppState { engine };
    let app = create_router(state);

    let listener = TcpListener::bind("127.0.0.1:3000").await.unwrap();
    println!("Payfill API server running on http://127.0.0.1:3000");
    println!();
    println!("Endpoints:");
    println!("  POST /transactions                 - Record a payment notification");
    println!("  GET  /transactions                 - List transactions");
    println!("  GET  /transactions/:id             - Get transaction by ID");
    println!("  POST /transactions/:id/status      - Explicit status change");
    println!("  POST /transactions/:id/payment     - Record a payment amount");
    println!("  POST /sessions                     - Activate an issuance session");
    println!("  GET  /sessions/current/:operator   - Current session for operator");
    println!("  POST /sessions/:id/items           - Scan a product into a session");
    println!("  POST /sessions/:id/complete        - Commit a session");
    println!("  POST /sessions/:id/cancel          - Cancel a session");

    axum::serve(listener, app).await.unwrap();
}
