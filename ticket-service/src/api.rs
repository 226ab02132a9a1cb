use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use diesel_async::{pooled_connection::bb8::Pool, AsyncPgConnection};
use serde::Serialize;
use tracing::error;

use ledger::{LedgerError, PgLedger};

use crate::events;
use crate::gateway::PaymentGateway;
use crate::payments;
use crate::tickets;

pub type DbPool = Pool<AsyncPgConnection>;

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub ledger: PgLedger,
    pub gateway: PaymentGateway,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug)]
pub enum ApiError {
    Ledger(LedgerError),
    PaymentDeclined,
    Validation(String),
    NotFound(&'static str),
    Internal(anyhow::Error),
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        ApiError::Ledger(err)
    }
}

impl From<diesel::result::Error> for ApiError {
    fn from(err: diesel::result::Error) -> Self {
        match err {
            diesel::result::Error::NotFound => ApiError::NotFound("resource"),
            other => ApiError::Internal(other.into()),
        }
    }
}

impl From<bb8::RunError<diesel_async::pooled_connection::PoolError>> for ApiError {
    fn from(err: bb8::RunError<diesel_async::pooled_connection::PoolError>) -> Self {
        ApiError::Internal(anyhow::Error::new(err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Ledger(err) => match err {
                LedgerError::InsufficientInventory { .. }
                | LedgerError::TicketNotPending(_)
                | LedgerError::NotRefundable(_) => (StatusCode::CONFLICT, err.to_string()),
                LedgerError::EventNotFound(_) | LedgerError::UnknownReference(_) => {
                    (StatusCode::NOT_FOUND, err.to_string())
                }
                LedgerError::InvalidQuantity(_) => (StatusCode::BAD_REQUEST, err.to_string()),
                LedgerError::Storage(_) | LedgerError::Pool(_) => {
                    error!("ledger storage failure: {}", err);
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "internal server error".to_string(),
                    )
                }
            },
            ApiError::PaymentDeclined => (StatusCode::PAYMENT_REQUIRED, "payment failed".to_string()),
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::NotFound(what) => (StatusCode::NOT_FOUND, format!("{what} not found")),
            ApiError::Internal(err) => {
                error!("internal error: {:#}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route(
            "/api/events",
            get(events::list_events).post(events::create_event),
        )
        .route(
            "/api/events/:id",
            get(events::get_event)
                .put(events::update_event)
                .delete(events::delete_event),
        )
        .route("/api/events/:id/seating", get(events::get_event_seating))
        .route(
            "/api/tickets/event/:event_id",
            get(tickets::availability_for_event),
        )
        .route("/api/tickets/purchased", get(tickets::list_purchased))
        .route("/api/tickets/batch", post(tickets::create_ticket_batch))
        .route("/api/tickets/refund", post(tickets::refund_ticket))
        .route("/api/payments/checkout", post(payments::checkout))
        .route("/api/payments/webhook", post(payments::webhook))
        .with_state(state)
        .layer(
            tower::ServiceBuilder::new().layer(
                tower_http::cors::CorsLayer::new()
                    .allow_origin(tower_http::cors::Any)
                    .allow_methods(tower_http::cors::Any)
                    .allow_headers(tower_http::cors::Any),
            ),
        )
}

pub async fn health_check() -> &'static str {
    "OK"
}
