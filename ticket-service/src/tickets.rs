//! Ticket availability, refund, and provisioning endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::dsl::count_star;
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use ledger::models::Event;
use ledger::schema::{events, tickets};
use ledger::{Ledger, Ticket, TicketBatchSpec, TicketGroupSummary, TicketStatus};

use crate::api::{ApiError, AppState};

#[derive(Debug, Serialize)]
pub struct TypeAvailability {
    pub ticket_type: String,
    pub price: BigDecimal,
    pub available_count: i64,
}

/// Available-ticket counts grouped by type and price, cheapest first.
pub async fn availability_by_type(
    conn: &mut AsyncPgConnection,
    event_id: Uuid,
) -> Result<Vec<TypeAvailability>, diesel::result::Error> {
    let rows: Vec<(String, BigDecimal, i64)> = tickets::table
        .filter(tickets::event_id.eq(event_id))
        .filter(tickets::status.eq(TicketStatus::Available.as_str()))
        .group_by((tickets::ticket_type, tickets::price))
        .select((tickets::ticket_type, tickets::price, count_star()))
        .order(tickets::price.asc())
        .load(conn)
        .await?;

    Ok(rows
        .into_iter()
        .map(|(ticket_type, price, available_count)| TypeAvailability {
            ticket_type,
            price,
            available_count,
        })
        .collect())
}

pub async fn availability_for_event(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
) -> Result<Json<Vec<TypeAvailability>>, ApiError> {
    let mut conn = state.pool.get().await?;
    let availability = availability_by_type(&mut conn, event_id).await?;
    Ok(Json(availability))
}

#[derive(Debug, Serialize)]
pub struct PurchasedTicket {
    pub id: Uuid,
    pub event_id: Uuid,
    pub ticket_type: String,
    pub price: BigDecimal,
    pub status: String,
    pub event_name: String,
    pub start_date: DateTime<Utc>,
}

pub async fn list_purchased(
    State(state): State<AppState>,
) -> Result<Json<Vec<PurchasedTicket>>, ApiError> {
    let mut conn = state.pool.get().await?;

    let rows: Vec<(Ticket, Event)> = tickets::table
        .inner_join(events::table)
        .filter(tickets::status.eq(TicketStatus::Sold.as_str()))
        .order(events::start_date.asc())
        .load(&mut conn)
        .await?;

    let purchased = rows
        .into_iter()
        .map(|(ticket, event)| PurchasedTicket {
            id: ticket.id,
            event_id: ticket.event_id,
            ticket_type: ticket.ticket_type,
            price: ticket.price,
            status: ticket.status,
            event_name: event.name,
            start_date: event.start_date,
        })
        .collect();

    Ok(Json(purchased))
}

#[derive(Debug, Deserialize)]
pub struct CreateBatchRequest {
    pub event_id: Uuid,
    pub ticket_types: Vec<TicketBatchSpec>,
}

#[derive(Debug, Serialize)]
pub struct CreateBatchResponse {
    pub message: String,
    pub event_id: Uuid,
    pub tickets: Vec<TicketGroupSummary>,
}

pub async fn create_ticket_batch(
    State(state): State<AppState>,
    Json(request): Json<CreateBatchRequest>,
) -> Result<(StatusCode, Json<CreateBatchResponse>), ApiError> {
    if request.ticket_types.is_empty() {
        return Err(ApiError::Validation(
            "at least one ticket type is required".to_string(),
        ));
    }

    let summaries = state
        .ledger
        .provision_batch(request.event_id, &request.ticket_types)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateBatchResponse {
            message: "Tickets created successfully".to_string(),
            event_id: request.event_id,
            tickets: summaries,
        }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct RefundRequest {
    pub ticket_id: Uuid,
}

pub async fn refund_ticket(
    State(state): State<AppState>,
    Json(request): Json<RefundRequest>,
) -> Result<Json<Ticket>, ApiError> {
    let ticket = state.ledger.refund(request.ticket_id).await?;
    Ok(Json(ticket))
}
