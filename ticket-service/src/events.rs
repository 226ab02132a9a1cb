//! Event listing and administration endpoints.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::dsl::{count_star, min};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use ledger::models::{Event, EventChanges, NewEvent, Venue};
use ledger::schema::{events, tickets, venues};
use ledger::TicketStatus;

use crate::api::{ApiError, AppState, MessageResponse};
use crate::tickets::{availability_by_type, TypeAvailability};

#[derive(Debug, Deserialize)]
pub struct Pagination {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

/// (limit, offset) with the listing defaults: page 1, 24 per page,
/// capped at 100.
fn page_window(pagination: &Pagination) -> (i64, i64) {
    let limit = pagination.limit.unwrap_or(24).clamp(1, 100);
    let page = pagination.page.unwrap_or(1).max(1);
    (limit, (page - 1) * limit)
}

#[derive(Debug, Serialize)]
pub struct TicketInfo {
    pub starting_price: Option<BigDecimal>,
    pub available_count: i64,
}

#[derive(Debug, Serialize)]
pub struct EventSummary {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub event_type: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub status: String,
    pub image_url: Option<String>,
    pub venue_name: Option<String>,
    pub venue_location: Option<String>,
    pub ticket_info: TicketInfo,
}

pub async fn list_events(
    State(state): State<AppState>,
    Query(pagination): Query<Pagination>,
) -> Result<Json<Vec<EventSummary>>, ApiError> {
    let (limit, offset) = page_window(&pagination);
    let mut conn = state.pool.get().await?;

    let rows: Vec<(Event, Option<Venue>)> = events::table
        .left_join(venues::table)
        .filter(events::start_date.gt(Utc::now()))
        .filter(events::status.eq("upcoming"))
        .order(events::start_date.asc())
        .limit(limit)
        .offset(offset)
        .load(&mut conn)
        .await?;

    let event_ids: Vec<Uuid> = rows.iter().map(|(event, _)| event.id).collect();
    let stats: Vec<(Uuid, Option<BigDecimal>, i64)> = tickets::table
        .filter(tickets::event_id.eq_any(&event_ids))
        .filter(tickets::status.eq(TicketStatus::Available.as_str()))
        .group_by(tickets::event_id)
        .select((tickets::event_id, min(tickets::price), count_star()))
        .load(&mut conn)
        .await?;
    let stats: HashMap<Uuid, (Option<BigDecimal>, i64)> = stats
        .into_iter()
        .map(|(id, price, count)| (id, (price, count)))
        .collect();

    let summaries = rows
        .into_iter()
        .map(|(event, venue)| {
            let (starting_price, available_count) =
                stats.get(&event.id).cloned().unwrap_or((None, 0));
            EventSummary {
                id: event.id,
                name: event.name,
                description: event.description,
                event_type: event.event_type,
                start_date: event.start_date,
                end_date: event.end_date,
                status: event.status,
                image_url: event.image_url,
                venue_name: venue.as_ref().map(|v| v.name.clone()),
                venue_location: venue.as_ref().map(|v| format!("{}, {}", v.city, v.state)),
                ticket_info: TicketInfo {
                    starting_price,
                    available_count,
                },
            }
        })
        .collect();

    Ok(Json(summaries))
}

#[derive(Debug, Serialize)]
pub struct EventDetail {
    #[serde(flatten)]
    pub event: Event,
    pub tickets: Vec<TypeAvailability>,
}

pub async fn get_event(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<EventDetail>, ApiError> {
    let mut conn = state.pool.get().await?;

    let event: Option<Event> = events::table.find(id).first(&mut conn).await.optional()?;
    let Some(event) = event else {
        return Err(ApiError::NotFound("event"));
    };

    let tickets = availability_by_type(&mut conn, id).await?;
    Ok(Json(EventDetail { event, tickets }))
}

#[derive(Debug, Deserialize)]
pub struct CreateEventRequest {
    pub name: String,
    pub description: Option<String>,
    pub event_type: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub venue_id: Option<Uuid>,
    pub status: Option<String>,
    pub image_url: Option<String>,
}

pub async fn create_event(
    State(state): State<AppState>,
    Json(request): Json<CreateEventRequest>,
) -> Result<(StatusCode, Json<Event>), ApiError> {
    let mut conn = state.pool.get().await?;

    let new_event = NewEvent {
        id: Uuid::new_v4(),
        venue_id: request.venue_id,
        name: request.name,
        description: request.description,
        event_type: request.event_type,
        start_date: request.start_date,
        end_date: request.end_date,
        status: request.status.unwrap_or_else(|| "upcoming".to_string()),
        image_url: request.image_url,
    };

    let event: Event = diesel::insert_into(events::table)
        .values(&new_event)
        .get_result(&mut conn)
        .await?;

    Ok((StatusCode::CREATED, Json(event)))
}

#[derive(Debug, Deserialize)]
pub struct UpdateEventRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub event_type: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub venue_id: Option<Uuid>,
    pub status: Option<String>,
    pub image_url: Option<String>,
}

pub async fn update_event(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateEventRequest>,
) -> Result<Json<Event>, ApiError> {
    let mut conn = state.pool.get().await?;

    let changes = EventChanges {
        venue_id: request.venue_id,
        name: request.name,
        description: request.description,
        event_type: request.event_type,
        start_date: request.start_date,
        end_date: request.end_date,
        status: request.status,
        image_url: request.image_url,
        updated_at: Utc::now(),
    };

    let event: Option<Event> = diesel::update(events::table.find(id))
        .set(&changes)
        .get_result(&mut conn)
        .await
        .optional()?;
    event.map(Json).ok_or(ApiError::NotFound("event"))
}

pub async fn delete_event(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<MessageResponse>, ApiError> {
    let mut conn = state.pool.get().await?;

    // Tickets and intents go with the event (ON DELETE CASCADE).
    let deleted = diesel::delete(events::table.find(id))
        .execute(&mut conn)
        .await?;
    if deleted == 0 {
        return Err(ApiError::NotFound("event"));
    }
    Ok(Json(MessageResponse {
        message: "Event deleted successfully".to_string(),
    }))
}

#[derive(Debug, Serialize)]
pub struct SeatingSection {
    pub id: String,
    pub name: String,
    pub available: i64,
    pub price: BigDecimal,
    pub price_level: u8,
}

#[derive(Debug, Serialize)]
pub struct SeatingResponse {
    pub sections: Vec<SeatingSection>,
}

/// Seating data grouped by ticket type. Section geometry is a client
/// rendering concern; the service reports availability and price tiers.
pub async fn get_event_seating(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SeatingResponse>, ApiError> {
    let mut conn = state.pool.get().await?;

    let exists: Option<Uuid> = events::table
        .find(id)
        .select(events::id)
        .first(&mut conn)
        .await
        .optional()?;
    if exists.is_none() {
        return Err(ApiError::NotFound("event"));
    }

    let sections = availability_by_type(&mut conn, id)
        .await?
        .into_iter()
        .map(|ty| SeatingSection {
            id: ty.ticket_type.clone(),
            name: ty.ticket_type,
            available: ty.available_count,
            price_level: price_level(&ty.price),
            price: ty.price,
        })
        .collect();

    Ok(Json(SeatingResponse { sections }))
}

/// Price tier 1-5 for seating display.
fn price_level(price: &BigDecimal) -> u8 {
    if *price < BigDecimal::from(50) {
        1
    } else if *price < BigDecimal::from(100) {
        2
    } else if *price < BigDecimal::from(150) {
        3
    } else if *price < BigDecimal::from(200) {
        4
    } else {
        5
    }
}
