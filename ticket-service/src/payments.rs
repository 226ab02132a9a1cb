//! Checkout and payment-webhook endpoints.
//!
//! Checkout commits the `pending` hold first, then talks to the gateway,
//! then records the intent — no ticket row lock is ever held across the
//! provider call. Confirmation lands later on the webhook route, which
//! must tolerate at-least-once delivery.

use axum::{extract::State, response::Json};
use bigdecimal::BigDecimal;
use num_traits::ToPrimitive;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use ledger::{
    FinalizeOutcome, IntentResolution, IntentStatus, Ledger, NewPaymentIntent, PaymentOutcome,
    PgLedger,
};

use crate::api::{ApiError, AppState};
use crate::gateway::AuthorizationStatus;

const CURRENCY: &str = "usd";

#[derive(Debug, Deserialize)]
pub struct CheckoutLine {
    pub ticket_type: String,
    pub quantity: i64,
}

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub event_id: Uuid,
    pub tickets: Vec<CheckoutLine>,
}

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub reference: String,
    pub amount: BigDecimal,
    pub currency: String,
    pub ticket_ids: Vec<Uuid>,
}

pub async fn checkout(
    State(state): State<AppState>,
    Json(request): Json<CheckoutRequest>,
) -> Result<Json<CheckoutResponse>, ApiError> {
    if request.tickets.is_empty() {
        return Err(ApiError::Validation(
            "at least one ticket line is required".to_string(),
        ));
    }

    // Reserve line by line; on any failure, release what earlier lines
    // already hold so the request has no net effect.
    let mut reserved: Vec<Uuid> = Vec::new();
    let mut total = BigDecimal::from(0);
    for line in &request.tickets {
        match state
            .ledger
            .reserve(request.event_id, &line.ticket_type, line.quantity)
            .await
        {
            Ok(reservation) => {
                reserved.extend(reservation.ticket_ids);
                total += reservation.total;
            }
            Err(err) => {
                release_quietly(&state.ledger, &reserved).await;
                return Err(err.into());
            }
        }
    }

    let amount_cents = to_cents(&total)
        .ok_or_else(|| ApiError::Validation("order total out of range".to_string()))?;

    let authorization = match state
        .gateway
        .authorize(amount_cents, CURRENCY, request.event_id)
        .await
    {
        Ok(authorization) => authorization,
        Err(err) => {
            release_quietly(&state.ledger, &reserved).await;
            return Err(ApiError::Internal(err));
        }
    };

    if authorization.status == AuthorizationStatus::Declined {
        warn!(reference = %authorization.reference, "payment declined, releasing hold");
        release_quietly(&state.ledger, &reserved).await;
        return Err(ApiError::PaymentDeclined);
    }

    state
        .ledger
        .record_intent(NewPaymentIntent {
            reference: authorization.reference.clone(),
            event_id: request.event_id,
            ticket_ids: reserved.clone(),
            amount: total.clone(),
            currency: CURRENCY.to_string(),
            status: IntentStatus::Pending.as_str().to_string(),
        })
        .await?;

    info!(
        reference = %authorization.reference,
        tickets = reserved.len(),
        "checkout authorized"
    );

    Ok(Json(CheckoutResponse {
        reference: authorization.reference,
        amount: total,
        currency: CURRENCY.to_string(),
        ticket_ids: reserved,
    }))
}

async fn release_quietly(ledger: &PgLedger, ticket_ids: &[Uuid]) {
    if ticket_ids.is_empty() {
        return;
    }
    if let Err(err) = ledger.finalize(ticket_ids, FinalizeOutcome::Released).await {
        error!(
            "failed to release {} reserved tickets: {}",
            ticket_ids.len(),
            err
        );
    }
}

/// Whole-cent amount for the gateway. Prices carry two decimal places, so
/// the product is exact.
fn to_cents(amount: &BigDecimal) -> Option<i64> {
    (amount * BigDecimal::from(100)).to_i64()
}

#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    pub reference: String,
    pub outcome: PaymentOutcome,
}

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
}

pub async fn webhook(
    State(state): State<AppState>,
    Json(payload): Json<WebhookPayload>,
) -> Result<Json<WebhookAck>, ApiError> {
    match state
        .ledger
        .resolve_intent(&payload.reference, payload.outcome)
        .await?
    {
        IntentResolution::Applied(outcome) => {
            info!(reference = %payload.reference, ?outcome, "payment intent resolved");
        }
        IntentResolution::AlreadyResolved => {
            info!(reference = %payload.reference, "duplicate webhook delivery ignored");
        }
        IntentResolution::Expired => {
            error!(
                reference = %payload.reference,
                "webhook for an expired reservation; manual reconciliation required"
            );
        }
    }
    Ok(Json(WebhookAck { received: true }))
}
