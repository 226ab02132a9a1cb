use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Status of a single ticket row.
///
/// Transitions are monotonic along the state machine; `parse` accepts the
/// lowercase strings stored in the `tickets.status` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketStatus {
    Available,
    Pending,
    Sold,
    Refunded,
}

impl TicketStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            TicketStatus::Available => "available",
            TicketStatus::Pending => "pending",
            TicketStatus::Sold => "sold",
            TicketStatus::Refunded => "refunded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "available" => Some(TicketStatus::Available),
            "pending" => Some(TicketStatus::Pending),
            "sold" => Some(TicketStatus::Sold),
            "refunded" => Some(TicketStatus::Refunded),
            _ => None,
        }
    }

    /// The legal transition table. `refunded` is terminal; a refunded
    /// ticket never re-enters available inventory.
    pub fn can_transition_to(self, next: TicketStatus) -> bool {
        matches!(
            (self, next),
            (TicketStatus::Available, TicketStatus::Pending)
                | (TicketStatus::Pending, TicketStatus::Sold)
                | (TicketStatus::Pending, TicketStatus::Available)
                | (TicketStatus::Sold, TicketStatus::Refunded)
        )
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a pending reservation resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeOutcome {
    /// Payment confirmed, tickets are sold.
    Sold,
    /// Payment failed or the hold was abandoned, tickets return to the pool.
    Released,
}

impl FinalizeOutcome {
    pub const fn target(self) -> TicketStatus {
        match self {
            FinalizeOutcome::Sold => TicketStatus::Sold,
            FinalizeOutcome::Released => TicketStatus::Available,
        }
    }
}

/// Outcome reported by the payment provider's webhook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentOutcome {
    Succeeded,
    Failed,
}

impl PaymentOutcome {
    pub const fn finalize_outcome(self) -> FinalizeOutcome {
        match self {
            PaymentOutcome::Succeeded => FinalizeOutcome::Sold,
            PaymentOutcome::Failed => FinalizeOutcome::Released,
        }
    }

    pub const fn intent_status(self) -> IntentStatus {
        match self {
            PaymentOutcome::Succeeded => IntentStatus::Succeeded,
            PaymentOutcome::Failed => IntentStatus::Failed,
        }
    }
}

/// Status of a persisted payment intent (the reservation record).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentStatus {
    Pending,
    Succeeded,
    Failed,
    /// The pending lifetime elapsed and the sweeper released the hold.
    Expired,
}

impl IntentStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            IntentStatus::Pending => "pending",
            IntentStatus::Succeeded => "succeeded",
            IntentStatus::Failed => "failed",
            IntentStatus::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(IntentStatus::Pending),
            "succeeded" => Some(IntentStatus::Succeeded),
            "failed" => Some(IntentStatus::Failed),
            "expired" => Some(IntentStatus::Expired),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Queryable, Identifiable, Serialize)]
#[diesel(table_name = crate::schema::venues)]
pub struct Venue {
    pub id: Uuid,
    pub name: String,
    pub address: String,
    pub city: String,
    pub state: String,
    pub zip: String,
    pub capacity: i32,
    pub description: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::venues)]
pub struct NewVenue {
    pub id: Uuid,
    pub name: String,
    pub address: String,
    pub city: String,
    pub state: String,
    pub zip: String,
    pub capacity: i32,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Serialize)]
#[diesel(table_name = crate::schema::events)]
pub struct Event {
    pub id: Uuid,
    pub venue_id: Option<Uuid>,
    pub name: String,
    pub description: Option<String>,
    pub event_type: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub status: String,
    pub image_url: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::events)]
pub struct NewEvent {
    pub id: Uuid,
    pub venue_id: Option<Uuid>,
    pub name: String,
    pub description: Option<String>,
    pub event_type: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub status: String,
    pub image_url: Option<String>,
}

/// Partial update for an event; `None` fields keep their current value.
#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = crate::schema::events)]
pub struct EventChanges {
    pub venue_id: Option<Uuid>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub event_type: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub status: Option<String>,
    pub image_url: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Serialize)]
#[diesel(table_name = crate::schema::tickets)]
pub struct Ticket {
    pub id: Uuid,
    pub event_id: Uuid,
    pub ticket_type: String,
    pub price: BigDecimal,
    pub status: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Ticket {
    pub fn status(&self) -> Option<TicketStatus> {
        TicketStatus::parse(&self.status)
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::tickets)]
pub struct NewTicket {
    pub id: Uuid,
    pub event_id: Uuid,
    pub ticket_type: String,
    pub price: BigDecimal,
    pub status: String,
}

/// One reservation: a payment reference correlated to the exact set of
/// ticket rows it holds pending.
#[derive(Debug, Clone, Queryable, Identifiable, Serialize)]
#[diesel(table_name = crate::schema::payment_intents)]
#[diesel(primary_key(reference))]
pub struct PaymentIntent {
    pub reference: String,
    pub event_id: Uuid,
    pub ticket_ids: Vec<Uuid>,
    pub amount: BigDecimal,
    pub currency: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::payment_intents)]
pub struct NewPaymentIntent {
    pub reference: String,
    pub event_id: Uuid,
    pub ticket_ids: Vec<Uuid>,
    pub amount: BigDecimal,
    pub currency: String,
    pub status: String,
}

/// One ticket type to provision: `quantity` rows at `price`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketBatchSpec {
    #[serde(rename = "type")]
    pub ticket_type: String,
    pub price: BigDecimal,
    pub quantity: i64,
}

/// Per-type result of a provisioning call.
#[derive(Debug, Clone, Serialize)]
pub struct TicketGroupSummary {
    pub ticket_type: String,
    pub price: BigDecimal,
    pub quantity: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            TicketStatus::Available,
            TicketStatus::Pending,
            TicketStatus::Sold,
            TicketStatus::Refunded,
        ] {
            assert_eq!(TicketStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(TicketStatus::parse("held"), None);
    }

    #[test]
    fn transition_table_matches_state_machine() {
        use TicketStatus::*;

        assert!(Available.can_transition_to(Pending));
        assert!(Pending.can_transition_to(Sold));
        assert!(Pending.can_transition_to(Available));
        assert!(Sold.can_transition_to(Refunded));

        // Everything else is illegal, including resurrecting a refund.
        assert!(!Available.can_transition_to(Sold));
        assert!(!Available.can_transition_to(Refunded));
        assert!(!Sold.can_transition_to(Available));
        assert!(!Sold.can_transition_to(Pending));
        assert!(!Refunded.can_transition_to(Available));
        assert!(!Refunded.can_transition_to(Pending));
        assert!(!Refunded.can_transition_to(Sold));
    }

    #[test]
    fn outcome_targets() {
        assert_eq!(FinalizeOutcome::Sold.target(), TicketStatus::Sold);
        assert_eq!(FinalizeOutcome::Released.target(), TicketStatus::Available);
    }

    #[test]
    fn payment_outcome_maps_to_finalize_and_intent_status() {
        assert_eq!(
            PaymentOutcome::Succeeded.finalize_outcome(),
            FinalizeOutcome::Sold
        );
        assert_eq!(
            PaymentOutcome::Failed.finalize_outcome(),
            FinalizeOutcome::Released
        );
        assert_eq!(
            PaymentOutcome::Succeeded.intent_status(),
            IntentStatus::Succeeded
        );
        assert_eq!(PaymentOutcome::Failed.intent_status(), IntentStatus::Failed);
    }

    #[test]
    fn payment_outcome_deserializes_from_webhook_strings() {
        let outcome: PaymentOutcome = serde_json::from_str("\"succeeded\"").unwrap();
        assert_eq!(outcome, PaymentOutcome::Succeeded);
        let outcome: PaymentOutcome = serde_json::from_str("\"failed\"").unwrap();
        assert_eq!(outcome, PaymentOutcome::Failed);
    }
}
