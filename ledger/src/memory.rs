//! In-memory ledger.
//!
//! A single-mutex allocator over plain maps. It satisfies the same
//! contract as the PostgreSQL implementation (coarser locking than the
//! contract requires is still correct) and backs the contract test suite,
//! which needs to hammer the state machine without external services.

use bigdecimal::BigDecimal;
use chrono::{Duration, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use uuid::Uuid;

use crate::error::LedgerError;
use crate::models::{
    FinalizeOutcome, IntentStatus, NewPaymentIntent, PaymentIntent, PaymentOutcome, Ticket,
    TicketBatchSpec, TicketGroupSummary, TicketStatus,
};
use crate::store::{IntentResolution, Ledger, Reservation, SweepReport};

#[derive(Default)]
pub struct MemoryLedger {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    events: HashSet<Uuid>,
    // BTreeMap keeps claim order deterministic.
    tickets: BTreeMap<Uuid, Ticket>,
    intents: HashMap<String, PaymentIntent>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make an event id known to the ledger (stands in for the event
    /// store's `eventExists` check).
    pub fn register_event(&self, event_id: Uuid) {
        self.inner.lock().events.insert(event_id);
    }

    pub fn status_of(&self, ticket_id: Uuid) -> Option<TicketStatus> {
        self.inner.lock().tickets.get(&ticket_id).and_then(Ticket::status)
    }

    pub fn count_in_status(&self, event_id: Uuid, ticket_type: &str, status: TicketStatus) -> usize {
        self.inner
            .lock()
            .tickets
            .values()
            .filter(|t| {
                t.event_id == event_id
                    && t.ticket_type == ticket_type
                    && t.status() == Some(status)
            })
            .count()
    }

    pub fn ticket_count(&self) -> usize {
        self.inner.lock().tickets.len()
    }
}

impl Inner {
    fn finalize_set(&mut self, ticket_ids: &[Uuid], outcome: FinalizeOutcome) -> Result<(), LedgerError> {
        let target = outcome.target();
        let mut to_move = Vec::new();
        for id in ticket_ids {
            let status = self
                .tickets
                .get(id)
                .and_then(Ticket::status)
                .ok_or(LedgerError::TicketNotPending(*id))?;
            if status == target {
                continue;
            }
            if status != TicketStatus::Pending {
                return Err(LedgerError::TicketNotPending(*id));
            }
            to_move.push(*id);
        }
        for id in to_move {
            if let Some(ticket) = self.tickets.get_mut(&id) {
                ticket.status = target.as_str().to_string();
                ticket.updated_at = Utc::now();
            }
        }
        Ok(())
    }
}

impl Ledger for MemoryLedger {
    async fn reserve(
        &self,
        event_id: Uuid,
        ticket_type: &str,
        quantity: i64,
    ) -> Result<Reservation, LedgerError> {
        if quantity <= 0 {
            return Err(LedgerError::InvalidQuantity(quantity));
        }
        let mut inner = self.inner.lock();

        let picked: Vec<Uuid> = inner
            .tickets
            .values()
            .filter(|t| {
                t.event_id == event_id
                    && t.ticket_type == ticket_type
                    && t.status() == Some(TicketStatus::Available)
            })
            .take(quantity as usize)
            .map(|t| t.id)
            .collect();

        if (picked.len() as i64) < quantity {
            return Err(LedgerError::InsufficientInventory {
                requested: quantity,
                available: picked.len() as i64,
            });
        }

        let mut total = BigDecimal::from(0);
        for id in &picked {
            if let Some(ticket) = inner.tickets.get_mut(id) {
                ticket.status = TicketStatus::Pending.as_str().to_string();
                ticket.updated_at = Utc::now();
                total += ticket.price.clone();
            }
        }
        Ok(Reservation {
            ticket_ids: picked,
            total,
        })
    }

    async fn finalize(
        &self,
        ticket_ids: &[Uuid],
        outcome: FinalizeOutcome,
    ) -> Result<(), LedgerError> {
        self.inner.lock().finalize_set(ticket_ids, outcome)
    }

    async fn refund(&self, ticket_id: Uuid) -> Result<Ticket, LedgerError> {
        let mut inner = self.inner.lock();
        let ticket = inner
            .tickets
            .get_mut(&ticket_id)
            .ok_or(LedgerError::NotRefundable(ticket_id))?;
        if ticket.status() != Some(TicketStatus::Sold) {
            return Err(LedgerError::NotRefundable(ticket_id));
        }
        ticket.status = TicketStatus::Refunded.as_str().to_string();
        ticket.updated_at = Utc::now();
        Ok(ticket.clone())
    }

    async fn provision_batch(
        &self,
        event_id: Uuid,
        specs: &[TicketBatchSpec],
    ) -> Result<Vec<TicketGroupSummary>, LedgerError> {
        let mut inner = self.inner.lock();
        if !inner.events.contains(&event_id) {
            return Err(LedgerError::EventNotFound(event_id));
        }
        for spec in specs {
            if spec.quantity <= 0 {
                return Err(LedgerError::InvalidQuantity(spec.quantity));
            }
        }

        let mut summaries = Vec::with_capacity(specs.len());
        for spec in specs {
            for _ in 0..spec.quantity {
                let now = Utc::now();
                let ticket = Ticket {
                    id: Uuid::new_v4(),
                    event_id,
                    ticket_type: spec.ticket_type.clone(),
                    price: spec.price.clone(),
                    status: TicketStatus::Available.as_str().to_string(),
                    created_at: Some(now),
                    updated_at: now,
                };
                inner.tickets.insert(ticket.id, ticket);
            }
            summaries.push(TicketGroupSummary {
                ticket_type: spec.ticket_type.clone(),
                price: spec.price.clone(),
                quantity: spec.quantity,
            });
        }
        Ok(summaries)
    }

    async fn record_intent(&self, intent: NewPaymentIntent) -> Result<(), LedgerError> {
        let now = Utc::now();
        let record = PaymentIntent {
            reference: intent.reference.clone(),
            event_id: intent.event_id,
            ticket_ids: intent.ticket_ids,
            amount: intent.amount,
            currency: intent.currency,
            status: intent.status,
            created_at: now,
            updated_at: now,
        };
        self.inner.lock().intents.insert(intent.reference, record);
        Ok(())
    }

    async fn resolve_intent(
        &self,
        reference: &str,
        outcome: PaymentOutcome,
    ) -> Result<IntentResolution, LedgerError> {
        let mut inner = self.inner.lock();
        let status = inner
            .intents
            .get(reference)
            .map(|intent| IntentStatus::parse(&intent.status))
            .ok_or_else(|| LedgerError::UnknownReference(reference.to_string()))?;

        match status {
            Some(IntentStatus::Pending) => {
                let ticket_ids = inner
                    .intents
                    .get(reference)
                    .map(|intent| intent.ticket_ids.clone())
                    .unwrap_or_default();
                let finalize = outcome.finalize_outcome();
                inner.finalize_set(&ticket_ids, finalize)?;
                if let Some(intent) = inner.intents.get_mut(reference) {
                    intent.status = outcome.intent_status().as_str().to_string();
                    intent.updated_at = Utc::now();
                }
                Ok(IntentResolution::Applied(finalize))
            }
            Some(IntentStatus::Expired) => Ok(IntentResolution::Expired),
            _ => Ok(IntentResolution::AlreadyResolved),
        }
    }

    async fn sweep_expired(&self, ttl: Duration) -> Result<SweepReport, LedgerError> {
        let cutoff = Utc::now() - ttl;
        let mut inner = self.inner.lock();
        let mut report = SweepReport::default();

        let stale: Vec<String> = inner
            .intents
            .values()
            .filter(|i| {
                IntentStatus::parse(&i.status) == Some(IntentStatus::Pending)
                    && i.created_at < cutoff
            })
            .map(|i| i.reference.clone())
            .collect();

        for reference in stale {
            let ticket_ids = inner
                .intents
                .get(&reference)
                .map(|intent| intent.ticket_ids.clone())
                .unwrap_or_default();
            for id in ticket_ids {
                if let Some(ticket) = inner.tickets.get_mut(&id) {
                    if ticket.status() == Some(TicketStatus::Pending) {
                        ticket.status = TicketStatus::Available.as_str().to_string();
                        ticket.updated_at = Utc::now();
                        report.released_tickets += 1;
                    }
                }
            }
            if let Some(intent) = inner.intents.get_mut(&reference) {
                intent.status = IntentStatus::Expired.as_str().to_string();
                intent.updated_at = Utc::now();
            }
            report.expired_intents += 1;
        }

        let protected: HashSet<Uuid> = inner
            .intents
            .values()
            .filter(|i| IntentStatus::parse(&i.status) == Some(IntentStatus::Pending))
            .flat_map(|i| i.ticket_ids.iter().copied())
            .collect();

        let orphans: Vec<Uuid> = inner
            .tickets
            .values()
            .filter(|t| {
                t.status() == Some(TicketStatus::Pending)
                    && t.updated_at < cutoff
                    && !protected.contains(&t.id)
            })
            .map(|t| t.id)
            .collect();
        for id in orphans {
            if let Some(ticket) = inner.tickets.get_mut(&id) {
                ticket.status = TicketStatus::Available.as_str().to_string();
                ticket.updated_at = Utc::now();
                report.released_tickets += 1;
            }
        }

        Ok(report)
    }
}
