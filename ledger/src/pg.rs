//! PostgreSQL-backed ledger.
//!
//! Every status mutation runs inside a transaction holding row locks on the
//! affected ticket rows. Reservation uses `FOR UPDATE SKIP LOCKED` so
//! concurrent buyers contending for the same type never queue behind each
//! other's locks; they either claim disjoint rows or fail fast.

use bigdecimal::BigDecimal;
use chrono::{Duration, Utc};
use diesel::prelude::*;
use diesel_async::{pooled_connection::bb8::Pool, AsyncConnection, AsyncPgConnection, RunQueryDsl};
use std::collections::HashSet;
use std::future::Future;
use tracing::warn;
use uuid::Uuid;

use crate::error::LedgerError;
use crate::models::{
    FinalizeOutcome, IntentStatus, NewPaymentIntent, NewTicket, PaymentIntent, PaymentOutcome,
    Ticket, TicketBatchSpec, TicketGroupSummary, TicketStatus,
};
use crate::schema::{events, payment_intents, tickets};
use crate::store::{IntentResolution, Ledger, Reservation, SweepReport};

type DbPool = Pool<AsyncPgConnection>;

/// Rows per INSERT statement when provisioning; keeps bind-parameter counts
/// well under the postgres limit for multi-thousand batches.
const INSERT_CHUNK: usize = 1_000;

/// Attempts per unit of work before a transient storage failure surfaces.
const MAX_ATTEMPTS: u32 = 3;

#[derive(Clone)]
pub struct PgLedger {
    pool: DbPool,
}

impl PgLedger {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn try_reserve(
        &self,
        event_id: Uuid,
        ticket_type: &str,
        quantity: i64,
    ) -> Result<Reservation, LedgerError> {
        let mut conn = self.pool.get().await?;
        conn.transaction::<_, LedgerError, _>(|conn| {
            Box::pin(async move {
                let candidates: Vec<(Uuid, BigDecimal)> = tickets::table
                    .select((tickets::id, tickets::price))
                    .filter(tickets::event_id.eq(event_id))
                    .filter(tickets::ticket_type.eq(ticket_type))
                    .filter(tickets::status.eq(TicketStatus::Available.as_str()))
                    .limit(quantity)
                    .for_update()
                    .skip_locked()
                    .load(conn)
                    .await?;

                if (candidates.len() as i64) < quantity {
                    return Err(LedgerError::InsufficientInventory {
                        requested: quantity,
                        available: candidates.len() as i64,
                    });
                }

                let ticket_ids: Vec<Uuid> = candidates.iter().map(|(id, _)| *id).collect();
                diesel::update(tickets::table.filter(tickets::id.eq_any(&ticket_ids)))
                    .set((
                        tickets::status.eq(TicketStatus::Pending.as_str()),
                        tickets::updated_at.eq(Utc::now()),
                    ))
                    .execute(conn)
                    .await?;

                let total = candidates
                    .into_iter()
                    .fold(BigDecimal::from(0), |acc, (_, price)| acc + price);
                Ok(Reservation { ticket_ids, total })
            })
        })
        .await
    }

    async fn try_finalize(
        &self,
        ticket_ids: &[Uuid],
        outcome: FinalizeOutcome,
    ) -> Result<(), LedgerError> {
        let mut conn = self.pool.get().await?;
        conn.transaction::<_, LedgerError, _>(|conn| {
            Box::pin(async move { finalize_in_tx(conn, ticket_ids, outcome).await })
        })
        .await
    }

    async fn try_refund(&self, ticket_id: Uuid) -> Result<Ticket, LedgerError> {
        let mut conn = self.pool.get().await?;
        conn.transaction::<_, LedgerError, _>(|conn| {
            Box::pin(async move {
                let ticket: Option<Ticket> = tickets::table
                    .find(ticket_id)
                    .for_update()
                    .first(conn)
                    .await
                    .optional()?;
                let ticket = ticket.ok_or(LedgerError::NotRefundable(ticket_id))?;
                if ticket.status() != Some(TicketStatus::Sold) {
                    return Err(LedgerError::NotRefundable(ticket_id));
                }

                let updated: Ticket = diesel::update(tickets::table.find(ticket_id))
                    .set((
                        tickets::status.eq(TicketStatus::Refunded.as_str()),
                        tickets::updated_at.eq(Utc::now()),
                    ))
                    .get_result(conn)
                    .await?;
                Ok(updated)
            })
        })
        .await
    }

    async fn try_provision_batch(
        &self,
        event_id: Uuid,
        specs: &[TicketBatchSpec],
    ) -> Result<Vec<TicketGroupSummary>, LedgerError> {
        let mut conn = self.pool.get().await?;
        conn.transaction::<_, LedgerError, _>(|conn| {
            Box::pin(async move {
                let exists: Option<Uuid> = events::table
                    .find(event_id)
                    .select(events::id)
                    .first(conn)
                    .await
                    .optional()?;
                if exists.is_none() {
                    return Err(LedgerError::EventNotFound(event_id));
                }

                let mut summaries = Vec::with_capacity(specs.len());
                for spec in specs {
                    if spec.quantity <= 0 {
                        return Err(LedgerError::InvalidQuantity(spec.quantity));
                    }
                    let rows: Vec<NewTicket> = (0..spec.quantity)
                        .map(|_| NewTicket {
                            id: Uuid::new_v4(),
                            event_id,
                            ticket_type: spec.ticket_type.clone(),
                            price: spec.price.clone(),
                            status: TicketStatus::Available.as_str().to_string(),
                        })
                        .collect();

                    let mut inserted = 0;
                    for chunk in rows.chunks(INSERT_CHUNK) {
                        inserted += diesel::insert_into(tickets::table)
                            .values(chunk)
                            .execute(conn)
                            .await?;
                    }
                    summaries.push(TicketGroupSummary {
                        ticket_type: spec.ticket_type.clone(),
                        price: spec.price.clone(),
                        quantity: inserted as i64,
                    });
                }
                Ok(summaries)
            })
        })
        .await
    }

    async fn try_record_intent(&self, intent: NewPaymentIntent) -> Result<(), LedgerError> {
        let mut conn = self.pool.get().await?;
        diesel::insert_into(payment_intents::table)
            .values(&intent)
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn try_resolve_intent(
        &self,
        reference: &str,
        outcome: PaymentOutcome,
    ) -> Result<IntentResolution, LedgerError> {
        let mut conn = self.pool.get().await?;
        conn.transaction::<_, LedgerError, _>(|conn| {
            Box::pin(async move {
                let intent: Option<PaymentIntent> = payment_intents::table
                    .find(reference)
                    .for_update()
                    .first(conn)
                    .await
                    .optional()?;
                let Some(intent) = intent else {
                    return Err(LedgerError::UnknownReference(reference.to_string()));
                };

                match IntentStatus::parse(&intent.status) {
                    Some(IntentStatus::Pending) => {
                        let finalize = outcome.finalize_outcome();
                        finalize_in_tx(conn, &intent.ticket_ids, finalize).await?;
                        diesel::update(payment_intents::table.find(reference))
                            .set((
                                payment_intents::status.eq(outcome.intent_status().as_str()),
                                payment_intents::updated_at.eq(Utc::now()),
                            ))
                            .execute(conn)
                            .await?;
                        Ok(IntentResolution::Applied(finalize))
                    }
                    Some(IntentStatus::Expired) => Ok(IntentResolution::Expired),
                    _ => Ok(IntentResolution::AlreadyResolved),
                }
            })
        })
        .await
    }

    async fn try_sweep_expired(&self, ttl: Duration) -> Result<SweepReport, LedgerError> {
        let cutoff = Utc::now() - ttl;
        let mut conn = self.pool.get().await?;
        conn.transaction::<_, LedgerError, _>(|conn| {
            Box::pin(async move {
                let stale: Vec<PaymentIntent> = payment_intents::table
                    .filter(payment_intents::status.eq(IntentStatus::Pending.as_str()))
                    .filter(payment_intents::created_at.lt(cutoff))
                    .for_update()
                    .skip_locked()
                    .load(conn)
                    .await?;

                let mut released = 0;
                for intent in &stale {
                    released += diesel::update(
                        tickets::table
                            .filter(tickets::id.eq_any(&intent.ticket_ids))
                            .filter(tickets::status.eq(TicketStatus::Pending.as_str())),
                    )
                    .set((
                        tickets::status.eq(TicketStatus::Available.as_str()),
                        tickets::updated_at.eq(Utc::now()),
                    ))
                    .execute(conn)
                    .await?;

                    diesel::update(payment_intents::table.find(&intent.reference))
                        .set((
                            payment_intents::status.eq(IntentStatus::Expired.as_str()),
                            payment_intents::updated_at.eq(Utc::now()),
                        ))
                        .execute(conn)
                        .await?;
                }

                // Pending rows no unresolved intent claims: a checkout that
                // died between its reserve commit and the intent insert.
                let protected: Vec<Vec<Uuid>> = payment_intents::table
                    .filter(payment_intents::status.eq(IntentStatus::Pending.as_str()))
                    .select(payment_intents::ticket_ids)
                    .load(conn)
                    .await?;
                let protected: Vec<Uuid> = protected.into_iter().flatten().collect();

                let orphans = diesel::update(
                    tickets::table
                        .filter(tickets::status.eq(TicketStatus::Pending.as_str()))
                        .filter(tickets::updated_at.lt(cutoff))
                        .filter(tickets::id.ne_all(&protected)),
                )
                .set((
                    tickets::status.eq(TicketStatus::Available.as_str()),
                    tickets::updated_at.eq(Utc::now()),
                ))
                .execute(conn)
                .await?;

                Ok(SweepReport {
                    expired_intents: stale.len(),
                    released_tickets: released + orphans,
                })
            })
        })
        .await
    }
}

/// Finalize a set of ticket rows inside an already-open transaction. Used
/// by both the standalone `finalize` and webhook resolution, so both share
/// one idempotency rule: rows already at the target are success, rows in
/// any third state abort the whole set.
async fn finalize_in_tx(
    conn: &mut AsyncPgConnection,
    ticket_ids: &[Uuid],
    outcome: FinalizeOutcome,
) -> Result<(), LedgerError> {
    if ticket_ids.is_empty() {
        return Ok(());
    }
    let target = outcome.target();

    let rows: Vec<(Uuid, String)> = tickets::table
        .select((tickets::id, tickets::status))
        .filter(tickets::id.eq_any(ticket_ids))
        .for_update()
        .load(conn)
        .await?;

    if rows.len() != ticket_ids.len() {
        let found: HashSet<Uuid> = rows.iter().map(|(id, _)| *id).collect();
        let missing = ticket_ids
            .iter()
            .find(|id| !found.contains(id))
            .copied()
            .unwrap_or_default();
        return Err(LedgerError::TicketNotPending(missing));
    }

    let mut to_move = Vec::new();
    for (id, status) in &rows {
        match TicketStatus::parse(status) {
            Some(status) if status == target => {}
            Some(TicketStatus::Pending) => to_move.push(*id),
            _ => return Err(LedgerError::TicketNotPending(*id)),
        }
    }

    if !to_move.is_empty() {
        diesel::update(tickets::table.filter(tickets::id.eq_any(&to_move)))
            .set((
                tickets::status.eq(target.as_str()),
                tickets::updated_at.eq(Utc::now()),
            ))
            .execute(conn)
            .await?;
    }
    Ok(())
}

/// Re-run a unit of work on transient storage failures, up to
/// `MAX_ATTEMPTS` tries. Precondition violations return immediately.
async fn with_retry<T, F, Fut>(operation: &'static str, mut run: F) -> Result<T, LedgerError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, LedgerError>>,
{
    let mut attempt = 1;
    loop {
        match run().await {
            Err(err) if err.is_transient() && attempt < MAX_ATTEMPTS => {
                warn!("{operation} attempt {attempt} hit a transient storage error: {err}");
                attempt += 1;
            }
            other => return other,
        }
    }
}

impl Ledger for PgLedger {
    async fn reserve(
        &self,
        event_id: Uuid,
        ticket_type: &str,
        quantity: i64,
    ) -> Result<Reservation, LedgerError> {
        if quantity <= 0 {
            return Err(LedgerError::InvalidQuantity(quantity));
        }
        with_retry("reserve", || {
            self.try_reserve(event_id, ticket_type, quantity)
        })
        .await
    }

    async fn finalize(
        &self,
        ticket_ids: &[Uuid],
        outcome: FinalizeOutcome,
    ) -> Result<(), LedgerError> {
        with_retry("finalize", || self.try_finalize(ticket_ids, outcome)).await
    }

    async fn refund(&self, ticket_id: Uuid) -> Result<Ticket, LedgerError> {
        with_retry("refund", || self.try_refund(ticket_id)).await
    }

    async fn provision_batch(
        &self,
        event_id: Uuid,
        specs: &[TicketBatchSpec],
    ) -> Result<Vec<TicketGroupSummary>, LedgerError> {
        with_retry("provision_batch", || {
            self.try_provision_batch(event_id, specs)
        })
        .await
    }

    async fn record_intent(&self, intent: NewPaymentIntent) -> Result<(), LedgerError> {
        with_retry("record_intent", || self.try_record_intent(intent.clone())).await
    }

    async fn resolve_intent(
        &self,
        reference: &str,
        outcome: PaymentOutcome,
    ) -> Result<IntentResolution, LedgerError> {
        with_retry("resolve_intent", || {
            self.try_resolve_intent(reference, outcome)
        })
        .await
    }

    async fn sweep_expired(&self, ttl: Duration) -> Result<SweepReport, LedgerError> {
        with_retry("sweep_expired", || self.try_sweep_expired(ttl)).await
    }
}
