//! The ledger contract: every operation that may move a ticket through the
//! state machine, and the reservation bookkeeping around it.

use crate::error::LedgerError;
use crate::models::{
    FinalizeOutcome, NewPaymentIntent, PaymentOutcome, Ticket, TicketBatchSpec, TicketGroupSummary,
};
use bigdecimal::BigDecimal;
use std::future::Future;
use uuid::Uuid;

/// A successful claim on inventory: the exact ids now held `pending` and
/// the summed price of those rows.
#[derive(Debug, Clone)]
pub struct Reservation {
    pub ticket_ids: Vec<Uuid>,
    pub total: BigDecimal,
}

/// What a webhook delivery did to the referenced intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentResolution {
    /// The intent was pending; its tickets were finalized with this outcome.
    Applied(FinalizeOutcome),
    /// Duplicate delivery; the intent was already resolved. No-op.
    AlreadyResolved,
    /// The hold lapsed and was swept before the provider answered. No
    /// ticket was mutated; the delivery needs manual reconciliation.
    Expired,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SweepReport {
    pub expired_intents: usize,
    pub released_tickets: usize,
}

/// The inventory ledger.
///
/// Implementations must make every operation atomic (all-or-nothing) and
/// must uphold the concurrency property: across any set of concurrent
/// `reserve` calls, no ticket id is handed to two callers before one of
/// them finalizes it, and tickets moved out of `available` never exceed
/// the number available at the start.
pub trait Ledger: Send + Sync {
    /// Claim `quantity` available tickets of one type, moving them to
    /// `pending`. Rows locked by a concurrent in-flight reservation are
    /// skipped rather than waited on, so a contending caller fails fast
    /// with `InsufficientInventory` instead of queueing.
    fn reserve(
        &self,
        event_id: Uuid,
        ticket_type: &str,
        quantity: i64,
    ) -> impl Future<Output = Result<Reservation, LedgerError>> + Send;

    /// Move a set of pending tickets to `sold` or back to `available`.
    /// Idempotent under retried delivery: ids already at the outcome's
    /// target are treated as success.
    fn finalize(
        &self,
        ticket_ids: &[Uuid],
        outcome: FinalizeOutcome,
    ) -> impl Future<Output = Result<(), LedgerError>> + Send;

    /// `sold -> refunded`, returning the updated record.
    fn refund(&self, ticket_id: Uuid) -> impl Future<Output = Result<Ticket, LedgerError>> + Send;

    /// Bulk-create available inventory for an existing event.
    fn provision_batch(
        &self,
        event_id: Uuid,
        specs: &[TicketBatchSpec],
    ) -> impl Future<Output = Result<Vec<TicketGroupSummary>, LedgerError>> + Send;

    /// Persist the reservation record once the provider has authorized.
    fn record_intent(
        &self,
        intent: NewPaymentIntent,
    ) -> impl Future<Output = Result<(), LedgerError>> + Send;

    /// Apply a provider webhook to the referenced intent and its tickets.
    fn resolve_intent(
        &self,
        reference: &str,
        outcome: PaymentOutcome,
    ) -> impl Future<Output = Result<IntentResolution, LedgerError>> + Send;

    /// Recovery path for reservations whose confirmation never arrived:
    /// expire intents pending longer than `ttl` and release their tickets,
    /// along with any orphaned pending tickets no unresolved intent claims.
    fn sweep_expired(
        &self,
        ttl: chrono::Duration,
    ) -> impl Future<Output = Result<SweepReport, LedgerError>> + Send;
}
