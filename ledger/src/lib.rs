//! Ticket inventory ledger for the CultureTicks service.
//!
//! The ledger owns the ticket status state machine
//! (`available -> pending -> sold`, with `pending -> available` on release
//! and `sold -> refunded` on refund) and every rule about how tickets move
//! through it. Two implementations of the [`store::Ledger`] contract are
//! provided: [`pg::PgLedger`] backed by PostgreSQL row locks, and
//! [`memory::MemoryLedger`], a mutex-guarded allocator used by the contract
//! test suite.

pub mod error;
pub mod memory;
pub mod models;
pub mod pg;
pub mod schema;
pub mod store;

pub use error::LedgerError;
pub use memory::MemoryLedger;
pub use models::{
    FinalizeOutcome, IntentStatus, NewPaymentIntent, PaymentOutcome, Ticket, TicketBatchSpec,
    TicketGroupSummary, TicketStatus,
};
pub use pg::PgLedger;
pub use store::{IntentResolution, Ledger, Reservation, SweepReport};
