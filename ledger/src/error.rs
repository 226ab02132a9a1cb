//! Error taxonomy for ledger operations.

use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum LedgerError {
    /// Fewer tickets were available than requested; nothing was reserved.
    #[error("not enough tickets available (requested {requested}, available {available})")]
    InsufficientInventory { requested: i64, available: i64 },

    /// A finalize target was in a state other than `pending` or the
    /// outcome's target status.
    #[error("ticket {0} is not pending")]
    TicketNotPending(Uuid),

    /// Refund requested for a ticket that is not `sold`.
    #[error("ticket {0} is not eligible for refund")]
    NotRefundable(Uuid),

    #[error("event {0} not found")]
    EventNotFound(Uuid),

    /// Webhook delivery for a payment reference we never recorded.
    #[error("unknown payment reference {0}")]
    UnknownReference(String),

    #[error("invalid quantity {0} (must be positive)")]
    InvalidQuantity(i64),

    #[error("storage error: {0}")]
    Storage(#[from] diesel::result::Error),

    #[error("connection pool error: {0}")]
    Pool(String),
}

impl From<bb8::RunError<diesel_async::pooled_connection::PoolError>> for LedgerError {
    fn from(err: bb8::RunError<diesel_async::pooled_connection::PoolError>) -> Self {
        LedgerError::Pool(err.to_string())
    }
}

impl LedgerError {
    /// Whether retrying the whole unit of work may succeed. Precondition
    /// violations never are; lost connections and serialization failures
    /// may be.
    pub fn is_transient(&self) -> bool {
        use diesel::result::{DatabaseErrorKind, Error};

        match self {
            LedgerError::Pool(_) => true,
            LedgerError::Storage(Error::DatabaseError(kind, _)) => matches!(
                kind,
                DatabaseErrorKind::SerializationFailure | DatabaseErrorKind::ClosedConnection
            ),
            _ => false,
        }
    }
}
