//! Background reconciliation of reservations whose payment confirmation
//! never arrived. Without this, a provider timeout would leave tickets
//! `pending` forever.

use ledger::{Ledger, PgLedger};
use std::time::Duration;
use tokio::time;
use tracing::{error, info};

pub struct Sweeper {
    ledger: PgLedger,
    ttl: chrono::Duration,
    interval: Duration,
}

impl Sweeper {
    pub fn new(ledger: PgLedger, pending_ttl_secs: u64, sweep_interval_secs: u64) -> Self {
        Self {
            ledger,
            ttl: chrono::Duration::seconds(pending_ttl_secs as i64),
            interval: Duration::from_secs(sweep_interval_secs),
        }
    }

    pub async fn run(&self) {
        let mut interval = time::interval(self.interval);

        loop {
            interval.tick().await;

            match self.ledger.sweep_expired(self.ttl).await {
                Ok(report) if report.expired_intents > 0 || report.released_tickets > 0 => {
                    info!(
                        expired_intents = report.expired_intents,
                        released_tickets = report.released_tickets,
                        "swept stale reservations"
                    );
                }
                Ok(_) => {}
                Err(e) => error!("Error sweeping stale reservations: {}", e),
            }
        }
    }
}
