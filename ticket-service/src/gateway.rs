//! Stand-in for the external payment processor.
//!
//! `authorize` is the synchronous create call; confirmation arrives later
//! through the webhook route, at-least-once. Outcomes are simulated with a
//! configurable decline rate so the full checkout path can be exercised
//! without provider credentials.

use anyhow::Result;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationStatus {
    Authorized,
    Declined,
}

#[derive(Debug, Clone)]
pub struct Authorization {
    pub reference: String,
    pub status: AuthorizationStatus,
}

#[derive(Clone)]
pub struct PaymentGateway {
    decline_rate: f64,
}

impl PaymentGateway {
    pub fn new(decline_rate: f64) -> Self {
        Self {
            decline_rate: decline_rate.clamp(0.0, 1.0),
        }
    }

    pub async fn authorize(
        &self,
        amount_cents: i64,
        currency: &str,
        event_id: Uuid,
    ) -> Result<Authorization> {
        if amount_cents <= 0 {
            anyhow::bail!("authorization amount must be positive");
        }

        let declined = rand::random::<f64>() < self.decline_rate;
        let reference = format!("pi_{}", Uuid::new_v4().simple());
        info!(
            %reference, amount_cents, currency, %event_id, declined,
            "gateway authorization"
        );

        Ok(Authorization {
            reference,
            status: if declined {
                AuthorizationStatus::Declined
            } else {
                AuthorizationStatus::Authorized
            },
        })
    }
}
