//! Contract tests for the ledger state machine, run against the in-memory
//! implementation so the whole suite needs no external services.

use bigdecimal::BigDecimal;
use futures::future::join_all;
use ledger::{
    FinalizeOutcome, IntentResolution, IntentStatus, Ledger, LedgerError, MemoryLedger,
    NewPaymentIntent, PaymentOutcome, TicketBatchSpec, TicketStatus,
};
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

const GENERAL: &str = "General";

fn price(s: &str) -> BigDecimal {
    BigDecimal::from_str(s).unwrap()
}

async fn seeded(quantity: i64) -> (MemoryLedger, Uuid) {
    let ledger = MemoryLedger::new();
    let event_id = Uuid::new_v4();
    ledger.register_event(event_id);
    ledger
        .provision_batch(
            event_id,
            &[TicketBatchSpec {
                ticket_type: GENERAL.to_string(),
                price: price("50.00"),
                quantity,
            }],
        )
        .await
        .unwrap();
    (ledger, event_id)
}

fn pending_intent(reference: &str, event_id: Uuid, ticket_ids: &[Uuid]) -> NewPaymentIntent {
    NewPaymentIntent {
        reference: reference.to_string(),
        event_id,
        ticket_ids: ticket_ids.to_vec(),
        amount: price("300.00"),
        currency: "usd".to_string(),
        status: IntentStatus::Pending.as_str().to_string(),
    }
}

#[tokio::test]
async fn provision_creates_available_inventory() {
    let ledger = MemoryLedger::new();
    let event_id = Uuid::new_v4();
    ledger.register_event(event_id);

    let summaries = ledger
        .provision_batch(
            event_id,
            &[
                TicketBatchSpec {
                    ticket_type: GENERAL.to_string(),
                    price: price("49.99"),
                    quantity: 100,
                },
                TicketBatchSpec {
                    ticket_type: "VIP".to_string(),
                    price: price("149.99"),
                    quantity: 20,
                },
            ],
        )
        .await
        .unwrap();

    assert_eq!(summaries.len(), 2);
    assert_eq!(summaries[0].quantity, 100);
    assert_eq!(summaries[1].quantity, 20);
    assert_eq!(
        ledger.count_in_status(event_id, GENERAL, TicketStatus::Available),
        100
    );
    assert_eq!(
        ledger.count_in_status(event_id, "VIP", TicketStatus::Available),
        20
    );
}

#[tokio::test]
async fn provision_unknown_event_creates_nothing() {
    let ledger = MemoryLedger::new();
    let event_id = Uuid::new_v4();

    let err = ledger
        .provision_batch(
            event_id,
            &[TicketBatchSpec {
                ticket_type: GENERAL.to_string(),
                price: price("49.99"),
                quantity: 100,
            }],
        )
        .await
        .unwrap_err();

    assert!(matches!(err, LedgerError::EventNotFound(id) if id == event_id));
    assert_eq!(ledger.ticket_count(), 0);
}

#[tokio::test]
async fn provision_rejects_nonpositive_quantities() {
    let ledger = MemoryLedger::new();
    let event_id = Uuid::new_v4();
    ledger.register_event(event_id);

    let err = ledger
        .provision_batch(
            event_id,
            &[TicketBatchSpec {
                ticket_type: GENERAL.to_string(),
                price: price("49.99"),
                quantity: 0,
            }],
        )
        .await
        .unwrap_err();

    assert!(matches!(err, LedgerError::InvalidQuantity(0)));
    assert_eq!(ledger.ticket_count(), 0);
}

#[tokio::test]
async fn reserve_moves_exactly_the_claimed_tickets_to_pending() {
    let (ledger, event_id) = seeded(10).await;

    let reservation = ledger.reserve(event_id, GENERAL, 4).await.unwrap();
    assert_eq!(reservation.ticket_ids.len(), 4);
    assert_eq!(reservation.total, price("200.00"));

    for id in &reservation.ticket_ids {
        assert_eq!(ledger.status_of(*id), Some(TicketStatus::Pending));
    }
    assert_eq!(
        ledger.count_in_status(event_id, GENERAL, TicketStatus::Available),
        6
    );
    assert_eq!(
        ledger.count_in_status(event_id, GENERAL, TicketStatus::Pending),
        4
    );
}

#[tokio::test]
async fn reserve_rejects_nonpositive_quantity() {
    let (ledger, event_id) = seeded(10).await;

    assert!(matches!(
        ledger.reserve(event_id, GENERAL, 0).await.unwrap_err(),
        LedgerError::InvalidQuantity(0)
    ));
    assert!(matches!(
        ledger.reserve(event_id, GENERAL, -3).await.unwrap_err(),
        LedgerError::InvalidQuantity(-3)
    ));
}

#[tokio::test]
async fn failed_reserve_leaves_no_partial_hold() {
    let (ledger, event_id) = seeded(10).await;

    let err = ledger.reserve(event_id, GENERAL, 11).await.unwrap_err();
    assert!(matches!(
        err,
        LedgerError::InsufficientInventory {
            requested: 11,
            available: 10
        }
    ));

    assert_eq!(
        ledger.count_in_status(event_id, GENERAL, TicketStatus::Available),
        10
    );
    assert_eq!(
        ledger.count_in_status(event_id, GENERAL, TicketStatus::Pending),
        0
    );
}

#[tokio::test]
async fn reserve_then_sold_roundtrip() {
    let (ledger, event_id) = seeded(10).await;

    let reservation = ledger.reserve(event_id, GENERAL, 3).await.unwrap();
    ledger
        .finalize(&reservation.ticket_ids, FinalizeOutcome::Sold)
        .await
        .unwrap();

    for id in &reservation.ticket_ids {
        assert_eq!(ledger.status_of(*id), Some(TicketStatus::Sold));
    }
    assert_eq!(
        ledger.count_in_status(event_id, GENERAL, TicketStatus::Available),
        7
    );
}

#[tokio::test]
async fn released_tickets_can_be_reserved_again() {
    let (ledger, event_id) = seeded(4).await;

    let first = ledger.reserve(event_id, GENERAL, 4).await.unwrap();
    ledger
        .finalize(&first.ticket_ids, FinalizeOutcome::Released)
        .await
        .unwrap();
    assert_eq!(
        ledger.count_in_status(event_id, GENERAL, TicketStatus::Available),
        4
    );

    let second = ledger.reserve(event_id, GENERAL, 4).await.unwrap();
    assert_eq!(second.ticket_ids.len(), 4);
}

#[tokio::test]
async fn finalize_is_idempotent() {
    let (ledger, event_id) = seeded(5).await;

    let reservation = ledger.reserve(event_id, GENERAL, 2).await.unwrap();
    ledger
        .finalize(&reservation.ticket_ids, FinalizeOutcome::Sold)
        .await
        .unwrap();
    // Retried delivery of the same outcome is a no-op, not an error.
    ledger
        .finalize(&reservation.ticket_ids, FinalizeOutcome::Sold)
        .await
        .unwrap();

    for id in &reservation.ticket_ids {
        assert_eq!(ledger.status_of(*id), Some(TicketStatus::Sold));
    }
}

#[tokio::test]
async fn finalize_rejects_tickets_in_a_third_state() {
    let (ledger, event_id) = seeded(5).await;

    let reservation = ledger.reserve(event_id, GENERAL, 1).await.unwrap();
    let id = reservation.ticket_ids[0];
    ledger
        .finalize(&reservation.ticket_ids, FinalizeOutcome::Sold)
        .await
        .unwrap();
    ledger.refund(id).await.unwrap();

    let err = ledger
        .finalize(&reservation.ticket_ids, FinalizeOutcome::Sold)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::TicketNotPending(bad) if bad == id));
    assert_eq!(ledger.status_of(id), Some(TicketStatus::Refunded));
}

#[tokio::test]
async fn finalize_never_touches_unreserved_tickets() {
    let (ledger, event_id) = seeded(2).await;

    let reservation = ledger.reserve(event_id, GENERAL, 1).await.unwrap();
    let unknown = Uuid::new_v4();
    let mut ids = reservation.ticket_ids.clone();
    ids.push(unknown);

    let err = ledger
        .finalize(&ids, FinalizeOutcome::Sold)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::TicketNotPending(bad) if bad == unknown));
    // The known ticket stays pending: all-or-nothing.
    assert_eq!(
        ledger.status_of(reservation.ticket_ids[0]),
        Some(TicketStatus::Pending)
    );
}

#[tokio::test]
async fn refund_only_succeeds_on_sold_tickets() {
    let (ledger, event_id) = seeded(3).await;

    let reservation = ledger.reserve(event_id, GENERAL, 1).await.unwrap();
    let id = reservation.ticket_ids[0];

    // Pending is not refundable.
    assert!(matches!(
        ledger.refund(id).await.unwrap_err(),
        LedgerError::NotRefundable(bad) if bad == id
    ));

    ledger
        .finalize(&reservation.ticket_ids, FinalizeOutcome::Sold)
        .await
        .unwrap();
    let refunded = ledger.refund(id).await.unwrap();
    assert_eq!(refunded.status(), Some(TicketStatus::Refunded));

    // Refunded is terminal: no second refund, no re-sale.
    assert!(matches!(
        ledger.refund(id).await.unwrap_err(),
        LedgerError::NotRefundable(bad) if bad == id
    ));
    assert_eq!(
        ledger.count_in_status(event_id, GENERAL, TicketStatus::Available),
        2
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_reserves_never_oversell_or_overlap() {
    let (ledger, event_id) = seeded(10).await;
    let ledger = Arc::new(ledger);

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let ledger = Arc::clone(&ledger);
            tokio::spawn(async move { ledger.reserve(event_id, GENERAL, 2).await })
        })
        .collect();

    let mut claimed = HashSet::new();
    let mut successes = 0;
    for result in join_all(tasks).await {
        match result.unwrap() {
            Ok(reservation) => {
                successes += 1;
                assert_eq!(reservation.ticket_ids.len(), 2);
                for id in reservation.ticket_ids {
                    // No id may ever be handed to two callers.
                    assert!(claimed.insert(id));
                }
            }
            Err(err) => assert!(matches!(err, LedgerError::InsufficientInventory { .. })),
        }
    }

    assert!(successes <= 5);
    assert_eq!(claimed.len(), successes * 2);
    assert_eq!(
        ledger.count_in_status(event_id, GENERAL, TicketStatus::Pending),
        claimed.len()
    );
    assert_eq!(
        ledger.count_in_status(event_id, GENERAL, TicketStatus::Available),
        10 - claimed.len()
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn contended_reserve_of_six_from_ten_yields_one_winner() {
    let (ledger, event_id) = seeded(10).await;
    let ledger = Arc::new(ledger);

    let tasks: Vec<_> = (0..2)
        .map(|_| {
            let ledger = Arc::clone(&ledger);
            tokio::spawn(async move { ledger.reserve(event_id, GENERAL, 6).await })
        })
        .collect();

    let mut winners = Vec::new();
    let mut failures = 0;
    for result in join_all(tasks).await {
        match result.unwrap() {
            Ok(reservation) => winners.push(reservation.ticket_ids),
            Err(err) => {
                assert!(matches!(err, LedgerError::InsufficientInventory { .. }));
                failures += 1;
            }
        }
    }

    // 6 + 6 > 10: exactly one caller can win.
    assert_eq!(winners.len(), 1);
    assert_eq!(failures, 1);
    assert_eq!(winners[0].len(), 6);
    assert_eq!(
        ledger.count_in_status(event_id, GENERAL, TicketStatus::Available),
        4
    );
}

#[tokio::test]
async fn webhook_success_sells_and_duplicate_delivery_is_a_noop() {
    let (ledger, event_id) = seeded(6).await;

    let reservation = ledger.reserve(event_id, GENERAL, 3).await.unwrap();
    ledger
        .record_intent(pending_intent("pi_ok", event_id, &reservation.ticket_ids))
        .await
        .unwrap();

    let first = ledger
        .resolve_intent("pi_ok", PaymentOutcome::Succeeded)
        .await
        .unwrap();
    assert_eq!(first, IntentResolution::Applied(FinalizeOutcome::Sold));

    let second = ledger
        .resolve_intent("pi_ok", PaymentOutcome::Succeeded)
        .await
        .unwrap();
    assert_eq!(second, IntentResolution::AlreadyResolved);

    for id in &reservation.ticket_ids {
        assert_eq!(ledger.status_of(*id), Some(TicketStatus::Sold));
    }
}

#[tokio::test]
async fn webhook_failure_releases_the_hold() {
    let (ledger, event_id) = seeded(6).await;

    let reservation = ledger.reserve(event_id, GENERAL, 3).await.unwrap();
    ledger
        .record_intent(pending_intent("pi_bad", event_id, &reservation.ticket_ids))
        .await
        .unwrap();

    let resolution = ledger
        .resolve_intent("pi_bad", PaymentOutcome::Failed)
        .await
        .unwrap();
    assert_eq!(resolution, IntentResolution::Applied(FinalizeOutcome::Released));
    assert_eq!(
        ledger.count_in_status(event_id, GENERAL, TicketStatus::Available),
        6
    );
}

#[tokio::test]
async fn webhook_for_unknown_reference_fails() {
    let ledger = MemoryLedger::new();
    let err = ledger
        .resolve_intent("pi_missing", PaymentOutcome::Succeeded)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::UnknownReference(r) if r == "pi_missing"));
}

#[tokio::test]
async fn sweep_releases_lapsed_holds_and_blocks_late_webhooks() {
    let (ledger, event_id) = seeded(5).await;

    let reservation = ledger.reserve(event_id, GENERAL, 2).await.unwrap();
    ledger
        .record_intent(pending_intent("pi_slow", event_id, &reservation.ticket_ids))
        .await
        .unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let report = ledger.sweep_expired(chrono::Duration::zero()).await.unwrap();
    assert_eq!(report.expired_intents, 1);
    assert_eq!(report.released_tickets, 2);
    assert_eq!(
        ledger.count_in_status(event_id, GENERAL, TicketStatus::Available),
        5
    );

    // The provider eventually answers; the hold already lapsed, so
    // nothing is mutated.
    let resolution = ledger
        .resolve_intent("pi_slow", PaymentOutcome::Succeeded)
        .await
        .unwrap();
    assert_eq!(resolution, IntentResolution::Expired);
    assert_eq!(
        ledger.count_in_status(event_id, GENERAL, TicketStatus::Available),
        5
    );
}

#[tokio::test]
async fn sweep_releases_orphaned_pending_tickets() {
    let (ledger, event_id) = seeded(5).await;

    // A checkout that died before recording its intent.
    ledger.reserve(event_id, GENERAL, 2).await.unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let report = ledger.sweep_expired(chrono::Duration::zero()).await.unwrap();
    assert_eq!(report.expired_intents, 0);
    assert_eq!(report.released_tickets, 2);
    assert_eq!(
        ledger.count_in_status(event_id, GENERAL, TicketStatus::Available),
        5
    );
}

#[tokio::test]
async fn sweep_leaves_fresh_holds_alone() {
    let (ledger, event_id) = seeded(5).await;

    let reservation = ledger.reserve(event_id, GENERAL, 2).await.unwrap();
    ledger
        .record_intent(pending_intent("pi_fresh", event_id, &reservation.ticket_ids))
        .await
        .unwrap();

    let report = ledger
        .sweep_expired(chrono::Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(report.expired_intents, 0);
    assert_eq!(report.released_tickets, 0);
    assert_eq!(
        ledger.count_in_status(event_id, GENERAL, TicketStatus::Pending),
        2
    );
}
