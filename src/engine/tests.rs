use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;
use ulid::Ulid;

use super::*;
use crate::model::{Contact, StayRange};

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("roomledger_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn test_engine(name: &str) -> Engine {
    Engine::new(test_wal_path(name), EngineConfig::default()).unwrap()
}

/// Engine whose holds are born already past their deadline.
fn test_engine_expired_ttl(name: &str) -> Engine {
    Engine::new(
        test_wal_path(name),
        EngineConfig {
            hold_ttl_ms: -60_000,
        },
    )
    .unwrap()
}

fn d(s: &str) -> NaiveDate {
    s.parse().unwrap()
}

fn stay(check_in: &str, check_out: &str) -> StayRange {
    StayRange::new(d(check_in), d(check_out))
}

fn contact() -> Contact {
    Contact {
        name: "Ada Lovelace".into(),
        phone: "555-0100".into(),
    }
}

async fn held_booked(engine: &Engine, day: &str) -> (u32, u32) {
    let days = engine
        .availability(1, "double", d(day), d(day) + chrono::Days::new(1))
        .await
        .unwrap();
    assert_eq!(days.len(), 1, "day {day} not provisioned");
    (days[0].held_qty, days[0].booked_qty)
}

// ── Hold creation ────────────────────────────────────────

#[tokio::test]
async fn hold_charges_every_night() {
    let engine = test_engine("hold_charges.wal");
    engine
        .provision(1, "double", d("2024-06-01"), d("2024-06-04"), 2)
        .await
        .unwrap();

    let booking = engine
        .create_hold(1, "double", stay("2024-06-01", "2024-06-04"), contact())
        .await
        .unwrap();

    assert_eq!(booking.status, BookingStatus::Hold);
    assert!(booking.hold_expires_at.is_some());
    for day in ["2024-06-01", "2024-06-02", "2024-06-03"] {
        assert_eq!(held_booked(&engine, day).await, (1, 0));
    }
}

#[tokio::test]
async fn hold_rejects_inverted_and_empty_ranges() {
    let engine = test_engine("hold_bad_range.wal");
    engine
        .provision(1, "double", d("2024-06-01"), d("2024-06-04"), 2)
        .await
        .unwrap();

    for (check_in, check_out) in [("2024-06-02", "2024-06-02"), ("2024-06-03", "2024-06-01")] {
        let err = engine
            .create_hold(1, "double", stay(check_in, check_out), contact())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidRange));
    }
}

#[tokio::test]
async fn hold_rejects_blank_contact() {
    let engine = test_engine("hold_bad_contact.wal");
    engine
        .provision(1, "double", d("2024-06-01"), d("2024-06-02"), 1)
        .await
        .unwrap();

    let err = engine
        .create_hold(
            1,
            "double",
            stay("2024-06-01", "2024-06-02"),
            Contact {
                name: "  ".into(),
                phone: "555-0100".into(),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidContact(_)));
}

#[tokio::test]
async fn hold_is_all_or_nothing_when_a_middle_day_is_full() {
    let engine = test_engine("all_or_nothing.wal");
    engine
        .provision(1, "double", d("2024-06-01"), d("2024-06-04"), 1)
        .await
        .unwrap();

    // Fill only the middle day
    engine
        .create_hold(1, "double", stay("2024-06-02", "2024-06-03"), contact())
        .await
        .unwrap();

    let err = engine
        .create_hold(1, "double", stay("2024-06-01", "2024-06-04"), contact())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Unavailable(day) if day == d("2024-06-02")));

    // The flanking days must be untouched by the failed attempt
    assert_eq!(held_booked(&engine, "2024-06-01").await, (0, 0));
    assert_eq!(held_booked(&engine, "2024-06-02").await, (1, 0));
    assert_eq!(held_booked(&engine, "2024-06-03").await, (0, 0));
}

#[tokio::test]
async fn hold_fails_on_unprovisioned_day_in_range() {
    let engine = test_engine("hold_gap.wal");
    // Provision 06-01 and 06-03 but not 06-02
    engine
        .provision(1, "double", d("2024-06-01"), d("2024-06-02"), 1)
        .await
        .unwrap();
    engine
        .provision(1, "double", d("2024-06-03"), d("2024-06-04"), 1)
        .await
        .unwrap();

    let err = engine
        .create_hold(1, "double", stay("2024-06-01", "2024-06-04"), contact())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Unavailable(day) if day == d("2024-06-02")));
    assert_eq!(held_booked(&engine, "2024-06-01").await, (0, 0));
}

#[tokio::test]
async fn concurrent_holds_for_last_unit_admit_exactly_one() {
    let engine = Arc::new(test_engine("concurrent_last_unit.wal"));
    engine
        .provision(1, "double", d("2024-06-01"), d("2024-06-03"), 1)
        .await
        .unwrap();

    let (a, b) = tokio::join!(
        {
            let engine = engine.clone();
            async move {
                engine
                    .create_hold(1, "double", stay("2024-06-01", "2024-06-03"), contact())
                    .await
            }
        },
        {
            let engine = engine.clone();
            async move {
                engine
                    .create_hold(1, "double", stay("2024-06-01", "2024-06-03"), contact())
                    .await
            }
        },
    );

    let wins = [&a, &b].iter().filter(|r| r.is_ok()).count();
    assert_eq!(wins, 1, "exactly one contender may win the last unit");
    let loss = [a, b].into_iter().find(|r| r.is_err()).unwrap();
    assert!(matches!(loss.unwrap_err(), EngineError::Unavailable(_)));

    // Never overcommitted
    assert_eq!(held_booked(&engine, "2024-06-01").await, (1, 0));
    assert_eq!(held_booked(&engine, "2024-06-02").await, (1, 0));
}

// ── Confirm / cancel ─────────────────────────────────────

#[tokio::test]
async fn confirm_moves_unit_from_held_to_booked() {
    let engine = test_engine("confirm_moves.wal");
    engine
        .provision(1, "double", d("2024-06-01"), d("2024-06-03"), 1)
        .await
        .unwrap();
    let booking = engine
        .create_hold(1, "double", stay("2024-06-01", "2024-06-03"), contact())
        .await
        .unwrap();

    let confirmed = engine.confirm(booking.id).await.unwrap();
    assert_eq!(confirmed.status, BookingStatus::Confirmed);
    assert_eq!(confirmed.hold_expires_at, None);
    assert_eq!(held_booked(&engine, "2024-06-01").await, (0, 1));
    assert_eq!(held_booked(&engine, "2024-06-02").await, (0, 1));
}

#[tokio::test]
async fn confirm_is_idempotent() {
    let engine = test_engine("confirm_idem.wal");
    engine
        .provision(1, "double", d("2024-06-01"), d("2024-06-02"), 1)
        .await
        .unwrap();
    let booking = engine
        .create_hold(1, "double", stay("2024-06-01", "2024-06-02"), contact())
        .await
        .unwrap();

    let first = engine.confirm(booking.id).await.unwrap();
    let second = engine.confirm(booking.id).await.unwrap();
    assert_eq!(first.status, second.status);
    // No extra ledger movement on the retry
    assert_eq!(held_booked(&engine, "2024-06-01").await, (0, 1));
}

#[tokio::test]
async fn confirm_unknown_id_is_not_found() {
    let engine = test_engine("confirm_missing.wal");
    let err = engine.confirm(Ulid::new()).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
}

#[tokio::test]
async fn confirm_cancelled_booking_is_invalid_state() {
    let engine = test_engine("confirm_cancelled.wal");
    engine
        .provision(1, "double", d("2024-06-01"), d("2024-06-02"), 1)
        .await
        .unwrap();
    let booking = engine
        .create_hold(1, "double", stay("2024-06-01", "2024-06-02"), contact())
        .await
        .unwrap();
    engine.cancel(booking.id).await.unwrap();

    let err = engine.confirm(booking.id).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::InvalidState(BookingStatus::Cancelled)
    ));
}

#[tokio::test]
async fn confirm_after_deadline_fails_expired_and_ledger_stays_charged() {
    let engine = test_engine_expired_ttl("confirm_expired.wal");
    engine
        .provision(1, "double", d("2024-06-01"), d("2024-06-02"), 1)
        .await
        .unwrap();
    let booking = engine
        .create_hold(1, "double", stay("2024-06-01", "2024-06-02"), contact())
        .await
        .unwrap();

    let err = engine.confirm(booking.id).await.unwrap_err();
    assert!(matches!(err, EngineError::Expired(_)));

    // Logically dead but not yet swept: still occupying held_qty
    assert_eq!(held_booked(&engine, "2024-06-01").await, (1, 0));
    assert_eq!(
        engine.get_booking(booking.id).await.unwrap().status,
        BookingStatus::Hold
    );

    // The sweep reclaims it
    assert_eq!(engine.expire_due_holds(now_ms()).await.unwrap(), 1);
    assert_eq!(held_booked(&engine, "2024-06-01").await, (0, 0));
}

#[tokio::test]
async fn cancel_releases_hold_and_is_idempotent() {
    let engine = test_engine("cancel_hold.wal");
    engine
        .provision(1, "double", d("2024-06-01"), d("2024-06-03"), 1)
        .await
        .unwrap();
    let booking = engine
        .create_hold(1, "double", stay("2024-06-01", "2024-06-03"), contact())
        .await
        .unwrap();

    let cancelled = engine.cancel(booking.id).await.unwrap();
    assert_eq!(cancelled.status, BookingStatus::Cancelled);
    assert_eq!(held_booked(&engine, "2024-06-01").await, (0, 0));

    // Retry is a success with no further effect
    let again = engine.cancel(booking.id).await.unwrap();
    assert_eq!(again.status, BookingStatus::Cancelled);
    assert_eq!(held_booked(&engine, "2024-06-01").await, (0, 0));
}

#[tokio::test]
async fn cancel_releases_confirmed_booking() {
    let engine = test_engine("cancel_confirmed.wal");
    engine
        .provision(1, "double", d("2024-06-01"), d("2024-06-02"), 1)
        .await
        .unwrap();
    let booking = engine
        .create_hold(1, "double", stay("2024-06-01", "2024-06-02"), contact())
        .await
        .unwrap();
    engine.confirm(booking.id).await.unwrap();

    engine.cancel(booking.id).await.unwrap();
    assert_eq!(held_booked(&engine, "2024-06-01").await, (0, 0));
}

#[tokio::test]
async fn cancel_works_on_expired_but_unswept_hold() {
    let engine = test_engine_expired_ttl("cancel_unswept.wal");
    engine
        .provision(1, "double", d("2024-06-01"), d("2024-06-02"), 1)
        .await
        .unwrap();
    let booking = engine
        .create_hold(1, "double", stay("2024-06-01", "2024-06-02"), contact())
        .await
        .unwrap();

    // Past its deadline, not yet swept; cancellation must not care
    let cancelled = engine.cancel(booking.id).await.unwrap();
    assert_eq!(cancelled.status, BookingStatus::Cancelled);
    assert_eq!(held_booked(&engine, "2024-06-01").await, (0, 0));

    // The sweeper must not touch it afterwards
    assert_eq!(engine.expire_due_holds(now_ms()).await.unwrap(), 0);
}

#[tokio::test]
async fn cancel_unknown_id_is_not_found() {
    let engine = test_engine("cancel_missing.wal");
    let err = engine.cancel(Ulid::new()).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
}

// ── Expiry sweep ─────────────────────────────────────────

#[tokio::test]
async fn sweep_converges_over_many_expired_holds() {
    let engine = test_engine_expired_ttl("sweep_converges.wal");
    engine
        .provision(1, "double", d("2024-06-01"), d("2024-06-03"), 10)
        .await
        .unwrap();

    for _ in 0..5 {
        engine
            .create_hold(1, "double", stay("2024-06-01", "2024-06-03"), contact())
            .await
            .unwrap();
    }

    let mut total = 0;
    for _ in 0..3 {
        total += engine.expire_due_holds(now_ms()).await.unwrap();
    }
    assert_eq!(total, 5);
    assert_eq!(held_booked(&engine, "2024-06-01").await, (0, 0));
    assert_eq!(held_booked(&engine, "2024-06-02").await, (0, 0));
}

#[tokio::test]
async fn sweep_skips_booking_rows_locked_by_live_traffic() {
    let engine = test_engine_expired_ttl("sweep_skips_locked.wal");
    engine
        .provision(1, "double", d("2024-06-01"), d("2024-06-02"), 2)
        .await
        .unwrap();

    let contended = engine
        .create_hold(1, "double", stay("2024-06-01", "2024-06-02"), contact())
        .await
        .unwrap();
    let free = engine
        .create_hold(1, "double", stay("2024-06-01", "2024-06-02"), contact())
        .await
        .unwrap();

    // Simulate a concurrent transaction holding the booking row
    let handle = engine.store.get_booking(&contended.id).unwrap();
    let guard = handle.write().await;

    // The locked row is skipped, not awaited; the free one is reclaimed
    assert_eq!(engine.expire_due_holds(now_ms()).await.unwrap(), 1);
    assert_eq!(
        engine.get_booking(free.id).await.unwrap().status,
        BookingStatus::Expired
    );
    drop(guard);

    // Next pass picks up the straggler
    assert_eq!(engine.expire_due_holds(now_ms()).await.unwrap(), 1);
}

// ── Drift handling ───────────────────────────────────────

#[tokio::test]
async fn release_floors_at_zero_under_injected_drift() {
    let engine = test_engine("drift_floor.wal");
    engine
        .provision(1, "double", d("2024-06-01"), d("2024-06-02"), 1)
        .await
        .unwrap();
    let booking = engine
        .create_hold(1, "double", stay("2024-06-01", "2024-06-02"), contact())
        .await
        .unwrap();

    // Zero the counter behind the engine's back
    let key = crate::model::DayKey {
        hotel_id: 1,
        room_type: "double".into(),
        day: d("2024-06-01"),
    };
    engine.store.get_row(&key).unwrap().write().await.held_qty = 0;

    // Cancel must floor at zero instead of underflowing
    engine.cancel(booking.id).await.unwrap();
    assert_eq!(held_booked(&engine, "2024-06-01").await, (0, 0));
}

// ── Provisioning ─────────────────────────────────────────

#[tokio::test]
async fn provision_rejects_shrink_below_outstanding_units() {
    let engine = test_engine("provision_shrink.wal");
    engine
        .provision(1, "double", d("2024-06-01"), d("2024-06-03"), 2)
        .await
        .unwrap();
    engine
        .create_hold(1, "double", stay("2024-06-01", "2024-06-03"), contact())
        .await
        .unwrap();

    let err = engine
        .provision(1, "double", d("2024-06-01"), d("2024-06-03"), 0)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::LimitExceeded(_)));
    // Unchanged
    assert_eq!(held_booked(&engine, "2024-06-01").await, (1, 0));
}

#[tokio::test]
async fn provision_resize_preserves_counters() {
    let engine = test_engine("provision_resize.wal");
    engine
        .provision(1, "double", d("2024-06-01"), d("2024-06-02"), 1)
        .await
        .unwrap();
    engine
        .create_hold(1, "double", stay("2024-06-01", "2024-06-02"), contact())
        .await
        .unwrap();

    engine
        .provision(1, "double", d("2024-06-01"), d("2024-06-02"), 5)
        .await
        .unwrap();
    let days = engine
        .availability(1, "double", d("2024-06-01"), d("2024-06-02"))
        .await
        .unwrap();
    assert_eq!(days[0].total_qty, 5);
    assert_eq!(days[0].held_qty, 1);
    assert_eq!(days[0].available, 4);
}

// ── Durability ───────────────────────────────────────────

#[tokio::test]
async fn restart_replays_bookings_and_counters() {
    let path = test_wal_path("restart_replay.wal");
    let confirmed_id;
    let held_id;
    {
        let engine = Engine::new(path.clone(), EngineConfig::default()).unwrap();
        engine
            .provision(1, "double", d("2024-06-01"), d("2024-06-03"), 2)
            .await
            .unwrap();
        let a = engine
            .create_hold(1, "double", stay("2024-06-01", "2024-06-03"), contact())
            .await
            .unwrap();
        engine.confirm(a.id).await.unwrap();
        let b = engine
            .create_hold(1, "double", stay("2024-06-01", "2024-06-02"), contact())
            .await
            .unwrap();
        let dead = engine
            .create_hold(1, "double", stay("2024-06-02", "2024-06-03"), contact())
            .await
            .unwrap();
        engine.cancel(dead.id).await.unwrap();
        confirmed_id = a.id;
        held_id = b.id;
    }

    let reopened = Engine::new(path, EngineConfig::default()).unwrap();
    assert_eq!(
        reopened.get_booking(confirmed_id).await.unwrap().status,
        BookingStatus::Confirmed
    );
    assert_eq!(
        reopened.get_booking(held_id).await.unwrap().status,
        BookingStatus::Hold
    );
    assert_eq!(held_booked(&reopened, "2024-06-01").await, (1, 1));
    assert_eq!(held_booked(&reopened, "2024-06-02").await, (0, 1));
}

#[tokio::test]
async fn compaction_preserves_observable_state() {
    let path = test_wal_path("compact_state.wal");
    let ids;
    {
        let engine = Engine::new(path.clone(), EngineConfig::default()).unwrap();
        engine
            .provision(1, "double", d("2024-06-01"), d("2024-06-03"), 3)
            .await
            .unwrap();
        let a = engine
            .create_hold(1, "double", stay("2024-06-01", "2024-06-03"), contact())
            .await
            .unwrap();
        engine.confirm(a.id).await.unwrap();
        let b = engine
            .create_hold(1, "double", stay("2024-06-01", "2024-06-02"), contact())
            .await
            .unwrap();
        let c = engine
            .create_hold(1, "double", stay("2024-06-02", "2024-06-03"), contact())
            .await
            .unwrap();
        engine.cancel(c.id).await.unwrap();

        engine.compact_wal().await.unwrap();
        assert_eq!(engine.wal_appends_since_compact().await, 0);
        ids = (a.id, b.id, c.id);
    }

    let reopened = Engine::new(path, EngineConfig::default()).unwrap();
    assert_eq!(
        reopened.get_booking(ids.0).await.unwrap().status,
        BookingStatus::Confirmed
    );
    assert_eq!(
        reopened.get_booking(ids.1).await.unwrap().status,
        BookingStatus::Hold
    );
    assert_eq!(
        reopened.get_booking(ids.2).await.unwrap().status,
        BookingStatus::Cancelled
    );
    assert_eq!(held_booked(&reopened, "2024-06-01").await, (1, 1));
    assert_eq!(held_booked(&reopened, "2024-06-02").await, (0, 1));
}

// ── End-to-end lifecycle ─────────────────────────────────

#[tokio::test]
async fn last_room_lifecycle_end_to_end() {
    let engine = test_engine("lifecycle.wal");
    engine
        .provision(7, "double", d("2024-06-01"), d("2024-06-03"), 1)
        .await
        .unwrap();

    let hold_a = engine
        .create_hold(7, "double", stay("2024-06-01", "2024-06-03"), contact())
        .await
        .unwrap();
    for day in ["2024-06-01", "2024-06-02"] {
        let days = engine
            .availability(7, "double", d(day), d(day) + chrono::Days::new(1))
            .await
            .unwrap();
        assert_eq!((days[0].held_qty, days[0].booked_qty), (1, 0));
    }

    let err = engine
        .create_hold(7, "double", stay("2024-06-01", "2024-06-03"), contact())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Unavailable(_)));

    engine.confirm(hold_a.id).await.unwrap();
    let days = engine
        .availability(7, "double", d("2024-06-01"), d("2024-06-03"))
        .await
        .unwrap();
    assert!(days.iter().all(|r| r.held_qty == 0 && r.booked_qty == 1));

    engine.cancel(hold_a.id).await.unwrap();

    // The room frees up and the retried hold wins it
    engine
        .create_hold(7, "double", stay("2024-06-01", "2024-06-03"), contact())
        .await
        .unwrap();
}
