use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use tourbook_core::memory::Fault;
use tourbook_core::{
    Actor, BookingFilter, BookingStatus, ConfirmVia, CoreError, CreateBooking, MemoryStore, NewTour,
    PaymentStatus, ReservationCoordinator, ReservationStore, Tour, TourPatch,
};
use uuid::Uuid;

const PRICE: i64 = 1_200_000;

fn setup() -> (MemoryStore, Arc<ReservationCoordinator>) {
    let store = MemoryStore::new(Duration::from_millis(200));
    let coordinator = Arc::new(ReservationCoordinator::new(Arc::new(store.clone()), 50));
    (store, coordinator)
}

async fn tour_with_seats(coordinator: &ReservationCoordinator, seats: i32) -> Tour {
    coordinator
        .create_tour(NewTour {
            name: "Sapa Trekking".into(),
            description: Some("Rice terraces".into()),
            location: "Lao Cai".into(),
            price: PRICE,
            duration_days: 3,
            departure_date: NaiveDate::from_ymd_opt(2026, 11, 20).unwrap(),
            total_seats: seats,
            image_url: None,
        })
        .await
        .unwrap()
}

fn request(user_id: Uuid, tour_id: Uuid, party_size: i32) -> CreateBooking {
    CreateBooking {
        user_id,
        tour_id,
        party_size,
        note: None,
    }
}

async fn remaining(coordinator: &ReservationCoordinator, tour_id: Uuid) -> i32 {
    coordinator.tour(tour_id).await.unwrap().remaining_seats
}

#[tokio::test]
async fn test_happy_path_booking_and_payment() {
    let (_, coordinator) = setup();
    let tour = tour_with_seats(&coordinator, 5).await;
    let user = Uuid::new_v4();

    let booking = coordinator.create_booking(request(user, tour.id, 2)).await.unwrap();
    assert_eq!(booking.status, BookingStatus::Pending);
    assert_eq!(booking.total_amount, PRICE * 2);
    assert_eq!(remaining(&coordinator, tour.id).await, 3);

    let (payment, _) = coordinator.open_payment(user, booking.id).await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Pending);
    assert_eq!(payment.amount, booking.total_amount);
    coordinator.attach_gateway_order(payment.id, "ORDER-1").await.unwrap();

    let settlement = coordinator.settle_payment("ORDER-1", Utc::now()).await.unwrap();
    assert_eq!(settlement.booking.status, BookingStatus::Confirmed);
    assert_eq!(settlement.payment.status, PaymentStatus::Completed);
    assert!(settlement.payment.completed_at.is_some());
    assert_eq!(remaining(&coordinator, tour.id).await, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_race_for_last_seat() {
    let (_, coordinator) = setup();
    let tour = tour_with_seats(&coordinator, 1).await;

    let a = tokio::spawn({
        let c = coordinator.clone();
        async move { c.create_booking(request(Uuid::new_v4(), tour.id, 1)).await }
    });
    let b = tokio::spawn({
        let c = coordinator.clone();
        async move { c.create_booking(request(Uuid::new_v4(), tour.id, 1)).await }
    });
    let results = [a.await.unwrap(), b.await.unwrap()];

    let won = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(won, 1);
    assert!(results.iter().any(|r| matches!(
        r,
        Err(CoreError::InsufficientCapacity { remaining: 0, requested: 1 })
    )));
    assert_eq!(remaining(&coordinator, tour.id).await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_no_overbooking_under_load() {
    let (_, coordinator) = setup();
    let tour = tour_with_seats(&coordinator, 10).await;

    let mut tasks = tokio::task::JoinSet::new();
    for i in 0..30 {
        let c = coordinator.clone();
        let party = (i % 3) + 1;
        tasks.spawn(async move {
            c.create_booking(request(Uuid::new_v4(), tour.id, party))
                .await
                .map(|b| b.party_size)
        });
    }

    let mut reserved = 0;
    while let Some(joined) = tasks.join_next().await {
        match joined.unwrap() {
            Ok(party) => reserved += party,
            Err(CoreError::InsufficientCapacity { .. }) | Err(CoreError::LockTimeout) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert!(reserved <= 10);
    assert_eq!(remaining(&coordinator, tour.id).await, 10 - reserved);

    let bookings = coordinator
        .list_bookings(&BookingFilter {
            tour_id: Some(tour.id),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(bookings.iter().map(|b| b.party_size).sum::<i32>(), reserved);
}

#[tokio::test]
async fn test_create_rolls_back_on_store_fault() {
    let (store, coordinator) = setup();
    let tour = tour_with_seats(&coordinator, 5).await;
    let user = Uuid::new_v4();

    store.fail_on(Fault::SetSeats);
    let err = coordinator.create_booking(request(user, tour.id, 2)).await.unwrap_err();
    assert!(matches!(err, CoreError::Storage(_)));
    store.clear_faults();

    assert_eq!(remaining(&coordinator, tour.id).await, 5);
    let bookings = coordinator.list_bookings(&BookingFilter::for_user(user)).await.unwrap();
    assert!(bookings.is_empty());
}

#[tokio::test]
async fn test_insufficient_capacity_reports_remaining() {
    let (_, coordinator) = setup();
    let tour = tour_with_seats(&coordinator, 3).await;

    let err = coordinator
        .create_booking(request(Uuid::new_v4(), tour.id, 4))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CoreError::InsufficientCapacity { remaining: 3, requested: 4 }
    ));
    assert_eq!(remaining(&coordinator, tour.id).await, 3);
}

#[tokio::test]
async fn test_cancel_restores_seats() {
    let (_, coordinator) = setup();
    let tour = tour_with_seats(&coordinator, 5).await;
    let user = Uuid::new_v4();

    let booking = coordinator.create_booking(request(user, tour.id, 2)).await.unwrap();
    assert_eq!(remaining(&coordinator, tour.id).await, 3);

    let cancelled = coordinator
        .cancel_booking(booking.id, Actor::Customer(user))
        .await
        .unwrap();
    assert_eq!(cancelled.status, BookingStatus::Cancelled);
    assert_eq!(remaining(&coordinator, tour.id).await, 5);
}

#[tokio::test]
async fn test_cancel_of_confirmed_booking_restores_seats() {
    let (_, coordinator) = setup();
    let tour = tour_with_seats(&coordinator, 5).await;
    let user = Uuid::new_v4();

    let booking = coordinator.create_booking(request(user, tour.id, 3)).await.unwrap();
    coordinator
        .confirm_booking(booking.id, ConfirmVia::AdminConfirm)
        .await
        .unwrap();
    coordinator
        .cancel_booking(booking.id, Actor::Customer(user))
        .await
        .unwrap();
    assert_eq!(remaining(&coordinator, tour.id).await, 5);
}

#[tokio::test]
async fn test_cancel_rolls_back_when_seat_release_fails() {
    let (store, coordinator) = setup();
    let tour = tour_with_seats(&coordinator, 5).await;
    let user = Uuid::new_v4();
    let booking = coordinator.create_booking(request(user, tour.id, 2)).await.unwrap();

    store.fail_on(Fault::SetSeats);
    let err = coordinator
        .cancel_booking(booking.id, Actor::Customer(user))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Storage(_)));
    store.clear_faults();

    let stored = coordinator.booking(booking.id, None).await.unwrap();
    assert_eq!(stored.status, BookingStatus::Pending);
    assert_eq!(remaining(&coordinator, tour.id).await, 3);
}

#[tokio::test]
async fn test_admin_reject_pending_booking() {
    let (_, coordinator) = setup();
    let tour = tour_with_seats(&coordinator, 5).await;
    let booking = coordinator
        .create_booking(request(Uuid::new_v4(), tour.id, 2))
        .await
        .unwrap();
    let before = remaining(&coordinator, tour.id).await;

    let rejected = coordinator.cancel_booking(booking.id, Actor::Admin).await.unwrap();
    assert_eq!(rejected.status, BookingStatus::Cancelled);
    assert_eq!(remaining(&coordinator, tour.id).await, before + booking.party_size);
}

#[tokio::test]
async fn test_cancelling_twice_never_double_releases() {
    let (_, coordinator) = setup();
    let tour = tour_with_seats(&coordinator, 5).await;
    let user = Uuid::new_v4();
    let booking = coordinator.create_booking(request(user, tour.id, 2)).await.unwrap();

    coordinator.cancel_booking(booking.id, Actor::Admin).await.unwrap();
    let err = coordinator
        .cancel_booking(booking.id, Actor::Customer(user))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CoreError::InvalidStateTransition {
            from: BookingStatus::Cancelled,
            to: BookingStatus::Cancelled
        }
    ));
    assert_eq!(remaining(&coordinator, tour.id).await, 5);
}

#[tokio::test]
async fn test_confirm_cancelled_booking_fails_without_mutation() {
    let (_, coordinator) = setup();
    let tour = tour_with_seats(&coordinator, 5).await;
    let user = Uuid::new_v4();
    let booking = coordinator.create_booking(request(user, tour.id, 2)).await.unwrap();
    let cancelled = coordinator
        .cancel_booking(booking.id, Actor::Customer(user))
        .await
        .unwrap();

    for via in [
        ConfirmVia::CustomerSelfConfirm { user_id: user },
        ConfirmVia::AdminConfirm,
        ConfirmVia::PaymentCallback,
    ] {
        let err = coordinator.confirm_booking(booking.id, via).await.unwrap_err();
        assert!(matches!(
            err,
            CoreError::InvalidStateTransition { from: BookingStatus::Cancelled, .. }
        ));
    }

    let stored = coordinator.booking(booking.id, None).await.unwrap();
    assert_eq!(stored, cancelled);
    assert_eq!(remaining(&coordinator, tour.id).await, 5);
}

#[tokio::test]
async fn test_customer_cannot_touch_foreign_booking() {
    let (_, coordinator) = setup();
    let tour = tour_with_seats(&coordinator, 5).await;
    let owner = Uuid::new_v4();
    let stranger = Uuid::new_v4();
    let booking = coordinator.create_booking(request(owner, tour.id, 1)).await.unwrap();

    let err = coordinator
        .cancel_booking(booking.id, Actor::Customer(stranger))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::NotFound { .. }));

    let err = coordinator
        .confirm_booking(booking.id, ConfirmVia::CustomerSelfConfirm { user_id: stranger })
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::NotFound { .. }));

    assert!(coordinator.booking(booking.id, Some(stranger)).await.is_err());
    assert_eq!(remaining(&coordinator, tour.id).await, 4);
}

#[tokio::test]
async fn test_duplicate_gateway_callback_is_already_processed() {
    let (_, coordinator) = setup();
    let tour = tour_with_seats(&coordinator, 5).await;
    let user = Uuid::new_v4();
    let booking = coordinator.create_booking(request(user, tour.id, 1)).await.unwrap();
    let (payment, _) = coordinator.open_payment(user, booking.id).await.unwrap();
    coordinator.attach_gateway_order(payment.id, "ORDER-DUP").await.unwrap();

    let first = coordinator.settle_payment("ORDER-DUP", Utc::now()).await.unwrap();
    let confirmed_at = first.booking.updated_at;

    let err = coordinator.settle_payment("ORDER-DUP", Utc::now()).await.unwrap_err();
    assert!(matches!(err, CoreError::AlreadyProcessed(id) if id == payment.id));

    let stored = coordinator.booking(booking.id, None).await.unwrap();
    assert_eq!(stored.status, BookingStatus::Confirmed);
    assert_eq!(stored.updated_at, confirmed_at);
}

#[tokio::test]
async fn test_settle_unknown_order_is_not_found() {
    let (_, coordinator) = setup();
    let err = coordinator.settle_payment("FORGED", Utc::now()).await.unwrap_err();
    assert!(matches!(err, CoreError::NotFound { .. }));
}

#[tokio::test]
async fn test_settle_rolls_back_when_booking_was_cancelled() {
    let (store, coordinator) = setup();
    let tour = tour_with_seats(&coordinator, 5).await;
    let user = Uuid::new_v4();
    let booking = coordinator.create_booking(request(user, tour.id, 1)).await.unwrap();
    let (payment, _) = coordinator.open_payment(user, booking.id).await.unwrap();
    coordinator.attach_gateway_order(payment.id, "ORDER-LATE").await.unwrap();
    coordinator
        .cancel_booking(booking.id, Actor::Customer(user))
        .await
        .unwrap();

    let err = coordinator.settle_payment("ORDER-LATE", Utc::now()).await.unwrap_err();
    assert!(matches!(err, CoreError::InvalidStateTransition { .. }));

    let stored = store.get_payment(payment.id).await.unwrap().unwrap();
    assert_eq!(stored.status, PaymentStatus::Pending);
    assert!(stored.completed_at.is_none());
}

#[tokio::test]
async fn test_settle_rolls_back_payment_when_booking_update_fails() {
    let (store, coordinator) = setup();
    let tour = tour_with_seats(&coordinator, 5).await;
    let user = Uuid::new_v4();
    let booking = coordinator.create_booking(request(user, tour.id, 1)).await.unwrap();
    let (payment, _) = coordinator.open_payment(user, booking.id).await.unwrap();
    coordinator.attach_gateway_order(payment.id, "ORDER-FAULT").await.unwrap();

    store.fail_on(Fault::SetBookingStatus);
    assert!(coordinator.settle_payment("ORDER-FAULT", Utc::now()).await.is_err());
    store.clear_faults();

    let stored = store.get_payment(payment.id).await.unwrap().unwrap();
    assert_eq!(stored.status, PaymentStatus::Pending);

    // The gateway retrying later still works.
    let settled = coordinator.settle_payment("ORDER-FAULT", Utc::now()).await.unwrap();
    assert_eq!(settled.booking.status, BookingStatus::Confirmed);
}

#[tokio::test]
async fn test_duplicate_external_order_id_is_conflict() {
    let (_, coordinator) = setup();
    let tour = tour_with_seats(&coordinator, 5).await;
    let user = Uuid::new_v4();
    let booking = coordinator.create_booking(request(user, tour.id, 1)).await.unwrap();
    let (first, _) = coordinator.open_payment(user, booking.id).await.unwrap();
    let (second, _) = coordinator.open_payment(user, booking.id).await.unwrap();

    coordinator.attach_gateway_order(first.id, "ORDER-SAME").await.unwrap();
    let err = coordinator
        .attach_gateway_order(second.id, "ORDER-SAME")
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::ConstraintViolation(_)));
}

#[tokio::test]
async fn test_cancelled_payment_cannot_settle() {
    let (_, coordinator) = setup();
    let tour = tour_with_seats(&coordinator, 5).await;
    let user = Uuid::new_v4();
    let booking = coordinator.create_booking(request(user, tour.id, 1)).await.unwrap();
    let (payment, _) = coordinator.open_payment(user, booking.id).await.unwrap();
    coordinator.attach_gateway_order(payment.id, "ORDER-ABANDON").await.unwrap();

    let cancelled = coordinator.cancel_payment("ORDER-ABANDON").await.unwrap();
    assert_eq!(cancelled.status, PaymentStatus::Cancelled);

    let err = coordinator.settle_payment("ORDER-ABANDON", Utc::now()).await.unwrap_err();
    assert!(matches!(err, CoreError::AlreadyProcessed(_)));
    let stored = coordinator.booking(booking.id, None).await.unwrap();
    assert_eq!(stored.status, BookingStatus::Pending);
}

#[tokio::test]
async fn test_open_payment_requires_awaiting_booking() {
    let (_, coordinator) = setup();
    let tour = tour_with_seats(&coordinator, 5).await;
    let user = Uuid::new_v4();
    let booking = coordinator.create_booking(request(user, tour.id, 1)).await.unwrap();
    coordinator
        .confirm_booking(booking.id, ConfirmVia::CustomerSelfConfirm { user_id: user })
        .await
        .unwrap();

    let err = coordinator.open_payment(user, booking.id).await.unwrap_err();
    assert!(matches!(
        err,
        CoreError::InvalidStateTransition { from: BookingStatus::Confirmed, .. }
    ));
}

#[tokio::test]
async fn test_lock_timeout_while_tour_row_is_held() {
    let (store, coordinator) = setup();
    let tour = tour_with_seats(&coordinator, 5).await;

    let mut holder = store.begin().await.unwrap();
    let _locked = holder.tour_for_update(tour.id).await.unwrap().unwrap();

    let err = coordinator
        .create_booking(request(Uuid::new_v4(), tour.id, 1))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::LockTimeout));
    assert!(err.is_retryable());

    holder.rollback().await.unwrap();
    coordinator
        .create_booking(request(Uuid::new_v4(), tour.id, 1))
        .await
        .unwrap();
    assert_eq!(remaining(&coordinator, tour.id).await, 4);
}

#[tokio::test]
async fn test_price_change_leaves_existing_amounts() {
    let (_, coordinator) = setup();
    let tour = tour_with_seats(&coordinator, 5).await;
    let user = Uuid::new_v4();
    let booking = coordinator.create_booking(request(user, tour.id, 2)).await.unwrap();

    coordinator
        .update_tour(
            tour.id,
            TourPatch {
                price: Some(PRICE * 3),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let stored = coordinator.booking(booking.id, Some(user)).await.unwrap();
    assert_eq!(stored.total_amount, PRICE * 2);
}

#[tokio::test]
async fn test_capacity_resize_keeps_held_seats() {
    let (_, coordinator) = setup();
    let tour = tour_with_seats(&coordinator, 5).await;
    coordinator
        .create_booking(request(Uuid::new_v4(), tour.id, 3))
        .await
        .unwrap();

    let grown = coordinator
        .update_tour(
            tour.id,
            TourPatch {
                total_seats: Some(8),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!((grown.total_seats, grown.remaining_seats), (8, 5));

    let err = coordinator
        .update_tour(
            tour.id,
            TourPatch {
                total_seats: Some(2),
                name: Some("Renamed".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::InsufficientCapacity { .. }));

    let stored = coordinator.tour(tour.id).await.unwrap();
    assert_eq!(stored.name, "Sapa Trekking");
    assert_eq!((stored.total_seats, stored.remaining_seats), (8, 5));
}

#[tokio::test]
async fn test_inactive_tour_rejects_bookings() {
    let (_, coordinator) = setup();
    let tour = tour_with_seats(&coordinator, 5).await;
    coordinator.deactivate_tour(tour.id).await.unwrap();

    let err = coordinator
        .create_booking(request(Uuid::new_v4(), tour.id, 1))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Validation(_)));
    assert_eq!(remaining(&coordinator, tour.id).await, 5);
}

#[tokio::test]
async fn test_party_size_bounds() {
    let (_, coordinator) = setup();
    let tour = tour_with_seats(&coordinator, 5).await;
    for party in [0, -1, 51] {
        let err = coordinator
            .create_booking(request(Uuid::new_v4(), tour.id, party))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)), "party {party}");
    }
}

#[tokio::test]
async fn test_complete_only_after_confirmation() {
    let (_, coordinator) = setup();
    let tour = tour_with_seats(&coordinator, 5).await;
    let booking = coordinator
        .create_booking(request(Uuid::new_v4(), tour.id, 2))
        .await
        .unwrap();

    assert!(matches!(
        coordinator.complete_booking(booking.id).await,
        Err(CoreError::InvalidStateTransition { .. })
    ));
    coordinator
        .confirm_booking(booking.id, ConfirmVia::AdminConfirm)
        .await
        .unwrap();
    let completed = coordinator.complete_booking(booking.id).await.unwrap();
    assert_eq!(completed.status, BookingStatus::Completed);

    // Completed is terminal; seats stay with the tour's history.
    assert!(coordinator.cancel_booking(booking.id, Actor::Admin).await.is_err());
    assert_eq!(remaining(&coordinator, tour.id).await, 3);
}

#[tokio::test]
async fn test_create_rolls_back_when_booking_insert_fails() {
    let (store, coordinator) = setup();
    let tour = tour_with_seats(&coordinator, 5).await;
    let user = Uuid::new_v4();

    store.fail_on(Fault::InsertBooking);
    let err = coordinator.create_booking(request(user, tour.id, 3)).await.unwrap_err();
    assert!(matches!(err, CoreError::Storage(_)));
    store.clear_faults();

    assert_eq!(remaining(&coordinator, tour.id).await, 5);
    let bookings = coordinator.list_bookings(&BookingFilter::for_user(user)).await.unwrap();
    assert!(bookings.is_empty());
}

#[tokio::test]
async fn test_settle_leaves_booking_pending_when_payment_update_fails() {
    let (store, coordinator) = setup();
    let tour = tour_with_seats(&coordinator, 5).await;
    let user = Uuid::new_v4();
    let booking = coordinator.create_booking(request(user, tour.id, 1)).await.unwrap();
    let (payment, _) = coordinator.open_payment(user, booking.id).await.unwrap();
    coordinator.attach_gateway_order(payment.id, "ORDER-PAY-FAULT").await.unwrap();

    store.fail_on(Fault::SetPaymentStatus);
    assert!(coordinator.settle_payment("ORDER-PAY-FAULT", Utc::now()).await.is_err());
    store.clear_faults();

    let stored = coordinator.booking(booking.id, None).await.unwrap();
    assert_eq!(stored.status, BookingStatus::Pending);
    let stored = store.get_payment(payment.id).await.unwrap().unwrap();
    assert_eq!(stored.status, PaymentStatus::Pending);
}

#[tokio::test]
async fn test_failed_commit_discards_cancel_and_releases_locks() {
    let (store, coordinator) = setup();
    let tour = tour_with_seats(&coordinator, 5).await;
    let user = Uuid::new_v4();
    let booking = coordinator.create_booking(request(user, tour.id, 2)).await.unwrap();

    store.fail_on(Fault::Commit);
    let err = coordinator
        .cancel_booking(booking.id, Actor::Customer(user))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Storage(_)));
    store.clear_faults();

    let stored = coordinator.booking(booking.id, None).await.unwrap();
    assert_eq!(stored.status, BookingStatus::Pending);
    assert_eq!(remaining(&coordinator, tour.id).await, 3);

    // Neither the booking nor the tour row is still locked.
    let cancelled = coordinator
        .cancel_booking(booking.id, Actor::Customer(user))
        .await
        .unwrap();
    assert_eq!(cancelled.status, BookingStatus::Cancelled);
    assert_eq!(remaining(&coordinator, tour.id).await, 5);
}

#[tokio::test]
async fn test_abandoned_payment_is_failed() {
    let (_, coordinator) = setup();
    let tour = tour_with_seats(&coordinator, 5).await;
    let user = Uuid::new_v4();
    let booking = coordinator.create_booking(request(user, tour.id, 1)).await.unwrap();
    let (payment, _) = coordinator.open_payment(user, booking.id).await.unwrap();

    let abandoned = coordinator.abandon_payment(payment.id).await.unwrap();
    assert_eq!(abandoned.status, PaymentStatus::Failed);
    let err = coordinator.abandon_payment(payment.id).await.unwrap_err();
    assert!(matches!(err, CoreError::AlreadyProcessed(id) if id == payment.id));

    // The booking can still be paid.
    let stored = coordinator.booking(booking.id, None).await.unwrap();
    assert_eq!(stored.status, BookingStatus::Pending);
    assert!(coordinator.open_payment(user, booking.id).await.is_ok());
}

#[tokio::test]
async fn test_payment_with_gateway_order_cannot_be_abandoned() {
    let (_, coordinator) = setup();
    let tour = tour_with_seats(&coordinator, 5).await;
    let user = Uuid::new_v4();
    let booking = coordinator.create_booking(request(user, tour.id, 1)).await.unwrap();
    let (payment, _) = coordinator.open_payment(user, booking.id).await.unwrap();
    coordinator.attach_gateway_order(payment.id, "ORDER-LIVE").await.unwrap();

    let err = coordinator.abandon_payment(payment.id).await.unwrap_err();
    assert!(matches!(err, CoreError::AlreadyProcessed(_)));
    let stored = coordinator.payment_by_order("ORDER-LIVE").await.unwrap();
    assert_eq!(stored.status, PaymentStatus::Pending);
}

#[tokio::test]
async fn test_payment_by_order_reads_committed_state() {
    let (_, coordinator) = setup();
    let tour = tour_with_seats(&coordinator, 5).await;
    let user = Uuid::new_v4();
    let booking = coordinator.create_booking(request(user, tour.id, 1)).await.unwrap();
    let (payment, _) = coordinator.open_payment(user, booking.id).await.unwrap();
    coordinator.attach_gateway_order(payment.id, "ORDER-READ").await.unwrap();
    coordinator.settle_payment("ORDER-READ", Utc::now()).await.unwrap();

    let stored = coordinator.payment_by_order("ORDER-READ").await.unwrap();
    assert_eq!(stored.id, payment.id);
    assert_eq!(stored.status, PaymentStatus::Completed);

    let err = coordinator.payment_by_order("ORDER-NONE").await.unwrap_err();
    assert!(matches!(err, CoreError::NotFound { .. }));
}
