use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::booking::{Actor, Booking, BookingFilter, BookingStatus, ConfirmVia};
use crate::error::{CoreError, CoreResult, Entity};
use crate::payment::Payment;
use crate::repository::{ReservationStore, StoreTx};
use crate::tour::{NewTour, Page, Tour, TourFilter, TourPatch, TourStatus};
use crate::{billing, inventory, ledger};

#[derive(Debug, Clone)]
pub struct CreateBooking {
    pub user_id: Uuid,
    pub tour_id: Uuid,
    pub party_size: i32,
    pub note: Option<String>,
}

/// Result of a gateway success callback.
#[derive(Debug, Clone, Serialize)]
pub struct Settlement {
    pub payment: Payment,
    pub booking: Booking,
}

/// The only path that changes seat counts or booking status.
///
/// Each operation runs in one store transaction. Lock order: tour before
/// booking when creating; booking before tour when cancelling; payment before
/// booking when settling.
pub struct ReservationCoordinator {
    store: Arc<dyn ReservationStore>,
    max_party_size: i32,
}

impl ReservationCoordinator {
    pub fn new(store: Arc<dyn ReservationStore>, max_party_size: i32) -> Self {
        Self {
            store,
            max_party_size,
        }
    }

    // ------------------------------------------------------------------
    // Tours
    // ------------------------------------------------------------------

    #[instrument(skip(self, new_tour), fields(name = %new_tour.name))]
    pub async fn create_tour(&self, new_tour: NewTour) -> CoreResult<Tour> {
        new_tour.validate()?;
        let tour = new_tour.into_tour(Utc::now());

        let mut tx = self.store.begin().await?;
        let result = tx.insert_tour(&tour).await;
        finish(tx, result).await?;

        info!(tour_id = %tour.id, seats = tour.total_seats, "tour created");
        Ok(tour)
    }

    #[instrument(skip(self, patch))]
    pub async fn update_tour(&self, tour_id: Uuid, patch: TourPatch) -> CoreResult<Tour> {
        let mut tx = self.store.begin().await?;
        let result = update_tour_in(tx.as_mut(), tour_id, &patch).await;
        let tour = finish(tx, result).await?;

        info!(
            %tour_id,
            total = tour.total_seats,
            remaining = tour.remaining_seats,
            "tour updated"
        );
        Ok(tour)
    }

    /// Soft delete. Bookings keep pointing at the row.
    pub async fn deactivate_tour(&self, tour_id: Uuid) -> CoreResult<Tour> {
        let patch = TourPatch {
            status: Some(TourStatus::Inactive),
            ..Default::default()
        };
        self.update_tour(tour_id, patch).await
    }

    pub async fn tour(&self, tour_id: Uuid) -> CoreResult<Tour> {
        self.store
            .get_tour(tour_id)
            .await?
            .ok_or_else(|| CoreError::not_found(Entity::Tour, tour_id))
    }

    pub async fn list_tours(&self, filter: &TourFilter) -> CoreResult<Vec<Tour>> {
        self.store.list_tours(filter).await
    }

    // ------------------------------------------------------------------
    // Bookings
    // ------------------------------------------------------------------

    #[instrument(skip(self, request), fields(user_id = %request.user_id, tour_id = %request.tour_id, party_size = request.party_size))]
    pub async fn create_booking(&self, request: CreateBooking) -> CoreResult<Booking> {
        if request.party_size < 1 || request.party_size > self.max_party_size {
            return Err(CoreError::Validation(format!(
                "party size must be between 1 and {}",
                self.max_party_size
            )));
        }

        let mut tx = self.store.begin().await?;
        let result = create_booking_in(tx.as_mut(), &request).await;
        let (booking, remaining) = finish(tx, result).await?;

        info!(
            booking_id = %booking.id,
            amount = booking.total_amount,
            remaining_seats = remaining,
            "booking created"
        );
        Ok(booking)
    }

    #[instrument(skip(self))]
    pub async fn confirm_booking(&self, booking_id: Uuid, via: ConfirmVia) -> CoreResult<Booking> {
        let actor = via.actor();
        let mut tx = self.store.begin().await?;
        let result = async {
            let mut booking = ledger::lock_booking(tx.as_mut(), booking_id, actor.owner_scope()).await?;
            if !booking.status.is_awaiting_payment() {
                return Err(CoreError::InvalidStateTransition {
                    from: booking.status,
                    to: BookingStatus::Confirmed,
                });
            }
            ledger::transition(tx.as_mut(), &mut booking, BookingStatus::Confirmed, actor).await?;
            Ok(booking.into_inner())
        }
        .await;
        let booking = finish(tx, result).await?;

        info!(%booking_id, %actor, "booking confirmed");
        Ok(booking)
    }

    /// Customer cancel or admin reject. Seats go back to the tour in the same
    /// transaction.
    #[instrument(skip(self))]
    pub async fn cancel_booking(&self, booking_id: Uuid, actor: Actor) -> CoreResult<Booking> {
        let mut tx = self.store.begin().await?;
        let result = cancel_booking_in(tx.as_mut(), booking_id, actor).await;
        let (booking, remaining) = finish(tx, result).await?;

        info!(
            %booking_id,
            %actor,
            released = booking.party_size,
            remaining_seats = remaining,
            "booking cancelled"
        );
        Ok(booking)
    }

    /// Post-travel completion. No inventory effect.
    #[instrument(skip(self))]
    pub async fn complete_booking(&self, booking_id: Uuid) -> CoreResult<Booking> {
        let mut tx = self.store.begin().await?;
        let result = async {
            let mut booking = ledger::lock_booking(tx.as_mut(), booking_id, None).await?;
            ledger::transition(tx.as_mut(), &mut booking, BookingStatus::Completed, Actor::Admin)
                .await?;
            Ok::<_, CoreError>(booking.into_inner())
        }
        .await;
        let booking = finish(tx, result).await?;

        info!(%booking_id, "booking completed");
        Ok(booking)
    }

    pub async fn booking(&self, booking_id: Uuid, owner: Option<Uuid>) -> CoreResult<Booking> {
        self.store
            .get_booking(booking_id, owner)
            .await?
            .ok_or_else(|| CoreError::not_found(Entity::Booking, booking_id))
    }

    pub async fn list_bookings(&self, filter: &BookingFilter) -> CoreResult<Vec<Booking>> {
        self.store.list_bookings(filter).await
    }

    // ------------------------------------------------------------------
    // Payments
    // ------------------------------------------------------------------

    /// Opens a pending payment for a booking the customer owns and has not paid yet.
    #[instrument(skip(self))]
    pub async fn open_payment(&self, user_id: Uuid, booking_id: Uuid) -> CoreResult<(Payment, Booking)> {
        let mut tx = self.store.begin().await?;
        let result = async {
            let booking = ledger::lock_booking(tx.as_mut(), booking_id, Some(user_id)).await?;
            if !booking.status.is_awaiting_payment() {
                return Err(CoreError::InvalidStateTransition {
                    from: booking.status,
                    to: BookingStatus::Confirmed,
                });
            }
            let payment = billing::create(tx.as_mut(), &booking, booking.total_amount).await?;
            Ok((payment, booking.into_inner()))
        }
        .await;
        let (payment, booking) = finish(tx, result).await?;

        info!(payment_id = %payment.id, %booking_id, amount = payment.amount, "payment opened");
        Ok((payment, booking))
    }

    pub async fn attach_gateway_order(&self, payment_id: Uuid, external_order_id: &str) -> CoreResult<Payment> {
        let mut tx = self.store.begin().await?;
        let result = billing::attach_order(tx.as_mut(), payment_id, external_order_id).await;
        let payment = finish(tx, result).await?;

        info!(%payment_id, external_order_id, "gateway order attached");
        Ok(payment)
    }

    /// Gateway reported a successful capture. Completes the payment and
    /// confirms its booking together, or neither.
    #[instrument(skip(self))]
    pub async fn settle_payment(
        &self,
        external_order_id: &str,
        completed_at: DateTime<Utc>,
    ) -> CoreResult<Settlement> {
        let mut tx = self.store.begin().await?;
        let result = async {
            let payment = billing::mark_completed(tx.as_mut(), external_order_id, completed_at).await?;
            let mut booking = ledger::lock_booking(tx.as_mut(), payment.booking_id, None).await?;
            ledger::transition(
                tx.as_mut(),
                &mut booking,
                BookingStatus::Confirmed,
                ConfirmVia::PaymentCallback.actor(),
            )
            .await?;
            Ok::<_, CoreError>(Settlement {
                payment: payment.into_inner(),
                booking: booking.into_inner(),
            })
        }
        .await;
        let settlement = finish(tx, result).await?;

        info!(
            payment_id = %settlement.payment.id,
            booking_id = %settlement.booking.id,
            "payment settled, booking confirmed"
        );
        Ok(settlement)
    }

    pub async fn cancel_payment(&self, external_order_id: &str) -> CoreResult<Payment> {
        let mut tx = self.store.begin().await?;
        let result = billing::mark_cancelled(tx.as_mut(), external_order_id).await;
        let payment = finish(tx, result).await?;
        info!(payment_id = %payment.id, "payment cancelled");
        Ok(payment)
    }

    pub async fn fail_payment(&self, external_order_id: &str) -> CoreResult<Payment> {
        let mut tx = self.store.begin().await?;
        let result = billing::mark_failed(tx.as_mut(), external_order_id).await;
        let payment = finish(tx, result).await?;
        warn!(payment_id = %payment.id, "payment capture declined");
        Ok(payment)
    }

    /// Marks a payment failed when its gateway order could not be created.
    pub async fn abandon_payment(&self, payment_id: Uuid) -> CoreResult<Payment> {
        let mut tx = self.store.begin().await?;
        let result = billing::abandon(tx.as_mut(), payment_id).await;
        let payment = finish(tx, result).await?;
        warn!(%payment_id, "payment abandoned before reaching the gateway");
        Ok(payment)
    }

    /// Committed view of the payment behind a gateway order.
    pub async fn payment_by_order(&self, external_order_id: &str) -> CoreResult<Payment> {
        self.store
            .get_payment_by_order(external_order_id)
            .await?
            .ok_or_else(|| CoreError::not_found(Entity::Payment, external_order_id))
    }

    pub async fn payment(&self, payment_id: Uuid) -> CoreResult<Payment> {
        self.store
            .get_payment(payment_id)
            .await?
            .ok_or_else(|| CoreError::not_found(Entity::Payment, payment_id))
    }

    pub async fn payment_history(&self, user_id: Uuid, page: Page) -> CoreResult<Vec<Payment>> {
        self.store.list_payments(user_id, page).await
    }
}

async fn create_booking_in(tx: &mut dyn StoreTx, request: &CreateBooking) -> CoreResult<(Booking, i32)> {
    let mut tour = inventory::lock_tour(tx, request.tour_id).await?;
    if !tour.is_bookable() {
        return Err(CoreError::Validation(format!(
            "tour is {} and not open for booking",
            tour.status
        )));
    }
    if tour.remaining_seats < request.party_size {
        return Err(CoreError::InsufficientCapacity {
            remaining: tour.remaining_seats,
            requested: request.party_size,
        });
    }

    let booking = ledger::draft(
        request.user_id,
        &tour,
        request.party_size,
        request.note.clone(),
        Utc::now(),
    )?;
    ledger::create(tx, &booking).await?;
    inventory::decrement_seats(tx, &mut tour, request.party_size).await?;
    Ok((booking, tour.remaining_seats))
}

async fn cancel_booking_in(tx: &mut dyn StoreTx, booking_id: Uuid, actor: Actor) -> CoreResult<(Booking, i32)> {
    let mut booking = ledger::lock_booking(tx, booking_id, actor.owner_scope()).await?;
    ledger::transition(tx, &mut booking, BookingStatus::Cancelled, actor).await?;

    let mut tour = inventory::lock_tour(tx, booking.tour_id).await?;
    inventory::increment_seats(tx, &mut tour, booking.party_size).await?;
    Ok((booking.into_inner(), tour.remaining_seats))
}

async fn update_tour_in(tx: &mut dyn StoreTx, tour_id: Uuid, patch: &TourPatch) -> CoreResult<Tour> {
    let mut tour = inventory::lock_tour(tx, tour_id).await?;
    let mut details = tour.get().clone();
    patch.apply_details(&mut details)?;
    tx.update_tour_details(&mut tour, &details).await?;
    if let Some(total) = patch.total_seats {
        inventory::resize(tx, &mut tour, total).await?;
    }
    Ok(tour.into_inner())
}

/// Commit on success; roll back on failure and hand back the original error.
async fn finish<T>(tx: Box<dyn StoreTx>, result: CoreResult<T>) -> CoreResult<T> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!(error = %rollback_err, "rollback failed; dropping transaction");
            }
            Err(err)
        }
    }
}
