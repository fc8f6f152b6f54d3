//! Booking ledger: creation and status transitions.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::booking::{check_transition, Actor, Booking, BookingStatus};
use crate::error::{CoreError, CoreResult, Entity};
use crate::repository::{Locked, StoreTx};
use crate::tour::Tour;

/// Builds a pending booking, freezing the amount at today's tour price.
pub fn draft(
    user_id: Uuid,
    tour: &Tour,
    party_size: i32,
    note: Option<String>,
    now: DateTime<Utc>,
) -> CoreResult<Booking> {
    let total_amount = tour
        .price
        .checked_mul(i64::from(party_size))
        .ok_or_else(|| CoreError::Validation("booking amount overflows".into()))?;

    Ok(Booking {
        id: Uuid::new_v4(),
        user_id,
        tour_id: tour.id,
        party_size,
        total_amount,
        status: BookingStatus::Pending,
        note,
        created_at: now,
        updated_at: now,
    })
}

pub async fn create(tx: &mut dyn StoreTx, booking: &Booking) -> CoreResult<()> {
    tx.insert_booking(booking).await
}

pub async fn lock_booking(
    tx: &mut dyn StoreTx,
    booking_id: Uuid,
    owner: Option<Uuid>,
) -> CoreResult<Locked<Booking>> {
    tx.booking_for_update(booking_id, owner)
        .await?
        .ok_or_else(|| CoreError::not_found(Entity::Booking, booking_id))
}

/// Moves a locked booking to `target` if the state machine allows it for `actor`.
pub async fn transition(
    tx: &mut dyn StoreTx,
    booking: &mut Locked<Booking>,
    target: BookingStatus,
    actor: Actor,
) -> CoreResult<()> {
    let next = check_transition(booking.status, target, actor)?;
    tx.set_booking_status(booking, next, Utc::now()).await
}
