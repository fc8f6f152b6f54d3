//! Seat inventory. Every function here runs inside the caller's transaction
//! and mutates only tours it has locked.

use uuid::Uuid;

use crate::error::{CoreError, CoreResult, Entity};
use crate::repository::{Locked, StoreTx};
use crate::tour::{resize_capacity, restore_seats, Tour};

/// Lock the tour row for the rest of the transaction.
pub async fn lock_tour(tx: &mut dyn StoreTx, tour_id: Uuid) -> CoreResult<Locked<Tour>> {
    tx.tour_for_update(tour_id)
        .await?
        .ok_or_else(|| CoreError::not_found(Entity::Tour, tour_id))
}

/// Take `seats` out of the tour's remaining capacity.
pub async fn decrement_seats(
    tx: &mut dyn StoreTx,
    tour: &mut Locked<Tour>,
    seats: i32,
) -> CoreResult<()> {
    if seats <= 0 {
        return Err(CoreError::Validation("seat count must be positive".into()));
    }
    if tour.remaining_seats < seats {
        return Err(CoreError::InsufficientCapacity {
            remaining: tour.remaining_seats,
            requested: seats,
        });
    }
    let (total, remaining) = (tour.total_seats, tour.remaining_seats - seats);
    tx.set_seats(tour, total, remaining).await
}

/// Give `seats` back to the tour, never beyond its total.
pub async fn increment_seats(
    tx: &mut dyn StoreTx,
    tour: &mut Locked<Tour>,
    seats: i32,
) -> CoreResult<()> {
    if seats <= 0 {
        return Err(CoreError::Validation("seat count must be positive".into()));
    }
    let remaining = restore_seats(tour.id, tour.remaining_seats, tour.total_seats, seats);
    let total = tour.total_seats;
    tx.set_seats(tour, total, remaining).await
}

/// Change total capacity while keeping held seats held.
pub async fn resize(tx: &mut dyn StoreTx, tour: &mut Locked<Tour>, new_total: i32) -> CoreResult<()> {
    if new_total == tour.total_seats {
        return Ok(());
    }
    let remaining = resize_capacity(tour, new_total)?;
    tx.set_seats(tour, new_total, remaining).await
}
