//! Payment records. The only rule enforced here beyond status checks is
//! uniqueness of the gateway order id, which the store owns.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::booking::Booking;
use crate::error::{CoreError, CoreResult, Entity};
use crate::payment::{Payment, PaymentStatus};
use crate::repository::{Locked, StoreTx};

pub async fn create(tx: &mut dyn StoreTx, booking: &Booking, amount: i64) -> CoreResult<Payment> {
    let now = Utc::now();
    let payment = Payment {
        id: Uuid::new_v4(),
        user_id: booking.user_id,
        booking_id: booking.id,
        external_order_id: None,
        amount,
        status: PaymentStatus::Pending,
        completed_at: None,
        created_at: now,
        updated_at: now,
    };
    tx.insert_payment(&payment).await?;
    Ok(payment)
}

pub async fn attach_order(
    tx: &mut dyn StoreTx,
    payment_id: Uuid,
    external_order_id: &str,
) -> CoreResult<Payment> {
    let mut payment = tx
        .payment_for_update(payment_id)
        .await?
        .ok_or_else(|| CoreError::not_found(Entity::Payment, payment_id))?;
    if payment.status != PaymentStatus::Pending || payment.external_order_id.is_some() {
        return Err(CoreError::AlreadyProcessed(payment.id));
    }
    tx.set_payment_order_id(&mut payment, external_order_id).await?;
    Ok(payment.into_inner())
}

/// Locks the pending payment behind a gateway order.
async fn lock_pending(tx: &mut dyn StoreTx, external_order_id: &str) -> CoreResult<Locked<Payment>> {
    let payment = tx
        .payment_by_order_for_update(external_order_id)
        .await?
        .ok_or_else(|| CoreError::not_found(Entity::Payment, external_order_id))?;
    if payment.status != PaymentStatus::Pending {
        return Err(CoreError::AlreadyProcessed(payment.id));
    }
    Ok(payment)
}

pub async fn mark_completed(
    tx: &mut dyn StoreTx,
    external_order_id: &str,
    completed_at: DateTime<Utc>,
) -> CoreResult<Locked<Payment>> {
    let mut payment = lock_pending(tx, external_order_id).await?;
    tx.set_payment_status(&mut payment, PaymentStatus::Completed, Some(completed_at))
        .await?;
    Ok(payment)
}

pub async fn mark_cancelled(tx: &mut dyn StoreTx, external_order_id: &str) -> CoreResult<Payment> {
    let mut payment = lock_pending(tx, external_order_id).await?;
    tx.set_payment_status(&mut payment, PaymentStatus::Cancelled, None)
        .await?;
    Ok(payment.into_inner())
}

/// Fails a payment that never reached the gateway.
pub async fn abandon(tx: &mut dyn StoreTx, payment_id: Uuid) -> CoreResult<Payment> {
    let mut payment = tx
        .payment_for_update(payment_id)
        .await?
        .ok_or_else(|| CoreError::not_found(Entity::Payment, payment_id))?;
    if payment.status != PaymentStatus::Pending || payment.external_order_id.is_some() {
        return Err(CoreError::AlreadyProcessed(payment.id));
    }
    tx.set_payment_status(&mut payment, PaymentStatus::Failed, None)
        .await?;
    Ok(payment.into_inner())
}

pub async fn mark_failed(tx: &mut dyn StoreTx, external_order_id: &str) -> CoreResult<Payment> {
    let mut payment = lock_pending(tx, external_order_id).await?;
    tx.set_payment_status(&mut payment, PaymentStatus::Failed, None)
        .await?;
    Ok(payment.into_inner())
}
