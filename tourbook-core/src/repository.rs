use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::booking::{Booking, BookingFilter, BookingStatus};
use crate::error::CoreResult;
use crate::payment::{Payment, PaymentStatus};
use crate::tour::{Page, Tour, TourFilter};

/// A row read with `FOR UPDATE` semantics inside a live transaction.
///
/// Only store backends construct these, right after acquiring the row lock.
/// Every mutating [`StoreTx`] method takes one, so an unlocked read can never
/// feed a write.
#[derive(Debug)]
pub struct Locked<T> {
    row: T,
}

impl<T> Locked<T> {
    /// Wraps a row whose exclusive lock the calling transaction now holds.
    pub fn assume_locked(row: T) -> Self {
        Self { row }
    }

    pub fn get(&self) -> &T {
        &self.row
    }

    /// Replaces the cached copy after a write went through.
    pub fn refresh(&mut self, row: T) {
        self.row = row;
    }

    pub fn into_inner(self) -> T {
        self.row
    }
}

impl<T> std::ops::Deref for Locked<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.row
    }
}

/// Durable storage for tours, bookings and payments.
///
/// Reads here are plain committed reads. Anything that mutates goes through
/// [`ReservationStore::begin`].
#[async_trait]
pub trait ReservationStore: Send + Sync {
    /// Open a transaction. Dropping it without `commit` rolls back.
    async fn begin(&self) -> CoreResult<Box<dyn StoreTx>>;

    async fn get_tour(&self, id: Uuid) -> CoreResult<Option<Tour>>;

    async fn list_tours(&self, filter: &TourFilter) -> CoreResult<Vec<Tour>>;

    /// With `owner`, bookings of other users are invisible.
    async fn get_booking(&self, id: Uuid, owner: Option<Uuid>) -> CoreResult<Option<Booking>>;

    /// Newest first.
    async fn list_bookings(&self, filter: &BookingFilter) -> CoreResult<Vec<Booking>>;

    async fn get_payment(&self, id: Uuid) -> CoreResult<Option<Payment>>;

    async fn get_payment_by_order(&self, external_order_id: &str) -> CoreResult<Option<Payment>>;

    /// Newest first.
    async fn list_payments(&self, user_id: Uuid, page: Page) -> CoreResult<Vec<Payment>>;
}

/// One open transaction. Row locks are held until commit or drop.
///
/// Lock waits are bounded by the backend's configured budget and surface as
/// `CoreError::LockTimeout`.
#[async_trait]
pub trait StoreTx: Send {
    async fn insert_tour(&mut self, tour: &Tour) -> CoreResult<()>;

    async fn tour_for_update(&mut self, id: Uuid) -> CoreResult<Option<Locked<Tour>>>;

    /// Persists every column of the locked tour except the seat counters.
    async fn update_tour_details(&mut self, tour: &mut Locked<Tour>, details: &Tour)
        -> CoreResult<()>;

    /// Sets both seat counters. Callers guarantee `0 <= remaining <= total`.
    async fn set_seats(&mut self, tour: &mut Locked<Tour>, total: i32, remaining: i32)
        -> CoreResult<()>;

    async fn insert_booking(&mut self, booking: &Booking) -> CoreResult<()>;

    async fn booking_for_update(
        &mut self,
        id: Uuid,
        owner: Option<Uuid>,
    ) -> CoreResult<Option<Locked<Booking>>>;

    async fn set_booking_status(
        &mut self,
        booking: &mut Locked<Booking>,
        status: BookingStatus,
        at: DateTime<Utc>,
    ) -> CoreResult<()>;

    async fn insert_payment(&mut self, payment: &Payment) -> CoreResult<()>;

    async fn payment_for_update(&mut self, id: Uuid) -> CoreResult<Option<Locked<Payment>>>;

    async fn payment_by_order_for_update(
        &mut self,
        external_order_id: &str,
    ) -> CoreResult<Option<Locked<Payment>>>;

    /// Fails with `ConstraintViolation` if another payment already carries the id.
    async fn set_payment_order_id(
        &mut self,
        payment: &mut Locked<Payment>,
        external_order_id: &str,
    ) -> CoreResult<()>;

    async fn set_payment_status(
        &mut self,
        payment: &mut Locked<Payment>,
        status: PaymentStatus,
        completed_at: Option<DateTime<Utc>>,
    ) -> CoreResult<()>;

    async fn commit(self: Box<Self>) -> CoreResult<()>;

    async fn rollback(self: Box<Self>) -> CoreResult<()>;
}
