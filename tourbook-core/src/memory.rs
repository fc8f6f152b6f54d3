//! In-process store with per-row exclusive locks and staged writes.
//!
//! A transaction's writes stay in its own overlay until `commit`, so dropping
//! it rolls everything back. Row locks are `tokio` mutexes held by the
//! transaction until it ends; lock waits are bounded by `lock_timeout`.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

use crate::booking::{Booking, BookingFilter, BookingStatus};
use crate::error::{CoreError, CoreResult};
use crate::payment::{Payment, PaymentStatus};
use crate::repository::{Locked, ReservationStore, StoreTx};
use crate::tour::{Page, Tour, TourFilter};

/// Points at which a test can make the store fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fault {
    SetSeats,
    InsertBooking,
    SetBookingStatus,
    SetPaymentStatus,
    Commit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum RowKey {
    Tour(Uuid),
    Booking(Uuid),
    Payment(Uuid),
}

#[derive(Debug, Default, Clone)]
struct Tables {
    tours: HashMap<Uuid, Tour>,
    bookings: HashMap<Uuid, Booking>,
    payments: HashMap<Uuid, Payment>,
}

struct Shared {
    tables: Mutex<Tables>,
    row_locks: Mutex<HashMap<RowKey, Arc<tokio::sync::Mutex<()>>>>,
    faults: Mutex<HashSet<Fault>>,
    lock_timeout: Duration,
}

impl Shared {
    fn tables(&self) -> CoreResult<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| CoreError::Storage("memory store poisoned".into()))
    }

    fn check_fault(&self, fault: Fault) -> CoreResult<()> {
        let faults = self
            .faults
            .lock()
            .map_err(|_| CoreError::Storage("memory store poisoned".into()))?;
        if faults.contains(&fault) {
            return Err(CoreError::Storage(format!("injected fault at {fault:?}")));
        }
        Ok(())
    }

    fn row_lock(&self, key: RowKey) -> CoreResult<Arc<tokio::sync::Mutex<()>>> {
        let mut locks = self
            .row_locks
            .lock()
            .map_err(|_| CoreError::Storage("memory store poisoned".into()))?;
        Ok(locks.entry(key).or_default().clone())
    }

    /// Forgets lock entries nobody holds or waits on.
    fn release_row_locks(&self, keys: impl IntoIterator<Item = RowKey>) {
        let Ok(mut locks) = self.row_locks.lock() else {
            return;
        };
        for key in keys {
            if locks.get(&key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
                locks.remove(&key);
            }
        }
    }
}

/// Row locks owned by one transaction. Released on commit or drop.
struct HeldLocks {
    shared: Arc<Shared>,
    guards: HashMap<RowKey, OwnedMutexGuard<()>>,
}

impl Drop for HeldLocks {
    fn drop(&mut self) {
        let keys: Vec<RowKey> = self.guards.drain().map(|(key, _)| key).collect();
        self.shared.release_row_locks(keys);
    }
}

#[derive(Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl MemoryStore {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                tables: Mutex::new(Tables::default()),
                row_locks: Mutex::new(HashMap::new()),
                faults: Mutex::new(HashSet::new()),
                lock_timeout,
            }),
        }
    }

    /// Make every later call at `fault` fail until cleared.
    pub fn fail_on(&self, fault: Fault) {
        if let Ok(mut faults) = self.shared.faults.lock() {
            faults.insert(fault);
        }
    }

    pub fn clear_faults(&self) {
        if let Ok(mut faults) = self.shared.faults.lock() {
            faults.clear();
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

fn page<T>(rows: Vec<T>, page: Page) -> Vec<T> {
    rows.into_iter()
        .skip(page.offset as usize)
        .take(page.limit as usize)
        .collect()
}

#[async_trait]
impl ReservationStore for MemoryStore {
    async fn begin(&self) -> CoreResult<Box<dyn StoreTx>> {
        Ok(Box::new(MemoryTx {
            shared: self.shared.clone(),
            held: HeldLocks {
                shared: self.shared.clone(),
                guards: HashMap::new(),
            },
            staged: Tables::default(),
        }))
    }

    async fn get_tour(&self, id: Uuid) -> CoreResult<Option<Tour>> {
        Ok(self.shared.tables()?.tours.get(&id).cloned())
    }

    async fn list_tours(&self, filter: &TourFilter) -> CoreResult<Vec<Tour>> {
        let mut tours: Vec<Tour> = self
            .shared
            .tables()?
            .tours
            .values()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect();
        tours.sort_by_key(|t| (t.departure_date, t.created_at));
        Ok(page(tours, filter.page))
    }

    async fn get_booking(&self, id: Uuid, owner: Option<Uuid>) -> CoreResult<Option<Booking>> {
        Ok(self
            .shared
            .tables()?
            .bookings
            .get(&id)
            .filter(|b| owner.map(|o| b.user_id == o).unwrap_or(true))
            .cloned())
    }

    async fn list_bookings(&self, filter: &BookingFilter) -> CoreResult<Vec<Booking>> {
        let mut bookings: Vec<Booking> = self
            .shared
            .tables()?
            .bookings
            .values()
            .filter(|b| filter.matches(b))
            .cloned()
            .collect();
        bookings.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(page(bookings, filter.page))
    }

    async fn get_payment(&self, id: Uuid) -> CoreResult<Option<Payment>> {
        Ok(self.shared.tables()?.payments.get(&id).cloned())
    }

    async fn get_payment_by_order(&self, external_order_id: &str) -> CoreResult<Option<Payment>> {
        Ok(self
            .shared
            .tables()?
            .payments
            .values()
            .find(|p| p.external_order_id.as_deref() == Some(external_order_id))
            .cloned())
    }

    async fn list_payments(&self, user_id: Uuid, window: Page) -> CoreResult<Vec<Payment>> {
        let mut payments: Vec<Payment> = self
            .shared
            .tables()?
            .payments
            .values()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect();
        payments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(page(payments, window))
    }
}

pub struct MemoryTx {
    shared: Arc<Shared>,
    held: HeldLocks,
    staged: Tables,
}

impl MemoryTx {
    async fn lock(&mut self, key: RowKey) -> CoreResult<()> {
        if self.held.guards.contains_key(&key) {
            return Ok(());
        }
        let mutex = self.shared.row_lock(key)?;
        let guard = tokio::time::timeout(self.shared.lock_timeout, mutex.lock_owned())
            .await
            .map_err(|_| CoreError::LockTimeout)?;
        self.held.guards.insert(key, guard);
        Ok(())
    }

    fn read_tour(&self, id: Uuid) -> CoreResult<Option<Tour>> {
        if let Some(tour) = self.staged.tours.get(&id) {
            return Ok(Some(tour.clone()));
        }
        Ok(self.shared.tables()?.tours.get(&id).cloned())
    }

    fn read_booking(&self, id: Uuid) -> CoreResult<Option<Booking>> {
        if let Some(booking) = self.staged.bookings.get(&id) {
            return Ok(Some(booking.clone()));
        }
        Ok(self.shared.tables()?.bookings.get(&id).cloned())
    }

    fn read_payment(&self, id: Uuid) -> CoreResult<Option<Payment>> {
        if let Some(payment) = self.staged.payments.get(&id) {
            return Ok(Some(payment.clone()));
        }
        Ok(self.shared.tables()?.payments.get(&id).cloned())
    }

    fn find_payment_by_order(&self, external_order_id: &str) -> CoreResult<Option<Uuid>> {
        let staged = self
            .staged
            .payments
            .values()
            .find(|p| p.external_order_id.as_deref() == Some(external_order_id))
            .map(|p| p.id);
        if staged.is_some() {
            return Ok(staged);
        }
        Ok(self
            .shared
            .tables()?
            .payments
            .values()
            .find(|p| p.external_order_id.as_deref() == Some(external_order_id))
            .map(|p| p.id))
    }

    fn stage_tour(&mut self, tour: &mut Locked<Tour>, updated: Tour) {
        self.staged.tours.insert(updated.id, updated.clone());
        tour.refresh(updated);
    }
}

fn order_id_taken(tables: &Tables, payment_id: Uuid, external_order_id: &str) -> bool {
    tables
        .payments
        .values()
        .any(|p| p.id != payment_id && p.external_order_id.as_deref() == Some(external_order_id))
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn insert_tour(&mut self, tour: &Tour) -> CoreResult<()> {
        if self.read_tour(tour.id)?.is_some() {
            return Err(CoreError::ConstraintViolation(format!("tour {} exists", tour.id)));
        }
        self.staged.tours.insert(tour.id, tour.clone());
        Ok(())
    }

    async fn tour_for_update(&mut self, id: Uuid) -> CoreResult<Option<Locked<Tour>>> {
        self.lock(RowKey::Tour(id)).await?;
        Ok(self.read_tour(id)?.map(Locked::assume_locked))
    }

    async fn update_tour_details(&mut self, tour: &mut Locked<Tour>, details: &Tour) -> CoreResult<()> {
        let mut updated = details.clone();
        updated.id = tour.id;
        updated.total_seats = tour.total_seats;
        updated.remaining_seats = tour.remaining_seats;
        updated.created_at = tour.created_at;
        updated.updated_at = Utc::now();
        self.stage_tour(tour, updated);
        Ok(())
    }

    async fn set_seats(&mut self, tour: &mut Locked<Tour>, total: i32, remaining: i32) -> CoreResult<()> {
        self.shared.check_fault(Fault::SetSeats)?;
        if remaining < 0 || remaining > total {
            return Err(CoreError::ConstraintViolation(format!(
                "seat counts out of range: {remaining}/{total}"
            )));
        }
        let mut updated = tour.get().clone();
        updated.total_seats = total;
        updated.remaining_seats = remaining;
        updated.updated_at = Utc::now();
        self.stage_tour(tour, updated);
        Ok(())
    }

    async fn insert_booking(&mut self, booking: &Booking) -> CoreResult<()> {
        self.shared.check_fault(Fault::InsertBooking)?;
        if self.read_tour(booking.tour_id)?.is_none() {
            return Err(CoreError::ConstraintViolation(format!(
                "booking references unknown tour {}",
                booking.tour_id
            )));
        }
        if booking.party_size <= 0 {
            return Err(CoreError::ConstraintViolation("party_size must be positive".into()));
        }
        self.staged.bookings.insert(booking.id, booking.clone());
        Ok(())
    }

    async fn booking_for_update(&mut self, id: Uuid, owner: Option<Uuid>) -> CoreResult<Option<Locked<Booking>>> {
        self.lock(RowKey::Booking(id)).await?;
        Ok(self
            .read_booking(id)?
            .filter(|b| owner.map(|o| b.user_id == o).unwrap_or(true))
            .map(Locked::assume_locked))
    }

    async fn set_booking_status(
        &mut self,
        booking: &mut Locked<Booking>,
        status: BookingStatus,
        at: DateTime<Utc>,
    ) -> CoreResult<()> {
        self.shared.check_fault(Fault::SetBookingStatus)?;
        let mut updated = booking.get().clone();
        updated.status = status;
        updated.updated_at = at;
        self.staged.bookings.insert(updated.id, updated.clone());
        booking.refresh(updated);
        Ok(())
    }

    async fn insert_payment(&mut self, payment: &Payment) -> CoreResult<()> {
        if self.read_booking(payment.booking_id)?.is_none() {
            return Err(CoreError::ConstraintViolation(format!(
                "payment references unknown booking {}",
                payment.booking_id
            )));
        }
        self.staged.payments.insert(payment.id, payment.clone());
        Ok(())
    }

    async fn payment_for_update(&mut self, id: Uuid) -> CoreResult<Option<Locked<Payment>>> {
        self.lock(RowKey::Payment(id)).await?;
        Ok(self.read_payment(id)?.map(Locked::assume_locked))
    }

    async fn payment_by_order_for_update(&mut self, external_order_id: &str) -> CoreResult<Option<Locked<Payment>>> {
        let Some(id) = self.find_payment_by_order(external_order_id)? else {
            return Ok(None);
        };
        self.lock(RowKey::Payment(id)).await?;
        // The order id cannot change once attached, but re-read after the wait.
        Ok(self
            .read_payment(id)?
            .filter(|p| p.external_order_id.as_deref() == Some(external_order_id))
            .map(Locked::assume_locked))
    }

    async fn set_payment_order_id(&mut self, payment: &mut Locked<Payment>, external_order_id: &str) -> CoreResult<()> {
        let taken = order_id_taken(&self.staged, payment.id, external_order_id) || {
            let tables = self.shared.tables()?;
            order_id_taken(&tables, payment.id, external_order_id)
        };
        if taken {
            return Err(CoreError::ConstraintViolation(format!(
                "external order id {external_order_id} already in use"
            )));
        }
        let mut updated = payment.get().clone();
        updated.external_order_id = Some(external_order_id.to_string());
        updated.updated_at = Utc::now();
        self.staged.payments.insert(updated.id, updated.clone());
        payment.refresh(updated);
        Ok(())
    }

    async fn set_payment_status(
        &mut self,
        payment: &mut Locked<Payment>,
        status: PaymentStatus,
        completed_at: Option<DateTime<Utc>>,
    ) -> CoreResult<()> {
        self.shared.check_fault(Fault::SetPaymentStatus)?;
        let mut updated = payment.get().clone();
        updated.status = status;
        updated.completed_at = completed_at.or(updated.completed_at);
        updated.updated_at = Utc::now();
        self.staged.payments.insert(updated.id, updated.clone());
        payment.refresh(updated);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> CoreResult<()> {
        self.shared.check_fault(Fault::Commit)?;
        let MemoryTx { shared, held, staged } = *self;
        {
            let mut tables = shared.tables()?;
            for payment in staged.payments.values() {
                if let Some(order_id) = payment.external_order_id.as_deref() {
                    if order_id_taken(&tables, payment.id, order_id) {
                        return Err(CoreError::ConstraintViolation(format!(
                            "external order id {order_id} already in use"
                        )));
                    }
                }
            }
            tables.tours.extend(staged.tours);
            tables.bookings.extend(staged.bookings);
            tables.payments.extend(staged.payments);
        }
        // Row locks are released only after the writes are visible.
        drop(held);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> CoreResult<()> {
        Ok(())
    }
}
