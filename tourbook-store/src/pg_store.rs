//! PostgreSQL backend for the reservation store.
//!
//! Every `*_for_update` read is a `SELECT ... FOR UPDATE`; the row stays locked
//! until the surrounding transaction commits or rolls back. Each transaction
//! sets its own `lock_timeout` so waits surface as `CoreError::LockTimeout`.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use tourbook_core::{
    Booking, BookingFilter, BookingStatus, CoreError, CoreResult, Locked, Page, Payment,
    PaymentStatus, ReservationStore, StoreTx, Tour, TourFilter,
};

const TOUR_COLUMNS: &str = "id, name, description, location, price, duration_days, departure_date, \
     total_seats, remaining_seats, image_url, status, created_at, updated_at";
const BOOKING_COLUMNS: &str =
    "id, user_id, tour_id, party_size, total_amount, status, note, created_at, updated_at";
const PAYMENT_COLUMNS: &str = "id, user_id, booking_id, external_order_id, amount, status, \
     completed_at, created_at, updated_at";

/// Classifies a PostgreSQL SQLSTATE into the store error taxonomy.
fn classify_sqlstate(code: &str, message: &str) -> Option<CoreError> {
    match code {
        // lock_not_available, deadlock_detected
        "55P03" | "40P01" => Some(CoreError::LockTimeout),
        // unique, foreign key, check
        "23505" | "23503" | "23514" => Some(CoreError::ConstraintViolation(message.to_string())),
        _ => None,
    }
}

pub fn map_db_error(err: sqlx::Error) -> CoreError {
    if let sqlx::Error::Database(db) = &err {
        if let Some(mapped) = db
            .code()
            .as_deref()
            .and_then(|code| classify_sqlstate(code, db.message()))
        {
            return mapped;
        }
    }
    CoreError::Storage(err.to_string())
}

// Internal row structs for type-safe querying
#[derive(sqlx::FromRow)]
struct TourRow {
    id: Uuid,
    name: String,
    description: Option<String>,
    location: String,
    price: i64,
    duration_days: i32,
    departure_date: NaiveDate,
    total_seats: i32,
    remaining_seats: i32,
    image_url: Option<String>,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TourRow> for Tour {
    type Error = CoreError;

    fn try_from(row: TourRow) -> CoreResult<Self> {
        Ok(Tour {
            id: row.id,
            name: row.name,
            description: row.description,
            location: row.location,
            price: row.price,
            duration_days: row.duration_days,
            departure_date: row.departure_date,
            total_seats: row.total_seats,
            remaining_seats: row.remaining_seats,
            image_url: row.image_url,
            status: row.status.parse()?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct BookingRow {
    id: Uuid,
    user_id: Uuid,
    tour_id: Uuid,
    party_size: i32,
    total_amount: i64,
    status: String,
    note: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<BookingRow> for Booking {
    type Error = CoreError;

    fn try_from(row: BookingRow) -> CoreResult<Self> {
        let status: BookingStatus = row
            .status
            .parse()
            .map_err(|_| CoreError::Storage(format!("unknown booking status '{}'", row.status)))?;
        Ok(Booking {
            id: row.id,
            user_id: row.user_id,
            tour_id: row.tour_id,
            party_size: row.party_size,
            total_amount: row.total_amount,
            status,
            note: row.note,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PaymentRow {
    id: Uuid,
    user_id: Uuid,
    booking_id: Uuid,
    external_order_id: Option<String>,
    amount: i64,
    status: String,
    completed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = CoreError;

    fn try_from(row: PaymentRow) -> CoreResult<Self> {
        Ok(Payment {
            id: row.id,
            user_id: row.user_id,
            booking_id: row.booking_id,
            external_order_id: row.external_order_id,
            amount: row.amount,
            status: row.status.parse::<PaymentStatus>()?,
            completed_at: row.completed_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn convert_all<R, T>(rows: Vec<R>) -> CoreResult<Vec<T>>
where
    T: TryFrom<R, Error = CoreError>,
{
    rows.into_iter().map(T::try_from).collect()
}

fn push_page(qb: &mut QueryBuilder<'_, Postgres>, page: Page) {
    qb.push(" LIMIT ").push_bind(page.limit);
    qb.push(" OFFSET ").push_bind(page.offset);
}

pub struct PgStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PgStore {
    pub fn new(pool: PgPool, lock_timeout: Duration) -> Self {
        Self { pool, lock_timeout }
    }
}

/// `ILIKE` pattern matching `needle` as a literal substring.
fn contains_pattern(needle: &str) -> String {
    let mut pattern = String::with_capacity(needle.len() + 2);
    pattern.push('%');
    for c in needle.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

#[async_trait]
impl ReservationStore for PgStore {
    async fn begin(&self) -> CoreResult<Box<dyn StoreTx>> {
        let mut tx = self.pool.begin().await.map_err(map_db_error)?;
        // Transaction-local: reset automatically at commit or rollback.
        sqlx::query("SELECT set_config('lock_timeout', $1, true)")
            .bind(format!("{}ms", self.lock_timeout.as_millis()))
            .execute(&mut *tx)
            .await
            .map_err(map_db_error)?;
        Ok(Box::new(PgTx { tx }))
    }

    async fn get_tour(&self, id: Uuid) -> CoreResult<Option<Tour>> {
        let row = sqlx::query_as::<_, TourRow>(&format!("SELECT {TOUR_COLUMNS} FROM tours WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_error)?;
        row.map(Tour::try_from).transpose()
    }

    async fn list_tours(&self, filter: &TourFilter) -> CoreResult<Vec<Tour>> {
        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {TOUR_COLUMNS} FROM tours WHERE TRUE"));
        if !filter.include_inactive {
            qb.push(" AND status = 'active'");
        }
        if let Some(name) = &filter.name {
            qb.push(" AND name ILIKE ").push_bind(contains_pattern(name)).push(" ESCAPE '\\'");
        }
        if let Some(location) = &filter.location {
            qb.push(" AND location ILIKE ").push_bind(contains_pattern(location)).push(" ESCAPE '\\'");
        }
        if let Some(min) = filter.min_price {
            qb.push(" AND price >= ").push_bind(min);
        }
        if let Some(max) = filter.max_price {
            qb.push(" AND price <= ").push_bind(max);
        }
        if let Some(days) = filter.duration_days {
            qb.push(" AND duration_days = ").push_bind(days);
        }
        qb.push(" ORDER BY departure_date, created_at");
        push_page(&mut qb, filter.page);

        let rows = qb
            .build_query_as::<TourRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(map_db_error)?;
        convert_all(rows)
    }

    async fn get_booking(&self, id: Uuid, owner: Option<Uuid>) -> CoreResult<Option<Booking>> {
        let row = sqlx::query_as::<_, BookingRow>(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = $1 AND ($2::uuid IS NULL OR user_id = $2)"
        ))
        .bind(id)
        .bind(owner)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_error)?;
        row.map(Booking::try_from).transpose()
    }

    async fn list_bookings(&self, filter: &BookingFilter) -> CoreResult<Vec<Booking>> {
        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE TRUE"));
        if let Some(user_id) = filter.user_id {
            qb.push(" AND user_id = ").push_bind(user_id);
        }
        if let Some(tour_id) = filter.tour_id {
            qb.push(" AND tour_id = ").push_bind(tour_id);
        }
        if let Some(status) = filter.status {
            qb.push(" AND status = ").push_bind(status.as_str());
        }
        qb.push(" ORDER BY created_at DESC");
        push_page(&mut qb, filter.page);

        let rows = qb
            .build_query_as::<BookingRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(map_db_error)?;
        convert_all(rows)
    }

    async fn get_payment(&self, id: Uuid) -> CoreResult<Option<Payment>> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_error)?;
        row.map(Payment::try_from).transpose()
    }

    async fn get_payment_by_order(&self, external_order_id: &str) -> CoreResult<Option<Payment>> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE external_order_id = $1"
        ))
        .bind(external_order_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_error)?;
        row.map(Payment::try_from).transpose()
    }

    async fn list_payments(&self, user_id: Uuid, page: Page) -> CoreResult<Vec<Payment>> {
        let rows = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE user_id = $1 ORDER BY created_at DESC LIMIT $2 OFFSET $3"
        ))
        .bind(user_id)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_error)?;
        convert_all(rows)
    }
}

pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

impl PgTx {
    async fn fetch_tour(&mut self, sql: &str, id: Uuid) -> CoreResult<Option<Tour>> {
        let row = sqlx::query_as::<_, TourRow>(sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(map_db_error)?;
        row.map(Tour::try_from).transpose()
    }
}

#[async_trait]
impl StoreTx for PgTx {
    async fn insert_tour(&mut self, tour: &Tour) -> CoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO tours (id, name, description, location, price, duration_days, departure_date,
                               total_seats, remaining_seats, image_url, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(tour.id)
        .bind(&tour.name)
        .bind(&tour.description)
        .bind(&tour.location)
        .bind(tour.price)
        .bind(tour.duration_days)
        .bind(tour.departure_date)
        .bind(tour.total_seats)
        .bind(tour.remaining_seats)
        .bind(&tour.image_url)
        .bind(tour.status.as_str())
        .bind(tour.created_at)
        .bind(tour.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_db_error)?;
        Ok(())
    }

    async fn tour_for_update(&mut self, id: Uuid) -> CoreResult<Option<Locked<Tour>>> {
        let sql = format!("SELECT {TOUR_COLUMNS} FROM tours WHERE id = $1 FOR UPDATE");
        let tour = self.fetch_tour(&sql, id).await?;
        debug!(tour_id = %id, found = tour.is_some(), "tour row locked");
        Ok(tour.map(Locked::assume_locked))
    }

    async fn update_tour_details(&mut self, tour: &mut Locked<Tour>, details: &Tour) -> CoreResult<()> {
        let row = sqlx::query_as::<_, TourRow>(&format!(
            r#"
            UPDATE tours
               SET name = $2, description = $3, location = $4, price = $5, duration_days = $6,
                   departure_date = $7, image_url = $8, status = $9, updated_at = now()
             WHERE id = $1
            RETURNING {TOUR_COLUMNS}
            "#
        ))
        .bind(tour.id)
        .bind(&details.name)
        .bind(&details.description)
        .bind(&details.location)
        .bind(details.price)
        .bind(details.duration_days)
        .bind(details.departure_date)
        .bind(&details.image_url)
        .bind(details.status.as_str())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(map_db_error)?;
        tour.refresh(row.try_into()?);
        Ok(())
    }

    async fn set_seats(&mut self, tour: &mut Locked<Tour>, total: i32, remaining: i32) -> CoreResult<()> {
        let row = sqlx::query_as::<_, TourRow>(&format!(
            r#"
            UPDATE tours
               SET total_seats = $2, remaining_seats = $3, updated_at = now()
             WHERE id = $1
            RETURNING {TOUR_COLUMNS}
            "#
        ))
        .bind(tour.id)
        .bind(total)
        .bind(remaining)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(map_db_error)?;
        tour.refresh(row.try_into()?);
        Ok(())
    }

    async fn insert_booking(&mut self, booking: &Booking) -> CoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO bookings (id, user_id, tour_id, party_size, total_amount, status, note, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(booking.id)
        .bind(booking.user_id)
        .bind(booking.tour_id)
        .bind(booking.party_size)
        .bind(booking.total_amount)
        .bind(booking.status.as_str())
        .bind(&booking.note)
        .bind(booking.created_at)
        .bind(booking.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_db_error)?;
        Ok(())
    }

    async fn booking_for_update(&mut self, id: Uuid, owner: Option<Uuid>) -> CoreResult<Option<Locked<Booking>>> {
        let row = sqlx::query_as::<_, BookingRow>(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = $1 AND ($2::uuid IS NULL OR user_id = $2) FOR UPDATE"
        ))
        .bind(id)
        .bind(owner)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_db_error)?;
        Ok(row.map(Booking::try_from).transpose()?.map(Locked::assume_locked))
    }

    async fn set_booking_status(
        &mut self,
        booking: &mut Locked<Booking>,
        status: BookingStatus,
        at: DateTime<Utc>,
    ) -> CoreResult<()> {
        let row = sqlx::query_as::<_, BookingRow>(&format!(
            "UPDATE bookings SET status = $2, updated_at = $3 WHERE id = $1 RETURNING {BOOKING_COLUMNS}"
        ))
        .bind(booking.id)
        .bind(status.as_str())
        .bind(at)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(map_db_error)?;
        booking.refresh(row.try_into()?);
        Ok(())
    }

    async fn insert_payment(&mut self, payment: &Payment) -> CoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO payments (id, user_id, booking_id, external_order_id, amount, status, completed_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(payment.id)
        .bind(payment.user_id)
        .bind(payment.booking_id)
        .bind(&payment.external_order_id)
        .bind(payment.amount)
        .bind(payment.status.as_str())
        .bind(payment.completed_at)
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_db_error)?;
        Ok(())
    }

    async fn payment_for_update(&mut self, id: Uuid) -> CoreResult<Option<Locked<Payment>>> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_db_error)?;
        Ok(row.map(Payment::try_from).transpose()?.map(Locked::assume_locked))
    }

    async fn payment_by_order_for_update(&mut self, external_order_id: &str) -> CoreResult<Option<Locked<Payment>>> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE external_order_id = $1 FOR UPDATE"
        ))
        .bind(external_order_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_db_error)?;
        Ok(row.map(Payment::try_from).transpose()?.map(Locked::assume_locked))
    }

    async fn set_payment_order_id(&mut self, payment: &mut Locked<Payment>, external_order_id: &str) -> CoreResult<()> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "UPDATE payments SET external_order_id = $2, updated_at = now() WHERE id = $1 RETURNING {PAYMENT_COLUMNS}"
        ))
        .bind(payment.id)
        .bind(external_order_id)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(map_db_error)?;
        payment.refresh(row.try_into()?);
        Ok(())
    }

    async fn set_payment_status(
        &mut self,
        payment: &mut Locked<Payment>,
        status: PaymentStatus,
        completed_at: Option<DateTime<Utc>>,
    ) -> CoreResult<()> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            r#"
            UPDATE payments
               SET status = $2, completed_at = COALESCE($3, completed_at), updated_at = now()
             WHERE id = $1
            RETURNING {PAYMENT_COLUMNS}
            "#
        ))
        .bind(payment.id)
        .bind(status.as_str())
        .bind(completed_at)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(map_db_error)?;
        payment.refresh(row.try_into()?);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> CoreResult<()> {
        self.tx.commit().await.map_err(map_db_error)
    }

    async fn rollback(self: Box<Self>) -> CoreResult<()> {
        self.tx.rollback().await.map_err(map_db_error)
    }
}
