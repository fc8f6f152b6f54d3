use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};
use serde::Deserialize;
use tourbook_core::{
    Actor, Booking, BookingFilter, BookingStatus, Caller, ConfirmVia, CreateBooking, Page,
};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

// ============================================================================
// Request Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateBookingRequest {
    pub tour_id: Uuid,
    pub party_size: i32,
    pub note: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct BookingQuery {
    pub status: Option<BookingStatus>,
    pub tour_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AdminAction {
    Confirm,
    Reject,
    Complete,
}

#[derive(Debug, Deserialize)]
pub struct AdminBookingRequest {
    pub action: AdminAction,
}

// ============================================================================
// Routes
// ============================================================================

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/bookings", post(create_booking).get(list_my_bookings))
        .route("/v1/bookings/{id}", get(get_my_booking))
        .route("/v1/bookings/{id}/cancel", post(cancel_booking))
        .route("/v1/bookings/{id}/confirm-payment", post(confirm_booking))
}

pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/v1/admin/bookings", get(list_all_bookings))
        .route("/v1/admin/bookings/{id}", axum::routing::put(admin_update_booking))
}

// ============================================================================
// Customer Handlers
// ============================================================================

async fn create_booking(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Json(req): Json<CreateBookingRequest>,
) -> Result<(StatusCode, Json<Booking>), AppError> {
    // Not retried: a second attempt could reserve seats twice.
    let booking = state
        .coordinator
        .create_booking(CreateBooking {
            user_id: caller.user_id,
            tour_id: req.tour_id,
            party_size: req.party_size,
            note: req.note,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(booking)))
}

async fn list_my_bookings(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Query(query): Query<BookingQuery>,
) -> Result<Json<Vec<Booking>>, AppError> {
    let filter = BookingFilter {
        user_id: Some(caller.user_id),
        tour_id: query.tour_id,
        status: query.status,
        page: Page::new(query.limit, query.offset),
    };
    Ok(Json(state.coordinator.list_bookings(&filter).await?))
}

async fn get_my_booking(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<Uuid>,
) -> Result<Json<Booking>, AppError> {
    Ok(Json(state.coordinator.booking(id, Some(caller.user_id)).await?))
}

async fn cancel_booking(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<Uuid>,
) -> Result<Json<Booking>, AppError> {
    let actor = caller.as_customer();
    let booking = state
        .retry
        .run("cancel_booking", || state.coordinator.cancel_booking(id, actor))
        .await?;
    Ok(Json(booking))
}

async fn confirm_booking(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<Uuid>,
) -> Result<Json<Booking>, AppError> {
    let via = ConfirmVia::CustomerSelfConfirm {
        user_id: caller.user_id,
    };
    let booking = state
        .retry
        .run("confirm_booking", || state.coordinator.confirm_booking(id, via))
        .await?;
    Ok(Json(booking))
}

// ============================================================================
// Admin Handlers
// ============================================================================

async fn list_all_bookings(
    State(state): State<AppState>,
    Query(query): Query<BookingQuery>,
) -> Result<Json<Vec<Booking>>, AppError> {
    let filter = BookingFilter {
        user_id: query.user_id,
        tour_id: query.tour_id,
        status: query.status,
        page: Page::new(query.limit, query.offset),
    };
    Ok(Json(state.coordinator.list_bookings(&filter).await?))
}

async fn admin_update_booking(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<Uuid>,
    Json(req): Json<AdminBookingRequest>,
) -> Result<Json<Booking>, AppError> {
    tracing::info!(booking_id = %id, admin = %caller.user_id, action = ?req.action, "admin booking action");
    let coordinator = &state.coordinator;
    let booking = match req.action {
        AdminAction::Confirm => {
            state
                .retry
                .run("admin_confirm", || coordinator.confirm_booking(id, ConfirmVia::AdminConfirm))
                .await?
        }
        AdminAction::Reject => {
            state
                .retry
                .run("admin_reject", || coordinator.cancel_booking(id, Actor::Admin))
                .await?
        }
        AdminAction::Complete => {
            state
                .retry
                .run("admin_complete", || coordinator.complete_booking(id))
                .await?
        }
    };
    Ok(Json(booking))
}
