use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use tourbook_core::{NewTour, Page, Tour, TourFilter, TourPatch};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct TourQuery {
    pub name: Option<String>,
    pub location: Option<String>,
    pub min_price: Option<i64>,
    pub max_price: Option<i64>,
    pub duration_days: Option<i32>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl TourQuery {
    fn into_filter(self) -> TourFilter {
        TourFilter {
            name: self.name,
            location: self.location,
            min_price: self.min_price,
            max_price: self.max_price,
            duration_days: self.duration_days,
            include_inactive: false,
            page: Page::new(self.limit, self.offset),
        }
    }
}

/// Public catalog
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/tours", get(list_tours))
        .route("/v1/tours/{id}", get(get_tour))
}

pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/v1/admin/tours", post(create_tour).get(list_all_tours))
        .route("/v1/admin/tours/{id}", put(update_tour).delete(deactivate_tour))
}

async fn list_tours(
    State(state): State<AppState>,
    Query(query): Query<TourQuery>,
) -> Result<Json<Vec<Tour>>, AppError> {
    let tours = state.coordinator.list_tours(&query.into_filter()).await?;
    Ok(Json(tours))
}

/// Every status, for the management surface.
async fn list_all_tours(
    State(state): State<AppState>,
    Query(query): Query<TourQuery>,
) -> Result<Json<Vec<Tour>>, AppError> {
    let filter = TourFilter {
        include_inactive: true,
        ..query.into_filter()
    };
    Ok(Json(state.coordinator.list_tours(&filter).await?))
}

async fn get_tour(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Tour>, AppError> {
    Ok(Json(state.coordinator.tour(id).await?))
}

async fn create_tour(
    State(state): State<AppState>,
    Json(new_tour): Json<NewTour>,
) -> Result<(StatusCode, Json<Tour>), AppError> {
    let tour = state.coordinator.create_tour(new_tour).await?;
    Ok((StatusCode::CREATED, Json(tour)))
}

async fn update_tour(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(patch): Json<TourPatch>,
) -> Result<Json<Tour>, AppError> {
    let tour = state
        .retry
        .run("update_tour", || state.coordinator.update_tour(id, patch.clone()))
        .await?;
    Ok(Json(tour))
}

/// Soft delete; bookings keep referencing the tour.
async fn deactivate_tour(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Tour>, AppError> {
    let tour = state
        .retry
        .run("deactivate_tour", || state.coordinator.deactivate_tour(id))
        .await?;
    Ok(Json(tour))
}
