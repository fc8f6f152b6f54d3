use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tourbook_core::{Booking, Caller, CaptureOutcome, CoreError, Page, Payment, PaymentStatus};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreatePaymentRequest {
    pub booking_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct CreatePaymentResponse {
    pub payment: Payment,
    pub approval_url: Option<String>,
    pub currency: String,
}

/// Query string the gateway appends when redirecting back.
#[derive(Debug, Deserialize)]
pub struct GatewayReturn {
    pub token: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct CallbackResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment: Option<Payment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub booking: Option<Booking>,
}

impl CallbackResponse {
    /// A repeated callback reports the payment as it stands.
    async fn already_processed(state: &AppState, payment_id: Uuid) -> Result<Self, AppError> {
        let payment = state.coordinator.payment(payment_id).await?;
        Ok(Self {
            status: "already_processed",
            payment: Some(payment),
            booking: None,
        })
    }
}

// ============================================================================
// Routes
// ============================================================================

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/payments", post(create_payment))
        .route("/v1/payments/history", get(payment_history))
}

/// Gateway redirects. The order token is verified by capturing it with the gateway.
pub fn callback_routes() -> Router<AppState> {
    Router::new()
        .route("/v1/payments/success", get(payment_success))
        .route("/v1/payments/cancel", get(payment_cancel))
}

// ============================================================================
// Handlers
// ============================================================================

async fn create_payment(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Json(req): Json<CreatePaymentRequest>,
) -> Result<(StatusCode, Json<CreatePaymentResponse>), AppError> {
    let (payment, booking) = state
        .coordinator
        .open_payment(caller.user_id, req.booking_id)
        .await?;

    let order = match state
        .gateway
        .create_order(&booking, payment.amount, &state.currency)
        .await
    {
        Ok(order) => order,
        Err(e) => {
            tracing::error!(payment_id = %payment.id, error = %e, "gateway order creation failed");
            if let Err(err) = state
                .retry
                .run("abandon_payment", || state.coordinator.abandon_payment(payment.id))
                .await
            {
                tracing::error!(payment_id = %payment.id, error = %err, "could not mark payment failed");
            }
            return Err(AppError::Gateway(e.to_string()));
        }
    };

    let payment = state
        .retry
        .run("attach_gateway_order", || {
            state.coordinator.attach_gateway_order(payment.id, &order.order_id)
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreatePaymentResponse {
            payment,
            approval_url: order.approval_url,
            currency: state.currency.clone(),
        }),
    ))
}

async fn payment_success(
    State(state): State<AppState>,
    Query(ret): Query<GatewayReturn>,
) -> Result<Json<CallbackResponse>, AppError> {
    // Providers refuse a second capture, so settled orders never reach the gateway again.
    let current = state.coordinator.payment_by_order(&ret.token).await?;
    if current.status != PaymentStatus::Pending {
        tracing::info!(payment_id = %current.id, status = %current.status, "duplicate payment callback");
        return Ok(Json(CallbackResponse::already_processed(&state, current.id).await?));
    }

    let outcome = state
        .gateway
        .capture_order(&ret.token)
        .await
        .map_err(|e| AppError::Gateway(e.to_string()))?;

    match outcome {
        CaptureOutcome::Completed => {
            let settled = state
                .retry
                .run("settle_payment", || state.coordinator.settle_payment(&ret.token, Utc::now()))
                .await;
            match settled {
                Ok(settlement) => Ok(Json(CallbackResponse {
                    status: "completed",
                    payment: Some(settlement.payment),
                    booking: Some(settlement.booking),
                })),
                // Duplicate callback: the first one already did the work.
                Err(CoreError::AlreadyProcessed(payment_id)) => {
                    tracing::info!(%payment_id, "duplicate payment callback");
                    Ok(Json(CallbackResponse::already_processed(&state, payment_id).await?))
                }
                Err(err) => {
                    tracing::error!(order_id = %ret.token, error = %err, "captured payment could not be settled");
                    Err(err.into())
                }
            }
        }
        CaptureOutcome::Declined => {
            match state
                .retry
                .run("fail_payment", || state.coordinator.fail_payment(&ret.token))
                .await
            {
                Ok(_) | Err(CoreError::AlreadyProcessed(_)) => Err(AppError::PaymentDeclined),
                Err(err) => Err(err.into()),
            }
        }
    }
}

async fn payment_cancel(
    State(state): State<AppState>,
    Query(ret): Query<GatewayReturn>,
) -> Result<Json<CallbackResponse>, AppError> {
    let cancelled = state
        .retry
        .run("cancel_payment", || state.coordinator.cancel_payment(&ret.token))
        .await;
    match cancelled {
        Ok(payment) => Ok(Json(CallbackResponse {
            status: "cancelled",
            payment: Some(payment),
            booking: None,
        })),
        Err(CoreError::AlreadyProcessed(payment_id)) => {
            Ok(Json(CallbackResponse::already_processed(&state, payment_id).await?))
        }
        Err(err) => Err(err.into()),
    }
}

async fn payment_history(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<Payment>>, AppError> {
    let page = Page::new(query.limit, query.offset);
    Ok(Json(state.coordinator.payment_history(caller.user_id, page).await?))
}
