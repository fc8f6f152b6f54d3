use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use tourbook_core::CoreError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Authentication(String),
    #[error("{0}")]
    Authorization(String),
    #[error("{0}")]
    Validation(String),
    #[error("payment gateway error: {0}")]
    Gateway(String),
    #[error("payment was declined")]
    PaymentDeclined,
    #[error("{0}")]
    Internal(String),
    #[error(transparent)]
    Core(#[from] CoreError),
}

impl AppError {
    fn parts(self) -> (StatusCode, Value) {
        match self {
            AppError::Authentication(msg) => (StatusCode::UNAUTHORIZED, json!({ "error": msg })),
            AppError::Authorization(msg) => (StatusCode::FORBIDDEN, json!({ "error": msg })),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            AppError::Gateway(msg) => {
                tracing::error!("Payment gateway failure: {}", msg);
                (StatusCode::BAD_GATEWAY, json!({ "error": "Payment gateway unavailable" }))
            }
            AppError::PaymentDeclined => (
                StatusCode::PAYMENT_REQUIRED,
                json!({ "error": "Payment was declined" }),
            ),
            AppError::Internal(msg) => {
                tracing::error!("Internal Server Error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": "Internal Server Error" }))
            }
            AppError::Core(err) => core_parts(err),
        }
    }
}

fn core_parts(err: CoreError) -> (StatusCode, Value) {
    let message = err.to_string();
    match err {
        CoreError::NotFound { .. } => (StatusCode::NOT_FOUND, json!({ "error": message })),
        CoreError::InsufficientCapacity { remaining, .. } => (
            StatusCode::CONFLICT,
            json!({ "error": message, "remaining_seats": remaining }),
        ),
        CoreError::InvalidStateTransition { from, .. } => (
            StatusCode::CONFLICT,
            json!({ "error": message, "current_status": from }),
        ),
        CoreError::AlreadyProcessed(_) => (StatusCode::CONFLICT, json!({ "error": message })),
        CoreError::LockTimeout => (
            StatusCode::SERVICE_UNAVAILABLE,
            json!({ "error": "Resource is busy, please retry" }),
        ),
        CoreError::ConstraintViolation(detail) => {
            tracing::warn!("Constraint violation: {}", detail);
            (StatusCode::CONFLICT, json!({ "error": "Conflict" }))
        }
        CoreError::Validation(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
        CoreError::Storage(detail) => {
            tracing::error!("Storage failure: {}", detail);
            (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": "Internal Server Error" }))
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = self.parts();
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tourbook_core::{BookingStatus, Entity};
    use uuid::Uuid;

    #[test]
    fn test_capacity_error_carries_remaining_seats() {
        let (status, body) = AppError::from(CoreError::InsufficientCapacity {
            remaining: 2,
            requested: 3,
        })
        .parts();
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["remaining_seats"], 2);
    }

    #[test]
    fn test_transition_error_carries_current_status() {
        let (status, body) = AppError::from(CoreError::InvalidStateTransition {
            from: BookingStatus::Cancelled,
            to: BookingStatus::Confirmed,
        })
        .parts();
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["current_status"], "cancelled");
    }

    #[test]
    fn test_internal_details_are_hidden() {
        let (status, body) = AppError::from(CoreError::Storage("connection reset".into())).parts();
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Internal Server Error");

        let (status, body) =
            AppError::from(CoreError::ConstraintViolation("payments_external_order_id_key".into()))
                .parts();
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "Conflict");
    }

    #[test]
    fn test_status_codes() {
        let cases = [
            (CoreError::not_found(Entity::Booking, Uuid::nil()), StatusCode::NOT_FOUND),
            (CoreError::AlreadyProcessed(Uuid::nil()), StatusCode::CONFLICT),
            (CoreError::LockTimeout, StatusCode::SERVICE_UNAVAILABLE),
            (CoreError::Validation("bad".into()), StatusCode::BAD_REQUEST),
        ];
        for (err, expected) in cases {
            assert_eq!(AppError::from(err).parts().0, expected);
        }
    }
}
