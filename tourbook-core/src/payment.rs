use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::booking::Booking;
use crate::error::CoreError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "completed" => Ok(PaymentStatus::Completed),
            "failed" => Ok(PaymentStatus::Failed),
            "cancelled" => Ok(PaymentStatus::Cancelled),
            other => Err(CoreError::Storage(format!("unknown payment status '{other}'"))),
        }
    }
}

/// One attempt to pay for a booking through the gateway.
///
/// Once `Completed`, `amount` and `external_order_id` never change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Payment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub booking_id: Uuid,
    /// Gateway order id, attached after the gateway accepts the order
    pub external_order_id: Option<String>,
    pub amount: i64,
    pub status: PaymentStatus,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayOrder {
    pub order_id: String,
    pub approval_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureOutcome {
    Completed,
    Declined,
}

/// The external payment provider.
///
/// Amounts are in the booking currency; converting to the provider's
/// settlement currency is the adapter's business.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Create an order the customer can approve
    async fn create_order(
        &self,
        booking: &Booking,
        amount: i64,
        currency: &str,
    ) -> Result<GatewayOrder, Box<dyn std::error::Error + Send + Sync>>;

    /// Capture an approved order
    async fn capture_order(
        &self,
        order_id: &str,
    ) -> Result<CaptureOutcome, Box<dyn std::error::Error + Send + Sync>>;
}

/// Gateway stand-in for tests and local runs. Every capture succeeds.
pub struct MockPaymentGateway;

#[async_trait]
impl PaymentGateway for MockPaymentGateway {
    async fn create_order(
        &self,
        booking: &Booking,
        amount: i64,
        currency: &str,
    ) -> Result<GatewayOrder, Box<dyn std::error::Error + Send + Sync>> {
        let order_id = format!("MOCK-{}", Uuid::new_v4().simple());
        tracing::info!(
            booking_id = %booking.id,
            amount,
            currency,
            %order_id,
            "mock gateway order created"
        );
        Ok(GatewayOrder {
            approval_url: Some(format!("https://gateway.invalid/approve/{order_id}")),
            order_id,
        })
    }

    async fn capture_order(
        &self,
        order_id: &str,
    ) -> Result<CaptureOutcome, Box<dyn std::error::Error + Send + Sync>> {
        tracing::info!(%order_id, "mock gateway order captured");
        Ok(CaptureOutcome::Completed)
    }
}
