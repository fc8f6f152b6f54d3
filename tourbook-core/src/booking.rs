use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::tour::Page;

/// Booking status in the lifecycle
///
/// `PendingPayment` only ever comes back from storage written by older flows.
/// It is the same "awaiting payment" state as `Pending`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    PendingPayment,
    Confirmed,
    Completed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::PendingPayment => "pending_payment",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_awaiting_payment(&self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::PendingPayment)
    }

    /// The transition table.
    pub fn can_transition_to(&self, target: BookingStatus) -> bool {
        use BookingStatus::*;
        match (*self, target) {
            (Pending | PendingPayment, Confirmed | Cancelled) => true,
            (Confirmed, Completed | Cancelled) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BookingStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BookingStatus::Pending),
            "pending_payment" => Ok(BookingStatus::PendingPayment),
            "confirmed" => Ok(BookingStatus::Confirmed),
            "completed" => Ok(BookingStatus::Completed),
            "cancelled" => Ok(BookingStatus::Cancelled),
            other => Err(CoreError::Validation(format!("unknown booking status '{other}'"))),
        }
    }
}

/// A customer's reservation against a tour.
///
/// `party_size` and `total_amount` are frozen at creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Booking {
    pub id: Uuid,
    pub user_id: Uuid,
    pub tour_id: Uuid,
    pub party_size: i32,
    pub total_amount: i64,
    pub status: BookingStatus,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Who is driving a status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    Customer(Uuid),
    Admin,
    PaymentGateway,
}

impl Actor {
    /// Owner restriction applied when locking the booking row.
    pub fn owner_scope(&self) -> Option<Uuid> {
        match self {
            Actor::Customer(user_id) => Some(*user_id),
            Actor::Admin | Actor::PaymentGateway => None,
        }
    }
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Actor::Customer(id) => write!(f, "customer:{id}"),
            Actor::Admin => f.write_str("admin"),
            Actor::PaymentGateway => f.write_str("payment_gateway"),
        }
    }
}

/// Path through which a booking gets confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmVia {
    CustomerSelfConfirm { user_id: Uuid },
    PaymentCallback,
    AdminConfirm,
}

impl ConfirmVia {
    pub fn actor(&self) -> Actor {
        match self {
            ConfirmVia::CustomerSelfConfirm { user_id } => Actor::Customer(*user_id),
            ConfirmVia::PaymentCallback => Actor::PaymentGateway,
            ConfirmVia::AdminConfirm => Actor::Admin,
        }
    }
}

/// Validates `current -> target` for `actor` and returns the status to persist.
pub fn check_transition(
    current: BookingStatus,
    target: BookingStatus,
    actor: Actor,
) -> CoreResult<BookingStatus> {
    let permitted = match (actor, target) {
        // Completion belongs to the post-travel process, not the customer.
        (Actor::Customer(_), BookingStatus::Completed) => false,
        (Actor::PaymentGateway, BookingStatus::Confirmed) => current.is_awaiting_payment(),
        (Actor::PaymentGateway, _) => false,
        _ => current.can_transition_to(target),
    };

    if !permitted {
        return Err(CoreError::InvalidStateTransition {
            from: current,
            to: target,
        });
    }
    Ok(target)
}

#[derive(Debug, Clone, Default)]
pub struct BookingFilter {
    pub user_id: Option<Uuid>,
    pub tour_id: Option<Uuid>,
    pub status: Option<BookingStatus>,
    pub page: Page,
}

impl BookingFilter {
    pub fn for_user(user_id: Uuid) -> Self {
        Self {
            user_id: Some(user_id),
            ..Default::default()
        }
    }

    pub fn matches(&self, booking: &Booking) -> bool {
        self.user_id.map(|u| booking.user_id == u).unwrap_or(true)
            && self.tour_id.map(|t| booking.tour_id == t).unwrap_or(true)
            && self.status.map(|s| booking.status == s).unwrap_or(true)
    }
}
