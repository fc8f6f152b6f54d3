use uuid::Uuid;

use crate::booking::BookingStatus;

/// Which kind of record a lookup failed to find.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Tour,
    Booking,
    Payment,
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Entity::Tour => f.write_str("Tour"),
            Entity::Booking => f.write_str("Booking"),
            Entity::Payment => f.write_str("Payment"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Missing, or outside the caller's ownership scope. Both look the same to the caller.
    #[error("{entity} not found: {id}")]
    NotFound { entity: Entity, id: String },

    #[error("Not enough available seats. Available: {remaining}, requested: {requested}")]
    InsufficientCapacity { remaining: i32, requested: i32 },

    #[error("Cannot change booking from {from} to {to}")]
    InvalidStateTransition {
        from: BookingStatus,
        to: BookingStatus,
    },

    #[error("Payment {0} has already been processed")]
    AlreadyProcessed(Uuid),

    #[error("Timed out waiting for a row lock")]
    LockTimeout,

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl CoreError {
    pub fn not_found(entity: Entity, id: impl ToString) -> Self {
        CoreError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Whether the operation may be attempted again unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::LockTimeout)
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
