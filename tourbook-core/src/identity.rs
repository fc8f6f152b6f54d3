use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::booking::Actor;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Customer,
    Admin,
}

/// A pre-authenticated caller. The core trusts it as given.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub user_id: Uuid,
    pub role: Role,
}

impl Caller {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Acting on one's own bookings always goes through the customer path,
    /// even for admins.
    pub fn as_customer(&self) -> Actor {
        Actor::Customer(self.user_id)
    }
}
