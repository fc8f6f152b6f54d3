use std::sync::Arc;

use tourbook_core::{PaymentGateway, ReservationCoordinator};
use tourbook_store::app_config::Secret;

use crate::retry::RetryPolicy;

#[derive(Clone)]
pub struct AuthConfig {
    pub secret: Secret,
    pub expiration: u64,
}

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<ReservationCoordinator>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub auth: AuthConfig,
    pub retry: RetryPolicy,
    /// Currency of every tour price and booking amount
    pub currency: String,
}
