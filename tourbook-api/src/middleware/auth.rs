use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::headers::{authorization::Bearer, Authorization, HeaderMapExt};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tourbook_core::{Caller, Role};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::{AppState, AuthConfig};

// ============================================================================
// JWT Claims
// ============================================================================

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: Uuid,
    pub role: Role,
    pub exp: usize,
}

impl From<&Claims> for Caller {
    fn from(claims: &Claims) -> Self {
        Caller {
            user_id: claims.sub,
            role: claims.role,
        }
    }
}

/// Signs a token for `user_id`. Login lives elsewhere; this serves local runs and tests.
pub fn issue_token(auth: &AuthConfig, user_id: Uuid, role: Role) -> Result<String, AppError> {
    let expires_at = i64::try_from(auth.expiration)
        .ok()
        .and_then(Duration::try_seconds)
        .and_then(|ttl| Utc::now().checked_add_signed(ttl))
        .ok_or_else(|| AppError::Internal(format!("Token lifetime out of range: {}s", auth.expiration)))?;
    let claims = Claims {
        sub: user_id,
        role,
        exp: usize::try_from(expires_at.timestamp())
            .map_err(|_| AppError::Internal("Token expiry before epoch".into()))?,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(auth.secret.expose().as_bytes()),
    )
    .map_err(|e| AppError::Internal(format!("Token encoding failed: {}", e)))
}

fn authenticate(auth: &AuthConfig, req: &Request) -> Result<Caller, AppError> {
    let bearer = req
        .headers()
        .typed_get::<Authorization<Bearer>>()
        .ok_or_else(|| AppError::Authentication("Missing bearer token".into()))?;

    let token_data = decode::<Claims>(
        bearer.token(),
        &DecodingKey::from_secret(auth.secret.expose().as_bytes()),
        &Validation::new(Algorithm::HS256),
    )
    .map_err(|e| {
        tracing::debug!(error = %e, "rejected token");
        AppError::Authentication("Invalid or expired token".into())
    })?;

    Ok(Caller::from(&token_data.claims))
}

// ============================================================================
// Customer Authentication Middleware
// ============================================================================

/// Any signed-in user. Admins act as themselves on customer routes.
pub async fn customer_auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let caller = authenticate(&state.auth, &req)?;
    req.extensions_mut().insert(caller);
    Ok(next.run(req).await)
}

// ============================================================================
// Admin Authentication Middleware
// ============================================================================

pub async fn admin_auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let caller = authenticate(&state.auth, &req)?;
    if !caller.is_admin() {
        return Err(AppError::Authorization("Admin role required".into()));
    }
    req.extensions_mut().insert(caller);
    Ok(next.run(req).await)
}
