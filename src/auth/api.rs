//! Admin auth HTTP handlers: status, login, logout,
//! change-password. Single admin account, bearer JWT, no RBAC.

use crate::auth::{
    jwt::JwtHandler,
    middleware::extract_claims,
    models::{AuthStatus, ChangePasswordRequest, Claims, LoginRequest, LoginResponse},
    service::AuthService,
};
use axum::{
    extract::{Extension, Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AuthState {
    pub service: Arc<AuthService>,
    pub jwt: Arc<JwtHandler>,
    pub enabled: bool,
}

/// GET /api/v1/auth/status
pub async fn status(State(state): State<AuthState>, req: Request) -> Json<AuthStatus> {
    let authenticated = extract_claims(&req).is_some();
    Json(AuthStatus { enabled: state.enabled, authenticated })
}

/// POST /api/v1/auth/login
pub async fn login(
    State(state): State<AuthState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AuthApiError> {
    let valid = state
        .service
        .verify_login(&payload.username, &payload.password)
        .map_err(|_| AuthApiError::Internal)?;

    if !valid {
        warn!(username = %payload.username, "failed admin login attempt");
        return Err(AuthApiError::InvalidCredentials);
    }

    let (token, expires_in) = state
        .jwt
        .generate_token(&payload.username)
        .map_err(|_| AuthApiError::Internal)?;

    info!(username = %payload.username, "admin login succeeded");
    Ok(Json(LoginResponse { token, expires_in }))
}

/// POST /api/v1/auth/logout
///
/// Tokens are stateless; logout is a client-side no-op acknowledged here so
/// the frontend has a single endpoint to call regardless of auth mode.
pub async fn logout() -> StatusCode {
    StatusCode::NO_CONTENT
}

/// POST /api/v1/auth/change-password
pub async fn change_password(
    State(state): State<AuthState>,
    claims: Option<Extension<Claims>>,
    Json(payload): Json<ChangePasswordRequest>,
) -> Result<StatusCode, AuthApiError> {
    let _ = claims.ok_or(AuthApiError::Unauthorized)?;
    state
        .service
        .change_password(&payload.current_password, &payload.new_password)
        .map_err(|e| match e {
            crate::error::AppError::Unauthorized => AuthApiError::InvalidCredentials,
            _ => AuthApiError::Internal,
        })?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug)]
pub enum AuthApiError {
    InvalidCredentials,
    Unauthorized,
    Internal,
}

impl IntoResponse for AuthApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthApiError::InvalidCredentials => (StatusCode::UNAUTHORIZED, "invalid username or password"),
            AuthApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "authentication required"),
            AuthApiError::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "internal error"),
        };
        (status, message).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_status_codes() {
        assert_eq!(AuthApiError::InvalidCredentials.into_response().status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AuthApiError::Unauthorized.into_response().status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AuthApiError::Internal.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
