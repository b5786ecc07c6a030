//! Admin-auth middleware: require a valid bearer JWT on protected routes,
//! a no-op pass-through when `ADMIN_AUTH_ENABLED=false`.

use crate::auth::{jwt::JwtHandler, models::Claims};
use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

pub struct AuthMiddlewareState {
    pub jwt: Arc<JwtHandler>,
    pub enabled: bool,
}

pub async fn auth_middleware(State(state): State<Arc<AuthMiddlewareState>>, mut req: Request, next: Next) -> Result<Response, AuthError> {
    if !state.enabled {
        return Ok(next.run(req).await);
    }
    let token = req
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .ok_or(AuthError::MissingToken)?
        .to_string();

    let claims = state.jwt.validate_token(&token).map_err(|_| AuthError::InvalidToken)?;
    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

pub fn extract_claims(req: &Request) -> Option<&Claims> {
    req.extensions().get::<Claims>()
}

#[derive(Debug)]
pub enum AuthError {
    MissingToken,
    InvalidToken,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let message = match self {
            AuthError::MissingToken => "missing authorization token",
            AuthError::InvalidToken => "invalid or expired token",
        };
        (StatusCode::UNAUTHORIZED, message).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_responses_are_401() {
        assert_eq!(AuthError::MissingToken.into_response().status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AuthError::InvalidToken.into_response().status(), StatusCode::UNAUTHORIZED);
    }
}
