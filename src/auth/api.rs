//! Sysop dashboard login (spec.md §4.AMBIENT-AUTH) — gates the two
//! cross-tenant reads (`get_all_session_ids`, `get_all_fingerprint_ids`),
//! nothing else in this crate sits behind auth.

use crate::auth::{
    jwt::JwtHandler,
    middleware::extract_claims,
    models::{LoginRequest, LoginResponse, UserResponse},
    user_store::UserStore,
};
use axum::{
    extract::{Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AuthState {
    pub user_store: Arc<UserStore>,
    pub jwt_handler: Arc<JwtHandler>,
}

impl AuthState {
    pub fn new(user_store: Arc<UserStore>, jwt_handler: Arc<JwtHandler>) -> Self {
        Self {
            user_store,
            jwt_handler,
        }
    }
}

/// POST /api/auth/login
pub async fn login(
    State(state): State<AuthState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AuthApiError> {
    info!(username = %payload.username, "sysop login attempt");

    let valid = state
        .user_store
        .verify_password(&payload.username, &payload.password)
        .map_err(|_| AuthApiError::InternalError)?;

    if !valid {
        warn!(username = %payload.username, "failed sysop login attempt");
        return Err(AuthApiError::InvalidCredentials);
    }

    let user = state
        .user_store
        .get_user_by_username(&payload.username)
        .map_err(|_| AuthApiError::InternalError)?
        .ok_or(AuthApiError::InvalidCredentials)?;

    let (token, expires_in) = state
        .jwt_handler
        .generate_token(&user)
        .map_err(|_| AuthApiError::InternalError)?;

    Ok(Json(LoginResponse {
        token,
        expires_in,
        role: user.role.clone(),
        user: UserResponse::from_user(&user),
    }))
}

/// GET /api/auth/me — built from the JWT's own claims, no store lookup.
pub async fn get_current_user(req: Request) -> Result<Json<UserResponse>, AuthApiError> {
    let claims = extract_claims(&req).ok_or(AuthApiError::Unauthorized)?;

    Ok(Json(UserResponse {
        id: claims.sub.clone(),
        username: claims.username.clone(),
        role: claims.role.clone(),
        created_at: String::new(),
    }))
}

#[derive(Debug)]
pub enum AuthApiError {
    InvalidCredentials,
    Unauthorized,
    InternalError,
}

impl IntoResponse for AuthApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthApiError::InvalidCredentials => {
                (StatusCode::UNAUTHORIZED, "Invalid username or password")
            }
            AuthApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "Authentication required"),
            AuthApiError::InternalError => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        };

        (status, message).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_credentials_maps_to_401() {
        let response = AuthApiError::InvalidCredentials.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
