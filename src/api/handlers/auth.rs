use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{header, HeaderMap};
use axum::response::Json;
use serde::Serialize;
use serde_json::Value;

use super::common::{json_body, ok, typed, ApiResult};
use crate::core::error::ApiError;
use crate::features::auth::{bearer_token, AuthUser, LoginResponse};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct TokenCheck {
    pub valid: bool,
    pub user: AuthUser,
}

async fn current_user(state: &AppState, headers: &HeaderMap) -> Result<AuthUser, ApiError> {
    let header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    state.auth.authenticate(bearer_token(header)).await
}

/// `POST /api/auth/login`
pub async fn login(
    State(state): State<Arc<AppState>>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult<LoginResponse> {
    let body = json_body(body)?;
    let request = typed(body).map_err(|_| ApiError::MissingCredentials)?;
    ok(state.auth.login(request).await?)
}

/// `GET /api/auth/verify`
pub async fn verify(State(state): State<Arc<AppState>>, headers: HeaderMap) -> ApiResult<TokenCheck> {
    let user = current_user(&state, &headers).await?;
    ok(TokenCheck { valid: true, user })
}

/// `GET /api/auth/me`
pub async fn me(State(state): State<Arc<AppState>>, headers: HeaderMap) -> ApiResult<AuthUser> {
    ok(current_user(&state, &headers).await?)
}
