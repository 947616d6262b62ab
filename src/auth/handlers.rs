use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::auth::password::verify_password;
use crate::auth::session::{self, bearer_token, resolve_token, TOKEN_REQUIRED};
use crate::error::{AppError, AppResult};
use crate::state::AppState;

pub const BAD_CREDENTIALS: &str = "Credenciales inválidas";

#[derive(Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Deserialize, Default)]
struct TokenRequest {
    #[serde(default)]
    token: Option<String>,
}

/// POST /users/login
pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> AppResult<Json<Value>> {
    let user = state
        .users
        .user_by_name(body.username.trim())
        .await?
        .filter(|user| verify_password(&body.password, &user.password_hash))
        .ok_or_else(|| AppError::auth(BAD_CREDENTIALS))?;

    let issued = state
        .tokens
        .issue()
        .map_err(|e| AppError::Internal(e.to_string()))?;

    if let Some(ref previous) = user.token {
        session::revoke_token(state.users.as_ref(), &state.tokens, previous).await?;
    }
    state
        .users
        .set_token(&user.username, Some(&issued.token))
        .await?;

    tracing::info!("User {} logged in", user.username);
    Ok(Json(json!({ "token": issued.token })))
}

/// POST /users/logout
///
/// Always reports success; an unknown token has nothing to clear.
pub async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<Value>> {
    if let Some(token) = presented_token(&headers, &body) {
        if let Some(user) = state.users.user_by_token(&token).await? {
            state.users.set_token(&user.username, None).await?;
            tracing::info!("User {} logged out", user.username);
        }
        session::revoke_token(state.users.as_ref(), &state.tokens, &token).await?;
    }
    Ok(Json(json!({ "success": true })))
}

/// POST /users/validate
pub async fn validate(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<Value>> {
    let token = presented_token(&headers, &body).ok_or_else(|| AppError::auth(TOKEN_REQUIRED))?;
    resolve_token(state.users.as_ref(), &state.tokens, &token).await?;
    Ok(Json(json!({ "valid": true })))
}

/// Token from a `{ "token": ... }` body, falling back to the `Authorization` header.
fn presented_token(headers: &HeaderMap, body: &[u8]) -> Option<String> {
    let from_body = serde_json::from_slice::<TokenRequest>(body)
        .unwrap_or_default()
        .token
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty());
    from_body.or_else(|| bearer_token(headers).map(str::to_string))
}
