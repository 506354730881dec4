// handlers/public/auth/login.rs - POST /auth/login handler

use axum::{extract::rejection::JsonRejection, extract::State, Json};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::auth::{generate_jwt, verify_password, Claims};
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
    pub id: String,
    pub role: String,
}

impl TokenResponse {
    pub fn issue(claims: Claims, state: &AppState) -> Result<Self, ApiError> {
        let access_token = generate_jwt(&claims, &state.config.security)?;
        Ok(Self {
            access_token,
            token_type: "Bearer",
            expires_in: claims.expires_in(),
            id: claims.sub,
            role: claims.role,
        })
    }
}

/// POST /auth/login - verify credentials against the auth user table and issue a JWT
pub async fn login_post(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> ApiResult<TokenResponse> {
    let Json(request) = payload?;

    let mut field_errors = BTreeMap::new();
    if request.username.trim().is_empty() {
        field_errors.insert("username".to_string(), "is required".to_string());
    }
    if request.password.is_empty() {
        field_errors.insert("password".to_string(), "is required".to_string());
    }
    if !field_errors.is_empty() {
        return Err(ApiError::validation_error("Username and password are required", Some(field_errors)));
    }

    let username = request.username.trim();
    let user = state.users.find_by_username(username).await?;
    let verified = match user.as_ref().and_then(|u| u.password_hash.clone()) {
        Some(hash) => verify_password(request.password, hash).await,
        None => false,
    };
    let user = match user {
        Some(user) if verified => user,
        _ => {
            tracing::warn!("Failed login for '{}'", username);
            return Err(ApiError::unauthorized("Invalid credentials"));
        }
    };

    let role = user.role.unwrap_or_else(|| state.config.auth.default_role.clone());
    let claims = Claims::new(user.id, role, &state.config.security);
    tracing::info!("Issued token for user {} ({})", claims.sub, claims.role);

    Ok(ApiResponse::success(TokenResponse::issue(claims, &state)?))
}
