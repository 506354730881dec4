// handlers/protected/auth/mod.rs - Caller identity and token renewal

use axum::{extract::State, Extension};
use serde::Serialize;

use crate::access::{AuthMethod, Caller, Identity};
use crate::auth::Claims;
use crate::error::ApiError;
use crate::handlers::public::auth::login::TokenResponse;
use crate::middleware::{ApiResponse, ApiResult};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct Profile {
    pub id: String,
    pub role: String,
    pub auth_method: AuthMethod,
}

fn require_identity(caller: &Caller) -> Result<&Identity, ApiError> {
    caller
        .identity()
        .ok_or_else(|| ApiError::unauthorized("Authentication required"))
}

/// GET /api/auth/profile
pub async fn profile_get(Extension(caller): Extension<Caller>) -> ApiResult<Profile> {
    let identity = require_identity(&caller)?;
    Ok(ApiResponse::success(Profile {
        id: identity.id.clone(),
        role: identity.role.clone(),
        auth_method: identity.method,
    }))
}

/// POST /api/auth/refresh - reissue a token for a JWT caller.
/// The role is read again from the user table, so demotions take effect.
pub async fn refresh_post(State(state): State<AppState>, Extension(caller): Extension<Caller>) -> ApiResult<TokenResponse> {
    let identity = require_identity(&caller)?;
    if identity.method != AuthMethod::Jwt {
        return Err(ApiError::unauthorized("Only token sessions can be refreshed"));
    }

    let Some(user) = state.users.find_by_id(&identity.id).await? else {
        tracing::warn!("Refresh refused for unknown user {}", identity.id);
        return Err(ApiError::unauthorized("User no longer exists"));
    };
    let role = user.role.unwrap_or_else(|| state.config.auth.default_role.clone());
    if role != identity.role {
        tracing::info!("Role of user {} changed from {} to {}", user.id, identity.role, role);
    }

    let claims = Claims::new(user.id, role, &state.config.security);
    Ok(ApiResponse::success(TokenResponse::issue(claims, &state)?))
}
