use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};

use crate::access::{AuthMethod, Caller, Identity};
use crate::auth::{hash_api_key, validate_jwt};
use crate::error::ApiError;
use crate::state::AppState;

/// Resolve the request principal and inject it as a [`Caller`] extension.
///
/// No credentials means [`Caller::Anonymous`]; credentials that fail to
/// verify are rejected rather than downgraded.
pub async fn identity_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let caller = resolve_caller(&state, request.headers()).await?;
    tracing::debug!("{} {} as {}", request.method(), request.uri().path(), caller.label());
    request.extensions_mut().insert(caller);
    Ok(next.run(request).await)
}

async fn resolve_caller(state: &AppState, headers: &HeaderMap) -> Result<Caller, ApiError> {
    if let Some(token) = extract_bearer_token(headers)? {
        let claims = validate_jwt(&token, &state.config.security)?;
        return Ok(Caller::Authenticated(Identity {
            id: claims.sub,
            role: claims.role,
            method: AuthMethod::Jwt,
        }));
    }

    let auth = &state.config.auth;
    let Some(key) = extract_api_key(headers, &auth.api_key_header)? else {
        return Ok(Caller::Anonymous);
    };
    let stored = if auth.api_key_hashed { hash_api_key(&key) } else { key };
    match state.users.find_by_api_key(&stored).await? {
        Some(user) => Ok(Caller::Authenticated(Identity {
            id: user.id,
            role: user.role.unwrap_or_else(|| auth.default_role.clone()),
            method: AuthMethod::ApiKey,
        })),
        None => {
            tracing::warn!("Rejected unknown API key");
            Err(ApiError::unauthorized("Invalid API key"))
        }
    }
}

/// Token from `Authorization: Bearer ...`; `None` when the header is absent
fn extract_bearer_token(headers: &HeaderMap) -> Result<Option<String>, ApiError> {
    let Some(auth_header) = headers.get(axum::http::header::AUTHORIZATION) else {
        return Ok(None);
    };

    let auth_str = auth_header
        .to_str()
        .map_err(|_| ApiError::unauthorized("Invalid Authorization header format"))?;

    match auth_str.strip_prefix("Bearer ") {
        Some(token) if !token.trim().is_empty() => Ok(Some(token.trim().to_string())),
        Some(_) => Err(ApiError::unauthorized("Empty JWT token")),
        None => Err(ApiError::unauthorized("Authorization header must use Bearer token format")),
    }
}

fn extract_api_key(headers: &HeaderMap, header: &str) -> Result<Option<String>, ApiError> {
    match headers.get(header) {
        None => Ok(None),
        Some(value) => {
            let key = value
                .to_str()
                .map_err(|_| ApiError::unauthorized("Invalid API key header"))?
                .trim();
            if key.is_empty() {
                return Err(ApiError::unauthorized("Empty API key"));
            }
            Ok(Some(key.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_token_extraction() {
        let mut headers = HeaderMap::new();
        assert!(extract_bearer_token(&headers).unwrap().is_none());

        headers.insert("authorization", HeaderValue::from_static("Bearer abc.def"));
        assert_eq!(extract_bearer_token(&headers).unwrap().as_deref(), Some("abc.def"));

        headers.insert("authorization", HeaderValue::from_static("Basic Zm9vOmJhcg=="));
        assert_eq!(extract_bearer_token(&headers).unwrap_err().status_code(), 401);

        headers.insert("authorization", HeaderValue::from_static("Bearer "));
        assert!(extract_bearer_token(&headers).is_err());
    }

    #[test]
    fn api_key_extraction_uses_configured_header() {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_static(" k-1 "));
        assert_eq!(extract_api_key(&headers, "x-api-key").unwrap().as_deref(), Some("k-1"));
        assert!(extract_api_key(&headers, "x-other").unwrap().is_none());
    }
}
