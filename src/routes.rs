use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderName, HeaderValue, Method},
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::config::{AppConfig, Environment};
use crate::handlers::{protected, public};
use crate::middleware::identity_middleware;
use crate::state::AppState;

/// Build the full application router
pub fn app(state: AppState) -> Router {
    let config = state.config.clone();

    let router = Router::new()
        // Public
        .route("/", get(public::status::root))
        .route("/health", get(public::status::health))
        .route("/auth/login", post(public::auth::login_post))
        // Caller-scoped API
        .merge(api_routes(state.clone()))
        .layer(
            ServiceBuilder::new()
                .layer(cors_layer(&config))
                .layer(DefaultBodyLimit::max(config.api.max_request_size_bytes)),
        );

    let router = if config.api.enable_request_logging {
        router.layer(TraceLayer::new_for_http())
    } else {
        router
    };

    router.with_state(state)
}

fn api_routes(state: AppState) -> Router<AppState> {
    use protected::{auth, data, describe, find};

    Router::new()
        .route("/api/auth/profile", get(auth::profile_get))
        .route("/api/auth/refresh", post(auth::refresh_post))
        .route("/api/describe", get(describe::list_get))
        .route("/api/describe/:table", get(describe::table_get))
        .route(
            "/api/data/:table",
            get(data::table_get)
                .post(data::table_post)
                .put(data::table_put)
                .delete(data::table_delete),
        )
        .route(
            "/api/data/:table/:id",
            get(data::record_get)
                .put(data::record_put)
                .patch(data::record_put)
                .delete(data::record_delete),
        )
        .route("/api/find/:table", post(find::find_post))
        .route_layer(from_fn_with_state(state, identity_middleware))
}

fn cors_layer(config: &AppConfig) -> CorsLayer {
    let security = &config.security;
    if !security.enable_cors {
        return CorsLayer::new();
    }
    if config.environment == Environment::Development {
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = security
        .cors_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin '{}'", origin);
                None
            }
        })
        .collect();

    let mut headers = vec![header::AUTHORIZATION, header::CONTENT_TYPE];
    if let Ok(api_key) = HeaderName::from_bytes(config.auth.api_key_header.as_bytes()) {
        headers.push(api_key);
    }

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::PATCH, Method::DELETE])
        .allow_headers(headers)
}
