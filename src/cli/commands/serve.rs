use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::access::{CachedPermissionStore, PermissionStore, PgPermissionStore};
use crate::auth::{PgUserStore, UserStore};
use crate::config::{AppConfig, Environment};
use crate::routes;
use crate::state::AppState;

pub async fn handle(config: &AppConfig, port: Option<u16>) -> anyhow::Result<()> {
    info!("Starting tablegate in {:?} mode", config.environment);

    check_jwt_secret(config)?;

    let (pool, schemas) = crate::cli::connect(config).await?;
    let schema = config.database.schema.clone();

    let store = PgPermissionStore::new(pool.clone(), schema.clone());
    if config.database.bootstrap {
        store.bootstrap().await.context("failed to create permission tables")?;
    }
    let permissions: Arc<dyn PermissionStore> = Arc::new(CachedPermissionStore::new(
        store,
        Duration::from_secs(config.security.permission_cache_secs),
    ));
    let users: Arc<dyn UserStore> = Arc::new(PgUserStore::new(pool.clone(), schema, config.auth.clone()));

    let state = AppState::new(config.clone(), pool, schemas, permissions, users);
    #[cfg(unix)]
    tokio::spawn(reload_on_hangup(state.clone()));
    let app = routes::app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port.unwrap_or(config.api.port)));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("tablegate listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("Server stopped");
    Ok(())
}

/// Production refuses to start without a signing secret
fn check_jwt_secret(config: &AppConfig) -> anyhow::Result<()> {
    if config.security.jwt_secret.is_empty() {
        if config.environment == Environment::Production {
            anyhow::bail!("SECURITY_JWT_SECRET must be set in production");
        }
        warn!("No JWT secret configured: token login and bearer authentication will fail");
    }
    Ok(())
}

/// SIGHUP drops the schema and permission caches
#[cfg(unix)]
async fn reload_on_hangup(state: AppState) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(stream) => stream,
        Err(e) => {
            warn!("Failed to listen for SIGHUP: {}", e);
            return;
        }
    };
    while hangup.recv().await.is_some() {
        state.invalidate_caches().await;
        info!("SIGHUP received: schema and permission caches cleared");
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
