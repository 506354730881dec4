use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;

use crate::access::{AccessEngine, PermissionStore};
use crate::auth::UserStore;
use crate::config::AppConfig;
use crate::schema::SchemaRegistry;

/// Shared handles injected into every handler
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub pool: PgPool,
    pub schemas: Arc<SchemaRegistry>,
    pub permissions: Arc<dyn PermissionStore>,
    pub users: Arc<dyn UserStore>,
    pub engine: Arc<AccessEngine>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        pool: PgPool,
        schemas: SchemaRegistry,
        permissions: Arc<dyn PermissionStore>,
        users: Arc<dyn UserStore>,
    ) -> Self {
        let engine = AccessEngine::from_config(&config.auth);
        Self {
            config: Arc::new(config),
            pool,
            schemas: Arc::new(schemas),
            permissions,
            users,
            engine: Arc::new(engine),
        }
    }

    /// Threshold for slow query warnings, when enabled
    pub fn slow_query_threshold(&self) -> Option<Duration> {
        let database = &self.config.database;
        database
            .enable_slow_query_warning
            .then(|| Duration::from_millis(database.slow_query_threshold_ms))
    }

    /// Drop cached schemas and permission rules so the next request reloads them
    pub async fn invalidate_caches(&self) {
        self.schemas.invalidate().await;
        self.permissions.invalidate().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{MemoryPermissionStore, TableRules};
    use crate::auth::MemoryUserStore;
    use crate::database::{DatabaseError, DatabaseManager};
    use crate::schema::types::fixtures::posts;
    use crate::schema::{SchemaError, SchemaIntrospector, StaticIntrospector, TableSchema};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counters {
        describes: AtomicUsize,
        invalidations: AtomicUsize,
    }

    struct CountingIntrospector(Arc<Counters>);

    #[async_trait]
    impl SchemaIntrospector for CountingIntrospector {
        async fn list_tables(&self) -> Result<Vec<String>, SchemaError> {
            Ok(vec!["posts".to_string()])
        }

        async fn describe(&self, table: &str) -> Result<Option<TableSchema>, SchemaError> {
            self.0.describes.fetch_add(1, Ordering::SeqCst);
            StaticIntrospector::new([posts()]).describe(table).await
        }
    }

    struct CountingStore(Arc<Counters>);

    #[async_trait]
    impl PermissionStore for CountingStore {
        async fn rules_for(&self, role: Option<&str>, table: &str) -> Result<TableRules, DatabaseError> {
            MemoryPermissionStore::new().rules_for(role, table).await
        }

        async fn invalidate(&self) {
            self.0.invalidations.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn invalidate_caches_resets_schemas_and_permissions() {
        let config = AppConfig::for_tests();
        let pool = DatabaseManager::connect_lazy(&config.database, "postgres://localhost/tablegate_unused").unwrap();
        let counters = Arc::new(Counters::default());
        let schemas = SchemaRegistry::new(Arc::new(CountingIntrospector(counters.clone())), Duration::from_secs(60));
        let state = AppState::new(
            config,
            pool,
            schemas,
            Arc::new(CountingStore(counters.clone())),
            Arc::new(MemoryUserStore::new()),
        );

        state.schemas.get("posts").await.unwrap();
        state.schemas.get("posts").await.unwrap();
        assert_eq!(counters.describes.load(Ordering::SeqCst), 1);

        state.invalidate_caches().await;
        assert_eq!(counters.invalidations.load(Ordering::SeqCst), 1);
        state.schemas.get("posts").await.unwrap();
        assert_eq!(counters.describes.load(Ordering::SeqCst), 2);
    }
}
