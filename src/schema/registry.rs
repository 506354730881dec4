use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::error::SchemaError;
use super::introspect::SchemaIntrospector;
use super::types::TableSchema;
use crate::access::SYSTEM_TABLE_PREFIX;
use crate::database::manager::DatabaseManager;

/// Cached table metadata with a refresh interval
pub struct SchemaRegistry {
    introspector: Arc<dyn SchemaIntrospector>,
    ttl: Duration,
    tables: RwLock<HashMap<String, (Instant, Arc<TableSchema>)>>,
}

impl SchemaRegistry {
    pub fn new(introspector: Arc<dyn SchemaIntrospector>, ttl: Duration) -> Self {
        Self {
            introspector,
            ttl,
            tables: RwLock::new(HashMap::new()),
        }
    }

    /// Schema for `table`, or `TableNotFound` for unknown and system tables
    pub async fn get(&self, table: &str) -> Result<Arc<TableSchema>, SchemaError> {
        if !DatabaseManager::is_valid_identifier(table) {
            return Err(SchemaError::InvalidTableName(table.to_string()));
        }
        if table.starts_with(SYSTEM_TABLE_PREFIX) {
            return Err(SchemaError::TableNotFound(table.to_string()));
        }

        // Fast path: try read lock
        if !self.ttl.is_zero() {
            let tables = self.tables.read().await;
            if let Some((loaded_at, schema)) = tables.get(table) {
                if loaded_at.elapsed() < self.ttl {
                    return Ok(schema.clone());
                }
            }
        }

        let schema = self
            .introspector
            .describe(table)
            .await?
            .map(Arc::new)
            .ok_or_else(|| SchemaError::TableNotFound(table.to_string()))?;

        if !self.ttl.is_zero() {
            let mut tables = self.tables.write().await;
            tables.insert(table.to_string(), (Instant::now(), schema.clone()));
        }
        debug!("Loaded schema for '{}'", table);
        Ok(schema)
    }

    /// Names of exposed tables
    pub async fn list_tables(&self) -> Result<Vec<String>, SchemaError> {
        let tables = self.introspector.list_tables().await?;
        Ok(tables
            .into_iter()
            .filter(|name| !name.starts_with(SYSTEM_TABLE_PREFIX))
            .collect())
    }

    /// Forget all cached schemas
    pub async fn invalidate(&self) {
        let mut tables = self.tables.write().await;
        let count = tables.len();
        tables.clear();
        info!("Schema cache cleared ({} tables)", count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::introspect::StaticIntrospector;
    use crate::schema::types::fixtures::posts;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingIntrospector {
        inner: StaticIntrospector,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SchemaIntrospector for CountingIntrospector {
        async fn list_tables(&self) -> Result<Vec<String>, SchemaError> {
            self.inner.list_tables().await
        }

        async fn describe(&self, table: &str) -> Result<Option<TableSchema>, SchemaError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.describe(table).await
        }
    }

    fn counting() -> Arc<CountingIntrospector> {
        let mut system = posts();
        system.name = "_api_roles".to_string();
        Arc::new(CountingIntrospector {
            inner: StaticIntrospector::new(vec![posts(), system]),
            calls: AtomicUsize::new(0),
        })
    }

    #[tokio::test]
    async fn caches_within_ttl() {
        let introspector = counting();
        let registry = SchemaRegistry::new(introspector.clone(), Duration::from_secs(60));

        registry.get("posts").await.unwrap();
        registry.get("posts").await.unwrap();
        assert_eq!(introspector.calls.load(Ordering::SeqCst), 1);

        registry.invalidate().await;
        registry.get("posts").await.unwrap();
        assert_eq!(introspector.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn zero_ttl_always_introspects() {
        let introspector = counting();
        let registry = SchemaRegistry::new(introspector.clone(), Duration::ZERO);
        registry.get("posts").await.unwrap();
        registry.get("posts").await.unwrap();
        assert_eq!(introspector.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unknown_system_and_invalid_tables_are_rejected() {
        let registry = SchemaRegistry::new(counting(), Duration::from_secs(60));
        assert!(matches!(registry.get("missing").await, Err(SchemaError::TableNotFound(_))));
        assert!(matches!(registry.get("_api_roles").await, Err(SchemaError::TableNotFound(_))));
        assert!(matches!(registry.get("posts;drop").await, Err(SchemaError::InvalidTableName(_))));
    }

    #[tokio::test]
    async fn listing_hides_system_tables() {
        let registry = SchemaRegistry::new(counting(), Duration::from_secs(60));
        assert_eq!(registry.list_tables().await.unwrap(), vec!["posts".to_string()]);
    }
}
