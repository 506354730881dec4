use async_trait::async_trait;
use sqlx::{PgPool, Row};
use std::collections::{HashMap, HashSet};

use super::error::SchemaError;
use super::types::{ColumnSchema, ColumnType, Relation, RelationKind, TableSchema};
use crate::database::manager::DatabaseError;

/// Source of table metadata
#[async_trait]
pub trait SchemaIntrospector: Send + Sync {
    async fn list_tables(&self) -> Result<Vec<String>, SchemaError>;

    /// `None` when the table does not exist
    async fn describe(&self, table: &str) -> Result<Option<TableSchema>, SchemaError>;
}

/// Reads `information_schema` / `pg_catalog` of one Postgres schema
pub struct PgIntrospector {
    pool: PgPool,
    schema: String,
}

impl PgIntrospector {
    pub fn new(pool: PgPool, schema: impl Into<String>) -> Self {
        Self { pool, schema: schema.into() }
    }

    async fn columns(&self, table: &str) -> Result<Vec<ColumnSchema>, DatabaseError> {
        let query = r#"
            SELECT
                column_name::text AS column_name,
                data_type::text AS data_type,
                udt_name::text AS udt_name,
                is_nullable::text AS is_nullable,
                column_default::text AS column_default,
                identity_generation::text AS identity_generation,
                is_generated::text AS is_generated,
                character_maximum_length::int4 AS max_length,
                ordinal_position::int4 AS position
            FROM information_schema.columns
            WHERE table_schema = $1 AND table_name = $2
            ORDER BY ordinal_position
        "#;

        let rows = sqlx::query(query)
            .bind(&self.schema)
            .bind(table)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let udt_name: String = row.get("udt_name");
                let is_nullable: String = row.get("is_nullable");
                let is_generated: Option<String> = row.get("is_generated");
                ColumnSchema {
                    name: row.get("column_name"),
                    data_type: row.get("data_type"),
                    column_type: ColumnType::from_udt(&udt_name),
                    udt_name,
                    nullable: is_nullable == "YES",
                    default: row.get("column_default"),
                    identity_generation: row.get("identity_generation"),
                    is_generated: is_generated.as_deref() == Some("ALWAYS"),
                    max_length: row.get("max_length"),
                    position: row.get("position"),
                }
            })
            .collect())
    }

    async fn primary_key(&self, table: &str) -> Result<Option<String>, DatabaseError> {
        let query = r#"
            SELECT kcu.column_name::text AS column_name
            FROM information_schema.table_constraints tc
            JOIN information_schema.key_column_usage kcu
              ON tc.constraint_name = kcu.constraint_name
             AND tc.table_schema = kcu.table_schema
             AND tc.table_name = kcu.table_name
            WHERE tc.constraint_type = 'PRIMARY KEY'
              AND tc.table_schema = $1
              AND tc.table_name = $2
            ORDER BY kcu.ordinal_position
        "#;

        let rows = sqlx::query(query)
            .bind(&self.schema)
            .bind(table)
            .fetch_all(&self.pool)
            .await?;

        // Composite keys cannot address a record from a single path segment
        if rows.len() != 1 {
            if rows.len() > 1 {
                tracing::debug!("Table '{}' has a composite primary key; record routes disabled", table);
            }
            return Ok(None);
        }
        Ok(rows.first().map(|row| row.get("column_name")))
    }

    async fn relations(&self, table: &str) -> Result<Vec<Relation>, DatabaseError> {
        let query = r#"
            SELECT
                src.relname::text AS source_table,
                sa.attname::text AS source_column,
                dst.relname::text AS target_table,
                da.attname::text AS target_column
            FROM pg_constraint c
            JOIN pg_class src ON src.oid = c.conrelid
            JOIN pg_namespace ns ON ns.oid = src.relnamespace
            JOIN pg_class dst ON dst.oid = c.confrelid
            JOIN pg_attribute sa ON sa.attrelid = c.conrelid AND sa.attnum = c.conkey[1]
            JOIN pg_attribute da ON da.attrelid = c.confrelid AND da.attnum = c.confkey[1]
            WHERE c.contype = 'f'
              AND array_length(c.conkey, 1) = 1
              AND ns.nspname = $1
              AND (src.relname = $2 OR dst.relname = $2)
            ORDER BY c.conname
        "#;

        let rows = sqlx::query(query)
            .bind(&self.schema)
            .bind(table)
            .fetch_all(&self.pool)
            .await?;

        let mut relations = Vec::new();
        for row in rows {
            let source_table: String = row.get("source_table");
            let source_column: String = row.get("source_column");
            let target_table: String = row.get("target_table");
            let target_column: String = row.get("target_column");

            if source_table == table {
                relations.push(Relation {
                    name: target_table.clone(),
                    kind: RelationKind::BelongsTo,
                    column: source_column.clone(),
                    foreign_table: target_table.clone(),
                    foreign_column: target_column.clone(),
                });
            }
            if target_table == table {
                relations.push(Relation {
                    name: source_table.clone(),
                    kind: RelationKind::HasMany,
                    column: target_column,
                    foreign_table: source_table,
                    foreign_column: source_column,
                });
            }
        }
        Ok(disambiguate_relation_names(relations))
    }
}

/// Relations default to the foreign table's name; when several share a name
/// each gets `<table>_<foreign column>` instead. A self-referencing key yields
/// the same qualified name on both sides, so its HasMany side becomes
/// `<table>_<column>_children`.
fn disambiguate_relation_names(mut relations: Vec<Relation>) -> Vec<Relation> {
    fn qualify(relations: &mut [Relation], rename: impl Fn(&Relation) -> Option<String>) {
        let mut counts: HashMap<String, usize> = HashMap::new();
        for relation in relations.iter() {
            *counts.entry(relation.name.clone()).or_default() += 1;
        }
        for relation in relations.iter_mut() {
            if counts.get(&relation.name).copied().unwrap_or(0) > 1 {
                if let Some(name) = rename(relation) {
                    relation.name = name;
                }
            }
        }
    }

    qualify(&mut relations, |relation| {
        let join = match relation.kind {
            RelationKind::BelongsTo => &relation.column,
            RelationKind::HasMany => &relation.foreign_column,
        };
        Some(format!("{}_{}", relation.foreign_table, join))
    });
    qualify(&mut relations, |relation| match relation.kind {
        RelationKind::HasMany => Some(format!("{}_children", relation.name)),
        RelationKind::BelongsTo => None,
    });
    relations
}

#[async_trait]
impl SchemaIntrospector for PgIntrospector {
    async fn list_tables(&self) -> Result<Vec<String>, SchemaError> {
        let query = r#"
            SELECT table_name::text AS table_name
            FROM information_schema.tables
            WHERE table_schema = $1 AND table_type = 'BASE TABLE'
            ORDER BY table_name
        "#;
        let rows = sqlx::query(query)
            .bind(&self.schema)
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::from)?;
        Ok(rows.into_iter().map(|row| row.get("table_name")).collect())
    }

    async fn describe(&self, table: &str) -> Result<Option<TableSchema>, SchemaError> {
        let columns = self.columns(table).await?;
        if columns.is_empty() {
            return Ok(None);
        }
        let (primary_key, relations) = futures::try_join!(self.primary_key(table), self.relations(table))?;

        tracing::debug!(
            "Introspected {}.{}: {} columns, {} relations",
            self.schema,
            table,
            columns.len(),
            relations.len()
        );

        Ok(Some(TableSchema {
            schema: self.schema.clone(),
            name: table.to_string(),
            primary_key,
            columns,
            relations,
        }))
    }
}

/// Fixed set of table definitions
#[derive(Debug, Default, Clone)]
pub struct StaticIntrospector {
    tables: HashMap<String, TableSchema>,
}

impl StaticIntrospector {
    pub fn new<I: IntoIterator<Item = TableSchema>>(tables: I) -> Self {
        Self {
            tables: tables.into_iter().map(|t| (t.name.clone(), t)).collect(),
        }
    }
}

#[async_trait]
impl SchemaIntrospector for StaticIntrospector {
    async fn list_tables(&self) -> Result<Vec<String>, SchemaError> {
        let mut names: Vec<String> = self.tables.keys().cloned().collect::<HashSet<_>>().into_iter().collect();
        names.sort();
        Ok(names)
    }

    async fn describe(&self, table: &str) -> Result<Option<TableSchema>, SchemaError> {
        Ok(self.tables.get(table).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn relation(name: &str, kind: RelationKind, column: &str, foreign_table: &str, foreign_column: &str) -> Relation {
        Relation {
            name: name.to_string(),
            kind,
            column: column.to_string(),
            foreign_table: foreign_table.to_string(),
            foreign_column: foreign_column.to_string(),
        }
    }

    #[test]
    fn duplicate_relation_names_are_qualified_by_join_column() {
        let relations = disambiguate_relation_names(vec![
            relation("users", RelationKind::BelongsTo, "author_id", "users", "id"),
            relation("users", RelationKind::BelongsTo, "editor_id", "users", "id"),
            relation("comments", RelationKind::HasMany, "id", "comments", "post_id"),
        ]);
        let names: Vec<&str> = relations.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["users_author_id", "users_editor_id", "comments"]);
    }

    #[test]
    fn self_references_get_distinct_names_per_direction() {
        let relations = disambiguate_relation_names(vec![
            relation("employees", RelationKind::BelongsTo, "manager_id", "employees", "id"),
            relation("employees", RelationKind::HasMany, "id", "employees", "manager_id"),
            relation("departments", RelationKind::BelongsTo, "department_id", "departments", "id"),
        ]);
        let names: Vec<&str> = relations.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["employees_manager_id", "employees_manager_id_children", "departments"]
        );

        let table = TableSchema {
            schema: "public".to_string(),
            name: "employees".to_string(),
            primary_key: Some("id".to_string()),
            columns: vec![],
            relations,
        };
        let children = table.relation("employees_manager_id_children").map(|r| r.kind);
        assert_eq!(children, Some(RelationKind::HasMany));
        assert_eq!(table.relation("employees_manager_id").map(|r| r.kind), Some(RelationKind::BelongsTo));
    }

    #[tokio::test]
    async fn static_introspector_lists_sorted_tables() {
        let mut a = crate::schema::types::fixtures::posts();
        a.name = "zeta".to_string();
        let b = crate::schema::types::fixtures::posts();
        let introspector = StaticIntrospector::new(vec![a, b]);
        assert_eq!(introspector.list_tables().await.unwrap(), vec!["posts".to_string(), "zeta".to_string()]);
        assert!(introspector.describe("missing").await.unwrap().is_none());
    }
}
