//! Dynamic repository for introspected tables.
//! Every statement returns rows as a single `row_to_json` column.

use serde_json::{Map, Value};
use sqlx::{PgConnection, Row};
use std::time::{Duration, Instant};

use crate::database::manager::{DatabaseError, DatabaseManager};
use crate::filter::types::SqlResult;
use crate::schema::TableSchema;

pub struct DynamicRepository<'a> {
    table: &'a TableSchema,
    slow_query: Option<Duration>,
}

impl<'a> DynamicRepository<'a> {
    pub fn new(table: &'a TableSchema) -> Self {
        Self { table, slow_query: None }
    }

    /// Warn about statements slower than `threshold`
    pub fn with_slow_query_warning(mut self, threshold: Option<Duration>) -> Self {
        self.slow_query = threshold;
        self
    }

    /// Run a generated `SELECT row_to_json(r) AS row ...` statement
    pub async fn fetch_rows(&self, conn: &mut PgConnection, sql: &SqlResult) -> Result<Vec<Map<String, Value>>, DatabaseError> {
        let started = Instant::now();
        let rows = bind_params(sqlx::query(&sql.query), &sql.params).fetch_all(&mut *conn).await?;
        self.observe(&sql.query, started);
        rows.iter().map(decode_row).collect()
    }

    pub async fn fetch_count(&self, conn: &mut PgConnection, sql: &SqlResult) -> Result<i64, DatabaseError> {
        let started = Instant::now();
        let row = bind_params(sqlx::query(&sql.query), &sql.params).fetch_one(&mut *conn).await?;
        self.observe(&sql.query, started);
        Ok(row.try_get::<i64, _>("count")?)
    }

    pub async fn insert(&self, conn: &mut PgConnection, input: &Map<String, Value>) -> Result<Map<String, Value>, DatabaseError> {
        let sql = self.insert_sql(input)?;
        self.fetch_one_row(conn, &sql)
            .await?
            .ok_or_else(|| DatabaseError::QueryError(format!("INSERT into '{}' returned no row", self.table.name)))
    }

    /// Apply `changes` to the row with primary key `id`; `None` when no row matched
    pub async fn update(
        &self,
        conn: &mut PgConnection,
        id: &Value,
        changes: &Map<String, Value>,
    ) -> Result<Option<Map<String, Value>>, DatabaseError> {
        let sql = self.update_sql(id, changes)?;
        self.fetch_one_row(conn, &sql).await
    }

    pub async fn delete(&self, conn: &mut PgConnection, id: &Value) -> Result<Option<Map<String, Value>>, DatabaseError> {
        let sql = self.delete_sql(id, None)?;
        self.fetch_one_row(conn, &sql).await
    }

    /// Stamp `column` with `now()` instead of removing the row
    pub async fn soft_delete(
        &self,
        conn: &mut PgConnection,
        id: &Value,
        column: &str,
    ) -> Result<Option<Map<String, Value>>, DatabaseError> {
        let sql = self.delete_sql(id, Some(column))?;
        self.fetch_one_row(conn, &sql).await
    }

    async fn fetch_one_row(&self, conn: &mut PgConnection, sql: &SqlResult) -> Result<Option<Map<String, Value>>, DatabaseError> {
        let started = Instant::now();
        let row = bind_params(sqlx::query(&sql.query), &sql.params).fetch_optional(&mut *conn).await?;
        self.observe(&sql.query, started);
        row.as_ref().map(decode_row).transpose()
    }

    fn observe(&self, query: &str, started: Instant) {
        let elapsed = started.elapsed();
        match self.slow_query {
            Some(threshold) if elapsed >= threshold => {
                tracing::warn!("Slow query on '{}' ({} ms): {}", self.table.name, elapsed.as_millis(), query)
            }
            _ => tracing::trace!("{} ({} µs)", query, elapsed.as_micros()),
        }
    }

    fn primary_key(&self) -> Result<&'a crate::schema::ColumnSchema, DatabaseError> {
        self.table
            .primary_key_column()
            .ok_or_else(|| DatabaseError::QueryError(format!("Table '{}' has no single-column primary key", self.table.name)))
    }

    fn insert_sql(&self, input: &Map<String, Value>) -> Result<SqlResult, DatabaseError> {
        let table = self.table.qualified_name();
        if input.is_empty() {
            return Ok(SqlResult {
                query: format!("INSERT INTO {} AS r DEFAULT VALUES RETURNING row_to_json(r) AS row", table),
                params: vec![],
            });
        }

        let mut columns = Vec::with_capacity(input.len());
        let mut values = Vec::with_capacity(input.len());
        let mut params = Vec::with_capacity(input.len());
        for (field, value) in input {
            let column = self.column(field)?;
            params.push(column.encode(value));
            columns.push(DatabaseManager::quote_identifier(field));
            values.push(format!("${}::{}", params.len(), column.cast_type()));
        }

        Ok(SqlResult {
            query: format!(
                "INSERT INTO {} AS r ({}) VALUES ({}) RETURNING row_to_json(r) AS row",
                table,
                columns.join(", "),
                values.join(", ")
            ),
            params,
        })
    }

    fn update_sql(&self, id: &Value, changes: &Map<String, Value>) -> Result<SqlResult, DatabaseError> {
        if changes.is_empty() {
            return Err(DatabaseError::QueryError("UPDATE without changes".to_string()));
        }
        let pk = self.primary_key()?;

        let mut assignments = Vec::with_capacity(changes.len());
        let mut params = Vec::with_capacity(changes.len() + 1);
        for (field, value) in changes {
            let column = self.column(field)?;
            params.push(column.encode(value));
            assignments.push(format!(
                "{} = ${}::{}",
                DatabaseManager::quote_identifier(field),
                params.len(),
                column.cast_type()
            ));
        }
        params.push(pk.encode(id));

        Ok(SqlResult {
            query: format!(
                "UPDATE {} AS r SET {} WHERE {} = ${}::{} RETURNING row_to_json(r) AS row",
                self.table.qualified_name(),
                assignments.join(", "),
                DatabaseManager::quote_identifier(&pk.name),
                params.len(),
                pk.cast_type()
            ),
            params,
        })
    }

    fn delete_sql(&self, id: &Value, soft_delete_column: Option<&str>) -> Result<SqlResult, DatabaseError> {
        let pk = self.primary_key()?;
        let pk_match = format!("{} = $1::{}", DatabaseManager::quote_identifier(&pk.name), pk.cast_type());
        let query = match soft_delete_column {
            Some(column) => {
                let column = DatabaseManager::quote_identifier(column);
                format!(
                    "UPDATE {} AS r SET {} = now() WHERE {} AND {} IS NULL RETURNING row_to_json(r) AS row",
                    self.table.qualified_name(),
                    column,
                    pk_match,
                    column
                )
            }
            None => format!(
                "DELETE FROM {} AS r WHERE {} RETURNING row_to_json(r) AS row",
                self.table.qualified_name(),
                pk_match
            ),
        };
        Ok(SqlResult { query, params: vec![pk.encode(id)] })
    }

    fn column(&self, field: &str) -> Result<&'a crate::schema::ColumnSchema, DatabaseError> {
        self.table
            .column(field)
            .ok_or_else(|| DatabaseError::QueryError(format!("Unknown column '{}' on '{}'", field, self.table.name)))
    }
}

fn bind_params<'q>(
    mut q: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
    params: &'q [Option<String>],
) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
    for param in params {
        q = q.bind(param.as_deref());
    }
    q
}

fn decode_row(row: &sqlx::postgres::PgRow) -> Result<Map<String, Value>, DatabaseError> {
    match row.try_get::<Value, _>("row")? {
        Value::Object(map) => Ok(map),
        other => Err(DatabaseError::QueryError(format!("Expected JSON object row, got {}", other))),
    }
}
