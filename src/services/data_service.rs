//! Record operations behind the data and find endpoints.
//!
//! Every operation authorizes first, then builds and validates its SQL, and
//! only then touches the database. Writes run inside one transaction per
//! request so bulk requests are all-or-nothing.

use serde_json::{Map, Value};
use sqlx::PgConnection;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::info;

use crate::access::engine::value_as_text;
use crate::access::{AccessDenied, AccessEngine, AccessGrant, Caller};
use crate::api::{PageWindow, Paginated};
use crate::database::{DatabaseError, DynamicRepository, Record, RecordError};
use crate::error::ApiError;
use crate::filter::types::SqlResult;
use crate::filter::{Filter, FilterData, FilterError};
use crate::schema::{validate_input, Relation, RelationKind, TableSchema};
use crate::state::AppState;
use crate::types::Operation;

type Row = Map<String, Value>;

pub struct DataService<'a> {
    state: &'a AppState,
    caller: &'a Caller,
}

impl<'a> DataService<'a> {
    pub fn new(state: &'a AppState, caller: &'a Caller) -> Self {
        Self { state, caller }
    }

    /// Resolve the table and decide whether the caller may run `operation` on it
    pub async fn authorize(&self, table: &str, operation: Operation) -> Result<(Arc<TableSchema>, AccessGrant), ApiError> {
        AccessEngine::ensure_exposed(table)?;
        let schema = self.state.schemas.get(table).await?;
        let rules = self.state.permissions.rules_for(self.caller.role(), table).await?;
        let grant = self.state.engine.decide(self.caller, table, operation, &rules)?;

        if let Some((column, _)) = grant.owner_condition() {
            if !schema.has_column(column) {
                let denied = AccessDenied::MissingOwnershipColumn {
                    table: table.to_string(),
                    column: column.to_string(),
                };
                tracing::warn!("Access denied for {}: {}", self.caller.label(), denied);
                return Err(denied.into());
            }
        }
        Ok((schema, grant))
    }

    /// List rows with filters, sorting, pagination and relations
    pub async fn list(&self, table: &str, data: FilterData) -> Result<Paginated, ApiError> {
        let (schema, grant) = self.authorize(table, Operation::Read).await?;
        let window = PageWindow::resolve(data.limit, data.offset, data.page.as_deref(), &self.state.config.pagination)?;
        let mut selection = Selection::split(&schema, data.select, data.relations, self.state.config.pagination.max_relations)?;

        let mut filter = self.scoped_filter(&schema, &grant);
        selection.apply(&mut filter, &schema, &grant)?;
        if let Some(conditions) = data.where_clause {
            filter.where_clause(conditions)?;
        }
        if let Some(order) = data.order {
            filter.order(order)?;
        }
        filter.limit(window.limit, Some(window.offset))?;

        let count_sql = filter.to_count_sql()?;
        let select_sql = filter.to_sql()?;
        let plans = self.plan_relations(&schema, &selection).await?;

        let repo = self.repository(&schema);
        let mut conn = self.state.pool.acquire().await.map_err(DatabaseError::from)?;
        let total = repo.fetch_count(&mut conn, &count_sql).await?;
        let rows = repo.fetch_rows(&mut conn, &select_sql).await?;
        let data = self.finish_rows(&mut conn, rows, &grant, &selection, &plans).await?;

        Ok(Paginated::new(window, total, data))
    }

    /// Fetch one row by primary key. Rows outside an own-records grant are not found.
    pub async fn get(&self, table: &str, id: &str, data: FilterData) -> Result<Value, ApiError> {
        let (schema, grant) = self.authorize(table, Operation::Read).await?;
        let pk = record_key(&schema)?;
        let mut selection = Selection::split(&schema, data.select, data.relations, self.state.config.pagination.max_relations)?;

        let mut filter = self.scoped_filter(&schema, &grant);
        selection.apply(&mut filter, &schema, &grant)?;
        filter.require(pk, Value::String(id.to_string()));
        let sql = filter.to_sql()?;
        let plans = self.plan_relations(&schema, &selection).await?;

        let mut conn = self.state.pool.acquire().await.map_err(DatabaseError::from)?;
        let rows = self.repository(&schema).fetch_rows(&mut conn, &sql).await?;
        if rows.is_empty() {
            return Err(record_not_found(&schema.name, &Value::String(id.to_string())));
        }
        let mut data = self.finish_rows(&mut conn, rows, &grant, &selection, &plans).await?;
        Ok(data.swap_remove(0))
    }

    /// Insert one object or an array of objects
    pub async fn create(&self, table: &str, body: Value) -> Result<Value, ApiError> {
        let (records, was_array) = Record::from_json_flexible(body)?;
        let (schema, grant) = self.authorize(table, Operation::Create).await?;

        let mut inputs = Vec::with_capacity(records.len());
        for (index, record) in records.into_iter().enumerate() {
            let mut input = record.into_map();
            AccessEngine::check_input_fields(&grant, &input)?;
            AccessEngine::stamp_owner(&grant, &mut input)?;
            validate_input(&schema, &input, Operation::Create).map_err(|e| indexed(e, was_array.then_some(index)))?;
            inputs.push(input);
        }

        let repo = self.repository(&schema);
        let mut tx = self.state.pool.begin().await.map_err(DatabaseError::from)?;
        let mut created = Vec::with_capacity(inputs.len());
        for input in &inputs {
            let mut row = repo.insert(&mut tx, input).await?;
            grant.fields.filter_row(&mut row);
            created.push(Value::Object(row));
        }
        tx.commit().await.map_err(DatabaseError::from)?;

        info!("Created {} record(s) in '{}' as {}", created.len(), schema.name, self.caller.label());
        Ok(shape(created, was_array))
    }

    /// Partial update of one row
    pub async fn update(&self, table: &str, id: &str, body: Value) -> Result<Value, ApiError> {
        let mut input = Record::from_json(body)?.into_map();
        let (schema, grant) = self.authorize(table, Operation::Update).await?;
        let pk = record_key(&schema)?;

        // The body may repeat the key it addresses
        if input.get(pk).and_then(value_as_text).as_deref() == Some(id) {
            input.remove(pk);
        }
        prepare_update(&schema, &grant, &mut input, None)?;

        let id = Value::String(id.to_string());
        let mut tx = self.state.pool.begin().await.map_err(DatabaseError::from)?;
        let row = self.update_in(&mut tx, &schema, &grant, &id, input).await?;
        tx.commit().await.map_err(DatabaseError::from)?;

        info!("Updated record {} in '{}' as {}", key_text(&id), schema.name, self.caller.label());
        Ok(Value::Object(row))
    }

    /// Update several rows, each object carrying its primary key
    pub async fn update_many(&self, table: &str, body: Value) -> Result<Value, ApiError> {
        let (records, was_array) = Record::from_json_flexible(body)?;
        let (schema, grant) = self.authorize(table, Operation::Update).await?;
        let pk = record_key(&schema)?;

        let mut updates = Vec::with_capacity(records.len());
        for (index, record) in records.into_iter().enumerate() {
            let index = was_array.then_some(index);
            let mut input = record.into_map();
            let id = match input.remove(pk) {
                Some(id) if !id.is_null() => id,
                _ => return Err(indexed(RecordError::field(pk, "is required"), index).into()),
            };
            prepare_update(&schema, &grant, &mut input, index)?;
            updates.push((id, input));
        }

        let mut tx = self.state.pool.begin().await.map_err(DatabaseError::from)?;
        let mut updated = Vec::with_capacity(updates.len());
        for (id, input) in updates {
            let row = self.update_in(&mut tx, &schema, &grant, &id, input).await?;
            updated.push(Value::Object(row));
        }
        tx.commit().await.map_err(DatabaseError::from)?;

        info!("Updated {} record(s) in '{}' as {}", updated.len(), schema.name, self.caller.label());
        Ok(shape(updated, was_array))
    }

    pub async fn delete(&self, table: &str, id: &str) -> Result<Value, ApiError> {
        let (schema, grant) = self.authorize(table, Operation::Delete).await?;
        record_key(&schema)?;

        let id = Value::String(id.to_string());
        let mut tx = self.state.pool.begin().await.map_err(DatabaseError::from)?;
        let row = self.delete_in(&mut tx, &schema, &grant, &id).await?;
        tx.commit().await.map_err(DatabaseError::from)?;

        info!("Deleted record {} from '{}' as {}", key_text(&id), schema.name, self.caller.label());
        Ok(Value::Object(row))
    }

    /// Delete by an array of keys or of objects carrying the key
    pub async fn delete_many(&self, table: &str, body: Value) -> Result<Value, ApiError> {
        let (schema, grant) = self.authorize(table, Operation::Delete).await?;
        let pk = record_key(&schema)?;

        let keys = match body {
            Value::Array(items) if items.is_empty() => return Err(RecordError::Empty.into()),
            Value::Array(items) => items
                .into_iter()
                .enumerate()
                .map(|(index, item)| key_of(item, pk, Some(index)))
                .collect::<Result<Vec<_>, _>>()?,
            other => vec![key_of(other, pk, None)?],
        };

        let mut tx = self.state.pool.begin().await.map_err(DatabaseError::from)?;
        let mut deleted = Vec::with_capacity(keys.len());
        for id in &keys {
            let row = self.delete_in(&mut tx, &schema, &grant, id).await?;
            deleted.push(Value::Object(row));
        }
        tx.commit().await.map_err(DatabaseError::from)?;

        info!("Deleted {} record(s) from '{}' as {}", deleted.len(), schema.name, self.caller.label());
        Ok(Value::Array(deleted))
    }

    async fn update_in(
        &self,
        conn: &mut PgConnection,
        schema: &TableSchema,
        grant: &AccessGrant,
        id: &Value,
        input: Row,
    ) -> Result<Row, ApiError> {
        let current = self.lock_row(conn, schema, id).await?;
        AccessEngine::check_row(grant, &current)?;

        let mut record = Record::from(input);
        record.inject(current.clone());
        let changes = record.changes();

        let mut row = if changes.is_empty() {
            current
        } else {
            self.repository(schema)
                .update(conn, id, &changes)
                .await?
                .ok_or_else(|| record_not_found(&schema.name, id))?
        };
        grant.fields.filter_row(&mut row);
        Ok(row)
    }

    async fn delete_in(&self, conn: &mut PgConnection, schema: &TableSchema, grant: &AccessGrant, id: &Value) -> Result<Row, ApiError> {
        let current = self.lock_row(conn, schema, id).await?;
        AccessEngine::check_row(grant, &current)?;

        let repo = self.repository(schema);
        let deleted = match self.soft_delete_column(schema) {
            Some(column) => repo.soft_delete(conn, id, &column).await?,
            None => repo.delete(conn, id).await?,
        };
        let mut row = deleted.ok_or_else(|| record_not_found(&schema.name, id))?;
        grant.fields.filter_row(&mut row);
        Ok(row)
    }

    /// Load the full stored row and hold its lock until the transaction ends
    async fn lock_row(&self, conn: &mut PgConnection, schema: &TableSchema, id: &Value) -> Result<Row, ApiError> {
        let pk = record_key(schema)?;
        let mut filter = Filter::new(schema);
        filter
            .require(pk, id.clone())
            .soft_delete(self.soft_delete_column(schema))
            .for_update();
        let sql = filter.to_sql()?;
        self.repository(schema)
            .fetch_rows(conn, &sql)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| record_not_found(&schema.name, id))
    }

    /// Read filter limited to the grant's readable columns and record scope
    fn scoped_filter<'s>(&self, schema: &'s TableSchema, grant: &AccessGrant) -> Filter<'s> {
        let mut filter = Filter::new(schema);
        filter.readable(grant.fields.visible(schema.column_names()));
        if let Some((column, owner_id)) = grant.owner_condition() {
            filter.require(column, Value::String(owner_id.to_string()));
        }
        filter.soft_delete(self.soft_delete_column(schema));
        filter
    }

    async fn plan_relations(&self, schema: &TableSchema, selection: &Selection) -> Result<Vec<RelationPlan>, ApiError> {
        let mut plans = Vec::with_capacity(selection.relations.len());
        for (name, fields) in &selection.relations {
            let relation = schema
                .relation(name)
                .ok_or_else(|| FilterError::UnknownRelation(name.clone()))?
                .clone();
            let (foreign, grant) = self.authorize(&relation.foreign_table, Operation::Read).await?;

            if !grant.fields.permits(&relation.foreign_column) {
                return Err(FilterError::FieldNotPermitted(format!("{}.{}", name, relation.foreign_column)).into());
            }
            let mut select = fields.clone();
            let strip_join = !select.is_empty() && !select.contains(&relation.foreign_column);
            if strip_join {
                select.push(relation.foreign_column.clone());
            }

            let plan = RelationPlan {
                relation,
                schema: foreign,
                grant,
                select,
                strip_join,
            };
            // Surface bad relation fields before any query runs
            self.relation_sql(&plan, vec![])?;
            plans.push(plan);
        }
        Ok(plans)
    }

    fn relation_sql(&self, plan: &RelationPlan, keys: Vec<Value>) -> Result<SqlResult, ApiError> {
        let mut filter = self.scoped_filter(&plan.schema, &plan.grant);
        if !plan.select.is_empty() {
            filter.select(plan.select.clone())?;
        }
        filter.require(plan.relation.foreign_column.clone(), Value::Array(keys));
        if let Some(pk) = plan.schema.primary_key.as_deref() {
            if plan.grant.fields.permits(pk) {
                filter.order(Value::String(pk.to_string()))?;
            }
        }
        Ok(filter.to_sql()?)
    }

    /// Field-filter fetched rows, stitch relations in, then drop join-only columns
    async fn finish_rows(
        &self,
        conn: &mut PgConnection,
        mut rows: Vec<Row>,
        grant: &AccessGrant,
        selection: &Selection,
        plans: &[RelationPlan],
    ) -> Result<Vec<Value>, ApiError> {
        for row in rows.iter_mut() {
            grant.fields.filter_row(row);
        }
        for plan in plans {
            self.attach_relation(conn, &mut rows, plan).await?;
        }
        Ok(rows
            .into_iter()
            .map(|mut row| {
                for column in &selection.hidden {
                    row.remove(column);
                }
                Value::Object(row)
            })
            .collect())
    }

    async fn attach_relation(&self, conn: &mut PgConnection, rows: &mut [Row], plan: &RelationPlan) -> Result<(), ApiError> {
        let relation = &plan.relation;

        let mut seen = HashSet::new();
        let keys: Vec<Value> = rows
            .iter()
            .filter_map(|row| row.get(&relation.column))
            .filter(|value| value_as_text(value).map(|key| seen.insert(key)).unwrap_or(false))
            .cloned()
            .collect();

        let related = if keys.is_empty() {
            vec![]
        } else {
            let sql = self.relation_sql(plan, keys)?;
            self.repository(&plan.schema).fetch_rows(conn, &sql).await?
        };

        let mut grouped: HashMap<String, Vec<Value>> = HashMap::new();
        for mut item in related {
            plan.grant.fields.filter_row(&mut item);
            let key = item.get(&relation.foreign_column).and_then(value_as_text);
            if plan.strip_join {
                item.remove(&relation.foreign_column);
            }
            if let Some(key) = key {
                grouped.entry(key).or_default().push(Value::Object(item));
            }
        }

        for row in rows.iter_mut() {
            let matches = row.get(&relation.column).and_then(value_as_text).and_then(|key| grouped.get(&key));
            let value = match relation.kind {
                RelationKind::BelongsTo => matches.and_then(|items| items.first().cloned()).unwrap_or(Value::Null),
                RelationKind::HasMany => Value::Array(matches.cloned().unwrap_or_default()),
            };
            row.insert(relation.name.clone(), value);
        }
        Ok(())
    }

    fn repository<'s>(&self, schema: &'s TableSchema) -> DynamicRepository<'s> {
        DynamicRepository::new(schema).with_slow_query_warning(self.state.slow_query_threshold())
    }

    /// Configured soft-delete column, when this table carries it
    fn soft_delete_column(&self, schema: &TableSchema) -> Option<String> {
        self.state
            .config
            .database
            .soft_delete_column
            .as_ref()
            .filter(|column| schema.has_column(column))
            .cloned()
    }
}

/// One requested relation, authorized against its own table
struct RelationPlan {
    relation: Relation,
    schema: Arc<TableSchema>,
    grant: AccessGrant,
    select: Vec<String>,
    strip_join: bool,
}

/// `fields=` / `relations=` split into own columns and per-relation columns
#[derive(Debug, Default, PartialEq)]
struct Selection {
    columns: Vec<String>,
    relations: Vec<(String, Vec<String>)>,
    /// Join columns fetched only to stitch relations
    hidden: Vec<String>,
}

impl Selection {
    fn split(
        schema: &TableSchema,
        select: Option<Vec<String>>,
        relations: Option<Vec<String>>,
        max_relations: usize,
    ) -> Result<Self, FilterError> {
        let mut selection = Selection::default();
        for name in relations.unwrap_or_default() {
            selection.relation_fields(&name);
        }
        for field in select.unwrap_or_default() {
            match field.split_once('.') {
                Some((name, column)) => selection.relation_fields(name).push(column.to_string()),
                None if !selection.columns.contains(&field) => selection.columns.push(field),
                None => {}
            }
        }

        if selection.relations.len() > max_relations {
            return Err(FilterError::TooManyRelations(max_relations));
        }
        for (name, _) in &selection.relations {
            if schema.relation(name).is_none() {
                return Err(FilterError::UnknownRelation(name.clone()));
            }
        }
        Ok(selection)
    }

    fn relation_fields(&mut self, name: &str) -> &mut Vec<String> {
        let index = match self.relations.iter().position(|(n, _)| n == name) {
            Some(index) => index,
            None => {
                self.relations.push((name.to_string(), vec![]));
                self.relations.len() - 1
            }
        };
        &mut self.relations[index].1
    }

    /// Narrow the filter's select list, adding join columns the relations need
    fn apply(&mut self, filter: &mut Filter<'_>, schema: &TableSchema, grant: &AccessGrant) -> Result<(), FilterError> {
        if self.columns.is_empty() && self.relations.is_empty() {
            return Ok(());
        }
        let mut columns = if self.columns.is_empty() {
            grant.fields.visible(schema.column_names())
        } else {
            self.columns.clone()
        };
        for (name, _) in &self.relations {
            if let Some(relation) = schema.relation(name) {
                if !columns.contains(&relation.column) {
                    columns.push(relation.column.clone());
                    self.hidden.push(relation.column.clone());
                }
            }
        }
        filter.select(columns)?;
        Ok(())
    }
}

fn prepare_update(schema: &TableSchema, grant: &AccessGrant, input: &mut Row, index: Option<usize>) -> Result<(), ApiError> {
    AccessEngine::check_input_fields(grant, input)?;
    AccessEngine::stamp_owner(grant, input)?;
    validate_input(schema, input, Operation::Update).map_err(|e| indexed(e, index))?;
    Ok(())
}

/// Primary key column; record-level routes need a single-column key
fn record_key(schema: &TableSchema) -> Result<&str, ApiError> {
    schema.primary_key.as_deref().ok_or_else(|| {
        ApiError::bad_request(format!("Table '{}' has no single-column primary key", schema.name))
    })
}

fn key_of(item: Value, pk: &str, index: Option<usize>) -> Result<Value, ApiError> {
    match item {
        Value::Object(mut object) => match object.remove(pk) {
            Some(id) if !id.is_null() => Ok(id),
            _ => Err(indexed(RecordError::field(pk, "is required"), index).into()),
        },
        Value::String(_) | Value::Number(_) => Ok(item),
        _ => Err(ApiError::invalid_json("Expected primary keys or objects carrying them")),
    }
}

/// Prefix field errors with the element index of an array body
fn indexed(err: RecordError, index: Option<usize>) -> RecordError {
    match (err, index) {
        (RecordError::Invalid { field_errors }, Some(index)) => RecordError::Invalid {
            field_errors: field_errors
                .into_iter()
                .map(|(field, message)| (format!("{}.{}", index, field), message))
                .collect(),
        },
        (err, _) => err,
    }
}

fn record_not_found(table: &str, id: &Value) -> ApiError {
    ApiError::not_found(format!("Record {} not found in '{}'", key_text(id), table))
}

fn key_text(id: &Value) -> String {
    value_as_text(id).unwrap_or_else(|| id.to_string())
}

fn shape(mut rows: Vec<Value>, was_array: bool) -> Value {
    if was_array || rows.len() != 1 {
        Value::Array(rows)
    } else {
        rows.swap_remove(0)
    }
}
