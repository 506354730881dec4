use serde_json::Value;
use std::collections::BTreeSet;

use super::error::FilterError;
use super::filter_order::FilterOrder;
use super::filter_where::FilterWhere;
use super::types::{FilterOrderInfo, FilterWhereOptions, SqlResult};
use crate::database::manager::DatabaseManager;
use crate::schema::TableSchema;

/// Builds read queries for one table. Rows come back as a single JSON column
/// named `row`.
pub struct Filter<'a> {
    table: &'a TableSchema,
    readable: Option<BTreeSet<String>>,
    select_columns: Vec<String>,
    where_data: Option<Value>,
    fixed: Vec<(String, Value)>,
    order_data: Vec<FilterOrderInfo>,
    limit: Option<i64>,
    offset: Option<i64>,
    options: FilterWhereOptions,
    lock: bool,
}

impl<'a> Filter<'a> {
    pub fn new(table: &'a TableSchema) -> Self {
        Self {
            table,
            readable: None,
            select_columns: vec![],
            where_data: None,
            fixed: vec![],
            order_data: vec![],
            limit: None,
            offset: None,
            options: FilterWhereOptions::default(),
            lock: false,
        }
    }

    /// Restrict select, where and order to these columns. Call before the
    /// other builders so their input is checked against it.
    pub fn readable<I: IntoIterator<Item = String>>(&mut self, columns: I) -> &mut Self {
        self.readable = Some(columns.into_iter().collect());
        self
    }

    pub fn select(&mut self, columns: Vec<String>) -> Result<&mut Self, FilterError> {
        for column in &columns {
            if !self.table.has_column(column) {
                return Err(FilterError::InvalidColumn(format!(
                    "'{}' is not a column of '{}'",
                    column, self.table.name
                )));
            }
            if let Some(readable) = &self.readable {
                if !readable.contains(column) {
                    return Err(FilterError::FieldNotPermitted(column.clone()));
                }
            }
        }
        self.select_columns = columns;
        Ok(self)
    }

    pub fn where_clause(&mut self, conditions: Value) -> Result<&mut Self, FilterError> {
        FilterWhere::validate(&conditions)?;
        self.where_data = Some(conditions);
        Ok(self)
    }

    /// Add `column = value` (or `IN` for arrays) outside the caller's where clause
    pub fn require(&mut self, column: impl Into<String>, value: Value) -> &mut Self {
        self.fixed.push((column.into(), value));
        self
    }

    pub fn order(&mut self, order_spec: Value) -> Result<&mut Self, FilterError> {
        self.order_data = FilterOrder::validate_and_parse(&order_spec, self.table, self.readable.as_ref())?;
        Ok(self)
    }

    pub fn limit(&mut self, limit: i64, offset: Option<i64>) -> Result<&mut Self, FilterError> {
        if limit < 0 {
            return Err(FilterError::InvalidLimit("Limit must be non-negative".to_string()));
        }
        if let Some(off) = offset {
            if off < 0 {
                return Err(FilterError::InvalidOffset("Offset must be non-negative".to_string()));
            }
        }
        self.limit = Some(limit);
        self.offset = offset;
        Ok(self)
    }

    pub fn soft_delete(&mut self, column: Option<String>) -> &mut Self {
        self.options.soft_delete_column = column;
        self
    }

    /// Lock matched rows for the rest of the transaction
    pub fn for_update(&mut self) -> &mut Self {
        self.lock = true;
        self
    }

    pub fn to_sql(&self) -> Result<SqlResult, FilterError> {
        let (where_clause, params) = self.to_where_sql()?;
        let inner = [
            format!("SELECT {}", self.build_select_clause()),
            format!("FROM {}", self.table.qualified_name()),
            if where_clause.is_empty() { String::new() } else { format!("WHERE {}", where_clause) },
            FilterOrder::generate(&self.order_data),
            self.build_limit_clause(),
            if self.lock { "FOR UPDATE".to_string() } else { String::new() },
        ]
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

        Ok(SqlResult {
            query: format!("SELECT row_to_json(r) AS row FROM ({}) r", inner),
            params,
        })
    }

    pub fn to_count_sql(&self) -> Result<SqlResult, FilterError> {
        let (where_clause, params) = self.to_where_sql()?;
        let query = if where_clause.is_empty() {
            format!("SELECT COUNT(*) AS count FROM {}", self.table.qualified_name())
        } else {
            format!("SELECT COUNT(*) AS count FROM {} WHERE {}", self.table.qualified_name(), where_clause)
        };
        Ok(SqlResult { query, params })
    }

    fn to_where_sql(&self) -> Result<(String, Vec<Option<String>>), FilterError> {
        let mut builder = FilterWhere::new(self.table, self.readable.as_ref());
        let sql = builder.build(self.where_data.as_ref(), &self.fixed, &self.options)?;
        Ok((sql, builder.into_params()))
    }

    fn build_select_clause(&self) -> String {
        let columns: Vec<&str> = if !self.select_columns.is_empty() {
            self.select_columns.iter().map(String::as_str).collect()
        } else if let Some(readable) = &self.readable {
            self.table.column_names().filter(|c| readable.contains(*c)).collect()
        } else {
            return "*".to_string();
        };
        if columns.is_empty() {
            // Nothing readable: keep the row count, expose no columns
            return "NULL AS \"_\"".to_string();
        }
        columns
            .iter()
            .map(|c| DatabaseManager::quote_identifier(c))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn build_limit_clause(&self) -> String {
        match (self.limit, self.offset) {
            (Some(l), Some(o)) => format!("LIMIT {} OFFSET {}", l, o),
            (Some(l), None) => format!("LIMIT {}", l),
            (None, Some(o)) => format!("OFFSET {}", o),
            (None, None) => String::new(),
        }
    }
}
