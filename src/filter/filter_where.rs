use serde_json::Value;
use std::collections::BTreeSet;

use super::error::FilterError;
use super::types::{FilterOp, FilterWhereInfo, FilterWhereOptions};
use crate::database::manager::DatabaseManager;
use crate::schema::{ColumnSchema, ColumnType, TableSchema};

/// Renders the JSON where-language into a parameterized SQL predicate
pub struct FilterWhere<'a> {
    table: &'a TableSchema,
    readable: Option<&'a BTreeSet<String>>,
    param_values: Vec<Option<String>>,
}

impl<'a> FilterWhere<'a> {
    pub fn new(table: &'a TableSchema, readable: Option<&'a BTreeSet<String>>) -> Self {
        Self {
            table,
            readable,
            param_values: vec![],
        }
    }

    pub fn validate(where_data: &Value) -> Result<(), FilterError> {
        match where_data {
            Value::Null | Value::Object(_) => Ok(()),
            _ => Err(FilterError::InvalidWhereClause("WHERE must be an object".to_string())),
        }
    }

    /// Combine soft-delete exclusion, fixed equality conditions and the
    /// caller's where clause. Returns an empty string when nothing applies.
    ///
    /// Fixed conditions bypass the readable-field guard; a fixed value that is
    /// an array becomes `IN (...)`.
    pub fn build(
        &mut self,
        where_data: Option<&Value>,
        fixed: &[(String, Value)],
        options: &FilterWhereOptions,
    ) -> Result<String, FilterError> {
        let mut sql_conditions = vec![];

        if let Some(column) = &options.soft_delete_column {
            if self.table.has_column(column) {
                sql_conditions.push(format!("{} IS NULL", DatabaseManager::quote_identifier(column)));
            }
        }

        for (column, value) in fixed {
            let operator = if value.is_array() { FilterOp::In } else { FilterOp::Eq };
            let info = FilterWhereInfo { column: column.clone(), operator, data: value.clone() };
            let schema = self.column(column)?;
            sql_conditions.push(self.build_sql_condition(schema, &info)?);
        }

        if let Some(where_data) = where_data {
            Self::validate(where_data)?;
            sql_conditions.extend(self.parse_where_data(where_data)?);
        }

        Ok(sql_conditions.join(" AND "))
    }

    pub fn into_params(self) -> Vec<Option<String>> {
        self.param_values
    }

    fn column(&self, name: &str) -> Result<&'a ColumnSchema, FilterError> {
        self.table
            .column(name)
            .ok_or_else(|| FilterError::InvalidColumn(format!("'{}' is not a column of '{}'", name, self.table.name)))
    }

    fn parse_where_data(&mut self, where_data: &Value) -> Result<Vec<String>, FilterError> {
        let obj = match where_data {
            Value::Null => return Ok(vec![]),
            Value::Object(obj) => obj,
            _ => return Err(FilterError::InvalidWhereClause("Expected an object".to_string())),
        };

        let mut conditions = vec![];
        for (key, value) in obj {
            if key.starts_with('$') {
                if let Some(sql) = self.parse_logical_operator(key, value)? {
                    conditions.push(sql);
                }
            } else {
                conditions.extend(self.parse_field_condition(key, value)?);
            }
        }
        Ok(conditions)
    }

    fn parse_logical_operator(&mut self, op: &str, value: &Value) -> Result<Option<String>, FilterError> {
        match Self::map_operator(op)? {
            operator @ (FilterOp::And | FilterOp::Or) => {
                let arr = value
                    .as_array()
                    .ok_or_else(|| FilterError::InvalidOperatorData(format!("{} requires array", op)))?;
                let mut sql_parts = Vec::new();
                for v in arr {
                    let parts = self.parse_where_data(v)?;
                    if !parts.is_empty() {
                        sql_parts.push(format!("({})", parts.join(" AND ")));
                    }
                }
                if sql_parts.is_empty() {
                    // An empty disjunction matches nothing
                    return Ok((operator == FilterOp::Or).then(|| "FALSE".to_string()));
                }
                let joiner = if operator == FilterOp::And { " AND " } else { " OR " };
                Ok(Some(format!("({})", sql_parts.join(joiner))))
            }
            FilterOp::Not => {
                let parts = self.parse_where_data(value)?;
                if parts.is_empty() {
                    return Ok(None);
                }
                Ok(Some(format!("NOT ({})", parts.join(" AND "))))
            }
            _ => Err(FilterError::UnsupportedOperator(format!("{} is not a logical operator", op))),
        }
    }

    fn parse_field_condition(&mut self, field: &str, value: &Value) -> Result<Vec<String>, FilterError> {
        let column = self.column(field)?;
        if let Some(readable) = self.readable {
            if !readable.contains(field) {
                return Err(FilterError::FieldNotPermitted(field.to_string()));
            }
        }

        let mut infos = vec![];
        match value {
            Value::Object(obj) if !obj.is_empty() && obj.keys().all(|k| k.starts_with('$')) => {
                for (op_key, op_val) in obj {
                    let operator = Self::map_operator(op_key)?;
                    if matches!(operator, FilterOp::And | FilterOp::Or | FilterOp::Not) {
                        return Err(FilterError::UnsupportedOperator(format!("{} on field '{}'", op_key, field)));
                    }
                    infos.push(FilterWhereInfo { column: field.to_string(), operator, data: op_val.clone() });
                }
            }
            // Implicit equality: { field: value }
            _ => infos.push(FilterWhereInfo { column: field.to_string(), operator: FilterOp::Eq, data: value.clone() }),
        }

        infos.iter().map(|info| self.build_sql_condition(column, info)).collect()
    }

    pub fn map_operator(op_key: &str) -> Result<FilterOp, FilterError> {
        Ok(match op_key {
            "$eq" => FilterOp::Eq,
            "$ne" | "$neq" => FilterOp::Ne,
            "$gt" => FilterOp::Gt,
            "$gte" => FilterOp::Gte,
            "$lt" => FilterOp::Lt,
            "$lte" => FilterOp::Lte,
            "$like" => FilterOp::Like,
            "$nlike" => FilterOp::NLike,
            "$ilike" => FilterOp::ILike,
            "$nilike" => FilterOp::NILike,
            "$search" => FilterOp::Search,
            "$in" => FilterOp::In,
            "$nin" => FilterOp::NIn,
            "$between" => FilterOp::Between,
            "$null" => FilterOp::Null,
            "$any" => FilterOp::Any,
            "$all" => FilterOp::All,
            "$size" => FilterOp::Size,
            "$and" => FilterOp::And,
            "$or" => FilterOp::Or,
            "$not" => FilterOp::Not,
            other => return Err(FilterError::UnsupportedOperator(other.to_string())),
        })
    }

    fn build_sql_condition(&mut self, column: &ColumnSchema, condition: &FilterWhereInfo) -> Result<String, FilterError> {
        let quoted_column = DatabaseManager::quote_identifier(&condition.column);
        let data = &condition.data;

        match condition.operator {
            FilterOp::Eq => {
                if data.is_null() {
                    Ok(format!("{} IS NULL", quoted_column))
                } else {
                    Ok(format!("{} = {}", quoted_column, self.param(column, data)))
                }
            }
            FilterOp::Ne => {
                if data.is_null() {
                    Ok(format!("{} IS NOT NULL", quoted_column))
                } else {
                    Ok(format!("{} <> {}", quoted_column, self.param(column, data)))
                }
            }
            FilterOp::Gt | FilterOp::Gte | FilterOp::Lt | FilterOp::Lte => {
                let symbol = match condition.operator {
                    FilterOp::Gt => ">",
                    FilterOp::Gte => ">=",
                    FilterOp::Lt => "<",
                    _ => "<=",
                };
                Self::require_scalar(condition)?;
                Ok(format!("{} {} {}", quoted_column, symbol, self.param(column, data)))
            }
            FilterOp::Like | FilterOp::NLike | FilterOp::ILike | FilterOp::NILike => {
                let pattern = data.as_str().ok_or_else(|| {
                    FilterError::InvalidOperatorData(format!("pattern for '{}' must be a string", condition.column))
                })?;
                let keyword = match condition.operator {
                    FilterOp::Like => "LIKE",
                    FilterOp::NLike => "NOT LIKE",
                    FilterOp::ILike => "ILIKE",
                    _ => "NOT ILIKE",
                };
                Ok(format!("{}::text {} {}", quoted_column, keyword, self.text_param(pattern.to_string())))
            }
            FilterOp::Search => {
                let term = match data {
                    Value::String(s) => s.clone(),
                    Value::Number(n) => n.to_string(),
                    _ => {
                        return Err(FilterError::InvalidOperatorData(format!(
                            "search term for '{}' must be a string",
                            condition.column
                        )))
                    }
                };
                let pattern = format!("%{}%", escape_like(&term));
                Ok(format!("{}::text ILIKE {}", quoted_column, self.text_param(pattern)))
            }
            FilterOp::In | FilterOp::NIn => {
                let values = match data {
                    Value::Array(values) => values.clone(),
                    other => vec![other.clone()],
                };
                let negate = condition.operator == FilterOp::NIn;
                if values.is_empty() {
                    return Ok(if negate { "TRUE" } else { "FALSE" }.to_string());
                }
                let params: Vec<String> = values.iter().map(|v| self.param(column, v)).collect();
                let keyword = if negate { "NOT IN" } else { "IN" };
                Ok(format!("{} {} ({})", quoted_column, keyword, params.join(", ")))
            }
            FilterOp::Between => match data {
                Value::Array(values) if values.len() == 2 => Ok(format!(
                    "{} BETWEEN {} AND {}",
                    quoted_column,
                    self.param(column, &values[0]),
                    self.param(column, &values[1])
                )),
                _ => Err(FilterError::InvalidOperatorData("$between requires exactly 2 values".to_string())),
            },
            FilterOp::Null => {
                let is_null = match data {
                    Value::Bool(b) => *b,
                    Value::String(s) if s.eq_ignore_ascii_case("true") || s.is_empty() => true,
                    Value::String(s) if s.eq_ignore_ascii_case("false") => false,
                    _ => return Err(FilterError::InvalidOperatorData("$null requires a boolean".to_string())),
                };
                let keyword = if is_null { "IS NULL" } else { "IS NOT NULL" };
                Ok(format!("{} {}", quoted_column, keyword))
            }
            FilterOp::Any | FilterOp::All => {
                if column.column_type != ColumnType::Array {
                    return Err(FilterError::InvalidOperatorData(format!(
                        "'{}' is not an array column",
                        condition.column
                    )));
                }
                let values = match data {
                    Value::Array(_) => data.clone(),
                    other => Value::Array(vec![other.clone()]),
                };
                let symbol = if condition.operator == FilterOp::Any { "&&" } else { "@>" };
                Ok(format!("{} {} {}", quoted_column, symbol, self.param(column, &values)))
            }
            FilterOp::Size => {
                let size = data
                    .as_i64()
                    .ok_or_else(|| FilterError::InvalidOperatorData("$size requires an integer".to_string()))?;
                Ok(format!(
                    "COALESCE(array_length({}, 1), 0) = {}::int4",
                    quoted_column,
                    self.text_param(size.to_string())
                ))
            }
            FilterOp::And | FilterOp::Or | FilterOp::Not => Err(FilterError::UnsupportedOperator(format!(
                "logical operator on field '{}'",
                condition.column
            ))),
        }
    }

    fn require_scalar(condition: &FilterWhereInfo) -> Result<(), FilterError> {
        match condition.data {
            Value::Null | Value::Array(_) | Value::Object(_) => Err(FilterError::InvalidOperatorData(format!(
                "comparison on '{}' requires a scalar value",
                condition.column
            ))),
            _ => Ok(()),
        }
    }

    /// Bind a value cast to the column's type
    fn param(&mut self, column: &ColumnSchema, value: &Value) -> String {
        self.param_values.push(column.encode(value));
        format!("${}::{}", self.param_values.len(), column.cast_type())
    }

    fn text_param(&mut self, value: String) -> String {
        self.param_values.push(Some(value));
        format!("${}", self.param_values.len())
    }
}

fn escape_like(term: &str) -> String {
    term.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::types::fixtures::posts;
    use serde_json::json;

    fn render(where_data: Value) -> Result<(String, Vec<Option<String>>), FilterError> {
        let table = posts();
        let mut builder = FilterWhere::new(&table, None);
        let sql = builder.build(Some(&where_data), &[], &FilterWhereOptions::default())?;
        Ok((sql, builder.into_params()))
    }

    fn text(values: &[&str]) -> Vec<Option<String>> {
        values.iter().map(|v| Some(v.to_string())).collect()
    }

    #[test]
    fn implicit_equality_casts_to_column_type() {
        let (sql, params) = render(json!({"author_id": 7})).unwrap();
        assert_eq!(sql, "\"author_id\" = $1::int4");
        assert_eq!(params, text(&["7"]));
    }

    #[test]
    fn null_equality_uses_is_null() {
        let (sql, params) = render(json!({"body": null})).unwrap();
        assert_eq!(sql, "\"body\" IS NULL");
        assert!(params.is_empty());
    }

    #[test]
    fn nested_logical_operators_number_params_in_order() {
        let (sql, params) = render(json!({
            "$or": [
                {"title": {"$ilike": "%rust%"}},
                {"$and": [{"author_id": {"$gte": 2}}, {"author_id": {"$lt": 5}}]}
            ]
        }))
        .unwrap();
        assert_eq!(
            sql,
            "((\"title\"::text ILIKE $1) OR (((\"author_id\" >= $2::int4) AND (\"author_id\" < $3::int4))))"
        );
        assert_eq!(params, text(&["%rust%", "2", "5"]));
    }

    #[test]
    fn not_wraps_conditions() {
        let (sql, _) = render(json!({"$not": {"published": true}})).unwrap();
        assert_eq!(sql, "NOT (\"published\" = $1::bool)");
    }

    #[test]
    fn in_and_nin_handle_empty_lists() {
        assert_eq!(render(json!({"id": {"$in": []}})).unwrap().0, "FALSE");
        assert_eq!(render(json!({"id": {"$nin": []}})).unwrap().0, "TRUE");
        let (sql, params) = render(json!({"id": {"$nin": [1, 2]}})).unwrap();
        assert_eq!(sql, "\"id\" NOT IN ($1::int4, $2::int4)");
        assert_eq!(params, text(&["1", "2"]));
    }

    #[test]
    fn between_requires_two_values() {
        let (sql, _) = render(json!({"created_at": {"$between": ["2024-01-01", "2024-12-31"]}})).unwrap();
        assert_eq!(sql, "\"created_at\" BETWEEN $1::timestamptz AND $2::timestamptz");
        assert!(matches!(
            render(json!({"id": {"$between": [1]}})),
            Err(FilterError::InvalidOperatorData(_))
        ));
    }

    #[test]
    fn search_escapes_wildcards() {
        let (sql, params) = render(json!({"title": {"$search": "50%_off"}})).unwrap();
        assert_eq!(sql, "\"title\"::text ILIKE $1");
        assert_eq!(params, text(&["%50\\%\\_off%"]));
    }

    #[test]
    fn null_operator_accepts_booleans() {
        assert_eq!(render(json!({"body": {"$null": true}})).unwrap().0, "\"body\" IS NULL");
        assert_eq!(render(json!({"body": {"$null": false}})).unwrap().0, "\"body\" IS NOT NULL");
    }

    #[test]
    fn array_operators_require_array_columns() {
        let (sql, params) = render(json!({"tags": {"$any": ["a", "b"]}})).unwrap();
        assert_eq!(sql, "\"tags\" && $1::text[]");
        assert_eq!(params, text(&["{\"a\",\"b\"}"]));
        assert!(render(json!({"title": {"$all": ["a"]}})).is_err());
    }

    #[test]
    fn rejects_unknown_columns_and_operators() {
        assert!(matches!(render(json!({"nope": 1})), Err(FilterError::InvalidColumn(_))));
        assert!(matches!(
            render(json!({"title": {"$regex": "x"}})),
            Err(FilterError::UnsupportedOperator(_))
        ));
        assert!(matches!(render(json!({"$xor": []})), Err(FilterError::UnsupportedOperator(_))));
    }

    #[test]
    fn readable_guard_blocks_hidden_fields() {
        let table = posts();
        let readable: BTreeSet<String> = ["id", "title"].iter().map(|s| s.to_string()).collect();
        let mut builder = FilterWhere::new(&table, Some(&readable));
        let result = builder.build(Some(&json!({"body": "x"})), &[], &FilterWhereOptions::default());
        assert!(matches!(result, Err(FilterError::FieldNotPermitted(f)) if f == "body"));
    }

    #[test]
    fn fixed_conditions_and_soft_delete_come_first() {
        let mut table = posts();
        table.columns.push(crate::schema::types::fixtures::column("deleted_at", "timestamptz", true));
        let readable: BTreeSet<String> = ["title"].iter().map(|s| s.to_string()).collect();
        let mut builder = FilterWhere::new(&table, Some(&readable));
        let options = FilterWhereOptions { soft_delete_column: Some("deleted_at".to_string()) };
        let sql = builder
            .build(
                Some(&json!({"title": "x"})),
                &[("author_id".to_string(), json!(3)), ("id".to_string(), json!([1, 2]))],
                &options,
            )
            .unwrap();
        assert_eq!(
            sql,
            "\"deleted_at\" IS NULL AND \"author_id\" = $1::int4 AND \"id\" IN ($2::int4, $3::int4) AND \"title\" = $4::varchar"
        );
        assert_eq!(builder.into_params(), text(&["3", "1", "2", "x"]));
    }

    #[test]
    fn soft_delete_ignored_when_table_lacks_column() {
        let table = posts();
        let mut builder = FilterWhere::new(&table, None);
        let options = FilterWhereOptions { soft_delete_column: Some("deleted_at".to_string()) };
        assert_eq!(builder.build(None, &[], &options).unwrap(), "");
    }
}
