use serde_json::{Map, Value};

use super::error::FilterError;
use super::types::FilterData;

/// Translate list query-string pairs into a [`FilterData`].
///
/// `col=v` is equality, `col[op]=v` maps to `$op`; `in`, `nin` and `between`
/// take comma-separated values, `null` / `not_null` ignore the value.
pub fn parse_query(pairs: &[(String, String)]) -> Result<FilterData, FilterError> {
    let mut data = FilterData::default();
    let mut conditions: Map<String, Value> = Map::new();

    for (key, raw) in pairs {
        match key.as_str() {
            "fields" => data.select = Some(split_list(raw)),
            "relations" => data.relations = Some(split_list(raw)),
            "sort" => data.order = Some(Value::String(raw.clone())),
            "limit" => data.limit = Some(parse_number(raw).ok_or_else(|| FilterError::InvalidLimit(raw.clone()))?),
            "offset" => {
                data.offset = Some(parse_number(raw).ok_or_else(|| FilterError::InvalidOffset(raw.clone()))?)
            }
            "page" => data.page = Some(raw.clone()),
            _ => {
                let (column, op) = split_condition_key(key)?;
                let (operator, value) = condition_for(op, raw)?;
                let entry = conditions
                    .entry(column.to_string())
                    .or_insert_with(|| Value::Object(Map::new()));
                if let Value::Object(ops) = entry {
                    ops.insert(operator.to_string(), value);
                }
            }
        }
    }

    if !conditions.is_empty() {
        data.where_clause = Some(Value::Object(conditions));
    }
    Ok(data)
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_number(raw: &str) -> Option<i64> {
    raw.trim().parse::<i64>().ok().filter(|n| *n >= 0)
}

/// `title` → (title, eq); `title[ilike]` → (title, ilike)
fn split_condition_key(key: &str) -> Result<(&str, &str), FilterError> {
    match key.find('[') {
        None => Ok((key, "eq")),
        Some(open) => {
            let rest = &key[open + 1..];
            let op = rest
                .strip_suffix(']')
                .filter(|op| !op.is_empty() && !op.contains('[') && !op.contains(']'))
                .ok_or_else(|| FilterError::InvalidWhereClause(format!("malformed filter key '{}'", key)))?;
            Ok((&key[..open], op))
        }
    }
}

fn condition_for(op: &str, raw: &str) -> Result<(&'static str, Value), FilterError> {
    let text = || Value::String(raw.to_string());
    let list = || Value::Array(split_list(raw).into_iter().map(Value::String).collect());

    Ok(match op.to_ascii_lowercase().as_str() {
        "eq" => ("$eq", text()),
        "ne" | "neq" => ("$ne", text()),
        "gt" => ("$gt", text()),
        "gte" => ("$gte", text()),
        "lt" => ("$lt", text()),
        "lte" => ("$lte", text()),
        "like" => ("$like", text()),
        "nlike" => ("$nlike", text()),
        "ilike" => ("$ilike", text()),
        "nilike" => ("$nilike", text()),
        "search" => ("$search", text()),
        "in" => ("$in", list()),
        "nin" => ("$nin", list()),
        "between" => {
            let values = split_list(raw);
            if values.len() != 2 {
                return Err(FilterError::InvalidOperatorData(format!(
                    "between expects two comma-separated values, got '{}'",
                    raw
                )));
            }
            ("$between", Value::Array(values.into_iter().map(Value::String).collect()))
        }
        "null" => ("$null", Value::Bool(true)),
        "not_null" => ("$null", Value::Bool(false)),
        other => return Err(FilterError::UnsupportedOperator(other.to_string())),
    })
}
