use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use super::types::{ColumnSchema, ColumnType, TableSchema};
use crate::database::record::RecordError;
use crate::types::Operation;

/// Check a create/update payload against the table's columns.
///
/// Every problem is collected so the caller sees all invalid fields at once.
pub fn validate_input(schema: &TableSchema, input: &Map<String, Value>, operation: Operation) -> Result<(), RecordError> {
    let mut field_errors = BTreeMap::new();

    for (field, value) in input {
        let Some(column) = schema.column(field) else {
            field_errors.insert(field.clone(), format!("unknown column on table '{}'", schema.name));
            continue;
        };
        if !column.is_writable() {
            field_errors.insert(field.clone(), "column is generated and cannot be written".to_string());
            continue;
        }
        if operation == Operation::Update && schema.primary_key.as_deref() == Some(field.as_str()) {
            field_errors.insert(field.clone(), "primary key cannot be changed".to_string());
            continue;
        }
        if let Err(message) = check_value(column, value) {
            field_errors.insert(field.clone(), message);
        }
    }

    if operation == Operation::Create {
        for column in schema.columns.iter().filter(|c| c.is_required()) {
            let missing = matches!(input.get(&column.name), None | Some(Value::Null));
            if missing {
                field_errors.entry(column.name.clone()).or_insert_with(|| "is required".to_string());
            }
        }
    }

    if field_errors.is_empty() {
        Ok(())
    } else {
        Err(RecordError::Invalid { field_errors })
    }
}

fn check_value(column: &ColumnSchema, value: &Value) -> Result<(), String> {
    if value.is_null() {
        return if column.nullable {
            Ok(())
        } else {
            Err("cannot be null".to_string())
        };
    }

    match column.column_type {
        ColumnType::Text => {
            let text = value.as_str().ok_or("expected a string")?;
            if let Some(max) = column.max_length {
                if text.chars().count() > max as usize {
                    return Err(format!("exceeds maximum length of {}", max));
                }
            }
            Ok(())
        }
        ColumnType::Integer => match value {
            Value::Number(n) if n.is_i64() || n.is_u64() => Ok(()),
            Value::String(s) if s.trim().parse::<i64>().is_ok() => Ok(()),
            _ => Err("expected an integer".to_string()),
        },
        ColumnType::Float | ColumnType::Numeric => match value {
            Value::Number(_) => Ok(()),
            Value::String(s) if s.trim().parse::<f64>().is_ok() => Ok(()),
            _ => Err("expected a number".to_string()),
        },
        ColumnType::Boolean => match value {
            Value::Bool(_) => Ok(()),
            _ => Err("expected a boolean".to_string()),
        },
        ColumnType::Uuid => {
            let text = value.as_str().ok_or("expected a UUID string")?;
            uuid::Uuid::parse_str(text).map(|_| ()).map_err(|_| "invalid UUID".to_string())
        }
        ColumnType::Timestamp => {
            let text = value.as_str().ok_or("expected a timestamp string")?;
            if parse_timestamp(text) {
                Ok(())
            } else {
                Err("invalid timestamp".to_string())
            }
        }
        ColumnType::Date => {
            let text = value.as_str().ok_or("expected a date string")?;
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .map(|_| ())
                .map_err(|_| "invalid date, expected YYYY-MM-DD".to_string())
        }
        ColumnType::Time => {
            let text = value.as_str().ok_or("expected a time string")?;
            let valid = NaiveTime::parse_from_str(text, "%H:%M:%S%.f").is_ok()
                || NaiveTime::parse_from_str(text, "%H:%M").is_ok();
            if valid {
                Ok(())
            } else {
                Err("invalid time, expected HH:MM[:SS]".to_string())
            }
        }
        ColumnType::Array => match value {
            Value::Array(_) => Ok(()),
            _ => Err("expected an array".to_string()),
        },
        // Postgres parses json and user-defined types itself
        ColumnType::Json | ColumnType::Other => Ok(()),
    }
}

fn parse_timestamp(text: &str) -> bool {
    DateTime::parse_from_rfc3339(text).is_ok()
        || NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f").is_ok()
        || NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f").is_ok()
        || NaiveDate::parse_from_str(text, "%Y-%m-%d").is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::types::fixtures::{column, posts};
    use serde_json::json;

    fn errors(result: Result<(), RecordError>) -> BTreeMap<String, String> {
        match result {
            Err(RecordError::Invalid { field_errors }) => field_errors,
            other => panic!("expected validation errors, got {:?}", other),
        }
    }

    fn input(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn accepts_valid_create() {
        let table = posts();
        let data = input(json!({
            "title": "hello",
            "author_id": 3,
            "published": true,
            "tags": ["a", "b"],
            "created_at": "2024-01-02T03:04:05Z"
        }));
        assert!(validate_input(&table, &data, Operation::Create).is_ok());
    }

    #[test]
    fn create_requires_non_nullable_columns_without_defaults() {
        let table = posts();
        let fields = errors(validate_input(&table, &input(json!({"body": "x"})), Operation::Create));
        assert_eq!(fields.get("title").map(String::as_str), Some("is required"));
        assert!(!fields.contains_key("id"));
    }

    #[test]
    fn update_allows_partial_input_but_not_primary_key() {
        let table = posts();
        assert!(validate_input(&table, &input(json!({"body": "x"})), Operation::Update).is_ok());
        let fields = errors(validate_input(&table, &input(json!({"id": 9})), Operation::Update));
        assert!(fields["id"].contains("primary key"));
    }

    #[test]
    fn collects_every_invalid_field() {
        let table = posts();
        let fields = errors(validate_input(
            &table,
            &input(json!({
                "title": "this title is far too long for the column",
                "author_id": "three",
                "published": "yes",
                "tags": "a,b",
                "created_at": "yesterday",
                "nope": 1
            })),
            Operation::Update,
        ));
        assert_eq!(fields.len(), 6);
        assert!(fields["title"].contains("maximum length"));
        assert!(fields["nope"].contains("unknown column"));
    }

    #[test]
    fn rejects_null_for_not_null_column() {
        let table = posts();
        let fields = errors(validate_input(&table, &input(json!({"title": null})), Operation::Update));
        assert_eq!(fields["title"], "cannot be null");
    }

    #[test]
    fn rejects_generated_columns() {
        let mut table = posts();
        let mut slug = column("slug", "text", true);
        slug.is_generated = true;
        table.columns.push(slug);
        let fields = errors(validate_input(&table, &input(json!({"title": "a", "slug": "a"})), Operation::Create));
        assert!(fields["slug"].contains("generated"));
    }

    #[test]
    fn checks_scalar_formats() {
        assert!(check_value(&column("u", "uuid", true), &json!("550e8400-e29b-41d4-a716-446655440000")).is_ok());
        assert!(check_value(&column("u", "uuid", true), &json!("nope")).is_err());
        assert!(check_value(&column("d", "date", true), &json!("2024-02-29")).is_ok());
        assert!(check_value(&column("d", "date", true), &json!("2024-13-01")).is_err());
        assert!(check_value(&column("t", "time", true), &json!("12:30")).is_ok());
        assert!(check_value(&column("n", "numeric", true), &json!("12.50")).is_ok());
        assert!(check_value(&column("n", "int8", true), &json!(1.5)).is_err());
        assert!(check_value(&column("j", "jsonb", true), &json!({"any": [1, 2]})).is_ok());
    }
}
