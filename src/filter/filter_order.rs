use serde_json::Value;
use std::collections::BTreeSet;

use super::error::FilterError;
use super::types::{FilterOrderInfo, SortDirection};
use crate::database::manager::DatabaseManager;
use crate::schema::TableSchema;

pub struct FilterOrder;

impl FilterOrder {
    /// Accepts `"a desc, b"`, `"a.desc,b.asc"`, `["a desc", "b"]` or `{"a": "desc"}`
    pub fn validate_and_parse(
        order: &Value,
        table: &TableSchema,
        readable: Option<&BTreeSet<String>>,
    ) -> Result<Vec<FilterOrderInfo>, FilterError> {
        let infos = match order {
            Value::Null => vec![],
            Value::String(s) => Self::parse_order_string(s)?,
            Value::Array(arr) => {
                let mut out = Vec::new();
                for v in arr {
                    let s = v
                        .as_str()
                        .ok_or_else(|| FilterError::InvalidOrder("array entries must be strings".to_string()))?;
                    out.extend(Self::parse_order_string(s)?);
                }
                out
            }
            Value::Object(obj) => {
                let mut out = Vec::new();
                for (k, v) in obj {
                    let dir = v.as_str().unwrap_or("asc");
                    let sort = SortDirection::parse(dir)
                        .ok_or_else(|| FilterError::InvalidOrder(format!("unknown direction '{}'", dir)))?;
                    out.push(FilterOrderInfo { column: k.clone(), sort });
                }
                out
            }
            _ => return Err(FilterError::InvalidOrder("expected string, array or object".to_string())),
        };

        for info in &infos {
            if !table.has_column(&info.column) {
                return Err(FilterError::InvalidColumn(format!(
                    "'{}' is not a column of '{}'",
                    info.column, table.name
                )));
            }
            if let Some(readable) = readable {
                if !readable.contains(&info.column) {
                    return Err(FilterError::FieldNotPermitted(info.column.clone()));
                }
            }
        }
        Ok(infos)
    }

    fn parse_order_string(s: &str) -> Result<Vec<FilterOrderInfo>, FilterError> {
        let mut out = Vec::new();
        for part in s.split(',') {
            let trimmed = part.trim();
            if trimmed.is_empty() {
                continue;
            }
            let mut it = trimmed.split_whitespace();
            let (column, dir) = match (it.next(), it.next()) {
                (Some(col), Some(dir)) => (col, Some(dir)),
                (Some(col), None) => match col.rsplit_once('.') {
                    Some((c, d)) if SortDirection::parse(d).is_some() => (c, Some(d)),
                    _ => (col, None),
                },
                _ => continue,
            };
            if it.next().is_some() {
                return Err(FilterError::InvalidOrder(format!("cannot parse '{}'", trimmed)));
            }
            let sort = match dir {
                Some(d) => SortDirection::parse(d)
                    .ok_or_else(|| FilterError::InvalidOrder(format!("unknown direction '{}'", d)))?,
                None => SortDirection::Asc,
            };
            out.push(FilterOrderInfo { column: column.to_string(), sort });
        }
        Ok(out)
    }

    pub fn generate(infos: &[FilterOrderInfo]) -> String {
        if infos.is_empty() {
            return String::new();
        }
        let parts: Vec<String> = infos
            .iter()
            .map(|i| format!("{} {}", DatabaseManager::quote_identifier(&i.column), i.sort.to_sql()))
            .collect();
        format!("ORDER BY {}", parts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::types::fixtures::posts;
    use serde_json::json;

    fn parse(order: Value) -> Result<Vec<FilterOrderInfo>, FilterError> {
        FilterOrder::validate_and_parse(&order, &posts(), None)
    }

    #[test]
    fn parses_all_accepted_shapes() {
        let expected = vec![
            FilterOrderInfo { column: "created_at".to_string(), sort: SortDirection::Desc },
            FilterOrderInfo { column: "title".to_string(), sort: SortDirection::Asc },
        ];
        assert_eq!(parse(json!("created_at desc, title")).unwrap(), expected);
        assert_eq!(parse(json!("created_at.desc,title.asc")).unwrap(), expected);
        assert_eq!(parse(json!(["created_at DESC", "title"])).unwrap(), expected);
        assert_eq!(parse(json!({"created_at": "desc"})).unwrap(), expected[..1].to_vec());
    }

    #[test]
    fn rejects_bad_directions_and_columns() {
        assert!(matches!(parse(json!("title sideways")), Err(FilterError::InvalidOrder(_))));
        assert!(matches!(parse(json!("missing.desc")), Err(FilterError::InvalidColumn(_))));
        assert!(matches!(parse(json!(5)), Err(FilterError::InvalidOrder(_))));
    }

    #[test]
    fn hidden_columns_cannot_be_sorted() {
        let readable: BTreeSet<String> = ["title".to_string()].into_iter().collect();
        let result = FilterOrder::validate_and_parse(&json!("body"), &posts(), Some(&readable));
        assert!(matches!(result, Err(FilterError::FieldNotPermitted(f)) if f == "body"));
    }

    #[test]
    fn generates_quoted_clause() {
        let infos = parse(json!("created_at.desc,id")).unwrap();
        assert_eq!(FilterOrder::generate(&infos), "ORDER BY \"created_at\" DESC, \"id\" ASC");
        assert_eq!(FilterOrder::generate(&[]), "");
    }
}
