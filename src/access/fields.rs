use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// Field allow/deny lists attached to a grant.
///
/// A field is permitted when it is in `allowed` (or `allowed` is unset) and
/// not in `restricted`. Restricted always wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldPolicy {
    allowed: Option<BTreeSet<String>>,
    restricted: BTreeSet<String>,
}

impl FieldPolicy {
    /// No restrictions at all
    pub fn unrestricted() -> Self {
        Self::default()
    }

    /// Build from stored lists; an empty allow list means "every field"
    pub fn from_lists(allowed: &[String], restricted: &[String]) -> Self {
        let allowed = if allowed.is_empty() {
            None
        } else {
            Some(allowed.iter().map(|f| f.trim().to_string()).filter(|f| !f.is_empty()).collect())
        };
        Self {
            allowed,
            restricted: restricted.iter().map(|f| f.trim().to_string()).collect(),
        }
    }

    /// Add fields that must never be exposed
    pub fn with_restricted<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.restricted.extend(fields.into_iter().map(Into::into));
        self
    }

    pub fn permits(&self, field: &str) -> bool {
        if self.restricted.contains(field) {
            return false;
        }
        match &self.allowed {
            Some(allowed) => allowed.contains(field),
            None => true,
        }
    }

    pub fn is_unrestricted(&self) -> bool {
        self.allowed.is_none() && self.restricted.is_empty()
    }

    /// Permitted subset of `columns`, in input order
    pub fn visible<'a, I>(&self, columns: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        columns.into_iter().filter(|c| self.permits(c)).map(str::to_string).collect()
    }

    /// Drop every non-permitted key from an output row
    pub fn filter_row(&self, row: &mut Map<String, Value>) {
        if self.is_unrestricted() {
            return;
        }
        row.retain(|key, _| self.permits(key));
    }

    /// Fields of an input row the caller may not write
    pub fn denied_input_fields(&self, row: &Map<String, Value>) -> Vec<String> {
        row.keys().filter(|k| !self.permits(k)).cloned().collect()
    }
}
