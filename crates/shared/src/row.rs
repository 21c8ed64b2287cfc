//! Storage row access
//!
//! Rows travel between the authoritative store and the mappers as JSON
//! objects with snake_case columns. Accessors here never fail: absent, null
//! or mistyped columns read as the type's empty value.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::collection::{Collection, RecordId};
use crate::error::{SyncError, SyncResult};

/// A storage row: column name to JSON value
pub type Row = Map<String, Value>;

/// Best-effort, infallible column readers
pub trait RowExt {
    /// Column as text; numbers and booleans are rendered, anything else is empty
    fn text(&self, column: &str) -> String;

    /// Column as text, `None` when absent, null or empty
    fn opt_text(&self, column: &str) -> Option<String>;

    fn flag(&self, column: &str) -> bool;

    fn integer(&self, column: &str) -> Option<i64>;

    /// Array column of strings; non-string elements are skipped
    fn text_list(&self, column: &str) -> Vec<String>;

    /// Inlined related row produced by relation expansion
    fn relation(&self, alias: &str) -> Option<&Row>;

    /// Identity of this row within `collection`
    fn record_id(&self, collection: Collection) -> RecordId;
}

impl RowExt for Row {
    fn text(&self, column: &str) -> String {
        match self.get(column) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::Bool(b)) => b.to_string(),
            _ => String::new(),
        }
    }

    fn opt_text(&self, column: &str) -> Option<String> {
        let value = self.text(column);
        if value.is_empty() {
            None
        } else {
            Some(value)
        }
    }

    fn flag(&self, column: &str) -> bool {
        match self.get(column) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s == "true",
            _ => false,
        }
    }

    fn integer(&self, column: &str) -> Option<i64> {
        match self.get(column) {
            Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Some(Value::String(s)) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn text_list(&self, column: &str) -> Vec<String> {
        match self.get(column) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        }
    }

    fn relation(&self, alias: &str) -> Option<&Row> {
        self.get(alias).and_then(Value::as_object)
    }

    fn record_id(&self, collection: Collection) -> RecordId {
        RecordId::new(self.text(collection.key_column()))
    }
}

/// Whether a column value counts as missing for required-column checks
pub fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        _ => false,
    }
}

/// Serialize a typed payload into a storage row
pub fn to_row<T: Serialize>(payload: &T) -> SyncResult<Row> {
    match serde_json::to_value(payload)? {
        Value::Object(map) => Ok(map),
        other => Err(SyncError::rejected(format!(
            "payload must serialize to an object, got {}",
            other
        ))),
    }
}
