//! Remote Data Source
//!
//! Async read/write surface of the authoritative store. Every failure comes
//! back as a classified [`SyncError`](carelink_shared::SyncError) value.

use async_trait::async_trait;
use serde_json::Value;

use carelink_shared::{Collection, RecordId, Relation, Row, RowExt, SyncResult};

// ============================================================================
// Filters and Queries
// ============================================================================

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    }
}

/// Conjunction of column equality predicates; empty matches every row
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Filter {
    clauses: Vec<(String, Value)>,
}

impl Filter {
    pub fn all() -> Self {
        Filter::default()
    }

    pub fn eq(column: &str, value: impl Into<Value>) -> Self {
        Filter::all().and(column, value)
    }

    pub fn and(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.clauses.push((column.to_string(), value.into()));
        self
    }

    /// Rows of `collection` whose key column equals `id`
    pub fn by_key(collection: Collection, id: &RecordId) -> Self {
        Filter::eq(collection.key_column(), id.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn clauses(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.clauses.iter().map(|(c, v)| (c.as_str(), v))
    }

    /// Values compare by their text rendering, so `17` matches `"17"`
    pub fn matches(&self, row: &Row) -> bool {
        self.clauses
            .iter()
            .all(|(column, value)| row.text(column) == value_text(value))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Order {
    pub column: &'static str,
    pub ascending: bool,
}

/// A collection read: filter, relation expansion and optional ordering
#[derive(Clone, Debug, PartialEq)]
pub struct Query {
    pub collection: Collection,
    pub filter: Filter,
    pub expand: &'static [Relation],
    pub order: Option<Order>,
}

impl Query {
    pub fn new(collection: Collection) -> Self {
        Query {
            collection,
            filter: Filter::all(),
            expand: &[],
            order: None,
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub fn expand(mut self, relations: &'static [Relation]) -> Self {
        self.expand = relations;
        self
    }

    pub fn order_by(mut self, column: &'static str, ascending: bool) -> Self {
        self.order = Some(Order { column, ascending });
        self
    }
}

// ============================================================================
// Store Trait
// ============================================================================

#[async_trait]
pub trait RemoteStore: Send + Sync + 'static {
    async fn fetch(&self, query: &Query) -> SyncResult<Vec<Row>>;

    /// Single row by key; `MissingRow` when absent
    async fn fetch_one(
        &self,
        collection: Collection,
        id: &RecordId,
        expand: &'static [Relation],
    ) -> SyncResult<Row>;

    /// Insert one row; the store assigns `id` and `created_at` when absent
    async fn insert(&self, collection: Collection, row: Row) -> SyncResult<Row>;

    /// Apply `patch` to every matching row, returning the updated rows
    async fn update(&self, collection: Collection, patch: Row, filter: &Filter)
        -> SyncResult<Vec<Row>>;

    /// Delete every matching row, returning the removed rows
    async fn delete(&self, collection: Collection, filter: &Filter) -> SyncResult<Vec<Row>>;
}
