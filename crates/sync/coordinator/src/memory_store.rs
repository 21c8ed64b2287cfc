//! In-process authoritative store
//!
//! Holds every collection as an insertion-ordered row list and enforces the
//! column constraints declared on [`Collection`]: required columns, unique
//! columns and foreign keys. Each committed write is published to the
//! store's [`FeedHub`] while the state lock is held, so feed order equals
//! commit order.
//!
//! Deleting a row also deletes the rows that reference it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::SecondsFormat;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, error};

use carelink_shared::{
    is_blank, Collection, FailureKind, RecordId, Relation, Row, RowExt, SyncError, SyncResult,
};

use crate::clock::Clock;
use crate::feed::{ChangeEvent, ChangeKind, FeedHub};
use crate::remote::{Filter, Query, RemoteStore};

/// Store operation, for fault injection
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Fetch,
    FetchOne,
    Insert,
    Update,
    Delete,
}

#[derive(Clone, Debug)]
enum FaultAction {
    Fail(SyncError),
    Delay(Duration),
}

#[derive(Clone, Debug)]
struct Fault {
    collection: Collection,
    op: StoreOp,
    action: FaultAction,
}

#[derive(Default)]
struct StoreState {
    tables: HashMap<Collection, Vec<Row>>,
    faults: Vec<Fault>,
}

impl StoreState {
    fn rows(&self, collection: Collection) -> &[Row] {
        self.tables.get(&collection).map(Vec::as_slice).unwrap_or(&[])
    }

    fn rows_mut(&mut self, collection: Collection) -> &mut Vec<Row> {
        self.tables.entry(collection).or_default()
    }

    fn take_fault(&mut self, collection: Collection, op: StoreOp) -> Option<FaultAction> {
        let position = self
            .faults
            .iter()
            .position(|f| f.collection == collection && f.op == op)?;
        Some(self.faults.remove(position).action)
    }

    fn find_by_key(&self, collection: Collection, key: &str) -> Option<&Row> {
        let column = collection.key_column();
        self.rows(collection).iter().find(|r| r.text(column) == key)
    }

    fn expand(&self, row: &Row, relations: &[Relation]) -> Row {
        let mut expanded = row.clone();
        for relation in relations {
            let key = row.text(relation.foreign_key);
            let inlined = self
                .find_by_key(relation.target, &key)
                .map(|target| {
                    let mut projected = Row::new();
                    for column in relation.columns {
                        if let Some(value) = target.get(*column) {
                            projected.insert(column.to_string(), value.clone());
                        }
                    }
                    Value::Object(projected)
                })
                .unwrap_or(Value::Null);
            expanded.insert(relation.alias.to_string(), inlined);
        }
        expanded
    }

    /// Required, unique and foreign-key checks for `row` as it would be
    /// stored; `skip` is the index of the row being replaced on update
    fn check_constraints(
        &self,
        collection: Collection,
        row: &Row,
        skip: Option<usize>,
    ) -> SyncResult<()> {
        for column in collection.required_columns() {
            if is_blank(row.get(*column)) {
                return Err(SyncError::rejected(format!(
                    "{} requires column {}",
                    collection, column
                )));
            }
        }

        for column in collection.unique_columns() {
            if is_blank(row.get(*column)) {
                continue;
            }
            let value = row.text(column);
            let clash = self
                .rows(collection)
                .iter()
                .enumerate()
                .any(|(i, other)| Some(i) != skip && other.text(column) == value);
            if clash {
                return Err(SyncError::conflict(
                    collection,
                    format!("{} = {}", column, value),
                ));
            }
        }

        for fk in collection.foreign_keys() {
            if is_blank(row.get(fk.column)) {
                continue;
            }
            let value = row.text(fk.column);
            if self.find_by_key(fk.target, &value).is_none() {
                return Err(SyncError::rejected(format!(
                    "{}.{} references missing {} row {}",
                    collection, fk.column, fk.target, value
                )));
            }
        }
        Ok(())
    }

    /// Rows of other collections whose foreign key points at `key` in `target`
    fn dependents(&self, target: Collection, key: &str) -> Vec<(Collection, RecordId)> {
        let mut found = Vec::new();
        for collection in Collection::ALL {
            for fk in collection.foreign_keys() {
                if fk.target != target {
                    continue;
                }
                for row in self.rows(collection) {
                    if row.text(fk.column) == key {
                        found.push((collection, row.record_id(collection)));
                    }
                }
            }
        }
        found
    }
}

pub struct MemoryStore {
    state: Mutex<StoreState>,
    feed: FeedHub,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    pub fn new(feed: FeedHub, clock: Arc<dyn Clock>) -> Self {
        MemoryStore {
            state: Mutex::new(StoreState::default()),
            feed,
            clock,
        }
    }

    pub fn feed(&self) -> &FeedHub {
        &self.feed
    }

    /// Fail the next `op` on `collection` with `error`
    pub async fn fail_next(&self, collection: Collection, op: StoreOp, error: SyncError) {
        self.state.lock().await.faults.push(Fault {
            collection,
            op,
            action: FaultAction::Fail(error),
        });
    }

    /// Delay the next `op` on `collection` before it touches any state
    pub async fn delay_next(&self, collection: Collection, op: StoreOp, delay: Duration) {
        self.state.lock().await.faults.push(Fault {
            collection,
            op,
            action: FaultAction::Delay(delay),
        });
    }

    /// Raw stored rows, without expansion
    pub async fn rows(&self, collection: Collection) -> Vec<Row> {
        self.state.lock().await.rows(collection).to_vec()
    }

    pub async fn count(&self, collection: Collection, filter: &Filter) -> usize {
        self.state
            .lock()
            .await
            .rows(collection)
            .iter()
            .filter(|r| filter.matches(r))
            .count()
    }

    async fn inject(&self, collection: Collection, op: StoreOp) -> SyncResult<()> {
        let fault = self.state.lock().await.take_fault(collection, op);
        match fault {
            Some(FaultAction::Fail(error)) => {
                debug!(collection = %collection, ?op, %error, "injected failure");
                Err(error)
            }
            Some(FaultAction::Delay(delay)) => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn timestamp(&self) -> String {
        self.clock.now().to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    fn publish(&self, collection: Collection, kind: ChangeKind, new: Option<&Row>, old: Option<&Row>) {
        let record_id = new
            .or(old)
            .map(|r| r.record_id(collection))
            .unwrap_or_default();
        self.feed.publish(ChangeEvent {
            collection,
            kind,
            record_id,
            new_values: new.cloned(),
            old_values: old.cloned(),
        });
    }

    fn delete_locked(
        &self,
        state: &mut StoreState,
        collection: Collection,
        filter: &Filter,
    ) -> Vec<Row> {
        let key_column = collection.key_column();
        let doomed: Vec<String> = state
            .rows(collection)
            .iter()
            .filter(|r| filter.matches(r))
            .map(|r| r.text(key_column))
            .collect();

        let mut removed = Vec::new();
        for key in doomed {
            for (dependent, id) in state.dependents(collection, &key) {
                self.delete_locked(state, dependent, &Filter::by_key(dependent, &id));
            }
            let rows = state.rows_mut(collection);
            if let Some(index) = rows.iter().position(|r| r.text(key_column) == key) {
                let row = rows.remove(index);
                self.publish(collection, ChangeKind::Delete, None, Some(&row));
                removed.push(row);
            }
        }
        removed
    }
}

fn log_failure(collection: Collection, op: StoreOp, e: &SyncError) {
    if e.kind() == FailureKind::Unclassified {
        error!(collection = %collection, ?op, error = %e, "store operation failed");
    } else {
        debug!(collection = %collection, ?op, error = %e, "store operation rejected");
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn fetch(&self, query: &Query) -> SyncResult<Vec<Row>> {
        self.inject(query.collection, StoreOp::Fetch).await?;
        let state = self.state.lock().await;
        let mut rows: Vec<Row> = state
            .rows(query.collection)
            .iter()
            .filter(|r| query.filter.matches(r))
            .map(|r| state.expand(r, query.expand))
            .collect();
        if let Some(order) = query.order {
            rows.sort_by(|a, b| {
                let ordering = a.text(order.column).cmp(&b.text(order.column));
                if order.ascending {
                    ordering
                } else {
                    ordering.reverse()
                }
            });
        }
        Ok(rows)
    }

    async fn fetch_one(
        &self,
        collection: Collection,
        id: &RecordId,
        expand: &'static [Relation],
    ) -> SyncResult<Row> {
        self.inject(collection, StoreOp::FetchOne).await?;
        let state = self.state.lock().await;
        state
            .find_by_key(collection, id.as_str())
            .map(|row| state.expand(row, expand))
            .ok_or_else(|| SyncError::missing(collection, id.as_str()))
    }

    async fn insert(&self, collection: Collection, mut row: Row) -> SyncResult<Row> {
        self.inject(collection, StoreOp::Insert).await?;
        if collection.key_column() == "id" && is_blank(row.get("id")) {
            row.insert(
                "id".to_string(),
                Value::String(uuid::Uuid::new_v4().to_string()),
            );
        }
        if is_blank(row.get("created_at")) {
            row.insert("created_at".to_string(), Value::String(self.timestamp()));
        }

        let mut state = self.state.lock().await;
        if let Err(e) = state.check_constraints(collection, &row, None) {
            log_failure(collection, StoreOp::Insert, &e);
            return Err(e);
        }
        state.rows_mut(collection).push(row.clone());
        self.publish(collection, ChangeKind::Insert, Some(&row), None);
        debug!(collection = %collection, id = %row.record_id(collection), "row inserted");
        Ok(row)
    }

    async fn update(
        &self,
        collection: Collection,
        patch: Row,
        filter: &Filter,
    ) -> SyncResult<Vec<Row>> {
        self.inject(collection, StoreOp::Update).await?;
        let key_column = collection.key_column();
        let mut state = self.state.lock().await;

        let mut staged: Vec<(usize, Row, Row)> = Vec::new();
        for (index, current) in state.rows(collection).iter().enumerate() {
            if !filter.matches(current) {
                continue;
            }
            let mut next = current.clone();
            for (column, value) in &patch {
                next.insert(column.clone(), value.clone());
            }
            if next.text(key_column) != current.text(key_column) {
                return Err(SyncError::rejected(format!(
                    "{}.{} cannot be changed",
                    collection, key_column
                )));
            }
            staged.push((index, current.clone(), next));
        }

        for (index, _, next) in &staged {
            if let Err(e) = state.check_constraints(collection, next, Some(*index)) {
                log_failure(collection, StoreOp::Update, &e);
                return Err(e);
            }
        }

        let mut updated = Vec::with_capacity(staged.len());
        for (index, old, next) in staged {
            state.rows_mut(collection)[index] = next.clone();
            self.publish(collection, ChangeKind::Update, Some(&next), Some(&old));
            updated.push(next);
        }
        debug!(collection = %collection, rows = updated.len(), "rows updated");
        Ok(updated)
    }

    async fn delete(&self, collection: Collection, filter: &Filter) -> SyncResult<Vec<Row>> {
        self.inject(collection, StoreOp::Delete).await?;
        let mut state = self.state.lock().await;
        let removed = self.delete_locked(&mut state, collection, filter);
        debug!(collection = %collection, rows = removed.len(), "rows deleted");
        Ok(removed)
    }
}
