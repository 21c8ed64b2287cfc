//! Local Cache
//!
//! Observable, id-addressed list of view records for one collection. The
//! contents are published through a `watch` channel so the interface layer
//! always sees a complete snapshot; readers never observe a half-applied
//! mutation.
//!
//! Only the methods here mutate a cache: `replace_all`, `upsert`,
//! `insert_if_absent`, `remove` and `clear`.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::watch;
use tracing::trace;

use carelink_shared::{RecordId, SyncResult};
use carelink_sync_integrity::CacheRecord;

/// Where a record not yet cached is placed
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum InsertPosition {
    #[default]
    Append,
    /// Newest first
    Prepend,
}

/// Effect of an [`LocalCache::upsert`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Upsert {
    Inserted,
    Replaced,
    Unchanged,
}

pub type Snapshot<V> = Arc<Vec<V>>;

pub struct LocalCache<V> {
    name: &'static str,
    position: InsertPosition,
    tx: watch::Sender<Snapshot<V>>,
}

impl<V> LocalCache<V>
where
    V: CacheRecord + Clone + PartialEq + Send + Sync + 'static,
{
    pub fn new(name: &'static str, position: InsertPosition) -> Self {
        let (tx, _) = watch::channel(Arc::new(Vec::new()));
        LocalCache { name, position, tx }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn snapshot(&self) -> Snapshot<V> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot<V>> {
        self.tx.subscribe()
    }

    pub fn get(&self, id: &RecordId) -> Option<V> {
        self.tx.borrow().iter().find(|v| v.record_id() == id).cloned()
    }

    pub fn contains(&self, id: &RecordId) -> bool {
        self.tx.borrow().iter().any(|v| v.record_id() == id)
    }

    pub fn len(&self) -> usize {
        self.tx.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.borrow().is_empty()
    }

    /// Replace the whole content. Later duplicates of an id are dropped.
    pub fn replace_all(&self, items: Vec<V>) {
        let mut unique: Vec<V> = Vec::with_capacity(items.len());
        for item in items {
            if !unique.iter().any(|u| u.record_id() == item.record_id()) {
                unique.push(item);
            }
        }
        trace!(cache = self.name, len = unique.len(), "replace_all");
        self.tx.send_replace(Arc::new(unique));
    }

    /// Replace in place when the id is cached, otherwise insert at the
    /// cache's position
    pub fn upsert(&self, item: V) -> Upsert {
        let mut outcome = Upsert::Unchanged;
        let position = self.position;
        self.tx.send_if_modified(|snapshot| {
            match snapshot.iter().position(|v| v.record_id() == item.record_id()) {
                Some(index) if snapshot[index] == item => false,
                Some(index) => {
                    Arc::make_mut(snapshot)[index] = item.clone();
                    outcome = Upsert::Replaced;
                    true
                }
                None => {
                    let items = Arc::make_mut(snapshot);
                    match position {
                        InsertPosition::Append => items.push(item.clone()),
                        InsertPosition::Prepend => items.insert(0, item.clone()),
                    }
                    outcome = Upsert::Inserted;
                    true
                }
            }
        });
        trace!(cache = self.name, id = %item.record_id(), ?outcome, "upsert");
        outcome
    }

    /// Insert only when the id is not cached yet; returns whether it was
    pub fn insert_if_absent(&self, item: V) -> bool {
        let position = self.position;
        self.tx.send_if_modified(|snapshot| {
            if snapshot.iter().any(|v| v.record_id() == item.record_id()) {
                return false;
            }
            let items = Arc::make_mut(snapshot);
            match position {
                InsertPosition::Append => items.push(item.clone()),
                InsertPosition::Prepend => items.insert(0, item.clone()),
            }
            true
        })
    }

    /// Remove by id; `false` when the id was not cached
    pub fn remove(&self, id: &RecordId) -> bool {
        self.tx.send_if_modified(|snapshot| {
            match snapshot.iter().position(|v| v.record_id() == id) {
                Some(index) => {
                    Arc::make_mut(snapshot).remove(index);
                    true
                }
                None => false,
            }
        })
    }

    pub fn clear(&self) {
        self.tx.send_if_modified(|snapshot| {
            if snapshot.is_empty() {
                return false;
            }
            *snapshot = Arc::new(Vec::new());
            true
        });
    }
}

impl<V> LocalCache<V>
where
    V: CacheRecord + Clone + PartialEq + Send + Sync + Serialize + DeserializeOwned + 'static,
{
    pub fn to_snapshot_json(&self) -> SyncResult<String> {
        Ok(serde_json::to_string(self.snapshot().as_ref())?)
    }

    /// Replace the content from a snapshot, returning the restored length
    pub fn restore_snapshot_json(&self, raw: &str) -> SyncResult<usize> {
        let items: Vec<V> = serde_json::from_str(raw)?;
        self.replace_all(items);
        Ok(self.len())
    }
}
