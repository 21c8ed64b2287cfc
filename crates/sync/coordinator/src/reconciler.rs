//! Reconciler
//!
//! Keeps one [`LocalCache`] consistent with the authoritative store:
//! - `load` replaces the cache with a full, mapped fetch
//! - `apply` folds one change event into the cache
//!
//! Applying the same event twice leaves the cache exactly as applying it
//! once. Rows that disappear or leave the visibility filter are removed, so
//! the cache never holds more than the viewer may see.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use carelink_shared::{FailureKind, RecordId, Row, SyncError, SyncResult};
use carelink_sync_integrity::RecordMapper;

use crate::cache::{LocalCache, Upsert};
use crate::feed::{ChangeEvent, ChangeFeed, ChangeHandler, ChangeKind, Listener};
use crate::remote::{Filter, Order, Query, RemoteStore};

/// Effect of reconciling one record
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reconciled {
    Inserted,
    Replaced,
    Removed,
    Unchanged,
}

impl From<Upsert> for Reconciled {
    fn from(upsert: Upsert) -> Self {
        match upsert {
            Upsert::Inserted => Reconciled::Inserted,
            Upsert::Replaced => Reconciled::Replaced,
            Upsert::Unchanged => Reconciled::Unchanged,
        }
    }
}

pub struct CollectionSync<M: RecordMapper> {
    store: Arc<dyn RemoteStore>,
    cache: Arc<LocalCache<M::View>>,
    visibility: Filter,
    order: Option<Order>,
    _mapper: PhantomData<fn() -> M>,
}

impl<M: RecordMapper> CollectionSync<M> {
    pub fn new(store: Arc<dyn RemoteStore>, cache: Arc<LocalCache<M::View>>, visibility: Filter) -> Self {
        CollectionSync {
            store,
            cache,
            visibility,
            order: None,
            _mapper: PhantomData,
        }
    }

    /// Ordering applied on full loads
    pub fn ordered(mut self, column: &'static str, ascending: bool) -> Self {
        self.order = Some(Order { column, ascending });
        self
    }

    pub fn cache(&self) -> &Arc<LocalCache<M::View>> {
        &self.cache
    }

    pub fn visibility(&self) -> &Filter {
        &self.visibility
    }

    fn query(&self) -> Query {
        let mut query = Query::new(M::COLLECTION)
            .filter(self.visibility.clone())
            .expand(M::EXPAND);
        query.order = self.order;
        query
    }

    /// Full fetch into the cache. On failure the cache is left empty.
    pub async fn load(&self) -> SyncResult<usize> {
        match self.store.fetch(&self.query()).await {
            Ok(rows) => {
                let views: Vec<M::View> = rows.iter().map(M::to_view).collect();
                let len = views.len();
                self.cache.replace_all(views);
                info!(collection = %M::COLLECTION, len, "cache loaded");
                Ok(len)
            }
            Err(e) => {
                self.cache.clear();
                warn!(collection = %M::COLLECTION, error = %e, "initial load failed");
                Err(e)
            }
        }
    }

    fn accept(&self, row: &Row) -> Reconciled {
        self.cache.upsert(M::to_view(row)).into()
    }

    fn evict(&self, id: &RecordId) -> Reconciled {
        if self.cache.remove(id) {
            Reconciled::Removed
        } else {
            Reconciled::Unchanged
        }
    }

    /// Re-read one record with its expansions and fold it into the cache
    pub async fn refresh(&self, id: &RecordId) -> SyncResult<Reconciled> {
        match self.store.fetch_one(M::COLLECTION, id, M::EXPAND).await {
            Ok(row) if self.visibility.matches(&row) => Ok(self.accept(&row)),
            Ok(_) => Ok(self.evict(id)),
            Err(SyncError::MissingRow { .. }) => Ok(self.evict(id)),
            Err(e) => Err(e),
        }
    }

    pub async fn apply(&self, event: &ChangeEvent) -> SyncResult<Reconciled> {
        if event.collection != M::COLLECTION {
            return Ok(Reconciled::Unchanged);
        }
        match event.kind {
            ChangeKind::Delete => Ok(self.evict(&event.record_id)),
            ChangeKind::Insert | ChangeKind::Update => {
                if !M::EXPAND.is_empty() {
                    return self.refresh(&event.record_id).await;
                }
                match &event.new_values {
                    Some(row) if self.visibility.matches(row) => Ok(self.accept(row)),
                    Some(_) => Ok(self.evict(&event.record_id)),
                    None => Ok(Reconciled::Unchanged),
                }
            }
        }
    }

    /// Subscribe to this collection's feed, scoped to the visibility filter
    pub fn listen(self: &Arc<Self>, feed: &dyn ChangeFeed) -> Listener {
        let subscription = feed.subscribe(M::COLLECTION, self.visibility.clone());
        Listener::spawn(subscription, self.clone())
    }
}

#[async_trait]
impl<M: RecordMapper> ChangeHandler for CollectionSync<M> {
    async fn on_change(&self, event: ChangeEvent) {
        match self.apply(&event).await {
            Ok(outcome) => {
                debug!(collection = %M::COLLECTION, id = %event.record_id, ?outcome, "reconciled");
            }
            Err(e) if e.kind() == FailureKind::Unclassified => {
                error!(collection = %M::COLLECTION, id = %event.record_id, error = %e, "reconcile failed");
            }
            Err(e) => {
                warn!(collection = %M::COLLECTION, id = %event.record_id, error = %e, "reconcile failed");
            }
        }
    }

    async fn on_lagged(&self, missed: u64) {
        info!(collection = %M::COLLECTION, missed, "resyncing after lag");
        let _ = self.load().await;
    }
}
