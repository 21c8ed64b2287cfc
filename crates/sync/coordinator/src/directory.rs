//! Practitioner Directory
//!
//! Composite cache: one entry per practitioner built from the profile row,
//! the account name, the grouped availability and the review aggregate.
//! Changes to any of the four source collections re-read only the affected
//! practitioner.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use carelink_shared::{Collection, RecordId, Row, RowExt, SyncError, SyncResult};
use carelink_sync_integrity::{
    AvailabilityMapper, DirectoryMapper, FlatSlot, PractitionerProfileMapper, PractitionerView,
    RecordMapper,
};

use crate::cache::LocalCache;
use crate::feed::{ChangeEvent, ChangeFeed, ChangeHandler, Listener};
use crate::reconciler::Reconciled;
use crate::remote::{Filter, Query, RemoteStore};

/// Collections feeding the directory
pub const DIRECTORY_SOURCES: [Collection; 4] = [
    Collection::PractitionerProfiles,
    Collection::AvailabilitySlots,
    Collection::Reviews,
    Collection::Accounts,
];

fn slots_of(rows: &[Row], practitioner_id: &str) -> Vec<FlatSlot> {
    rows.iter()
        .filter(|r| r.text("practitioner_id") == practitioner_id)
        .map(|r| AvailabilityMapper::to_view(r).to_flat())
        .collect()
}

fn ratings_of(rows: &[Row], practitioner_id: &str) -> Vec<u8> {
    rows.iter()
        .filter(|r| r.text("practitioner_id") == practitioner_id)
        .filter_map(|r| r.integer("rating").and_then(|v| u8::try_from(v).ok()))
        .collect()
}

pub struct DirectorySync {
    store: Arc<dyn RemoteStore>,
    cache: Arc<LocalCache<PractitionerView>>,
}

impl DirectorySync {
    pub fn new(store: Arc<dyn RemoteStore>, cache: Arc<LocalCache<PractitionerView>>) -> Self {
        DirectorySync { store, cache }
    }

    pub fn cache(&self) -> &Arc<LocalCache<PractitionerView>> {
        &self.cache
    }

    async fn fetch_all(&self) -> SyncResult<Vec<PractitionerView>> {
        let profiles = self
            .store
            .fetch(&Query::new(Collection::PractitionerProfiles).expand(PractitionerProfileMapper::EXPAND))
            .await?;
        let slots = self.store.fetch(&Query::new(Collection::AvailabilitySlots)).await?;
        let reviews = self.store.fetch(&Query::new(Collection::Reviews)).await?;

        Ok(profiles
            .iter()
            .map(|profile| {
                let id = profile.text("user_id");
                DirectoryMapper::compose(profile, &slots_of(&slots, &id), &ratings_of(&reviews, &id))
            })
            .collect())
    }

    /// Full rebuild. On failure the cache is left empty.
    pub async fn load(&self) -> SyncResult<usize> {
        match self.fetch_all().await {
            Ok(views) => {
                let len = views.len();
                self.cache.replace_all(views);
                info!(len, "practitioner directory loaded");
                Ok(len)
            }
            Err(e) => {
                self.cache.clear();
                warn!(error = %e, "practitioner directory load failed");
                Err(e)
            }
        }
    }

    /// Rebuild one entry; removes it when the profile no longer exists
    pub async fn refresh_practitioner(&self, id: &RecordId) -> SyncResult<Reconciled> {
        let profile = match self
            .store
            .fetch_one(Collection::PractitionerProfiles, id, PractitionerProfileMapper::EXPAND)
            .await
        {
            Ok(profile) => profile,
            Err(SyncError::MissingRow { .. }) => {
                return Ok(if self.cache.remove(id) {
                    Reconciled::Removed
                } else {
                    Reconciled::Unchanged
                });
            }
            Err(e) => return Err(e),
        };

        let by_practitioner = Filter::eq("practitioner_id", id.as_str());
        let slots = self
            .store
            .fetch(&Query::new(Collection::AvailabilitySlots).filter(by_practitioner.clone()))
            .await?;
        let reviews = self
            .store
            .fetch(&Query::new(Collection::Reviews).filter(by_practitioner))
            .await?;

        let view = DirectoryMapper::compose(
            &profile,
            &slots_of(&slots, id.as_str()),
            &ratings_of(&reviews, id.as_str()),
        );
        Ok(self.cache.upsert(view).into())
    }

    /// Practitioner whose entry an event affects, if any
    pub fn practitioner_of(&self, event: &ChangeEvent) -> Option<RecordId> {
        let image = event.new_values.as_ref().or(event.old_values.as_ref());
        match event.collection {
            Collection::PractitionerProfiles => Some(event.record_id.clone()),
            Collection::AvailabilitySlots | Collection::Reviews => image
                .and_then(|row| row.opt_text("practitioner_id"))
                .map(RecordId::new),
            // Only the display name is taken from accounts
            Collection::Accounts if self.cache.contains(&event.record_id) => {
                Some(event.record_id.clone())
            }
            _ => None,
        }
    }

    pub fn listen(self: &Arc<Self>, feed: &dyn ChangeFeed) -> Vec<Listener> {
        DIRECTORY_SOURCES
            .iter()
            .map(|collection| {
                Listener::spawn(feed.subscribe(*collection, Filter::all()), self.clone())
            })
            .collect()
    }
}

#[async_trait]
impl ChangeHandler for DirectorySync {
    async fn on_change(&self, event: ChangeEvent) {
        let Some(id) = self.practitioner_of(&event) else {
            return;
        };
        match self.refresh_practitioner(&id).await {
            Ok(outcome) => debug!(practitioner = %id, ?outcome, "directory entry reconciled"),
            Err(e) => warn!(practitioner = %id, error = %e, "directory entry refresh failed"),
        }
    }

    async fn on_lagged(&self, missed: u64) {
        info!(missed, "rebuilding practitioner directory after lag");
        let _ = self.load().await;
    }
}
