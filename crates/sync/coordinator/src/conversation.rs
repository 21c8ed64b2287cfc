//! Conversation
//!
//! Message thread of one appointment, visible only to its two parties. The
//! feed subscription is established before the initial load so no message
//! committed in between is lost; the sender's optimistic append and the
//! feed delivery of the same message collapse into one cache entry.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use carelink_shared::{to_row, Collection, RecordId, Row, RowExt, SyncError, SyncResult};
use carelink_sync_integrity::{
    validate_new_message, AppointmentView, MessageMapper, MessageView, NewMessage, RecordMapper,
};

use crate::cache::{InsertPosition, LocalCache, Snapshot};
use crate::feed::{ChangeFeed, Listener};
use crate::reconciler::CollectionSync;
use crate::remote::{Filter, RemoteStore};

pub struct Conversation {
    appointment_id: RecordId,
    me: RecordId,
    other: RecordId,
    store: Arc<dyn RemoteStore>,
    sync: Arc<CollectionSync<MessageMapper>>,
    listener: Listener,
}

impl Conversation {
    /// Subscribe to and load the messages of `appointment` as seen by `me`.
    /// Only a viewer outside the appointment is refused.
    pub async fn open(
        store: Arc<dyn RemoteStore>,
        feed: &dyn ChangeFeed,
        appointment: &AppointmentView,
        me: &RecordId,
    ) -> SyncResult<Self> {
        let other = if *me == appointment.patient_id {
            appointment.practitioner_id.clone()
        } else if *me == appointment.practitioner_id {
            appointment.patient_id.clone()
        } else {
            return Err(SyncError::rejected(format!(
                "{} is not a party to appointment {}",
                me, appointment.id
            )));
        };

        let cache = Arc::new(LocalCache::new("messages", InsertPosition::Append));
        let sync = Arc::new(
            CollectionSync::<MessageMapper>::new(
                store.clone(),
                cache,
                Filter::eq("appointment_id", appointment.id.as_str()),
            )
            .ordered("created_at", true),
        );
        let listener = sync.listen(feed);
        // A failed load leaves the thread empty; the feed still fills it in
        if sync.load().await.is_ok() {
            debug!(appointment = %appointment.id, "conversation opened");
        } else {
            warn!(appointment = %appointment.id, "conversation opened without history");
        }

        Ok(Conversation {
            appointment_id: appointment.id.clone(),
            me: me.clone(),
            other,
            store,
            sync,
            listener,
        })
    }

    pub fn appointment_id(&self) -> &RecordId {
        &self.appointment_id
    }

    pub fn messages(&self) -> Snapshot<MessageView> {
        self.sync.cache().snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot<MessageView>> {
        self.sync.cache().subscribe()
    }

    /// Messages from the other party not yet read
    pub fn unread_count(&self) -> usize {
        self.sync
            .cache()
            .snapshot()
            .iter()
            .filter(|m| m.sender_id != self.me && !m.read)
            .count()
    }

    pub async fn send_message(&self, text: &str) -> SyncResult<MessageView> {
        let payload = NewMessage {
            appointment_id: self.appointment_id.clone(),
            sender_id: self.me.clone(),
            text: text.trim().to_string(),
            read: false,
        };
        validate_new_message(&payload).into_result()?;

        let stored = self
            .store
            .insert(Collection::Messages, to_row(&payload)?)
            .await?;
        let id = stored.record_id(Collection::Messages);
        let view = match self
            .store
            .fetch_one(Collection::Messages, &id, MessageMapper::EXPAND)
            .await
        {
            Ok(row) => MessageMapper::to_view(&row),
            Err(e) => {
                // The write is committed; the feed fills in the sender later
                warn!(id = %id, error = %e, "sent message re-read failed");
                MessageMapper::to_view(&stored)
            }
        };
        self.sync.cache().insert_if_absent(view.clone());
        info!(appointment = %self.appointment_id, id = %id, "message sent");
        Ok(view)
    }

    /// Mark every unread message from the other party as read, returning
    /// how many were updated
    pub async fn mark_as_read(&self) -> SyncResult<usize> {
        let filter = Filter::eq("appointment_id", self.appointment_id.as_str())
            .and("sender_id", self.other.as_str())
            .and("read", false);
        let mut patch = Row::new();
        patch.insert("read".to_string(), Value::Bool(true));

        let updated = self
            .store
            .update(Collection::Messages, patch, &filter)
            .await?;
        for row in &updated {
            if let Some(mut view) = self.sync.cache().get(&row.record_id(Collection::Messages)) {
                view.read = true;
                self.sync.cache().upsert(view);
            }
        }
        if !updated.is_empty() {
            info!(appointment = %self.appointment_id, count = updated.len(), "messages marked read");
        }
        Ok(updated.len())
    }

    /// Stop following the feed; the cached messages stay readable
    pub fn close(&self) {
        self.listener.unsubscribe();
    }

    pub fn is_open(&self) -> bool {
        self.listener.is_active()
    }
}
