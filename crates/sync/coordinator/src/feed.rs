//! Change Feed
//!
//! Push notifications of committed writes. Delivery is at-least-once:
//! events may be re-published and handlers must be idempotent. Events for
//! one record arrive in commit order; no order is promised across records.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use carelink_shared::{Collection, RecordId, Row};

use crate::remote::Filter;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// One committed write as seen by subscribers
#[derive(Clone, Debug, PartialEq)]
pub struct ChangeEvent {
    pub collection: Collection,
    pub kind: ChangeKind,
    pub record_id: RecordId,
    pub new_values: Option<Row>,
    pub old_values: Option<Row>,
}

impl ChangeEvent {
    /// Matches when either image of the row passes `filter`, so a row
    /// moving out of a filter still reaches its old subscribers
    pub fn matches(&self, filter: &Filter) -> bool {
        self.new_values.as_ref().is_some_and(|r| filter.matches(r))
            || self.old_values.as_ref().is_some_and(|r| filter.matches(r))
    }
}

/// What a subscription yields next
#[derive(Debug)]
pub enum Delivery {
    Event(ChangeEvent),
    /// The receiver fell behind and `n` events were dropped
    Lagged(u64),
    Closed,
}

/// Filtered stream of change events for one collection
pub struct Subscription {
    collection: Collection,
    filter: Filter,
    receiver: broadcast::Receiver<ChangeEvent>,
}

impl Subscription {
    pub fn collection(&self) -> Collection {
        self.collection
    }

    pub async fn next(&mut self) -> Delivery {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if event.collection == self.collection && event.matches(&self.filter) {
                        return Delivery::Event(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => return Delivery::Lagged(n),
                Err(broadcast::error::RecvError::Closed) => return Delivery::Closed,
            }
        }
    }
}

pub trait ChangeFeed: Send + Sync + 'static {
    fn subscribe(&self, collection: Collection, filter: Filter) -> Subscription;
}

// ============================================================================
// Broadcast Hub
// ============================================================================

/// In-process change feed backed by a broadcast channel
#[derive(Clone)]
pub struct FeedHub {
    sender: broadcast::Sender<ChangeEvent>,
}

impl FeedHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        FeedHub { sender }
    }

    /// Publish an event, returning how many subscriptions received it.
    /// Also used to re-deliver an event that was already published.
    pub fn publish(&self, event: ChangeEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl ChangeFeed for FeedHub {
    fn subscribe(&self, collection: Collection, filter: Filter) -> Subscription {
        Subscription {
            collection,
            filter,
            receiver: self.sender.subscribe(),
        }
    }
}

// ============================================================================
// Listener
// ============================================================================

#[async_trait]
pub trait ChangeHandler: Send + Sync + 'static {
    async fn on_change(&self, event: ChangeEvent);

    /// Events were dropped; the handler should resynchronize from the store
    async fn on_lagged(&self, _missed: u64) {}
}

/// Drives a [`ChangeHandler`] from a subscription on a background task
pub struct Listener {
    collection: Collection,
    stop: watch::Sender<bool>,
    processed: watch::Receiver<u64>,
    task: JoinHandle<()>,
}

impl Listener {
    /// Must be called from within a tokio runtime
    pub fn spawn(mut subscription: Subscription, handler: Arc<dyn ChangeHandler>) -> Self {
        let collection = subscription.collection();
        let (stop, mut stop_rx) = watch::channel(false);
        let (processed_tx, processed) = watch::channel(0u64);

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                    delivery = subscription.next() => {
                        // Handlers run to completion even if stop arrives meanwhile
                        match delivery {
                            Delivery::Event(event) => handler.on_change(event).await,
                            Delivery::Lagged(missed) => {
                                warn!(collection = %collection, missed, "change feed lagged");
                                handler.on_lagged(missed).await;
                            }
                            Delivery::Closed => break,
                        }
                        processed_tx.send_modify(|n| *n += 1);
                    }
                }
            }
            debug!(collection = %collection, "listener stopped");
        });

        Listener {
            collection,
            stop,
            processed,
            task,
        }
    }

    pub fn collection(&self) -> Collection {
        self.collection
    }

    /// Stop further delivery. Idempotent.
    pub fn unsubscribe(&self) {
        self.stop.send_replace(true);
    }

    pub fn is_active(&self) -> bool {
        !*self.stop.borrow() && !self.task.is_finished()
    }

    /// Number of deliveries handled so far
    pub fn processed(&self) -> watch::Receiver<u64> {
        self.processed.clone()
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
