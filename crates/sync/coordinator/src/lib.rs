//! CareLink Sync Coordinator
//!
//! Keeps observable local caches consistent with the authoritative store:
//! - Remote data source trait and the in-process authoritative store
//! - Change feed subscriptions and listeners
//! - Local caches and idempotent reconciliation
//! - Session state and self-healing profile loads
//! - Conversations, the practitioner directory and the client entry points
//!
//! Domain shapes, mappers and validation live in `carelink_sync_integrity`.

pub mod cache;
pub mod client;
pub mod clock;
pub mod config;
pub mod conversation;
pub mod directory;
pub mod feed;
pub mod identity;
pub mod memory_store;
pub mod reconciler;
pub mod remote;
pub mod session;

pub use cache::{InsertPosition, LocalCache, Snapshot, Upsert};
pub use client::{AppointmentChanges, AppointmentRequest, CareClient, PrescriptionRequest, Viewer};
pub use clock::{Clock, MockClock, SystemClock};
pub use config::SyncConfig;
pub use conversation::Conversation;
pub use directory::DirectorySync;
pub use feed::{ChangeEvent, ChangeFeed, ChangeHandler, ChangeKind, Delivery, FeedHub, Listener, Subscription};
pub use identity::{AuthEvent, AuthSession, IdentityProvider, MemoryIdentity};
pub use memory_store::{MemoryStore, StoreOp};
pub use reconciler::{CollectionSync, Reconciled};
pub use remote::{Filter, Order, Query, RemoteStore};
pub use session::{
    AuthListener, LoadFailure, PractitionerProfilePatch, ProfileLoad, ProfileUpdate, ProfileWatcher,
    ReloadOutcome, ReloadTrigger, RepairOutcome, SessionEngine, SessionFlow, SessionState, SignUp,
};
