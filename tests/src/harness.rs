//! Scenario harness
//!
//! One clinic = one authoritative store, its change feed and a mock clock
//! fixed at Wednesday 2024-01-03 09:00 UTC. A device is one client with its
//! own identity session.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use tokio::sync::watch;

use carelink_shared::SyncResult;
use carelink_sync::{CareClient, FeedHub, MemoryIdentity, MemoryStore, MockClock, SignUp, SyncConfig};
use carelink_sync_integrity::{Profile, Role};

pub const PASSWORD: &str = "correct horse";

pub struct Clinic {
    pub store: Arc<MemoryStore>,
    pub clock: Arc<MockClock>,
    pub config: SyncConfig,
}

pub struct Device {
    pub client: Arc<CareClient>,
    pub identity: Arc<MemoryIdentity>,
}

impl Default for Clinic {
    fn default() -> Self {
        Clinic::new(SyncConfig::default())
    }
}

impl Clinic {
    pub fn new(config: SyncConfig) -> Self {
        config.init_logging();
        let start = Utc
            .with_ymd_and_hms(2024, 1, 3, 9, 0, 0)
            .single()
            .unwrap_or_default();
        let clock = Arc::new(MockClock::new(start));
        let store = Arc::new(MemoryStore::new(FeedHub::new(config.feed_capacity), clock.clone()));
        Clinic {
            store,
            clock,
            config,
        }
    }

    pub fn device(&self) -> Device {
        let identity = Arc::new(MemoryIdentity::new());
        let client = CareClient::new(
            self.store.clone(),
            Arc::new(self.store.feed().clone()),
            identity.clone(),
            self.clock.clone(),
            self.config.clone(),
        );
        Device {
            client: Arc::new(client),
            identity,
        }
    }

    /// A device signed up as `role`, with its caches active
    pub async fn sign_up(&self, email: &str, name: &str, role: Role) -> SyncResult<(Device, Profile)> {
        let device = self.device();
        let profile = device
            .client
            .signup(SignUp {
                email: email.to_string(),
                password: PASSWORD.to_string(),
                name: name.to_string(),
                role,
            })
            .await?;
        Ok((device, profile))
    }
}

/// Wait until `pred` holds for the watched value; `false` on timeout
pub async fn settle<T, F>(rx: &mut watch::Receiver<T>, pred: F) -> bool
where
    F: FnMut(&T) -> bool,
{
    matches!(
        tokio::time::timeout(Duration::from_secs(2), rx.wait_for(pred)).await,
        Ok(Ok(_))
    )
}

/// Give listener tasks a chance to drain pending deliveries
pub async fn drain() {
    tokio::time::sleep(Duration::from_millis(30)).await;
}
