//! Identity subsystem
//!
//! Credentials and sessions live outside the authoritative store. An
//! identity can exist without its account row; the session engine repairs
//! that case.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex};
use tracing::info;

use carelink_shared::{Collection, RecordId, SyncError, SyncResult};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSession {
    pub session_id: String,
    pub user_id: RecordId,
    pub email: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthEvent {
    SignedIn(AuthSession),
    SignedOut,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync + 'static {
    /// Create an identity and sign it in. `UniqueConflict` if the email is taken.
    async fn sign_up(&self, email: &str, password: &str) -> SyncResult<AuthSession>;

    async fn sign_in(&self, email: &str, password: &str) -> SyncResult<AuthSession>;

    async fn sign_out(&self) -> SyncResult<()>;

    async fn current_session(&self) -> Option<AuthSession>;

    fn events(&self) -> broadcast::Receiver<AuthEvent>;
}

struct Credential {
    user_id: RecordId,
    password: String,
}

#[derive(Default)]
struct IdentityState {
    credentials: HashMap<String, Credential>,
    current: Option<AuthSession>,
}

/// In-process identity provider
pub struct MemoryIdentity {
    state: Mutex<IdentityState>,
    events: broadcast::Sender<AuthEvent>,
}

impl Default for MemoryIdentity {
    fn default() -> Self {
        MemoryIdentity::new()
    }
}

impl MemoryIdentity {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(32);
        MemoryIdentity {
            state: Mutex::new(IdentityState::default()),
            events,
        }
    }

    /// Register credentials without signing in or creating any row
    pub async fn provision(&self, email: &str, password: &str) -> SyncResult<RecordId> {
        let mut state = self.state.lock().await;
        Self::register(&mut state, email, password)
    }

    fn register(state: &mut IdentityState, email: &str, password: &str) -> SyncResult<RecordId> {
        let email = email.trim().to_lowercase();
        if state.credentials.contains_key(&email) {
            return Err(SyncError::conflict(
                Collection::Accounts,
                format!("identity {} already registered", email),
            ));
        }
        let user_id = RecordId::new(uuid::Uuid::new_v4().to_string());
        state.credentials.insert(
            email,
            Credential {
                user_id: user_id.clone(),
                password: password.to_string(),
            },
        );
        Ok(user_id)
    }

    fn open_session(&self, state: &mut IdentityState, email: &str, user_id: RecordId) -> AuthSession {
        let session = AuthSession {
            session_id: uuid::Uuid::new_v4().to_string(),
            user_id,
            email: email.to_string(),
        };
        state.current = Some(session.clone());
        let _ = self.events.send(AuthEvent::SignedIn(session.clone()));
        info!(user = %session.user_id, "signed in");
        session
    }
}

#[async_trait]
impl IdentityProvider for MemoryIdentity {
    async fn sign_up(&self, email: &str, password: &str) -> SyncResult<AuthSession> {
        let mut state = self.state.lock().await;
        let user_id = Self::register(&mut state, email, password)?;
        Ok(self.open_session(&mut state, &email.trim().to_lowercase(), user_id))
    }

    async fn sign_in(&self, email: &str, password: &str) -> SyncResult<AuthSession> {
        let email = email.trim().to_lowercase();
        let mut state = self.state.lock().await;
        let user_id = match state.credentials.get(&email) {
            Some(credential) if credential.password == password => credential.user_id.clone(),
            _ => return Err(SyncError::NotAuthenticated),
        };
        Ok(self.open_session(&mut state, &email, user_id))
    }

    async fn sign_out(&self) -> SyncResult<()> {
        let mut state = self.state.lock().await;
        if state.current.take().is_some() {
            let _ = self.events.send(AuthEvent::SignedOut);
            info!("signed out");
        }
        Ok(())
    }

    async fn current_session(&self) -> Option<AuthSession> {
        self.state.lock().await.current.clone()
    }

    fn events(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}
