//! Session & Profile Repair Engine
//!
//! Owns the authentication state and the composite profile of the signed-in
//! account. Loading a profile heals two kinds of incomplete remote state:
//! an identity without its account row, and a practitioner account without
//! its profile row. Each repair inserts at most one row and re-reads it
//! exactly once.
//!
//! State machine:
//!
//! ```text
//! Unauthenticated -> Authenticating -> ProfileIncomplete -> Authenticated
//!                                                        \-> ProfileUnavailable
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::{broadcast, watch, Mutex};
use tracing::{debug, error, info, warn};

use carelink_shared::{to_row, Collection, RecordId, Row, SyncError, SyncResult};
use carelink_sync_integrity::{
    group_by_day, validate_email, validate_new_slot, AccountMapper, AvailabilityMapper, FlatSlot,
    NewAccount, NewAvailabilitySlot, NewPractitionerProfile, PractitionerProfileMapper, Profile,
    RecordMapper, Role, RoleProfile,
};

use crate::config::SyncConfig;
use crate::feed::{ChangeEvent, ChangeHandler};
use crate::identity::{AuthEvent, AuthSession, IdentityProvider};
use crate::remote::{Filter, Query, RemoteStore};

// ============================================================================
// States and Outcomes
// ============================================================================

/// Why a profile could not be produced for an authenticated session
#[derive(Clone, Debug, PartialEq)]
pub enum LoadFailure {
    TimedOut(Duration),
    /// A repair inserted the row but it still could not be read back
    StillMissing { collection: Collection, key: RecordId },
    Error(SyncError),
}

impl From<LoadFailure> for SyncError {
    fn from(failure: LoadFailure) -> Self {
        match failure {
            LoadFailure::TimedOut(limit) => {
                SyncError::TransientTransport(format!("profile load timed out after {:?}", limit))
            }
            LoadFailure::StillMissing { collection, key } => SyncError::missing(collection, key.as_str()),
            LoadFailure::Error(e) => e,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ProfileLoad {
    Loaded(Profile),
    Failed(LoadFailure),
}

#[derive(Clone, Debug, PartialEq)]
pub enum SessionState {
    Unauthenticated,
    Authenticating,
    /// Signed in; the profile is being loaded or repaired
    ProfileIncomplete { session: AuthSession },
    Authenticated { session: AuthSession, profile: Profile },
    /// Signed in, but this load attempt could not produce a profile
    ProfileUnavailable { session: AuthSession, reason: LoadFailure },
}

impl SessionState {
    pub fn label(&self) -> &'static str {
        match self {
            SessionState::Unauthenticated => "unauthenticated",
            SessionState::Authenticating => "authenticating",
            SessionState::ProfileIncomplete { .. } => "profile_incomplete",
            SessionState::Authenticated { .. } => "authenticated",
            SessionState::ProfileUnavailable { .. } => "profile_unavailable",
        }
    }

    pub fn session(&self) -> Option<&AuthSession> {
        match self {
            SessionState::ProfileIncomplete { session }
            | SessionState::Authenticated { session, .. }
            | SessionState::ProfileUnavailable { session, .. } => Some(session),
            SessionState::Unauthenticated | SessionState::Authenticating => None,
        }
    }

    pub fn profile(&self) -> Option<&Profile> {
        match self {
            SessionState::Authenticated { profile, .. } => Some(profile),
            _ => None,
        }
    }
}

/// What the engine is doing besides serving reloads
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum SessionFlow {
    #[default]
    Idle,
    SigningUp { email: String, role: Role },
}

/// Source of a profile reload request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReloadTrigger {
    Explicit,
    ChangeFeed,
    AuthEvent,
}

impl SessionFlow {
    /// While signing up, the sign-up itself owns profile creation; reloads
    /// pushed by the feed or the identity subsystem would race it
    pub fn suppresses(&self, trigger: ReloadTrigger) -> bool {
        match self {
            SessionFlow::Idle => false,
            SessionFlow::SigningUp { .. } => trigger != ReloadTrigger::Explicit,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ReloadOutcome {
    Suppressed,
    Reloaded(ProfileLoad),
}

/// Result of making sure one row exists
#[derive(Clone, Debug, PartialEq)]
pub enum RepairOutcome {
    Present(Row),
    Repaired(Row),
    StillMissing,
    Failed(SyncError),
}

impl RepairOutcome {
    pub fn row(self) -> Option<Row> {
        match self {
            RepairOutcome::Present(row) | RepairOutcome::Repaired(row) => Some(row),
            RepairOutcome::StillMissing | RepairOutcome::Failed(_) => None,
        }
    }

    fn into_row(self, collection: Collection, key: &RecordId) -> Result<Row, LoadFailure> {
        match self {
            RepairOutcome::Present(row) | RepairOutcome::Repaired(row) => Ok(row),
            RepairOutcome::StillMissing => Err(LoadFailure::StillMissing {
                collection,
                key: key.clone(),
            }),
            RepairOutcome::Failed(e) => Err(LoadFailure::Error(e)),
        }
    }
}

// ============================================================================
// Requests
// ============================================================================

#[derive(Clone, Debug)]
pub struct SignUp {
    pub email: String,
    pub password: String,
    /// Display name; the email local part is used when blank
    pub name: String,
    pub role: Role,
}

/// Practitioner profile columns to overwrite; `None` keeps the stored value
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct PractitionerProfilePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub specialty: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub education: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experience: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub languages: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub about: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clinic_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_pic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub banner_image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clinic_map_url: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub practitioner: Option<PractitionerProfilePatch>,
    /// Replaces the whole weekly availability
    pub availability: Option<Vec<FlatSlot>>,
}

fn email_local_part(email: &str) -> String {
    email.split('@').next().unwrap_or(email).to_string()
}

/// Resets the flow to idle when a sign-up ends, including on cancellation
struct FlowGuard<'a>(&'a watch::Sender<SessionFlow>);

impl Drop for FlowGuard<'_> {
    fn drop(&mut self) {
        self.0.send_replace(SessionFlow::Idle);
    }
}

// ============================================================================
// Engine
// ============================================================================

pub struct SessionEngine {
    store: Arc<dyn RemoteStore>,
    identity: Arc<dyn IdentityProvider>,
    config: SyncConfig,
    state: watch::Sender<SessionState>,
    flow: watch::Sender<SessionFlow>,
    repair_lock: Mutex<()>,
}

impl SessionEngine {
    pub fn new(store: Arc<dyn RemoteStore>, identity: Arc<dyn IdentityProvider>, config: SyncConfig) -> Self {
        let (state, _) = watch::channel(SessionState::Unauthenticated);
        let (flow, _) = watch::channel(SessionFlow::Idle);
        SessionEngine {
            store,
            identity,
            config,
            state,
            flow,
            repair_lock: Mutex::new(()),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn flow(&self) -> SessionFlow {
        self.flow.borrow().clone()
    }

    pub fn subscribe_flow(&self) -> watch::Receiver<SessionFlow> {
        self.flow.subscribe()
    }

    pub fn current_profile(&self) -> Option<Profile> {
        self.state.borrow().profile().cloned()
    }

    pub fn identity(&self) -> &Arc<dyn IdentityProvider> {
        &self.identity
    }

    fn set_state(&self, next: SessionState) {
        debug!(state = next.label(), "session state");
        self.state.send_replace(next);
    }

    // ------------------------------------------------------------------------
    // Repair
    // ------------------------------------------------------------------------

    async fn ensure_row<F>(&self, collection: Collection, key: &RecordId, synthesize: F) -> RepairOutcome
    where
        F: FnOnce() -> SyncResult<Row>,
    {
        match self.store.fetch_one(collection, key, &[]).await {
            Ok(row) => return RepairOutcome::Present(row),
            Err(SyncError::MissingRow { .. }) => {}
            Err(e) => return RepairOutcome::Failed(e),
        }

        let _guard = self.repair_lock.lock().await;
        let row = match synthesize() {
            Ok(row) => row,
            Err(e) => return RepairOutcome::Failed(e),
        };
        match self.store.insert(collection, row).await {
            Ok(_) => info!(collection = %collection, key = %key, "missing row created"),
            Err(SyncError::UniqueConflict { .. }) => {
                debug!(collection = %collection, key = %key, "row already created by a concurrent repair");
            }
            Err(e) => {
                warn!(collection = %collection, key = %key, error = %e, "repair insert failed");
                return RepairOutcome::Failed(e);
            }
        }

        match self.store.fetch_one(collection, key, &[]).await {
            Ok(row) => RepairOutcome::Repaired(row),
            Err(SyncError::MissingRow { .. }) => {
                error!(collection = %collection, key = %key, "row still missing after repair");
                RepairOutcome::StillMissing
            }
            Err(e) => RepairOutcome::Failed(e),
        }
    }

    /// Make sure the session's account row exists, synthesizing a minimal
    /// one with the configured default role
    pub async fn ensure_account(&self, session: &AuthSession) -> RepairOutcome {
        let role = self.config.default_role;
        self.ensure_row(Collection::Accounts, &session.user_id, || {
            to_row(&NewAccount {
                id: session.user_id.clone(),
                email: session.email.clone(),
                name: email_local_part(&session.email),
                role,
            })
        })
        .await
    }

    pub async fn ensure_practitioner_profile(&self, user_id: &RecordId) -> RepairOutcome {
        self.ensure_row(Collection::PractitionerProfiles, user_id, || {
            to_row(&NewPractitionerProfile::empty(user_id.clone()))
        })
        .await
    }

    async fn fetch_slots(&self, practitioner_id: &RecordId) -> SyncResult<Vec<FlatSlot>> {
        let query = Query::new(Collection::AvailabilitySlots)
            .filter(Filter::eq("practitioner_id", practitioner_id.as_str()));
        let rows = self.store.fetch(&query).await?;
        Ok(rows
            .iter()
            .map(|row| AvailabilityMapper::to_view(row).to_flat())
            .collect())
    }

    /// Profile row plus default weekly availability for a practitioner
    async fn provision_practitioner(&self, user_id: &RecordId) -> SyncResult<()> {
        self.ensure_practitioner_profile(user_id)
            .await
            .into_row(Collection::PractitionerProfiles, user_id)
            .map_err(SyncError::from)?;

        if !self.fetch_slots(user_id).await?.is_empty() {
            return Ok(());
        }
        for slot in &self.config.default_availability {
            let payload = NewAvailabilitySlot {
                practitioner_id: user_id.clone(),
                day: slot.day.clone(),
                start_time: slot.start.clone(),
                end_time: slot.end.clone(),
            };
            validate_new_slot(&payload).into_result()?;
            self.store
                .insert(Collection::AvailabilitySlots, to_row(&payload)?)
                .await?;
        }
        info!(user = %user_id, slots = self.config.default_availability.len(), "default availability created");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Loading
    // ------------------------------------------------------------------------

    /// Load (and heal) the composite profile, bounded by the configured timeout
    pub async fn load_profile(&self, session: &AuthSession) -> ProfileLoad {
        let limit = self.config.profile_load_timeout();
        match tokio::time::timeout(limit, self.load_profile_inner(session)).await {
            Ok(Ok(profile)) => ProfileLoad::Loaded(profile),
            Ok(Err(failure)) => ProfileLoad::Failed(failure),
            Err(_) => {
                warn!(user = %session.user_id, ?limit, "profile load timed out");
                ProfileLoad::Failed(LoadFailure::TimedOut(limit))
            }
        }
    }

    async fn load_profile_inner(&self, session: &AuthSession) -> Result<Profile, LoadFailure> {
        let account = self
            .ensure_account(session)
            .await
            .into_row(Collection::Accounts, &session.user_id)?;
        let account = AccountMapper::to_view(&account);

        let role_profile = match account.role {
            Role::Patient => RoleProfile::Patient,
            Role::Practitioner => {
                let row = self
                    .ensure_practitioner_profile(&account.id)
                    .await
                    .into_row(Collection::PractitionerProfiles, &account.id)?;
                let mut profile = PractitionerProfileMapper::to_view(&row);
                let slots = self
                    .fetch_slots(&account.id)
                    .await
                    .map_err(LoadFailure::Error)?;
                profile.availability = group_by_day(&slots);
                RoleProfile::Practitioner { profile }
            }
        };
        Ok(Profile {
            account,
            role_profile,
        })
    }

    fn settle(&self, session: AuthSession, load: ProfileLoad) -> SyncResult<Profile> {
        match load {
            ProfileLoad::Loaded(profile) => {
                info!(user = %profile.id(), role = %profile.role(), "profile loaded");
                self.set_state(SessionState::Authenticated {
                    session,
                    profile: profile.clone(),
                });
                Ok(profile)
            }
            ProfileLoad::Failed(reason) => {
                warn!(user = %session.user_id, ?reason, "profile unavailable");
                self.set_state(SessionState::ProfileUnavailable {
                    session,
                    reason: reason.clone(),
                });
                Err(reason.into())
            }
        }
    }

    async fn establish(&self, session: AuthSession) -> SyncResult<Profile> {
        let already_loaded = matches!(
            &*self.state.borrow(),
            SessionState::Authenticated { session: current, .. } if current.user_id == session.user_id
        );
        if !already_loaded {
            self.set_state(SessionState::ProfileIncomplete {
                session: session.clone(),
            });
        }
        let load = self.load_profile(&session).await;
        self.settle(session, load)
    }

    pub async fn reload_profile(&self, trigger: ReloadTrigger) -> ReloadOutcome {
        if self.flow.borrow().suppresses(trigger) {
            debug!(?trigger, "profile reload suppressed during sign-up");
            return ReloadOutcome::Suppressed;
        }
        let Some(session) = self.identity.current_session().await else {
            self.set_state(SessionState::Unauthenticated);
            return ReloadOutcome::Reloaded(ProfileLoad::Failed(LoadFailure::Error(
                SyncError::NotAuthenticated,
            )));
        };
        let load = self.load_profile(&session).await;
        let _ = self.settle(session, load.clone());
        ReloadOutcome::Reloaded(load)
    }

    pub async fn on_auth_event(&self, event: AuthEvent) {
        match event {
            AuthEvent::SignedIn(session) => {
                debug!(user = %session.user_id, "auth event: signed in");
                self.reload_profile(ReloadTrigger::AuthEvent).await;
            }
            AuthEvent::SignedOut => {
                if self.flow.borrow().suppresses(ReloadTrigger::AuthEvent) {
                    return;
                }
                self.set_state(SessionState::Unauthenticated);
            }
        }
    }

    // ------------------------------------------------------------------------
    // Entry Points
    // ------------------------------------------------------------------------

    pub async fn login(&self, email: &str, password: &str) -> SyncResult<Profile> {
        self.set_state(SessionState::Authenticating);
        let session = match self.identity.sign_in(email, password).await {
            Ok(session) => session,
            Err(e) => {
                self.set_state(SessionState::Unauthenticated);
                return Err(e);
            }
        };
        self.establish(session).await
    }

    pub async fn sign_up(&self, request: SignUp) -> SyncResult<Profile> {
        let started = self.flow.send_if_modified(|flow| match flow {
            SessionFlow::Idle => {
                *flow = SessionFlow::SigningUp {
                    email: request.email.clone(),
                    role: request.role,
                };
                true
            }
            SessionFlow::SigningUp { .. } => false,
        });
        if !started {
            return Err(SyncError::rejected("a sign-up is already in progress"));
        }
        let _flow = FlowGuard(&self.flow);

        let result = self.sign_up_inner(&request).await;
        if result.is_err() && matches!(*self.state.borrow(), SessionState::Authenticating) {
            self.set_state(SessionState::Unauthenticated);
        }
        result
    }

    async fn sign_up_inner(&self, request: &SignUp) -> SyncResult<Profile> {
        validate_email(&request.email).into_result()?;
        self.set_state(SessionState::Authenticating);

        let session = match self.identity.sign_up(&request.email, &request.password).await {
            Ok(session) => session,
            Err(SyncError::UniqueConflict { .. }) => {
                debug!(email = %request.email, "identity exists, signing in instead");
                self.identity.sign_in(&request.email, &request.password).await?
            }
            Err(e) => return Err(e),
        };

        let name = match request.name.trim() {
            "" => email_local_part(&session.email),
            name => name.to_string(),
        };
        let account = NewAccount {
            id: session.user_id.clone(),
            email: session.email.clone(),
            name,
            role: request.role,
        };

        match self.store.insert(Collection::Accounts, to_row(&account)?).await {
            Ok(_) => {
                info!(user = %account.id, role = %account.role, "account created");
                if account.role == Role::Practitioner {
                    self.provision_practitioner(&account.id).await?;
                }
            }
            Err(SyncError::UniqueConflict { .. }) => {
                self.resolve_existing_account(&session, request.role).await?;
            }
            Err(e) => return Err(e),
        }

        self.establish(session).await
    }

    /// The account row already exists: upgrade patient to practitioner,
    /// refuse anything else
    async fn resolve_existing_account(&self, session: &AuthSession, requested: Role) -> SyncResult<()> {
        let already_exists = || SyncError::conflict(Collection::Accounts, format!("{} already exists", session.email));

        let existing = match self
            .store
            .fetch_one(Collection::Accounts, &session.user_id, &[])
            .await
        {
            Ok(row) => AccountMapper::to_view(&row),
            Err(SyncError::MissingRow { .. }) => {
                let _ = self.identity.sign_out().await;
                return Err(already_exists());
            }
            Err(e) => return Err(e),
        };

        if existing.role == Role::Patient && requested == Role::Practitioner {
            let mut patch = Row::new();
            patch.insert("role".to_string(), json!(Role::Practitioner.as_str()));
            self.store
                .update(
                    Collection::Accounts,
                    patch,
                    &Filter::by_key(Collection::Accounts, &existing.id),
                )
                .await?;
            self.provision_practitioner(&existing.id).await?;
            info!(user = %existing.id, "patient account upgraded to practitioner");
            return Ok(());
        }

        let _ = self.identity.sign_out().await;
        Err(already_exists())
    }

    pub async fn logout(&self) -> SyncResult<()> {
        self.identity.sign_out().await?;
        self.set_state(SessionState::Unauthenticated);
        Ok(())
    }

    /// Write profile changes, then reload the composite profile
    pub async fn update_profile(&self, update: ProfileUpdate) -> SyncResult<Profile> {
        let (session, profile) = match self.state() {
            SessionState::Authenticated { session, profile } => (session, profile),
            _ => return Err(SyncError::NotAuthenticated),
        };
        let id = profile.id().clone();
        let is_practitioner = profile.role() == Role::Practitioner;

        if let Some(name) = &update.name {
            if name.trim().is_empty() {
                return Err(SyncError::rejected("name cannot be empty"));
            }
        }
        if (update.practitioner.is_some() || update.availability.is_some()) && !is_practitioner {
            return Err(SyncError::rejected("only practitioners have a practitioner profile"));
        }
        let slots: Vec<NewAvailabilitySlot> = update
            .availability
            .iter()
            .flatten()
            .map(|slot| NewAvailabilitySlot {
                practitioner_id: id.clone(),
                day: slot.day.clone(),
                start_time: slot.start.clone(),
                end_time: slot.end.clone(),
            })
            .collect();
        for slot in &slots {
            validate_new_slot(slot).into_result()?;
        }

        if let Some(name) = &update.name {
            let mut patch = Row::new();
            patch.insert("name".to_string(), Value::String(name.trim().to_string()));
            self.store
                .update(Collection::Accounts, patch, &Filter::by_key(Collection::Accounts, &id))
                .await?;
        }
        if let Some(changes) = &update.practitioner {
            let patch = to_row(changes)?;
            if !patch.is_empty() {
                let updated = self
                    .store
                    .update(
                        Collection::PractitionerProfiles,
                        patch,
                        &Filter::by_key(Collection::PractitionerProfiles, &id),
                    )
                    .await?;
                if updated.is_empty() {
                    return Err(SyncError::missing(Collection::PractitionerProfiles, id.as_str()));
                }
            }
        }
        if update.availability.is_some() {
            self.store
                .delete(
                    Collection::AvailabilitySlots,
                    &Filter::eq("practitioner_id", id.as_str()),
                )
                .await?;
            for slot in &slots {
                self.store
                    .insert(Collection::AvailabilitySlots, to_row(slot)?)
                    .await?;
            }
        }
        info!(user = %id, "profile updated");

        let load = self.load_profile(&session).await;
        self.settle(session, load)
    }
}

// ============================================================================
// Listeners
// ============================================================================

/// Forwards identity events to the engine until dropped
pub struct AuthListener {
    stop: watch::Sender<bool>,
}

impl AuthListener {
    pub fn spawn(engine: Arc<SessionEngine>) -> Self {
        let mut events = engine.identity.events();
        let (stop, mut stop_rx) = watch::channel(false);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                    received = events.recv() => match received {
                        Ok(event) => engine.on_auth_event(event).await,
                        Err(broadcast::error::RecvError::Lagged(_)) => {
                            engine.reload_profile(ReloadTrigger::AuthEvent).await;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        });
        AuthListener { stop }
    }

    pub fn stop(&self) {
        self.stop.send_replace(true);
    }
}

impl Drop for AuthListener {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Reloads the profile when the signed-in account's own rows change
pub struct ProfileWatcher {
    engine: Arc<SessionEngine>,
}

impl ProfileWatcher {
    pub fn new(engine: Arc<SessionEngine>) -> Self {
        ProfileWatcher { engine }
    }
}

#[async_trait]
impl ChangeHandler for ProfileWatcher {
    async fn on_change(&self, event: ChangeEvent) {
        debug!(collection = %event.collection, id = %event.record_id, "own profile row changed");
        self.engine.reload_profile(ReloadTrigger::ChangeFeed).await;
    }

    async fn on_lagged(&self, _missed: u64) {
        self.engine.reload_profile(ReloadTrigger::ChangeFeed).await;
    }
}
