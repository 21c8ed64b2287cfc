//! CareLink client
//!
//! Entry point for the interface layer. Holds one local cache per exposed
//! collection, keeps them in sync for the signed-in viewer and offers the
//! mutation entry points. Every mutation validates first, writes to the
//! authoritative store second and patches the local cache last, so a
//! failed call leaves the caches as they were.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use carelink_shared::{to_row, Collection, RecordId, Row, RowExt, SyncError, SyncResult};
use carelink_sync_integrity::{
    is_weekday_label, next_date_for_weekday, patient_stats, practitioner_stats, rating_stats,
    validate_appointment_transition, validate_new_appointment, validate_new_prescription,
    validate_new_review, validate_prescription_transition, AccountMapper, AppointmentMapper,
    AppointmentStatus, AppointmentView, Medication, NewAppointment, NewPrescription, NewReview,
    PatientStats, PractitionerStats, PractitionerView, PrescriptionMapper, PrescriptionStatus,
    PrescriptionView, Profile, RatingStats, RecordMapper, ReviewMapper, ReviewView, Role,
    weekday_label, DEFAULT_CONSULTATION_TYPE, DEFAULT_REASON,
};

use crate::cache::{InsertPosition, LocalCache, Snapshot};
use crate::clock::Clock;
use crate::config::SyncConfig;
use crate::conversation::Conversation;
use crate::directory::DirectorySync;
use crate::feed::{ChangeFeed, Listener};
use crate::identity::IdentityProvider;
use crate::reconciler::CollectionSync;
use crate::remote::{Filter, RemoteStore};
use crate::session::{
    AuthListener, ProfileLoad, ProfileUpdate, ProfileWatcher, ReloadOutcome, ReloadTrigger,
    SessionEngine, SessionState, SignUp,
};

// ============================================================================
// Viewer
// ============================================================================

/// The signed-in account as seen by the visibility rules
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Viewer {
    pub user_id: RecordId,
    pub role: Role,
}

impl Viewer {
    pub fn of(profile: &Profile) -> Self {
        Viewer {
            user_id: profile.id().clone(),
            role: profile.role(),
        }
    }

    fn own_column(&self) -> &'static str {
        match self.role {
            Role::Patient => "patient_id",
            Role::Practitioner => "practitioner_id",
        }
    }

    /// Appointments the viewer takes part in
    pub fn appointments(&self) -> Filter {
        Filter::eq(self.own_column(), self.user_id.as_str())
    }

    pub fn prescriptions(&self) -> Filter {
        Filter::eq(self.own_column(), self.user_id.as_str())
    }

    /// Reviews are public; practitioners follow the ones about them
    pub fn reviews(&self) -> Filter {
        match self.role {
            Role::Patient => Filter::all(),
            Role::Practitioner => Filter::eq("practitioner_id", self.user_id.as_str()),
        }
    }

    fn is_party(&self, practitioner_id: &RecordId, patient_id: &RecordId) -> bool {
        self.user_id == *practitioner_id || self.user_id == *patient_id
    }
}

// ============================================================================
// Requests
// ============================================================================

#[derive(Clone, Debug, Default)]
pub struct AppointmentRequest {
    pub practitioner_id: RecordId,
    /// YYYY-MM-DD; the next occurrence of `day` when absent
    pub date: Option<String>,
    pub day: String,
    pub time: String,
    pub consultation_type: Option<String>,
    pub reason: Option<String>,
    pub notes: Option<String>,
}

/// Appointment columns to overwrite; `None` keeps the stored value
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct AppointmentChanges {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub day: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub consultation_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl AppointmentChanges {
    fn reschedules(&self) -> bool {
        self.date.is_some() || self.day.is_some() || self.time.is_some()
    }
}

#[derive(Clone, Debug, Default)]
pub struct PrescriptionRequest {
    pub appointment_id: RecordId,
    pub medications: Vec<Medication>,
    pub notes: String,
}

// ============================================================================
// Client
// ============================================================================

/// Syncs scoped to the current viewer; dropping it stops their listeners
struct ActiveSync {
    viewer: Viewer,
    _listeners: Vec<Listener>,
}

pub struct CareClient {
    store: Arc<dyn RemoteStore>,
    feed: Arc<dyn ChangeFeed>,
    clock: Arc<dyn Clock>,
    session: Arc<SessionEngine>,
    appointments: Arc<LocalCache<AppointmentView>>,
    reviews: Arc<LocalCache<ReviewView>>,
    prescriptions: Arc<LocalCache<PrescriptionView>>,
    directory: Arc<DirectorySync>,
    active: Mutex<Option<ActiveSync>>,
    background: Mutex<Vec<Listener>>,
    auth: Mutex<Option<AuthListener>>,
}

impl CareClient {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        feed: Arc<dyn ChangeFeed>,
        identity: Arc<dyn IdentityProvider>,
        clock: Arc<dyn Clock>,
        config: SyncConfig,
    ) -> Self {
        let session = Arc::new(SessionEngine::new(store.clone(), identity, config));
        let directory = Arc::new(DirectorySync::new(
            store.clone(),
            Arc::new(LocalCache::new("directory", InsertPosition::Append)),
        ));
        CareClient {
            store,
            feed,
            clock,
            session,
            appointments: Arc::new(LocalCache::new("appointments", InsertPosition::Append)),
            reviews: Arc::new(LocalCache::new("reviews", InsertPosition::Prepend)),
            prescriptions: Arc::new(LocalCache::new("prescriptions", InsertPosition::Prepend)),
            directory,
            active: Mutex::new(None),
            background: Mutex::new(Vec::new()),
            auth: Mutex::new(None),
        }
    }

    /// Follow the practitioner directory and identity events, and resume a
    /// session the identity subsystem still holds
    pub async fn start(&self) {
        {
            let mut background = self.background.lock().await;
            if background.is_empty() {
                *background = self.directory.listen(&*self.feed);
            }
        }
        if let Err(e) = self.directory.load().await {
            warn!(error = %e, "directory unavailable at start");
        }
        {
            let mut auth = self.auth.lock().await;
            if auth.is_none() {
                *auth = Some(AuthListener::spawn(self.session.clone()));
            }
        }

        if self.session.identity().current_session().await.is_some() {
            let outcome = self.session.reload_profile(ReloadTrigger::Explicit).await;
            if let ReloadOutcome::Reloaded(ProfileLoad::Loaded(profile)) = outcome {
                self.activate(&profile).await;
            }
        }
    }

    // ------------------------------------------------------------------------
    // Read Handles
    // ------------------------------------------------------------------------

    pub fn session(&self) -> &Arc<SessionEngine> {
        &self.session
    }

    pub fn session_state(&self) -> watch::Receiver<SessionState> {
        self.session.subscribe()
    }

    pub fn appointments(&self) -> watch::Receiver<Snapshot<AppointmentView>> {
        self.appointments.subscribe()
    }

    pub fn reviews(&self) -> watch::Receiver<Snapshot<ReviewView>> {
        self.reviews.subscribe()
    }

    pub fn prescriptions(&self) -> watch::Receiver<Snapshot<PrescriptionView>> {
        self.prescriptions.subscribe()
    }

    pub fn practitioners(&self) -> watch::Receiver<Snapshot<PractitionerView>> {
        self.directory.cache().subscribe()
    }

    pub fn appointment_cache(&self) -> &Arc<LocalCache<AppointmentView>> {
        &self.appointments
    }

    pub fn review_cache(&self) -> &Arc<LocalCache<ReviewView>> {
        &self.reviews
    }

    pub fn prescription_cache(&self) -> &Arc<LocalCache<PrescriptionView>> {
        &self.prescriptions
    }

    pub fn directory_cache(&self) -> &Arc<LocalCache<PractitionerView>> {
        self.directory.cache()
    }

    pub fn viewer(&self) -> SyncResult<Viewer> {
        self.session
            .current_profile()
            .map(|profile| Viewer::of(&profile))
            .ok_or(SyncError::NotAuthenticated)
    }

    // ------------------------------------------------------------------------
    // Activation
    // ------------------------------------------------------------------------

    /// Subscribe and load every viewer-scoped cache. Load failures leave
    /// the affected cache empty and do not fail the sign-in.
    async fn activate(&self, profile: &Profile) {
        let viewer = Viewer::of(profile);
        let mut active = self.active.lock().await;
        if active.as_ref().is_some_and(|a| a.viewer == viewer) {
            return;
        }
        // Stop the previous viewer's listeners before loading
        *active = None;

        let appointments = Arc::new(
            CollectionSync::<AppointmentMapper>::new(
                self.store.clone(),
                self.appointments.clone(),
                viewer.appointments(),
            )
            .ordered("date", true),
        );
        let reviews = Arc::new(
            CollectionSync::<ReviewMapper>::new(self.store.clone(), self.reviews.clone(), viewer.reviews())
                .ordered("created_at", false),
        );
        let prescriptions = Arc::new(
            CollectionSync::<PrescriptionMapper>::new(
                self.store.clone(),
                self.prescriptions.clone(),
                viewer.prescriptions(),
            )
            .ordered("created_at", false),
        );

        let feed = &*self.feed;
        let mut listeners = vec![
            appointments.listen(feed),
            reviews.listen(feed),
            prescriptions.listen(feed),
        ];
        let watcher = Arc::new(ProfileWatcher::new(self.session.clone()));
        listeners.push(Listener::spawn(
            feed.subscribe(
                Collection::Accounts,
                Filter::by_key(Collection::Accounts, &viewer.user_id),
            ),
            watcher.clone(),
        ));
        if viewer.role == Role::Practitioner {
            listeners.push(Listener::spawn(
                feed.subscribe(
                    Collection::PractitionerProfiles,
                    Filter::by_key(Collection::PractitionerProfiles, &viewer.user_id),
                ),
                watcher.clone(),
            ));
            listeners.push(Listener::spawn(
                feed.subscribe(
                    Collection::AvailabilitySlots,
                    Filter::eq("practitioner_id", viewer.user_id.as_str()),
                ),
                watcher,
            ));
        }

        let (a, r, p) = tokio::join!(appointments.load(), reviews.load(), prescriptions.load());
        for (name, result) in [("appointments", a), ("reviews", r), ("prescriptions", p)] {
            if let Err(e) = result {
                warn!(cache = name, error = %e, "cache left empty");
            }
        }
        info!(user = %viewer.user_id, role = %viewer.role, "viewer caches active");
        *active = Some(ActiveSync {
            viewer,
            _listeners: listeners,
        });
    }

    async fn deactivate(&self) {
        *self.active.lock().await = None;
        self.appointments.clear();
        self.reviews.clear();
        self.prescriptions.clear();
        debug!("viewer caches cleared");
    }

    // ------------------------------------------------------------------------
    // Session
    // ------------------------------------------------------------------------

    pub async fn signup(&self, request: SignUp) -> SyncResult<Profile> {
        let profile = self.session.sign_up(request).await?;
        self.activate(&profile).await;
        Ok(profile)
    }

    pub async fn login(&self, email: &str, password: &str) -> SyncResult<Profile> {
        let profile = self.session.login(email, password).await?;
        self.activate(&profile).await;
        Ok(profile)
    }

    pub async fn logout(&self) -> SyncResult<()> {
        self.session.logout().await?;
        self.deactivate().await;
        Ok(())
    }

    pub async fn update_profile(&self, update: ProfileUpdate) -> SyncResult<Profile> {
        self.session.update_profile(update).await
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    /// Re-read a written row with its expansions; falls back to the row as
    /// written, which the feed completes later
    async fn reread<M: RecordMapper>(&self, written: &Row) -> M::View {
        let id = written.record_id(M::COLLECTION);
        match self.store.fetch_one(M::COLLECTION, &id, M::EXPAND).await {
            Ok(row) => M::to_view(&row),
            Err(e) => {
                warn!(collection = %M::COLLECTION, id = %id, error = %e, "re-read after write failed");
                M::to_view(written)
            }
        }
    }

    async fn fetch_view<M: RecordMapper>(&self, id: &RecordId) -> SyncResult<M::View> {
        let row = self.store.fetch_one(M::COLLECTION, id, M::EXPAND).await?;
        Ok(M::to_view(&row))
    }

    async fn require_practitioner_account(&self, id: &RecordId) -> SyncResult<()> {
        let account = match self.store.fetch_one(Collection::Accounts, id, &[]).await {
            Ok(row) => AccountMapper::to_view(&row),
            Err(SyncError::MissingRow { .. }) => {
                return Err(SyncError::rejected(format!("unknown practitioner {}", id)));
            }
            Err(e) => return Err(e),
        };
        if account.role != Role::Practitioner {
            return Err(SyncError::rejected(format!("{} is not a practitioner", id)));
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Appointments
    // ------------------------------------------------------------------------

    pub async fn create_appointment(&self, request: AppointmentRequest) -> SyncResult<AppointmentView> {
        let viewer = self.viewer()?;
        if viewer.role != Role::Patient {
            return Err(SyncError::rejected("only patients can book appointments"));
        }
        let date = match request.date {
            Some(date) if !date.trim().is_empty() => date,
            _ => next_date_for_weekday(&request.day, self.clock.today())
                .format("%Y-%m-%d")
                .to_string(),
        };
        let payload = NewAppointment {
            practitioner_id: request.practitioner_id,
            patient_id: viewer.user_id.clone(),
            date,
            day: request.day,
            time: request.time,
            consultation_type: request
                .consultation_type
                .unwrap_or_else(|| DEFAULT_CONSULTATION_TYPE.to_string()),
            reason: request.reason.unwrap_or_else(|| DEFAULT_REASON.to_string()),
            status: AppointmentStatus::Pending,
            notes: request.notes.unwrap_or_default(),
        };
        validate_new_appointment(&payload).into_result()?;
        self.require_practitioner_account(&payload.practitioner_id).await?;

        let written = self
            .store
            .insert(Collection::Appointments, to_row(&payload)?)
            .await?;
        let view = self.reread::<AppointmentMapper>(&written).await;
        self.appointments.upsert(view.clone());
        info!(id = %view.id, practitioner = %view.practitioner_id, date = %view.date, "appointment booked");
        Ok(view)
    }

    async fn own_appointment(&self, viewer: &Viewer, id: &RecordId) -> SyncResult<AppointmentView> {
        let current = self.fetch_view::<AppointmentMapper>(id).await?;
        if !viewer.is_party(&current.practitioner_id, &current.patient_id) {
            return Err(SyncError::rejected(format!("appointment {} is not yours", id)));
        }
        Ok(current)
    }

    /// Move an appointment along its state machine. Re-applying the current
    /// status writes nothing.
    pub async fn update_appointment_status(
        &self,
        id: &RecordId,
        status: AppointmentStatus,
    ) -> SyncResult<AppointmentView> {
        let viewer = self.viewer()?;
        let mut current = self.own_appointment(&viewer, id).await?;
        if current.status == status {
            self.appointments.upsert(current.clone());
            return Ok(current);
        }
        validate_appointment_transition(current.status, status).into_result()?;

        // Only applies while the stored status is still the one validated above
        let mut patch = Row::new();
        patch.insert("status".to_string(), status.as_str().into());
        let guard = Filter::by_key(Collection::Appointments, id).and("status", current.status.as_str());
        let updated = self.store.update(Collection::Appointments, patch, &guard).await?;
        if updated.is_empty() {
            let latest = self.fetch_view::<AppointmentMapper>(id).await?;
            warn!(id = %id, expected = %current.status, found = %latest.status, "appointment status changed concurrently");
            return Err(SyncError::rejected(format!(
                "Appointment moved to {} before it could become {}",
                latest.status, status
            )));
        }

        let from = current.status;
        current.status = status;
        self.appointments.upsert(current.clone());
        info!(id = %id, %from, to = %status, "appointment status changed");
        Ok(current)
    }

    pub async fn cancel_appointment(&self, id: &RecordId) -> SyncResult<AppointmentView> {
        self.update_appointment_status(id, AppointmentStatus::Cancelled).await
    }

    /// Edit schedule or details. Closed appointments cannot be rescheduled.
    pub async fn update_appointment(
        &self,
        id: &RecordId,
        mut changes: AppointmentChanges,
    ) -> SyncResult<AppointmentView> {
        let viewer = self.viewer()?;
        let current = self.own_appointment(&viewer, id).await?;

        if changes.reschedules() && current.status.is_terminal() {
            return Err(SyncError::rejected(format!(
                "{} appointments cannot be rescheduled",
                current.status
            )));
        }
        if let Some(day) = &changes.day {
            if !is_weekday_label(day) {
                return Err(SyncError::rejected(format!("Unknown weekday label '{}'", day)));
            }
            if changes.date.is_none() {
                changes.date = Some(
                    next_date_for_weekday(day, self.clock.today())
                        .format("%Y-%m-%d")
                        .to_string(),
                );
            }
        }
        if let Some(date) = &changes.date {
            let Ok(parsed) = chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d") else {
                return Err(SyncError::rejected(format!(
                    "Appointment date '{}' must be YYYY-MM-DD",
                    date
                )));
            };
            // The stored day label always names the date's weekday
            let label = weekday_label(parsed);
            if let Some(day) = changes.day.as_deref().filter(|day| *day != label) {
                return Err(SyncError::rejected(format!(
                    "Appointment date {} falls on {}, not {}",
                    date, label, day
                )));
            }
            changes.day.get_or_insert_with(|| label.to_string());
        }
        if changes.time.as_deref().is_some_and(|t| t.trim().is_empty()) {
            return Err(SyncError::rejected("Appointment time cannot be empty"));
        }

        let patch = to_row(&changes)?;
        if patch.is_empty() {
            return Ok(current);
        }
        let updated = self
            .store
            .update(Collection::Appointments, patch, &Filter::by_key(Collection::Appointments, id))
            .await?;
        let Some(written) = updated.first() else {
            return Err(SyncError::missing(Collection::Appointments, id.as_str()));
        };
        let view = self.reread::<AppointmentMapper>(written).await;
        self.appointments.upsert(view.clone());
        info!(id = %id, "appointment updated");
        Ok(view)
    }

    /// Remove an appointment together with its messages and prescriptions
    pub async fn delete_appointment(&self, id: &RecordId) -> SyncResult<()> {
        let viewer = self.viewer()?;
        self.own_appointment(&viewer, id).await?;
        let removed = self
            .store
            .delete(Collection::Appointments, &Filter::by_key(Collection::Appointments, id))
            .await?;
        self.appointments.remove(id);
        info!(id = %id, rows = removed.len(), "appointment deleted");
        Ok(())
    }

    pub async fn open_conversation(&self, appointment_id: &RecordId) -> SyncResult<Conversation> {
        let viewer = self.viewer()?;
        let appointment = match self.appointments.get(appointment_id) {
            Some(cached) => cached,
            None => self.own_appointment(&viewer, appointment_id).await?,
        };
        Conversation::open(self.store.clone(), &*self.feed, &appointment, &viewer.user_id).await
    }

    // ------------------------------------------------------------------------
    // Reviews
    // ------------------------------------------------------------------------

    pub async fn add_review(
        &self,
        practitioner_id: &RecordId,
        rating: u8,
        comment: &str,
    ) -> SyncResult<ReviewView> {
        let viewer = self.viewer()?;
        if viewer.role != Role::Patient {
            return Err(SyncError::rejected("only patients can write reviews"));
        }
        let payload = NewReview {
            practitioner_id: practitioner_id.clone(),
            patient_id: viewer.user_id.clone(),
            rating,
            comment: comment.trim().to_string(),
        };
        validate_new_review(&payload).into_result()?;
        self.require_practitioner_account(practitioner_id).await?;

        let written = self.store.insert(Collection::Reviews, to_row(&payload)?).await?;
        let view = self.reread::<ReviewMapper>(&written).await;
        if viewer.reviews().matches(&written) {
            self.reviews.upsert(view.clone());
        }
        info!(id = %view.id, practitioner = %practitioner_id, rating, "review added");
        Ok(view)
    }

    /// Average over the cached reviews of one practitioner, or the base
    /// values when none are cached
    pub fn rating_stats(&self, practitioner_id: &RecordId, base_rating: f64, base_count: u32) -> RatingStats {
        let ratings: Vec<u8> = self
            .reviews
            .snapshot()
            .iter()
            .filter(|r| r.practitioner_id == *practitioner_id)
            .map(|r| r.rating)
            .collect();
        rating_stats(&ratings, base_rating, base_count)
    }

    // ------------------------------------------------------------------------
    // Prescriptions
    // ------------------------------------------------------------------------

    pub async fn issue_prescription(&self, request: PrescriptionRequest) -> SyncResult<PrescriptionView> {
        let viewer = self.viewer()?;
        if viewer.role != Role::Practitioner {
            return Err(SyncError::rejected("only practitioners can issue prescriptions"));
        }
        let appointment = self.own_appointment(&viewer, &request.appointment_id).await?;
        if appointment.practitioner_id != viewer.user_id {
            return Err(SyncError::rejected("prescriptions are issued by the appointment's practitioner"));
        }
        let payload = NewPrescription {
            appointment_id: appointment.id.clone(),
            practitioner_id: viewer.user_id.clone(),
            patient_id: appointment.patient_id.clone(),
            medications: request.medications,
            status: PrescriptionStatus::Active,
            notes: request.notes,
        };
        validate_new_prescription(&payload).into_result()?;

        let written = self
            .store
            .insert(Collection::Prescriptions, to_row(&payload)?)
            .await?;
        let view = self.reread::<PrescriptionMapper>(&written).await;
        self.prescriptions.upsert(view.clone());
        info!(id = %view.id, appointment = %appointment.id, "prescription issued");
        Ok(view)
    }

    pub async fn update_prescription_status(
        &self,
        id: &RecordId,
        status: PrescriptionStatus,
    ) -> SyncResult<PrescriptionView> {
        let viewer = self.viewer()?;
        let mut current = self.fetch_view::<PrescriptionMapper>(id).await?;
        if current.practitioner_id != viewer.user_id {
            return Err(SyncError::rejected(format!("prescription {} is not yours", id)));
        }
        if current.status == status {
            self.prescriptions.upsert(current.clone());
            return Ok(current);
        }
        validate_prescription_transition(current.status, status).into_result()?;

        let mut patch = Row::new();
        patch.insert("status".to_string(), status.as_str().into());
        let guard = Filter::by_key(Collection::Prescriptions, id).and("status", current.status.as_str());
        let updated = self.store.update(Collection::Prescriptions, patch, &guard).await?;
        if updated.is_empty() {
            let latest = self.fetch_view::<PrescriptionMapper>(id).await?;
            warn!(id = %id, expected = %current.status, found = %latest.status, "prescription status changed concurrently");
            return Err(SyncError::rejected(format!(
                "Prescription moved to {} before it could become {}",
                latest.status, status
            )));
        }

        let from = current.status;
        current.status = status;
        self.prescriptions.upsert(current.clone());
        info!(id = %id, %from, to = %status, "prescription status changed");
        Ok(current)
    }

    // ------------------------------------------------------------------------
    // Statistics
    // ------------------------------------------------------------------------

    pub fn practitioner_stats(&self) -> SyncResult<PractitionerStats> {
        let viewer = self.viewer()?;
        if viewer.role != Role::Practitioner {
            return Err(SyncError::rejected("practitioner statistics need a practitioner session"));
        }
        Ok(practitioner_stats(
            &self.appointments.snapshot(),
            viewer.user_id.as_str(),
            self.clock.today(),
        ))
    }

    pub fn patient_stats(&self) -> SyncResult<PatientStats> {
        let viewer = self.viewer()?;
        if viewer.role != Role::Patient {
            return Err(SyncError::rejected("patient statistics need a patient session"));
        }
        Ok(patient_stats(
            &self.appointments.snapshot(),
            viewer.user_id.as_str(),
            self.clock.today(),
        ))
    }
}
