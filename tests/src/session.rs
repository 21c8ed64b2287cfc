//! Session Scenario Tests
//!
//! Self-healing profile loads, sign-up races, role upgrades, timeouts and
//! session resumption through a full client.

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::harness::{settle, Clinic, PASSWORD};
    use carelink_shared::{Collection, FailureKind};
    use carelink_sync::{
        Filter, IdentityProvider, LoadFailure, ProfileUpdate, ReloadOutcome, ReloadTrigger, RemoteStore,
        SessionFlow, SessionState, SignUp, StoreOp, SyncConfig,
    };
    use carelink_sync_integrity::{Role, RoleProfile};

    fn sign_up(email: &str, role: Role) -> SignUp {
        SignUp {
            email: email.to_string(),
            password: PASSWORD.to_string(),
            name: String::new(),
            role,
        }
    }

    #[tokio::test]
    async fn test_login_repairs_account_for_bare_identity() {
        let clinic = Clinic::default();
        let device = clinic.device();
        device.identity.provision("orphan@clinic.test", PASSWORD).await.unwrap();

        let profile = device.client.login("orphan@clinic.test", PASSWORD).await.unwrap();
        assert_eq!(profile.account.name, "orphan");
        assert_eq!(profile.role_profile, RoleProfile::Patient);
        assert_eq!(clinic.store.rows(Collection::Accounts).await.len(), 1);

        device.client.logout().await.unwrap();
        device.client.login("orphan@clinic.test", PASSWORD).await.unwrap();
        assert_eq!(clinic.store.rows(Collection::Accounts).await.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_loads_heal_one_profile() {
        let clinic = Clinic::default();
        let (device, ada) = clinic.sign_up("ada@clinic.test", "Dr. Ada", Role::Practitioner).await.unwrap();
        clinic
            .store
            .delete(
                Collection::PractitionerProfiles,
                &Filter::by_key(Collection::PractitionerProfiles, ada.id()),
            )
            .await
            .unwrap();

        let session = device.client.session();
        let (a, b) = tokio::join!(
            session.reload_profile(ReloadTrigger::Explicit),
            session.reload_profile(ReloadTrigger::Explicit)
        );
        for outcome in [a, b] {
            match outcome {
                ReloadOutcome::Reloaded(carelink_sync::ProfileLoad::Loaded(profile)) => {
                    let practitioner = profile.practitioner().unwrap();
                    assert_eq!(practitioner.specialty, "");
                    assert_eq!(practitioner.availability.len(), 3);
                }
                other => panic!("unexpected {:?}", other),
            }
        }
        assert_eq!(clinic.store.rows(Collection::PractitionerProfiles).await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sign_up_suppresses_pushed_reloads() {
        let clinic = Clinic::default();
        let device = clinic.device();
        clinic
            .store
            .delay_next(Collection::Accounts, StoreOp::Insert, Duration::from_secs(5))
            .await;

        let client = device.client.clone();
        let running = tokio::spawn(async move { client.signup(sign_up("ada@clinic.test", Role::Practitioner)).await });

        let mut flow = device.client.session().subscribe_flow();
        assert!(settle(&mut flow, |f| matches!(f, SessionFlow::SigningUp { .. })).await);
        let session = device.client.session();
        assert_eq!(session.reload_profile(ReloadTrigger::ChangeFeed).await, ReloadOutcome::Suppressed);
        assert_eq!(session.reload_profile(ReloadTrigger::AuthEvent).await, ReloadOutcome::Suppressed);

        let profile = running.await.unwrap().unwrap();
        assert_eq!(profile.role(), Role::Practitioner);
        assert_eq!(session.flow(), SessionFlow::Idle);
        assert_eq!(clinic.store.rows(Collection::PractitionerProfiles).await.len(), 1);
        assert_eq!(clinic.store.rows(Collection::AvailabilitySlots).await.len(), 6);
    }

    #[tokio::test]
    async fn test_second_sign_up_while_one_runs_is_rejected() {
        let clinic = Clinic::default();
        let device = clinic.device();
        clinic
            .store
            .delay_next(Collection::Accounts, StoreOp::Insert, Duration::from_millis(200))
            .await;
        let client = device.client.clone();
        let running = tokio::spawn(async move { client.signup(sign_up("ada@clinic.test", Role::Practitioner)).await });
        let mut flow = device.client.session().subscribe_flow();
        assert!(settle(&mut flow, |f| matches!(f, SessionFlow::SigningUp { .. })).await);

        let err = device
            .client
            .signup(sign_up("bo@clinic.test", Role::Patient))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::ValidationRejected);
        assert!(running.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_patient_upgrade_and_duplicate_refusal() {
        let clinic = Clinic::default();
        let (device, pat) = clinic.sign_up("pat@clinic.test", "Pat", Role::Patient).await.unwrap();
        device.client.logout().await.unwrap();

        let upgraded = device
            .client
            .signup(sign_up("pat@clinic.test", Role::Practitioner))
            .await
            .unwrap();
        assert_eq!(upgraded.id(), pat.id());
        assert_eq!(upgraded.role(), Role::Practitioner);
        assert_eq!(clinic.store.rows(Collection::PractitionerProfiles).await.len(), 1);

        device.client.logout().await.unwrap();
        let before = clinic.store.rows(Collection::Accounts).await;
        let err = device
            .client
            .signup(sign_up("pat@clinic.test", Role::Patient))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::UniqueConflict);
        assert_eq!(clinic.store.rows(Collection::Accounts).await, before);
        assert_eq!(device.client.session().state(), SessionState::Unauthenticated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_profile_load_times_out_with_explicit_failure() {
        let config = SyncConfig {
            profile_load_timeout_ms: 2_000,
            ..SyncConfig::default()
        };
        let clinic = Clinic::new(config);
        let device = clinic.device();
        device.identity.provision("slow@clinic.test", PASSWORD).await.unwrap();
        clinic
            .store
            .delay_next(Collection::Accounts, StoreOp::FetchOne, Duration::from_secs(30))
            .await;

        let err = device.client.login("slow@clinic.test", PASSWORD).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::TransientTransport);
        match device.client.session().state() {
            SessionState::ProfileUnavailable { reason, .. } => {
                assert_eq!(reason, LoadFailure::TimedOut(Duration::from_secs(2)));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(device.client.viewer().is_err());
        assert!(device.client.appointment_cache().is_empty());
    }

    #[tokio::test]
    async fn test_start_resumes_held_session() {
        let clinic = Clinic::default();
        let device = clinic.device();
        device.identity.sign_up("back@clinic.test", PASSWORD).await.unwrap();

        device.client.start().await;
        let profile = device.client.session().current_profile().unwrap();
        assert_eq!(profile.account.email, "back@clinic.test");
        assert_eq!(device.client.viewer().unwrap().user_id, *profile.id());
    }

    #[tokio::test]
    async fn test_profile_update_publishes_new_state() {
        let clinic = Clinic::default();
        let (device, _) = clinic.sign_up("pat@clinic.test", "Pat", Role::Patient).await.unwrap();
        let renamed = device
            .client
            .update_profile(ProfileUpdate {
                name: Some("Patricia".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(renamed.account.name, "Patricia");

        let mut state = device.client.session_state();
        assert!(settle(&mut state, |s| s.profile().is_some_and(|p| p.account.name == "Patricia")).await);
    }

    #[tokio::test]
    async fn test_logout_clears_viewer_caches() {
        let clinic = Clinic::default();
        let (doctor, ada) = clinic.sign_up("ada@clinic.test", "Dr. Ada", Role::Practitioner).await.unwrap();
        let (patient, _) = clinic.sign_up("pat@clinic.test", "Pat", Role::Patient).await.unwrap();
        patient
            .client
            .create_appointment(carelink_sync::AppointmentRequest {
                practitioner_id: ada.id().clone(),
                day: "Mon".into(),
                time: "09:00 AM".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        let mut rx = doctor.client.appointments();
        assert!(settle(&mut rx, |a| a.len() == 1).await);

        doctor.client.logout().await.unwrap();
        assert!(doctor.client.appointment_cache().is_empty());
        assert_eq!(doctor.client.session().state(), SessionState::Unauthenticated);

        doctor.client.login("ada@clinic.test", PASSWORD).await.unwrap();
        assert_eq!(doctor.client.appointment_cache().len(), 1);
    }
}
