//! Reconciliation Replay Tests
//!
//! Recorded change events applied to a fresh cache converge to the same
//! content as a live client, however often they are replayed.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use crate::harness::{settle, Clinic};
    use carelink_shared::Collection;
    use carelink_sync::{
        AppointmentRequest, ChangeEvent, ChangeFeed, CollectionSync, Delivery, Filter, InsertPosition, LocalCache,
        Subscription,
    };
    use carelink_sync_integrity::{AppointmentMapper, AppointmentStatus, AppointmentView, Role};

    async fn recorded(subscription: &mut Subscription) -> Vec<ChangeEvent> {
        let mut events = Vec::new();
        while let Ok(Delivery::Event(event)) =
            tokio::time::timeout(Duration::from_millis(50), subscription.next()).await
        {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_replayed_history_converges_with_live_cache() {
        let clinic = Clinic::default();
        let mut subscription = clinic.store.feed().subscribe(Collection::Appointments, Filter::all());
        let (doctor, ada) = clinic.sign_up("ada@clinic.test", "Dr. Ada", Role::Practitioner).await.unwrap();
        let (patient, pat) = clinic.sign_up("pat@clinic.test", "Pat", Role::Patient).await.unwrap();

        let mut booked = Vec::new();
        for day in ["Mon", "Wed", "Fri"] {
            let view = patient
                .client
                .create_appointment(AppointmentRequest {
                    practitioner_id: ada.id().clone(),
                    day: day.into(),
                    time: "09:00 AM".into(),
                    ..Default::default()
                })
                .await
                .unwrap();
            booked.push(view.id);
        }
        let mut rx = doctor.client.appointments();
        assert!(settle(&mut rx, |a| a.len() == 3).await);
        doctor
            .client
            .update_appointment_status(&booked[0], AppointmentStatus::Confirmed)
            .await
            .unwrap();
        patient.client.cancel_appointment(&booked[1]).await.unwrap();
        patient.client.delete_appointment(&booked[2]).await.unwrap();

        let events = recorded(&mut subscription).await;
        assert_eq!(events.len(), 6);

        let cache = Arc::new(LocalCache::new("replay", InsertPosition::Append));
        let replay = CollectionSync::<AppointmentMapper>::new(
            clinic.store.clone(),
            cache.clone(),
            Filter::eq("patient_id", pat.id().as_str()),
        );
        for event in &events {
            replay.apply(event).await.unwrap();
        }
        let once = cache.snapshot();
        for event in events.iter().chain(events.iter()) {
            replay.apply(event).await.unwrap();
        }
        assert_eq!(cache.snapshot(), once);
        assert_eq!(once.len(), 2);

        let mut rx = patient.client.appointments();
        assert!(settle(&mut rx, |a| a.len() == 2 && a[0].status == AppointmentStatus::Confirmed).await);
        let mut live: Vec<AppointmentView> = patient.client.appointment_cache().snapshot().to_vec();
        let mut replayed: Vec<AppointmentView> = once.to_vec();
        live.sort_by(|a, b| a.id.cmp(&b.id));
        replayed.sort_by(|a, b| a.id.cmp(&b.id));
        assert_eq!(live, replayed);
    }

    #[tokio::test]
    async fn test_client_cache_snapshot_restores() {
        let clinic = Clinic::default();
        let (_doctor, ada) = clinic.sign_up("ada@clinic.test", "Dr. Ada", Role::Practitioner).await.unwrap();
        let (patient, _) = clinic.sign_up("pat@clinic.test", "Pat", Role::Patient).await.unwrap();
        for day in ["Mon", "Thu"] {
            patient
                .client
                .create_appointment(AppointmentRequest {
                    practitioner_id: ada.id().clone(),
                    day: day.into(),
                    time: "10:00 AM".into(),
                    ..Default::default()
                })
                .await
                .unwrap();
        }

        let raw = patient.client.appointment_cache().to_snapshot_json().unwrap();
        let restored: LocalCache<AppointmentView> = LocalCache::new("restored", InsertPosition::Append);
        assert_eq!(restored.restore_snapshot_json(&raw).unwrap(), 2);
        assert_eq!(restored.snapshot(), patient.client.appointment_cache().snapshot());
        assert_eq!(restored.snapshot()[1].day, "Thu");
    }
}
