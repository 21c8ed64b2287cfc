//! Appointment Scenario Tests
//!
//! Booking, the status state machine, rescheduling, deletion and the
//! dashboard statistics, observed from both parties' caches.

#[cfg(test)]
mod tests {
    use crate::harness::{drain, settle, Clinic};
    use carelink_shared::{Collection, FailureKind, RowExt, SyncError};
    use carelink_sync::{AppointmentChanges, AppointmentRequest, Filter, StoreOp};
    use carelink_sync_integrity::{AppointmentStatus, Role};
    use std::time::Duration;

    fn monday_with(practitioner: &carelink_shared::RecordId) -> AppointmentRequest {
        AppointmentRequest {
            practitioner_id: practitioner.clone(),
            day: "Mon".to_string(),
            time: "09:00 AM".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_booking_reaches_practitioner_with_defaults() {
        let clinic = Clinic::default();
        let (doctor, ada) = clinic.sign_up("ada@clinic.test", "Dr. Ada", Role::Practitioner).await.unwrap();
        let (patient, _) = clinic.sign_up("pat@clinic.test", "Pat", Role::Patient).await.unwrap();

        let booked = patient.client.create_appointment(monday_with(ada.id())).await.unwrap();
        // Booked on Wednesday 2024-01-03: next Monday is five days out
        assert_eq!(booked.date, "2024-01-08");
        assert_eq!(booked.consultation_type, "In-Person");
        assert_eq!(booked.reason, "General Consultation");
        assert_eq!(booked.status, AppointmentStatus::Pending);
        assert_eq!(booked.practitioner_name, "Dr. Ada");
        assert_eq!(patient.client.appointment_cache().len(), 1);

        let mut rx = doctor.client.appointments();
        assert!(settle(&mut rx, |a| a.len() == 1).await);
        let seen = doctor.client.appointment_cache().get(&booked.id).unwrap();
        assert_eq!(seen.patient_name, "Pat");
        assert_eq!(seen.patient_email, "pat@clinic.test");
    }

    #[tokio::test]
    async fn test_same_weekday_books_next_week() {
        let clinic = Clinic::default();
        let (_doctor, ada) = clinic.sign_up("ada@clinic.test", "Dr. Ada", Role::Practitioner).await.unwrap();
        let (patient, _) = clinic.sign_up("pat@clinic.test", "Pat", Role::Patient).await.unwrap();

        let mut request = monday_with(ada.id());
        request.day = "Wed".to_string();
        let booked = patient.client.create_appointment(request).await.unwrap();
        assert_eq!(booked.date, "2024-01-10");
    }

    #[tokio::test]
    async fn test_booking_validation_writes_nothing() {
        let clinic = Clinic::default();
        let (_doctor, ada) = clinic.sign_up("ada@clinic.test", "Dr. Ada", Role::Practitioner).await.unwrap();
        let (patient, pat) = clinic.sign_up("pat@clinic.test", "Pat", Role::Patient).await.unwrap();

        let mut bad_day = monday_with(ada.id());
        bad_day.day = "Someday".to_string();
        let err = patient.client.create_appointment(bad_day).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::ValidationRejected);

        // Booking with another patient as the practitioner
        let err = patient
            .client
            .create_appointment(monday_with(pat.id()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::ValidationRejected);

        assert!(clinic.store.rows(Collection::Appointments).await.is_empty());
        assert!(patient.client.appointment_cache().is_empty());
    }

    #[tokio::test]
    async fn test_confirmation_reaches_patient() {
        let clinic = Clinic::default();
        let (doctor, ada) = clinic.sign_up("ada@clinic.test", "Dr. Ada", Role::Practitioner).await.unwrap();
        let (patient, _) = clinic.sign_up("pat@clinic.test", "Pat", Role::Patient).await.unwrap();
        let booked = patient.client.create_appointment(monday_with(ada.id())).await.unwrap();

        let confirmed = doctor
            .client
            .update_appointment_status(&booked.id, AppointmentStatus::Confirmed)
            .await
            .unwrap();
        assert_eq!(confirmed.status, AppointmentStatus::Confirmed);

        let mut rx = patient.client.appointments();
        assert!(settle(&mut rx, |a| a.iter().any(|v| v.status == AppointmentStatus::Confirmed)).await);
        assert_eq!(patient.client.appointment_cache().len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_is_terminal_and_completed_cannot_cancel() {
        let clinic = Clinic::default();
        let (doctor, ada) = clinic.sign_up("ada@clinic.test", "Dr. Ada", Role::Practitioner).await.unwrap();
        let (patient, _) = clinic.sign_up("pat@clinic.test", "Pat", Role::Patient).await.unwrap();

        let pending = patient.client.create_appointment(monday_with(ada.id())).await.unwrap();
        let cancelled = patient.client.cancel_appointment(&pending.id).await.unwrap();
        assert_eq!(cancelled.status, AppointmentStatus::Cancelled);
        // Re-applying is a no-op, moving on is rejected
        assert!(patient.client.cancel_appointment(&pending.id).await.is_ok());
        let err = doctor
            .client
            .update_appointment_status(&pending.id, AppointmentStatus::Confirmed)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::ValidationRejected);

        let done = patient.client.create_appointment(monday_with(ada.id())).await.unwrap();
        doctor
            .client
            .update_appointment_status(&done.id, AppointmentStatus::Confirmed)
            .await
            .unwrap();
        doctor
            .client
            .update_appointment_status(&done.id, AppointmentStatus::Completed)
            .await
            .unwrap();
        let err = patient.client.cancel_appointment(&done.id).await.unwrap_err();
        assert_eq!(
            err,
            SyncError::ValidationRejected("Appointment cannot move from Completed to Cancelled".into())
        );
    }

    #[tokio::test]
    async fn test_racing_status_writes_keep_one_terminal_state() {
        let clinic = Clinic::default();
        let (doctor, ada) = clinic.sign_up("ada@clinic.test", "Dr. Ada", Role::Practitioner).await.unwrap();
        let (patient, _) = clinic.sign_up("pat@clinic.test", "Pat", Role::Patient).await.unwrap();
        let booked = patient.client.create_appointment(monday_with(ada.id())).await.unwrap();
        doctor
            .client
            .update_appointment_status(&booked.id, AppointmentStatus::Confirmed)
            .await
            .unwrap();

        // Whichever write reaches the store first is held back
        clinic
            .store
            .delay_next(Collection::Appointments, StoreOp::Update, Duration::from_millis(50))
            .await;
        let (completed, cancelled) = tokio::join!(
            doctor
                .client
                .update_appointment_status(&booked.id, AppointmentStatus::Completed),
            patient.client.cancel_appointment(&booked.id),
        );
        let (winner, err) = match (completed, cancelled) {
            (Ok(view), Err(e)) | (Err(e), Ok(view)) => (view, e),
            (a, b) => panic!("expected exactly one write to land, got {:?} and {:?}", a, b),
        };
        assert_eq!(err.kind(), FailureKind::ValidationRejected);
        assert!(winner.status.is_terminal());

        let rows = clinic.store.rows(Collection::Appointments).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].text("status"), winner.status.as_str());
    }

    #[tokio::test]
    async fn test_failed_status_write_leaves_cache() {
        let clinic = Clinic::default();
        let (doctor, ada) = clinic.sign_up("ada@clinic.test", "Dr. Ada", Role::Practitioner).await.unwrap();
        let (patient, _) = clinic.sign_up("pat@clinic.test", "Pat", Role::Patient).await.unwrap();
        let booked = patient.client.create_appointment(monday_with(ada.id())).await.unwrap();
        let mut rx = doctor.client.appointments();
        assert!(settle(&mut rx, |a| a.len() == 1).await);

        clinic
            .store
            .fail_next(
                Collection::Appointments,
                StoreOp::Update,
                SyncError::TransientTransport("connection reset".into()),
            )
            .await;
        let err = doctor
            .client
            .update_appointment_status(&booked.id, AppointmentStatus::Confirmed)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(
            doctor.client.appointment_cache().get(&booked.id).unwrap().status,
            AppointmentStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_reschedule_by_weekday() {
        let clinic = Clinic::default();
        let (_doctor, ada) = clinic.sign_up("ada@clinic.test", "Dr. Ada", Role::Practitioner).await.unwrap();
        let (patient, _) = clinic.sign_up("pat@clinic.test", "Pat", Role::Patient).await.unwrap();
        let booked = patient.client.create_appointment(monday_with(ada.id())).await.unwrap();

        let moved = patient
            .client
            .update_appointment(
                &booked.id,
                AppointmentChanges {
                    day: Some("Fri".into()),
                    time: Some("02:00 PM".into()),
                    notes: Some("knee pain".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(moved.date, "2024-01-05");
        assert_eq!(moved.time, "02:00 PM");
        assert_eq!(moved.notes, "knee pain");
        assert_eq!(moved.practitioner_name, "Dr. Ada");
        assert_eq!(patient.client.appointment_cache().get(&booked.id).unwrap(), moved);

        patient.client.cancel_appointment(&booked.id).await.unwrap();
        let err = patient
            .client
            .update_appointment(
                &booked.id,
                AppointmentChanges {
                    day: Some("Tue".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::ValidationRejected);
    }

    #[tokio::test]
    async fn test_reschedule_by_date_keeps_day_label() {
        let clinic = Clinic::default();
        let (_doctor, ada) = clinic.sign_up("ada@clinic.test", "Dr. Ada", Role::Practitioner).await.unwrap();
        let (patient, _) = clinic.sign_up("pat@clinic.test", "Pat", Role::Patient).await.unwrap();
        let booked = patient.client.create_appointment(monday_with(ada.id())).await.unwrap();

        let moved = patient
            .client
            .update_appointment(
                &booked.id,
                AppointmentChanges {
                    date: Some("2024-01-12".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(moved.date, "2024-01-12");
        assert_eq!(moved.day, "Fri");

        // 2024-01-16 is a Tuesday
        let err = patient
            .client
            .update_appointment(
                &booked.id,
                AppointmentChanges {
                    date: Some("2024-01-16".into()),
                    day: Some("Mon".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(
            err,
            SyncError::ValidationRejected("Appointment date 2024-01-16 falls on Tue, not Mon".into())
        );
        let rows = clinic.store.rows(Collection::Appointments).await;
        assert_eq!(rows[0].text("date"), "2024-01-12");
        assert_eq!(rows[0].text("day"), "Fri");
    }

    #[tokio::test]
    async fn test_delete_removes_everywhere() {
        let clinic = Clinic::default();
        let (doctor, ada) = clinic.sign_up("ada@clinic.test", "Dr. Ada", Role::Practitioner).await.unwrap();
        let (patient, _) = clinic.sign_up("pat@clinic.test", "Pat", Role::Patient).await.unwrap();
        let booked = patient.client.create_appointment(monday_with(ada.id())).await.unwrap();
        let convo = patient.client.open_conversation(&booked.id).await.unwrap();
        convo.send_message("see you monday").await.unwrap();

        let mut rx = doctor.client.appointments();
        assert!(settle(&mut rx, |a| a.len() == 1).await);
        patient.client.delete_appointment(&booked.id).await.unwrap();
        assert!(patient.client.appointment_cache().is_empty());
        assert!(settle(&mut rx, |a| a.is_empty()).await);
        assert_eq!(
            clinic
                .store
                .count(Collection::Messages, &Filter::eq("appointment_id", booked.id.as_str()))
                .await,
            0
        );
    }

    #[tokio::test]
    async fn test_outsider_cannot_touch_appointment() {
        let clinic = Clinic::default();
        let (_doctor, ada) = clinic.sign_up("ada@clinic.test", "Dr. Ada", Role::Practitioner).await.unwrap();
        let (patient, _) = clinic.sign_up("pat@clinic.test", "Pat", Role::Patient).await.unwrap();
        let (other, _) = clinic.sign_up("sam@clinic.test", "Sam", Role::Patient).await.unwrap();
        let booked = patient.client.create_appointment(monday_with(ada.id())).await.unwrap();

        let err = other.client.cancel_appointment(&booked.id).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::ValidationRejected);
        drain().await;
        assert!(other.client.appointment_cache().is_empty());
    }

    #[tokio::test]
    async fn test_practitioner_dashboard_counts() {
        let clinic = Clinic::default();
        let (doctor, ada) = clinic.sign_up("ada@clinic.test", "Dr. Ada", Role::Practitioner).await.unwrap();
        let (patient, _) = clinic.sign_up("pat@clinic.test", "Pat", Role::Patient).await.unwrap();

        let mut ids = Vec::new();
        for _ in 0..4 {
            ids.push(patient.client.create_appointment(monday_with(ada.id())).await.unwrap().id);
        }
        let mut rx = doctor.client.appointments();
        assert!(settle(&mut rx, |a| a.len() == 4).await);

        let c = &doctor.client;
        c.update_appointment_status(&ids[1], AppointmentStatus::Confirmed).await.unwrap();
        c.update_appointment_status(&ids[2], AppointmentStatus::Confirmed).await.unwrap();
        c.update_appointment_status(&ids[2], AppointmentStatus::Completed).await.unwrap();
        c.update_appointment_status(&ids[3], AppointmentStatus::Cancelled).await.unwrap();

        let stats = c.practitioner_stats().unwrap();
        assert_eq!(stats.total, 4);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.confirmed, 1);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.cancelled, 1);
        assert_eq!(stats.upcoming_this_week, 2);
        assert_eq!(stats.unique_patients, 1);

        let mut rx = patient.client.appointments();
        assert!(settle(&mut rx, |a| a.iter().any(|v| v.status == AppointmentStatus::Completed)).await);
        assert!(settle(&mut rx, |a| a.iter().any(|v| v.status == AppointmentStatus::Cancelled)).await);
        let mine = patient.client.patient_stats().unwrap();
        assert_eq!(mine.total, 4);
        assert_eq!(mine.upcoming, 2);
        assert_eq!(mine.completed, 1);
        assert_eq!(mine.cancelled, 1);
        assert_eq!(mine.pending, 1);
        assert!(patient.client.practitioner_stats().is_err());
    }
}
