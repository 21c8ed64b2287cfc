//! Conversation Scenario Tests
//!
//! Message exchange between the two parties of an appointment, read
//! receipts and duplicate suppression under re-delivered feed events.

#[cfg(test)]
mod tests {
    use crate::harness::{drain, settle, Clinic, Device};
    use carelink_shared::{Collection, FailureKind, RowExt, SyncError};
    use carelink_sync::{AppointmentRequest, ChangeEvent, ChangeKind, StoreOp};
    use carelink_sync_integrity::{AppointmentView, Role};

    async fn booked_pair(clinic: &Clinic) -> (Device, Device, AppointmentView) {
        let (doctor, ada) = clinic.sign_up("ada@clinic.test", "Dr. Ada", Role::Practitioner).await.unwrap();
        let (patient, _) = clinic.sign_up("pat@clinic.test", "Pat", Role::Patient).await.unwrap();
        let booked = patient
            .client
            .create_appointment(AppointmentRequest {
                practitioner_id: ada.id().clone(),
                day: "Mon".into(),
                time: "09:00 AM".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        (doctor, patient, booked)
    }

    #[tokio::test]
    async fn test_exchange_and_read_receipts() {
        let clinic = Clinic::default();
        let (doctor, patient, booked) = booked_pair(&clinic).await;
        let mine = patient.client.open_conversation(&booked.id).await.unwrap();
        let theirs = doctor.client.open_conversation(&booked.id).await.unwrap();

        mine.send_message("Is fasting needed?").await.unwrap();
        let mut rx = theirs.subscribe();
        assert!(settle(&mut rx, |m| m.len() == 1).await);
        assert_eq!(theirs.unread_count(), 1);
        assert_eq!(theirs.messages()[0].sender_name, "Pat");

        assert_eq!(theirs.mark_as_read().await.unwrap(), 1);
        assert_eq!(theirs.unread_count(), 0);

        let mut rx = mine.subscribe();
        assert!(settle(&mut rx, |m| m.len() == 1 && m[0].read).await);

        theirs.send_message("Yes, from midnight.").await.unwrap();
        assert!(settle(&mut rx, |m| m.len() == 2).await);
        assert_eq!(mine.unread_count(), 1);
        assert_eq!(mine.messages()[1].sender_name, "Dr. Ada");
    }

    #[tokio::test]
    async fn test_failed_history_load_still_receives_new_messages() {
        let clinic = Clinic::default();
        let (doctor, patient, booked) = booked_pair(&clinic).await;
        let theirs = doctor.client.open_conversation(&booked.id).await.unwrap();
        theirs.send_message("Please bring your referral.").await.unwrap();

        clinic
            .store
            .fail_next(
                Collection::Messages,
                StoreOp::Fetch,
                SyncError::TransientTransport("connection reset".into()),
            )
            .await;
        let mine = patient.client.open_conversation(&booked.id).await.unwrap();
        assert!(mine.messages().is_empty());

        theirs.send_message("And your insurance card.").await.unwrap();
        let mut rx = mine.subscribe();
        assert!(settle(&mut rx, |m| m.len() == 1).await);
        assert_eq!(mine.messages()[0].text, "And your insurance card.");
        assert_eq!(mine.unread_count(), 1);
    }

    #[tokio::test]
    async fn test_redelivered_event_keeps_one_entry() {
        let clinic = Clinic::default();
        let (_doctor, patient, booked) = booked_pair(&clinic).await;
        let convo = patient.client.open_conversation(&booked.id).await.unwrap();
        let sent = convo.send_message("hello").await.unwrap();

        let stored = clinic.store.rows(Collection::Messages).await.remove(0);
        let event = ChangeEvent {
            collection: Collection::Messages,
            kind: ChangeKind::Insert,
            record_id: stored.record_id(Collection::Messages),
            new_values: Some(stored.clone()),
            old_values: None,
        };
        clinic.store.feed().publish(event.clone());
        clinic.store.feed().publish(event);
        drain().await;

        let messages = convo.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, sent.id);
    }

    #[tokio::test]
    async fn test_conversations_are_scoped_to_appointment() {
        let clinic = Clinic::default();
        let (doctor, patient, first) = booked_pair(&clinic).await;
        let second = patient
            .client
            .create_appointment(AppointmentRequest {
                practitioner_id: first.practitioner_id.clone(),
                day: "Fri".into(),
                time: "02:00 PM".into(),
                ..Default::default()
            })
            .await
            .unwrap();

        let a = patient.client.open_conversation(&first.id).await.unwrap();
        let b = doctor.client.open_conversation(&second.id).await.unwrap();
        a.send_message("about monday").await.unwrap();
        drain().await;
        assert!(b.messages().is_empty());
        assert_eq!(a.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_outsider_cannot_open_conversation() {
        let clinic = Clinic::default();
        let (_doctor, _patient, booked) = booked_pair(&clinic).await;
        let (other, _) = clinic.sign_up("sam@clinic.test", "Sam", Role::Patient).await.unwrap();
        let err = other.client.open_conversation(&booked.id).await.err().unwrap();
        assert_eq!(err.kind(), FailureKind::ValidationRejected);
    }

    #[tokio::test]
    async fn test_signed_out_device_cannot_open() {
        let clinic = Clinic::default();
        let (_doctor, patient, booked) = booked_pair(&clinic).await;
        patient.client.logout().await.unwrap();
        let err = patient.client.open_conversation(&booked.id).await.err().unwrap();
        assert_eq!(err.kind(), FailureKind::NotAuthenticated);
    }
}
