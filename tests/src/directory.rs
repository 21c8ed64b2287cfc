//! Directory Scenario Tests
//!
//! Practitioner entries appearing live, review aggregates and the
//! rating helper over the review cache.

#[cfg(test)]
mod tests {
    use crate::harness::{settle, Clinic};
    use carelink_shared::{Collection, FailureKind, RecordId};
    use carelink_sync_integrity::{Role, DEFAULT_LOCATION, DEFAULT_SPECIALTY};

    #[tokio::test]
    async fn test_new_practitioner_appears_with_grouped_availability() {
        let clinic = Clinic::default();
        let (patient, _) = clinic.sign_up("pat@clinic.test", "Pat", Role::Patient).await.unwrap();
        patient.client.start().await;
        assert!(patient.client.directory_cache().is_empty());

        let (_doctor, ada) = clinic.sign_up("ada@clinic.test", "Dr. Ada", Role::Practitioner).await.unwrap();
        let mut rx = patient.client.practitioners();
        assert!(settle(&mut rx, |d| d.len() == 1 && d[0].availability.len() == 3).await);

        let entry = patient.client.directory_cache().get(ada.id()).unwrap();
        assert_eq!(entry.name, "Dr. Ada");
        assert_eq!(entry.specialty, DEFAULT_SPECIALTY);
        assert_eq!(entry.location, DEFAULT_LOCATION);
        assert_eq!(entry.rating, 5.0);
        assert_eq!(entry.reviews, 0);
        assert!(entry.availability.iter().all(|day| day.slots.len() == 2));
    }

    #[tokio::test]
    async fn test_reviews_move_the_directory_rating() {
        let clinic = Clinic::default();
        let (doctor, ada) = clinic.sign_up("ada@clinic.test", "Dr. Ada", Role::Practitioner).await.unwrap();
        let (pat, _) = clinic.sign_up("pat@clinic.test", "Pat", Role::Patient).await.unwrap();
        let (sam, _) = clinic.sign_up("sam@clinic.test", "Sam", Role::Patient).await.unwrap();
        pat.client.start().await;

        pat.client.add_review(ada.id(), 4, "Thorough").await.unwrap();
        let mut rx = pat.client.practitioners();
        assert!(settle(&mut rx, |d| d.first().is_some_and(|e| e.reviews == 1 && e.rating == 4.0)).await);

        sam.client.add_review(ada.id(), 5, "  Kind and clear  ").await.unwrap();
        assert!(settle(&mut rx, |d| d.first().is_some_and(|e| e.reviews == 2 && e.rating == 4.5)).await);

        let mut reviews = pat.client.reviews();
        assert!(settle(&mut reviews, |r| r.len() == 2).await);
        let stats = pat.client.rating_stats(ada.id(), 5.0, 0);
        assert_eq!(stats.rating, 4.5);
        assert_eq!(stats.count, 2);

        let mut theirs = doctor.client.reviews();
        assert!(settle(&mut theirs, |r| r.len() == 2).await);
        assert!(theirs.borrow().iter().any(|r| r.comment == "Kind and clear" && r.patient_name == "Sam"));
    }

    #[tokio::test]
    async fn test_rating_stats_fall_back_to_base_values() {
        let clinic = Clinic::default();
        let (_doctor, ada) = clinic.sign_up("ada@clinic.test", "Dr. Ada", Role::Practitioner).await.unwrap();
        let (pat, _) = clinic.sign_up("pat@clinic.test", "Pat", Role::Patient).await.unwrap();
        let stats = pat.client.rating_stats(ada.id(), 4.8, 120);
        assert_eq!(stats.rating, 4.8);
        assert_eq!(stats.count, 120);
    }

    #[tokio::test]
    async fn test_invalid_reviews_write_nothing() {
        let clinic = Clinic::default();
        let (doctor, ada) = clinic.sign_up("ada@clinic.test", "Dr. Ada", Role::Practitioner).await.unwrap();
        let (pat, _) = clinic.sign_up("pat@clinic.test", "Pat", Role::Patient).await.unwrap();

        let err = pat.client.add_review(ada.id(), 6, "").await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::ValidationRejected);

        let err = doctor.client.add_review(ada.id(), 5, "me").await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::ValidationRejected);

        let stranger = RecordId::new("missing-practitioner");
        assert!(pat.client.add_review(&stranger, 3, "").await.is_err());
        assert!(clinic.store.rows(Collection::Reviews).await.is_empty());
    }
}
