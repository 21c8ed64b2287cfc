//! Payload validation
//!
//! Checks run before any remote write. A rejected payload never reaches the
//! store, so a failed mutation leaves both store and caches untouched.

use chrono::NaiveDate;

use carelink_shared::{SyncError, SyncResult};

use crate::availability::is_weekday_label;
use crate::entries::*;
use crate::status::{AppointmentStatus, PrescriptionStatus};

/// Outcome of a validation check
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Validation {
    Valid,
    Invalid(String),
}

impl Validation {
    pub fn is_valid(&self) -> bool {
        matches!(self, Validation::Valid)
    }

    /// Convert to the sync failure taxonomy
    pub fn into_result(self) -> SyncResult<()> {
        match self {
            Validation::Valid => Ok(()),
            Validation::Invalid(reason) => Err(SyncError::ValidationRejected(reason)),
        }
    }
}

pub fn validate_email(email: &str) -> Validation {
    let Some((local, domain)) = email.split_once('@') else {
        return Validation::Invalid("Email must contain '@'".to_string());
    };
    if local.is_empty() || domain.is_empty() {
        return Validation::Invalid("Email must have a local part and a domain".to_string());
    }
    Validation::Valid
}

pub fn validate_new_account(account: &NewAccount) -> Validation {
    if account.id.is_empty() {
        return Validation::Invalid("Account id cannot be empty".to_string());
    }
    validate_email(&account.email)
}

pub fn validate_new_slot(slot: &NewAvailabilitySlot) -> Validation {
    if !is_weekday_label(&slot.day) {
        return Validation::Invalid(format!("Unknown weekday label '{}'", slot.day));
    }
    if slot.start_time.trim().is_empty() || slot.end_time.trim().is_empty() {
        return Validation::Invalid("Slot must have a start and end time".to_string());
    }
    Validation::Valid
}

pub fn validate_new_appointment(appointment: &NewAppointment) -> Validation {
    if appointment.practitioner_id.is_empty() || appointment.patient_id.is_empty() {
        return Validation::Invalid("Appointment must name a practitioner and a patient".to_string());
    }
    if appointment.practitioner_id == appointment.patient_id {
        return Validation::Invalid("Practitioner and patient must be different accounts".to_string());
    }
    if !is_weekday_label(&appointment.day) {
        return Validation::Invalid(format!("Unknown weekday label '{}'", appointment.day));
    }
    if NaiveDate::parse_from_str(&appointment.date, "%Y-%m-%d").is_err() {
        return Validation::Invalid(format!(
            "Appointment date '{}' must be YYYY-MM-DD",
            appointment.date
        ));
    }
    if appointment.time.trim().is_empty() {
        return Validation::Invalid("Appointment time cannot be empty".to_string());
    }
    if appointment.status != AppointmentStatus::Pending {
        return Validation::Invalid("New appointments must start as Pending".to_string());
    }
    Validation::Valid
}

pub fn validate_appointment_transition(
    from: AppointmentStatus,
    to: AppointmentStatus,
) -> Validation {
    if !from.can_transition_to(to) {
        return Validation::Invalid(format!(
            "Appointment cannot move from {} to {}",
            from, to
        ));
    }
    Validation::Valid
}

pub fn validate_new_message(message: &NewMessage) -> Validation {
    if message.text.trim().is_empty() {
        return Validation::Invalid("Message text cannot be empty".to_string());
    }
    if message.read {
        return Validation::Invalid("New messages start unread".to_string());
    }
    Validation::Valid
}

pub fn validate_new_review(review: &NewReview) -> Validation {
    if !(1..=5).contains(&review.rating) {
        return Validation::Invalid(format!(
            "Rating must be between 1 and 5, got {}",
            review.rating
        ));
    }
    if review.practitioner_id == review.patient_id {
        return Validation::Invalid("Practitioners cannot review themselves".to_string());
    }
    Validation::Valid
}

pub fn validate_new_prescription(prescription: &NewPrescription) -> Validation {
    if prescription.medications.is_empty() {
        return Validation::Invalid("Prescription must list at least one medication".to_string());
    }
    if let Some(position) = prescription
        .medications
        .iter()
        .position(|m| m.drug.trim().is_empty())
    {
        return Validation::Invalid(format!("Medication {} has no drug name", position + 1));
    }
    if prescription.status != PrescriptionStatus::Active {
        return Validation::Invalid("New prescriptions must start as Active".to_string());
    }
    Validation::Valid
}

pub fn validate_prescription_transition(
    from: PrescriptionStatus,
    to: PrescriptionStatus,
) -> Validation {
    if !from.can_transition_to(to) {
        return Validation::Invalid(format!(
            "Prescription cannot move from {} to {}",
            from, to
        ));
    }
    Validation::Valid
}
