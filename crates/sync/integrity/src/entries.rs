//! Entry shapes
//!
//! Two shapes exist per collection:
//! - storage payloads (`New*`), snake_case columns written to the store
//! - view records (`*View`), camelCase, denormalized for the interface layer

use serde::{Deserialize, Serialize};

use carelink_shared::RecordId;

use crate::availability::{DayAvailability, FlatSlot};
use crate::status::{AppointmentStatus, PrescriptionStatus};

pub const DEFAULT_CONSULTATION_TYPE: &str = "In-Person";
pub const DEFAULT_REASON: &str = "General Consultation";

// ============================================================================
// Roles
// ============================================================================

/// Account role
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Patient,
    /// Stored as `practitioner`; legacy rows may say `doctor`
    #[serde(alias = "doctor")]
    Practitioner,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Patient => "patient",
            Role::Practitioner => "practitioner",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "patient" => Some(Role::Patient),
            "practitioner" | "doctor" => Some(Role::Practitioner),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Storage Payloads
// ============================================================================

/// Account row as written at signup or by the repair engine
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewAccount {
    pub id: RecordId,
    pub email: String,
    pub name: String,
    pub role: Role,
}

/// Practitioner profile row; `Default` gives the empty profile used by repair
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NewPractitionerProfile {
    pub user_id: RecordId,
    pub specialty: String,
    pub bio: String,
    pub education: String,
    pub experience: String,
    pub languages: Vec<String>,
    pub about: String,
    pub clinic_address: String,
    pub profile_pic: Option<String>,
    pub banner_image: Option<String>,
    pub clinic_map_url: Option<String>,
}

impl NewPractitionerProfile {
    pub fn empty(user_id: RecordId) -> Self {
        NewPractitionerProfile {
            user_id,
            ..Default::default()
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewAvailabilitySlot {
    pub practitioner_id: RecordId,
    pub day: String,
    pub start_time: String,
    pub end_time: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewAppointment {
    pub practitioner_id: RecordId,
    pub patient_id: RecordId,
    pub date: String,
    pub day: String,
    pub time: String,
    #[serde(rename = "type")]
    pub consultation_type: String,
    pub reason: String,
    pub status: AppointmentStatus,
    pub notes: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewMessage {
    pub appointment_id: RecordId,
    pub sender_id: RecordId,
    pub text: String,
    pub read: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewReview {
    pub practitioner_id: RecordId,
    pub patient_id: RecordId,
    pub rating: u8,
    pub comment: String,
}

/// One line of a prescription
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Medication {
    #[serde(alias = "name")]
    pub drug: String,
    pub dosage: String,
    pub instructions: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewPrescription {
    pub appointment_id: RecordId,
    pub practitioner_id: RecordId,
    pub patient_id: RecordId,
    pub medications: Vec<Medication>,
    pub status: PrescriptionStatus,
    pub notes: String,
}

// ============================================================================
// View Records
// ============================================================================

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountView {
    pub id: RecordId,
    pub email: String,
    pub name: String,
    pub role: Role,
    pub created_at: String,
}

/// Role-specific extension of a practitioner account
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PractitionerProfileView {
    pub user_id: RecordId,
    pub specialty: String,
    pub bio: String,
    pub education: String,
    pub experience: String,
    pub languages: Vec<String>,
    pub about: String,
    pub clinic_address: String,
    pub profile_pic: Option<String>,
    pub banner_image: Option<String>,
    pub clinic_map_url: Option<String>,
    pub availability: Vec<DayAvailability>,
}

/// Role-dependent part of a composite profile
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum RoleProfile {
    Patient,
    Practitioner { profile: PractitionerProfileView },
}

/// Composite profile of the signed-in account
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub account: AccountView,
    pub role_profile: RoleProfile,
}

impl Profile {
    pub fn id(&self) -> &RecordId {
        &self.account.id
    }

    pub fn role(&self) -> Role {
        match self.role_profile {
            RoleProfile::Patient => Role::Patient,
            RoleProfile::Practitioner { .. } => Role::Practitioner,
        }
    }

    pub fn practitioner(&self) -> Option<&PractitionerProfileView> {
        match &self.role_profile {
            RoleProfile::Practitioner { profile } => Some(profile),
            RoleProfile::Patient => None,
        }
    }
}

/// One stored availability row
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilitySlotView {
    pub id: RecordId,
    pub practitioner_id: RecordId,
    pub day: String,
    pub start_time: String,
    pub end_time: String,
}

impl AvailabilitySlotView {
    pub fn to_flat(&self) -> FlatSlot {
        FlatSlot::new(&self.day, &self.start_time, &self.end_time)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentView {
    pub id: RecordId,
    pub practitioner_id: RecordId,
    pub practitioner_name: String,
    pub patient_id: RecordId,
    pub patient_name: String,
    pub patient_email: String,
    pub date: String,
    pub day: String,
    pub time: String,
    #[serde(rename = "type")]
    pub consultation_type: String,
    pub reason: String,
    pub status: AppointmentStatus,
    pub created_at: String,
    pub notes: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub id: RecordId,
    pub appointment_id: RecordId,
    pub sender_id: RecordId,
    pub sender_name: String,
    pub sender_email: String,
    pub text: String,
    pub timestamp: String,
    pub read: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewView {
    pub id: RecordId,
    pub practitioner_id: RecordId,
    pub patient_id: RecordId,
    pub patient_name: String,
    pub rating: u8,
    pub comment: String,
    pub date: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrescriptionView {
    pub id: RecordId,
    pub appointment_id: RecordId,
    pub practitioner_id: RecordId,
    pub practitioner_name: String,
    pub patient_id: RecordId,
    pub patient_name: String,
    pub patient_email: String,
    pub medications: Vec<Medication>,
    pub issued_at: String,
    pub status: PrescriptionStatus,
    pub notes: String,
}

/// Practitioner directory entry: profile, account name, grouped
/// availability and review aggregate in one record
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PractitionerView {
    pub id: RecordId,
    pub name: String,
    pub specialty: String,
    pub location: String,
    /// Average rating to one decimal, 5.0 when unreviewed
    pub rating: f64,
    /// Number of reviews
    pub reviews: u32,
    pub bio: String,
    pub education: String,
    pub experience: String,
    pub languages: Vec<String>,
    pub about: String,
    pub clinic_address: String,
    pub availability: Vec<DayAvailability>,
    pub profile_pic: Option<String>,
    pub banner_image: Option<String>,
    pub clinic_map_url: Option<String>,
}
