//! Record Mappers
//!
//! Conversion between storage rows and view records. Mapping is total: a
//! malformed row yields a best-effort partial view and never an error.
//! Each mapper declares the relations that must be inlined before
//! [`RecordMapper::to_view`] can fill its denormalized fields.

use serde_json::{json, Value};

use carelink_shared::{Collection, RecordId, Relation, Row, RowExt};

use crate::availability::{group_by_day, FlatSlot};
use crate::entries::*;
use crate::stats::{rating_stats, UNREVIEWED_RATING};
use crate::status::{AppointmentStatus, PrescriptionStatus};

pub const ANONYMOUS_REVIEWER: &str = "Anonymous";
pub const UNKNOWN_PRACTITIONER: &str = "Unknown Doctor";
pub const DEFAULT_SPECIALTY: &str = "General Practitioner";
pub const DEFAULT_LOCATION: &str = "Clinic";
pub const DEFAULT_EXPERIENCE: &str = "Experienced";
pub const DEFAULT_LANGUAGE: &str = "English";

/// A view record addressable by id inside a local cache
pub trait CacheRecord {
    fn record_id(&self) -> &RecordId;
}

/// Bidirectional mapping for one collection
pub trait RecordMapper: Send + Sync + 'static {
    type View: CacheRecord + Clone + PartialEq + Send + Sync + 'static;

    const COLLECTION: Collection;

    /// Relations inlined on every read of this collection
    const EXPAND: &'static [Relation] = &[];

    fn to_view(row: &Row) -> Self::View;

    fn to_storage(view: &Self::View) -> Row;
}

// ============================================================================
// Relations
// ============================================================================

pub const APPOINTMENT_PRACTITIONER: Relation = Relation {
    alias: "practitioner",
    foreign_key: "practitioner_id",
    target: Collection::Accounts,
    columns: &["name", "email"],
};

pub const APPOINTMENT_PATIENT: Relation = Relation {
    alias: "patient",
    foreign_key: "patient_id",
    target: Collection::Accounts,
    columns: &["name", "email"],
};

pub const MESSAGE_SENDER: Relation = Relation {
    alias: "sender",
    foreign_key: "sender_id",
    target: Collection::Accounts,
    columns: &["name", "email"],
};

pub const REVIEW_PATIENT: Relation = Relation {
    alias: "patient",
    foreign_key: "patient_id",
    target: Collection::Accounts,
    columns: &["name"],
};

pub const PROFILE_USER: Relation = Relation {
    alias: "user",
    foreign_key: "user_id",
    target: Collection::Accounts,
    columns: &["name", "email"],
};

// ============================================================================
// Helpers
// ============================================================================

fn object(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        _ => Row::new(),
    }
}

/// Copy store-assigned columns back only when the view carries them
fn put_assigned(row: &mut Row, column: &str, value: &str) {
    if !value.is_empty() {
        row.insert(column.to_string(), Value::String(value.to_string()));
    }
}

fn related_text(row: &Row, alias: &str, column: &str) -> String {
    row.relation(alias).map(|r| r.text(column)).unwrap_or_default()
}

fn date_part(timestamp: &str) -> String {
    timestamp.get(..10).unwrap_or(timestamp).to_string()
}

fn or_default(value: String, fallback: &str) -> String {
    if value.trim().is_empty() {
        fallback.to_string()
    } else {
        value
    }
}

fn rating_of(row: &Row) -> u8 {
    row.integer("rating")
        .and_then(|r| u8::try_from(r).ok())
        .unwrap_or(0)
}

fn medications_of(row: &Row) -> Vec<Medication> {
    match row.get("medications") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| serde_json::from_value(item.clone()).ok())
            .collect(),
        _ => Vec::new(),
    }
}

// ============================================================================
// Accounts
// ============================================================================

pub struct AccountMapper;

impl CacheRecord for AccountView {
    fn record_id(&self) -> &RecordId {
        &self.id
    }
}

impl RecordMapper for AccountMapper {
    type View = AccountView;
    const COLLECTION: Collection = Collection::Accounts;

    fn to_view(row: &Row) -> AccountView {
        AccountView {
            id: row.record_id(Collection::Accounts),
            email: row.text("email"),
            name: row.text("name"),
            role: Role::parse(&row.text("role")).unwrap_or_default(),
            created_at: row.text("created_at"),
        }
    }

    fn to_storage(view: &AccountView) -> Row {
        let mut row = object(json!({
            "email": view.email,
            "name": view.name,
            "role": view.role.as_str(),
        }));
        put_assigned(&mut row, "id", view.id.as_str());
        put_assigned(&mut row, "created_at", &view.created_at);
        row
    }
}

// ============================================================================
// Practitioner Profiles
// ============================================================================

pub struct PractitionerProfileMapper;

impl CacheRecord for PractitionerProfileView {
    fn record_id(&self) -> &RecordId {
        &self.user_id
    }
}

impl RecordMapper for PractitionerProfileMapper {
    type View = PractitionerProfileView;
    const COLLECTION: Collection = Collection::PractitionerProfiles;
    const EXPAND: &'static [Relation] = &[PROFILE_USER];

    /// Availability lives in its own collection and is attached by the caller
    fn to_view(row: &Row) -> PractitionerProfileView {
        PractitionerProfileView {
            user_id: row.record_id(Collection::PractitionerProfiles),
            specialty: row.text("specialty"),
            bio: row.text("bio"),
            education: row.text("education"),
            experience: row.text("experience"),
            languages: row.text_list("languages"),
            about: row.text("about"),
            clinic_address: row.text("clinic_address"),
            profile_pic: row.opt_text("profile_pic"),
            banner_image: row.opt_text("banner_image"),
            clinic_map_url: row.opt_text("clinic_map_url"),
            availability: Vec::new(),
        }
    }

    fn to_storage(view: &PractitionerProfileView) -> Row {
        object(json!({
            "user_id": view.user_id,
            "specialty": view.specialty,
            "bio": view.bio,
            "education": view.education,
            "experience": view.experience,
            "languages": view.languages,
            "about": view.about,
            "clinic_address": view.clinic_address,
            "profile_pic": view.profile_pic,
            "banner_image": view.banner_image,
            "clinic_map_url": view.clinic_map_url,
        }))
    }
}

// ============================================================================
// Availability
// ============================================================================

pub struct AvailabilityMapper;

impl CacheRecord for AvailabilitySlotView {
    fn record_id(&self) -> &RecordId {
        &self.id
    }
}

impl RecordMapper for AvailabilityMapper {
    type View = AvailabilitySlotView;
    const COLLECTION: Collection = Collection::AvailabilitySlots;

    fn to_view(row: &Row) -> AvailabilitySlotView {
        AvailabilitySlotView {
            id: row.record_id(Collection::AvailabilitySlots),
            practitioner_id: RecordId::new(row.text("practitioner_id")),
            day: row.text("day"),
            start_time: row.text("start_time"),
            end_time: row.text("end_time"),
        }
    }

    fn to_storage(view: &AvailabilitySlotView) -> Row {
        let mut row = object(json!({
            "practitioner_id": view.practitioner_id,
            "day": view.day,
            "start_time": view.start_time,
            "end_time": view.end_time,
        }));
        put_assigned(&mut row, "id", view.id.as_str());
        row
    }
}

// ============================================================================
// Appointments
// ============================================================================

pub struct AppointmentMapper;

impl CacheRecord for AppointmentView {
    fn record_id(&self) -> &RecordId {
        &self.id
    }
}

impl RecordMapper for AppointmentMapper {
    type View = AppointmentView;
    const COLLECTION: Collection = Collection::Appointments;
    const EXPAND: &'static [Relation] = &[APPOINTMENT_PRACTITIONER, APPOINTMENT_PATIENT];

    fn to_view(row: &Row) -> AppointmentView {
        AppointmentView {
            id: row.record_id(Collection::Appointments),
            practitioner_id: RecordId::new(row.text("practitioner_id")),
            practitioner_name: related_text(row, "practitioner", "name"),
            patient_id: RecordId::new(row.text("patient_id")),
            patient_name: related_text(row, "patient", "name"),
            patient_email: related_text(row, "patient", "email"),
            date: row.text("date"),
            day: row.text("day"),
            time: row.text("time"),
            consultation_type: row.text("type"),
            reason: row.text("reason"),
            status: AppointmentStatus::parse(&row.text("status")).unwrap_or_default(),
            created_at: row.text("created_at"),
            notes: row.text("notes"),
        }
    }

    fn to_storage(view: &AppointmentView) -> Row {
        let mut row = object(json!({
            "practitioner_id": view.practitioner_id,
            "patient_id": view.patient_id,
            "date": view.date,
            "day": view.day,
            "time": view.time,
            "type": view.consultation_type,
            "reason": view.reason,
            "status": view.status.as_str(),
            "notes": view.notes,
        }));
        put_assigned(&mut row, "id", view.id.as_str());
        put_assigned(&mut row, "created_at", &view.created_at);
        row
    }
}

// ============================================================================
// Messages
// ============================================================================

pub struct MessageMapper;

impl CacheRecord for MessageView {
    fn record_id(&self) -> &RecordId {
        &self.id
    }
}

impl RecordMapper for MessageMapper {
    type View = MessageView;
    const COLLECTION: Collection = Collection::Messages;
    const EXPAND: &'static [Relation] = &[MESSAGE_SENDER];

    fn to_view(row: &Row) -> MessageView {
        MessageView {
            id: row.record_id(Collection::Messages),
            appointment_id: RecordId::new(row.text("appointment_id")),
            sender_id: RecordId::new(row.text("sender_id")),
            sender_name: related_text(row, "sender", "name"),
            sender_email: related_text(row, "sender", "email"),
            text: row.text("text"),
            timestamp: row.text("created_at"),
            read: row.flag("read"),
        }
    }

    fn to_storage(view: &MessageView) -> Row {
        let mut row = object(json!({
            "appointment_id": view.appointment_id,
            "sender_id": view.sender_id,
            "text": view.text,
            "read": view.read,
        }));
        put_assigned(&mut row, "id", view.id.as_str());
        put_assigned(&mut row, "created_at", &view.timestamp);
        row
    }
}

// ============================================================================
// Reviews
// ============================================================================

pub struct ReviewMapper;

impl CacheRecord for ReviewView {
    fn record_id(&self) -> &RecordId {
        &self.id
    }
}

impl RecordMapper for ReviewMapper {
    type View = ReviewView;
    const COLLECTION: Collection = Collection::Reviews;
    const EXPAND: &'static [Relation] = &[REVIEW_PATIENT];

    fn to_view(row: &Row) -> ReviewView {
        ReviewView {
            id: row.record_id(Collection::Reviews),
            practitioner_id: RecordId::new(row.text("practitioner_id")),
            patient_id: RecordId::new(row.text("patient_id")),
            patient_name: or_default(related_text(row, "patient", "name"), ANONYMOUS_REVIEWER),
            rating: rating_of(row),
            comment: row.text("comment"),
            date: date_part(&row.text("created_at")),
        }
    }

    /// `date` is a display projection of `created_at` and is not written back
    fn to_storage(view: &ReviewView) -> Row {
        let mut row = object(json!({
            "practitioner_id": view.practitioner_id,
            "patient_id": view.patient_id,
            "rating": view.rating,
            "comment": view.comment,
        }));
        put_assigned(&mut row, "id", view.id.as_str());
        row
    }
}

// ============================================================================
// Prescriptions
// ============================================================================

pub struct PrescriptionMapper;

impl CacheRecord for PrescriptionView {
    fn record_id(&self) -> &RecordId {
        &self.id
    }
}

impl RecordMapper for PrescriptionMapper {
    type View = PrescriptionView;
    const COLLECTION: Collection = Collection::Prescriptions;
    const EXPAND: &'static [Relation] = &[APPOINTMENT_PRACTITIONER, APPOINTMENT_PATIENT];

    fn to_view(row: &Row) -> PrescriptionView {
        PrescriptionView {
            id: row.record_id(Collection::Prescriptions),
            appointment_id: RecordId::new(row.text("appointment_id")),
            practitioner_id: RecordId::new(row.text("practitioner_id")),
            practitioner_name: related_text(row, "practitioner", "name"),
            patient_id: RecordId::new(row.text("patient_id")),
            patient_name: related_text(row, "patient", "name"),
            patient_email: related_text(row, "patient", "email"),
            medications: medications_of(row),
            issued_at: row.text("created_at"),
            status: PrescriptionStatus::parse(&row.text("status")).unwrap_or_default(),
            notes: row.text("notes"),
        }
    }

    fn to_storage(view: &PrescriptionView) -> Row {
        let mut row = object(json!({
            "appointment_id": view.appointment_id,
            "practitioner_id": view.practitioner_id,
            "patient_id": view.patient_id,
            "medications": view.medications,
            "status": view.status.as_str(),
            "notes": view.notes,
        }));
        put_assigned(&mut row, "id", view.id.as_str());
        put_assigned(&mut row, "created_at", &view.issued_at);
        row
    }
}

// ============================================================================
// Practitioner Directory
// ============================================================================

impl CacheRecord for PractitionerView {
    fn record_id(&self) -> &RecordId {
        &self.id
    }
}

/// Builds directory entries from a profile row (expanded with
/// [`PROFILE_USER`]), that practitioner's slots and review ratings
pub struct DirectoryMapper;

impl DirectoryMapper {
    pub fn compose(profile: &Row, slots: &[FlatSlot], ratings: &[u8]) -> PractitionerView {
        let view = PractitionerProfileMapper::to_view(profile);
        let stats = rating_stats(ratings, UNREVIEWED_RATING, 0);
        let languages = match profile.get("languages") {
            None | Some(Value::Null) => vec![DEFAULT_LANGUAGE.to_string()],
            Some(_) => view.languages,
        };

        PractitionerView {
            id: view.user_id,
            name: or_default(related_text(profile, "user", "name"), UNKNOWN_PRACTITIONER),
            specialty: or_default(view.specialty, DEFAULT_SPECIALTY),
            location: or_default(view.clinic_address.clone(), DEFAULT_LOCATION),
            rating: stats.rating,
            reviews: stats.count,
            bio: view.bio,
            education: view.education,
            experience: or_default(view.experience, DEFAULT_EXPERIENCE),
            languages,
            about: view.about,
            clinic_address: view.clinic_address,
            availability: group_by_day(slots),
            profile_pic: view.profile_pic,
            banner_image: view.banner_image,
            clinic_map_url: view.clinic_map_url,
        }
    }
}
