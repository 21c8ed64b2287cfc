//! Collection identities and storage constraints
//!
//! Each collection in the authoritative store is named here together with the
//! column constraints the store enforces on write.

use derive_more::{Display, From};
use serde::{Deserialize, Serialize};

// ============================================================================
// Collections
// ============================================================================

/// Relational collections held by the authoritative store
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Accounts,
    PractitionerProfiles,
    AvailabilitySlots,
    Appointments,
    Messages,
    Reviews,
    Prescriptions,
}

/// Column that must reference an existing row of another collection
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ForeignKey {
    pub column: &'static str,
    pub target: Collection,
}

const ACCOUNT_FKS: &[ForeignKey] = &[];
const PROFILE_FKS: &[ForeignKey] = &[ForeignKey {
    column: "user_id",
    target: Collection::Accounts,
}];
const SLOT_FKS: &[ForeignKey] = &[ForeignKey {
    column: "practitioner_id",
    target: Collection::Accounts,
}];
const APPOINTMENT_FKS: &[ForeignKey] = &[
    ForeignKey {
        column: "practitioner_id",
        target: Collection::Accounts,
    },
    ForeignKey {
        column: "patient_id",
        target: Collection::Accounts,
    },
];
const MESSAGE_FKS: &[ForeignKey] = &[
    ForeignKey {
        column: "appointment_id",
        target: Collection::Appointments,
    },
    ForeignKey {
        column: "sender_id",
        target: Collection::Accounts,
    },
];
const REVIEW_FKS: &[ForeignKey] = &[
    ForeignKey {
        column: "practitioner_id",
        target: Collection::Accounts,
    },
    ForeignKey {
        column: "patient_id",
        target: Collection::Accounts,
    },
];
const PRESCRIPTION_FKS: &[ForeignKey] = &[
    ForeignKey {
        column: "appointment_id",
        target: Collection::Appointments,
    },
    ForeignKey {
        column: "practitioner_id",
        target: Collection::Accounts,
    },
    ForeignKey {
        column: "patient_id",
        target: Collection::Accounts,
    },
];

impl Collection {
    pub const ALL: [Collection; 7] = [
        Collection::Accounts,
        Collection::PractitionerProfiles,
        Collection::AvailabilitySlots,
        Collection::Appointments,
        Collection::Messages,
        Collection::Reviews,
        Collection::Prescriptions,
    ];

    /// Table name in the authoritative store
    pub fn table_name(&self) -> &'static str {
        match self {
            Collection::Accounts => "accounts",
            Collection::PractitionerProfiles => "practitioner_profiles",
            Collection::AvailabilitySlots => "availability_slots",
            Collection::Appointments => "appointments",
            Collection::Messages => "messages",
            Collection::Reviews => "reviews",
            Collection::Prescriptions => "prescriptions",
        }
    }

    /// Column carrying the row identity.
    ///
    /// Practitioner profiles are a 1:1 extension of an account and are
    /// addressed by the owning account id.
    pub fn key_column(&self) -> &'static str {
        match self {
            Collection::PractitionerProfiles => "user_id",
            _ => "id",
        }
    }

    /// Columns whose values must be unique across the collection
    pub fn unique_columns(&self) -> &'static [&'static str] {
        match self {
            Collection::Accounts => &["id", "email"],
            Collection::PractitionerProfiles => &["user_id"],
            _ => &["id"],
        }
    }

    /// Columns that must be present, non-null and non-empty on insert
    pub fn required_columns(&self) -> &'static [&'static str] {
        match self {
            Collection::Accounts => &["id", "email", "role"],
            Collection::PractitionerProfiles => &["user_id"],
            Collection::AvailabilitySlots => &["practitioner_id", "day", "start_time", "end_time"],
            Collection::Appointments => &[
                "practitioner_id",
                "patient_id",
                "date",
                "day",
                "time",
                "status",
            ],
            Collection::Messages => &["appointment_id", "sender_id", "text"],
            Collection::Reviews => &["practitioner_id", "patient_id", "rating"],
            Collection::Prescriptions => &[
                "appointment_id",
                "practitioner_id",
                "patient_id",
                "status",
            ],
        }
    }

    pub fn foreign_keys(&self) -> &'static [ForeignKey] {
        match self {
            Collection::Accounts => ACCOUNT_FKS,
            Collection::PractitionerProfiles => PROFILE_FKS,
            Collection::AvailabilitySlots => SLOT_FKS,
            Collection::Appointments => APPOINTMENT_FKS,
            Collection::Messages => MESSAGE_FKS,
            Collection::Reviews => REVIEW_FKS,
            Collection::Prescriptions => PRESCRIPTION_FKS,
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.table_name())
    }
}

// ============================================================================
// Record Identity
// ============================================================================

/// Identity of a row, as stored in its key column
#[derive(
    Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, From,
)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    pub fn new(id: impl Into<String>) -> Self {
        RecordId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for RecordId {
    fn from(id: &str) -> Self {
        RecordId(id.to_string())
    }
}

// ============================================================================
// Relation Expansion
// ============================================================================

/// A related row to inline under `alias` when reading a collection.
///
/// `foreign_key` is read from the source row and matched against the key
/// column of `target`; only `columns` are copied into the inlined object.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Relation {
    pub alias: &'static str,
    pub foreign_key: &'static str,
    pub target: Collection,
    pub columns: &'static [&'static str],
}
