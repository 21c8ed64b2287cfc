//! Status state machines
//!
//! Appointment: `Pending -> Confirmed -> Completed`, with `Cancelled`
//! reachable from `Pending` or `Confirmed`. `Completed` and `Cancelled` are
//! both terminal.
//!
//! Prescription: `Active -> Ordered -> Completed`, with `Expired` reachable
//! from any non-terminal state. `Completed` and `Expired` are terminal.
//!
//! Re-applying the current status is always accepted as a no-op so that a
//! replayed status change stays idempotent.

use serde::{Deserialize, Serialize};

// ============================================================================
// Appointment Status
// ============================================================================

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AppointmentStatus {
    #[default]
    Pending,
    Confirmed,
    Completed,
    Cancelled,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "Pending",
            AppointmentStatus::Confirmed => "Confirmed",
            AppointmentStatus::Completed => "Completed",
            AppointmentStatus::Cancelled => "Cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Pending" => Some(AppointmentStatus::Pending),
            "Confirmed" => Some(AppointmentStatus::Confirmed),
            "Completed" => Some(AppointmentStatus::Completed),
            "Cancelled" => Some(AppointmentStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Completed | AppointmentStatus::Cancelled
        )
    }

    /// Pending or confirmed appointments still occupy a slot
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Pending | AppointmentStatus::Confirmed
        )
    }

    pub fn can_transition_to(&self, next: AppointmentStatus) -> bool {
        use AppointmentStatus::*;
        if *self == next {
            return true;
        }
        matches!(
            (self, next),
            (Pending, Confirmed) | (Pending, Cancelled) | (Confirmed, Completed) | (Confirmed, Cancelled)
        )
    }
}

impl std::fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Prescription Status
// ============================================================================

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrescriptionStatus {
    #[default]
    Active,
    Ordered,
    Completed,
    Expired,
}

impl PrescriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrescriptionStatus::Active => "Active",
            PrescriptionStatus::Ordered => "Ordered",
            PrescriptionStatus::Completed => "Completed",
            PrescriptionStatus::Expired => "Expired",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Active" => Some(PrescriptionStatus::Active),
            "Ordered" => Some(PrescriptionStatus::Ordered),
            "Completed" => Some(PrescriptionStatus::Completed),
            "Expired" => Some(PrescriptionStatus::Expired),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PrescriptionStatus::Completed | PrescriptionStatus::Expired
        )
    }

    pub fn can_transition_to(&self, next: PrescriptionStatus) -> bool {
        use PrescriptionStatus::*;
        if *self == next {
            return true;
        }
        matches!(
            (self, next),
            (Active, Ordered) | (Active, Completed) | (Active, Expired) | (Ordered, Completed) | (Ordered, Expired)
        )
    }
}

impl std::fmt::Display for PrescriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
