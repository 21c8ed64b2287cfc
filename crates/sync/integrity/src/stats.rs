//! Appointment and rating statistics
//!
//! Pure aggregations over cached views. Dates are compared as calendar days
//! and an appointment dated today has already started, so "upcoming" begins
//! tomorrow. Appointments whose `date` does not parse are counted in the
//! totals but never as upcoming.

use std::collections::HashSet;

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::entries::AppointmentView;
use crate::status::AppointmentStatus;

/// Rating shown for a practitioner with no reviews
pub const UNREVIEWED_RATING: f64 = 5.0;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PractitionerStats {
    pub total: usize,
    pub pending: usize,
    pub confirmed: usize,
    pub completed: usize,
    pub cancelled: usize,
    /// Open appointments dated from tomorrow through seven days out
    pub upcoming_this_week: usize,
    pub unique_patients: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientStats {
    pub total: usize,
    pub upcoming: usize,
    pub completed: usize,
    pub cancelled: usize,
    pub pending: usize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RatingStats {
    pub rating: f64,
    pub count: u32,
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.get(..10).unwrap_or(value), "%Y-%m-%d").ok()
}

fn count_status(appointments: &[&AppointmentView], status: AppointmentStatus) -> usize {
    appointments.iter().filter(|a| a.status == status).count()
}

/// Statistics over the appointments held by `practitioner_id`
pub fn practitioner_stats(
    appointments: &[AppointmentView],
    practitioner_id: &str,
    today: NaiveDate,
) -> PractitionerStats {
    let own: Vec<&AppointmentView> = appointments
        .iter()
        .filter(|a| a.practitioner_id.as_str() == practitioner_id)
        .collect();
    let week_end = today.checked_add_days(Days::new(7)).unwrap_or(today);

    let upcoming_this_week = own
        .iter()
        .filter(|a| a.status.is_open())
        .filter_map(|a| parse_date(&a.date))
        .filter(|d| *d > today && *d <= week_end)
        .count();
    let unique_patients = own
        .iter()
        .map(|a| a.patient_id.as_str())
        .collect::<HashSet<_>>()
        .len();

    PractitionerStats {
        total: own.len(),
        pending: count_status(&own, AppointmentStatus::Pending),
        confirmed: count_status(&own, AppointmentStatus::Confirmed),
        completed: count_status(&own, AppointmentStatus::Completed),
        cancelled: count_status(&own, AppointmentStatus::Cancelled),
        upcoming_this_week,
        unique_patients,
    }
}

/// Statistics over the appointments booked by `patient_id`
pub fn patient_stats(
    appointments: &[AppointmentView],
    patient_id: &str,
    today: NaiveDate,
) -> PatientStats {
    let own: Vec<&AppointmentView> = appointments
        .iter()
        .filter(|a| a.patient_id.as_str() == patient_id)
        .collect();

    let upcoming = own
        .iter()
        .filter(|a| a.status.is_open())
        .filter_map(|a| parse_date(&a.date))
        .filter(|d| *d > today)
        .count();

    PatientStats {
        total: own.len(),
        upcoming,
        completed: count_status(&own, AppointmentStatus::Completed),
        cancelled: count_status(&own, AppointmentStatus::Cancelled),
        pending: count_status(&own, AppointmentStatus::Pending),
    }
}

/// Round half away from zero to one decimal place
pub fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Average of `ratings` to one decimal, or the base values when empty
pub fn rating_stats(ratings: &[u8], base_rating: f64, base_count: u32) -> RatingStats {
    if ratings.is_empty() {
        return RatingStats {
            rating: base_rating,
            count: base_count,
        };
    }
    let sum: u32 = ratings.iter().map(|r| u32::from(*r)).sum();
    RatingStats {
        rating: round_one_decimal(f64::from(sum) / ratings.len() as f64),
        count: ratings.len() as u32,
    }
}
