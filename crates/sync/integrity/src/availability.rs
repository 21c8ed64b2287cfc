//! Availability Normalization
//!
//! Practitioner availability is stored as flat per-day rows and presented as
//! day groups. Grouping is stable: a group is opened the first time a day
//! label is seen and later slots for that day are appended to it.

use chrono::{Datelike, Days, NaiveDate};
use serde::{Deserialize, Serialize};

/// Weekday labels, indexed from Sunday
pub const WEEKDAY_LABELS: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

/// A start/end pair within one day
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: String,
    pub end: String,
}

/// All slots offered on one weekday
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayAvailability {
    pub day: String,
    pub slots: Vec<TimeRange>,
}

/// One stored availability row, without its identity
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlatSlot {
    pub day: String,
    pub start: String,
    pub end: String,
}

impl FlatSlot {
    pub fn new(day: &str, start: &str, end: &str) -> Self {
        FlatSlot {
            day: day.to_string(),
            start: start.to_string(),
            end: end.to_string(),
        }
    }
}

/// Position of `label` in [`WEEKDAY_LABELS`]
pub fn weekday_index(label: &str) -> Option<u32> {
    WEEKDAY_LABELS
        .iter()
        .position(|d| *d == label)
        .map(|i| i as u32)
}

pub fn is_weekday_label(label: &str) -> bool {
    weekday_index(label).is_some()
}

/// Label of the weekday `date` falls on
pub fn weekday_label(date: NaiveDate) -> &'static str {
    WEEKDAY_LABELS[date.weekday().num_days_from_sunday() as usize]
}

/// Group flat slots by day, preserving first-seen day order and the input
/// order of slots within a day.
pub fn group_by_day(flat: &[FlatSlot]) -> Vec<DayAvailability> {
    let mut grouped: Vec<DayAvailability> = Vec::new();
    for slot in flat {
        let range = TimeRange {
            start: slot.start.clone(),
            end: slot.end.clone(),
        };
        match grouped.iter_mut().find(|g| g.day == slot.day) {
            Some(group) => group.slots.push(range),
            None => grouped.push(DayAvailability {
                day: slot.day.clone(),
                slots: vec![range],
            }),
        }
    }
    grouped
}

/// Inverse of [`group_by_day`] modulo ordering
pub fn flatten(grouped: &[DayAvailability]) -> Vec<FlatSlot> {
    grouped
        .iter()
        .flat_map(|group| {
            group.slots.iter().map(move |range| FlatSlot {
                day: group.day.clone(),
                start: range.start.clone(),
                end: range.end.clone(),
            })
        })
        .collect()
}

/// Next calendar date falling on `label`, strictly after `today`.
///
/// Today's own weekday resolves to a week later. Unknown labels return
/// `today` unchanged.
pub fn next_date_for_weekday(label: &str, today: NaiveDate) -> NaiveDate {
    let Some(target) = weekday_index(label) else {
        return today;
    };
    let mut delta = target as i64 - today.weekday().num_days_from_sunday() as i64;
    if delta <= 0 {
        delta += 7;
    }
    today
        .checked_add_days(Days::new(delta as u64))
        .unwrap_or(today)
}

/// Weekly availability written for a freshly created practitioner
pub fn default_week() -> Vec<FlatSlot> {
    ["Mon", "Wed", "Fri"]
        .iter()
        .flat_map(|day| {
            [
                FlatSlot::new(day, "09:00 AM", "12:00 PM"),
                FlatSlot::new(day, "02:00 PM", "05:00 PM"),
            ]
        })
        .collect()
}
