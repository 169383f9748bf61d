//! Derived Features - computed from a timestamp, never supplied
//!
//! Week convention: Monday = 0 ... Sunday = 6.
//! Weekend days are Saturday (5) and Sunday (6).

use chrono::{Datelike, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

/// Day-of-week values counted as weekend
pub const WEEKEND_DAYS: [u32; 2] = [5, 6];

/// Kind of time-based feature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DerivedFeature {
    /// Hour of day, 0-23
    Hour,
    /// Month, 1-12
    Month,
    /// Day of month, 1-31
    DayOfMonth,
    /// Day of week, Monday = 0
    DayOfWeek,
    /// 1.0 on Saturday/Sunday, else 0.0
    IsWeekend,
}

impl DerivedFeature {
    pub fn compute(self, at: &NaiveDateTime) -> f64 {
        match self {
            DerivedFeature::Hour => at.hour() as f64,
            DerivedFeature::Month => at.month() as f64,
            DerivedFeature::DayOfMonth => at.day() as f64,
            DerivedFeature::DayOfWeek => day_of_week(at) as f64,
            DerivedFeature::IsWeekend => {
                if is_weekend(at) { 1.0 } else { 0.0 }
            }
        }
    }
}

/// Monday = 0 ... Sunday = 6
pub fn day_of_week(at: &NaiveDateTime) -> u32 {
    at.weekday().num_days_from_monday()
}

pub fn is_weekend(at: &NaiveDateTime) -> bool {
    WEEKEND_DAYS.contains(&day_of_week(at))
}
