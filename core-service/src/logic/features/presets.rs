//! Shipped feature contracts
//!
//! Each function returns the contract of exactly one model version.
//! Changing a contract means adding a new function, not editing one.

use super::derived::DerivedFeature;
use super::layout::{FeatureSpec, FeatureSpecError, HistorySource};
use crate::constants::ROLLING_WINDOW;

pub const BASIC_V1: &str = "basic-v1";
pub const TEMPORAL_V2: &str = "temporal-v2";

/// Ten caller-supplied measurements, no time or history features
pub fn basic_v1() -> Result<FeatureSpec, FeatureSpecError> {
    FeatureSpec::builder(BASIC_V1)
        .supplied("Temperature")
        .supplied("Humidity")
        .supplied("WindSpeedkmh")
        .supplied("Visibility")
        .supplied("Pressure")
        .supplied("so2")
        .supplied("no2")
        .supplied("Rainfall")
        .supplied("PM10")
        .supplied("AQI")
        .rename("Wind_Speed_kmh", "WindSpeedkmh")
        .build()
}

/// Measurements plus calendar features, gas columns and PM2.5 history
///
/// SO2/CO/O3 and the PM2.5 lags are not measured by callers; they are
/// backfilled from training means online.
pub fn temporal_v2() -> Result<FeatureSpec, FeatureSpecError> {
    FeatureSpec::builder(TEMPORAL_V2)
        .supplied("AQI")
        .supplied("PM10_µgm3")
        .supplied("NO2_ppb")
        .defaulted("SO2_ppb", "SO2_ppb", HistorySource::column("SO2_ppb"))
        .defaulted("CO_ppm", "CO_ppm", HistorySource::column("CO_ppm"))
        .defaulted("O3_ppb", "O3_ppb", HistorySource::column("O3_ppb"))
        .supplied("Temperature_C")
        .supplied("Humidity_")
        .supplied("Wind_Speed_ms")
        .derived("hour", DerivedFeature::Hour)
        .derived("month", DerivedFeature::Month)
        .derived("day", DerivedFeature::DayOfMonth)
        .derived("dayofweek", DerivedFeature::DayOfWeek)
        .derived("is_weekend", DerivedFeature::IsWeekend)
        .defaulted("PM25_1hr_ago", "PM25", HistorySource::lag("PM25", 1))
        .defaulted("PM25_2hr_ago", "PM25", HistorySource::lag("PM25", 2))
        .defaulted("pm25_rolling_mean3", "PM25", HistorySource::rolling_mean("PM25", ROLLING_WINDOW))
        .rename("PM10_µgm³", "PM10_µgm3")
        .rename("PM10_μgm3", "PM10_µgm3")
        .rename("Temperature", "Temperature_C")
        .rename("Humidity", "Humidity_")
        .build()
}

/// Look up a shipped contract by version name
pub fn by_name(name: &str) -> Option<Result<FeatureSpec, FeatureSpecError>> {
    match name {
        BASIC_V1 => Some(basic_v1()),
        TEMPORAL_V2 => Some(temporal_v2()),
        _ => None,
    }
}
