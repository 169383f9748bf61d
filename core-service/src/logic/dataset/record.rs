use chrono::{NaiveDate, NaiveDateTime};

/// Cell markers read as "no value"
const MISSING_MARKERS: &[&str] = &["", "na", "n/a", "nan", "null", "none", "-"];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%Y/%m/%d %H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d"];

// Ambiguous numeric dates: month first unless the dataset says otherwise
const MONTH_FIRST_DATETIME_FORMATS: &[&str] = &[
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
    "%m-%d-%Y %H:%M:%S",
    "%m-%d-%Y %H:%M",
];

const MONTH_FIRST_DATE_FORMATS: &[&str] = &["%m/%d/%Y", "%m-%d-%Y"];

const DAY_FIRST_DATETIME_FORMATS: &[&str] = &[
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
    "%d-%m-%Y %H:%M:%S",
    "%d-%m-%Y %H:%M",
];

const DAY_FIRST_DATE_FORMATS: &[&str] = &["%d/%m/%Y", "%d-%m-%Y"];

/// One row of a historical dataset
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Parsed timestamp, if the dataset has a timestamp column and the cell parsed
    pub timestamp: Option<NaiveDateTime>,
    /// One cell per dataset column; `None` is a missing or non-numeric cell
    pub values: Vec<Option<f64>>,
}

impl Record {
    pub fn get(&self, column: usize) -> Option<f64> {
        self.values.get(column).copied().flatten()
    }
}

/// Normalise a header: spaces become `_`, other non-word characters are dropped
///
/// `"PM2.5"` → `"PM25"`, `"Wind Speed (km/h)"` → `"Wind_Speed_kmh"`
pub fn clean_header(raw: &str) -> String {
    raw.trim()
        .chars()
        .filter_map(|c| match c {
            ' ' => Some('_'),
            c if c.is_alphanumeric() || c == '_' => Some(c),
            _ => None,
        })
        .collect()
}

/// Parse a numeric cell; missing markers and non-finite values read as `None`
pub fn parse_cell(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if MISSING_MARKERS.iter().any(|m| trimmed.eq_ignore_ascii_case(m)) {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Parse a timestamp cell in any of the accepted formats, month first
///
/// Date-only cells are read as midnight. RFC 3339 values keep their
/// wall-clock time and drop the offset.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    parse_timestamp_with(raw, false)
}

/// Like `parse_timestamp`; `day_first` reads `01/02/2024` as 1 February
pub fn parse_timestamp_with(raw: &str, day_first: bool) -> Option<NaiveDateTime> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.naive_local());
    }

    let (local_datetimes, local_dates) = if day_first {
        (DAY_FIRST_DATETIME_FORMATS, DAY_FIRST_DATE_FORMATS)
    } else {
        (MONTH_FIRST_DATETIME_FORMATS, MONTH_FIRST_DATE_FORMATS)
    };
    DATETIME_FORMATS
        .iter()
        .chain(local_datetimes)
        .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .chain(local_dates)
                .find_map(|fmt| NaiveDate::parse_from_str(trimmed, fmt).ok())
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_header() {
        assert_eq!(clean_header("PM2.5"), "PM25");
        assert_eq!(clean_header("Wind Speed (km/h)"), "Wind_Speed_kmh");
        assert_eq!(clean_header("PM10 (µg/m³)"), "PM10_µgm³");
        assert_eq!(clean_header("Humidity (%)"), "Humidity_");
        assert_eq!(clean_header(" Date "), "Date");
    }

    #[test]
    fn test_parse_cell() {
        assert_eq!(parse_cell("12.5"), Some(12.5));
        assert_eq!(parse_cell(" 7 "), Some(7.0));
        assert_eq!(parse_cell(""), None);
        assert_eq!(parse_cell("NA"), None);
        assert_eq!(parse_cell("NaN"), None);
        assert_eq!(parse_cell("inf"), None);
        assert_eq!(parse_cell("Delhi"), None);
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 1, 6).unwrap().and_hms_opt(14, 0, 0).unwrap();
        assert_eq!(parse_timestamp("2024-01-06 14:00:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-06 14:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-06T14:00:00"), Some(expected));
        assert_eq!(parse_timestamp("01/06/2024 14:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-06T14:00:00+05:30"), Some(expected));

        let midnight = NaiveDate::from_ymd_opt(2024, 1, 6).unwrap().and_hms_opt(0, 0, 0).unwrap();
        assert_eq!(parse_timestamp("2024-01-06"), Some(midnight));
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn test_ambiguous_dates_follow_order() {
        let jan_2 = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap().and_hms_opt(0, 0, 0).unwrap();
        let feb_1 = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
        assert_eq!(parse_timestamp("01/02/2024"), Some(jan_2));
        assert_eq!(parse_timestamp_with("01/02/2024", true), Some(feb_1));

        // A day above 12 only parses in its own order
        let jan_13 = NaiveDate::from_ymd_opt(2024, 1, 13).unwrap().and_hms_opt(9, 30, 0).unwrap();
        assert_eq!(parse_timestamp("01/13/2024 09:30"), Some(jan_13));
        assert_eq!(parse_timestamp_with("13/01/2024 09:30", true), Some(jan_13));
        assert_eq!(parse_timestamp_with("01/13/2024 09:30", true), None);

        // ISO dates never depend on the order
        assert_eq!(parse_timestamp_with("2024-01-02", true), Some(jan_2));
    }
}
