//! Date/time string and Unix timestamp conversion
//!
//! The Query API speaks Unix timestamps, users speak date strings. Strings
//! without an explicit offset are placed in the local time zone unless the
//! caller asks for UTC.

use chrono::{DateTime, FixedOffset, Local, NaiveDate, NaiveDateTime, TimeZone, Utc};

use crate::errors::IotaWattError;

const OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S%.f%z",
];

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

const ISO_NAIVE: &str = "%Y-%m-%dT%H:%M:%S";
const ISO_OFFSET: &str = "%Y-%m-%dT%H:%M:%S%:z";

fn parse_naive(s: &str) -> Option<NaiveDateTime> {
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// Convert a string specifying a date and time into a datetime.
///
/// `utc` selects the zone used when the string carries no offset of its own.
pub fn string_to_datetime(s: &str, utc: bool) -> Result<DateTime<FixedOffset>, IotaWattError> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt);
    }
    if let Some(dt) = OFFSET_FORMATS
        .iter()
        .find_map(|fmt| DateTime::parse_from_str(s, fmt).ok())
    {
        return Ok(dt);
    }

    let naive = parse_naive(s).ok_or_else(|| IotaWattError::InvalidTimestamp(s.to_string()))?;
    if utc {
        Ok(Utc.from_utc_datetime(&naive).fixed_offset())
    } else {
        // Nonexistent local times (DST gaps) cannot be placed
        Local
            .from_local_datetime(&naive)
            .earliest()
            .map(|dt| dt.fixed_offset())
            .ok_or_else(|| IotaWattError::InvalidTimestamp(s.to_string()))
    }
}

/// Convert a string specifying a date and time into a Unix timestamp.
pub fn string_to_timestamp(s: &str, utc: bool) -> Result<i64, IotaWattError> {
    string_to_datetime(s, utc).map(|dt| dt.timestamp())
}

/// Convert a Unix timestamp into a datetime in UTC or in local time.
pub fn timestamp_to_datetime(ts: i64, utc: bool) -> Result<DateTime<FixedOffset>, IotaWattError> {
    let dt = DateTime::<Utc>::from_timestamp(ts, 0)
        .ok_or_else(|| IotaWattError::InvalidTimestamp(ts.to_string()))?;
    Ok(if utc {
        dt.fixed_offset()
    } else {
        dt.with_timezone(&Local).fixed_offset()
    })
}

/// Convert a Unix timestamp into an ISO 8601 string.
///
/// `notz` drops the offset suffix.
pub fn timestamp_to_string(ts: i64, utc: bool, notz: bool) -> Result<String, IotaWattError> {
    let dt = timestamp_to_datetime(ts, utc)?;
    let fmt = if notz { ISO_NAIVE } else { ISO_OFFSET };
    Ok(dt.format(fmt).to_string())
}
