//! Wall-clock helpers.
//!
//! All scheduling math runs in whole minutes since midnight. These helpers
//! convert at the boundary: `HH:MM` strings in, 12-hour ETA strings out.

use chrono::{NaiveTime, Timelike};

use crate::error::PlanError;

/// Minutes in one day; also the routing horizon.
pub const MINUTES_PER_DAY: i64 = 24 * 60;

/// Parse `HH:MM` into minutes since midnight.
pub fn parse_hhmm(value: &str) -> Result<i64, PlanError> {
    let time = NaiveTime::parse_from_str(value.trim(), "%H:%M")
        .map_err(|_| PlanError::InvalidTime(value.to_string()))?;
    Ok(minute_of_day(time))
}

pub fn minute_of_day(time: NaiveTime) -> i64 {
    i64::from(time.hour()) * 60 + i64::from(time.minute())
}

/// Format minutes since midnight as a 12-hour clock, e.g. `7:05 AM`.
///
/// Values past midnight wrap onto the next day's clock face.
pub fn format_eta(minutes: i64) -> String {
    let wrapped = minutes.rem_euclid(MINUTES_PER_DAY);
    let secs = u32::try_from(wrapped * 60).unwrap_or(0);
    let formatted = NaiveTime::from_num_seconds_from_midnight_opt(secs, 0)
        .unwrap_or(NaiveTime::MIN)
        .format("%I:%M %p")
        .to_string();
    formatted.trim_start_matches('0').to_string()
}

/// Delivery window shown to drivers: `ETA – ETA + width`.
pub fn format_window(minutes: i64, width_minutes: i64) -> String {
    format!("{} – {}", format_eta(minutes), format_eta(minutes + width_minutes))
}
