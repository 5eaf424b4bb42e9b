//! Provider wall-clock helpers.
//!
//! Merchant portals report local timestamps without a zone. They are read
//! in a configured fixed offset and converted to UTC for comparison.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, SubsecRound, TimeZone, Utc};

use crate::shared::error::{AppError, AppResult};

/// Full timestamp layout used by the portals.
pub const PROVIDER_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
/// Date-only fallback layout.
pub const PROVIDER_DATE_FORMAT: &str = "%Y-%m-%d";

/// Build the provider offset from whole minutes east of UTC.
pub fn provider_offset(minutes_east: i32) -> AppResult<FixedOffset> {
    FixedOffset::east_opt(minutes_east * 60).ok_or_else(|| {
        AppError::Configuration(format!("invalid provider UTC offset: {} minutes", minutes_east))
    })
}

/// Parse a provider timestamp; a bare date means local midnight.
pub fn parse_provider_time(raw: &str, offset: FixedOffset) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    let naive = NaiveDateTime::parse_from_str(raw, PROVIDER_DATETIME_FORMAT)
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(raw, PROVIDER_DATE_FORMAT)
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })?;

    offset
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Format a UTC instant the way the portals expect it in query strings.
pub fn format_provider_time(at: DateTime<Utc>, offset: FixedOffset) -> String {
    at.with_timezone(&offset)
        .format(PROVIDER_DATETIME_FORMAT)
        .to_string()
}

/// Portals report whole seconds, so window starts are floored to the second.
pub fn window_start(created_at: DateTime<Utc>) -> DateTime<Utc> {
    created_at.trunc_subsecs(0)
}

/// Inclusive on both ends.
pub fn within_window(at: DateTime<Utc>, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
    at >= start && at <= end
}
