//! Match date handling
//!
//! Upstream dates are local wall-clock values in `DD.MM.YYYY` / `HH:MM`.
//! The UTC offset is derived per date from the Central European rule:
//! UTC+2 from the last Sunday of March 02:00 local until the last Sunday of
//! October 03:00 local, UTC+1 otherwise.

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};

const CET_OFFSET_SECS: i32 = 3600;
const CEST_OFFSET_SECS: i32 = 2 * 3600;

/// Local kick-off of a match, `time` is `None` when not yet scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct LocalKickoff {
    pub date: NaiveDate,
    pub time: Option<NaiveTime>,
}

impl LocalKickoff {
    /// Sort key; a match without a time sorts at the start of its day
    pub fn naive(&self) -> NaiveDateTime {
        self.date.and_time(self.time.unwrap_or(NaiveTime::MIN))
    }

    /// Start instant for timed matches
    pub fn start(&self) -> Option<DateTime<FixedOffset>> {
        self.time.map(|time| to_central_european(self.date.and_time(time)))
    }
}

/// Parse `DD.MM.YYYY` (ISO `YYYY-MM-DD` is accepted as well)
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%d.%m.%Y")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%Y-%m-%d"))
        .ok()
}

/// Parse `HH:MM` or `HH:MM:SS`
pub fn parse_time(raw: &str) -> Option<NaiveTime> {
    let raw = raw.trim();
    NaiveTime::parse_from_str(raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
        .ok()
}

/// Combine the upstream date/time fields.
///
/// Returns `None` when the date is unparseable or a time is present but
/// unparseable; an absent or blank time is fine.
pub fn parse_kickoff(date: &str, time: Option<&str>) -> Option<LocalKickoff> {
    let date = parse_date(date)?;
    let time = match time.map(str::trim).filter(|t| !t.is_empty()) {
        Some(raw) => Some(parse_time(raw)?),
        None => None,
    };
    Some(LocalKickoff { date, time })
}

fn last_sunday(year: i32, month: u32) -> Option<NaiveDate> {
    let first_of_next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    let last = first_of_next.pred_opt()?;
    let back = last.weekday().num_days_from_sunday();
    Some(last - Duration::days(back as i64))
}

/// True if the local wall-clock value falls into summer time.
///
/// The repeated hour in October resolves to summer time.
pub fn is_summer_time(local: NaiveDateTime) -> bool {
    let year = local.year();
    let (Some(start), Some(end)) = (last_sunday(year, 3), last_sunday(year, 10)) else {
        return false;
    };
    let (Some(two), Some(three)) = (
        NaiveTime::from_hms_opt(2, 0, 0),
        NaiveTime::from_hms_opt(3, 0, 0),
    ) else {
        return false;
    };
    local >= start.and_time(two) && local < end.and_time(three)
}

pub fn central_european_offset(local: NaiveDateTime) -> FixedOffset {
    let secs = if is_summer_time(local) {
        CEST_OFFSET_SECS
    } else {
        CET_OFFSET_SECS
    };
    FixedOffset::east_opt(secs).expect("offset within a day")
}

pub fn to_central_european(local: NaiveDateTime) -> DateTime<FixedOffset> {
    let offset = central_european_offset(local);
    let utc = local - Duration::seconds(offset.local_minus_utc() as i64);
    DateTime::from_naive_utc_and_offset(utc, offset)
}
