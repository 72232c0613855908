//! Time origins and calendars.
//!
//! Every grid stores its time axis as seconds relative to a
//! [`TimeConverter`] origin. Grids loaded from different files may use
//! different origins; [`TimeConverter::offset_to`] re-expresses one axis in
//! terms of another so all grids share a single time line.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const SECONDS_PER_DAY: f64 = 86_400.0;

const CUMULATIVE_NOLEAP: [i64; 12] = [0, 31, 59, 90, 120, 151, 181, 212, 243, 273, 304, 334];
const CUMULATIVE_LEAP: [i64; 12] = [0, 31, 60, 91, 121, 152, 182, 213, 244, 274, 305, 335];

/// Errors raised while parsing or combining time origins.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TimeError {
    #[error("Invalid time format: {0}")]
    InvalidFormat(String),

    #[error("Unsupported calendar: {0}")]
    UnknownCalendar(String),

    #[error("Invalid time units: {0}")]
    InvalidUnits(String),

    #[error("Incompatible time origins: {0} and {1}")]
    Incompatible(String, String),
}

/// CF calendars understood by the converter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Calendar {
    /// Proleptic Gregorian.
    #[default]
    Standard,
    /// 365-day years.
    NoLeap,
    /// 366-day years.
    AllLeap,
    /// Twelve 30-day months.
    Day360,
}

impl Calendar {
    pub fn from_str(s: &str) -> Result<Self, TimeError> {
        match s.to_lowercase().as_str() {
            "standard" | "gregorian" | "proleptic_gregorian" | "np_datetime64" => {
                Ok(Self::Standard)
            }
            "noleap" | "365_day" => Ok(Self::NoLeap),
            "all_leap" | "366_day" => Ok(Self::AllLeap),
            "360_day" => Ok(Self::Day360),
            other => Err(TimeError::UnknownCalendar(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::NoLeap => "noleap",
            Self::AllLeap => "all_leap",
            Self::Day360 => "360_day",
        }
    }

    fn days_in_month(&self, year: i32, month: u32) -> u32 {
        match self {
            Self::Day360 => 30,
            Self::NoLeap | Self::AllLeap | Self::Standard => {
                let table = if self.is_leap(year) {
                    &CUMULATIVE_LEAP
                } else {
                    &CUMULATIVE_NOLEAP
                };
                let idx = month as usize - 1;
                let next = if idx == 11 {
                    if self.is_leap(year) { 366 } else { 365 }
                } else {
                    table[idx + 1]
                };
                (next - table[idx]) as u32
            }
        }
    }

    fn is_leap(&self, year: i32) -> bool {
        match self {
            Self::Standard => (year % 4 == 0 && year % 100 != 0) || year % 400 == 0,
            Self::AllLeap => true,
            Self::NoLeap | Self::Day360 => false,
        }
    }

    /// Day count of `date` from an arbitrary per-calendar epoch.
    fn day_number(&self, date: &CalendarDate) -> Result<i64, TimeError> {
        let y = date.year as i64;
        let m = date.month as usize - 1;
        let d = date.day as i64 - 1;
        match self {
            Self::Standard => NaiveDate::from_ymd_opt(date.year, date.month, date.day)
                .map(|nd| nd.num_days_from_ce() as i64)
                .ok_or_else(|| TimeError::InvalidFormat(date.to_string())),
            Self::NoLeap => Ok(y * 365 + CUMULATIVE_NOLEAP[m] + d),
            Self::AllLeap => Ok(y * 366 + CUMULATIVE_LEAP[m] + d),
            Self::Day360 => Ok(y * 360 + m as i64 * 30 + d),
        }
    }

    fn from_day_number(&self, n: i64) -> Option<(i32, u32, u32)> {
        let split = |days_per_year: i64, table: &[i64; 12]| {
            let year = n.div_euclid(days_per_year);
            let rem = n.rem_euclid(days_per_year);
            let month = table.iter().rposition(|&c| c <= rem).unwrap_or(0);
            (year as i32, month as u32 + 1, (rem - table[month]) as u32 + 1)
        };
        match self {
            Self::Standard => {
                let nd = NaiveDate::from_num_days_from_ce_opt(i32::try_from(n).ok()?)?;
                Some((nd.year(), nd.month(), nd.day()))
            }
            Self::NoLeap => Some(split(365, &CUMULATIVE_NOLEAP)),
            Self::AllLeap => Some(split(366, &CUMULATIVE_LEAP)),
            Self::Day360 => {
                let year = n.div_euclid(360);
                let rem = n.rem_euclid(360);
                Some((year as i32, (rem / 30) as u32 + 1, (rem % 30) as u32 + 1))
            }
        }
    }
}

impl std::fmt::Display for Calendar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A calendar-agnostic date with second resolution inside the day.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalendarDate {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    /// Seconds since midnight.
    pub seconds: f64,
}

impl CalendarDate {
    /// Parse an ISO 8601-like date in the given calendar.
    ///
    /// Standard calendar dates go through chrono; other calendars accept
    /// `YYYY-MM-DD[( |T)HH:MM[:SS[.fff]]]` with calendar-specific day limits
    /// (so `2001-02-30` is valid in a 360-day calendar).
    pub fn parse(s: &str, calendar: Calendar) -> Result<Self, TimeError> {
        let s = s.trim();
        if calendar == Calendar::Standard {
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Ok(Self::from_naive(&dt.naive_utc()));
            }
            for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"] {
                if let Ok(ndt) = NaiveDateTime::parse_from_str(s, fmt) {
                    return Ok(Self::from_naive(&ndt));
                }
            }
            if let Ok(nd) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
                return Ok(Self {
                    year: nd.year(),
                    month: nd.month(),
                    day: nd.day(),
                    seconds: 0.0,
                });
            }
            return Err(TimeError::InvalidFormat(s.to_string()));
        }
        Self::parse_fields(s, calendar)
    }

    fn from_naive(ndt: &NaiveDateTime) -> Self {
        Self {
            year: ndt.year(),
            month: ndt.month(),
            day: ndt.day(),
            seconds: ndt.num_seconds_from_midnight() as f64
                + ndt.nanosecond() as f64 * 1e-9,
        }
    }

    fn parse_fields(s: &str, calendar: Calendar) -> Result<Self, TimeError> {
        let invalid = || TimeError::InvalidFormat(s.to_string());
        let trimmed = s.trim_end_matches('Z');
        let (date, clock) = match trimmed.split_once(|c: char| c == 'T' || c == ' ') {
            Some((d, c)) => (d, Some(c)),
            None => (trimmed, None),
        };

        let mut parts = date.splitn(3, '-');
        let mut next = || parts.next().ok_or_else(invalid);
        let year: i32 = next()?.parse().map_err(|_| invalid())?;
        let month: u32 = next()?.parse().map_err(|_| invalid())?;
        let day: u32 = next()?.parse().map_err(|_| invalid())?;
        if !(1..=12).contains(&month) || day == 0 || day > calendar.days_in_month(year, month) {
            return Err(invalid());
        }

        let mut seconds = 0.0;
        if let Some(clock) = clock {
            for (i, field) in clock.split(':').enumerate() {
                let value: f64 = field.parse().map_err(|_| invalid())?;
                seconds += value
                    * match i {
                        0 => 3600.0,
                        1 => 60.0,
                        2 => 1.0,
                        _ => return Err(invalid()),
                    };
            }
        }

        Ok(Self {
            year,
            month,
            day,
            seconds,
        })
    }
}

impl std::fmt::Display for CalendarDate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let whole = self.seconds.floor();
        let h = (whole / 3600.0) as u32;
        let m = ((whole % 3600.0) / 60.0) as u32;
        let s = (whole % 60.0) as u32;
        write!(
            f,
            "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}",
            self.year, self.month, self.day, h, m, s
        )?;
        let frac = self.seconds - whole;
        if frac > 0.0 {
            let digits = format!("{:.6}", frac);
            write!(f, "{}", digits.trim_start_matches('0').trim_end_matches('0'))?;
        }
        Ok(())
    }
}

/// Reference point of a grid's time axis.
///
/// A numeric converter has no calendar date attached: times are plain
/// seconds and can only be compared with other numeric axes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct TimeConverter {
    origin: Option<(Calendar, CalendarDate)>,
}

impl TimeConverter {
    /// A converter without a calendar origin.
    pub fn numeric() -> Self {
        Self { origin: None }
    }

    pub fn new(date: CalendarDate, calendar: Calendar) -> Self {
        Self {
            origin: Some((calendar, date)),
        }
    }

    /// Parse an origin date in the given calendar.
    pub fn from_iso8601(s: &str, calendar: Calendar) -> Result<Self, TimeError> {
        Ok(Self::new(CalendarDate::parse(s, calendar)?, calendar))
    }

    /// Parse CF-style `"<unit> since <date>"` units.
    ///
    /// Returns the converter together with the number of seconds per unit.
    /// Units without a `since` clause produce a numeric converter.
    pub fn from_cf_units(units: &str, calendar: Option<&str>) -> Result<(Self, f64), TimeError> {
        let calendar = match calendar {
            Some(c) => Calendar::from_str(c)?,
            None => Calendar::Standard,
        };
        let units = units.trim();
        let lower = units.to_lowercase();
        let (unit, since) = match lower.find(" since ") {
            Some(pos) => (lower[..pos].trim(), Some(units[pos + 7..].trim())),
            None => (lower.as_str(), None),
        };
        let factor = match unit {
            "seconds" | "second" | "secs" | "sec" | "s" => 1.0,
            "minutes" | "minute" | "mins" | "min" => 60.0,
            "hours" | "hour" | "hrs" | "hr" | "h" => 3600.0,
            "days" | "day" | "d" => SECONDS_PER_DAY,
            "" => 1.0,
            other => return Err(TimeError::InvalidUnits(other.to_string())),
        };
        let converter = match since {
            Some(date) => Self::from_iso8601(date, calendar)?,
            None => Self::numeric(),
        };
        Ok((converter, factor))
    }

    pub fn is_numeric(&self) -> bool {
        self.origin.is_none()
    }

    pub fn calendar(&self) -> Option<Calendar> {
        self.origin.map(|(c, _)| c)
    }

    pub fn origin(&self) -> Option<CalendarDate> {
        self.origin.map(|(_, d)| d)
    }

    /// Seconds to add to a time relative to `other` so that it becomes
    /// relative to `self`.
    pub fn offset_to(&self, other: &TimeConverter) -> Result<f64, TimeError> {
        match (self.origin, other.origin) {
            (None, None) => Ok(0.0),
            (Some((cal_a, a)), Some((cal_b, b))) if cal_a == cal_b => {
                let days = cal_a.day_number(&b)? - cal_a.day_number(&a)?;
                Ok(days as f64 * SECONDS_PER_DAY + (b.seconds - a.seconds))
            }
            _ => Err(TimeError::Incompatible(self.to_string(), other.to_string())),
        }
    }

    /// Seconds of `date` relative to this origin.
    pub fn reltime(&self, date: &CalendarDate) -> Result<f64, TimeError> {
        match self.origin {
            Some((calendar, _)) => self.offset_to(&Self::new(*date, calendar)),
            None => Err(TimeError::Incompatible(self.to_string(), date.to_string())),
        }
    }

    /// Calendar date reached `t` seconds after this origin.
    pub fn fulltime(&self, t: f64) -> Option<CalendarDate> {
        let (calendar, origin) = self.origin?;
        let total = origin.seconds + t;
        let days = (total / SECONDS_PER_DAY).floor();
        let seconds = total - days * SECONDS_PER_DAY;
        let n = calendar.day_number(&origin).ok()? + days as i64;
        let (year, month, day) = calendar.from_day_number(n)?;
        Some(CalendarDate {
            year,
            month,
            day,
            seconds,
        })
    }

    /// CF units string describing seconds relative to this origin.
    pub fn cf_units(&self) -> String {
        match self.origin {
            Some((_, date)) => format!("seconds since {}", date),
            None => "seconds".to_string(),
        }
    }
}

impl std::fmt::Display for TimeConverter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.origin {
            Some((calendar, date)) => write!(f, "{} ({})", date, calendar),
            None => write!(f, "numeric"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_standard_formats() {
        for s in ["2000-01-02T03:04:05Z", "2000-01-02 03:04:05", "2000-01-02T03:04:05"] {
            let d = CalendarDate::parse(s, Calendar::Standard).unwrap();
            assert_eq!((d.year, d.month, d.day), (2000, 1, 2));
            assert_eq!(d.seconds, 3.0 * 3600.0 + 4.0 * 60.0 + 5.0);
        }
        let d = CalendarDate::parse("2000-01-02", Calendar::Standard).unwrap();
        assert_eq!(d.seconds, 0.0);
        assert!(CalendarDate::parse("yesterday", Calendar::Standard).is_err());
    }

    #[test]
    fn test_360_day_accepts_february_30() {
        assert!(CalendarDate::parse("2001-02-30", Calendar::Day360).is_ok());
        assert!(CalendarDate::parse("2001-02-30", Calendar::Standard).is_err());
        assert!(CalendarDate::parse("2001-02-29", Calendar::NoLeap).is_err());
    }

    #[test]
    fn test_offset_between_origins() {
        let a = TimeConverter::from_iso8601("2000-01-01", Calendar::Standard).unwrap();
        let b = TimeConverter::from_iso8601("2000-01-02T12:00:00", Calendar::Standard).unwrap();
        assert_eq!(a.offset_to(&b).unwrap(), 1.5 * SECONDS_PER_DAY);
        assert_eq!(b.offset_to(&a).unwrap(), -1.5 * SECONDS_PER_DAY);
    }

    #[test]
    fn test_offset_respects_calendar() {
        let a = TimeConverter::from_iso8601("2001-02-01", Calendar::Day360).unwrap();
        let b = TimeConverter::from_iso8601("2001-03-01", Calendar::Day360).unwrap();
        assert_eq!(a.offset_to(&b).unwrap(), 30.0 * SECONDS_PER_DAY);

        let a = TimeConverter::from_iso8601("2004-02-01", Calendar::NoLeap).unwrap();
        let b = TimeConverter::from_iso8601("2004-03-01", Calendar::NoLeap).unwrap();
        assert_eq!(a.offset_to(&b).unwrap(), 28.0 * SECONDS_PER_DAY);
    }

    #[test]
    fn test_numeric_and_dated_are_incompatible() {
        let a = TimeConverter::numeric();
        let b = TimeConverter::from_iso8601("2000-01-01", Calendar::Standard).unwrap();
        assert_eq!(a.offset_to(&TimeConverter::numeric()).unwrap(), 0.0);
        assert!(a.offset_to(&b).is_err());

        let c = TimeConverter::from_iso8601("2000-01-01", Calendar::NoLeap).unwrap();
        assert!(b.offset_to(&c).is_err());
    }

    #[test]
    fn test_cf_units() {
        let (conv, factor) = TimeConverter::from_cf_units("days since 1990-01-01", None).unwrap();
        assert_eq!(factor, SECONDS_PER_DAY);
        assert_eq!(conv.origin().unwrap().year, 1990);

        let (conv, factor) = TimeConverter::from_cf_units("seconds", None).unwrap();
        assert!(conv.is_numeric());
        assert_eq!(factor, 1.0);

        assert!(TimeConverter::from_cf_units("fortnights since 2000-01-01", None).is_err());
    }

    #[test]
    fn test_fulltime_inverts_reltime() {
        let conv = TimeConverter::from_iso8601("1999-12-31T18:00:00", Calendar::Standard).unwrap();
        let date = conv.fulltime(12.0 * 3600.0).unwrap();
        assert_eq!((date.year, date.month, date.day), (2000, 1, 1));
        assert_eq!(date.seconds, 6.0 * 3600.0);
        assert_eq!(conv.reltime(&date).unwrap(), 12.0 * 3600.0);

        let conv = TimeConverter::from_iso8601("2001-12-30", Calendar::Day360).unwrap();
        let date = conv.fulltime(SECONDS_PER_DAY).unwrap();
        assert_eq!((date.year, date.month, date.day), (2002, 1, 1));
    }

    #[test]
    fn test_cf_units_round_trip() {
        let conv = TimeConverter::from_iso8601("2010-06-15T12:30:00", Calendar::Standard).unwrap();
        let (parsed, factor) = TimeConverter::from_cf_units(&conv.cf_units(), Some("standard")).unwrap();
        assert_eq!(factor, 1.0);
        assert_eq!(parsed, conv);
    }
}
