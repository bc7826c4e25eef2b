//! Calendar-day arithmetic in the user's timezone.
//!
//! Day keys are plain [`NaiveDate`]s. Differences between day keys are taken
//! between the local noons of both days so a DST shift on either side can
//! never move the result by a day.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, Offset, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// A user's configured timezone, stored as a fixed UTC offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserTimezone(FixedOffset);

impl UserTimezone {
    pub fn utc() -> Self {
        Self(Utc.fix())
    }

    pub fn offset(&self) -> FixedOffset {
        self.0
    }

    /// Calendar date of `now` in this timezone.
    pub fn day_key(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.0).date_naive()
    }

    /// Local noon of `day`, as a UTC instant.
    pub fn noon_of(&self, day: NaiveDate) -> DateTime<Utc> {
        let local = day.and_time(noon()) - Duration::seconds(i64::from(self.0.local_minus_utc()));
        DateTime::from_naive_utc_and_offset(local, Utc)
    }

    /// Start of `day` (local midnight) as a UTC instant.
    pub fn start_of(&self, day: NaiveDate) -> DateTime<Utc> {
        let local = day.and_time(NaiveTime::MIN) - Duration::seconds(i64::from(self.0.local_minus_utc()));
        DateTime::from_naive_utc_and_offset(local, Utc)
    }
}

impl Default for UserTimezone {
    fn default() -> Self {
        Self::utc()
    }
}

impl fmt::Display for UserTimezone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.0.local_minus_utc();
        if secs == 0 {
            return f.write_str("UTC");
        }
        let sign = if secs < 0 { '-' } else { '+' };
        let secs = secs.abs();
        write!(f, "{sign}{:02}:{:02}", secs / 3600, (secs % 3600) / 60)
    }
}

impl FromStr for UserTimezone {
    type Err = ValidationError;

    /// Accepts `UTC`, `Z`, `+09:00`, `-0530` and `UTC+02:00`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ValidationError::InvalidTimezone(s.to_string());
        let trimmed = s.trim();
        let rest = trimmed
            .strip_prefix("UTC")
            .or_else(|| trimmed.strip_prefix("GMT"))
            .unwrap_or(trimmed);
        if rest.is_empty() || rest == "Z" {
            return Ok(Self::utc());
        }

        let (sign, digits) = match rest.as_bytes().first() {
            Some(b'+') => (1, &rest[1..]),
            Some(b'-') => (-1, &rest[1..]),
            _ => return Err(invalid()),
        };
        let digits: String = digits.chars().filter(|c| *c != ':').collect();
        if !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }
        let (hours, minutes) = match digits.len() {
            1 | 2 => (digits.parse::<i32>().map_err(|_| invalid())?, 0),
            4 => (
                digits[..2].parse::<i32>().map_err(|_| invalid())?,
                digits[2..].parse::<i32>().map_err(|_| invalid())?,
            ),
            _ => return Err(invalid()),
        };
        if hours > 14 || minutes >= 60 {
            return Err(invalid());
        }
        FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
            .map(Self)
            .ok_or_else(invalid)
    }
}

impl Serialize for UserTimezone {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for UserTimezone {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Whole days from `earlier` to `later`, measured noon to noon.
pub fn days_between(tz: &UserTimezone, earlier: NaiveDate, later: NaiveDate) -> i64 {
    (tz.noon_of(later) - tz.noon_of(earlier)).num_days()
}

/// Parse a stored `YYYY-MM-DD` day key.
pub fn parse_day_key(raw: &str) -> Result<NaiveDate, ValidationError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| ValidationError::InvalidDate(raw.to_string()))
}

pub fn format_day_key(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}

fn noon() -> NaiveTime {
    NaiveTime::from_hms_opt(12, 0, 0).unwrap_or(NaiveTime::MIN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parses_offsets() {
        assert_eq!("UTC".parse::<UserTimezone>().unwrap(), UserTimezone::utc());
        assert_eq!("+09:00".parse::<UserTimezone>().unwrap().offset().local_minus_utc(), 9 * 3600);
        assert_eq!(
            "-0530".parse::<UserTimezone>().unwrap().offset().local_minus_utc(),
            -(5 * 3600 + 30 * 60)
        );
        assert_eq!("UTC+2".parse::<UserTimezone>().unwrap().to_string(), "+02:00");
        assert!("Mars/Olympus".parse::<UserTimezone>().is_err());
        assert!("+25:00".parse::<UserTimezone>().is_err());
    }

    #[test]
    fn day_key_follows_local_date() {
        let tokyo: UserTimezone = "+09:00".parse().unwrap();
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 20, 30, 0).unwrap();
        assert_eq!(tokyo.day_key(now), NaiveDate::from_ymd_opt(2024, 3, 10).unwrap());
        assert_eq!(UserTimezone::utc().day_key(now), NaiveDate::from_ymd_opt(2024, 3, 9).unwrap());
    }

    #[test]
    fn days_between_counts_whole_days() {
        let tz = UserTimezone::utc();
        let a = NaiveDate::from_ymd_opt(2024, 2, 27).unwrap();
        let b = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert_eq!(days_between(&tz, a, b), 3);
        assert_eq!(days_between(&tz, b, b), 0);
    }

    #[test]
    fn start_of_day_is_local_midnight() {
        let tz: UserTimezone = "-05:00".parse().unwrap();
        let day = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        assert_eq!(tz.start_of(day), Utc.with_ymd_and_hms(2024, 6, 1, 5, 0, 0).unwrap());
    }

    #[test]
    fn day_key_round_trip_rejects_garbage() {
        let day = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();
        assert_eq!(parse_day_key(&format_day_key(day)).unwrap(), day);
        assert_eq!(
            parse_day_key("yesterday"),
            Err(ValidationError::InvalidDate("yesterday".into()))
        );
    }
}
