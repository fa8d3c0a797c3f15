//! Day-of-week sets and wall-clock times for schedule windows.

use std::fmt;

use chrono::{Datelike, NaiveDateTime, Timelike, Weekday};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// How a remote source numbers the days of the week.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DayEncoding {
    /// Monday=1 .. Sunday=7 (canonical).
    #[default]
    MondayOne,
    /// Sunday=0 .. Saturday=6, as written by the companion day-picker.
    SundayZero,
}

/// Set of weekdays, stored as a bitmask over Monday=1..Sunday=7.
///
/// Serialized as the canonical Monday=1 numbers. Other encodings are
/// converted only through [`Weekdays::decode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "Vec<u8>", into = "Vec<u8>")]
pub struct Weekdays(u8);

impl Weekdays {
    pub const ALL: Weekdays = Weekdays(0b0111_1111);
    pub const WEEKDAYS: Weekdays = Weekdays(0b0001_1111);

    pub fn from_monday_one(days: &[u8]) -> Self {
        Self::decode(days, DayEncoding::MondayOne)
    }

    pub fn from_sunday_zero(days: &[u8]) -> Self {
        Self::decode(days, DayEncoding::SundayZero)
    }

    pub fn decode(days: &[u8], encoding: DayEncoding) -> Self {
        let mut mask = 0u8;
        for &raw in days {
            let canonical = match encoding {
                DayEncoding::MondayOne if (1..=7).contains(&raw) => Some(raw),
                DayEncoding::SundayZero if raw == 0 => Some(7),
                DayEncoding::SundayZero if raw <= 6 => Some(raw),
                _ => None,
            };
            match canonical {
                Some(day) => mask |= 1 << (day - 1),
                None => warn!(day = raw, ?encoding, "dropping out-of-range day of week"),
            }
        }
        Weekdays(mask)
    }

    pub fn contains(&self, day: Weekday) -> bool {
        let n = day.number_from_monday() as u8;
        self.0 & (1 << (n - 1)) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Canonical Monday=1 numbers in ascending order.
    pub fn numbers(&self) -> Vec<u8> {
        (1..=7u8).filter(|d| self.0 & (1 << (d - 1)) != 0).collect()
    }
}

impl From<Vec<u8>> for Weekdays {
    fn from(days: Vec<u8>) -> Self {
        Weekdays::from_monday_one(&days)
    }
}

impl From<Weekdays> for Vec<u8> {
    fn from(days: Weekdays) -> Self {
        days.numbers()
    }
}

/// A wall-clock `HH:MM`, minute precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeOfDay {
    minute_of_day: u16,
}

impl TimeOfDay {
    pub fn new(hour: u8, minute: u8) -> Option<Self> {
        if hour > 23 || minute > 59 {
            return None;
        }
        Some(Self {
            minute_of_day: hour as u16 * 60 + minute as u16,
        })
    }

    /// Parse `"HH:MM"` (a single-digit hour is accepted).
    pub fn parse(s: &str) -> Option<Self> {
        let (h, m) = s.trim().split_once(':')?;
        if h.is_empty() || h.len() > 2 || m.len() != 2 {
            return None;
        }
        Self::new(h.parse().ok()?, m.parse().ok()?)
    }

    /// Truncates seconds.
    pub fn of(at: &NaiveDateTime) -> Self {
        Self {
            minute_of_day: (at.hour() * 60 + at.minute()) as u16,
        }
    }

    pub fn minute_of_day(&self) -> u16 {
        self.minute_of_day
    }

    /// Whether `self` lies in `[start, end]`, both ends inclusive.
    /// `start > end` is an overnight window.
    pub fn within(&self, start: TimeOfDay, end: TimeOfDay) -> bool {
        if start <= end {
            *self >= start && *self <= end
        } else {
            *self >= start || *self <= end
        }
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.minute_of_day / 60, self.minute_of_day % 60)
    }
}

/// Day and time of `at` as the evaluator sees them.
pub fn day_and_time(at: &NaiveDateTime) -> (Weekday, TimeOfDay) {
    (at.weekday(), TimeOfDay::of(at))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: &str) -> TimeOfDay {
        TimeOfDay::parse(s).unwrap()
    }

    #[test]
    fn parses_and_formats() {
        assert_eq!(t("08:05").to_string(), "08:05");
        assert_eq!(t("7:30").to_string(), "07:30");
        assert!(TimeOfDay::parse("24:00").is_none());
        assert!(TimeOfDay::parse("12:60").is_none());
        assert!(TimeOfDay::parse("noon").is_none());
        assert!(TimeOfDay::parse("12:5").is_none());
    }

    #[test]
    fn same_day_window_is_inclusive_both_ends() {
        assert!(t("08:00").within(t("08:00"), t("20:00")));
        assert!(t("20:00").within(t("08:00"), t("20:00")));
        assert!(!t("20:01").within(t("08:00"), t("20:00")));
        assert!(!t("07:59").within(t("08:00"), t("20:00")));
    }

    #[test]
    fn overnight_window_wraps() {
        assert!(t("23:30").within(t("22:00"), t("06:00")));
        assert!(t("05:00").within(t("22:00"), t("06:00")));
        assert!(!t("12:00").within(t("22:00"), t("06:00")));
    }

    #[test]
    fn sunday_zero_maps_to_canonical_sunday_seven() {
        let days = Weekdays::from_sunday_zero(&[0, 1, 6]);
        assert_eq!(days.numbers(), vec![1, 6, 7]);
        assert!(days.contains(Weekday::Sun));
        assert!(days.contains(Weekday::Mon));
        assert!(days.contains(Weekday::Sat));
        assert!(!days.contains(Weekday::Tue));
    }

    #[test]
    fn out_of_range_days_are_dropped() {
        assert_eq!(Weekdays::from_monday_one(&[0, 3, 8]).numbers(), vec![3]);
        assert_eq!(Weekdays::from_sunday_zero(&[7]).numbers(), Vec::<u8>::new());
    }

    #[test]
    fn serializes_canonical_numbers() {
        let days = Weekdays::WEEKDAYS;
        assert_eq!(serde_json::to_string(&days).unwrap(), "[1,2,3,4,5]");
        let back: Weekdays = serde_json::from_str("[6,7]").unwrap();
        assert!(back.contains(Weekday::Sun));
    }
}
