use std::fmt;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, Timelike};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::constants::{MAX_EVENT_YEAR, MIN_EVENT_YEAR};

const ISO_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// A calendar date-time that passed [`create_valid_date`].
///
/// The inner value can only be built through the validation gate, so holding a
/// `ValidDate` means the year is within the supported range and the components
/// describe a real day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ValidDate(NaiveDateTime);

impl ValidDate {
    /// Re-validate an arbitrary chrono value. Sub-second precision is dropped.
    pub fn from_naive(dt: NaiveDateTime) -> Option<Self> {
        create_valid_date(
            dt.year(),
            dt.month(),
            dt.day(),
            dt.hour(),
            dt.minute(),
            dt.second(),
        )
    }

    pub fn as_naive(&self) -> NaiveDateTime {
        self.0
    }

    pub fn date(&self) -> NaiveDate {
        self.0.date()
    }

    pub fn year(&self) -> i32 {
        self.0.year()
    }

    pub fn month(&self) -> u32 {
        self.0.month()
    }

    pub fn day(&self) -> u32 {
        self.0.day()
    }

    pub fn hour(&self) -> u32 {
        self.0.hour()
    }

    pub fn minute(&self) -> u32 {
        self.0.minute()
    }

    pub fn second(&self) -> u32 {
        self.0.second()
    }

    /// Keep the date only when its year is at least `min_year`.
    pub fn not_before_year(self, min_year: i32) -> Option<Self> {
        (self.year() >= min_year).then_some(self)
    }
}

impl fmt::Display for ValidDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(ISO_FORMAT))
    }
}

impl Serialize for ValidDate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ValidDate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&raw, ISO_FORMAT)
            .ok()
            .and_then(ValidDate::from_naive)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid event date: {raw}")))
    }
}

pub fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

/// Number of days in `month` of `year`; 0 for a month outside 1..=12.
pub fn days_in_month(month: u32, year: i32) -> u32 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 if is_leap_year(year) => 29,
        2 => 28,
        _ => 0,
    }
}

/// The single validation gate for every date produced by the import pipeline.
///
/// Rejects years outside 1900..=2100, months outside 1..=12, days past the end
/// of the month and out-of-range clock components. The constructed value is
/// read back and compared with the input so that calendar overflow (Feb 30
/// rolling into March) can never slip through.
pub fn create_valid_date(
    year: i32,
    month: u32,
    day: u32,
    hour: u32,
    minute: u32,
    second: u32,
) -> Option<ValidDate> {
    if !(MIN_EVENT_YEAR..=MAX_EVENT_YEAR).contains(&year) {
        return None;
    }
    if !(1..=12).contains(&month) {
        return None;
    }
    if day == 0 || day > days_in_month(month, year) {
        return None;
    }
    if hour > 23 || minute > 59 || second > 59 {
        return None;
    }

    let dt = NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, second)?;
    let echoes = dt.year() == year
        && dt.month() == month
        && dt.day() == day
        && dt.hour() == hour
        && dt.minute() == minute
        && dt.second() == second;
    echoes.then_some(ValidDate(dt))
}

/// Date-only shorthand for [`create_valid_date`].
pub fn create_valid_day(year: i32, month: u32, day: u32) -> Option<ValidDate> {
    create_valid_date(year, month, day, 0, 0, 0)
}

pub fn from_epoch_seconds(seconds: i64) -> Option<ValidDate> {
    DateTime::from_timestamp(seconds, 0).and_then(|dt| ValidDate::from_naive(dt.naive_utc()))
}

pub fn from_epoch_millis(millis: i64) -> Option<ValidDate> {
    from_epoch_seconds(millis.div_euclid(1_000))
}

pub fn from_epoch_micros(micros: i64) -> Option<ValidDate> {
    from_epoch_seconds(micros.div_euclid(1_000_000))
}

/// Returns the first candidate that exists and validated.
pub fn first_valid<I>(candidates: I) -> Option<ValidDate>
where
    I: IntoIterator<Item = Option<ValidDate>>,
{
    candidates.into_iter().flatten().next()
}

/// Runs `parse` over the present candidates in priority order and keeps the
/// first one that produces a valid date.
pub fn best_of<'a, I, F>(candidates: I, parse: F) -> Option<ValidDate>
where
    I: IntoIterator<Item = Option<&'a str>>,
    F: Fn(&str) -> Option<ValidDate>,
{
    candidates.into_iter().flatten().find_map(|raw| parse(raw))
}

static ISO_TIMESTAMP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(\d{4})-(\d{2})-(\d{2})(?:[T ](\d{2}):(\d{2})(?::(\d{2})(?:[.,]\d+)?)?)?\s*(Z|z|UTC|[+-]\d{2}(?::?\d{2})?)?$",
    )
    .expect("valid ISO timestamp pattern")
});

static SLASH_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(\d{1,4})/(\d{1,2})/(\d{1,4})(?:[ T,]+(\d{1,2}):(\d{2})(?::(\d{2}))?\s*([AaPp])\.?[Mm]\.?)?$",
    )
    .expect("valid slash date pattern")
});

static YEAR_FIRST_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{4})[-./](\d{1,2})[-./](\d{1,2})(?:[ T](\d{1,2}):(\d{2})(?::(\d{2}))?)?$")
        .expect("valid year-first date pattern")
});

static DAY_FIRST_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{1,2})[-.](\d{1,2})[-.](\d{4})(?:\s+(\d{1,2}):(\d{2})(?::(\d{2}))?)?$")
        .expect("valid day-first date pattern")
});

static MONTH_YEAR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Za-z]{3,9})\.?,?\s+(\d{4})$").expect("valid month-year pattern")
});

static MONTH_DAY_YEAR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Za-z]{3,9})\.?\s+(\d{1,2})(?:st|nd|rd|th)?,?\s+(\d{4})$")
        .expect("valid month-day-year pattern")
});

static DAY_MONTH_YEAR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{1,2})(?:st|nd|rd|th)?\s+([A-Za-z]{3,9})\.?,?\s+(\d{4})$")
        .expect("valid day-month-year pattern")
});

static BARE_YEAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d{4})$").expect("valid year pattern"));

static EPOCH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(-?)(\d{1,14})(?:\.\d+)?$").expect("valid epoch pattern"));

const MONTH_NAMES: [&str; 12] = [
    "january",
    "february",
    "march",
    "april",
    "may",
    "june",
    "july",
    "august",
    "september",
    "october",
    "november",
    "december",
];

// Epoch values with more integer digits than this are milliseconds.
const EPOCH_SECONDS_MAX_DIGITS: usize = 10;

/// Converts the many date spellings found in export files into [`ValidDate`]s.
#[derive(Debug, Clone, Copy)]
pub struct DateNormalizer {
    month_first: bool,
}

impl Default for DateNormalizer {
    fn default() -> Self {
        Self { month_first: true }
    }
}

impl DateNormalizer {
    pub fn new(month_first: bool) -> Self {
        Self { month_first }
    }

    pub fn month_first(&self) -> bool {
        self.month_first
    }

    /// Try every supported format in order; `None` when nothing validates.
    pub fn parse(&self, text: &str) -> Option<ValidDate> {
        let text = text.trim();
        if text.is_empty() || text.len() > 64 {
            return None;
        }

        parse_iso_timestamp(text)
            .or_else(|| self.parse_slash(text))
            .or_else(|| parse_dash_or_dot(text))
            .or_else(|| parse_textual(text))
            .or_else(|| {
                // A four-digit number is a year, never an epoch offset.
                if BARE_YEAR.is_match(text) {
                    parse_bare_year(text)
                } else {
                    parse_epoch(text)
                }
            })
    }

    fn parse_slash(&self, text: &str) -> Option<ValidDate> {
        let caps = SLASH_DATE.captures(text)?;
        let first = caps.get(1)?.as_str();
        let second: u32 = caps[2].parse().ok()?;
        let third = caps.get(3)?.as_str();
        let (hour, minute, sec) = clock(
            caps.get(4).map(|m| m.as_str()),
            caps.get(5).map(|m| m.as_str()),
            caps.get(6).map(|m| m.as_str()),
            caps.get(7).map(|m| m.as_str()),
        )?;

        if first.len() == 4 {
            let year: i32 = first.parse().ok()?;
            let day: u32 = third.parse().ok()?;
            return create_valid_date(year, second, day, hour, minute, sec);
        }
        if third.len() != 2 && third.len() != 4 {
            return None;
        }

        let a: u32 = first.parse().ok()?;
        let year = expand_year(third)?;
        let month_first = create_valid_date(year, a, second, hour, minute, sec);
        let day_first = create_valid_date(year, second, a, hour, minute, sec);
        if self.month_first {
            first_valid([month_first, day_first])
        } else {
            first_valid([day_first, month_first])
        }
    }
}

/// Parse with the default (month-first) preference.
pub fn parse_date(text: &str) -> Option<ValidDate> {
    DateNormalizer::default().parse(text)
}

fn parse_iso_timestamp(text: &str) -> Option<ValidDate> {
    let caps = ISO_TIMESTAMP.captures(text)?;
    let year: i32 = caps[1].parse().ok()?;
    let month: u32 = caps[2].parse().ok()?;
    let day: u32 = caps[3].parse().ok()?;
    let (hour, minute, second) = clock(
        caps.get(4).map(|m| m.as_str()),
        caps.get(5).map(|m| m.as_str()),
        caps.get(6).map(|m| m.as_str()),
        None,
    )?;
    let local = create_valid_date(year, month, day, hour, minute, second)?;

    match caps.get(7).map(|m| m.as_str()) {
        None | Some("Z") | Some("z") | Some("UTC") => Some(local),
        Some(offset) => {
            let minutes = offset_minutes(offset)?;
            ValidDate::from_naive(local.as_naive() - Duration::minutes(minutes))
        }
    }
}

fn parse_dash_or_dot(text: &str) -> Option<ValidDate> {
    if let Some(caps) = YEAR_FIRST_DATE.captures(text) {
        let (hour, minute, second) = clock(
            caps.get(4).map(|m| m.as_str()),
            caps.get(5).map(|m| m.as_str()),
            caps.get(6).map(|m| m.as_str()),
            None,
        )?;
        return create_valid_date(
            caps[1].parse().ok()?,
            caps[2].parse().ok()?,
            caps[3].parse().ok()?,
            hour,
            minute,
            second,
        );
    }

    let caps = DAY_FIRST_DATE.captures(text)?;
    let (hour, minute, second) = clock(
        caps.get(4).map(|m| m.as_str()),
        caps.get(5).map(|m| m.as_str()),
        caps.get(6).map(|m| m.as_str()),
        None,
    )?;
    create_valid_date(
        caps[3].parse().ok()?,
        caps[2].parse().ok()?,
        caps[1].parse().ok()?,
        hour,
        minute,
        second,
    )
}

fn parse_textual(text: &str) -> Option<ValidDate> {
    if let Some(caps) = MONTH_YEAR.captures(text) {
        return create_valid_day(caps[2].parse().ok()?, month_from_name(&caps[1])?, 1);
    }
    if let Some(caps) = MONTH_DAY_YEAR.captures(text) {
        return create_valid_day(
            caps[3].parse().ok()?,
            month_from_name(&caps[1])?,
            caps[2].parse().ok()?,
        );
    }
    let caps = DAY_MONTH_YEAR.captures(text)?;
    create_valid_day(
        caps[3].parse().ok()?,
        month_from_name(&caps[2])?,
        caps[1].parse().ok()?,
    )
}

fn parse_bare_year(text: &str) -> Option<ValidDate> {
    let caps = BARE_YEAR.captures(text)?;
    create_valid_day(caps[1].parse().ok()?, 1, 1)
}

fn parse_epoch(text: &str) -> Option<ValidDate> {
    let caps = EPOCH.captures(text)?;
    let digits = &caps[2];
    let mut value: i64 = digits.parse().ok()?;
    if !caps[1].is_empty() {
        value = -value;
    }
    if digits.len() > EPOCH_SECONDS_MAX_DIGITS {
        from_epoch_millis(value)
    } else {
        from_epoch_seconds(value)
    }
}

/// Month number for an English month name or its abbreviation ("Sep", "Sept").
pub fn month_from_name(name: &str) -> Option<u32> {
    let lower = name.to_ascii_lowercase();
    if lower.len() < 3 {
        return None;
    }
    MONTH_NAMES
        .iter()
        .position(|full| full.starts_with(&lower))
        .map(|idx| idx as u32 + 1)
}

fn expand_year(raw: &str) -> Option<i32> {
    let value: i32 = raw.parse().ok()?;
    match raw.len() {
        2 if value < 50 => Some(2000 + value),
        2 => Some(1900 + value),
        4 => Some(value),
        _ => None,
    }
}

fn clock(
    hour: Option<&str>,
    minute: Option<&str>,
    second: Option<&str>,
    meridiem: Option<&str>,
) -> Option<(u32, u32, u32)> {
    let Some(hour) = hour else {
        return Some((0, 0, 0));
    };
    let mut hour: u32 = hour.parse().ok()?;
    let minute: u32 = minute.map(str::parse).transpose().ok()?.unwrap_or(0);
    let second: u32 = second.map(str::parse).transpose().ok()?.unwrap_or(0);

    if let Some(m) = meridiem {
        if hour == 0 || hour > 12 {
            return None;
        }
        let pm = m.eq_ignore_ascii_case("p");
        hour = match (pm, hour) {
            (false, 12) => 0,
            (true, 12) => 12,
            (true, h) => h + 12,
            (false, h) => h,
        };
    }
    Some((hour, minute, second))
}

fn offset_minutes(offset: &str) -> Option<i64> {
    let sign = if offset.starts_with('-') { -1 } else { 1 };
    let digits: String = offset[1..].chars().filter(|c| c.is_ascii_digit()).collect();
    let (hours, minutes) = match digits.len() {
        2 => (digits.parse::<i64>().ok()?, 0),
        4 => (digits[..2].parse::<i64>().ok()?, digits[2..].parse::<i64>().ok()?),
        _ => return None,
    };
    if hours > 14 || minutes > 59 {
        return None;
    }
    Some(sign * (hours * 60 + minutes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(d: ValidDate) -> (i32, u32, u32) {
        (d.year(), d.month(), d.day())
    }

    fn ymdhms(d: ValidDate) -> (i32, u32, u32, u32, u32, u32) {
        (d.year(), d.month(), d.day(), d.hour(), d.minute(), d.second())
    }

    #[test]
    fn test_leap_years() {
        assert!(is_leap_year(2024));
        assert!(is_leap_year(2000));
        assert!(!is_leap_year(1900));
        assert!(!is_leap_year(2023));
        assert_eq!(days_in_month(2, 2024), 29);
        assert_eq!(days_in_month(2, 2100), 28);
        assert_eq!(days_in_month(13, 2024), 0);
    }

    #[test]
    fn test_valid_components_echo_input() {
        for year in [1900, 1999, 2000, 2023, 2024, 2100] {
            for month in 1..=12 {
                for day in 1..=days_in_month(month, year) {
                    let date = create_valid_date(year, month, day, 13, 45, 59)
                        .unwrap_or_else(|| panic!("{year}-{month}-{day} should validate"));
                    assert_eq!(ymdhms(date), (year, month, day, 13, 45, 59));
                }
            }
        }
    }

    #[test]
    fn test_calendar_overflow_is_rejected() {
        assert!(create_valid_day(2023, 2, 29).is_none());
        assert!(create_valid_day(2024, 2, 30).is_none());
        assert!(create_valid_day(2023, 4, 31).is_none());
        assert!(create_valid_day(2023, 13, 1).is_none());
        assert!(create_valid_day(2023, 0, 1).is_none());
        assert!(create_valid_day(2023, 1, 0).is_none());
        assert!(create_valid_day(1899, 12, 31).is_none());
        assert!(create_valid_day(2101, 1, 1).is_none());
        assert!(create_valid_date(2023, 1, 1, 24, 0, 0).is_none());
        assert!(create_valid_date(2023, 1, 1, 0, 60, 0).is_none());
        assert!(create_valid_date(2023, 1, 1, 0, 0, 60).is_none());
    }

    #[test]
    fn test_iso_timestamps() {
        let d = parse_date("2023-06-01").unwrap();
        assert_eq!(ymdhms(d), (2023, 6, 1, 0, 0, 0));

        let d = parse_date("2023-06-01T14:30:05Z").unwrap();
        assert_eq!(ymdhms(d), (2023, 6, 1, 14, 30, 5));

        let d = parse_date("2023-06-01T14:30:05.123+02:00").unwrap();
        assert_eq!(ymdhms(d), (2023, 6, 1, 12, 30, 5));

        let d = parse_date("2023-06-01 23:30-0230").unwrap();
        assert_eq!(ymdhms(d), (2023, 6, 2, 2, 0, 0));

        assert!(parse_date("2023-02-30").is_none());
    }

    #[test]
    fn test_slash_dates_respect_preference() {
        let us = DateNormalizer::new(true);
        let eu = DateNormalizer::new(false);

        assert_eq!(ymd(us.parse("03/04/2023").unwrap()), (2023, 3, 4));
        assert_eq!(ymd(eu.parse("03/04/2023").unwrap()), (2023, 4, 3));

        // Only one ordering validates, so both preferences agree.
        assert_eq!(ymd(us.parse("25/12/2023").unwrap()), (2023, 12, 25));
        assert_eq!(ymd(eu.parse("12/25/2023").unwrap()), (2023, 12, 25));

        assert_eq!(ymd(us.parse("6/1/23").unwrap()), (2023, 6, 1));
        assert_eq!(ymd(us.parse("6/1/87").unwrap()), (1987, 6, 1));
        assert_eq!(ymd(us.parse("2023/06/01").unwrap()), (2023, 6, 1));

        let d = us.parse("6/1/2023 9:15 PM").unwrap();
        assert_eq!(ymdhms(d), (2023, 6, 1, 21, 15, 0));
        let d = us.parse("6/1/2023 12:05 am").unwrap();
        assert_eq!(d.hour(), 0);
        assert!(us.parse("6/1/2023 13:05 PM").is_none());
    }

    #[test]
    fn test_dash_and_dot_dates() {
        assert_eq!(ymd(parse_date("2023.06.01").unwrap()), (2023, 6, 1));
        assert_eq!(ymd(parse_date("2023-6-1").unwrap()), (2023, 6, 1));
        assert_eq!(ymd(parse_date("01.06.2023").unwrap()), (2023, 6, 1));
        assert_eq!(ymd(parse_date("01-06-2023").unwrap()), (2023, 6, 1));
        assert!(parse_date("31.02.2023").is_none());
    }

    #[test]
    fn test_textual_dates() {
        assert_eq!(ymd(parse_date("Jan 2020").unwrap()), (2020, 1, 1));
        assert_eq!(ymd(parse_date("September 2019").unwrap()), (2019, 9, 1));
        assert_eq!(ymd(parse_date("Sept. 2019").unwrap()), (2019, 9, 1));
        assert_eq!(ymd(parse_date("June 1, 2023").unwrap()), (2023, 6, 1));
        assert_eq!(ymd(parse_date("1st June 2023").unwrap()), (2023, 6, 1));
        assert_eq!(ymd(parse_date("01 Jan 2020").unwrap()), (2020, 1, 1));
        assert!(parse_date("Smarch 2020").is_none());
        assert!(parse_date("Ju 2020").is_none());
    }

    #[test]
    fn test_bare_year_and_epochs() {
        assert_eq!(ymd(parse_date("1987").unwrap()), (1987, 1, 1));
        assert!(parse_date("1850").is_none());

        let seconds = parse_date("1685577600").unwrap();
        assert_eq!(ymdhms(seconds), (2023, 6, 1, 0, 0, 0));

        let millis = parse_date("1685577600000").unwrap();
        assert_eq!(ymdhms(millis), (2023, 6, 1, 0, 0, 0));

        let micros = from_epoch_micros(1_685_577_600_000_000).unwrap();
        assert_eq!(ymd(micros), (2023, 6, 1));
    }

    #[test]
    fn test_garbage_is_rejected() {
        let garbage = ["", "   ", "yesterday", "2023-13-01", "99/99/9999", "12:30", "not a date 2023"];
        for text in garbage {
            assert!(parse_date(text).is_none(), "{text:?} should not parse");
        }
    }

    #[test]
    fn test_candidate_combinators() {
        let picked =
            first_valid([None, create_valid_day(2023, 2, 30), create_valid_day(2020, 5, 5)]);
        assert_eq!(ymd(picked.unwrap()), (2020, 5, 5));

        let picked = best_of(
            [None, Some("garbage"), Some("2021-01-02"), Some("2022-01-01")],
            parse_date,
        );
        assert_eq!(ymd(picked.unwrap()), (2021, 1, 2));

        assert!(best_of([None, Some("nope")], parse_date).is_none());
    }

    #[test]
    fn test_serde_uses_iso_strings() {
        let date = create_valid_date(2023, 6, 1, 8, 0, 0).unwrap();
        let json = serde_json::to_string(&date).unwrap();
        assert_eq!(json, "\"2023-06-01T08:00:00\"");
        let back: ValidDate = serde_json::from_str(&json).unwrap();
        assert_eq!(back, date);
        assert!(serde_json::from_str::<ValidDate>("\"1800-01-01T00:00:00\"").is_err());
    }
}
