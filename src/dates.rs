use chrono::{Datelike, Duration, Local, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Highest year a `DateKey` can encode with a four digit year field.
pub const MAX_KEY_YEAR: i32 = 9999;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DateKeyError {
    #[error("date key must look like YYYY-MM-DD: {0:?}")]
    Pattern(String),
    #[error("not a calendar day: {0}")]
    NotACalendarDay(String),
}

/// Canonical `YYYY-MM-DD` identifier of one civil day.
///
/// Ordering is chronological, so a `BTreeMap<DateKey, _>` serializes sorted by date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DateKey(NaiveDate);

impl DateKey {
    pub fn new(date: NaiveDate) -> Option<Self> {
        (0..=MAX_KEY_YEAR)
            .contains(&date.year())
            .then_some(DateKey(date))
    }

    pub fn parse(raw: &str) -> Result<Self, DateKeyError> {
        if !matches_key_pattern(raw) {
            return Err(DateKeyError::Pattern(raw.to_string()));
        }
        let field = |range: std::ops::Range<usize>| raw[range].parse::<u32>().ok();
        let (Some(year), Some(month), Some(day)) = (field(0..4), field(5..7), field(8..10)) else {
            return Err(DateKeyError::Pattern(raw.to_string()));
        };
        NaiveDate::from_ymd_opt(year as i32, month, day)
            .map(DateKey)
            .ok_or_else(|| DateKeyError::NotACalendarDay(raw.to_string()))
    }

    pub fn date(&self) -> NaiveDate {
        self.0
    }

    pub fn year(&self) -> i32 {
        self.0.year()
    }

    pub fn noon(&self) -> NaiveDateTime {
        self.0.and_time(noon())
    }
}

impl fmt::Display for DateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02}",
            self.0.year(),
            self.0.month(),
            self.0.day()
        )
    }
}

impl FromStr for DateKey {
    type Err = DateKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DateKey::parse(s)
    }
}

impl Serialize for DateKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DateKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DateKey::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// `^\d{4}-\d{2}-\d{2}$`
pub fn matches_key_pattern(raw: &str) -> bool {
    let bytes = raw.as_bytes();
    bytes.len() == 10
        && bytes.iter().enumerate().all(|(idx, b)| match idx {
            4 | 7 => *b == b'-',
            _ => b.is_ascii_digit(),
        })
}

fn noon() -> NaiveTime {
    NaiveTime::from_hms_opt(12, 0, 0).unwrap_or(NaiveTime::MIN)
}

/// Midday of the given civil day. Day arithmetic from noon never crosses a
/// date boundary when a clock shift happens overnight.
pub fn local_noon(year: i32, month0: u32, day: u32) -> Option<NaiveDateTime> {
    NaiveDate::from_ymd_opt(year, month0 + 1, day).map(|d| d.and_time(noon()))
}

pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// Monday is 0, Sunday is 6.
pub fn iso_weekday_index(date: NaiveDate) -> u32 {
    date.weekday().num_days_from_monday()
}

pub fn date_key(at: NaiveDateTime) -> Option<DateKey> {
    DateKey::new(at.date())
}

pub fn parse_date_key(key: &str) -> Result<NaiveDateTime, DateKeyError> {
    DateKey::parse(key).map(|k| k.noon())
}

/// Steps whole days and re-anchors the result to noon.
pub fn add_days(at: NaiveDateTime, days: i64) -> Option<NaiveDateTime> {
    at.date()
        .checked_add_signed(Duration::days(days))
        .map(|d| d.and_time(noon()))
}

pub fn days_in_month(year: i32, month0: u32) -> u32 {
    let Some(first) = NaiveDate::from_ymd_opt(year, month0 + 1, 1) else {
        return 0;
    };
    let next = if month0 >= 11 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month0 + 2, 1)
    };
    match next {
        Some(next) => (next - first).num_days() as u32,
        None => 31,
    }
}

pub fn days_in_year(year: i32) -> u32 {
    (0..12).map(|m| days_in_month(year, m)).sum()
}

/// Inclusive range of day keys, always walked from the earlier to the later key.
pub struct DateRange {
    next: Option<NaiveDateTime>,
    last: NaiveDateTime,
}

impl Iterator for DateRange {
    type Item = DateKey;

    fn next(&mut self) -> Option<DateKey> {
        let current = self.next?;
        if current > self.last {
            self.next = None;
            return None;
        }
        self.next = if current == self.last {
            None
        } else {
            add_days(current, 1)
        };
        date_key(current)
    }
}

pub fn date_range(from: DateKey, to: DateKey) -> DateRange {
    let (first, last) = if from <= to { (from, to) } else { (to, from) };
    DateRange {
        next: Some(first.noon()),
        last: last.noon(),
    }
}

pub fn iterate_date_range<F>(from: DateKey, to: DateKey, mut visit: F)
where
    F: FnMut(DateKey),
{
    for key in date_range(from, to) {
        visit(key);
    }
}
