//! Date tokens relative to the measurement year
//!
//! Testers write dates such as `1/1/MY`, `12/31/MY-1` or `6/15/2026`. This
//! module resolves those tokens against a measurement year and exposes the
//! shared patterns used by the scenario parsers to find dates and date
//! ranges inside free text.

use chrono::{Datelike, Days, NaiveDate};
use lazy_static::lazy_static;
use regex::Regex;

/// A single date with digits, e.g. `1/1/MY`, `12/31/MY-1`, `6/15/2026`
pub const DATE_PART: &str = r"\d{1,4}[-/.]\d{1,2}[-/.](?:MY(?:[-+]\d+)?|\d{2,4})";

/// A date or a bare measurement-year reference (`MY`, `MY-1`)
pub const DATE_PART_FULL: &str =
    r"(?:\d{1,4}[-/.]\d{1,2}[-/.](?:MY(?:[-+]\d+)?|\d{2,4})|\bMY(?:[-+]\d+)?\b)";

lazy_static! {
    static ref MY_TOKEN: Regex = Regex::new(r"(?i)\bmy\b(?:\s*([+-])\s*(\d+))?").unwrap();
    static ref NUMERIC_PARTS: Regex =
        Regex::new(r"^(\d{1,4})[-/.](\d{1,2})[-/.](\d{1,4})$").unwrap();
    static ref YEAR_ONLY: Regex = Regex::new(r"^\d{4}$").unwrap();
    static ref SERIAL: Regex = Regex::new(r"^\d{1,6}(?:\.\d+)?$").unwrap();

    /// Any single date token
    pub static ref DATE_TOKEN: Regex = Regex::new(&format!("(?i){DATE_PART_FULL}")).unwrap();

    /// A single date token that carries digits (no bare `MY`)
    pub static ref DIGIT_DATE_TOKEN: Regex = Regex::new(&format!("(?i){DATE_PART}")).unwrap();

    /// A date pair such as `1/1/MY-1 to 12/31/MY`
    pub static ref DATE_RANGE: Regex = Regex::new(&format!(
        r"(?i)({DATE_PART_FULL})\s*(?:-|–|—|\bto\b|\buntil\b|\bthru\b|\bthrough\b)\s*({DATE_PART_FULL})"
    ))
    .unwrap();
}

/// Textual formats tried after the numeric forms
const TEXT_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%b %d %Y",
    "%B %d %Y",
    "%b %d, %Y",
    "%B %d, %Y",
    "%d %b %Y",
    "%d %B %Y",
    "%Y%m%d",
];

/// Resolves date tokens against a fixed measurement year
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateResolver {
    year: i32,
}

impl DateResolver {
    /// Create a resolver for the given measurement year
    #[must_use]
    pub const fn new(year: i32) -> Self {
        Self { year }
    }

    /// The measurement year
    #[must_use]
    pub const fn year(&self) -> i32 {
        self.year
    }

    /// January 1 of the measurement year
    #[must_use]
    pub fn year_start(&self) -> NaiveDate {
        ymd(self.year, 1, 1)
    }

    /// December 31 of the measurement year
    #[must_use]
    pub fn year_end(&self) -> NaiveDate {
        ymd(self.year, 12, 31)
    }

    /// A date inside the measurement year (or a year offset from it)
    #[must_use]
    pub fn date_in_year(&self, offset: i32, month: u32, day: u32) -> NaiveDate {
        ymd(self.year + offset, month, day)
    }

    /// Replace every `MY`, `MY-n` and `MY+n` token with a concrete year
    #[must_use]
    pub fn substitute(&self, token: &str) -> String {
        MY_TOKEN
            .replace_all(token, |caps: &regex::Captures<'_>| {
                let offset = match (caps.get(1), caps.get(2)) {
                    (Some(sign), Some(n)) => {
                        let n: i32 = n.as_str().parse().unwrap_or(0);
                        if sign.as_str() == "-" { -n } else { n }
                    }
                    _ => 0,
                };
                (self.year + offset).to_string()
            })
            .into_owned()
    }

    /// Parse a date token, returning `None` when it cannot be understood
    #[must_use]
    pub fn try_parse(&self, token: &str) -> Option<NaiveDate> {
        let trimmed = token.trim();
        if trimmed.is_empty() {
            return None;
        }
        parse_calendar_date(&self.substitute(trimmed))
    }

    /// Parse a date token; unparseable input resolves to January 1 of the
    /// measurement year
    #[must_use]
    pub fn parse_date_str(&self, token: &str) -> NaiveDate {
        self.try_parse(token).unwrap_or_else(|| {
            log::debug!("Unparseable date token '{token}', using start of MY {}", self.year);
            self.year_start()
        })
    }
}

/// Parse a concrete calendar date (no measurement-year tokens)
///
/// Accepts US month-first numeric dates (`6/15/2026`, `6-15-26`), ISO and
/// `YYYY/M/D` forms, day-first dates when the first part cannot be a month,
/// bare years, spreadsheet serial numbers, and a handful of textual formats.
#[must_use]
pub fn parse_calendar_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    if let Some(caps) = NUMERIC_PARTS.captures(s) {
        let a: u32 = caps[1].parse().ok()?;
        let b: u32 = caps[2].parse().ok()?;
        let c: u32 = caps[3].parse().ok()?;

        if caps[1].len() == 4 {
            return NaiveDate::from_ymd_opt(a as i32, b, c);
        }

        let year = expand_year(c, caps[3].len());
        if a > 12 && b <= 12 {
            return NaiveDate::from_ymd_opt(year, b, a);
        }
        return NaiveDate::from_ymd_opt(year, a, b);
    }

    if YEAR_ONLY.is_match(s) {
        return NaiveDate::from_ymd_opt(s.parse().ok()?, 1, 1);
    }

    for format in TEXT_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(s, format) {
            return Some(date);
        }
        if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(s, format) {
            return Some(dt.date());
        }
    }

    if SERIAL.is_match(s) {
        let serial: f64 = s.parse().ok()?;
        return from_serial(serial);
    }

    None
}

/// Convert a spreadsheet serial day number to a date
#[must_use]
pub fn from_serial(serial: f64) -> Option<NaiveDate> {
    // Serial numbers below 61 fall before the phantom 1900-02-29
    if !(1.0..=2_958_465.0).contains(&serial) {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?;
    epoch.checked_add_days(Days::new(serial.trunc() as u64))
}

/// First day of each month from January MY-1 through December MY
#[must_use]
pub fn coverage_months(year: i32) -> [NaiveDate; 24] {
    std::array::from_fn(|i| {
        let year_offset = (i / 12) as i32 - 1;
        ymd(year + year_offset, (i % 12) as u32 + 1, 1)
    })
}

/// Add a signed number of days, saturating at the calendar bounds
#[must_use]
pub fn shift_days(date: NaiveDate, days: i64) -> NaiveDate {
    let shifted = if days >= 0 {
        date.checked_add_days(Days::new(days as u64))
    } else {
        date.checked_sub_days(Days::new(days.unsigned_abs()))
    };
    shifted.unwrap_or(date)
}

/// Whole years between a birth date and a reference date
#[must_use]
pub fn age_on(birth: NaiveDate, reference: NaiveDate) -> i32 {
    let mut age = reference.year() - birth.year();
    if (reference.month(), reference.day()) < (birth.month(), birth.day()) {
        age -= 1;
    }
    age
}

fn expand_year(value: u32, digits: usize) -> i32 {
    if digits <= 2 {
        2000 + value as i32
    } else {
        value as i32
    }
}

fn ymd(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap_or(NaiveDate::MIN)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_measurement_year_tokens() {
        let resolver = DateResolver::new(2026);
        assert_eq!(resolver.parse_date_str("1/1/MY"), date(2026, 1, 1));
        assert_eq!(resolver.parse_date_str("12/31/MY-1"), date(2025, 12, 31));
        assert_eq!(resolver.parse_date_str("3/15/my+1"), date(2027, 3, 15));
        assert_eq!(resolver.parse_date_str("6/30/MY - 2"), date(2024, 6, 30));
        assert_eq!(resolver.parse_date_str("MY"), date(2026, 1, 1));
    }

    #[test]
    fn test_unparseable_defaults_to_start_of_year() {
        let resolver = DateResolver::new(2026);
        assert_eq!(resolver.parse_date_str("sometime in spring"), date(2026, 1, 1));
        assert_eq!(resolver.parse_date_str(""), date(2026, 1, 1));
        assert_eq!(resolver.parse_date_str("13/13/2026"), date(2026, 1, 1));
        assert!(resolver.try_parse("not a date").is_none());
    }

    #[test]
    fn test_concrete_formats() {
        assert_eq!(parse_calendar_date("6/15/2026"), Some(date(2026, 6, 15)));
        assert_eq!(parse_calendar_date("2026-06-15"), Some(date(2026, 6, 15)));
        assert_eq!(parse_calendar_date("2026/6/15"), Some(date(2026, 6, 15)));
        assert_eq!(parse_calendar_date("25/12/2026"), Some(date(2026, 12, 25)));
        assert_eq!(parse_calendar_date("6/15/26"), Some(date(2026, 6, 15)));
        assert_eq!(parse_calendar_date("2026-06-15 00:00:00"), Some(date(2026, 6, 15)));
        assert_eq!(parse_calendar_date("2026"), Some(date(2026, 1, 1)));
        assert_eq!(parse_calendar_date("46188"), Some(date(2026, 6, 15)));
    }

    #[test]
    fn test_date_range_pattern() {
        let caps = DATE_RANGE.captures("Enrolled 1/1/MY-1 TO 12/31/MY prod id 2").unwrap();
        assert_eq!(&caps[1], "1/1/MY-1");
        assert_eq!(&caps[2], "12/31/MY");

        let caps = DATE_RANGE.captures("1/1/MY-12/31/MY").unwrap();
        assert_eq!(&caps[1], "1/1/MY");
        assert_eq!(&caps[2], "12/31/MY");
    }

    #[test]
    fn test_coverage_months() {
        let months = coverage_months(2026);
        assert_eq!(months[0], date(2025, 1, 1));
        assert_eq!(months[11], date(2025, 12, 1));
        assert_eq!(months[12], date(2026, 1, 1));
        assert_eq!(months[23], date(2026, 12, 1));
    }

    #[test]
    fn test_age_on() {
        assert_eq!(age_on(date(1960, 6, 15), date(2026, 12, 31)), 66);
        assert_eq!(age_on(date(1960, 6, 15), date(2026, 6, 14)), 65);
    }
}
