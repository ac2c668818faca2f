//! Periods, intervals and spans used by reporting
//!
//! Grouping stages bucket postings into calendar-aligned periods: days,
//! weeks starting on Sunday, months, quarters and years. Period expressions
//! such as `monthly`, `every 2 weeks` or `weekly from 2024-01-01 to
//! 2024-04-01` parse into a `DateInterval`.

use std::fmt;

use chrono::{Datelike, Days, Months, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Period types for recurring intervals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Period {
    /// Daily intervals
    Daily(u32),
    /// Weekly intervals
    Weekly(u32),
    /// Bi-weekly (every 2 weeks)
    Biweekly,
    /// Monthly intervals
    Monthly(u32),
    /// Bi-monthly (every 2 months)
    Bimonthly,
    /// Quarterly intervals (every 3 months)
    Quarterly(u32),
    /// Yearly intervals
    Yearly(u32),
}

impl Period {
    /// Get the period name as a string
    pub fn name(&self) -> String {
        match self {
            Period::Daily(1) => "daily".to_string(),
            Period::Daily(n) => format!("every {} days", n),
            Period::Weekly(1) => "weekly".to_string(),
            Period::Weekly(n) => format!("every {} weeks", n),
            Period::Biweekly => "biweekly".to_string(),
            Period::Monthly(1) => "monthly".to_string(),
            Period::Monthly(n) => format!("every {} months", n),
            Period::Bimonthly => "bimonthly".to_string(),
            Period::Quarterly(1) => "quarterly".to_string(),
            Period::Quarterly(n) => format!("every {} quarters", n),
            Period::Yearly(1) => "yearly".to_string(),
            Period::Yearly(n) => format!("every {} years", n),
        }
    }

    /// Add this period to a date; `None` past the representable range
    ///
    /// Month arithmetic clamps the day to the end of the target month.
    pub fn add_to_date(&self, date: NaiveDate) -> Option<NaiveDate> {
        let days = |n: u32| date.checked_add_days(Days::new(u64::from(n)));
        let months = |n: Option<u32>| n.and_then(|n| date.checked_add_months(Months::new(n)));
        match self {
            Period::Daily(n) => days(*n),
            Period::Weekly(n) => days(n.checked_mul(7)?),
            Period::Biweekly => days(14),
            Period::Monthly(n) => months(Some(*n)),
            Period::Bimonthly => months(Some(2)),
            Period::Quarterly(n) => months(n.checked_mul(3)),
            Period::Yearly(n) => months(n.checked_mul(12)),
        }
    }

    /// Start of the calendar period containing `date`
    ///
    /// Weeks start on Sunday. Multi-unit periods align to their base unit.
    pub fn align(&self, date: NaiveDate) -> NaiveDate {
        match self {
            Period::Daily(_) => date,
            Period::Weekly(_) | Period::Biweekly => find_start_of_week(date),
            Period::Monthly(_) | Period::Bimonthly => first_of_month(date.year(), date.month()),
            Period::Quarterly(_) => {
                let month = (date.month() - 1) / 3 * 3 + 1;
                first_of_month(date.year(), month)
            }
            Period::Yearly(_) => first_of_month(date.year(), 1),
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// A date interval with start, end, and period
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DateInterval {
    /// Start date of the interval
    pub start: Option<NaiveDate>,
    /// End date of the interval (exclusive)
    pub end: Option<NaiveDate>,
    /// Period for recurring intervals
    pub period: Option<Period>,
}

impl DateInterval {
    /// Create a new date interval
    pub fn new(start: Option<NaiveDate>, end: Option<NaiveDate>, period: Option<Period>) -> Self {
        Self { start, end, period }
    }

    /// Create an interval from a period expression
    pub fn from_period(period: Period) -> Self {
        Self { start: None, end: None, period: Some(period) }
    }

    /// Set the start date
    pub fn with_start(mut self, start: NaiveDate) -> Self {
        self.start = Some(start);
        self
    }

    /// Set the exclusive end date
    pub fn with_end(mut self, end: NaiveDate) -> Self {
        self.end = Some(end);
        self
    }

    /// Check if a date falls within this interval
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start.map_or(true, |start| date >= start) && self.end.map_or(true, |end| date < end)
    }

    /// Whether `date` lies at or beyond the end of the interval
    pub fn is_past(&self, date: NaiveDate) -> bool {
        self.end.map_or(false, |end| date >= end)
    }

    /// Start of the bucket containing `date`: the explicit start when
    /// given, else the calendar-aligned period start
    pub fn first_bucket(&self, date: NaiveDate) -> NaiveDate {
        match (self.start, self.period) {
            (Some(start), _) => start,
            (None, Some(period)) => period.align(date),
            (None, None) => date,
        }
    }

    /// Advance a date by one period; `None` when there is no period or the
    /// period does not move forward
    pub fn increment(&self, date: NaiveDate) -> Option<NaiveDate> {
        let next = self.period?.add_to_date(date)?;
        (next > date).then_some(next)
    }
}

impl fmt::Display for DateInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.period {
            Some(period) => write!(f, "{}", period)?,
            None => write!(f, "once")?,
        }
        if let Some(start) = self.start {
            write!(f, " from {}", start)?;
        }
        if let Some(end) = self.end {
            write!(f, " to {}", end)?;
        }
        Ok(())
    }
}

/// Inclusive range of dates covered by a report-generated entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateSpan {
    /// First day covered
    pub begin: NaiveDate,
    /// Last day covered
    pub end: NaiveDate,
}

impl DateSpan {
    /// Create a span; `end` is inclusive
    pub fn new(begin: NaiveDate, end: NaiveDate) -> Self {
        Self { begin, end }
    }

    /// Span for the half-open bucket `[begin, next)`
    pub fn from_bucket(begin: NaiveDate, next: NaiveDate) -> Self {
        let end = next.pred_opt().filter(|end| *end >= begin).unwrap_or(begin);
        Self { begin, end }
    }

    /// Check if a date falls within the span
    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.begin && date <= self.end
    }
}

impl fmt::Display for DateSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.begin, self.end)
    }
}

/// Errors that can occur during period parsing
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PeriodParseError {
    #[error("Invalid period format: {0}")]
    InvalidFormat(String),
    #[error("Unknown period keyword: {0}")]
    UnknownKeyword(String),
    #[error("Invalid number in period: {0}")]
    InvalidNumber(String),
    #[error("Invalid date in period: {0}")]
    InvalidDate(String),
    #[error("Missing period specification")]
    MissingPeriod,
}

/// Parse a period expression string
///
/// Accepts a recurrence keyword (`daily`, `weekly`, `biweekly`, `monthly`,
/// `bimonthly`, `quarterly`, `yearly`) or `every [N] unit`, optionally
/// followed by `from DATE` and `to DATE` (or `until DATE`). A bare
/// `from DATE to DATE` yields a range without a period.
pub fn parse_period(input: &str) -> Result<DateInterval, PeriodParseError> {
    let input = input.trim().to_lowercase();
    if input.is_empty() {
        return Err(PeriodParseError::MissingPeriod);
    }

    let words: Vec<&str> = input.split_whitespace().collect();
    let bound_at = words.iter().position(|w| matches!(*w, "from" | "since" | "to" | "until"));
    let (period_words, bound_words) = words.split_at(bound_at.unwrap_or(words.len()));

    let mut interval = match period_words {
        [] => DateInterval::default(),
        ["every", rest @ ..] => DateInterval::from_period(parse_every_period(rest)?),
        [keyword] => DateInterval::from_period(parse_period_keyword(keyword)?),
        _ => return Err(PeriodParseError::InvalidFormat(input.to_string())),
    };

    let mut rest = bound_words;
    while let [keyword, date, tail @ ..] = rest {
        let date = parse_date(date)?;
        match *keyword {
            "from" | "since" => interval.start = Some(date),
            "to" | "until" => interval.end = Some(date),
            _ => return Err(PeriodParseError::UnknownKeyword(keyword.to_string())),
        }
        rest = tail;
    }
    if !rest.is_empty() {
        return Err(PeriodParseError::InvalidFormat(input.to_string()));
    }

    if interval.period.is_none() && interval.start.is_none() && interval.end.is_none() {
        return Err(PeriodParseError::MissingPeriod);
    }
    Ok(interval)
}

fn parse_period_keyword(keyword: &str) -> Result<Period, PeriodParseError> {
    match keyword {
        "daily" => Ok(Period::Daily(1)),
        "weekly" => Ok(Period::Weekly(1)),
        "biweekly" => Ok(Period::Biweekly),
        "monthly" => Ok(Period::Monthly(1)),
        "bimonthly" => Ok(Period::Bimonthly),
        "quarterly" => Ok(Period::Quarterly(1)),
        "yearly" | "annually" => Ok(Period::Yearly(1)),
        _ => Err(PeriodParseError::UnknownKeyword(keyword.to_string())),
    }
}

/// Parse "every N period" expressions
fn parse_every_period(parts: &[&str]) -> Result<Period, PeriodParseError> {
    let (number, unit) = match parts {
        [unit] => (1, *unit),
        [number, unit] => {
            let number: u32 =
                number.parse().map_err(|_| PeriodParseError::InvalidNumber(number.to_string()))?;
            if number == 0 {
                return Err(PeriodParseError::InvalidNumber(number.to_string()));
            }
            (number, *unit)
        }
        _ => return Err(PeriodParseError::InvalidFormat(parts.join(" "))),
    };

    match unit {
        "day" | "days" => Ok(Period::Daily(number)),
        "week" | "weeks" => Ok(Period::Weekly(number)),
        "month" | "months" => Ok(Period::Monthly(number)),
        "quarter" | "quarters" => Ok(Period::Quarterly(number)),
        "year" | "years" => Ok(Period::Yearly(number)),
        _ => Err(PeriodParseError::UnknownKeyword(unit.to_string())),
    }
}

/// Parse `YYYY-MM-DD`, `YYYY/MM/DD`, `YYYY-MM` or `YYYY`
pub fn parse_date(input: &str) -> Result<NaiveDate, PeriodParseError> {
    let invalid = || PeriodParseError::InvalidDate(input.to_string());
    let numbers = input
        .trim()
        .split(['-', '/'])
        .map(|part| part.parse::<u32>().map_err(|_| invalid()))
        .collect::<Result<Vec<_>, _>>()?;

    let (year, month, day) = match numbers.as_slice() {
        [year] => (*year, 1, 1),
        [year, month] => (*year, *month, 1),
        [year, month, day] => (*year, *month, *day),
        _ => return Err(invalid()),
    };
    NaiveDate::from_ymd_opt(year as i32, month, day).ok_or_else(invalid)
}

/// Day-of-week name for a Sunday-based index (0 = Sunday)
pub fn weekday_name(index: usize) -> &'static str {
    const NAMES: [&str; 7] = ["Sunday", "Monday", "Tuesday", "Wednesday", "Thursday", "Friday", "Saturday"];
    NAMES[index % 7]
}

/// Helper function to find the start of the week (Sunday)
fn find_start_of_week(date: NaiveDate) -> NaiveDate {
    let days_since_sunday = date.weekday().num_days_from_sunday();
    date.checked_sub_days(Days::new(u64::from(days_since_sunday))).unwrap_or(NaiveDate::MIN)
}

fn first_of_month(year: i32, month: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(NaiveDate::MIN)
}
