use std::fmt;
use std::str::FromStr;

use jiff::{
    civil::{date, Date},
    ToSpan,
};
use serde::{Serialize, Serializer};
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
#[error("{0}")]
pub struct ParseError(pub String);

/// A calendar month, the unit of work of the loader.
#[derive(PartialEq, Debug, Clone, Copy, Hash, Eq, PartialOrd, Ord)]
pub struct Month(Date);

/// Convenience constructor for literal months.  Panics if `month` is not in 1..=12.
pub fn month(year: i16, month: i8) -> Month {
    Month::new(year, month).unwrap()
}

impl Month {
    pub fn new(year: i16, month: i8) -> Result<Month, ParseError> {
        Date::new(year, month, 1)
            .map(Month)
            .map_err(|e| ParseError(format!("Invalid month {}-{}: {}", year, month, e)))
    }

    pub fn containing(day: Date) -> Month {
        Month(date(day.year(), day.month(), 1))
    }

    pub fn year(&self) -> i16 {
        self.0.year()
    }

    pub fn month(&self) -> i8 {
        self.0.month()
    }

    pub fn start_date(&self) -> Date {
        self.0
    }

    pub fn end_date(&self) -> Date {
        self.0.last_of_month()
    }

    pub fn next(&self) -> Month {
        Month(self.0.saturating_add(1.month()))
    }

    /// The following month, `None` past the last representable date.
    pub fn checked_next(&self) -> Option<Month> {
        self.0.checked_add(1.month()).ok().map(Month)
    }

    pub fn previous(&self) -> Month {
        Month(self.0.saturating_sub(1.month()))
    }

    /// Format the first day of the month, e.g. `strftime("%Y%m")` gives `"201401"`.
    pub fn strftime(&self, format: &str) -> String {
        self.0.strftime(format).to_string()
    }

    /// All months from `self` to `end`, both ends included.  Empty if `end < self`.
    pub fn up_to(&self, end: &Month) -> Vec<Month> {
        let mut out = Vec::new();
        let mut current = *self;
        while current <= *end {
            out.push(current);
            match current.checked_next() {
                Some(next) => current = next,
                None => break,
            }
        }
        out
    }
}

impl fmt::Display for Month {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year(), self.month())
    }
}

impl Serialize for Month {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl FromStr for Month {
    type Err = ParseError;

    /// Parse strings like `2014-01`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (year, month) = s
            .split_once('-')
            .ok_or_else(|| ParseError(format!("Failed parsing {} as a month", s)))?;
        let year = year
            .trim()
            .parse::<i16>()
            .map_err(|_| ParseError(format!("Failed parsing {} as a month", s)))?;
        let month = month
            .trim()
            .parse::<i8>()
            .map_err(|_| ParseError(format!("Failed parsing {} as a month", s)))?;
        if !(1..=12).contains(&month) {
            return Err(ParseError(format!("Month of year {} not in 1..=12", month)));
        }
        Month::new(year, month)
    }
}
