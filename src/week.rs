use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime};
use nom::{
    bytes::complete::tag,
    character::complete::digit1,
    combinator::{all_consuming, map_res, verify},
    sequence::separated_pair,
    IResult,
};
use serde::{Deserialize, Serialize};

use crate::error::WeekParseError;

/// A Monday-based week of the year, rendered `YYYY-WW`.
///
/// Days before the first Monday of January fall in week `00`, so a year has
/// weeks `00` through `52` or `53`. This is the identifier the open-data API
/// uses for `semaine_injection`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WeekId {
    year: i32,
    week: u32,
}

impl WeekId {
    /// Returns `None` when `week` does not exist in `year`.
    pub fn new(year: i32, week: u32) -> Option<Self> {
        if !(0..=9999).contains(&year) {
            return None;
        }
        let last = NaiveDate::from_ymd_opt(year, 12, 31).map(Self::of_date)?;
        (week <= last.week).then_some(Self { year, week })
    }

    pub fn of(at: NaiveDateTime) -> Self {
        Self::of_date(at.date())
    }

    pub fn of_date(date: NaiveDate) -> Self {
        let yday = date.ordinal0();
        let wday = date.weekday().num_days_from_monday();
        Self {
            year: date.year(),
            week: (yday + 7 - wday) / 7,
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn week(&self) -> u32 {
        self.week
    }

    /// First instant of the week: Monday 00:00, or January 1st for week 00.
    pub fn start(&self) -> NaiveDateTime {
        let jan1 = NaiveDate::from_yo_opt(self.year, 1).unwrap_or(NaiveDate::MIN);
        let day = if self.week == 0 {
            jan1
        } else {
            let to_monday = (7 - jan1.weekday().num_days_from_monday()) % 7;
            jan1 + Duration::days(i64::from(to_monday) + 7 * i64::from(self.week - 1))
        };
        day.and_time(NaiveTime::MIN)
    }
}

impl fmt::Display for WeekId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.week)
    }
}

fn parse_year(i: &str) -> IResult<&str, i32> {
    map_res(verify(digit1, |s: &str| s.len() == 4), |s: &str| {
        s.parse::<i32>()
    })(i)
}

fn parse_week(i: &str) -> IResult<&str, u32> {
    map_res(verify(digit1, |s: &str| s.len() == 2), |s: &str| {
        s.parse::<u32>()
    })(i)
}

fn parse_week_id(i: &str) -> IResult<&str, (i32, u32)> {
    all_consuming(separated_pair(parse_year, tag("-"), parse_week))(i)
}

impl FromStr for WeekId {
    type Err = WeekParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || WeekParseError {
            input: s.to_string(),
        };
        let (_, (year, week)) = parse_week_id(s.trim()).map_err(|_| err())?;
        Self::new(year, week).ok_or_else(err)
    }
}

impl TryFrom<String> for WeekId {
    type Error = WeekParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<WeekId> for String {
    fn from(value: WeekId) -> Self {
        value.to_string()
    }
}
