use chrono::{Datelike, NaiveDate};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;

mod wire;

pub use wire::ParseError;

/// Ticket sale state for a single day, as reported by the `sale_status` code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(from = "Option<i64>")]
pub enum SaleStatus {
    Available,
    SoldOut,
    Other(i64),
    /// Field was null or absent
    #[default]
    Unknown,
}

impl From<Option<i64>> for SaleStatus {
    fn from(code: Option<i64>) -> Self {
        match code {
            Some(1) => SaleStatus::Available,
            Some(2) => SaleStatus::SoldOut,
            Some(other) => SaleStatus::Other(other),
            None => SaleStatus::Unknown,
        }
    }
}

impl SaleStatus {
    pub fn as_str(&self) -> &str {
        match self {
            SaleStatus::Available => "available",
            SaleStatus::SoldOut => "sold_out",
            SaleStatus::Other(_) => "other",
            SaleStatus::Unknown => "unknown",
        }
    }
}

/// Whether the museum operates on a given day (`open_status` code)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(from = "Option<i64>")]
pub enum OpenStatus {
    Open,
    /// Weekly closure day or an explicitly closed day
    Closed,
    Other(i64),
    #[default]
    Unknown,
}

impl From<Option<i64>> for OpenStatus {
    fn from(code: Option<i64>) -> Self {
        match code {
            Some(1) => OpenStatus::Open,
            Some(2) => OpenStatus::Closed,
            Some(other) => OpenStatus::Other(other),
            None => OpenStatus::Unknown,
        }
    }
}

impl OpenStatus {
    pub fn as_str(&self) -> &str {
        match self {
            OpenStatus::Open => "open",
            OpenStatus::Closed => "closed",
            OpenStatus::Other(_) => "other",
            OpenStatus::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("month must be between 1 and 12, got {0}")]
pub struct InvalidMonth(pub u32);

/// The single year/month the monitor watches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct YearMonth {
    year: i32,
    month: u32,
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Result<Self, InvalidMonth> {
        if !(1..=12).contains(&month) {
            return Err(InvalidMonth(month));
        }
        Ok(Self { year, month })
    }

    /// The year/month that contains `date`
    pub fn of(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:02}", self.year, self.month)
    }
}

/// Status of one calendar day, parsed from a single fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayRecord {
    pub date: NaiveDate,
    pub apply_type: Option<i64>,
    pub sale_status: SaleStatus,
    pub open_status: OpenStatus,
    pub holiday: Option<String>,
    pub day_label: Option<String>,
    pub is_temporary_closure: bool,
    pub temporary_closure_time: Option<String>,
    pub is_holding: bool,
}

impl DayRecord {
    /// An open day with tickets on sale and no other annotations
    pub fn available(date: NaiveDate) -> Self {
        Self {
            date,
            apply_type: None,
            sale_status: SaleStatus::Available,
            open_status: OpenStatus::Open,
            holiday: None,
            day_label: None,
            is_temporary_closure: false,
            temporary_closure_time: None,
            is_holding: false,
        }
    }
}

/// Every day returned by one calendar fetch, keyed and ordered by date.
///
/// Snapshots are rebuilt on every fetch and never merged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarSnapshot {
    target: YearMonth,
    days: BTreeMap<NaiveDate, DayRecord>,
}

impl CalendarSnapshot {
    pub fn new(target: YearMonth, records: impl IntoIterator<Item = DayRecord>) -> Self {
        let days: BTreeMap<_, _> = records.into_iter().map(|r| (r.date, r)).collect();
        let outside = days.keys().filter(|d| YearMonth::of(**d) != target).count();
        if outside > 0 {
            tracing::warn!("Calendar for {} contains {} days from other months", target, outside);
        }
        Self { target, days }
    }

    /// Parse the body of `GET /en/api/calendar`.
    ///
    /// Keys in `data.calendar` that are not `YYYY-MM-DD` dates are skipped.
    pub fn from_json(target: YearMonth, body: &[u8]) -> Result<Self, ParseError> {
        let records = wire::parse_calendar(body)?;
        Ok(Self::new(target, records))
    }

    pub fn target(&self) -> YearMonth {
        self.target
    }

    /// Days in ascending date order
    pub fn days(&self) -> impl Iterator<Item = &DayRecord> {
        self.days.values()
    }

    pub fn get(&self, date: NaiveDate) -> Option<&DayRecord> {
        self.days.get(&date)
    }

    pub fn len(&self) -> usize {
        self.days.len()
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }
}
