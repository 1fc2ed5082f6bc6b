use crate::errors::{AppError, AppResult};
use crate::store::StorePath;
use chrono::{Datelike, Local, NaiveDate};
use std::sync::Mutex;

pub const MONTH_NAMES: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

pub trait Clock: Send + Sync {
    fn today(&self) -> NaiveDate;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDate);

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        self.0
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    today: Mutex<NaiveDate>,
}

impl ManualClock {
    pub fn new(today: NaiveDate) -> Self {
        Self {
            today: Mutex::new(today),
        }
    }

    pub fn set(&self, today: NaiveDate) {
        match self.today.lock() {
            Ok(mut current) => *current = today,
            Err(poisoned) => *poisoned.into_inner() = today,
        }
    }
}

impl Clock for ManualClock {
    fn today(&self) -> NaiveDate {
        match self.today.lock() {
            Ok(current) => *current,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// Date and path strings for one instant of "today".
#[derive(Debug, Clone)]
pub struct DateContext {
    collection: String,
    today: NaiveDate,
}

impl DateContext {
    pub fn new(collection: impl Into<String>, today: NaiveDate) -> Self {
        Self {
            collection: collection.into(),
            today,
        }
    }

    pub fn from_clock(collection: impl Into<String>, clock: &dyn Clock) -> Self {
        Self::new(collection, clock.today())
    }

    pub fn today(&self) -> NaiveDate {
        self.today
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// `03-June-2024`
    pub fn display_today(&self) -> String {
        display_date(self.today)
    }

    /// ISO date used as the default form value and as the upper bound.
    pub fn default_form_date(&self) -> String {
        self.today.format("%Y-%m-%d").to_string()
    }

    pub fn max_date(&self) -> NaiveDate {
        self.today
    }

    pub fn current_month_index(&self) -> u32 {
        self.today.month0()
    }

    /// `Collection/Year/MonthName`, always in the current year.
    pub fn fetch_path(&self, month_index: u32) -> AppResult<StorePath> {
        let name = month_name(month_index)?;
        Ok(StorePath::from_segments([
            self.collection.clone(),
            self.today.year().to_string(),
            name.to_string(),
        ]))
    }

    /// `Collection/Year/MonthName/day` for the given date; the day segment is
    /// not zero-padded.
    pub fn write_path(&self, date: NaiveDate) -> StorePath {
        StorePath::from_segments([
            self.collection.clone(),
            date.year().to_string(),
            MONTH_NAMES[date.month0() as usize].to_string(),
            date.day().to_string(),
        ])
    }
}

pub fn month_name(month_index: u32) -> AppResult<&'static str> {
    MONTH_NAMES
        .get(month_index as usize)
        .copied()
        .ok_or_else(|| AppError::Validation(format!("Month index {} is out of range (0..=11)", month_index)))
}

pub fn display_date(date: NaiveDate) -> String {
    format!(
        "{:02}-{}-{}",
        date.day(),
        MONTH_NAMES[date.month0() as usize],
        date.year()
    )
}

pub fn parse_form_date(raw: &str) -> AppResult<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| AppError::Validation(format!("'{}' is not a valid date (expected YYYY-MM-DD)", raw.trim())))
}
