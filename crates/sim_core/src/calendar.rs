//! Service calendar: a date range with a weekly bitmap and per-date
//! exception sets, GTFS `calendar.txt` / `calendar_dates.txt` semantics.

use std::collections::BTreeSet;

use chrono::{Datelike, NaiveDate};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CalendarError {
    #[error("date {0} is listed as both an added and a removed exception")]
    ConflictingException(NaiveDate),
}

/// Dates on which a trip operates. `operates(d)` is true when `d` is an
/// added exception, or when `d` lies in `[start, end]`, matches the weekly
/// bitmap and is not a removed exception.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    start: NaiveDate,
    end: NaiveDate,
    weekdays: [bool; 7],
    added: BTreeSet<NaiveDate>,
    removed: BTreeSet<NaiveDate>,
}

impl Service {
    /// `weekdays` is Monday-first, matching GTFS column order.
    pub fn new(start: NaiveDate, end: NaiveDate, weekdays: [bool; 7]) -> Self {
        Self {
            start,
            end,
            weekdays,
            added: BTreeSet::new(),
            removed: BTreeSet::new(),
        }
    }

    /// Service operating every day of the given range.
    pub fn daily(start: NaiveDate, end: NaiveDate) -> Self {
        Self::new(start, end, [true; 7])
    }

    /// Register a date exception. `added` activates the date, otherwise it
    /// is deactivated. The two exception sets must stay disjoint.
    pub fn add_exception(&mut self, date: NaiveDate, added: bool) -> Result<(), CalendarError> {
        let conflicts = if added {
            self.removed.contains(&date)
        } else {
            self.added.contains(&date)
        };
        if conflicts {
            return Err(CalendarError::ConflictingException(date));
        }
        if added {
            self.added.insert(date);
        } else {
            self.removed.insert(date);
        }
        Ok(())
    }

    pub fn operates(&self, at: NaiveDate) -> bool {
        if self.added.contains(&at) {
            return true;
        }
        if self.removed.contains(&at) {
            return false;
        }
        if self.start <= at && at <= self.end {
            return self.weekdays[at.weekday().num_days_from_monday() as usize];
        }
        false
    }
}

/// Serde shape of a service calendar in module settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default)]
    pub monday: bool,
    #[serde(default)]
    pub tuesday: bool,
    #[serde(default)]
    pub wednesday: bool,
    #[serde(default)]
    pub thursday: bool,
    #[serde(default)]
    pub friday: bool,
    #[serde(default)]
    pub saturday: bool,
    #[serde(default)]
    pub sunday: bool,
    #[serde(default)]
    pub added_exceptions: Vec<NaiveDate>,
    #[serde(default)]
    pub removed_exceptions: Vec<NaiveDate>,
}

impl ServiceConfig {
    pub fn build(&self) -> Result<Service, CalendarError> {
        let mut service = Service::new(
            self.start_date,
            self.end_date,
            [
                self.monday,
                self.tuesday,
                self.wednesday,
                self.thursday,
                self.friday,
                self.saturday,
                self.sunday,
            ],
        );
        for date in &self.added_exceptions {
            service.add_exception(*date, true)?;
        }
        for date in &self.removed_exceptions {
            service.add_exception(*date, false)?;
        }
        Ok(service)
    }
}
