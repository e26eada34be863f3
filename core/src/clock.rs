//! Job clock. Owns the engine's current date and the month arithmetic
//! every date-window computation shares.

use chrono::{Datelike, Days, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::types::RunId;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobClock {
    pub run_id: RunId,
    pub today: NaiveDate,
}

impl JobClock {
    pub fn new(run_id: RunId, today: NaiveDate) -> Self {
        Self { run_id, today }
    }

    /// Move to the next day. Returns the new date.
    pub fn advance(&mut self) -> NaiveDate {
        self.today = next_day(self.today);
        self.today
    }

    pub fn yesterday(&self) -> NaiveDate {
        previous_day(self.today)
    }

    /// Timestamp stamped on every row written during the current day.
    /// Jobs never read the wall clock, so reruns are reproducible.
    pub fn created_dt(&self) -> NaiveDateTime {
        NaiveDateTime::new(self.today, NaiveTime::MIN)
    }
}

pub fn next_day(date: NaiveDate) -> NaiveDate {
    date.checked_add_days(Days::new(1)).unwrap_or(date)
}

pub fn previous_day(date: NaiveDate) -> NaiveDate {
    date.checked_sub_days(Days::new(1)).unwrap_or(date)
}

pub fn days_before(date: NaiveDate, days: u64) -> NaiveDate {
    date.checked_sub_days(Days::new(days)).unwrap_or(NaiveDate::MIN)
}

pub fn first_day_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

pub fn last_day_of_month(date: NaiveDate) -> NaiveDate {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)
        .map(previous_day)
        .unwrap_or(date)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn month_bounds() {
        let d = NaiveDate::from_ymd_opt(2016, 2, 17).unwrap();
        assert_eq!(first_day_of_month(d), NaiveDate::from_ymd_opt(2016, 2, 1).unwrap());
        assert_eq!(last_day_of_month(d), NaiveDate::from_ymd_opt(2016, 2, 29).unwrap());
        let dec = NaiveDate::from_ymd_opt(2015, 12, 3).unwrap();
        assert_eq!(last_day_of_month(dec), NaiveDate::from_ymd_opt(2015, 12, 31).unwrap());
    }

    #[test]
    fn advance_moves_one_day() {
        let mut clock = JobClock::new("t".into(), NaiveDate::from_ymd_opt(2015, 11, 30).unwrap());
        assert_eq!(clock.advance(), NaiveDate::from_ymd_opt(2015, 12, 1).unwrap());
        assert_eq!(clock.yesterday(), NaiveDate::from_ymd_opt(2015, 11, 30).unwrap());
    }
}
