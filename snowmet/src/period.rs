//! Inclusive calendar-date intervals and their hourly axes.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};

use crate::error::{ForcingError, Result};

/// An inclusive range of calendar dates, interpreted in UTC.
///
/// The hourly axis of a period runs from `start` 00:00 to `end` 23:00, so a
/// single-day period spans 24 hourly timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Period {
    start: NaiveDate,
    end: NaiveDate,
}

impl Period {
    /// Create a period, rejecting `start > end`.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if start > end {
            return Err(ForcingError::invalid(format!(
                "start date {} is after end date {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// First hourly timestamp of the period (start date, 00:00 UTC).
    pub fn first_hour(&self) -> DateTime<Utc> {
        midnight(self.start)
    }

    /// Last hourly timestamp of the period (end date, 23:00 UTC).
    pub fn last_hour(&self) -> DateTime<Utc> {
        midnight(self.end) + Duration::hours(23)
    }

    /// Number of hourly timestamps, `hours_between(first, last) + 1`.
    pub fn hours(&self) -> usize {
        (self.last_hour() - self.first_hour()).num_hours() as usize + 1
    }

    /// Number of calendar days in the period.
    pub fn day_count(&self) -> usize {
        (self.end - self.start).num_days() as usize + 1
    }

    /// Iterate over every date in the period.
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        let end = self.end;
        self.start.iter_days().take_while(move |d| *d <= end)
    }

    /// A period starting `days` earlier, never before `floor` when given.
    pub fn extend_back(&self, days: u32, floor: Option<NaiveDate>) -> Period {
        let mut start = self.start - Duration::days(days as i64);
        if let Some(floor) = floor {
            start = start.max(floor).min(self.start);
        }
        Period {
            start,
            end: self.end,
        }
    }

    /// Whether `date` falls within the period.
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

/// 00:00 UTC on `date`.
pub fn midnight(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN))
}

/// Every whole hour from `first` to `last`, inclusive.
pub fn hourly_axis(first: DateTime<Utc>, last: DateTime<Utc>) -> Vec<DateTime<Utc>> {
    if last < first {
        return Vec::new();
    }
    let n = (last - first).num_hours() as usize + 1;
    (0..n).map(|i| first + Duration::hours(i as i64)).collect()
}
