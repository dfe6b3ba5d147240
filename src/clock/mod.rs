//! Synchronizes time across components

pub mod session;

use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use time::{format_description, Date, OffsetDateTime};

pub enum Weekday {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl Weekday {
    pub fn is_weekend(&self) -> bool {
        matches!(self, Weekday::Saturday | Weekday::Sunday)
    }
}

impl From<time::Weekday> for Weekday {
    fn from(v: time::Weekday) -> Self {
        match v {
            time::Weekday::Monday => Weekday::Monday,
            time::Weekday::Tuesday => Weekday::Tuesday,
            time::Weekday::Wednesday => Weekday::Wednesday,
            time::Weekday::Thursday => Weekday::Thursday,
            time::Weekday::Friday => Weekday::Friday,
            time::Weekday::Saturday => Weekday::Saturday,
            time::Weekday::Sunday => Weekday::Sunday,
        }
    }
}

///[DateTime] is a wrapper around the epoch time in seconds as i64. Functionality that needs
///calendar arithmetic goes through the time package.
//The internal representation with the time package should remain hidden from clients.
#[derive(Clone, Debug, Hash, Eq, PartialEq, PartialOrd, Copy, Ord, Default, Deserialize, Serialize)]
pub struct DateTime(i64);

impl DateTime {
    pub fn weekday(&self) -> Weekday {
        self.to_offset().weekday().into()
    }

    pub fn from_date_string(val: &str, date_fmt: &str) -> Option<Self> {
        let format = format_description::parse(date_fmt).ok()?;
        let parsed_date = Date::parse(val, &format).ok()?;
        let parsed_time = parsed_date.with_time(time::macros::time!(09:00));
        Some(Self::from(parsed_time.assume_utc().unix_timestamp()))
    }

    pub fn now() -> Self {
        OffsetDateTime::now_utc().into()
    }

    pub fn plus(&self, secs: i64) -> Self {
        DateTime(self.0 + secs)
    }

    //Out of range values saturate at the unix epoch, these only arise from nonsense inputs
    pub(crate) fn to_offset(self) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(self.0).unwrap_or(OffsetDateTime::UNIX_EPOCH)
    }
}

impl fmt::Display for DateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let formatted = self
            .to_offset()
            .format(&time::format_description::well_known::Rfc3339)
            .map_err(|_| fmt::Error)?;
        write!(f, "{}", formatted)
    }
}

impl Deref for DateTime {
    type Target = i64;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<OffsetDateTime> for DateTime {
    fn from(value: OffsetDateTime) -> Self {
        value.unix_timestamp().into()
    }
}

impl From<DateTime> for i64 {
    fn from(v: DateTime) -> Self {
        v.0
    }
}

impl From<i64> for DateTime {
    fn from(v: i64) -> Self {
        DateTime(v)
    }
}

/// Simulation clock shared by the tick source and everything that timestamps events.
///
/// Time never moves on its own: the backtest driver moves it forward through the tick source.
/// [SimClock] is wrapped in [Arc] so it can be cheaply cloned and held across the application,
/// all clones observe the same time.
#[derive(Clone, Debug)]
pub struct SimClock {
    inner: Arc<Mutex<DateTime>>,
}

impl SimClock {
    pub fn now(&self) -> DateTime {
        *self.inner.lock().unwrap()
    }

    /// Moves the clock to `date`. Never moves backwards, an earlier date is ignored.
    pub fn advance_to(&self, date: DateTime) -> DateTime {
        let mut inner = self.inner.lock().unwrap();
        if date > *inner {
            *inner = date;
        }
        *inner
    }

    pub fn advance_by(&self, secs: i64) -> DateTime {
        let mut inner = self.inner.lock().unwrap();
        if secs > 0 {
            *inner = inner.plus(secs);
        }
        *inner
    }

    pub fn starting_at(start: impl Into<DateTime>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(start.into())),
        }
    }

    pub fn wall_clock() -> Self {
        Self::starting_at(DateTime::now())
    }
}

impl Default for SimClock {
    fn default() -> Self {
        Self::wall_clock()
    }
}

#[cfg(test)]
mod tests {
    use super::{DateTime, SimClock};

    #[test]
    fn test_that_clones_share_time() {
        let clock = SimClock::starting_at(100);
        let other = clock.clone();
        clock.advance_by(10);
        assert_eq!(*other.now(), 110);
    }

    #[test]
    fn test_that_clock_never_moves_backwards() {
        let clock = SimClock::starting_at(100);
        clock.advance_to(DateTime::from(50));
        assert_eq!(*clock.now(), 100);
        clock.advance_by(-5);
        assert_eq!(*clock.now(), 100);
        clock.advance_to(DateTime::from(150));
        assert_eq!(*clock.now(), 150);
    }

    #[test]
    fn test_that_date_string_parses_at_nine() {
        let date = DateTime::from_date_string("2024-01-02", "[year]-[month]-[day]").unwrap();
        //2024-01-02T09:00:00Z
        assert_eq!(*date, 1_704_186_000);
        assert!(DateTime::from_date_string("garbage", "[year]-[month]-[day]").is_none());
    }

    #[test]
    fn test_that_wall_clock_is_near_now() {
        let clock = SimClock::wall_clock();
        assert!(*clock.now() > 1_600_000_000);
    }
}
