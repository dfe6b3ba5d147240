//! Trading session calendars.
//!
//! Equities trade 09:30-16:00 America/New_York on weekdays. Futures trade on the CME Globex
//! schedule in America/Chicago: Sunday 17:00 through Friday 16:00 with a daily break between
//! 16:00 and 17:00. Both zones follow US daylight saving rules, holidays are not modelled.
use serde::{Deserialize, Serialize};
use time::{Date, Month, OffsetDateTime, UtcOffset};

use super::DateTime;
use crate::instrument::{Instrument, SecurityType};

const HOUR: i64 = 3_600;
const DAY: i64 = 86_400;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Zone {
    NewYork,
    Chicago,
}

impl Zone {
    fn standard_offset(&self) -> i64 {
        match self {
            Zone::NewYork => -5 * HOUR,
            Zone::Chicago => -6 * HOUR,
        }
    }

    fn nth_sunday(year: i32, month: Month, n: u8) -> Option<Date> {
        let first = Date::from_calendar_date(year, month, 1).ok()?;
        let to_sunday = (7 - first.weekday().number_days_from_sunday()) % 7;
        Date::from_calendar_date(year, month, 1 + to_sunday + 7 * (n - 1)).ok()
    }

    //DST runs from 02:00 local standard time on the second Sunday of March until 02:00 local
    //daylight time on the first Sunday of November
    fn offset_at(&self, utc: i64) -> i64 {
        let standard = self.standard_offset();
        let year = DateTime::from(utc).to_offset().year();
        let (Some(start), Some(end)) = (
            Zone::nth_sunday(year, Month::March, 2),
            Zone::nth_sunday(year, Month::November, 1),
        ) else {
            return standard;
        };
        let start_utc = midnight(start) + 2 * HOUR - standard;
        let end_utc = midnight(end) + 2 * HOUR - (standard + HOUR);
        if utc >= start_utc && utc < end_utc {
            standard + HOUR
        } else {
            standard
        }
    }

    fn local(&self, utc: i64) -> OffsetDateTime {
        let offset = UtcOffset::from_whole_seconds(self.offset_at(utc) as i32).unwrap_or(UtcOffset::UTC);
        DateTime::from(utc).to_offset().to_offset(offset)
    }

    fn to_utc(&self, date: Date, hour: i64, minute: i64) -> i64 {
        let local_secs = midnight(date) + hour * HOUR + minute * 60;
        let guess = local_secs - self.standard_offset();
        local_secs - self.offset_at(guess)
    }
}

fn midnight(date: Date) -> i64 {
    date.midnight().assume_utc().unix_timestamp()
}

/// Determines when an instrument can trade.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub enum SessionCalendar {
    Equity,
    Futures,
    AlwaysOpen,
}

impl SessionCalendar {
    pub fn for_instrument(instrument: &Instrument) -> Self {
        match instrument.security_type {
            SecurityType::Future => SessionCalendar::Futures,
            SecurityType::Stock | SecurityType::Option => SessionCalendar::Equity,
        }
    }

    pub fn is_open(&self, date: DateTime) -> bool {
        match self {
            SessionCalendar::AlwaysOpen => true,
            SessionCalendar::Equity => {
                let local = Zone::NewYork.local(*date);
                let weekday = local.weekday().number_days_from_monday();
                let minutes = local.hour() as i64 * 60 + local.minute() as i64;
                weekday < 5 && (570..960).contains(&minutes)
            }
            SessionCalendar::Futures => {
                let local = Zone::Chicago.local(*date);
                let hour = local.hour();
                match local.weekday() {
                    time::Weekday::Saturday => false,
                    time::Weekday::Sunday => hour >= 17,
                    time::Weekday::Friday => hour < 16,
                    _ => hour != 16,
                }
            }
        }
    }

    /// First instant at or after `date` when the session is open.
    pub fn next_open(&self, date: DateTime) -> DateTime {
        if self.is_open(date) {
            return date;
        }
        match self {
            SessionCalendar::AlwaysOpen => date,
            SessionCalendar::Equity => {
                let zone = Zone::NewYork;
                let mut day = zone.local(*date).date();
                //A week always contains a weekday so this terminates quickly
                for _ in 0..8 {
                    let open = zone.to_utc(day, 9, 30);
                    let is_weekday = day.weekday().number_days_from_monday() < 5;
                    if is_weekday && open >= *date {
                        return DateTime::from(open);
                    }
                    day = day.next_day().unwrap_or(day);
                }
                date.plus(DAY)
            }
            SessionCalendar::Futures => {
                let zone = Zone::Chicago;
                let mut day = zone.local(*date).date();
                for _ in 0..8 {
                    let open = zone.to_utc(day, 17, 0);
                    let reopens = !matches!(
                        day.weekday(),
                        time::Weekday::Friday | time::Weekday::Saturday
                    );
                    if reopens && open >= *date {
                        return DateTime::from(open);
                    }
                    day = day.next_day().unwrap_or(day);
                }
                date.plus(DAY)
            }
        }
    }

    /// Moves out-of-session timestamps forward to the next session open.
    pub fn remap(&self, date: DateTime) -> DateTime {
        self.next_open(date)
    }
}
