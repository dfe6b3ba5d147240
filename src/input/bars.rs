use std::collections::VecDeque;
use std::sync::Arc;

use log::debug;

use super::{Tick, TickFeed};
use crate::clock::session::SessionCalendar;
use crate::clock::DateTime;
use crate::error::Result;
use crate::instrument::Instrument;
use crate::source::{Bar, HistoricalDataSource, PeriodUnit};

const DAY: i64 = 86_400;

/// Expands historical OHLC bars into ticks.
///
/// Bars are requested from the source in windows of `window` periods and buffered, the next
/// window is only fetched once the buffer runs dry. Each bar becomes four ticks spread evenly
/// over the period: the open, then the low and high in the order that makes the path to the
/// close shortest, then the close. Ticks that fall outside the instrument's trading session
/// are moved forward to the next session open.
pub struct BarFeed {
    source: Arc<dyn HistoricalDataSource>,
    instrument: Instrument,
    unit: PeriodUnit,
    window: usize,
    cursor: DateTime,
    end: DateTime,
    calendar: SessionCalendar,
    buffer: VecDeque<Tick>,
    last_emitted: Option<DateTime>,
    session_day: Option<i64>,
    high: f64,
    low: f64,
    volume: f64,
    prior_close: Option<f64>,
    last_price: Option<f64>,
}

impl BarFeed {
    pub fn new(
        source: Arc<dyn HistoricalDataSource>,
        instrument: Instrument,
        unit: PeriodUnit,
        start: impl Into<DateTime>,
        end: impl Into<DateTime>,
    ) -> Self {
        let calendar = SessionCalendar::for_instrument(&instrument);
        Self {
            source,
            instrument,
            unit,
            window: 500,
            cursor: start.into(),
            end: end.into(),
            calendar,
            buffer: VecDeque::new(),
            last_emitted: None,
            session_day: None,
            high: f64::MIN,
            low: f64::MAX,
            volume: 0.0,
            prior_close: None,
            last_price: None,
        }
    }

    pub fn with_window(mut self, window: usize) -> Self {
        self.window = window.max(1);
        self
    }

    pub fn with_calendar(mut self, calendar: SessionCalendar) -> Self {
        self.calendar = calendar;
        self
    }

    fn refill(&mut self) -> Result<()> {
        while self.buffer.is_empty() && self.cursor < self.end {
            let period = self.unit.secs();
            let span = self.window as i64 * period;
            let req_end = self.cursor.plus(span).min(self.end);
            let periods = (*req_end - *self.cursor + period - 1) / period;
            //Cursor only moves once the window has been served so a failed fetch is retried
            let bars = self.source.get_historical_data(
                &self.instrument,
                req_end,
                periods as usize,
                self.unit,
            )?;
            let start = self.cursor;
            self.cursor = req_end;
            debug!(
                "FEED: {} window {} to {} returned {} bars",
                self.instrument,
                *start,
                *req_end,
                bars.len()
            );
            for bar in bars
                .into_iter()
                .filter(|bar| bar.time >= start && bar.time < req_end)
            {
                self.expand(&bar);
            }
        }
        Ok(())
    }

    fn expand(&mut self, bar: &Bar) {
        let day = bar.time.div_euclid(DAY);
        if self.session_day != Some(day) {
            self.session_day = Some(day);
            self.prior_close = self.last_price;
            self.high = f64::MIN;
            self.low = f64::MAX;
            self.volume = 0.0;
        }

        let path = if bar.close >= bar.open {
            [bar.open, bar.low, bar.high, bar.close]
        } else {
            [bar.open, bar.high, bar.low, bar.close]
        };
        let period = self.unit.secs();
        let size = bar.volume / 4.0;

        for (i, price) in path.into_iter().enumerate() {
            let mut time = self.calendar.remap(bar.time.plus(period * i as i64 / 4));
            if let Some(last) = self.last_emitted {
                time = time.max(last);
            }
            self.last_emitted = Some(time);
            self.high = self.high.max(price);
            self.low = self.low.min(price);
            self.volume += size;
            self.last_price = Some(price);

            self.buffer.push_back(Tick {
                bid: Some(price),
                bid_size: size,
                ask: Some(price),
                ask_size: size,
                last: Some(price),
                last_size: size,
                high: Some(self.high),
                low: Some(self.low),
                close: self.prior_close,
                volume: self.volume,
                last_trade_time: time,
                time,
            });
        }
    }
}

impl TickFeed for BarFeed {
    fn next(&mut self) -> Result<Option<Tick>> {
        self.refill()?;
        Ok(self.buffer.pop_front())
    }
}
