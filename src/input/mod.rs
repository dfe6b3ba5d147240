//! Inputs produce the stream of [Tick] for a single instrument that the rest of the simulation
//! consumes.
//!
//! Each input implements [TickFeed], which only has to hand out the next tick in time order. The
//! positioning operations the tick source relies on are implemented once, over any feed, by
//! [FeedCursor].
pub mod bars;
pub mod random_walk;
pub mod replay;

use std::collections::VecDeque;

use serde::{Deserialize, Deserializer, Serialize};

use crate::clock::DateTime;
use crate::error::{Result, SimError};

/// A market data snapshot for one instrument.
///
/// Prices are optional because sources frequently leave one side, or the last trade, empty.
/// `time` is the as-of time and never decreases within a feed, `last_trade_time` is when the
/// last price last changed.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Tick {
    #[serde(default)]
    pub bid: Option<f64>,
    #[serde(default, deserialize_with = "zero_if_empty")]
    pub bid_size: f64,
    #[serde(default)]
    pub ask: Option<f64>,
    #[serde(default, deserialize_with = "zero_if_empty")]
    pub ask_size: f64,
    #[serde(default)]
    pub last: Option<f64>,
    #[serde(default, deserialize_with = "zero_if_empty")]
    pub last_size: f64,
    #[serde(default)]
    pub high: Option<f64>,
    #[serde(default)]
    pub low: Option<f64>,
    #[serde(default)]
    pub close: Option<f64>,
    #[serde(default, deserialize_with = "zero_if_empty")]
    pub volume: f64,
    #[serde(default, deserialize_with = "epoch_if_empty")]
    pub last_trade_time: DateTime,
    pub time: DateTime,
}

//Recorded files often leave sizes blank rather than writing zero
fn zero_if_empty<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<f64, D::Error> {
    Ok(Option::<f64>::deserialize(d)?.unwrap_or(0.0))
}

fn epoch_if_empty<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<DateTime, D::Error> {
    Ok(Option::<i64>::deserialize(d)?.unwrap_or(0).into())
}

fn valid(price: Option<f64>) -> Option<f64> {
    price.filter(|p| p.is_finite() && *p > 0.0)
}

impl Tick {
    pub fn quote(time: impl Into<DateTime>, bid: f64, ask: f64) -> Self {
        let time = time.into();
        Self {
            bid: Some(bid),
            bid_size: 100.0,
            ask: Some(ask),
            ask_size: 100.0,
            last: None,
            last_size: 0.0,
            high: None,
            low: None,
            close: None,
            volume: 0.0,
            last_trade_time: time,
            time,
        }
    }

    /// A tick where the trade printed at `price` and the quote is locked at the same price.
    pub fn trade(time: impl Into<DateTime>, price: f64) -> Self {
        Self {
            last: Some(price),
            last_size: 100.0,
            ..Self::quote(time, price, price)
        }
    }

    pub fn with_last(mut self, last: f64) -> Self {
        self.last = Some(last);
        self
    }

    pub fn with_sizes(mut self, bid_size: f64, ask_size: f64) -> Self {
        self.bid_size = bid_size;
        self.ask_size = ask_size;
        self
    }

    pub fn bid_price(&self) -> Option<f64> {
        valid(self.bid)
    }

    pub fn ask_price(&self) -> Option<f64> {
        valid(self.ask)
    }

    pub fn last_price(&self) -> Option<f64> {
        valid(self.last)
    }

    /// Price at which a market order on the given side trades: the last print, falling back to
    /// the ask for buys and the bid for sells.
    pub fn trade_price(&self, is_buy: bool) -> Option<f64> {
        self.last_price().or(if is_buy {
            self.ask_price()
        } else {
            self.bid_price()
        })
    }

    /// Price used for valuation: last print, then the midpoint, then whichever side exists.
    pub fn mark_price(&self) -> Option<f64> {
        if let Some(last) = self.last_price() {
            return Some(last);
        }
        match (self.bid_price(), self.ask_price()) {
            (Some(bid), Some(ask)) => Some((bid + ask) / 2.0),
            (bid, ask) => bid.or(ask),
        }
    }
}

/// A time-ordered sequence of ticks for one instrument.
///
/// `Ok(None)` means the feed has no more data. A feed that cannot produce data right now, for
/// example because a historical window could not be served, returns
/// [SimError::DataUnavailable] and can be called again later.
pub trait TickFeed: Send {
    fn next(&mut self) -> Result<Option<Tick>>;
}

impl TickFeed for Box<dyn TickFeed> {
    fn next(&mut self) -> Result<Option<Tick>> {
        (**self).next()
    }
}

/// Positions a [TickFeed] in time.
///
/// The cursor keeps a lookahead buffer so that a tick read past a boundary is never lost and
/// enforces that timestamps never go backwards.
pub struct FeedCursor {
    feed: Box<dyn TickFeed>,
    buffer: VecDeque<Tick>,
    current: Option<Tick>,
    reached: Option<DateTime>,
    last_seen: Option<DateTime>,
    exhausted: bool,
}

impl FeedCursor {
    pub fn new(feed: impl TickFeed + 'static) -> Self {
        Self::boxed(Box::new(feed))
    }

    pub fn boxed(feed: Box<dyn TickFeed>) -> Self {
        Self {
            feed,
            buffer: VecDeque::new(),
            current: None,
            reached: None,
            last_seen: None,
            exhausted: false,
        }
    }

    fn fill(&mut self) -> Result<()> {
        if !self.buffer.is_empty() || self.exhausted {
            return Ok(());
        }
        match self.feed.next()? {
            Some(tick) => {
                if let Some(last_seen) = self.last_seen {
                    if tick.time < last_seen {
                        return Err(SimError::contract_violation(format!(
                            "feed produced tick at {} after tick at {}",
                            *tick.time, *last_seen
                        )));
                    }
                }
                self.last_seen = Some(tick.time);
                self.buffer.push_back(tick);
            }
            None => self.exhausted = true,
        }
        Ok(())
    }

    pub fn peek(&mut self) -> Result<Option<&Tick>> {
        self.fill()?;
        Ok(self.buffer.front())
    }

    pub fn next(&mut self) -> Result<Option<Tick>> {
        self.fill()?;
        let tick = self.buffer.pop_front();
        if let Some(tick) = &tick {
            self.current = Some(tick.clone());
        }
        Ok(tick)
    }

    /// The most recent tick handed out.
    pub fn current(&self) -> Option<&Tick> {
        self.current.as_ref()
    }

    pub fn reached(&self) -> Option<DateTime> {
        self.reached
    }

    pub fn has_more(&mut self) -> Result<bool> {
        Ok(self.peek()?.is_some())
    }

    /// Consumes every tick at or before `date`, the latest of which becomes [FeedCursor::current].
    /// The next unread tick is strictly after `date`. Calling again with an earlier or equal
    /// date does nothing.
    pub fn advance_to(&mut self, date: DateTime) -> Result<Option<&Tick>> {
        if self.reached.map_or(false, |reached| date <= reached) {
            return Ok(self.current.as_ref());
        }
        while let Some(tick) = self.peek()? {
            if tick.time > date {
                break;
            }
            self.next()?;
        }
        self.reached = Some(date);
        Ok(self.current.as_ref())
    }

    /// Returns every unread tick at or before `date`, in order. The first tick after `date` stays
    /// in the buffer for the next call.
    pub fn ticks_up_to(&mut self, date: DateTime) -> Result<Vec<Tick>> {
        let mut res = Vec::new();
        loop {
            let due = match self.peek() {
                Ok(Some(tick)) => tick.time <= date,
                Ok(None) => false,
                Err(e) => {
                    //Hand the ticks back so a retry sees them again
                    for tick in res.into_iter().rev() {
                        self.buffer.push_front(tick);
                    }
                    return Err(e);
                }
            };
            if !due {
                break;
            }
            if let Some(tick) = self.buffer.pop_front() {
                res.push(tick);
            }
        }
        if let Some(last) = res.last() {
            self.current = Some(last.clone());
        }
        if self.reached.map_or(true, |reached| date > reached) {
            self.reached = Some(date);
        }
        Ok(res)
    }
}

/// Feed over ticks already in memory, mostly useful for tests and for callers that build data
/// themselves.
#[derive(Clone, Debug, Default)]
pub struct VecFeed {
    ticks: VecDeque<Tick>,
}

impl VecFeed {
    pub fn new(ticks: Vec<Tick>) -> Self {
        Self {
            ticks: ticks.into(),
        }
    }
}

impl TickFeed for VecFeed {
    fn next(&mut self) -> Result<Option<Tick>> {
        Ok(self.ticks.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::{FeedCursor, Tick, VecFeed};
    use crate::clock::DateTime;
    use crate::error::SimError;

    fn cursor() -> FeedCursor {
        FeedCursor::new(VecFeed::new(vec![
            Tick::trade(100, 10.0),
            Tick::trade(101, 11.0),
            Tick::trade(103, 12.0),
            Tick::trade(105, 13.0),
        ]))
    }

    #[test]
    fn test_that_advance_to_keeps_latest_tick_before_date() {
        let mut cursor = cursor();
        let current = cursor.advance_to(102.into()).unwrap().cloned().unwrap();
        assert_eq!(current.last, Some(11.0));
        assert_eq!(*cursor.peek().unwrap().unwrap().time, 103);
    }

    #[test]
    fn test_that_advance_to_is_idempotent() {
        let mut cursor = cursor();
        cursor.advance_to(103.into()).unwrap();
        let again = cursor.advance_to(101.into()).unwrap().cloned().unwrap();
        assert_eq!(*again.time, 103);
        let same = cursor.advance_to(103.into()).unwrap().cloned().unwrap();
        assert_eq!(*same.time, 103);
        assert_eq!(*cursor.peek().unwrap().unwrap().time, 105);
    }

    #[test]
    fn test_that_ticks_up_to_keeps_boundary_tick_for_next_call() {
        let mut cursor = cursor();
        let first = cursor.ticks_up_to(102.into()).unwrap();
        assert_eq!(first.len(), 2);
        let second = cursor.ticks_up_to(104.into()).unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(*second[0].time, 103);
        let third = cursor.ticks_up_to(200.into()).unwrap();
        assert_eq!(third.len(), 1);
        assert!(!cursor.has_more().unwrap());
        assert_eq!(cursor.reached(), Some(DateTime::from(200)));
    }

    #[test]
    fn test_that_backwards_timestamps_fail_loudly() {
        let mut cursor = FeedCursor::new(VecFeed::new(vec![
            Tick::trade(100, 10.0),
            Tick::trade(99, 10.0),
        ]));
        let res = cursor.ticks_up_to(200.into());
        assert!(matches!(res, Err(SimError::ContractViolation { .. })));
    }

    #[test]
    fn test_that_trade_price_falls_back_to_quote_side() {
        let tick = Tick::quote(100, 9.9, 10.1);
        assert_eq!(tick.trade_price(true), Some(10.1));
        assert_eq!(tick.trade_price(false), Some(9.9));
        assert_eq!(tick.mark_price(), Some(10.0));

        let traded = tick.with_last(10.05);
        assert_eq!(traded.trade_price(true), Some(10.05));
        assert_eq!(traded.mark_price(), Some(10.05));
    }

    #[test]
    fn test_that_invalid_prices_are_ignored() {
        let mut tick = Tick::quote(100, 0.0, f64::NAN);
        tick.last = Some(-1.0);
        assert!(tick.trade_price(true).is_none());
        assert!(tick.mark_price().is_none());
    }
}
