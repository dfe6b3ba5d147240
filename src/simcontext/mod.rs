//! Composition root for a single backtest run.
//!
//! [SimContext] owns the clock, the replaying tick source, the matching service and the account,
//! wired so executions flow into the account. Once built, all interaction with a run goes
//! through the context.
mod builder;
pub mod config;

use std::collections::VecDeque;
use std::sync::Arc;

use log::{info, warn};

pub use builder::SimContextBuilder;
pub use config::{FeedConfig, InstrumentConfig, ScheduledOrder, SimConfig};

use crate::clock::{DateTime, SimClock};
use crate::error::Result;
use crate::exchange::commission::BrokerCost;
use crate::exchange::MatchingService;
use crate::instrument::Instrument;
use crate::market::SimTickSource;
use crate::orderbook::{Order, OrderId};
use crate::portfolio::{Account, AccountSnapshot, ClosedPosition};

struct PendingOrder {
    at: DateTime,
    instrument: Instrument,
    order: Order,
}

pub struct SimContext {
    clock: SimClock,
    source: Arc<SimTickSource>,
    exchange: Arc<MatchingService>,
    account: Arc<Account>,
    costs: Vec<BrokerCost>,
    instruments: Vec<Instrument>,
    schedule: VecDeque<PendingOrder>,
    end: Option<DateTime>,
    step_secs: i64,
    rejected: usize,
}

impl SimContext {
    pub fn clock(&self) -> SimClock {
        self.clock.clone()
    }

    pub fn now(&self) -> DateTime {
        self.clock.now()
    }

    pub fn source(&self) -> Arc<SimTickSource> {
        Arc::clone(&self.source)
    }

    pub fn exchange(&self) -> Arc<MatchingService> {
        Arc::clone(&self.exchange)
    }

    pub fn account(&self) -> Arc<Account> {
        Arc::clone(&self.account)
    }

    pub fn costs(&self) -> &[BrokerCost] {
        &self.costs
    }

    pub fn instruments(&self) -> &[Instrument] {
        &self.instruments
    }

    pub fn instrument(&self, symbol: &str) -> Option<&Instrument> {
        self.instruments.iter().find(|i| i.symbol == symbol)
    }

    pub fn place_order(&self, instrument: &Instrument, order: Order) -> Result<OrderId> {
        self.exchange.place_order(instrument, order)
    }

    /// Moves the simulation forward by `secs`, see [SimTickSource::advance_by].
    pub fn advance_by(&self, secs: i64) -> Result<bool> {
        self.source.advance_by(secs)
    }

    /// Scheduled orders the exchange refused.
    pub fn rejected_orders(&self) -> usize {
        self.rejected
    }

    pub fn snapshot(&self) -> AccountSnapshot {
        self.account.snapshot()
    }

    pub fn closed_positions(&self) -> Vec<ClosedPosition> {
        self.account.closed_positions()
    }

    fn place_due(&mut self) {
        let now = self.clock.now();
        while self.schedule.front().is_some_and(|pending| pending.at <= now) {
            if let Some(pending) = self.schedule.pop_front() {
                if let Err(e) = self.exchange.place_order(&pending.instrument, pending.order) {
                    warn!(
                        "SIM: Scheduled order for {} at {} rejected: {}",
                        pending.instrument, *pending.at, e
                    );
                    self.rejected += 1;
                }
            }
        }
    }

    /// Runs the schedule to completion.
    ///
    /// Scheduled orders are placed as soon as the clock reaches their time, in between the clock
    /// moves forward in steps of at most `step_secs`. The run stops at the end time or, without
    /// one, once the schedule is empty and no subscribed feed has more data. With no end time an
    /// unbounded feed that stays subscribed keeps the run going.
    pub fn run(&mut self) -> Result<()> {
        info!("SIM: Run started at {}", *self.clock.now());
        loop {
            self.place_due();
            let now = self.clock.now();
            if self.end.is_some_and(|end| now >= end) {
                break;
            }

            let mut target = now.plus(self.step_secs);
            if let Some(pending) = self.schedule.front() {
                target = target.min(pending.at);
            }
            if let Some(end) = self.end {
                target = target.min(end);
            }

            let more = self.source.advance_by(*target - *now)?;
            if !more && self.schedule.is_empty() && self.end.is_none() {
                break;
            }
        }
        let snapshot = self.account.snapshot();
        info!(
            "SIM: Run finished at {} with net liquidation {:.2}, {} closed positions",
            *self.clock.now(),
            snapshot.net_liquidation,
            snapshot.closed_positions
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{ScheduledOrder, SimContextBuilder};
    use crate::clock::DateTime;
    use crate::exchange::commission::BrokerCost;
    use crate::input::{Tick, VecFeed};
    use crate::instrument::Instrument;
    use crate::orderbook::Order;

    fn feed() -> VecFeed {
        VecFeed::new(
            (0..=10)
                .map(|i| {
                    let time = i * 10;
                    Tick::trade(time, if time < 50 { 100.0 } else { 110.0 })
                })
                .collect(),
        )
    }

    fn scheduled(at: i64, quantity: f64) -> ScheduledOrder {
        ScheduledOrder {
            at: DateTime::from(at),
            symbol: "ABC".to_string(),
            order: Order::market(quantity),
        }
    }

    #[test]
    fn test_that_schedule_runs_round_trip() {
        let mut ctx = SimContextBuilder::new()
            .with_starting_cash(100_000.0)
            .with_start(0)
            .with_end(100)
            .with_feed(&Instrument::stock("ABC"), feed())
            .with_scheduled_order(scheduled(60, -10.0))
            .with_scheduled_order(scheduled(10, 10.0))
            .build()
            .unwrap();
        ctx.run().unwrap();

        assert_eq!(*ctx.now(), 100);
        let closed = ctx.closed_positions();
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].entry_price, 100.0);
        assert_eq!(closed[0].exit_price, 110.0);
        assert_eq!(closed[0].realized_pnl, 100.0);
        assert_eq!(ctx.snapshot().cash, 100_100.0);
        assert_eq!(ctx.rejected_orders(), 0);
    }

    #[test]
    fn test_that_commission_reaches_the_account() {
        let mut ctx = SimContextBuilder::new()
            .with_starting_cash(100_000.0)
            .with_start(0)
            .with_commission(vec![BrokerCost::Flat(1.0)])
            .with_feed(&Instrument::stock("ABC"), feed())
            .with_scheduled_order(scheduled(10, 10.0))
            .with_scheduled_order(scheduled(60, -10.0))
            .build()
            .unwrap();
        ctx.run().unwrap();

        let closed = ctx.closed_positions();
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].commissions, 2.0);
        assert_eq!(closed[0].realized_pnl, 98.0);
        assert_eq!(ctx.snapshot().cash, 100_098.0);
    }

    #[test]
    fn test_that_unknown_symbol_fails_build() {
        let res = SimContextBuilder::new()
            .with_starting_cash(1.0)
            .with_start(0)
            .with_feed(&Instrument::stock("ABC"), feed())
            .with_scheduled_order(ScheduledOrder {
                at: DateTime::from(0),
                symbol: "XYZ".to_string(),
                order: Order::market(1.0),
            })
            .build();
        assert!(res.is_err());
    }

    #[test]
    fn test_that_invalid_scheduled_order_is_counted() {
        let mut ctx = SimContextBuilder::new()
            .with_starting_cash(1.0)
            .with_start(0)
            .with_end(50)
            .with_feed(&Instrument::stock("ABC"), feed())
            .with_scheduled_order(scheduled(10, 0.0))
            .build()
            .unwrap();
        ctx.run().unwrap();
        assert_eq!(ctx.rejected_orders(), 1);
        assert!(ctx.closed_positions().is_empty());
    }
}
