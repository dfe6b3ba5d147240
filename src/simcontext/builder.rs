use std::collections::VecDeque;
use std::sync::Arc;

use crate::clock::{DateTime, SimClock};
use crate::error::{Result, SimError};
use crate::exchange::commission::{BrokerCost, CostSchedule};
use crate::exchange::{ExecutionListener, MatchingServiceBuilder};
use crate::input::bars::BarFeed;
use crate::input::random_walk::RandomWalk;
use crate::input::replay::CsvReplay;
use crate::input::{FeedCursor, TickFeed};
use crate::instrument::Instrument;
use crate::market::{SimTickSource, TickSource};
use crate::orderbook::FillPolicy;
use crate::portfolio::Account;
use crate::source::binance::BinanceHistory;

use super::config::{FeedConfig, ScheduledOrder, SimConfig};
use super::{PendingOrder, SimContext};

pub struct SimContextBuilder {
    starting_cash: Option<f64>,
    start: Option<DateTime>,
    end: Option<DateTime>,
    chunk_secs: i64,
    step_secs: i64,
    fill_policy: FillPolicy,
    commission: Vec<BrokerCost>,
    feeds: Vec<(Instrument, FeedCursor)>,
    schedule: Vec<ScheduledOrder>,
}

impl Default for SimContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SimContextBuilder {
    pub fn with_starting_cash(&mut self, starting_cash: f64) -> &mut Self {
        self.starting_cash = Some(starting_cash);
        self
    }

    pub fn with_start(&mut self, start: impl Into<DateTime>) -> &mut Self {
        self.start = Some(start.into());
        self
    }

    pub fn with_end(&mut self, end: impl Into<DateTime>) -> &mut Self {
        self.end = Some(end.into());
        self
    }

    pub fn with_chunk_secs(&mut self, chunk_secs: i64) -> &mut Self {
        self.chunk_secs = chunk_secs;
        self
    }

    pub fn with_step_secs(&mut self, step_secs: i64) -> &mut Self {
        self.step_secs = step_secs.max(1);
        self
    }

    pub fn with_fill_policy(&mut self, fill_policy: FillPolicy) -> &mut Self {
        self.fill_policy = fill_policy;
        self
    }

    pub fn with_commission(&mut self, commission: Vec<BrokerCost>) -> &mut Self {
        self.commission = commission;
        self
    }

    pub fn with_feed(&mut self, instrument: &Instrument, feed: impl TickFeed + 'static) -> &mut Self {
        self.feeds.push((instrument.clone(), FeedCursor::new(feed)));
        self
    }

    pub fn with_boxed_feed(&mut self, instrument: &Instrument, feed: Box<dyn TickFeed>) -> &mut Self {
        self.feeds.push((instrument.clone(), FeedCursor::boxed(feed)));
        self
    }

    pub fn with_scheduled_order(&mut self, order: ScheduledOrder) -> &mut Self {
        self.schedule.push(order);
        self
    }

    /// Builder with every setting and feed from the config. Feeds are created here, a CSV file
    /// that cannot be opened fails now rather than mid-run.
    pub fn from_config(config: &SimConfig) -> Result<Self> {
        let mut builder = Self::new();
        builder
            .with_starting_cash(config.starting_cash)
            .with_start(config.start)
            .with_chunk_secs(config.chunk_secs)
            .with_step_secs(config.step_secs)
            .with_fill_policy(config.fill_policy)
            .with_commission(config.commission.clone());
        if let Some(end) = config.end {
            builder.with_end(end);
        }
        for order in &config.schedule {
            builder.with_scheduled_order(order.clone());
        }

        for instrument_config in &config.instruments {
            let instrument = &instrument_config.instrument;
            let feed: Box<dyn TickFeed> = match &instrument_config.feed {
                FeedConfig::RandomWalk {
                    start_price,
                    volatility,
                    interval_secs,
                    seed,
                    persistence,
                } => {
                    let mut walk =
                        RandomWalk::new(*start_price, *volatility, *interval_secs, config.start)?;
                    if let Some(seed) = seed {
                        walk = walk.with_seed(*seed);
                    }
                    if let Some(persistence) = persistence {
                        walk = walk.with_persistence(*persistence);
                    }
                    if let Some(end) = config.end {
                        walk = walk.until(end);
                    }
                    Box::new(walk)
                }
                FeedConfig::Csv { path } => Box::new(CsvReplay::from_path(path)?),
                FeedConfig::Binance {
                    unit,
                    window,
                    base_url,
                } => {
                    let Some(end) = config.end else {
                        return Err(SimError::contract_violation(format!(
                            "historical feed for {} needs an end time",
                            instrument
                        )));
                    };
                    let history = match base_url {
                        Some(url) => BinanceHistory::with_base_url(url.clone()),
                        None => BinanceHistory::new(),
                    };
                    let mut feed =
                        BarFeed::new(Arc::new(history), instrument.clone(), *unit, config.start, end);
                    if let Some(window) = window {
                        feed = feed.with_window(*window);
                    }
                    Box::new(feed)
                }
            };
            builder.with_boxed_feed(instrument, feed);
        }
        Ok(builder)
    }

    /// Wires up the context. Feeds are moved into the tick source so a builder builds once.
    pub fn build(&mut self) -> Result<SimContext> {
        let (Some(starting_cash), Some(start)) = (self.starting_cash, self.start) else {
            return Err(SimError::contract_violation(
                "simulation must have starting cash and a start time",
            ));
        };
        if self.feeds.is_empty() {
            return Err(SimError::contract_violation(
                "simulation must have at least one feed",
            ));
        }

        let instruments: Vec<Instrument> = self.feeds.iter().map(|(i, _)| i.clone()).collect();
        let mut schedule = Vec::new();
        for scheduled in std::mem::take(&mut self.schedule) {
            let instrument = instruments
                .iter()
                .find(|i| i.symbol == scheduled.symbol)
                .ok_or_else(|| SimError::invalid_instrument(scheduled.symbol.clone()))?;
            schedule.push(PendingOrder {
                at: scheduled.at,
                instrument: instrument.clone(),
                order: scheduled.order,
            });
        }
        //Stable so orders scheduled for the same time keep their given order
        schedule.sort_by_key(|pending| pending.at);

        let clock = SimClock::starting_at(start);
        let source = Arc::new(SimTickSource::new(clock.clone()).with_chunk_secs(self.chunk_secs));
        for (instrument, cursor) in std::mem::take(&mut self.feeds) {
            source.add_cursor(&instrument, cursor);
        }
        let tick_source: Arc<dyn TickSource> = source.clone();

        let exchange = MatchingServiceBuilder::new()
            .with_source(Arc::clone(&tick_source))
            .with_commission(Arc::new(CostSchedule::new(self.commission.clone())))
            .with_fill_policy(self.fill_policy)
            .build()?;
        let account = Account::new(tick_source, starting_cash);
        let listener: Arc<dyn ExecutionListener> = account.clone();
        exchange.add_execution_listener(listener);

        Ok(SimContext {
            clock,
            source,
            exchange,
            account,
            costs: self.commission.clone(),
            instruments,
            schedule: VecDeque::from(schedule),
            end: self.end,
            step_secs: self.step_secs,
            rejected: 0,
        })
    }

    pub fn new() -> Self {
        Self {
            starting_cash: None,
            start: None,
            end: None,
            chunk_secs: 300,
            step_secs: 3600,
            fill_policy: FillPolicy::default(),
            commission: Vec::new(),
            feeds: Vec::new(),
            schedule: Vec::new(),
        }
    }
}
