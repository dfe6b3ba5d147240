//! # What is rotala-sim?
//!
//! A simulated brokerage and market replay. Strategies written against a broker interface can
//! be backtested or paper traded against recorded or synthetic prices without touching a real
//! broker.
//!
//! A run is composed of:
//! - Feeds, a time-ordered stream of ticks per instrument. [RandomWalk](crate::input::random_walk::RandomWalk)
//! generates synthetic prices, [CsvReplay](crate::input::replay::CsvReplay) replays recorded
//! ticks and [BarFeed](crate::input::bars::BarFeed) expands historical bars fetched from a
//! [HistoricalDataSource](crate::source::HistoricalDataSource) into ticks.
//! - A tick source, [SimTickSource](crate::market::SimTickSource), which merges feeds by time and
//! pushes each tick to its subscribers as the simulated clock moves.
//! - A matching service, [MatchingService](crate::exchange::MatchingService), which keeps one
//! state machine per working order, subscribes to an instrument only while it has orders there
//! and reports fills to execution listeners.
//! - An account, [Account](crate::portfolio::Account), which turns fills into positions and cash
//! and marks open positions to market.
//!
//! Fills happen against the first tick an order sees, that can be the tick current when the order
//! is placed. Nothing ever fills at a price from before the order existed.
//!
//! [SimContext](crate::simcontext::SimContext) wires everything up from a
//! [SimConfig](crate::simcontext::SimConfig) and drives a scripted run, the `backtest` binary is
//! a thin wrapper around it.
//!
//! ## Example
//!
//! ```
//!     use rotala_sim::input::random_walk::RandomWalk;
//!     use rotala_sim::instrument::Instrument;
//!     use rotala_sim::orderbook::Order;
//!     use rotala_sim::simcontext::{ScheduledOrder, SimContextBuilder};
//!
//!     let abc = Instrument::stock("ABC");
//!     let walk = RandomWalk::new(100.0, 0.001, 60, 0).unwrap().with_seed(1).until(86_400);
//!     let mut ctx = SimContextBuilder::new()
//!         .with_starting_cash(100_000.0)
//!         .with_start(0)
//!         .with_end(86_400)
//!         .with_feed(&abc, walk)
//!         .with_scheduled_order(ScheduledOrder {
//!             at: 3_600.into(),
//!             symbol: "ABC".to_string(),
//!             order: Order::market(100.0),
//!         })
//!         .build()
//!         .unwrap();
//!     ctx.run().unwrap();
//!     assert_eq!(ctx.account().position(&abc).unwrap().quantity(), 100.0);
//! ```
pub mod clock;
pub mod dispatch;
pub mod error;
pub mod exchange;
pub mod input;
pub mod instrument;
pub mod market;
pub mod orderbook;
pub mod portfolio;
pub mod simcontext;
pub mod sizing;
pub mod source;
