//! Matching service: holds working orders per instrument, matches them against ticks and fans
//! executions out to listeners.
mod builder;
pub mod commission;

pub use builder::MatchingServiceBuilder;

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use log::{debug, error, info};

use crate::clock::session::SessionCalendar;
use crate::error::{Result, SimError};
use crate::input::Tick;
use crate::instrument::Instrument;
use crate::market::{TickListener, TickSource};
use crate::orderbook::processor::OrderProcessor;
use crate::orderbook::{Execution, FillPolicy, Order, OrderId};
use commission::CommissionSchedule;

/// Receives every execution produced by the matching service.
///
/// Listeners cannot fail. A listener that panics is logged and skipped, the remaining listeners
/// still see the execution.
pub trait ExecutionListener: Send + Sync {
    fn on_execution(&self, instrument: &Instrument, execution: &Execution);
}

fn same_listener(a: &Arc<dyn ExecutionListener>, b: &Arc<dyn ExecutionListener>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

#[derive(Default)]
struct Book {
    processors: Vec<OrderProcessor>,
    last_tick: Option<Tick>,
    subscribed: bool,
}

/// Matches orders against the ticks of a [TickSource].
///
/// The service subscribes to an instrument when the first order for it is placed and
/// unsubscribes once the last order is filled, expired or cancelled. Processors are offered
/// each tick in the order they were placed. All order state sits behind one mutex, executions
/// are broadcast after it is released.
pub struct MatchingService {
    me: Weak<MatchingService>,
    source: Arc<dyn TickSource>,
    commission: Arc<dyn CommissionSchedule>,
    fill_policy: FillPolicy,
    books: Mutex<HashMap<Instrument, Book>>,
    listeners: Mutex<Vec<Arc<dyn ExecutionListener>>>,
    next_id: AtomicU64,
}

impl MatchingService {
    pub fn new(
        source: Arc<dyn TickSource>,
        commission: Arc<dyn CommissionSchedule>,
        fill_policy: FillPolicy,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            source,
            commission,
            fill_policy,
            books: Mutex::new(HashMap::new()),
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        })
    }

    fn as_listener(&self) -> Result<Arc<dyn TickListener>> {
        let me = self
            .me
            .upgrade()
            .ok_or_else(|| SimError::contract_violation("matching service has been dropped"))?;
        Ok(me)
    }

    pub fn add_execution_listener(&self, listener: Arc<dyn ExecutionListener>) {
        let mut listeners = self.listeners.lock().unwrap();
        if !listeners.iter().any(|l| same_listener(l, &listener)) {
            listeners.push(listener);
        }
    }

    pub fn remove_execution_listener(&self, listener: &Arc<dyn ExecutionListener>) {
        self.listeners
            .lock()
            .unwrap()
            .retain(|l| !same_listener(l, listener));
    }

    /// Registers an order and returns its id.
    ///
    /// If the instrument already has a tick the new order is offered it straight away, so a
    /// market order can fill before this returns. Fails with [SimError::InvalidInstrument] when
    /// the tick source does not know the instrument, in which case nothing is left registered.
    pub fn place_order(&self, instrument: &Instrument, order: Order) -> Result<OrderId> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let processor = OrderProcessor::new(id, order)?
            .with_fill_policy(self.fill_policy)
            .with_session(SessionCalendar::for_instrument(instrument));
        info!(
            "EXCHANGE: Order {} placed for {} {:?} {}",
            id,
            instrument,
            processor.order().order_type,
            processor.order().quantity
        );

        let (subscribe, last_tick) = {
            let mut books = self.books.lock().unwrap();
            let book = books.entry(instrument.clone()).or_default();
            book.processors.push(processor);
            let subscribe = !book.subscribed;
            book.subscribed = true;
            (subscribe, book.last_tick.clone())
        };

        if subscribe {
            //Subscribing delivers the latest tick which is matched like any other
            if let Err(e) = self
                .as_listener()
                .and_then(|me| self.source.subscribe(instrument, me))
            {
                self.rollback(instrument, id);
                self.unsubscribe_if_idle(instrument);
                return Err(e);
            }
        } else if let Some(tick) = last_tick {
            self.match_tick(instrument, &tick, Some(id))?;
        }
        Ok(id)
    }

    fn rollback(&self, instrument: &Instrument, id: OrderId) {
        let mut books = self.books.lock().unwrap();
        if let Some(book) = books.get_mut(instrument) {
            book.processors.retain(|p| p.id() != id);
            if book.processors.is_empty() {
                books.remove(instrument);
            }
        }
    }

    /// Drops every working order for the instrument without executing, returns how many there
    /// were.
    pub fn cancel_orders(&self, instrument: &Instrument) -> usize {
        let removed = self.books.lock().unwrap().remove(instrument);
        let Some(book) = removed else {
            return 0;
        };
        info!(
            "EXCHANGE: Cancelled {} orders for {}",
            book.processors.len(),
            instrument
        );
        if book.subscribed {
            self.unsubscribe_if_idle(instrument);
        }
        book.processors.len()
    }

    /// Drops a single working order. Returns false if the order is not working.
    pub fn cancel_order(&self, order_id: OrderId) -> bool {
        let emptied = {
            let mut books = self.books.lock().unwrap();
            let found = books.iter_mut().find_map(|(instrument, book)| {
                let before = book.processors.len();
                book.processors.retain(|p| p.id() != order_id);
                (book.processors.len() != before)
                    .then(|| (instrument.clone(), book.processors.is_empty()))
            });
            match found {
                None => return false,
                Some((instrument, true)) => books.remove(&instrument).map(|book| (instrument, book)),
                Some((_, false)) => None,
            }
        };
        info!("EXCHANGE: Cancelled order {}", order_id);
        if let Some((instrument, book)) = emptied {
            if book.subscribed {
                self.unsubscribe_if_idle(&instrument);
            }
        }
        true
    }

    /// Working orders for the instrument in the order they were placed.
    pub fn open_orders(&self, instrument: &Instrument) -> Vec<OrderProcessor> {
        self.books
            .lock()
            .unwrap()
            .get(instrument)
            .map(|book| book.processors.clone())
            .unwrap_or_default()
    }

    //Drops the subscription unless a listener placed a new order for the instrument in the
    //meantime. The books lock is held so no order can slip in before the source forgets us.
    fn unsubscribe_if_idle(&self, instrument: &Instrument) {
        let books = self.books.lock().unwrap();
        if books.contains_key(instrument) {
            return;
        }
        if let Ok(me) = self.as_listener() {
            debug!("EXCHANGE: No working orders left for {}", instrument);
            self.source.unsubscribe(instrument, &me);
        }
    }

    //Offers a tick to the working orders of an instrument, or only to `only` when a new order is
    //catching up with the last tick. Fills are worked out on copies of the processors and only
    //kept once every commission checks out, so a failed tick leaves the book as it was.
    fn match_tick(&self, instrument: &Instrument, tick: &Tick, only: Option<OrderId>) -> Result<()> {
        let mut executions = Vec::new();
        let emptied = {
            let mut books = self.books.lock().unwrap();
            let Some(book) = books.get_mut(instrument) else {
                return Ok(());
            };
            let mut processors = book.processors.clone();
            for processor in processors.iter_mut() {
                if only.map_or(false, |id| id != processor.id()) {
                    continue;
                }
                if let Some(mut execution) = processor.process(tick)? {
                    let commission = self.commission.commission(instrument, &execution);
                    if commission.is_nan() || commission < 0.0 {
                        return Err(SimError::contract_violation(format!(
                            "commission of {} on order {}",
                            commission,
                            processor.id()
                        )));
                    }
                    execution.commission = commission;
                    executions.push(execution);
                }
            }
            if only.is_none() {
                book.last_tick = Some(tick.clone());
            }
            processors.retain(|p| !p.is_done() && !p.is_expired());
            book.processors = processors;
            if book.processors.is_empty() {
                books.remove(instrument).map_or(false, |book| book.subscribed)
            } else {
                false
            }
        };

        if !executions.is_empty() {
            let listeners = self.listeners.lock().unwrap().clone();
            for execution in &executions {
                info!(
                    "EXCHANGE: Executed order {} {} {} @ {} commission {}",
                    execution.order_id,
                    instrument,
                    execution.quantity,
                    execution.price,
                    execution.commission
                );
                for listener in &listeners {
                    let delivered =
                        catch_unwind(AssertUnwindSafe(|| listener.on_execution(instrument, execution)));
                    if delivered.is_err() {
                        error!(
                            "EXCHANGE: Execution listener panicked on order {}",
                            execution.order_id
                        );
                    }
                }
            }
        }

        //A listener may have placed a new order for this instrument while executions went out
        if emptied {
            self.unsubscribe_if_idle(instrument);
        }
        Ok(())
    }
}

impl TickListener for MatchingService {
    fn on_tick(&self, instrument: &Instrument, tick: &Tick) -> Result<()> {
        self.match_tick(instrument, tick, None)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex, Weak};

    use super::commission::{BrokerCost, CommissionSchedule, CostSchedule};
    use super::{ExecutionListener, MatchingService, MatchingServiceBuilder};
    use crate::clock::SimClock;
    use crate::error::SimError;
    use crate::input::{Tick, VecFeed};
    use crate::instrument::Instrument;
    use crate::market::{SimTickSource, TickSource};
    use crate::orderbook::{Execution, FillPolicy, Order};

    #[derive(Default)]
    struct Fills {
        seen: Mutex<Vec<Execution>>,
    }

    impl ExecutionListener for Fills {
        fn on_execution(&self, _instrument: &Instrument, execution: &Execution) {
            self.seen.lock().unwrap().push(execution.clone());
        }
    }

    struct Panics;

    impl ExecutionListener for Panics {
        fn on_execution(&self, _instrument: &Instrument, _execution: &Execution) {
            panic!("listener failure");
        }
    }

    struct Negative;

    impl CommissionSchedule for Negative {
        fn commission(&self, _instrument: &Instrument, _execution: &Execution) -> f64 {
            -1.0
        }
    }

    //Negative only for one order id
    struct NegativeFor(u64);

    impl CommissionSchedule for NegativeFor {
        fn commission(&self, _instrument: &Instrument, execution: &Execution) -> f64 {
            if execution.order_id == self.0 {
                -1.0
            } else {
                0.0
            }
        }
    }

    //Places a protective stop as soon as a buy fills
    struct Protect {
        exchange: Weak<MatchingService>,
        placed: Mutex<Vec<u64>>,
    }

    impl ExecutionListener for Protect {
        fn on_execution(&self, instrument: &Instrument, execution: &Execution) {
            if execution.quantity <= 0.0 {
                return;
            }
            if let Some(exchange) = self.exchange.upgrade() {
                let id = exchange
                    .place_order(instrument, Order::stop(-execution.quantity, 95.0))
                    .unwrap();
                self.placed.lock().unwrap().push(id);
            }
        }
    }

    fn setup(prices: &[(i64, f64)]) -> (Arc<SimTickSource>, Instrument) {
        let aapl = Instrument::stock("AAPL");
        let source = Arc::new(SimTickSource::new(SimClock::starting_at(0)));
        let ticks = prices.iter().map(|(t, p)| Tick::trade(*t, *p)).collect();
        source.add_feed(&aapl, VecFeed::new(ticks));
        (source, aapl)
    }

    fn service(source: &Arc<SimTickSource>) -> Arc<MatchingService> {
        MatchingServiceBuilder::new()
            .with_source(source.clone())
            .with_commission(Arc::new(CostSchedule::new(vec![BrokerCost::Flat(1.0)])))
            .build()
            .unwrap()
    }

    #[test]
    fn test_that_market_order_fills_on_next_tick_with_commission() {
        let (source, aapl) = setup(&[(1, 150.0), (2, 151.0)]);
        let exchange = service(&source);
        let fills = Arc::new(Fills::default());
        exchange.add_execution_listener(fills.clone());

        let id = exchange.place_order(&aapl, Order::market(100.0)).unwrap();
        assert_eq!(source.listener_count(&aapl), 1);
        source.advance_by(1).unwrap();

        let seen = fills.seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].order_id, id);
        assert_eq!(seen[0].price, 150.0);
        assert_eq!(seen[0].commission, 1.0);
        //Done orders release the subscription
        assert!(exchange.open_orders(&aapl).is_empty());
        assert_eq!(source.listener_count(&aapl), 0);
    }

    #[test]
    fn test_that_order_on_ticking_instrument_sees_last_tick() {
        let (source, aapl) = setup(&[(1, 150.0), (5, 151.0)]);
        let exchange = service(&source);
        let fills = Arc::new(Fills::default());
        exchange.add_execution_listener(fills.clone());

        exchange.place_order(&aapl, Order::limit(10.0, 100.0)).unwrap();
        source.advance_by(2).unwrap();
        exchange.place_order(&aapl, Order::market(10.0)).unwrap();

        let seen = fills.seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].price, 150.0);
        assert_eq!(exchange.open_orders(&aapl).len(), 1);
    }

    #[test]
    fn test_that_unknown_instrument_leaves_nothing_registered() {
        let (source, _aapl) = setup(&[(1, 150.0)]);
        let exchange = service(&source);
        let msft = Instrument::stock("MSFT");
        let res = exchange.place_order(&msft, Order::market(1.0));
        assert!(matches!(res, Err(SimError::InvalidInstrument { .. })));
        assert!(exchange.open_orders(&msft).is_empty());
    }

    #[test]
    fn test_that_cancel_orders_emits_nothing() {
        let (source, aapl) = setup(&[(1, 150.0), (2, 140.0)]);
        let exchange = service(&source);
        let fills = Arc::new(Fills::default());
        exchange.add_execution_listener(fills.clone());

        exchange.place_order(&aapl, Order::limit(10.0, 145.0)).unwrap();
        exchange.place_order(&aapl, Order::limit(10.0, 141.0)).unwrap();
        assert_eq!(exchange.cancel_orders(&aapl), 2);
        source.advance_by(5).unwrap();
        assert!(fills.seen.lock().unwrap().is_empty());
        assert_eq!(source.listener_count(&aapl), 0);
    }

    #[test]
    fn test_that_single_order_can_be_cancelled() {
        let (source, aapl) = setup(&[(1, 150.0), (2, 140.0)]);
        let exchange = service(&source);
        let fills = Arc::new(Fills::default());
        exchange.add_execution_listener(fills.clone());

        let first = exchange.place_order(&aapl, Order::limit(10.0, 145.0)).unwrap();
        let second = exchange.place_order(&aapl, Order::limit(20.0, 145.0)).unwrap();
        assert!(second > first);
        assert!(exchange.cancel_order(first));
        assert!(!exchange.cancel_order(first));
        source.advance_by(5).unwrap();

        let seen = fills.seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].order_id, second);
    }

    #[test]
    fn test_that_orders_are_matched_in_placement_order() {
        let (source, aapl) = setup(&[(1, 150.0), (2, 140.0)]);
        let exchange = service(&source);
        let fills = Arc::new(Fills::default());
        exchange.add_execution_listener(fills.clone());

        let first = exchange.place_order(&aapl, Order::limit(-10.0, 139.0)).unwrap();
        let second = exchange.place_order(&aapl, Order::limit(-10.0, 138.0)).unwrap();
        source.advance_by(5).unwrap();
        let ids: Vec<u64> = fills.seen.lock().unwrap().iter().map(|e| e.order_id).collect();
        assert_eq!(ids, vec![first, second]);
    }

    #[test]
    fn test_that_panicking_listener_does_not_block_others() {
        let (source, aapl) = setup(&[(1, 150.0)]);
        let exchange = service(&source);
        let fills = Arc::new(Fills::default());
        exchange.add_execution_listener(Arc::new(Panics));
        exchange.add_execution_listener(fills.clone());
        exchange.place_order(&aapl, Order::market(1.0)).unwrap();
        source.advance_by(1).unwrap();
        assert_eq!(fills.seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_that_removed_listener_stops_receiving() {
        let (source, aapl) = setup(&[(1, 150.0), (2, 150.0)]);
        let exchange = service(&source);
        let fills = Arc::new(Fills::default());
        let listener: Arc<dyn ExecutionListener> = fills.clone();
        exchange.add_execution_listener(listener.clone());
        exchange.remove_execution_listener(&listener);
        exchange.place_order(&aapl, Order::market(1.0)).unwrap();
        source.advance_by(2).unwrap();
        assert!(fills.seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_that_negative_commission_fails_loudly() {
        let (source, aapl) = setup(&[(1, 150.0)]);
        let exchange = MatchingServiceBuilder::new()
            .with_source(source.clone())
            .with_commission(Arc::new(Negative))
            .build()
            .unwrap();
        exchange.place_order(&aapl, Order::market(1.0)).unwrap();
        let res = source.advance_by(1);
        assert!(matches!(res, Err(SimError::ContractViolation { .. })));
    }

    #[test]
    fn test_that_failed_commission_leaves_every_order_untouched() {
        let (source, aapl) = setup(&[(1, 150.0)]);
        let exchange = MatchingServiceBuilder::new()
            .with_source(source.clone())
            .with_commission(Arc::new(NegativeFor(2)))
            .build()
            .unwrap();
        let fills = Arc::new(Fills::default());
        exchange.add_execution_listener(fills.clone());

        let first = exchange.place_order(&aapl, Order::limit(1.0, 200.0)).unwrap();
        let second = exchange.place_order(&aapl, Order::limit(2.0, 200.0)).unwrap();
        assert_eq!(second, 2);
        let res = source.advance_by(1);
        assert!(matches!(res, Err(SimError::ContractViolation { .. })));

        //The first order would have filled but nothing was kept or announced
        assert!(fills.seen.lock().unwrap().is_empty());
        let open = exchange.open_orders(&aapl);
        assert_eq!(open.len(), 2);
        assert_eq!(open[0].id(), first);
        assert_eq!(open[0].remaining_quantity(), 1.0);
        assert_eq!(open[1].remaining_quantity(), 2.0);
    }

    #[test]
    fn test_that_failed_first_match_releases_the_subscription() {
        let (source, aapl) = setup(&[(1, 150.0), (10, 151.0)]);
        source.clock().advance_to(5.into());
        let exchange = MatchingServiceBuilder::new()
            .with_source(source.clone())
            .with_commission(Arc::new(Negative))
            .build()
            .unwrap();

        //Subscribing hands the order the tick at 1, which it fills against
        let res = exchange.place_order(&aapl, Order::market(1.0));
        assert!(matches!(res, Err(SimError::ContractViolation { .. })));
        assert!(exchange.open_orders(&aapl).is_empty());
        assert_eq!(source.listener_count(&aapl), 0);
    }

    #[test]
    fn test_that_order_placed_from_execution_listener_keeps_working() {
        let (source, aapl) = setup(&[(1, 100.0), (2, 99.0), (3, 90.0)]);
        let exchange = service(&source);
        let fills = Arc::new(Fills::default());
        let protect = Arc::new(Protect {
            exchange: Arc::downgrade(&exchange),
            placed: Mutex::new(Vec::new()),
        });
        exchange.add_execution_listener(fills.clone());
        exchange.add_execution_listener(protect.clone());

        exchange.place_order(&aapl, Order::market(100.0)).unwrap();
        source.advance_by(1).unwrap();
        assert_eq!(protect.placed.lock().unwrap().len(), 1);
        assert_eq!(exchange.open_orders(&aapl).len(), 1);
        assert_eq!(source.listener_count(&aapl), 1);

        source.advance_by(2).unwrap();
        let seen = fills.seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].order_id, protect.placed.lock().unwrap()[0]);
        assert_eq!(seen[1].quantity, -100.0);
        assert_eq!(seen[1].price, 90.0);
        assert!(exchange.open_orders(&aapl).is_empty());
        assert_eq!(source.listener_count(&aapl), 0);
    }

    #[test]
    fn test_that_displayed_size_policy_leaves_remainder_working() {
        let aapl = Instrument::stock("AAPL");
        let source = Arc::new(SimTickSource::new(SimClock::starting_at(0)));
        source.add_feed(
            &aapl,
            VecFeed::new(vec![
                Tick::quote(1, 9.9, 10.0).with_sizes(100.0, 100.0),
                Tick::quote(2, 9.9, 10.0).with_sizes(100.0, 100.0),
            ]),
        );
        let exchange = MatchingServiceBuilder::new()
            .with_source(source.clone())
            .with_fill_policy(FillPolicy::DisplayedSize)
            .build()
            .unwrap();
        exchange.place_order(&aapl, Order::limit(150.0, 10.0)).unwrap();
        source.advance_by(1).unwrap();
        assert_eq!(exchange.open_orders(&aapl)[0].remaining_quantity(), 50.0);
        source.advance_by(1).unwrap();
        assert!(exchange.open_orders(&aapl).is_empty());
    }

    #[test]
    fn test_that_builder_requires_source() {
        assert!(MatchingServiceBuilder::new().build().is_err());
    }

    #[test]
    fn test_that_service_is_a_tick_source_client() {
        let (source, aapl) = setup(&[(1, 150.0)]);
        let exchange = service(&source);
        exchange.place_order(&aapl, Order::limit(1.0, 100.0)).unwrap();
        let dyn_source: Arc<dyn TickSource> = source.clone();
        assert_eq!(*dyn_source.now(), 0);
        assert_eq!(source.listener_count(&aapl), 1);
    }
}
