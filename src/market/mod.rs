//! Tick source: owns one feed per instrument and delivers ticks to subscribers in global time
//! order as the simulation clock moves.
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use log::{debug, info};

use crate::clock::{DateTime, SimClock};
use crate::error::{Result, SimError};
use crate::input::{FeedCursor, Tick, TickFeed};
use crate::instrument::Instrument;

/// Receives ticks for the instruments it subscribed to.
///
/// An error returned from a listener is a defect in that listener, it aborts the
/// [SimTickSource::advance_by] call that was delivering the tick.
pub trait TickListener: Send + Sync {
    fn on_tick(&self, instrument: &Instrument, tick: &Tick) -> Result<()>;
}

pub type SnapshotFuture = Pin<Box<dyn Future<Output = Result<Tick>> + Send>>;

/// Market data interface used by the matching service and the account.
///
/// A live broker adapter can implement this trait too, which is why snapshots are futures even
/// though the simulated source resolves them immediately.
pub trait TickSource: Send + Sync {
    /// Registers `listener` and delivers the most recent tick to it before returning.
    fn subscribe(&self, instrument: &Instrument, listener: Arc<dyn TickListener>) -> Result<()>;
    fn unsubscribe(&self, instrument: &Instrument, listener: &Arc<dyn TickListener>);
    /// Last tick for an instrument without subscribing.
    fn snapshot(&self, instrument: &Instrument) -> SnapshotFuture;
    fn now(&self) -> DateTime;
}

pub(crate) fn same_listener(a: &Arc<dyn TickListener>, b: &Arc<dyn TickListener>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

struct FeedState {
    cursor: FeedCursor,
    index: usize,
    listeners: Vec<Arc<dyn TickListener>>,
    //Latest tick made visible to subscribers, the cursor can be ahead of this mid-delivery
    last: Option<Tick>,
}

impl FeedState {
    fn prime(&mut self, now: DateTime) -> Result<Option<Tick>> {
        self.cursor.advance_to(now)?;
        if let Some(current) = self.cursor.current() {
            let newer = self.last.as_ref().map_or(true, |last| current.time > last.time);
            if current.time <= now && newer {
                self.last = Some(current.clone());
            }
        }
        Ok(self.last.clone())
    }
}

/// Replays feeds against a [SimClock].
///
/// Subscriber sets are guarded by one mutex, ticks are delivered after the lock is released so
/// listeners are free to subscribe, unsubscribe or place orders from inside a callback.
/// Concurrent [SimTickSource::advance_by] calls are serialized.
pub struct SimTickSource {
    feeds: Mutex<HashMap<Instrument, FeedState>>,
    clock: SimClock,
    chunk_secs: i64,
    advancing: Mutex<()>,
}

impl SimTickSource {
    pub fn new(clock: SimClock) -> Self {
        Self {
            feeds: Mutex::new(HashMap::new()),
            clock,
            chunk_secs: 300,
            advancing: Mutex::new(()),
        }
    }

    /// Size of the windows [SimTickSource::advance_by] moves the clock in. Feeds are read one
    /// tick ahead whatever the size.
    pub fn with_chunk_secs(mut self, chunk_secs: i64) -> Self {
        self.chunk_secs = chunk_secs.max(1);
        self
    }

    pub fn add_feed(&self, instrument: &Instrument, feed: impl TickFeed + 'static) {
        self.add_cursor(instrument, FeedCursor::new(feed));
    }

    pub fn add_cursor(&self, instrument: &Instrument, cursor: FeedCursor) {
        let mut feeds = self.feeds.lock().unwrap();
        let index = feeds.len();
        info!("MARKET: Added feed for {}", instrument);
        feeds.insert(
            instrument.clone(),
            FeedState {
                cursor,
                index,
                listeners: Vec::new(),
                last: None,
            },
        );
    }

    pub fn has_feed(&self, instrument: &Instrument) -> bool {
        self.feeds.lock().unwrap().contains_key(instrument)
    }

    pub fn clock(&self) -> SimClock {
        self.clock.clone()
    }

    pub fn chunk_secs(&self) -> i64 {
        self.chunk_secs
    }

    pub fn listener_count(&self, instrument: &Instrument) -> usize {
        self.feeds
            .lock()
            .unwrap()
            .get(instrument)
            .map_or(0, |state| state.listeners.len())
    }

    fn deliver(&self, instrument: &Instrument, tick: Tick) -> Result<()> {
        self.clock.advance_to(tick.time);
        let listeners = {
            let mut feeds = self.feeds.lock().unwrap();
            match feeds.get_mut(instrument) {
                Some(state) => {
                    state.last = Some(tick.clone());
                    state.listeners.clone()
                }
                None => return Ok(()),
            }
        };
        for listener in listeners {
            listener.on_tick(instrument, &tick)?;
        }
        Ok(())
    }

    //Pops the earliest unread tick at or before `date` across the subscribed feeds, ties broken
    //by feed order. A feed that fails to read leaves every cursor untouched.
    fn next_due(&self, date: DateTime) -> Result<Option<(Instrument, Tick)>> {
        let mut feeds = self.feeds.lock().unwrap();
        let mut earliest: Option<(DateTime, usize, &Instrument)> = None;
        for (instrument, state) in feeds.iter_mut() {
            if state.listeners.is_empty() {
                continue;
            }
            let Some(tick) = state.cursor.peek()? else {
                continue;
            };
            if tick.time > date {
                continue;
            }
            let key = (tick.time, state.index);
            if earliest.map_or(true, |(time, index, _)| key < (time, index)) {
                earliest = Some((tick.time, state.index, instrument));
            }
        }
        let Some((_, _, instrument)) = earliest else {
            return Ok(None);
        };
        let instrument = instrument.clone();
        match feeds.get_mut(&instrument) {
            Some(state) => Ok(state.cursor.next()?.map(|tick| (instrument, tick))),
            None => Ok(None),
        }
    }

    /// Moves the clock forward by `secs` and delivers every tick up to the new time.
    ///
    /// Ticks for all subscribed instruments are merged by timestamp, ties broken by the order
    /// feeds were added, and delivered one at a time with the clock set to each tick's time.
    /// Each tick is picked only after the previous one was delivered, so a feed subscribed from
    /// inside a callback joins the merge straight away. If a feed fails the error is returned
    /// and nothing that was read is lost, a later call carries on from the same point.
    /// The clock moves in windows of the chunk size. Returns false once no subscribed feed has
    /// anything left.
    pub fn advance_by(&self, secs: i64) -> Result<bool> {
        let _advancing = self.advancing.lock().unwrap();
        let target = self.clock.now().plus(secs.max(0));
        let mut window_start = self.clock.now();

        loop {
            let window_end = window_start.plus(self.chunk_secs).min(target);
            let mut delivered = 0;
            while let Some((instrument, tick)) = self.next_due(window_end)? {
                self.deliver(&instrument, tick)?;
                delivered += 1;
            }
            if delivered > 0 {
                debug!(
                    "MARKET: Delivered {} ticks up to {}",
                    delivered, *window_end
                );
            }
            self.clock.advance_to(window_end);

            if window_end >= target {
                break;
            }
            window_start = window_end;
        }

        let mut feeds = self.feeds.lock().unwrap();
        let mut more = false;
        for state in feeds.values_mut() {
            if !state.listeners.is_empty() && state.cursor.has_more()? {
                more = true;
            }
        }
        Ok(more)
    }
}

impl TickSource for SimTickSource {
    fn subscribe(&self, instrument: &Instrument, listener: Arc<dyn TickListener>) -> Result<()> {
        let last = {
            let mut feeds = self.feeds.lock().unwrap();
            let state = feeds
                .get_mut(instrument)
                .ok_or_else(|| SimError::invalid_instrument(instrument.to_string()))?;
            let last = if state.listeners.is_empty() || state.last.is_none() {
                state.prime(self.clock.now())?
            } else {
                state.last.clone()
            };
            if !state
                .listeners
                .iter()
                .any(|existing| same_listener(existing, &listener))
            {
                state.listeners.push(Arc::clone(&listener));
            }
            last
        };
        if let Some(tick) = last {
            listener.on_tick(instrument, &tick)?;
        }
        Ok(())
    }

    fn unsubscribe(&self, instrument: &Instrument, listener: &Arc<dyn TickListener>) {
        let mut feeds = self.feeds.lock().unwrap();
        if let Some(state) = feeds.get_mut(instrument) {
            state
                .listeners
                .retain(|existing| !same_listener(existing, listener));
        }
    }

    fn snapshot(&self, instrument: &Instrument) -> SnapshotFuture {
        let res = {
            let mut feeds = self.feeds.lock().unwrap();
            match feeds.get_mut(instrument) {
                None => Err(SimError::invalid_instrument(instrument.to_string())),
                Some(state) => {
                    let last = match &state.last {
                        Some(last) => Ok(Some(last.clone())),
                        None => state.prime(self.clock.now()),
                    };
                    last.and_then(|last| {
                        last.ok_or_else(|| {
                            SimError::data_unavailable(format!(
                                "no tick for {} at {}",
                                instrument,
                                *self.clock.now()
                            ))
                        })
                    })
                }
            }
        };
        Box::pin(std::future::ready(res))
    }

    fn now(&self) -> DateTime {
        self.clock.now()
    }
}
