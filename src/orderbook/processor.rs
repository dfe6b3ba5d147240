use log::debug;

use super::{Execution, FillPolicy, Order, OrderId, OrderType, TimeInForce};
use crate::clock::session::SessionCalendar;
use crate::error::{Result, SimError};
use crate::input::Tick;

/// Working state of one order.
///
/// The processor is offered every tick for its instrument and decides whether the order fills.
/// Remaining quantity starts at the order quantity and only moves towards zero, the processor is
/// finished once it is exactly zero. Stop and trailing orders wait for their trigger and then
/// behave as a market or limit order from the triggering tick onwards.
#[derive(Clone, Debug)]
pub struct OrderProcessor {
    id: OrderId,
    order: Order,
    remaining: f64,
    fill_policy: FillPolicy,
    session: Option<SessionCalendar>,
    triggered: bool,
    trigger: Option<f64>,
    trail: Option<f64>,
    limit: Option<f64>,
    expired: bool,
}

impl OrderProcessor {
    pub fn new(id: OrderId, order: Order) -> Result<Self> {
        order.validate()?;
        let trigger = match order.order_type {
            OrderType::Stop | OrderType::StopLimit => order.aux_price,
            _ => None,
        };
        let limit = match order.order_type {
            OrderType::Limit | OrderType::StopLimit => order.limit_price,
            _ => None,
        };
        Ok(Self {
            id,
            remaining: order.quantity,
            order,
            fill_policy: FillPolicy::default(),
            session: None,
            triggered: false,
            trigger,
            trail: None,
            limit,
            expired: false,
        })
    }

    pub fn with_fill_policy(mut self, fill_policy: FillPolicy) -> Self {
        self.fill_policy = fill_policy;
        self
    }

    /// Session used to hold back orders that may only trade in regular hours.
    pub fn with_session(mut self, session: SessionCalendar) -> Self {
        self.session = Some(session);
        self
    }

    pub fn id(&self) -> OrderId {
        self.id
    }

    pub fn order(&self) -> &Order {
        &self.order
    }

    pub fn remaining_quantity(&self) -> f64 {
        self.remaining
    }

    pub fn is_done(&self) -> bool {
        self.remaining == 0.0
    }

    pub fn is_expired(&self) -> bool {
        self.expired
    }

    /// Current trigger for stop and trailing orders. Trailing orders have no trigger until the
    /// first tick sets the reference price.
    pub fn trigger_price(&self) -> Option<f64> {
        self.trigger
    }

    fn is_buy(&self) -> bool {
        self.remaining > 0.0
    }

    /// Offers a tick to the order, returns the fill if there is one. Commission is left at zero
    /// for the caller to fill in.
    pub fn process(&mut self, tick: &Tick) -> Result<Option<Execution>> {
        if self.is_done() || self.expired {
            return Ok(None);
        }
        if !self.order.outside_rth {
            if let Some(session) = &self.session {
                if !session.is_open(tick.time) {
                    return Ok(None);
                }
            }
        }

        let fill = match self.order.order_type {
            OrderType::Market => self.market_fill(tick),
            OrderType::Limit => self.limit_fill(tick),
            OrderType::Stop => {
                if self.stop_triggered(tick) {
                    self.market_fill(tick)
                } else {
                    None
                }
            }
            OrderType::StopLimit => {
                if self.stop_triggered(tick) {
                    self.limit_fill(tick)
                } else {
                    None
                }
            }
            OrderType::TrailingStop => {
                if self.trail_triggered(tick) {
                    self.market_fill(tick)
                } else {
                    None
                }
            }
            OrderType::TrailingLimit => {
                if self.trail_triggered(tick) {
                    self.limit_fill(tick)
                } else {
                    None
                }
            }
        };

        let res = match fill {
            Some((quantity, price)) => Some(self.record(quantity, price, tick)?),
            None => None,
        };
        if self.order.tif == TimeInForce::Ioc && !self.is_done() {
            debug!("EXCHANGE: Order {} expired unfilled", self.id);
            self.expired = true;
        }
        Ok(res)
    }

    fn record(&mut self, quantity: f64, price: f64, tick: &Tick) -> Result<Execution> {
        if quantity.abs() > self.remaining.abs() || quantity.signum() != self.remaining.signum() {
            return Err(SimError::contract_violation(format!(
                "order {} filled {} with {} remaining",
                self.id, quantity, self.remaining
            )));
        }
        if quantity == self.remaining {
            self.remaining = 0.0;
        } else {
            self.remaining -= quantity;
        }
        Ok(Execution {
            order_id: self.id,
            quantity,
            price,
            commission: 0.0,
            time: tick.time,
        })
    }

    fn market_fill(&self, tick: &Tick) -> Option<(f64, f64)> {
        let price = tick.trade_price(self.is_buy())?;
        Some((self.remaining, price))
    }

    fn limit_fill(&self, tick: &Tick) -> Option<(f64, f64)> {
        let limit = self.limit?;
        let (price, displayed) = if self.is_buy() {
            let ask = tick.ask_price().or(tick.last_price())?;
            if ask > limit {
                return None;
            }
            (ask, tick.ask_size)
        } else {
            let bid = tick.bid_price().or(tick.last_price())?;
            if bid < limit {
                return None;
            }
            (bid, tick.bid_size)
        };
        let quantity = match self.fill_policy {
            FillPolicy::DisplayedSize if displayed > 0.0 && displayed < self.remaining.abs() => {
                displayed * self.remaining.signum()
            }
            _ => self.remaining,
        };
        Some((quantity, price))
    }

    //Buy stops fire when the market trades up through the trigger, sell stops when it trades down
    fn stop_triggered(&mut self, tick: &Tick) -> bool {
        if self.triggered {
            return true;
        }
        let (Some(trigger), Some(price)) = (self.trigger, tick.trade_price(self.is_buy())) else {
            return false;
        };
        self.triggered = if self.is_buy() {
            price >= trigger
        } else {
            price <= trigger
        };
        if self.triggered {
            debug!("EXCHANGE: Order {} triggered at {}", self.id, price);
        }
        self.triggered
    }

    fn trail_triggered(&mut self, tick: &Tick) -> bool {
        if self.triggered {
            return true;
        }
        let is_buy = self.is_buy();
        let Some(price) = tick.trade_price(is_buy) else {
            return false;
        };

        let (trigger, trail) = match (self.trigger, self.trail) {
            (Some(trigger), Some(trail)) => (trigger, trail),
            _ => {
                let reference = self.order.trail_reference.unwrap_or(price);
                let trail = match (self.order.aux_price, self.order.trail_percent) {
                    (Some(amount), _) if amount > 0.0 => amount,
                    (_, Some(percent)) => reference * percent / 100.0,
                    _ => return false,
                };
                let start = if is_buy {
                    reference + trail
                } else {
                    reference - trail
                };
                self.trail = Some(trail);
                (start, trail)
            }
        };

        //Ratchet towards the market, never away from it
        let trigger = if is_buy {
            trigger.min(price + trail)
        } else {
            trigger.max(price - trail)
        };
        self.trigger = Some(trigger);

        self.triggered = if is_buy {
            price >= trigger
        } else {
            price <= trigger
        };
        if self.triggered {
            let offset = self.order.limit_offset.unwrap_or(0.0);
            self.limit = Some(if is_buy {
                trigger + offset
            } else {
                trigger - offset
            });
            debug!("EXCHANGE: Order {} trailing trigger hit at {}", self.id, trigger);
        }
        self.triggered
    }
}
