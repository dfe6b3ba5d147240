//! Orders, the executions they produce and the per-order state machines that decide when and at
//! what price an order fills.
pub mod processor;

use serde::{Deserialize, Serialize};

use crate::clock::DateTime;
use crate::error::{Result, SimError};

pub type OrderId = u64;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub enum OrderType {
    Market,
    Limit,
    Stop,
    StopLimit,
    TrailingStop,
    TrailingLimit,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub enum TimeInForce {
    Day,
    #[default]
    Gtc,
    //Immediate or cancel: whatever does not fill on the first tick seen is dropped
    Ioc,
}

/// How much of a marketable limit-type order fills against one tick.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub enum FillPolicy {
    /// The whole remaining quantity fills.
    #[default]
    Full,
    /// Fills are capped by the size displayed on the opposing side, the remainder keeps working.
    /// Ticks without a displayed size fill in full.
    DisplayedSize,
}

fn default_outside_rth() -> bool {
    true
}

/// Description of an order. Quantity is signed: positive buys, negative sells.
///
/// `aux_price` is the trigger for stop orders and the trail amount for trailing orders. Trailing
/// orders may give `trail_percent` instead, a percentage of the reference price.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Order {
    pub quantity: f64,
    pub order_type: OrderType,
    #[serde(default)]
    pub limit_price: Option<f64>,
    #[serde(default)]
    pub aux_price: Option<f64>,
    #[serde(default)]
    pub trail_reference: Option<f64>,
    #[serde(default)]
    pub trail_percent: Option<f64>,
    #[serde(default)]
    pub limit_offset: Option<f64>,
    #[serde(default)]
    pub tif: TimeInForce,
    #[serde(default = "default_outside_rth")]
    pub outside_rth: bool,
    #[serde(default)]
    pub account: Option<String>,
    #[serde(default)]
    pub broker_id: Option<String>,
}

impl Order {
    fn new(quantity: f64, order_type: OrderType) -> Self {
        Self {
            quantity,
            order_type,
            limit_price: None,
            aux_price: None,
            trail_reference: None,
            trail_percent: None,
            limit_offset: None,
            tif: TimeInForce::default(),
            outside_rth: true,
            account: None,
            broker_id: None,
        }
    }

    pub fn market(quantity: f64) -> Self {
        Self::new(quantity, OrderType::Market)
    }

    pub fn limit(quantity: f64, limit_price: f64) -> Self {
        Self {
            limit_price: Some(limit_price),
            ..Self::new(quantity, OrderType::Limit)
        }
    }

    pub fn stop(quantity: f64, trigger: f64) -> Self {
        Self {
            aux_price: Some(trigger),
            ..Self::new(quantity, OrderType::Stop)
        }
    }

    pub fn stop_limit(quantity: f64, trigger: f64, limit_price: f64) -> Self {
        Self {
            aux_price: Some(trigger),
            limit_price: Some(limit_price),
            ..Self::new(quantity, OrderType::StopLimit)
        }
    }

    pub fn trailing_stop(quantity: f64, trail: f64) -> Self {
        Self {
            aux_price: Some(trail),
            ..Self::new(quantity, OrderType::TrailingStop)
        }
    }

    pub fn trailing_limit(quantity: f64, trail: f64, limit_offset: f64) -> Self {
        Self {
            aux_price: Some(trail),
            limit_offset: Some(limit_offset),
            ..Self::new(quantity, OrderType::TrailingLimit)
        }
    }

    /// Trail by a percentage of the reference price rather than a fixed amount.
    pub fn with_trail_percent(mut self, percent: f64) -> Self {
        self.aux_price = None;
        self.trail_percent = Some(percent);
        self
    }

    pub fn with_trail_reference(mut self, reference: f64) -> Self {
        self.trail_reference = Some(reference);
        self
    }

    pub fn with_tif(mut self, tif: TimeInForce) -> Self {
        self.tif = tif;
        self
    }

    pub fn regular_hours_only(mut self) -> Self {
        self.outside_rth = false;
        self
    }

    pub fn with_account(mut self, account: impl Into<String>) -> Self {
        self.account = Some(account.into());
        self
    }

    pub fn is_buy(&self) -> bool {
        self.quantity > 0.0
    }

    pub fn validate(&self) -> Result<()> {
        let positive = |price: Option<f64>| price.map_or(false, |p| p.is_finite() && p > 0.0);
        if !self.quantity.is_finite() || self.quantity == 0.0 {
            return Err(SimError::invalid_order(format!(
                "quantity must be non-zero, got {}",
                self.quantity
            )));
        }
        let ok = match self.order_type {
            OrderType::Market => true,
            OrderType::Limit => positive(self.limit_price),
            OrderType::Stop => positive(self.aux_price),
            OrderType::StopLimit => positive(self.aux_price) && positive(self.limit_price),
            OrderType::TrailingStop | OrderType::TrailingLimit => {
                positive(self.aux_price) || positive(self.trail_percent)
            }
        };
        if !ok {
            return Err(SimError::invalid_order(format!(
                "{:?} order is missing a price",
                self.order_type
            )));
        }
        if self.limit_offset.map_or(false, |offset| offset < 0.0) {
            return Err(SimError::invalid_order("limit offset cannot be negative"));
        }
        Ok(())
    }
}

/// A fill. Quantity has the same sign as the order that produced it.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Execution {
    pub order_id: OrderId,
    pub quantity: f64,
    pub price: f64,
    pub commission: f64,
    pub time: DateTime,
}

impl Execution {
    pub fn value(&self) -> f64 {
        self.quantity.abs() * self.price
    }

    /// Splits off the first `quantity` of this execution, commission is shared pro rata.
    pub(crate) fn split(&self, quantity: f64) -> (Execution, Execution) {
        let share = quantity / self.quantity;
        let first = Execution {
            quantity,
            commission: self.commission * share,
            ..self.clone()
        };
        let second = Execution {
            quantity: self.quantity - quantity,
            commission: self.commission - first.commission,
            ..self.clone()
        };
        (first, second)
    }
}
