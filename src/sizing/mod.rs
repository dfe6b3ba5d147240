//! Turning a trade signal into an order: a [PriceRule] picks the limit price, or none for a
//! market order, and a [SizeRule] picks the quantity. Rules are plain data so they can be read
//! from configuration and nested.
use serde::{Deserialize, Serialize};

use crate::error::{Result, SimError};
use crate::exchange::commission::BrokerCost;
use crate::input::Tick;
use crate::instrument::Instrument;
use crate::orderbook::Order;
use crate::portfolio::AccountSnapshot;

/// Intent to trade produced by strategy logic.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Signal {
    pub instrument: Instrument,
    pub is_buy: bool,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub stop: Option<f64>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub enum PriceBase {
    Last,
    Bid,
    Ask,
    Mid,
    Signal,
}

impl PriceBase {
    fn resolve(&self, signal: &Signal, tick: &Tick) -> Option<f64> {
        match self {
            PriceBase::Last => tick.last_price(),
            PriceBase::Bid => tick.bid_price(),
            PriceBase::Ask => tick.ask_price(),
            PriceBase::Mid => match (tick.bid_price(), tick.ask_price()) {
                (Some(bid), Some(ask)) => Some((bid + ask) / 2.0),
                _ => None,
            },
            PriceBase::Signal => signal.price,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum PriceRule {
    /// No limit, trade at the market.
    Market,
    Base { base: PriceBase },
    /// Moves the base price by `offset` in the direction that makes the order easier to fill.
    Offset { base: PriceBase, offset: f64 },
    Multiplied { base: PriceBase, factor: f64 },
    Constrained {
        rule: Box<PriceRule>,
        #[serde(default)]
        min: Option<f64>,
        #[serde(default)]
        max: Option<f64>,
    },
}

impl PriceRule {
    /// `Ok(None)` is a market order. Fails when the rule needs a price the tick or signal does
    /// not have.
    pub fn price(&self, signal: &Signal, tick: &Tick) -> Result<Option<f64>> {
        let missing = |base: &PriceBase| {
            SimError::data_unavailable(format!("no {:?} price for {}", base, signal.instrument))
        };
        let price = match self {
            PriceRule::Market => return Ok(None),
            PriceRule::Base { base } => base.resolve(signal, tick).ok_or_else(|| missing(base))?,
            PriceRule::Offset { base, offset } => {
                let price = base.resolve(signal, tick).ok_or_else(|| missing(base))?;
                if signal.is_buy {
                    price + offset
                } else {
                    price - offset
                }
            }
            PriceRule::Multiplied { base, factor } => {
                base.resolve(signal, tick).ok_or_else(|| missing(base))? * factor
            }
            PriceRule::Constrained { rule, min, max } => {
                let Some(price) = rule.price(signal, tick)? else {
                    return Ok(None);
                };
                let price = min.map_or(price, |min| price.max(min));
                max.map_or(price, |max| price.min(max))
            }
        };
        Ok(Some(price))
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum SizeRule {
    Fixed { quantity: f64 },
    /// Spend a percentage of net liquidation value, after trading costs.
    PercentOfNetLiquidation { percent: f64 },
    /// Risk a fixed amount between the entry and the signal's stop.
    FixedRisk { amount: f64 },
    Multiplied { rule: Box<SizeRule>, factor: f64 },
    Constrained {
        rule: Box<SizeRule>,
        #[serde(default)]
        min: Option<f64>,
        #[serde(default)]
        max: Option<f64>,
    },
}

impl SizeRule {
    /// Unsigned quantity in whole units.
    pub fn quantity(
        &self,
        signal: &Signal,
        price: f64,
        account: &AccountSnapshot,
        costs: &[BrokerCost],
    ) -> Result<f64> {
        let multiplier = signal.instrument.multiplier;
        let quantity = match self {
            SizeRule::Fixed { quantity } => quantity.abs(),
            SizeRule::PercentOfNetLiquidation { percent } => {
                let budget = account.net_liquidation * percent / 100.0;
                let (budget, price) =
                    BrokerCost::trade_impact_total(costs, budget, price, signal.is_buy);
                if price <= 0.0 || budget <= 0.0 {
                    0.0
                } else {
                    budget / (price * multiplier)
                }
            }
            SizeRule::FixedRisk { amount } => {
                let stop = signal.stop.ok_or_else(|| {
                    SimError::invalid_order(format!("no stop to size {} against", signal.instrument))
                })?;
                let risk = (price - stop).abs() * multiplier;
                if risk == 0.0 {
                    return Err(SimError::invalid_order("stop is at the entry price"));
                }
                amount / risk
            }
            SizeRule::Multiplied { rule, factor } => {
                rule.quantity(signal, price, account, costs)? * factor
            }
            SizeRule::Constrained { rule, min, max } => {
                let quantity = rule.quantity(signal, price, account, costs)?;
                let quantity = min.map_or(quantity, |min| quantity.max(min));
                max.map_or(quantity, |max| quantity.min(max))
            }
        };
        Ok(quantity.max(0.0).floor())
    }
}

/// Builds the order for a signal, or `None` when the sizing comes out at zero.
pub fn order_for(
    signal: &Signal,
    tick: &Tick,
    account: &AccountSnapshot,
    price_rule: &PriceRule,
    size_rule: &SizeRule,
    costs: &[BrokerCost],
) -> Result<Option<Order>> {
    let limit = price_rule.price(signal, tick)?;
    let reference = match limit {
        Some(limit) => limit,
        None => tick.trade_price(signal.is_buy).ok_or_else(|| {
            SimError::data_unavailable(format!("no price to size {}", signal.instrument))
        })?,
    };
    let quantity = size_rule.quantity(signal, reference, account, costs)?;
    if quantity == 0.0 {
        return Ok(None);
    }
    let signed = if signal.is_buy { quantity } else { -quantity };
    Ok(Some(match limit {
        Some(limit) => Order::limit(signed, limit),
        None => Order::market(signed),
    }))
}
