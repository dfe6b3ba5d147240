use serde::{Deserialize, Serialize};

use crate::instrument::Instrument;
use crate::orderbook::Execution;

/// Prices the cost of an execution. Implementations must return a non-negative amount, the
/// matching service rejects anything else.
pub trait CommissionSchedule: Send + Sync {
    fn commission(&self, instrument: &Instrument, execution: &Execution) -> f64;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ZeroCommission;

impl CommissionSchedule for ZeroCommission {
    fn commission(&self, _instrument: &Instrument, _execution: &Execution) -> f64 {
        0.0
    }
}

/// One component of a trading cost.
///
/// `PctOfValue` is a fraction, 0.001 is ten basis points of notional including the contract
/// multiplier.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub enum BrokerCost {
    PerShare(f64),
    PctOfValue(f64),
    Flat(f64),
}

impl BrokerCost {
    pub fn calc(&self, instrument: &Instrument, execution: &Execution) -> f64 {
        match self {
            BrokerCost::PerShare(cost) => execution.quantity.abs() * cost,
            BrokerCost::PctOfValue(pct) => execution.value() * instrument.multiplier * pct,
            BrokerCost::Flat(val) => *val,
        }
    }

    //Returns the budget and price left once this cost is taken out, used when sizing an order
    //against cash
    pub fn trade_impact(&self, gross_budget: f64, gross_price: f64, is_buy: bool) -> (f64, f64) {
        let mut net_budget = gross_budget;
        let mut net_price = gross_price;
        match self {
            BrokerCost::PerShare(val) => {
                if is_buy {
                    net_price += val;
                } else {
                    net_price -= val;
                }
            }
            BrokerCost::PctOfValue(pct) => {
                net_budget *= 1.0 - pct;
            }
            BrokerCost::Flat(val) => net_budget -= val,
        }
        (net_budget, net_price)
    }

    pub fn trade_impact_total(
        costs: &[BrokerCost],
        gross_budget: f64,
        gross_price: f64,
        is_buy: bool,
    ) -> (f64, f64) {
        let mut res = (gross_budget, gross_price);
        for cost in costs {
            res = cost.trade_impact(res.0, res.1, is_buy);
        }
        res
    }
}

/// Sum of several [BrokerCost] components.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct CostSchedule {
    costs: Vec<BrokerCost>,
}

impl CostSchedule {
    pub fn new(costs: Vec<BrokerCost>) -> Self {
        Self { costs }
    }

    pub fn costs(&self) -> &[BrokerCost] {
        &self.costs
    }
}

impl CommissionSchedule for CostSchedule {
    fn commission(&self, instrument: &Instrument, execution: &Execution) -> f64 {
        self.costs
            .iter()
            .map(|cost| cost.calc(instrument, execution))
            .sum()
    }
}
