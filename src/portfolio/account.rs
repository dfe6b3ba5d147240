use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex, Weak};

use log::{error, info, warn};
use serde::{Deserialize, Serialize};

use super::position::{ClosedPosition, Position, FLAT_EPSILON};
use crate::clock::DateTime;
use crate::error::{Result, SimError};
use crate::exchange::ExecutionListener;
use crate::input::Tick;
use crate::instrument::Instrument;
use crate::market::{TickListener, TickSource};
use crate::orderbook::Execution;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub enum ValueType {
    NetLiquidation,
    CashBalance,
    RealizedPnl,
    UnrealizedPnl,
    GrossPositionValue,
}

impl FromStr for ValueType {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "NetLiquidation" => Ok(ValueType::NetLiquidation),
            "CashBalance" => Ok(ValueType::CashBalance),
            "RealizedPnL" | "RealizedPnl" => Ok(ValueType::RealizedPnl),
            "UnrealizedPnL" | "UnrealizedPnl" => Ok(ValueType::UnrealizedPnl),
            "GrossPositionValue" => Ok(ValueType::GrossPositionValue),
            other => Err(SimError::contract_violation(format!(
                "unknown account value {}",
                other
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct PositionSnapshot {
    pub symbol: String,
    pub quantity: f64,
    pub avg_entry_price: f64,
    pub mark_price: Option<f64>,
    pub market_value: f64,
    pub unrealized_pnl: f64,
    pub realized_pnl: f64,
}

/// Consistent view of the account taken under its lock.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct AccountSnapshot {
    pub cash: f64,
    pub net_liquidation: f64,
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
    pub gross_position_value: f64,
    pub positions: Vec<PositionSnapshot>,
    pub closed_positions: usize,
    pub updated: DateTime,
}

pub trait AccountListener: Send + Sync {
    fn on_account_update(&self, snapshot: &AccountSnapshot);
}

fn same_listener(a: &Arc<dyn AccountListener>, b: &Arc<dyn AccountListener>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

#[derive(Clone, Debug)]
struct AccountState {
    cash: f64,
    positions: HashMap<Instrument, Position>,
    closed: Vec<ClosedPosition>,
    closed_pnl: f64,
    updated: DateTime,
}

impl AccountState {
    //Values are always summed from scratch, never carried forward
    fn net_liquidation(&self) -> f64 {
        self.cash
            + self
                .positions
                .values()
                .map(|position| position.market_value())
                .sum::<f64>()
    }

    fn value(&self, value_type: ValueType) -> f64 {
        match value_type {
            ValueType::NetLiquidation => self.net_liquidation(),
            ValueType::CashBalance => self.cash,
            ValueType::RealizedPnl => {
                self.closed_pnl
                    + self
                        .positions
                        .values()
                        .map(|position| position.realized_pnl())
                        .sum::<f64>()
            }
            ValueType::UnrealizedPnl => self
                .positions
                .values()
                .map(|position| position.unrealized_pnl())
                .sum(),
            ValueType::GrossPositionValue => self
                .positions
                .values()
                .map(|position| position.market_value().abs())
                .sum(),
        }
    }

    fn snapshot(&self) -> AccountSnapshot {
        let mut positions: Vec<PositionSnapshot> = self
            .positions
            .values()
            .map(|position| PositionSnapshot {
                symbol: position.instrument().to_string(),
                quantity: position.quantity(),
                avg_entry_price: position.avg_entry_price(),
                mark_price: position.mark_price(),
                market_value: position.market_value(),
                unrealized_pnl: position.unrealized_pnl(),
                realized_pnl: position.realized_pnl(),
            })
            .collect();
        positions.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        AccountSnapshot {
            cash: self.cash,
            net_liquidation: self.net_liquidation(),
            realized_pnl: self.value(ValueType::RealizedPnl),
            unrealized_pnl: self.value(ValueType::UnrealizedPnl),
            gross_position_value: self.value(ValueType::GrossPositionValue),
            positions,
            closed_positions: self.closed.len(),
            updated: self.updated,
        }
    }
}

/// Cash, live positions and the history of closed round trips for a single account.
///
/// The account listens to executions from the matching service and, while it holds a position
/// in an instrument, to that instrument's ticks for marking. Executions are applied to a copy of
/// the state that replaces the original only if every step succeeds.
pub struct Account {
    me: Weak<Account>,
    source: Arc<dyn TickSource>,
    state: Mutex<AccountState>,
    listeners: Mutex<Vec<Arc<dyn AccountListener>>>,
}

impl Account {
    pub fn new(source: Arc<dyn TickSource>, starting_cash: f64) -> Arc<Self> {
        let updated = source.now();
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            source,
            state: Mutex::new(AccountState {
                cash: starting_cash,
                positions: HashMap::new(),
                closed: Vec::new(),
                closed_pnl: 0.0,
                updated,
            }),
            listeners: Mutex::new(Vec::new()),
        })
    }

    pub fn add_account_listener(&self, listener: Arc<dyn AccountListener>) {
        let mut listeners = self.listeners.lock().unwrap();
        if !listeners.iter().any(|l| same_listener(l, &listener)) {
            listeners.push(listener);
        }
    }

    pub fn remove_account_listener(&self, listener: &Arc<dyn AccountListener>) {
        self.listeners
            .lock()
            .unwrap()
            .retain(|l| !same_listener(l, listener));
    }

    fn notify(&self, snapshot: &AccountSnapshot) {
        let listeners = self.listeners.lock().unwrap().clone();
        for listener in listeners {
            listener.on_account_update(snapshot);
        }
    }

    pub fn net_liquidation_value(&self) -> f64 {
        self.state.lock().unwrap().net_liquidation()
    }

    pub fn cash_balance(&self) -> f64 {
        self.state.lock().unwrap().cash
    }

    pub fn get_value(&self, value_type: ValueType) -> f64 {
        self.state.lock().unwrap().value(value_type)
    }

    pub fn snapshot(&self) -> AccountSnapshot {
        self.state.lock().unwrap().snapshot()
    }

    pub fn position(&self, instrument: &Instrument) -> Option<Position> {
        self.state.lock().unwrap().positions.get(instrument).cloned()
    }

    pub fn positions(&self) -> Vec<Position> {
        self.state
            .lock()
            .unwrap()
            .positions
            .values()
            .cloned()
            .collect()
    }

    pub fn closed_positions(&self) -> Vec<ClosedPosition> {
        self.state.lock().unwrap().closed.clone()
    }

    pub fn last_update(&self) -> DateTime {
        self.state.lock().unwrap().updated
    }

    pub fn deposit_cash(&self, amount: f64) -> Result<f64> {
        if amount.is_nan() || amount < 0.0 {
            return Err(SimError::contract_violation(format!(
                "cannot deposit {}",
                amount
            )));
        }
        let mut state = self.state.lock().unwrap();
        state.cash += amount;
        info!("ACCOUNT: Deposited {}, cash is {}", amount, state.cash);
        Ok(state.cash)
    }

    pub fn withdraw_cash(&self, amount: f64) -> Result<f64> {
        if amount.is_nan() || amount < 0.0 {
            return Err(SimError::contract_violation(format!(
                "cannot withdraw {}",
                amount
            )));
        }
        let mut state = self.state.lock().unwrap();
        if amount > state.cash {
            return Err(SimError::invalid_order(format!(
                "withdrawal of {} exceeds cash of {}",
                amount, state.cash
            )));
        }
        state.cash -= amount;
        info!("ACCOUNT: Withdrew {}, cash is {}", amount, state.cash);
        Ok(state.cash)
    }

    /// Applies a fill to cash and to the instrument's position.
    ///
    /// A fill that takes the position through zero is split into a closing fill for the current
    /// quantity and an opening fill for the rest, commission shared pro rata, both at the same
    /// price and time. Nothing changes if any step fails.
    pub fn handle_execution(&self, instrument: &Instrument, execution: &Execution) -> Result<()> {
        let (snapshot, is_open) = {
            let mut state = self.state.lock().unwrap();
            let mut next = state.clone();
            let mut position = next
                .positions
                .remove(instrument)
                .unwrap_or_else(|| Position::new(instrument.clone()));

            let current = position.quantity();
            //Overshoot within float noise closes the position rather than opening dust
            let reverses = current != 0.0
                && current.signum() != execution.quantity.signum()
                && execution.quantity.abs() > current.abs() + FLAT_EPSILON;
            let pieces = if reverses {
                let (close, open) = execution.split(-current);
                vec![close, open]
            } else {
                vec![execution.clone()]
            };

            for piece in &pieces {
                if let Some(closed) = position.apply_execution(piece)? {
                    info!(
                        "ACCOUNT: Closed {} {:?} realized {:.2} ({:.2}%)",
                        closed.symbol, closed.side, closed.realized_pnl, closed.percent_gain
                    );
                    next.closed_pnl += closed.realized_pnl;
                    next.closed.push(closed);
                    position = Position::new(instrument.clone());
                }
            }

            next.cash -= execution.quantity * execution.price * instrument.multiplier
                + execution.commission;
            next.updated = next.updated.max(execution.time);
            let is_open = !position.is_flat();
            if is_open {
                next.positions.insert(instrument.clone(), position);
            }
            *state = next;
            (state.snapshot(), is_open)
        };

        self.notify(&snapshot);

        //Mark to market only runs while there is something to mark
        match self.me.upgrade() {
            Some(me) => {
                let listener: Arc<dyn TickListener> = me;
                if is_open {
                    if let Err(e) = self.source.subscribe(instrument, listener) {
                        warn!("ACCOUNT: Cannot mark {} to market: {}", instrument, e);
                    }
                } else {
                    self.source.unsubscribe(instrument, &listener);
                }
            }
            None => warn!("ACCOUNT: Account dropped while handling execution"),
        }
        Ok(())
    }

    /// Marks the instrument's position to the tick.
    pub fn tick(&self, instrument: &Instrument, tick: &Tick) {
        let snapshot = {
            let mut state = self.state.lock().unwrap();
            let Some(position) = state.positions.get_mut(instrument) else {
                return;
            };
            position.set_mark_price(tick);
            state.updated = state.updated.max(tick.time);
            state.snapshot()
        };
        self.notify(&snapshot);
    }
}

impl ExecutionListener for Account {
    fn on_execution(&self, instrument: &Instrument, execution: &Execution) {
        if let Err(e) = self.handle_execution(instrument, execution) {
            error!(
                "ACCOUNT: Rejected execution for order {}: {}",
                execution.order_id, e
            );
        }
    }
}

impl TickListener for Account {
    fn on_tick(&self, instrument: &Instrument, tick: &Tick) -> Result<()> {
        self.tick(instrument, tick);
        Ok(())
    }
}
