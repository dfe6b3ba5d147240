use serde::{Deserialize, Serialize};

use crate::clock::DateTime;
use crate::error::{Result, SimError};
use crate::input::Tick;
use crate::instrument::Instrument;
use crate::orderbook::Execution;

//Quantities closer to zero than this after a closing fill are treated as flat
pub(crate) const FLAT_EPSILON: f64 = 1e-9;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub enum Side {
    Long,
    Short,
}

/// Record of one round trip, from the first fill out of flat until the position is flat again.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct ClosedPosition {
    pub symbol: String,
    pub side: Side,
    pub peak_quantity: f64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub entry_time: DateTime,
    pub exit_time: DateTime,
    pub realized_pnl: f64,
    pub commissions: f64,
    pub percent_gain: f64,
    pub mfe_price: f64,
}

/// Open holding in one instrument.
///
/// Commissions on every fill, entries included, are taken out of realized P&L so that a round
/// trip's realized P&L is its net result.
#[derive(Clone, Debug)]
pub struct Position {
    instrument: Instrument,
    quantity: f64,
    avg_entry: f64,
    avg_exit: f64,
    exit_quantity: f64,
    mark: Option<f64>,
    realized_pnl: f64,
    commissions: f64,
    mfe: Option<f64>,
    entry_time: Option<DateTime>,
    exit_time: Option<DateTime>,
    peak_quantity: f64,
}

impl Position {
    pub fn new(instrument: Instrument) -> Self {
        Self {
            instrument,
            quantity: 0.0,
            avg_entry: 0.0,
            avg_exit: 0.0,
            exit_quantity: 0.0,
            mark: None,
            realized_pnl: 0.0,
            commissions: 0.0,
            mfe: None,
            entry_time: None,
            exit_time: None,
            peak_quantity: 0.0,
        }
    }

    pub fn instrument(&self) -> &Instrument {
        &self.instrument
    }

    pub fn quantity(&self) -> f64 {
        self.quantity
    }

    pub fn is_flat(&self) -> bool {
        self.quantity == 0.0
    }

    pub fn avg_entry_price(&self) -> f64 {
        self.avg_entry
    }

    pub fn avg_exit_price(&self) -> Option<f64> {
        (self.exit_quantity > 0.0).then_some(self.avg_exit)
    }

    pub fn mark_price(&self) -> Option<f64> {
        self.mark
    }

    pub fn realized_pnl(&self) -> f64 {
        self.realized_pnl
    }

    pub fn commissions(&self) -> f64 {
        self.commissions
    }

    pub fn mfe_price(&self) -> Option<f64> {
        self.mfe
    }

    pub fn entry_time(&self) -> Option<DateTime> {
        self.entry_time
    }

    /// Position value at the mark, entry price if no mark has been seen.
    pub fn market_value(&self) -> f64 {
        self.quantity * self.mark.unwrap_or(self.avg_entry) * self.instrument.multiplier
    }

    pub fn unrealized_pnl(&self) -> f64 {
        match self.mark {
            Some(mark) => (mark - self.avg_entry) * self.quantity * self.instrument.multiplier,
            None => 0.0,
        }
    }

    /// Updates the mark and the max favourable excursion: the highest price seen while long, the
    /// lowest while short.
    pub fn set_mark_price(&mut self, tick: &Tick) {
        let Some(price) = tick.mark_price() else {
            return;
        };
        self.mark = Some(price);
        if self.quantity > 0.0 {
            self.mfe = Some(self.mfe.map_or(price, |mfe| mfe.max(price)));
        } else if self.quantity < 0.0 {
            self.mfe = Some(self.mfe.map_or(price, |mfe| mfe.min(price)));
        }
    }

    /// Applies one fill. Returns the round trip record when the fill takes the position flat.
    ///
    /// A fill that would take the position through zero is rejected with
    /// [SimError::UnsupportedReversal]: the caller has to split it into a closing and an opening
    /// fill first.
    pub fn apply_execution(&mut self, execution: &Execution) -> Result<Option<ClosedPosition>> {
        if execution.quantity == 0.0
            || !execution.quantity.is_finite()
            || !execution.price.is_finite()
            || execution.price <= 0.0
            || execution.commission.is_nan()
            || execution.commission < 0.0
        {
            return Err(SimError::contract_violation(format!(
                "malformed execution for order {}: {} @ {} commission {}",
                execution.order_id, execution.quantity, execution.price, execution.commission
            )));
        }

        let adding = self.quantity == 0.0 || self.quantity.signum() == execution.quantity.signum();
        if adding {
            self.open(execution);
            return Ok(None);
        }

        if execution.quantity.abs() > self.quantity.abs() + FLAT_EPSILON {
            return Err(SimError::UnsupportedReversal {
                symbol: self.instrument.to_string(),
                position_qty: self.quantity,
                execution_qty: execution.quantity,
            });
        }
        Ok(self.close(execution))
    }

    fn open(&mut self, execution: &Execution) {
        if self.quantity == 0.0 {
            self.entry_time = Some(execution.time);
            self.mfe = Some(execution.price);
        }
        let new_quantity = self.quantity + execution.quantity;
        self.avg_entry = (self.avg_entry * self.quantity.abs()
            + execution.price * execution.quantity.abs())
            / new_quantity.abs();
        self.quantity = new_quantity;
        self.peak_quantity = self.peak_quantity.max(new_quantity.abs());
        self.realized_pnl -= execution.commission;
        self.commissions += execution.commission;
        if self.mark.is_none() {
            self.mark = Some(execution.price);
        }
    }

    fn close(&mut self, execution: &Execution) -> Option<ClosedPosition> {
        let closing = execution.quantity.abs();
        self.realized_pnl += (execution.price - self.avg_entry)
            * -execution.quantity
            * self.instrument.multiplier
            - execution.commission;
        self.commissions += execution.commission;
        self.avg_exit =
            (self.avg_exit * self.exit_quantity + execution.price * closing) / (self.exit_quantity + closing);
        self.exit_quantity += closing;
        self.exit_time = Some(execution.time);

        let side = if self.quantity > 0.0 {
            Side::Long
        } else {
            Side::Short
        };
        self.quantity += execution.quantity;
        if self.quantity.abs() <= FLAT_EPSILON {
            self.quantity = 0.0;
        }
        if self.quantity != 0.0 {
            return None;
        }

        let sign = match side {
            Side::Long => 1.0,
            Side::Short => -1.0,
        };
        Some(ClosedPosition {
            symbol: self.instrument.to_string(),
            side,
            peak_quantity: self.peak_quantity,
            entry_price: self.avg_entry,
            exit_price: self.avg_exit,
            entry_time: self.entry_time.unwrap_or(execution.time),
            exit_time: execution.time,
            realized_pnl: self.realized_pnl,
            commissions: self.commissions,
            percent_gain: sign * (self.avg_exit - self.avg_entry) / self.avg_entry * 100.0,
            mfe_price: self.mfe.unwrap_or(self.avg_entry),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{Position, Side};
    use crate::error::SimError;
    use crate::input::Tick;
    use crate::instrument::Instrument;
    use crate::orderbook::Execution;

    fn fill(quantity: f64, price: f64, commission: f64, time: i64) -> Execution {
        Execution {
            order_id: 1,
            quantity,
            price,
            commission,
            time: time.into(),
        }
    }

    #[test]
    fn test_that_average_entry_is_order_independent() {
        let fills = [fill(100.0, 10.0, 0.0, 1), fill(50.0, 13.0, 0.0, 2), fill(50.0, 11.0, 0.0, 3)];
        let mut forward = Position::new(Instrument::stock("AAPL"));
        let mut backward = Position::new(Instrument::stock("AAPL"));
        for f in fills.iter() {
            forward.apply_execution(f).unwrap();
        }
        for f in fills.iter().rev() {
            backward.apply_execution(f).unwrap();
        }
        assert!((forward.avg_entry_price() - 11.0).abs() < 1e-9);
        assert!((backward.avg_entry_price() - 11.0).abs() < 1e-9);
        assert_eq!(forward.quantity(), 200.0);
    }

    #[test]
    fn test_that_closing_to_zero_produces_record() {
        let mut position = Position::new(Instrument::stock("AAPL"));
        assert!(position.apply_execution(&fill(100.0, 150.0, 1.0, 1)).unwrap().is_none());
        let closed = position
            .apply_execution(&fill(-100.0, 155.0, 1.0, 2))
            .unwrap()
            .unwrap();
        assert!(position.is_flat());
        assert_eq!(closed.side, Side::Long);
        assert_eq!(closed.realized_pnl, 498.0);
        assert_eq!(closed.commissions, 2.0);
        assert!((closed.percent_gain - 3.3333).abs() < 1e-3);
        assert_eq!(*closed.entry_time, 1);
        assert_eq!(*closed.exit_time, 2);
    }

    #[test]
    fn test_that_partial_close_tracks_average_exit() {
        let mut position = Position::new(Instrument::stock("AAPL"));
        position.apply_execution(&fill(100.0, 10.0, 0.0, 1)).unwrap();
        assert!(position.apply_execution(&fill(-50.0, 12.0, 0.0, 2)).unwrap().is_none());
        assert_eq!(position.realized_pnl(), 100.0);
        let closed = position
            .apply_execution(&fill(-50.0, 14.0, 0.0, 3))
            .unwrap()
            .unwrap();
        assert_eq!(closed.exit_price, 13.0);
        assert_eq!(closed.realized_pnl, 300.0);
        assert_eq!(closed.peak_quantity, 100.0);
    }

    #[test]
    fn test_that_reversal_in_one_step_is_rejected() {
        let mut position = Position::new(Instrument::stock("AAPL"));
        position.apply_execution(&fill(100.0, 10.0, 0.0, 1)).unwrap();
        let res = position.apply_execution(&fill(-150.0, 10.0, 0.0, 2));
        assert!(matches!(res, Err(SimError::UnsupportedReversal { .. })));
        assert_eq!(position.quantity(), 100.0);
    }

    #[test]
    fn test_that_short_gains_when_price_falls() {
        let es = Instrument::future("ES", "20240315", 50.0);
        let mut position = Position::new(es);
        position.apply_execution(&fill(-2.0, 5000.0, 0.0, 1)).unwrap();
        position.set_mark_price(&Tick::trade(2, 4990.0));
        assert_eq!(position.unrealized_pnl(), 1000.0);
        assert_eq!(position.market_value(), -2.0 * 4990.0 * 50.0);
        let closed = position
            .apply_execution(&fill(2.0, 4980.0, 0.0, 3))
            .unwrap()
            .unwrap();
        assert_eq!(closed.realized_pnl, 2000.0);
        assert!(closed.percent_gain > 0.0);
        assert_eq!(closed.side, Side::Short);
    }

    #[test]
    fn test_that_mark_tracks_favourable_excursion() {
        let mut long = Position::new(Instrument::stock("AAPL"));
        long.apply_execution(&fill(10.0, 100.0, 0.0, 1)).unwrap();
        for price in [101.0, 105.0, 103.0] {
            long.set_mark_price(&Tick::trade(2, price));
        }
        assert_eq!(long.mfe_price(), Some(105.0));
        assert_eq!(long.mark_price(), Some(103.0));
        //Marking never touches realized P&L
        assert_eq!(long.realized_pnl(), 0.0);

        let mut short = Position::new(Instrument::stock("AAPL"));
        short.apply_execution(&fill(-10.0, 100.0, 0.0, 1)).unwrap();
        for price in [99.0, 95.0, 97.0] {
            short.set_mark_price(&Tick::trade(2, price));
        }
        assert_eq!(short.mfe_price(), Some(95.0));
    }

    #[test]
    fn test_that_malformed_execution_is_a_contract_violation() {
        let mut position = Position::new(Instrument::stock("AAPL"));
        let res = position.apply_execution(&fill(10.0, f64::NAN, 0.0, 1));
        assert!(matches!(res, Err(SimError::ContractViolation { .. })));
        let res = position.apply_execution(&fill(10.0, 10.0, -1.0, 1));
        assert!(matches!(res, Err(SimError::ContractViolation { .. })));
    }
}
