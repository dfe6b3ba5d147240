//! Sources are upstream providers of historical bars. They are not read by the simulation
//! directly: [crate::input::bars::BarFeed] pulls windows from a source and turns them into ticks.
pub mod binance;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::clock::DateTime;
use crate::error::{Result, SimError};
use crate::instrument::Instrument;

/// One OHLC bar, `time` is the open time of the bar.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Bar {
    pub time: DateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Deserialize, Serialize)]
pub enum PeriodUnit {
    Second,
    FiveSeconds,
    FifteenSeconds,
    ThirtySeconds,
    Minute,
    FiveMinutes,
    FifteenMinutes,
    ThirtyMinutes,
    Hour,
    Day,
    Week,
    Month,
    Year,
}

impl PeriodUnit {
    /// Length of one period. Months and years are nominal, 30 and 365 days.
    pub fn secs(&self) -> i64 {
        match self {
            PeriodUnit::Second => 1,
            PeriodUnit::FiveSeconds => 5,
            PeriodUnit::FifteenSeconds => 15,
            PeriodUnit::ThirtySeconds => 30,
            PeriodUnit::Minute => 60,
            PeriodUnit::FiveMinutes => 300,
            PeriodUnit::FifteenMinutes => 900,
            PeriodUnit::ThirtyMinutes => 1_800,
            PeriodUnit::Hour => 3_600,
            PeriodUnit::Day => 86_400,
            PeriodUnit::Week => 7 * 86_400,
            PeriodUnit::Month => 30 * 86_400,
            PeriodUnit::Year => 365 * 86_400,
        }
    }
}

/// Serves windows of historical bars.
///
/// A request covers `num_periods` periods of `unit` ending at `end`, exclusive, so the bars
/// returned have `end - num_periods * unit <= time < end` and are sorted by time. Fails with
/// [SimError::InvalidInstrument] when the instrument is unknown and with
/// [SimError::DataUnavailable] when the window cannot be served right now.
pub trait HistoricalDataSource: Send + Sync {
    fn get_historical_data(
        &self,
        instrument: &Instrument,
        end: DateTime,
        num_periods: usize,
        unit: PeriodUnit,
    ) -> Result<Vec<Bar>>;
}

/// Bars held in memory, keyed by instrument.
#[derive(Clone, Debug, Default)]
pub struct MemoryHistory {
    bars: HashMap<Instrument, Vec<Bar>>,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_bars(&mut self, instrument: &Instrument, bars: Vec<Bar>) {
        let entry = self.bars.entry(instrument.clone()).or_default();
        entry.extend(bars);
        entry.sort_by_key(|bar| bar.time);
    }
}

impl HistoricalDataSource for MemoryHistory {
    fn get_historical_data(
        &self,
        instrument: &Instrument,
        end: DateTime,
        num_periods: usize,
        unit: PeriodUnit,
    ) -> Result<Vec<Bar>> {
        let bars = self
            .bars
            .get(instrument)
            .ok_or_else(|| SimError::invalid_instrument(instrument.to_string()))?;
        let start = end.plus(-(num_periods as i64) * unit.secs());
        Ok(bars
            .iter()
            .filter(|bar| bar.time >= start && bar.time < end)
            .cloned()
            .collect())
    }
}
