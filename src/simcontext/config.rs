use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::clock::DateTime;
use crate::exchange::commission::BrokerCost;
use crate::instrument::Instrument;
use crate::orderbook::{FillPolicy, Order};
use crate::source::PeriodUnit;

/// Where ticks for one instrument come from.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(tag = "kind")]
pub enum FeedConfig {
    RandomWalk {
        start_price: f64,
        volatility: f64,
        interval_secs: i64,
        #[serde(default)]
        seed: Option<u64>,
        #[serde(default)]
        persistence: Option<f64>,
    },
    Csv {
        path: PathBuf,
    },
    /// Daily kline archives expanded into ticks, needs an end time.
    Binance {
        unit: PeriodUnit,
        #[serde(default)]
        window: Option<usize>,
        #[serde(default)]
        base_url: Option<String>,
    },
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct InstrumentConfig {
    pub instrument: Instrument,
    pub feed: FeedConfig,
}

/// An order placed once the clock reaches `at`. `symbol` names one of the configured
/// instruments.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct ScheduledOrder {
    pub at: DateTime,
    pub symbol: String,
    pub order: Order,
}

fn default_chunk_secs() -> i64 {
    300
}

fn default_step_secs() -> i64 {
    3600
}

/// Everything needed to set up a backtest, usually read from a JSON file:
///
/// ```json
/// {
///   "starting_cash": 100000.0,
///   "start": 1704724200,
///   "end": 1704810600,
///   "commission": [{"PerShare": 0.005}],
///   "instruments": [{
///     "instrument": {"symbol": "AAPL", "security_type": "Stock", "exchange": "SMART", "currency": "USD"},
///     "feed": {"kind": "RandomWalk", "start_price": 185.0, "volatility": 0.001, "interval_secs": 60}
///   }],
///   "schedule": [{"at": 1704724800, "symbol": "AAPL", "order": {"quantity": 100.0, "order_type": "Market"}}]
/// }
/// ```
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct SimConfig {
    pub starting_cash: f64,
    pub start: DateTime,
    #[serde(default)]
    pub end: Option<DateTime>,
    #[serde(default = "default_chunk_secs")]
    pub chunk_secs: i64,
    //How far the driver moves the clock per call when nothing is scheduled sooner
    #[serde(default = "default_step_secs")]
    pub step_secs: i64,
    #[serde(default)]
    pub fill_policy: FillPolicy,
    #[serde(default)]
    pub commission: Vec<BrokerCost>,
    pub instruments: Vec<InstrumentConfig>,
    #[serde(default)]
    pub schedule: Vec<ScheduledOrder>,
}

impl SimConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file =
            File::open(path).with_context(|| format!("could not open {}", path.display()))?;
        serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("could not parse config {}", path.display()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("could not parse config")
    }

    pub fn instrument(&self, symbol: &str) -> Option<&Instrument> {
        self.instruments
            .iter()
            .map(|config| &config.instrument)
            .find(|instrument| instrument.symbol == symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::{FeedConfig, SimConfig};
    use crate::exchange::commission::BrokerCost;
    use crate::orderbook::{FillPolicy, OrderType};

    const CONFIG: &str = r#"{
        "starting_cash": 100000.0,
        "start": 100,
        "end": 1000,
        "commission": [{"PerShare": 0.01}, {"Flat": 1.0}],
        "fill_policy": "DisplayedSize",
        "instruments": [{
            "instrument": {"symbol": "ABC", "security_type": "Stock", "exchange": "SMART", "currency": "USD"},
            "feed": {"kind": "RandomWalk", "start_price": 100.0, "volatility": 0.01, "interval_secs": 10, "seed": 7}
        }],
        "schedule": [{"at": 200, "symbol": "ABC", "order": {"quantity": -5.0, "order_type": "Limit", "limit_price": 101.0}}]
    }"#;

    #[test]
    fn test_that_config_reads_with_defaults() {
        let config = SimConfig::from_json(CONFIG).unwrap();
        assert_eq!(config.chunk_secs, 300);
        assert_eq!(config.step_secs, 3600);
        assert_eq!(config.fill_policy, FillPolicy::DisplayedSize);
        assert_eq!(
            config.commission,
            vec![BrokerCost::PerShare(0.01), BrokerCost::Flat(1.0)]
        );
        assert!(matches!(
            config.instruments[0].feed,
            FeedConfig::RandomWalk { seed: Some(7), .. }
        ));
        assert_eq!(config.instruments[0].instrument.multiplier, 1.0);

        let scheduled = &config.schedule[0];
        assert_eq!(*scheduled.at, 200);
        assert_eq!(scheduled.order.order_type, OrderType::Limit);
        assert!(scheduled.order.outside_rth);
        assert!(config.instrument("ABC").is_some());
        assert!(config.instrument("XYZ").is_none());
    }

    #[test]
    fn test_that_bad_config_is_an_error() {
        assert!(SimConfig::from_json(r#"{"starting_cash": 1.0}"#).is_err());
        assert!(SimConfig::load("/no/such/config.json").is_err());
    }
}
