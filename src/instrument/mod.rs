use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord, Deserialize, Serialize)]
pub enum SecurityType {
    Stock,
    Future,
    Option,
}

/// A tradable contract.
///
/// Identity is (security type, symbol, expiry). Exchange, currency and multiplier are metadata
/// and two instruments differing only there are the same instrument. Use the `with_` methods to
/// derive a copy with different metadata.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Instrument {
    pub symbol: String,
    pub security_type: SecurityType,
    pub exchange: String,
    pub currency: String,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    //Expiry as YYYYMMDD, futures only
    #[serde(default)]
    pub expiry: Option<String>,
}

fn default_multiplier() -> f64 {
    1.0
}

impl Instrument {
    pub fn stock(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            security_type: SecurityType::Stock,
            exchange: "SMART".to_string(),
            currency: "USD".to_string(),
            multiplier: 1.0,
            expiry: None,
        }
    }

    pub fn future(symbol: impl Into<String>, expiry: impl Into<String>, multiplier: f64) -> Self {
        Self {
            symbol: symbol.into(),
            security_type: SecurityType::Future,
            exchange: "CME".to_string(),
            currency: "USD".to_string(),
            multiplier,
            expiry: Some(expiry.into()),
        }
    }

    pub fn option(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            security_type: SecurityType::Option,
            exchange: "SMART".to_string(),
            currency: "USD".to_string(),
            multiplier: 100.0,
            expiry: None,
        }
    }

    pub fn with_exchange(&self, exchange: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
            ..self.clone()
        }
    }

    pub fn with_currency(&self, currency: impl Into<String>) -> Self {
        Self {
            currency: currency.into(),
            ..self.clone()
        }
    }

    pub fn with_multiplier(&self, multiplier: f64) -> Self {
        Self {
            multiplier,
            ..self.clone()
        }
    }

    pub fn with_expiry(&self, expiry: impl Into<String>) -> Self {
        Self {
            expiry: Some(expiry.into()),
            ..self.clone()
        }
    }
}

impl PartialEq for Instrument {
    fn eq(&self, other: &Self) -> bool {
        self.security_type == other.security_type
            && self.symbol == other.symbol
            && self.expiry == other.expiry
    }
}

impl Eq for Instrument {}

impl Hash for Instrument {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.security_type.hash(state);
        self.symbol.hash(state);
        self.expiry.hash(state);
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.expiry {
            Some(expiry) => write!(f, "{}-{}", self.symbol, expiry),
            None => write!(f, "{}", self.symbol),
        }
    }
}
