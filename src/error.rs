use derive_more::{Display, Error};

/// Errors raised by the simulation core.
///
/// [SimError::InvalidInstrument] and [SimError::DataUnavailable] are environment conditions: the
/// first fails a single operation, the second is transient and callers may retry with backoff.
/// The remaining variants are contract violations and indicate a defect in the caller.
#[derive(Clone, Debug, Display, Error, PartialEq)]
pub enum SimError {
    #[display("invalid instrument: {symbol}")]
    InvalidInstrument { symbol: String },
    #[display("data unavailable: {reason}")]
    DataUnavailable { reason: String },
    #[display("execution of {execution_qty} would reverse position of {position_qty} in {symbol}")]
    UnsupportedReversal {
        symbol: String,
        position_qty: f64,
        execution_qty: f64,
    },
    #[display("invalid order: {reason}")]
    InvalidOrder { reason: String },
    #[display("contract violation: {reason}")]
    ContractViolation { reason: String },
}

impl SimError {
    pub fn invalid_instrument(symbol: impl Into<String>) -> Self {
        Self::InvalidInstrument {
            symbol: symbol.into(),
        }
    }

    pub fn data_unavailable(reason: impl Into<String>) -> Self {
        Self::DataUnavailable {
            reason: reason.into(),
        }
    }

    pub fn invalid_order(reason: impl Into<String>) -> Self {
        Self::InvalidOrder {
            reason: reason.into(),
        }
    }

    pub fn contract_violation(reason: impl Into<String>) -> Self {
        Self::ContractViolation {
            reason: reason.into(),
        }
    }

    /// Only [SimError::DataUnavailable] is worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::DataUnavailable { .. })
    }
}

pub type Result<T> = std::result::Result<T, SimError>;
