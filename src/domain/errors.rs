use thiserror::Error;

/// A market, research or balance collaborator could not deliver data for one asset.
///
/// Never fatal: the engine degrades to "no signal for this asset" for the current tick.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DataError {
    #[error("Timed out fetching {what} for {symbol}")]
    Timeout { symbol: String, what: String },

    #[error("No {what} available for {symbol}: {reason}")]
    Unavailable {
        symbol: String,
        what: String,
        reason: String,
    },

    #[error("Malformed response for {symbol}: {reason}")]
    Malformed { symbol: String, reason: String },

    #[error("Empty OHLCV series for {symbol}")]
    EmptySeries { symbol: String },
}

/// Failure reported by a venue execution client.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExecutionError {
    #[error("Order rejected by {venue}: {reason}")]
    OrderRejected { venue: String, reason: String },

    #[error("Invalid order parameters: {0}")]
    InvalidOrder(String),

    #[error("Network error talking to {venue}: {reason}")]
    Network { venue: String, reason: String },

    #[error("No execution client configured for venue {0}")]
    NoClientForVenue(String),

    #[error("Timed out waiting for {venue}")]
    Timeout { venue: String },
}

/// Ledger mutation refused because it would break a ledger invariant.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LedgerError {
    #[error("Invalid position for {key}: {reason}")]
    InvalidPosition { key: String, reason: String },

    #[error("Duplicate trade id {0}")]
    DuplicateTrade(String),

    #[error("Trade {0} not found")]
    TradeNotFound(String),

    #[error("Trade {id} is already {status} and cannot be settled again")]
    TradeAlreadySettled { id: String, status: String },

    #[error("Balance must be finite, got {0}")]
    InvalidBalance(f64),
}

/// Errors raised at the tick boundary.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The circuit breaker fired; the loop must stop until an operator clears it.
    #[error("Trading halted: {reason}")]
    TradingHalted { reason: String },

    #[error(transparent)]
    Data(#[from] DataError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl EngineError {
    /// Whether the trading loop may continue after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::TradingHalted { .. })
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Invalid price: {0}")]
    InvalidPrice(String),

    #[error("Invalid candle: {0}")]
    InvalidCandle(String),

    #[error("Value must be finite")]
    MustBeFinite,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_halt_is_fatal() {
        let halted = EngineError::TradingHalted {
            reason: "drawdown".to_string(),
        };
        assert!(halted.is_fatal());

        let data = EngineError::from(DataError::Timeout {
            symbol: "BTC-USD".to_string(),
            what: "ohlcv".to_string(),
        });
        assert!(!data.is_fatal());
    }

    #[test]
    fn test_execution_error_display() {
        let error = ExecutionError::OrderRejected {
            venue: "hyperliquid".to_string(),
            reason: "insufficient margin".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Order rejected by hyperliquid: insufficient margin"
        );
    }

    #[test]
    fn test_ledger_error_display() {
        let error = LedgerError::TradeAlreadySettled {
            id: "t-1".to_string(),
            status: "filled".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Trade t-1 is already filled and cannot be settled again"
        );
    }
}
