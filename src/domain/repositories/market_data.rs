//! Data collaborators: market data, research scores and account balances.
//!
//! Implementations report missing data as errors; they never fabricate fallback values.

use crate::domain::errors::DataError;
use crate::domain::services::indicators::Candle;
use async_trait::async_trait;

pub type DataResult<T> = Result<T, DataError>;

#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Last `lookback` bars of `timeframe` (e.g. `1h`), oldest first.
    async fn get_ohlcv(&self, symbol: &str, timeframe: &str, lookback: usize) -> DataResult<Vec<Candle>>;

    async fn get_current_price(&self, symbol: &str) -> DataResult<f64>;
}

#[async_trait]
pub trait ResearchSource: Send + Sync {
    /// Research confidence for `symbol`, in [0, 1].
    async fn get_confidence_score(&self, symbol: &str) -> DataResult<f64>;
}

#[async_trait]
pub trait BalanceSource: Send + Sync {
    /// Quote-currency balance of the account.
    async fn get_balance(&self, account_id: &str) -> DataResult<f64>;
}
