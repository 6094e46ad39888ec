//! Binance public REST market data (no credentials needed)

use crate::domain::errors::DataError;
use crate::domain::repositories::market_data::{DataResult, MarketDataSource};
use crate::domain::services::indicators::Candle;
use crate::rate_limit::{throttle, GlobalRateLimiter};
use async_trait::async_trait;
use chrono::DateTime;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

pub const BINANCE_API_BASE: &str = "https://api.binance.com";

/// Binance caps a klines request at 1000 bars.
const MAX_KLINES: usize = 1000;

#[derive(Debug, Deserialize)]
struct TickerPrice {
    price: String,
}

pub struct BinanceMarketData {
    client: Client,
    api_base: String,
    limiter: GlobalRateLimiter,
}

impl BinanceMarketData {
    pub fn new(
        api_base: &str,
        request_timeout: Duration,
        limiter: GlobalRateLimiter,
    ) -> Result<Self, DataError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .user_agent("hedgepilot/0.1.0")
            .build()
            .map_err(|e| DataError::Unavailable {
                symbol: "*".to_string(),
                what: "http client".to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            limiter,
        })
    }

    /// `BTC-USD` -> `BTCUSDT`. USD pairs are quoted in USDT on Binance.
    pub fn exchange_symbol(symbol: &str) -> String {
        let upper = symbol.to_uppercase();
        match upper.split_once('-') {
            Some((base, "USD")) | Some((base, "USDT")) => format!("{}USDT", base),
            Some((base, quote)) => format!("{}{}", base, quote),
            None => upper,
        }
    }

    /// Parse one kline row: `[open_time_ms, "open", "high", "low", "close", "volume", ...]`.
    fn parse_kline(symbol: &str, row: &[Value]) -> DataResult<Candle> {
        let malformed = |reason: String| DataError::Malformed {
            symbol: symbol.to_string(),
            reason,
        };
        let number = |idx: usize| -> DataResult<f64> {
            let field = row
                .get(idx)
                .ok_or_else(|| malformed(format!("kline missing field {}", idx)))?;
            match field {
                Value::String(s) => s
                    .parse::<f64>()
                    .map_err(|e| malformed(format!("kline field {}: {}", idx, e))),
                Value::Number(n) => n
                    .as_f64()
                    .ok_or_else(|| malformed(format!("kline field {} not a float", idx))),
                other => Err(malformed(format!("kline field {} unexpected {}", idx, other))),
            }
        };

        let open_time = row
            .first()
            .and_then(Value::as_i64)
            .and_then(DateTime::from_timestamp_millis)
            .ok_or_else(|| malformed("kline open time".to_string()))?;

        Candle::new(open_time, number(1)?, number(2)?, number(3)?, number(4)?, number(5)?)
            .map_err(|e| malformed(e.to_string()))
    }

    async fn get_json(&self, symbol: &str, what: &str, url: &str) -> DataResult<Value> {
        let unavailable = |reason: String| DataError::Unavailable {
            symbol: symbol.to_string(),
            what: what.to_string(),
            reason,
        };

        throttle(&self.limiter).await;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| unavailable(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(unavailable(format!("{} - {}", status, error_text)));
        }

        response.json::<Value>().await.map_err(|e| DataError::Malformed {
            symbol: symbol.to_string(),
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl MarketDataSource for BinanceMarketData {
    async fn get_ohlcv(&self, symbol: &str, timeframe: &str, lookback: usize) -> DataResult<Vec<Candle>> {
        let url = format!(
            "{}/api/v3/klines?symbol={}&interval={}&limit={}",
            self.api_base,
            Self::exchange_symbol(symbol),
            timeframe,
            lookback.clamp(1, MAX_KLINES)
        );
        let body = self.get_json(symbol, "ohlcv", &url).await?;
        let rows = body.as_array().ok_or_else(|| DataError::Malformed {
            symbol: symbol.to_string(),
            reason: "klines response is not an array".to_string(),
        })?;

        let candles = rows
            .iter()
            .map(|row| match row.as_array() {
                Some(fields) => Self::parse_kline(symbol, fields),
                None => Err(DataError::Malformed {
                    symbol: symbol.to_string(),
                    reason: "kline row is not an array".to_string(),
                }),
            })
            .collect::<DataResult<Vec<_>>>()?;

        if candles.is_empty() {
            return Err(DataError::EmptySeries {
                symbol: symbol.to_string(),
            });
        }
        debug!("Fetched {} {} bars for {}", candles.len(), timeframe, symbol);
        Ok(candles)
    }

    async fn get_current_price(&self, symbol: &str) -> DataResult<f64> {
        let url = format!(
            "{}/api/v3/ticker/price?symbol={}",
            self.api_base,
            Self::exchange_symbol(symbol)
        );
        let body = self.get_json(symbol, "price", &url).await?;
        let ticker: TickerPrice = serde_json::from_value(body).map_err(|e| DataError::Malformed {
            symbol: symbol.to_string(),
            reason: e.to_string(),
        })?;
        ticker.price.parse::<f64>().map_err(|e| DataError::Malformed {
            symbol: symbol.to_string(),
            reason: format!("price '{}': {}", ticker.price, e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_exchange_symbol() {
        assert_eq!(BinanceMarketData::exchange_symbol("BTC-USD"), "BTCUSDT");
        assert_eq!(BinanceMarketData::exchange_symbol("eth-usdt"), "ETHUSDT");
        assert_eq!(BinanceMarketData::exchange_symbol("ETH-BTC"), "ETHBTC");
        assert_eq!(BinanceMarketData::exchange_symbol("SOLUSDT"), "SOLUSDT");
    }

    #[test]
    fn test_parse_kline() {
        let row = json!([1700000000000i64, "100.0", "110.5", "95.0", "105.25", "1234.5", 1700003599999i64]);
        let candle = BinanceMarketData::parse_kline("BTC-USD", row.as_array().unwrap()).unwrap();
        assert_eq!(candle.close.value(), 105.25);
        assert_eq!(candle.high.value(), 110.5);
        assert_eq!(candle.volume, 1234.5);
        assert_eq!(candle.timestamp.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_parse_kline_rejects_garbage() {
        let row = json!([1700000000000i64, "abc", "110.5", "95.0", "105.25", "1.0"]);
        let result = BinanceMarketData::parse_kline("BTC-USD", row.as_array().unwrap());
        assert!(matches!(result, Err(DataError::Malformed { .. })));

        let short = json!([1700000000000i64, "1.0"]);
        assert!(BinanceMarketData::parse_kline("BTC-USD", short.as_array().unwrap()).is_err());
    }
}
