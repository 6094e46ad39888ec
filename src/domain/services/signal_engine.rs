use crate::config::SignalConfig;
use crate::domain::errors::DataError;
use crate::domain::services::indicators::{Candle, Indicators};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    Bullish,
    Bearish,
    Neutral,
}

impl SignalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::Bullish => "bullish",
            SignalKind::Bearish => "bearish",
            SignalKind::Neutral => "neutral",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSignal {
    pub symbol: String,
    pub kind: SignalKind,
    /// Share of votes agreeing with `kind`, in [0, 1]. Neutral is always 0.5.
    pub strength: f64,
    pub contributing_indicators: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SignalAnalysis {
    pub indicators: Indicators,
    pub signal: Option<MarketSignal>,
}

struct Vote {
    indicator: &'static str,
    bullish: bool,
}

/// Turns an OHLCV series into indicators and at most one directional signal by majority vote.
#[derive(Debug, Clone)]
pub struct SignalEngine {
    config: SignalConfig,
}

impl SignalEngine {
    pub fn new(config: SignalConfig) -> Self {
        SignalEngine { config }
    }

    pub fn config(&self) -> &SignalConfig {
        &self.config
    }

    /// Analyze an ordered, non-empty series. The signal is stamped with the last bar's time.
    pub fn analyze(&self, symbol: &str, candles: &[Candle]) -> Result<SignalAnalysis, DataError> {
        let last = candles.last().ok_or_else(|| DataError::EmptySeries {
            symbol: symbol.to_string(),
        })?;
        let indicators = Indicators::compute(candles, &self.config);
        let signal = self.classify(symbol, &indicators, last.timestamp);
        Ok(SignalAnalysis { indicators, signal })
    }

    fn votes(&self, indicators: &Indicators) -> Vec<Vote> {
        let mut votes = Vec::new();
        let mut cast = |indicator: &'static str, a: f64, b: f64| {
            if a > b {
                votes.push(Vote { indicator, bullish: true });
            } else if a < b {
                votes.push(Vote { indicator, bullish: false });
            }
        };

        // 0.0 means the average is not computable yet.
        if indicators.sma_short > 0.0 && indicators.sma_medium > 0.0 {
            cast("sma_short_vs_medium", indicators.sma_short, indicators.sma_medium);
        }
        if indicators.sma_medium > 0.0 && indicators.sma_long > 0.0 {
            cast("sma_medium_vs_long", indicators.sma_medium, indicators.sma_long);
        }
        if let Some(macd) = indicators.macd {
            cast("macd", macd.macd, macd.signal);
        }

        if let Some(rsi) = indicators.rsi {
            if rsi < self.config.rsi_oversold {
                votes.push(Vote { indicator: "rsi", bullish: true });
            } else if rsi > self.config.rsi_overbought {
                votes.push(Vote { indicator: "rsi", bullish: false });
            }
        }
        if let Some(bands) = indicators.bollinger {
            if indicators.last_close < bands.lower {
                votes.push(Vote { indicator: "bollinger", bullish: true });
            } else if indicators.last_close > bands.upper {
                votes.push(Vote { indicator: "bollinger", bullish: false });
            }
        }

        votes
    }

    pub fn classify(
        &self,
        symbol: &str,
        indicators: &Indicators,
        timestamp: DateTime<Utc>,
    ) -> Option<MarketSignal> {
        let votes = self.votes(indicators);
        if votes.is_empty() {
            return None;
        }

        let bullish = votes.iter().filter(|v| v.bullish).count();
        let ratio = bullish as f64 / votes.len() as f64;

        let (kind, strength) = if ratio > self.config.bullish_ratio {
            (SignalKind::Bullish, ratio)
        } else if ratio < self.config.bearish_ratio {
            (SignalKind::Bearish, 1.0 - ratio)
        } else {
            (SignalKind::Neutral, 0.5)
        };

        let contributing_indicators = votes
            .iter()
            .filter(|v| match kind {
                SignalKind::Bullish => v.bullish,
                SignalKind::Bearish => !v.bullish,
                SignalKind::Neutral => true,
            })
            .map(|v| v.indicator.to_string())
            .collect();

        Some(MarketSignal {
            symbol: symbol.to_string(),
            kind,
            strength,
            contributing_indicators,
            timestamp,
        })
    }
}
