use crate::config::SignalConfig;
use crate::domain::errors::ValidationError;
use crate::domain::value_objects::price::Price;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One OHLCV bar. Series are ordered oldest first.
#[derive(Debug, Clone, PartialEq)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: Price,
    pub high: Price,
    pub low: Price,
    pub close: Price,
    pub volume: f64,
}

impl Candle {
    pub fn new(
        timestamp: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Result<Self, ValidationError> {
        if high < low {
            return Err(ValidationError::InvalidCandle(format!(
                "high {} below low {}",
                high, low
            )));
        }
        if !volume.is_finite() || volume < 0.0 {
            return Err(ValidationError::InvalidCandle(format!(
                "volume must be finite and non-negative, got {}",
                volume
            )));
        }
        Ok(Candle {
            timestamp,
            open: Price::new(open)?,
            high: Price::new(high)?,
            low: Price::new(low)?,
            close: Price::new(close)?,
            volume,
        })
    }
}

fn closes(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(|c| c.close.value()).collect()
}

/// A series indicator. The last element of `calculate` belongs to the last candle;
/// an empty series means "not computable yet".
pub trait Indicator {
    fn calculate(&self, candles: &[Candle]) -> Vec<f64>;

    fn latest(&self, candles: &[Candle]) -> Option<f64> {
        self.calculate(candles).last().copied()
    }
}

pub struct SMA {
    pub period: usize,
}

impl SMA {
    pub fn new(period: usize) -> Self {
        SMA { period }
    }

    pub fn calculate_on_values(&self, values: &[f64]) -> Vec<f64> {
        if self.period == 0 || values.len() < self.period {
            return vec![];
        }
        values
            .windows(self.period)
            .map(|w| w.iter().sum::<f64>() / self.period as f64)
            .collect()
    }
}

impl Indicator for SMA {
    fn calculate(&self, candles: &[Candle]) -> Vec<f64> {
        self.calculate_on_values(&closes(candles))
    }
}

pub struct EMA {
    pub period: usize,
}

impl EMA {
    pub fn new(period: usize) -> Self {
        EMA { period }
    }

    /// Seeded with the SMA of the first `period` values, then `v*k + ema*(1-k)`.
    pub fn calculate_on_values(&self, values: &[f64]) -> Vec<f64> {
        if self.period == 0 || values.len() < self.period {
            return vec![];
        }
        let k = 2.0 / (self.period as f64 + 1.0);
        let mut ema = values[..self.period].iter().sum::<f64>() / self.period as f64;
        let mut ema_values = Vec::with_capacity(values.len() - self.period + 1);
        ema_values.push(ema);

        for &value in &values[self.period..] {
            ema = value * k + ema * (1.0 - k);
            ema_values.push(ema);
        }

        ema_values
    }
}

impl Indicator for EMA {
    fn calculate(&self, candles: &[Candle]) -> Vec<f64> {
        self.calculate_on_values(&closes(candles))
    }
}

pub struct RSI {
    pub period: usize,
}

impl RSI {
    pub fn new(period: usize) -> Self {
        RSI { period }
    }
}

impl Indicator for RSI {
    fn calculate(&self, candles: &[Candle]) -> Vec<f64> {
        if self.period == 0 || candles.len() < self.period + 1 {
            return vec![];
        }
        let mut gains = Vec::with_capacity(candles.len() - 1);
        let mut losses = Vec::with_capacity(candles.len() - 1);

        for pair in candles.windows(2) {
            let change = pair[1].close.value() - pair[0].close.value();
            if change > 0.0 {
                gains.push(change);
                losses.push(0.0);
            } else {
                gains.push(0.0);
                losses.push(-change);
            }
        }

        gains
            .windows(self.period)
            .zip(losses.windows(self.period))
            .map(|(g, l)| {
                let avg_gain = g.iter().sum::<f64>() / self.period as f64;
                let avg_loss = l.iter().sum::<f64>() / self.period as f64;
                if avg_loss == 0.0 {
                    100.0
                } else {
                    100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
                }
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BollingerBandsValues {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

pub struct BollingerBands {
    pub period: usize,
    pub std_dev: f64,
}

impl BollingerBands {
    pub fn new(period: usize, std_dev: f64) -> Self {
        BollingerBands { period, std_dev }
    }

    /// Bands per window, using the population standard deviation.
    pub fn calculate_detailed(&self, candles: &[Candle]) -> Vec<BollingerBandsValues> {
        if self.period == 0 || candles.len() < self.period {
            return vec![];
        }
        closes(candles)
            .windows(self.period)
            .map(|window| {
                let sma = window.iter().sum::<f64>() / self.period as f64;
                let variance = window.iter().map(|c| (c - sma).powi(2)).sum::<f64>()
                    / self.period as f64;
                let band = self.std_dev * variance.sqrt();
                BollingerBandsValues {
                    upper: sma + band,
                    middle: sma,
                    lower: sma - band,
                }
            })
            .collect()
    }
}

impl Indicator for BollingerBands {
    /// Middle band series.
    fn calculate(&self, candles: &[Candle]) -> Vec<f64> {
        self.calculate_detailed(candles)
            .into_iter()
            .map(|b| b.middle)
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MacdValues {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

pub struct MACD {
    pub fast_period: usize,
    pub slow_period: usize,
    pub signal_period: usize,
}

impl MACD {
    pub fn new(fast_period: usize, slow_period: usize, signal_period: usize) -> Self {
        MACD {
            fast_period,
            slow_period,
            signal_period,
        }
    }

    /// MACD line: fast EMA minus slow EMA, aligned on the candle each value belongs to.
    pub fn macd_line(&self, candles: &[Candle]) -> Vec<f64> {
        if self.fast_period >= self.slow_period {
            return vec![];
        }
        let values = closes(candles);
        let fast = EMA::new(self.fast_period).calculate_on_values(&values);
        let slow = EMA::new(self.slow_period).calculate_on_values(&values);
        let offset = self.slow_period - self.fast_period;

        slow.iter()
            .enumerate()
            .filter_map(|(i, s)| fast.get(i + offset).map(|f| f - s))
            .collect()
    }

    /// Latest MACD, signal and histogram; `None` until the signal line is computable.
    pub fn calculate_detailed(&self, candles: &[Candle]) -> Option<MacdValues> {
        let line = self.macd_line(candles);
        let signal = EMA::new(self.signal_period).calculate_on_values(&line);
        let macd = *line.last()?;
        let signal = *signal.last()?;
        Some(MacdValues {
            macd,
            signal,
            histogram: macd - signal,
        })
    }
}

impl Indicator for MACD {
    /// Signal line series.
    fn calculate(&self, candles: &[Candle]) -> Vec<f64> {
        EMA::new(self.signal_period).calculate_on_values(&self.macd_line(candles))
    }
}

pub struct ATR {
    pub period: usize,
}

impl ATR {
    pub fn new(period: usize) -> Self {
        ATR { period }
    }
}

impl Indicator for ATR {
    fn calculate(&self, candles: &[Candle]) -> Vec<f64> {
        if self.period == 0 || candles.len() < self.period + 1 {
            return vec![];
        }
        let true_ranges: Vec<f64> = candles
            .windows(2)
            .map(|pair| {
                let prev_close = pair[0].close.value();
                let high = pair[1].high.value();
                let low = pair[1].low.value();
                (high - low)
                    .max((high - prev_close).abs())
                    .max((low - prev_close).abs())
            })
            .collect();

        SMA::new(self.period).calculate_on_values(&true_ranges)
    }
}

/// Fractional close-to-close change over the last `lookback` bars (clamped to the series).
pub fn price_change(candles: &[Candle], lookback: usize) -> f64 {
    let (Some(last), true) = (candles.last(), candles.len() > 1) else {
        return 0.0;
    };
    let start = candles.len().saturating_sub(lookback + 1);
    candles[start].close.change_to(last.close)
}

/// Latest value of every indicator the signal engine votes on.
///
/// Moving averages and ATR read 0.0 while not computable; RSI, MACD and
/// Bollinger are `None` so they never vote on a short series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Indicators {
    pub sma_short: f64,
    pub sma_medium: f64,
    pub sma_long: f64,
    pub ema_fast: f64,
    pub ema_slow: f64,
    pub rsi: Option<f64>,
    pub macd: Option<MacdValues>,
    pub bollinger: Option<BollingerBandsValues>,
    pub atr: f64,
    pub last_close: f64,
}

impl Indicators {
    pub fn compute(candles: &[Candle], config: &SignalConfig) -> Self {
        Indicators {
            sma_short: SMA::new(config.sma_short).latest(candles).unwrap_or(0.0),
            sma_medium: SMA::new(config.sma_medium).latest(candles).unwrap_or(0.0),
            sma_long: SMA::new(config.sma_long).latest(candles).unwrap_or(0.0),
            ema_fast: EMA::new(config.ema_fast).latest(candles).unwrap_or(0.0),
            ema_slow: EMA::new(config.ema_slow).latest(candles).unwrap_or(0.0),
            rsi: RSI::new(config.rsi_period).latest(candles),
            macd: MACD::new(config.ema_fast, config.ema_slow, config.macd_signal)
                .calculate_detailed(candles),
            bollinger: BollingerBands::new(config.bollinger_period, config.bollinger_std_dev)
                .calculate_detailed(candles)
                .last()
                .copied(),
            atr: ATR::new(config.atr_period).latest(candles).unwrap_or(0.0),
            last_close: candles.last().map(|c| c.close.value()).unwrap_or(0.0),
        }
    }
}

#[cfg(test)]
pub(crate) fn candles_from_closes(closes: &[f64]) -> Vec<Candle> {
    let start = DateTime::from_timestamp(1_700_000_000, 0).unwrap_or_default();
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| {
            Candle::new(
                start + chrono::Duration::hours(i as i64),
                close,
                close * 1.01,
                close * 0.99,
                close,
                1000.0,
            )
            .unwrap()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rising(n: usize) -> Vec<Candle> {
        candles_from_closes(&(0..n).map(|i| 100.0 + i as f64).collect::<Vec<_>>())
    }

    fn falling(n: usize) -> Vec<Candle> {
        candles_from_closes(&(0..n).map(|i| 200.0 - i as f64).collect::<Vec<_>>())
    }

    #[test]
    fn test_candle_rejects_inverted_range() {
        let result = Candle::new(Utc::now(), 100.0, 90.0, 95.0, 92.0, 10.0);
        assert!(matches!(result, Err(ValidationError::InvalidCandle(_))));
    }

    #[test]
    fn test_sma_not_computable_with_short_series() {
        assert!(SMA::new(20).calculate(&rising(19)).is_empty());
        assert_eq!(SMA::new(3).latest(&candles_from_closes(&[1.0, 2.0, 3.0, 4.0])), Some(3.0));
    }

    #[test]
    fn test_ema_seeded_with_sma() {
        let candles = candles_from_closes(&[2.0, 4.0, 6.0, 8.0]);
        let values = EMA::new(3).calculate(&candles);
        // seed = 4.0, k = 0.5 -> 8*0.5 + 4*0.5
        assert_eq!(values, vec![4.0, 6.0]);
        assert!(EMA::new(5).calculate(&candles).is_empty());
    }

    #[test]
    fn test_rsi_zero_loss_is_100() {
        assert_eq!(RSI::new(14).latest(&rising(15)), Some(100.0));
    }

    #[test]
    fn test_rsi_strictly_decreasing_is_0() {
        assert_eq!(RSI::new(14).latest(&falling(30)), Some(0.0));
    }

    #[test]
    fn test_rsi_needs_period_plus_one_bars() {
        assert_eq!(RSI::new(14).latest(&rising(14)), None);
    }

    #[test]
    fn test_rsi_balanced_moves_is_50() {
        let closes: Vec<f64> = (0..15).map(|i| if i % 2 == 0 { 100.0 } else { 101.0 }).collect();
        let rsi = RSI::new(14).latest(&candles_from_closes(&closes)).unwrap();
        assert!((rsi - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_bollinger_population_std() {
        let candles = candles_from_closes(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        let bands = BollingerBands::new(8, 2.0).calculate_detailed(&candles);
        assert_eq!(bands.len(), 1);
        assert_eq!(bands[0].middle, 5.0);
        assert_eq!(bands[0].upper, 9.0);
        assert_eq!(bands[0].lower, 1.0);
    }

    #[test]
    fn test_macd_requires_signal_history() {
        let macd = MACD::new(12, 26, 9);
        assert!(macd.calculate_detailed(&rising(33)).is_none());
        let values = macd.calculate_detailed(&rising(34)).unwrap();
        assert!(values.macd > 0.0);
        assert!((values.histogram - (values.macd - values.signal)).abs() < 1e-12);
    }

    #[test]
    fn test_macd_line_is_aligned() {
        let candles = rising(40);
        let line = MACD::new(12, 26, 9).macd_line(&candles);
        assert_eq!(line.len(), 40 - 26 + 1);
        let fast = EMA::new(12).latest(&candles).unwrap();
        let slow = EMA::new(26).latest(&candles).unwrap();
        assert!((line.last().unwrap() - (fast - slow)).abs() < 1e-12);
    }

    #[test]
    fn test_atr_constant_range() {
        let candles = candles_from_closes(&[100.0; 20]);
        let atr = ATR::new(14).latest(&candles).unwrap();
        assert!((atr - 2.0).abs() < 1e-9);
        assert!(ATR::new(14).latest(&candles[..14]).is_none());
    }

    #[test]
    fn test_price_change() {
        let candles = candles_from_closes(&[100.0, 102.0, 110.0]);
        assert!((price_change(&candles, 2) - 0.10).abs() < 1e-12);
        assert!((price_change(&candles, 50) - 0.10).abs() < 1e-12);
        assert_eq!(price_change(&candles[..1], 5), 0.0);
    }

    #[test]
    fn test_snapshot_short_series() {
        let indicators = Indicators::compute(&rising(10), &SignalConfig::default());
        assert_eq!(indicators.sma_short, 0.0);
        assert_eq!(indicators.ema_fast, 0.0);
        assert!(indicators.rsi.is_none());
        assert!(indicators.macd.is_none());
        assert!(indicators.bollinger.is_none());
        assert_eq!(indicators.atr, 0.0);
        assert_eq!(indicators.last_close, 109.0);
    }
}
