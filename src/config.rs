use crate::domain::entities::venue::VenueRoute;
use crate::domain::errors::EngineError;
use std::str::FromStr;

/// Hard limits enforced by the risk engine. Immutable for a session unless overridden.
#[derive(Debug, Clone, PartialEq)]
pub struct RiskLimits {
    /// Maximum notional of a single position, in quote currency.
    pub max_position_size: f64,
    pub max_leverage: f64,
    /// Maximum filled notional per UTC day.
    pub max_daily_volume: f64,
    /// Maximum portfolio drawdown as a fraction (0.25 = 25%).
    pub max_drawdown: f64,
    /// Maximum share of exposure concentrated in one asset.
    pub max_correlation: f64,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_position_size: 1_000.0,
            max_leverage: 20.0,
            max_daily_volume: 50_000.0,
            max_drawdown: 0.25,
            max_correlation: 0.7,
        }
    }
}

/// Indicator windows and vote thresholds for the market signal engine.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalConfig {
    pub sma_short: usize,
    pub sma_medium: usize,
    pub sma_long: usize,
    pub ema_fast: usize,
    pub ema_slow: usize,
    /// Smoothing window of the MACD signal line.
    pub macd_signal: usize,
    pub rsi_period: usize,
    pub rsi_oversold: f64,
    pub rsi_overbought: f64,
    pub bollinger_period: usize,
    pub bollinger_std_dev: f64,
    pub atr_period: usize,
    /// Bullish vote ratio above which the signal is bullish.
    pub bullish_ratio: f64,
    /// Bullish vote ratio below which the signal is bearish.
    pub bearish_ratio: f64,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            sma_short: 20,
            sma_medium: 50,
            sma_long: 200,
            ema_fast: 12,
            ema_slow: 26,
            macd_signal: 9,
            rsi_period: 14,
            rsi_oversold: 30.0,
            rsi_overbought: 70.0,
            bollinger_period: 20,
            bollinger_std_dev: 2.0,
            atr_period: 14,
            bullish_ratio: 0.6,
            bearish_ratio: 0.4,
        }
    }
}

/// Scoring weights, decision bands, sizing and routing thresholds.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluatorConfig {
    pub technical_weight: f64,
    pub research_weight: f64,
    pub risk_weight: f64,
    /// Opportunities at or below this confidence are not emitted.
    pub opportunity_threshold: f64,
    /// Above this confidence a decision goes through full risk validation.
    pub execute_threshold: f64,
    /// Above this (and up to `execute_threshold`) a decision is `monitor`.
    pub monitor_threshold: f64,
    /// Extra confidence needed to exit a position on an opposite signal.
    pub reversal_margin: f64,
    /// Fraction of balance committed per trade.
    pub risk_per_trade: f64,
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
    /// RSI above which orders route to the perpetual venue.
    pub routing_rsi_threshold: f64,
    /// Absolute fractional move that counts as "large".
    pub large_move_threshold: f64,
    /// Bars over which the recent price change is measured.
    pub price_change_lookback: usize,
    pub small_balance_threshold: f64,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            technical_weight: 0.4,
            research_weight: 0.4,
            risk_weight: 0.2,
            opportunity_threshold: 0.6,
            execute_threshold: 0.7,
            monitor_threshold: 0.5,
            reversal_margin: 0.1,
            risk_per_trade: 0.01,
            stop_loss_pct: 0.02,
            take_profit_pct: 0.03,
            routing_rsi_threshold: 70.0,
            large_move_threshold: 0.05,
            price_change_lookback: 24,
            small_balance_threshold: 1_000.0,
        }
    }
}

/// Venue per dispatcher role.
#[derive(Debug, Clone, PartialEq)]
pub struct VenueRoutes {
    pub perpetual: VenueRoute,
    pub fast: VenueRoute,
    pub low_fee: VenueRoute,
    pub high_volume: VenueRoute,
}

impl Default for VenueRoutes {
    fn default() -> Self {
        Self {
            perpetual: VenueRoute::new("hyperliquid", "hyperliquid"),
            fast: VenueRoute::new("solana", "jupiter"),
            low_fee: VenueRoute::new("base", "aerodrome"),
            high_volume: VenueRoute::new("ethereum", "uniswap"),
        }
    }
}

impl VenueRoutes {
    pub fn all(&self) -> [&VenueRoute; 4] {
        [&self.perpetual, &self.fast, &self.low_fee, &self.high_volume]
    }
}

#[derive(Debug, Clone)]
pub struct TradingConfig {
    pub symbols: Vec<String>,
    pub account_id: String,
    pub risk_limits: RiskLimits,
    pub signal: SignalConfig,
    pub evaluator: EvaluatorConfig,
    pub routes: VenueRoutes,

    pub tick_interval_seconds: u64,
    /// Fixed delay before the next tick after a failed one.
    pub tick_backoff_seconds: u64,
    /// Caller-side timeout for each external fetch.
    pub fetch_timeout_milliseconds: u64,

    pub ohlcv_timeframe: String,
    pub ohlcv_lookback: usize,
    pub market_data_base_url: String,
    /// Client-side cap on market-data REST calls.
    pub market_data_requests_per_minute: u32,
    /// Score returned by the static research source.
    pub research_score: f64,

    pub paper_initial_balance: f64,
    pub paper_fee_rate: f64,

    pub persistence_enabled: bool,
    pub database_url: String,
}

impl Default for TradingConfig {
    fn default() -> Self {
        TradingConfig {
            symbols: vec![
                "BTC-USD".to_string(),
                "ETH-USD".to_string(),
                "SOL-USD".to_string(),
            ],
            account_id: "paper".to_string(),
            risk_limits: RiskLimits::default(),
            signal: SignalConfig::default(),
            evaluator: EvaluatorConfig::default(),
            routes: VenueRoutes::default(),
            tick_interval_seconds: 60,
            tick_backoff_seconds: 60,
            fetch_timeout_milliseconds: 10_000,
            ohlcv_timeframe: "1h".to_string(),
            ohlcv_lookback: 250,
            market_data_base_url: "https://api.binance.com".to_string(),
            market_data_requests_per_minute: 600,
            research_score: 0.5,
            paper_initial_balance: 10_000.0,
            paper_fee_rate: 0.001,
            persistence_enabled: true,
            database_url: "sqlite://data/hedgepilot.db".to_string(),
        }
    }
}

/// Read and parse an environment variable, warning (and returning None) on parse failure.
fn parse_env<T: FromStr>(name: &str) -> Option<T>
where
    T::Err: std::fmt::Display,
{
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!("Failed to parse {} '{}': {}, using default", name, raw, e);
            None
        }
    }
}

fn env_in_range(name: &str, range: std::ops::RangeInclusive<f64>) -> Option<f64> {
    let value = parse_env::<f64>(name)?;
    if range.contains(&value) {
        Some(value)
    } else {
        tracing::warn!(
            "Invalid {} value: {} (must be between {} and {}), using default",
            name,
            value,
            range.start(),
            range.end()
        );
        None
    }
}

fn env_bool(name: &str) -> Option<bool> {
    std::env::var(name)
        .ok()
        .map(|v| v.to_lowercase() == "true" || v == "1")
}

impl TradingConfig {
    /// Load configuration from environment variables on top of the defaults.
    pub fn from_env() -> TradingConfig {
        let mut config = TradingConfig::default();

        if let Ok(pairs) = std::env::var("TRADING_PAIRS") {
            let symbols: Vec<String> = pairs
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(Self::normalize_symbol)
                .collect();
            if symbols.is_empty() {
                tracing::warn!("TRADING_PAIRS is empty, using default symbols");
            } else {
                config.symbols = symbols;
            }
        }

        if let Ok(account) = std::env::var("ACCOUNT_ID") {
            if !account.trim().is_empty() {
                config.account_id = account.trim().to_string();
            }
        }

        // Risk limits
        if let Some(v) = env_in_range("MAX_POSITION_SIZE", 1.0..=f64::MAX) {
            config.risk_limits.max_position_size = v;
        }
        if let Some(v) = env_in_range("MAX_LEVERAGE", 1.0..=100.0) {
            config.risk_limits.max_leverage = v;
        }
        if let Some(v) = env_in_range("MAX_DAILY_VOLUME", 1.0..=f64::MAX) {
            config.risk_limits.max_daily_volume = v;
        }
        if let Some(v) = env_in_range("MAX_DRAWDOWN", 0.01..=1.0) {
            config.risk_limits.max_drawdown = v;
        }
        if let Some(v) = env_in_range("MAX_CORRELATION", 0.01..=1.0) {
            config.risk_limits.max_correlation = v;
        }

        // Signal engine
        if let Some(v) = parse_env::<usize>("MACD_SIGNAL_PERIOD") {
            if (2..=50).contains(&v) {
                config.signal.macd_signal = v;
            }
        }
        if let Some(v) = parse_env::<usize>("RSI_PERIOD") {
            if (2..=100).contains(&v) {
                config.signal.rsi_period = v;
            }
        }

        // Evaluator
        if let Some(v) = env_in_range("OPPORTUNITY_THRESHOLD", 0.0..=1.0) {
            config.evaluator.opportunity_threshold = v;
        }
        if let Some(v) = env_in_range("EXECUTE_THRESHOLD", 0.0..=1.0) {
            config.evaluator.execute_threshold = v;
        }
        if let Some(v) = env_in_range("MONITOR_THRESHOLD", 0.0..=1.0) {
            config.evaluator.monitor_threshold = v;
        }
        if let Some(v) = env_in_range("REVERSAL_MARGIN", 0.0..=0.5) {
            config.evaluator.reversal_margin = v;
        }
        // Percentages are given in whole percent, like the original agent's RISK_PERCENTAGE.
        if let Some(v) = env_in_range("RISK_PERCENTAGE", 0.1..=10.0) {
            config.evaluator.risk_per_trade = v / 100.0;
        }
        if let Some(v) = env_in_range("STOP_LOSS_PERCENTAGE", 0.1..=50.0) {
            config.evaluator.stop_loss_pct = v / 100.0;
        }
        if let Some(v) = env_in_range("TAKE_PROFIT_PERCENTAGE", 0.1..=100.0) {
            config.evaluator.take_profit_pct = v / 100.0;
        }
        if let Some(v) = env_in_range("SMALL_BALANCE_THRESHOLD", 0.0..=f64::MAX) {
            config.evaluator.small_balance_threshold = v;
        }

        // Venue routes, as chain:venue
        for (name, slot) in [
            ("ROUTE_PERPETUAL", &mut config.routes.perpetual),
            ("ROUTE_FAST", &mut config.routes.fast),
            ("ROUTE_LOW_FEE", &mut config.routes.low_fee),
            ("ROUTE_HIGH_VOLUME", &mut config.routes.high_volume),
        ] {
            if let Ok(raw) = std::env::var(name) {
                match VenueRoute::parse(&raw) {
                    Some(route) => *slot = route,
                    None => tracing::warn!(
                        "Invalid {} '{}' (expected chain:venue), using default {}",
                        name,
                        raw,
                        slot
                    ),
                }
            }
        }

        // Loop timing
        if let Some(v) = parse_env::<u64>("TICK_INTERVAL_SECONDS") {
            if (1..=86_400).contains(&v) {
                config.tick_interval_seconds = v;
            }
        }
        if let Some(v) = parse_env::<u64>("TICK_BACKOFF_SECONDS") {
            if (1..=3_600).contains(&v) {
                config.tick_backoff_seconds = v;
            }
        }
        if let Some(v) = parse_env::<u64>("FETCH_TIMEOUT_MILLISECONDS") {
            if (100..=120_000).contains(&v) {
                config.fetch_timeout_milliseconds = v;
            }
        }

        // Data
        if let Ok(timeframe) = std::env::var("OHLCV_TIMEFRAME") {
            config.ohlcv_timeframe = timeframe;
        }
        if let Some(v) = parse_env::<usize>("OHLCV_LOOKBACK") {
            if (1..=1_000).contains(&v) {
                config.ohlcv_lookback = v;
            }
        }
        if let Ok(url) = std::env::var("MARKET_DATA_BASE_URL") {
            config.market_data_base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(v) = parse_env::<u32>("MARKET_DATA_REQUESTS_PER_MINUTE") {
            if (1..=6_000).contains(&v) {
                config.market_data_requests_per_minute = v;
            }
        }
        if let Some(v) = env_in_range("RESEARCH_SCORE", 0.0..=1.0) {
            config.research_score = v;
        }

        // Paper account
        if let Some(v) = env_in_range("PAPER_INITIAL_BALANCE", 0.0..=f64::MAX) {
            config.paper_initial_balance = v;
        }
        if let Some(v) = env_in_range("PAPER_FEE_RATE", 0.0..=0.05) {
            config.paper_fee_rate = v;
        }

        // Persistence
        if let Some(enabled) = env_bool("PERSISTENCE_ENABLED") {
            config.persistence_enabled = enabled;
        }
        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.database_url = url;
        }

        config
    }

    /// Reject combinations that would make the evaluator or risk engine meaningless.
    pub fn validate(&self) -> Result<(), EngineError> {
        let invalid = |msg: String| Err(EngineError::InvalidConfiguration(msg));

        if self.symbols.is_empty() {
            return invalid("no trading symbols configured".to_string());
        }
        let e = &self.evaluator;
        let weight_sum = e.technical_weight + e.research_weight + e.risk_weight;
        if (weight_sum - 1.0).abs() > 1e-9 {
            return invalid(format!("score weights must sum to 1.0, got {}", weight_sum));
        }
        if !(e.monitor_threshold <= e.execute_threshold) {
            return invalid(format!(
                "monitor threshold {} must not exceed execute threshold {}",
                e.monitor_threshold, e.execute_threshold
            ));
        }
        if self.risk_limits.max_leverage < 1.0 {
            return invalid(format!(
                "max leverage must be >= 1, got {}",
                self.risk_limits.max_leverage
            ));
        }
        if self.risk_limits.max_drawdown <= 0.0 {
            return invalid("max drawdown must be positive".to_string());
        }
        let s = &self.signal;
        if s.ema_fast >= s.ema_slow {
            return invalid(format!(
                "MACD fast period {} must be shorter than slow period {}",
                s.ema_fast, s.ema_slow
            ));
        }
        if !(s.bearish_ratio < s.bullish_ratio) {
            return invalid("bearish vote ratio must be below bullish ratio".to_string());
        }
        Ok(())
    }

    /// Normalize symbol to the standard `BASE-USD` format.
    pub fn normalize_symbol(symbol: &str) -> String {
        let upper = symbol.trim().to_uppercase();
        if let Some(base) = upper.strip_suffix("USDT") {
            let base = base.trim_end_matches(['-', '/']);
            format!("{}-USD", base)
        } else if upper.contains('/') {
            upper.replace('/', "-")
        } else if !upper.contains('-') {
            format!("{}-USD", upper)
        } else {
            upper
        }
    }

    /// Base asset of a normalized symbol (`BTC-USD` → `BTC`).
    pub fn base_asset(symbol: &str) -> &str {
        symbol.split('-').next().unwrap_or(symbol)
    }
}
