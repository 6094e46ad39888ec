use crate::domain::errors::LedgerError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionSide::Long => "long",
            PositionSide::Short => "short",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "long" => Some(PositionSide::Long),
            "short" => Some(PositionSide::Short),
            _ => None,
        }
    }
}

impl std::fmt::Display for PositionSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PositionSide::Long => write!(f, "LONG"),
            PositionSide::Short => write!(f, "SHORT"),
        }
    }
}

/// Ledger key: one open position per (symbol, chain, venue).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PositionKey {
    pub symbol: String,
    pub chain: String,
    pub venue: String,
}

impl PositionKey {
    pub fn new(symbol: &str, chain: &str, venue: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            chain: chain.to_string(),
            venue: venue.to_string(),
        }
    }

    /// Key used by price maps handed to the ledger: `symbol-chain`.
    pub fn price_key(&self) -> String {
        price_key(&self.symbol, &self.chain)
    }
}

impl std::fmt::Display for PositionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}:{}", self.symbol, self.chain, self.venue)
    }
}

pub fn price_key(symbol: &str, chain: &str) -> String {
    format!("{}-{}", symbol, chain)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub chain: String,
    pub venue: String,
    pub side: PositionSide,
    pub size: f64,
    pub entry_price: f64,
    pub current_price: f64,
    pub leverage: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub pnl: f64,
    pub pnl_percent: f64,
    pub opened_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Position {
    /// Build a freshly opened position. `size` is in base units.
    pub fn open(
        key: &PositionKey,
        side: PositionSide,
        size: f64,
        entry_price: f64,
        leverage: f64,
        opened_at: DateTime<Utc>,
    ) -> Result<Self, LedgerError> {
        let position = Position {
            symbol: key.symbol.clone(),
            chain: key.chain.clone(),
            venue: key.venue.clone(),
            side,
            size,
            entry_price,
            current_price: entry_price,
            leverage,
            stop_loss: None,
            take_profit: None,
            pnl: 0.0,
            pnl_percent: 0.0,
            opened_at,
            updated_at: opened_at,
        };
        position.validate()?;
        Ok(position)
    }

    pub fn with_stops(mut self, stop_loss: Option<f64>, take_profit: Option<f64>) -> Self {
        self.stop_loss = stop_loss;
        self.take_profit = take_profit;
        self
    }

    pub fn key(&self) -> PositionKey {
        PositionKey::new(&self.symbol, &self.chain, &self.venue)
    }

    pub fn validate(&self) -> Result<(), LedgerError> {
        let invalid = |reason: String| LedgerError::InvalidPosition {
            key: self.key().to_string(),
            reason,
        };

        if !(self.size.is_finite() && self.size > 0.0) {
            return Err(invalid(format!("size must be > 0, got {}", self.size)));
        }
        if !(self.leverage.is_finite() && self.leverage >= 1.0) {
            return Err(invalid(format!(
                "leverage must be >= 1, got {}",
                self.leverage
            )));
        }
        if !(self.entry_price.is_finite() && self.entry_price > 0.0) {
            return Err(invalid(format!(
                "entry price must be > 0, got {}",
                self.entry_price
            )));
        }
        Ok(())
    }

    /// Mark-to-market notional.
    pub fn notional(&self) -> f64 {
        self.size * self.current_price
    }

    pub fn entry_notional(&self) -> f64 {
        self.size * self.entry_price
    }

    pub fn required_margin(&self) -> f64 {
        self.entry_notional() / self.leverage
    }

    /// Apply a new mark price and recompute pnl / pnl_percent.
    pub fn mark(&mut self, price: f64, at: DateTime<Utc>) {
        self.current_price = price;
        self.updated_at = at;
        self.recompute_pnl();
    }

    pub fn recompute_pnl(&mut self) {
        let diff = match self.side {
            PositionSide::Long => self.current_price - self.entry_price,
            PositionSide::Short => self.entry_price - self.current_price,
        };
        self.pnl = diff * self.size;
        let basis = self.entry_notional();
        self.pnl_percent = if basis > 0.0 {
            self.pnl / basis * 100.0
        } else {
            0.0
        };
    }

    pub fn should_stop_loss(&self) -> bool {
        match (self.side, self.stop_loss) {
            (PositionSide::Long, Some(stop)) => self.current_price <= stop,
            (PositionSide::Short, Some(stop)) => self.current_price >= stop,
            _ => false,
        }
    }

    pub fn should_take_profit(&self) -> bool {
        match (self.side, self.take_profit) {
            (PositionSide::Long, Some(target)) => self.current_price >= target,
            (PositionSide::Short, Some(target)) => self.current_price <= target,
            _ => false,
        }
    }
}
