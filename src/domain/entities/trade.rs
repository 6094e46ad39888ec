use crate::domain::entities::position::{PositionKey, PositionSide};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Buy => "buy",
            TradeSide::Sell => "sell",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "buy" => Some(TradeSide::Buy),
            "sell" => Some(TradeSide::Sell),
            _ => None,
        }
    }

    /// Side of the fill that opens a position.
    pub fn opening(side: PositionSide) -> Self {
        match side {
            PositionSide::Long => TradeSide::Buy,
            PositionSide::Short => TradeSide::Sell,
        }
    }

    /// Side of the fill that flattens a position.
    pub fn closing(side: PositionSide) -> Self {
        match side {
            PositionSide::Long => TradeSide::Sell,
            PositionSide::Short => TradeSide::Buy,
        }
    }
}

impl std::fmt::Display for TradeSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradeSide::Buy => write!(f, "BUY"),
            TradeSide::Sell => write!(f, "SELL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeStatus {
    Pending,
    Filled,
    Cancelled,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Pending => "pending",
            TradeStatus::Filled => "filled",
            TradeStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "pending" => Some(TradeStatus::Pending),
            "filled" => Some(TradeStatus::Filled),
            "cancelled" => Some(TradeStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TradeStatus::Pending)
    }
}

/// Immutable fill record. Only a `Pending` trade may later be settled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: String,
    pub symbol: String,
    pub chain: String,
    pub venue: String,
    pub side: TradeSide,
    pub size: f64,
    pub price: f64,
    pub fee: f64,
    pub timestamp: DateTime<Utc>,
    pub status: TradeStatus,
}

impl Trade {
    pub fn filled(
        id: String,
        key: &PositionKey,
        side: TradeSide,
        size: f64,
        price: f64,
        fee: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Trade {
            id,
            symbol: key.symbol.clone(),
            chain: key.chain.clone(),
            venue: key.venue.clone(),
            side,
            size,
            price,
            fee,
            timestamp,
            status: TradeStatus::Filled,
        }
    }

    pub fn notional(&self) -> f64 {
        self.size * self.price
    }
}
