//! Database Models
//!
//! Row types for the journal tables and their conversions to domain types.

use super::DatabaseError;
use crate::domain::entities::decision::{DecisionAction, DecisionLogEntry, ExecutionOutcome};
use crate::domain::entities::position::{Position, PositionSide};
use crate::domain::entities::trade::{Trade, TradeSide, TradeStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Decision log record in database
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DecisionLogRecord {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub asset: String,
    pub decision: String, // "execute", "monitor" or "skip"
    pub confidence: f64,
    pub reasoning: String,
    pub outcome: String, // JSON
}

impl TryFrom<DecisionLogRecord> for DecisionLogEntry {
    type Error = DatabaseError;

    fn try_from(record: DecisionLogRecord) -> Result<Self, Self::Error> {
        let decision = match record.decision.as_str() {
            "execute" => DecisionAction::Execute,
            "monitor" => DecisionAction::Monitor,
            "skip" => DecisionAction::Skip,
            "protect" => DecisionAction::Protect,
            other => {
                return Err(DatabaseError::CorruptRecord(format!(
                    "decision {} has unknown action '{}'",
                    record.id, other
                )))
            }
        };
        let outcome: ExecutionOutcome = serde_json::from_str(&record.outcome).map_err(|e| {
            DatabaseError::CorruptRecord(format!("decision {} outcome: {}", record.id, e))
        })?;

        Ok(DecisionLogEntry {
            timestamp: record.timestamp,
            asset: record.asset,
            decision,
            confidence: record.confidence,
            reasoning: record.reasoning,
            outcome,
        })
    }
}

/// Trade record in database
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TradeRecord {
    pub id: String,
    pub symbol: String,
    pub chain: String,
    pub venue: String,
    pub side: String, // "buy" or "sell"
    pub size: f64,
    pub price: f64,
    pub fee: f64,
    pub timestamp: DateTime<Utc>,
    pub status: String, // "pending", "filled" or "cancelled"
}

impl TryFrom<TradeRecord> for Trade {
    type Error = DatabaseError;

    fn try_from(record: TradeRecord) -> Result<Self, Self::Error> {
        let side = TradeSide::parse(&record.side).ok_or_else(|| {
            DatabaseError::CorruptRecord(format!("trade {} side '{}'", record.id, record.side))
        })?;
        let status = TradeStatus::parse(&record.status).ok_or_else(|| {
            DatabaseError::CorruptRecord(format!("trade {} status '{}'", record.id, record.status))
        })?;

        Ok(Trade {
            id: record.id,
            symbol: record.symbol,
            chain: record.chain,
            venue: record.venue,
            side,
            size: record.size,
            price: record.price,
            fee: record.fee,
            timestamp: record.timestamp,
            status,
        })
    }
}

/// Position at the last ledger checkpoint
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LedgerPositionRecord {
    pub account_id: String,
    pub symbol: String,
    pub chain: String,
    pub venue: String,
    pub side: String, // "long" or "short"
    pub size: f64,
    pub entry_price: f64,
    pub current_price: f64,
    pub leverage: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub opened_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<LedgerPositionRecord> for Position {
    type Error = DatabaseError;

    fn try_from(record: LedgerPositionRecord) -> Result<Self, Self::Error> {
        let side = PositionSide::parse(&record.side).ok_or_else(|| {
            DatabaseError::CorruptRecord(format!(
                "position {} side '{}'",
                record.symbol, record.side
            ))
        })?;

        let mut position = Position {
            symbol: record.symbol,
            chain: record.chain,
            venue: record.venue,
            side,
            size: record.size,
            entry_price: record.entry_price,
            current_price: record.current_price,
            leverage: record.leverage,
            stop_loss: record.stop_loss,
            take_profit: record.take_profit,
            pnl: 0.0,
            pnl_percent: 0.0,
            opened_at: record.opened_at,
            updated_at: record.updated_at,
        };
        position.recompute_pnl();
        Ok(position)
    }
}

/// Ledger balance at the last checkpoint
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LedgerStateRecord {
    pub account_id: String,
    pub balance: f64,
    pub updated_at: DateTime<Utc>,
}
