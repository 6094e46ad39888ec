//! Opportunities, decisions and the decision log.
//!
//! All of these are recomputed every tick; only [`DecisionLogEntry`] is meant to outlive it.

use crate::domain::entities::position::{PositionKey, PositionSide};
use crate::domain::entities::venue::{VenueRole, VenueRoute};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSignal {
    Buy,
    Sell,
    Hold,
}

impl TradeSignal {
    /// Side of the position this signal would open. `Hold` opens nothing.
    pub fn position_side(&self) -> Option<PositionSide> {
        match self {
            TradeSignal::Buy => Some(PositionSide::Long),
            TradeSignal::Sell => Some(PositionSide::Short),
            TradeSignal::Hold => None,
        }
    }
}

/// A scored, not-yet-committed proposal for one asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingOpportunity {
    pub symbol: String,
    pub route: VenueRoute,
    pub route_role: VenueRole,
    pub signal: TradeSignal,
    pub confidence: f64,
    pub technical_score: f64,
    pub research_score: f64,
    pub risk_score: f64,
    pub estimated_profit: f64,
    pub estimated_loss: f64,
    /// Quote-currency notional.
    pub recommended_size: f64,
    pub recommended_leverage: f64,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub reasoning: String,
    pub timestamp: DateTime<Utc>,
}

impl TradingOpportunity {
    pub fn position_key(&self) -> PositionKey {
        PositionKey::new(&self.symbol, &self.route.chain, &self.route.venue)
    }

    /// Order size in base units implied by the recommended notional.
    pub fn base_size(&self) -> f64 {
        if self.entry_price > 0.0 {
            self.recommended_size / self.entry_price
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionAction {
    Execute,
    Skip,
    Monitor,
    /// Exit forced by a stop, a target or the risk responder. Never opens a position.
    Protect,
}

impl DecisionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionAction::Execute => "execute",
            DecisionAction::Skip => "skip",
            DecisionAction::Monitor => "monitor",
            DecisionAction::Protect => "protect",
        }
    }
}

/// Whether an executed decision opens a new position or exits the one already held.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionIntent {
    Open,
    Close,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingDecision {
    pub opportunity: TradingOpportunity,
    pub action: DecisionAction,
    pub intent: DecisionIntent,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

impl TradingDecision {
    pub fn is_execute(&self) -> bool {
        self.action == DecisionAction::Execute
    }
}

/// What happened after a decision was taken.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    NotAttempted,
    Filled {
        order_id: String,
        fill_price: f64,
        fee: f64,
    },
    Closed {
        fill_price: f64,
        pnl: f64,
    },
    Failed {
        error: String,
    },
}

/// Append-only record of one decision, suitable for persistence and read-only status APIs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionLogEntry {
    pub timestamp: DateTime<Utc>,
    pub asset: String,
    pub decision: DecisionAction,
    pub confidence: f64,
    pub reasoning: String,
    pub outcome: ExecutionOutcome,
}

impl DecisionLogEntry {
    pub fn from_decision(decision: &TradingDecision, outcome: ExecutionOutcome) -> Self {
        Self {
            timestamp: decision.timestamp,
            asset: decision.opportunity.symbol.clone(),
            decision: decision.action,
            confidence: decision.opportunity.confidence,
            reasoning: format!("{} | {}", decision.reason, decision.opportunity.reasoning),
            outcome,
        }
    }
}
