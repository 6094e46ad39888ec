//! Rebalancer / risk responder
//!
//! State machine: Normal -> Warned -> CriticalResponse -> Halted.
//! Emergencies jump straight to CriticalResponse. Halted only leaves through
//! [`Rebalancer::clear_halt`].

use crate::config::RiskLimits;
use crate::domain::entities::position::{Position, PositionKey};
use crate::domain::services::portfolio_ledger::PortfolioLedger;
use crate::domain::services::risk_engine::{AlertSeverity, RiskAssessment};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

/// Margin ratio below which the responder treats the account as in emergency.
pub const EMERGENCY_MARGIN_RATIO: f64 = 0.10;
/// Multiple of the leverage limit that counts as an emergency.
pub const EMERGENCY_LEVERAGE_MULTIPLE: f64 = 1.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RebalancerState {
    Normal,
    Warned,
    CriticalResponse,
    Halted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    ReduceLeverage,
    ClosePosition,
    Liquidate,
    StopTrading,
    /// Advisory only: move exposure off a concentrated venue, chain or asset.
    Reallocate,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::ReduceLeverage => "reduce_leverage",
            ActionKind::ClosePosition => "close_position",
            ActionKind::Liquidate => "liquidate",
            ActionKind::StopTrading => "stop_trading",
            ActionKind::Reallocate => "reallocate",
        }
    }

    /// Whether carrying out the action means flattening `target` on its venue.
    pub fn closes_position(&self) -> bool {
        matches!(self, ActionKind::ClosePosition | ActionKind::Liquidate)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebalanceAction {
    pub kind: ActionKind,
    pub target: Option<PositionKey>,
    pub reason: String,
    /// Notional affected by the action, for audit only.
    pub estimated_impact: f64,
}

impl RebalanceAction {
    fn on(kind: ActionKind, position: &Position, reason: String) -> Self {
        Self {
            kind,
            target: Some(position.key()),
            reason,
            estimated_impact: position.notional(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Rebalancer {
    limits: RiskLimits,
    state: RebalancerState,
    halt_reason: Option<String>,
}

impl Rebalancer {
    pub fn new(limits: RiskLimits) -> Self {
        Self {
            limits,
            state: RebalancerState::Normal,
            halt_reason: None,
        }
    }

    pub fn state(&self) -> RebalancerState {
        self.state
    }

    pub fn is_halted(&self) -> bool {
        self.state == RebalancerState::Halted
    }

    pub fn halt_reason(&self) -> Option<&str> {
        self.halt_reason.as_deref()
    }

    /// Operator override: leave Halted and start over from Normal.
    pub fn clear_halt(&mut self) {
        if self.is_halted() {
            info!(
                "Halt cleared by operator (was: {})",
                self.halt_reason.as_deref().unwrap_or("unknown")
            );
        }
        self.state = RebalancerState::Normal;
        self.halt_reason = None;
    }

    fn is_emergency(&self, assessment: &RiskAssessment) -> bool {
        let m = &assessment.metrics;
        m.margin_ratio < EMERGENCY_MARGIN_RATIO
            || m.portfolio_drawdown > self.limits.max_drawdown
            || m.average_leverage > self.limits.max_leverage * EMERGENCY_LEVERAGE_MULTIPLE
    }

    /// Advance the state machine for this tick's assessment and return the corrective actions.
    pub fn respond(
        &mut self,
        assessment: &RiskAssessment,
        ledger: &PortfolioLedger,
    ) -> Vec<RebalanceAction> {
        if self.is_halted() {
            return Vec::new();
        }

        if self.is_emergency(assessment) || assessment.has_critical() {
            self.state = RebalancerState::CriticalResponse;
            let actions = self.critical_actions(assessment, ledger);

            if assessment.should_stop_trading {
                let reason = assessment
                    .alerts
                    .iter()
                    .find(|a| a.is_critical())
                    .map(|a| a.message.clone())
                    .unwrap_or_else(|| "risk limits breached".to_string());
                error!("Risk responder halting trading: {}", reason);
                self.state = RebalancerState::Halted;
                self.halt_reason = Some(reason);
            } else {
                warn!("Risk responder in critical response with {} actions", actions.len());
            }
            return actions;
        }

        let warnings: Vec<_> = assessment
            .alerts
            .iter()
            .filter(|a| a.severity == AlertSeverity::Warning)
            .collect();
        if warnings.is_empty() {
            self.state = RebalancerState::Normal;
            return Vec::new();
        }

        self.state = RebalancerState::Warned;
        warnings
            .into_iter()
            .filter(|a| a.metric.ends_with("_concentration") || a.metric == "correlation")
            .map(|a| RebalanceAction {
                kind: ActionKind::Reallocate,
                target: None,
                reason: a.message.clone(),
                estimated_impact: a.value * assessment.metrics.total_exposure,
            })
            .collect()
    }

    fn critical_actions(
        &self,
        assessment: &RiskAssessment,
        ledger: &PortfolioLedger,
    ) -> Vec<RebalanceAction> {
        let metrics = &assessment.metrics;
        let mut actions = Vec::new();

        if metrics.portfolio_drawdown > self.limits.max_drawdown {
            let reason = format!(
                "drawdown {:.4} exceeds limit {:.4}",
                metrics.portfolio_drawdown, self.limits.max_drawdown
            );
            actions.extend(
                ledger
                    .positions()
                    .map(|p| RebalanceAction::on(ActionKind::Liquidate, p, reason.clone())),
            );
            actions.push(RebalanceAction {
                kind: ActionKind::StopTrading,
                target: None,
                reason,
                estimated_impact: metrics.total_exposure,
            });
            return actions;
        }

        if metrics.average_leverage >= self.limits.max_leverage {
            actions.extend(
                ledger
                    .positions()
                    .filter(|p| p.leverage >= self.limits.max_leverage)
                    .map(|p| {
                        RebalanceAction::on(
                            ActionKind::ReduceLeverage,
                            p,
                            format!(
                                "leverage {:.1}x at or above limit {:.1}x",
                                p.leverage, self.limits.max_leverage
                            ),
                        )
                    }),
            );
        }

        if metrics.margin_ratio < EMERGENCY_MARGIN_RATIO {
            let worst = ledger
                .positions()
                .min_by(|a, b| a.pnl.total_cmp(&b.pnl));
            if let Some(position) = worst {
                actions.push(RebalanceAction::on(
                    ActionKind::ClosePosition,
                    position,
                    format!(
                        "margin ratio {:.3} below {:.2}, closing worst position",
                        metrics.margin_ratio, EMERGENCY_MARGIN_RATIO
                    ),
                ));
            }
        }

        if assessment.should_stop_trading {
            actions.push(RebalanceAction {
                kind: ActionKind::StopTrading,
                target: None,
                reason: "risk limits breached".to_string(),
                estimated_impact: metrics.total_exposure,
            });
        }

        actions
    }
}
