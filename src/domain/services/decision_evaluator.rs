//! Turns a scored opportunity into execute / monitor / skip.
//!
//! Stateless across ticks: the only memory is what the ledger holds, which is
//! what gives the evaluator its hysteresis against flip-flopping positions.

use crate::config::EvaluatorConfig;
use crate::domain::entities::decision::{
    DecisionAction, DecisionIntent, TradingDecision, TradingOpportunity,
};
use crate::domain::entities::venue::VenueRoute;
use crate::domain::services::portfolio_ledger::PortfolioLedger;
use crate::domain::services::risk_engine::{ProposedTrade, RiskAssessment, RiskEngine};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone)]
pub struct DecisionEvaluator {
    config: EvaluatorConfig,
}

impl DecisionEvaluator {
    pub fn new(config: EvaluatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EvaluatorConfig {
        &self.config
    }

    pub fn evaluate(
        &self,
        opportunity: TradingOpportunity,
        assessment: &RiskAssessment,
        risk_engine: &RiskEngine,
        ledger: &PortfolioLedger,
        now: DateTime<Utc>,
    ) -> TradingDecision {
        let decide = |opportunity, action, intent, reason: String| TradingDecision {
            opportunity,
            action,
            intent,
            reason,
            timestamp: now,
        };
        let confidence = opportunity.confidence;

        if let Some(held) = ledger.position_for_symbol(&opportunity.symbol) {
            let wanted = opportunity.signal.position_side();
            if wanted == Some(held.side) {
                let reason = format!(
                    "holding {} position on {}:{}",
                    held.side, held.chain, held.venue
                );
                return decide(opportunity, DecisionAction::Monitor, DecisionIntent::Open, reason);
            }

            let reversal_threshold = self.config.execute_threshold + self.config.reversal_margin;
            if confidence >= reversal_threshold {
                if assessment.should_stop_trading {
                    return decide(
                        opportunity,
                        DecisionAction::Skip,
                        DecisionIntent::Close,
                        "trading halted by risk engine".to_string(),
                    );
                }
                // Exit the held position where it lives.
                let reason = format!(
                    "reversal: closing {} position (confidence {:.2} >= {:.2})",
                    held.side, confidence, reversal_threshold
                );
                let mut exit = opportunity;
                exit.route = VenueRoute::new(&held.chain, &held.venue);
                exit.recommended_size = held.notional();
                exit.recommended_leverage = held.leverage;
                return decide(exit, DecisionAction::Execute, DecisionIntent::Close, reason);
            }

            let action = if confidence > self.config.monitor_threshold {
                DecisionAction::Monitor
            } else {
                DecisionAction::Skip
            };
            let reason = format!(
                "opposite {} position held; confidence {:.2} below reversal threshold {:.2}",
                held.side, confidence, reversal_threshold
            );
            return decide(opportunity, action, DecisionIntent::Close, reason);
        }

        if confidence > self.config.execute_threshold {
            if assessment.should_stop_trading {
                return decide(
                    opportunity,
                    DecisionAction::Skip,
                    DecisionIntent::Open,
                    "trading halted by risk engine".to_string(),
                );
            }
            let proposed = ProposedTrade::from_opportunity(&opportunity);
            return match risk_engine.validate_trade(&proposed, ledger, now) {
                Ok(()) => decide(
                    opportunity,
                    DecisionAction::Execute,
                    DecisionIntent::Open,
                    format!("confidence {:.2}, passed risk validation", confidence),
                ),
                Err(rejection) => decide(
                    opportunity,
                    DecisionAction::Skip,
                    DecisionIntent::Open,
                    rejection.to_string(),
                ),
            };
        }

        if confidence > self.config.monitor_threshold {
            decide(
                opportunity,
                DecisionAction::Monitor,
                DecisionIntent::Open,
                format!(
                    "confidence {:.2} below execute threshold {:.2}",
                    confidence, self.config.execute_threshold
                ),
            )
        } else {
            decide(
                opportunity,
                DecisionAction::Skip,
                DecisionIntent::Open,
                format!(
                    "confidence {:.2} at or below monitor threshold {:.2}",
                    confidence, self.config.monitor_threshold
                ),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RiskLimits;
    use crate::domain::entities::decision::TradeSignal;
    use crate::domain::entities::position::{Position, PositionKey, PositionSide};
    use crate::domain::entities::venue::VenueRole;

    fn opportunity(signal: TradeSignal, confidence: f64, leverage: f64) -> TradingOpportunity {
        TradingOpportunity {
            symbol: "BTC-USD".to_string(),
            route: VenueRoute::new("ethereum", "uniswap"),
            route_role: VenueRole::HighVolume,
            signal,
            confidence,
            technical_score: 1.0,
            research_score: 0.5,
            risk_score: 1.0,
            estimated_profit: 3.0,
            estimated_loss: 2.0,
            recommended_size: 100.0,
            recommended_leverage: leverage,
            entry_price: 50_000.0,
            stop_loss: 49_000.0,
            take_profit: 51_500.0,
            reasoning: "test".to_string(),
            timestamp: Utc::now(),
        }
    }

    fn setup(balance: f64) -> (DecisionEvaluator, RiskEngine, PortfolioLedger) {
        (
            DecisionEvaluator::new(EvaluatorConfig::default()),
            RiskEngine::new(RiskLimits::default()),
            PortfolioLedger::new("acct", balance),
        )
    }

    fn hold(ledger: &mut PortfolioLedger, side: PositionSide) {
        let key = PositionKey::new("BTC-USD", "hyperliquid", "hyperliquid");
        let position = Position::open(&key, side, 0.002, 50_000.0, 5.0, Utc::now()).unwrap();
        ledger.add_position(position).unwrap();
    }

    #[test]
    fn test_high_confidence_executes() {
        let (evaluator, risk, ledger) = setup(10_000.0);
        let now = Utc::now();
        let assessment = risk.assess(&ledger, now);
        let decision = evaluator.evaluate(opportunity(TradeSignal::Buy, 0.8, 16.2), &assessment, &risk, &ledger, now);
        assert_eq!(decision.action, DecisionAction::Execute);
        assert_eq!(decision.intent, DecisionIntent::Open);
    }

    #[test]
    fn test_rejected_trade_is_skipped_with_reason() {
        let (evaluator, risk, ledger) = setup(10_000.0);
        let now = Utc::now();
        let assessment = risk.assess(&ledger, now);
        let decision = evaluator.evaluate(opportunity(TradeSignal::Buy, 0.9, 25.0), &assessment, &risk, &ledger, now);
        assert_eq!(decision.action, DecisionAction::Skip);
        assert!(decision.reason.contains("leverage"));
    }

    #[test]
    fn test_bands() {
        let (evaluator, risk, ledger) = setup(10_000.0);
        let now = Utc::now();
        let assessment = risk.assess(&ledger, now);

        let monitor = evaluator.evaluate(opportunity(TradeSignal::Buy, 0.7, 5.0), &assessment, &risk, &ledger, now);
        assert_eq!(monitor.action, DecisionAction::Monitor);
        let skip = evaluator.evaluate(opportunity(TradeSignal::Buy, 0.5, 5.0), &assessment, &risk, &ledger, now);
        assert_eq!(skip.action, DecisionAction::Skip);
    }

    #[test]
    fn test_halt_blocks_execute() {
        let (evaluator, risk, ledger) = setup(10_000.0);
        let now = Utc::now();
        let mut assessment = risk.assess(&ledger, now);
        assessment.should_stop_trading = true;

        let decision = evaluator.evaluate(opportunity(TradeSignal::Buy, 1.0, 2.0), &assessment, &risk, &ledger, now);
        assert_eq!(decision.action, DecisionAction::Skip);
        assert!(decision.reason.contains("halted"));
    }

    #[test]
    fn test_same_side_position_is_held() {
        let (evaluator, risk, mut ledger) = setup(10_000.0);
        hold(&mut ledger, PositionSide::Long);
        let now = Utc::now();
        let assessment = risk.assess(&ledger, now);

        let decision = evaluator.evaluate(opportunity(TradeSignal::Buy, 0.95, 2.0), &assessment, &risk, &ledger, now);
        assert_eq!(decision.action, DecisionAction::Monitor);
        assert!(decision.reason.starts_with("holding"));
    }

    #[test]
    fn test_reversal_needs_extra_margin() {
        let (evaluator, risk, mut ledger) = setup(10_000.0);
        hold(&mut ledger, PositionSide::Long);
        let now = Utc::now();
        let assessment = risk.assess(&ledger, now);

        let weak = evaluator.evaluate(opportunity(TradeSignal::Sell, 0.75, 2.0), &assessment, &risk, &ledger, now);
        assert_eq!(weak.action, DecisionAction::Monitor);

        let strong = evaluator.evaluate(opportunity(TradeSignal::Sell, 0.85, 2.0), &assessment, &risk, &ledger, now);
        assert_eq!(strong.action, DecisionAction::Execute);
        assert_eq!(strong.intent, DecisionIntent::Close);
        assert_eq!(strong.opportunity.route, VenueRoute::new("hyperliquid", "hyperliquid"));
    }

    #[test]
    fn test_evaluation_is_deterministic() {
        let (evaluator, risk, ledger) = setup(10_000.0);
        let now = Utc::now();
        let assessment = risk.assess(&ledger, now);
        let opp = opportunity(TradeSignal::Buy, 0.8, 16.2);

        let first = evaluator.evaluate(opp.clone(), &assessment, &risk, &ledger, now);
        let second = evaluator.evaluate(opp, &assessment, &risk, &ledger, now);
        assert_eq!(first, second);
    }
}
