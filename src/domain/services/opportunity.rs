//! Opportunity scoring, venue dispatch and position sizing.

use crate::config::{EvaluatorConfig, RiskLimits, VenueRoutes};
use crate::domain::entities::decision::{TradeSignal, TradingOpportunity};
use crate::domain::entities::venue::{VenueRole, VenueRoute};
use crate::domain::services::portfolio_ledger::PortfolioLedger;
use crate::domain::services::risk_engine::RiskMetrics;
use crate::domain::services::signal_engine::{MarketSignal, SignalKind};
use chrono::{DateTime, Utc};
use tracing::debug;

/// Everything the generator needs to know about one asset this tick.
#[derive(Debug, Clone)]
pub struct MarketView<'a> {
    pub symbol: &'a str,
    pub signal: &'a MarketSignal,
    pub rsi: Option<f64>,
    /// Fractional move over the configured lookback.
    pub price_change: f64,
    pub current_price: f64,
    pub research_score: f64,
}

/// Fixed-priority route picker: overbought, large move, small account, default.
#[derive(Debug, Clone)]
pub struct VenueDispatcher {
    routes: VenueRoutes,
    rsi_threshold: f64,
    large_move_threshold: f64,
    small_balance_threshold: f64,
}

impl VenueDispatcher {
    pub fn new(routes: VenueRoutes, config: &EvaluatorConfig) -> Self {
        Self {
            routes,
            rsi_threshold: config.routing_rsi_threshold,
            large_move_threshold: config.large_move_threshold,
            small_balance_threshold: config.small_balance_threshold,
        }
    }

    pub fn select(&self, rsi: Option<f64>, price_change: f64, balance: f64) -> (VenueRoute, VenueRole) {
        if rsi.is_some_and(|r| r > self.rsi_threshold) {
            (self.routes.perpetual.clone(), VenueRole::Perpetual)
        } else if price_change.abs() > self.large_move_threshold {
            (self.routes.fast.clone(), VenueRole::Fast)
        } else if balance < self.small_balance_threshold {
            (self.routes.low_fee.clone(), VenueRole::LowFee)
        } else {
            (self.routes.high_volume.clone(), VenueRole::HighVolume)
        }
    }
}

/// Weighted technical/research/risk score.
pub fn confidence(config: &EvaluatorConfig, technical: f64, research: f64, risk: f64) -> f64 {
    (config.technical_weight * technical
        + config.research_weight * research
        + config.risk_weight * risk)
        .clamp(0.0, 1.0)
}

/// 1.0 with no drawdown, falling linearly to 0.0 at the drawdown limit.
pub fn risk_score(drawdown: f64, max_drawdown: f64) -> f64 {
    if max_drawdown <= 0.0 {
        return 0.0;
    }
    (1.0 - drawdown / max_drawdown).max(0.0)
}

/// Quote notional for a new position: a fixed share of balance, capped by free margin.
pub fn position_notional(balance: f64, available_margin: f64, risk_per_trade: f64) -> f64 {
    (balance * risk_per_trade).min(available_margin).max(0.0)
}

/// Leverage scaled linearly with confidence between 1x and the limit.
pub fn leverage_for(confidence: f64, max_leverage: f64) -> f64 {
    let max_leverage = max_leverage.max(1.0);
    (1.0 + (max_leverage - 1.0) * confidence).clamp(1.0, max_leverage)
}

#[derive(Debug, Clone)]
pub struct OpportunityGenerator {
    config: EvaluatorConfig,
    limits: RiskLimits,
    dispatcher: VenueDispatcher,
}

impl OpportunityGenerator {
    pub fn new(config: EvaluatorConfig, limits: RiskLimits, routes: VenueRoutes) -> Self {
        let dispatcher = VenueDispatcher::new(routes, &config);
        Self {
            config,
            limits,
            dispatcher,
        }
    }

    /// Score a directional signal. Returns `None` for neutral signals, low confidence
    /// or when there is nothing left to size the position with.
    pub fn generate(
        &self,
        view: &MarketView<'_>,
        metrics: &RiskMetrics,
        ledger: &PortfolioLedger,
        now: DateTime<Utc>,
    ) -> Option<TradingOpportunity> {
        let signal = match view.signal.kind {
            SignalKind::Bullish => TradeSignal::Buy,
            SignalKind::Bearish => TradeSignal::Sell,
            SignalKind::Neutral => return None,
        };

        let technical_score = view.signal.strength;
        let research_score = view.research_score.clamp(0.0, 1.0);
        let risk = risk_score(metrics.portfolio_drawdown, self.limits.max_drawdown);
        let confidence = confidence(&self.config, technical_score, research_score, risk);

        if confidence <= self.config.opportunity_threshold {
            debug!(
                "{}: confidence {:.3} below opportunity threshold {:.2}",
                view.symbol, confidence, self.config.opportunity_threshold
            );
            return None;
        }

        let entry_price = view.current_price;
        let notional = position_notional(
            ledger.balance(),
            ledger.available_margin(),
            self.config.risk_per_trade,
        );
        if notional <= 0.0 || entry_price <= 0.0 {
            debug!("{}: nothing to size (notional {:.2})", view.symbol, notional);
            return None;
        }

        let leverage = leverage_for(confidence, self.limits.max_leverage);
        let (stop_loss, take_profit) = match signal {
            TradeSignal::Sell => (
                entry_price * (1.0 + self.config.stop_loss_pct),
                entry_price * (1.0 - self.config.take_profit_pct),
            ),
            _ => (
                entry_price * (1.0 - self.config.stop_loss_pct),
                entry_price * (1.0 + self.config.take_profit_pct),
            ),
        };

        let (route, route_role) =
            self.dispatcher
                .select(view.rsi, view.price_change, ledger.balance());

        let reasoning = format!(
            "{} signal strength {:.2} from [{}]; research {:.2}; risk {:.2}; {} route {}",
            view.signal.kind.as_str(),
            technical_score,
            view.signal.contributing_indicators.join(", "),
            research_score,
            risk,
            route_role.name(),
            route
        );

        Some(TradingOpportunity {
            symbol: view.symbol.to_string(),
            route,
            route_role,
            signal,
            confidence,
            technical_score,
            research_score,
            risk_score: risk,
            estimated_profit: notional * self.config.take_profit_pct,
            estimated_loss: notional * self.config.stop_loss_pct,
            recommended_size: notional,
            recommended_leverage: leverage,
            entry_price,
            stop_loss,
            take_profit,
            reasoning,
            timestamp: now,
        })
    }
}
