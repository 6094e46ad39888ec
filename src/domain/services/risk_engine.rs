//! Risk Engine
//!
//! Pure functions of the ledger and the configured [`RiskLimits`]: portfolio metrics,
//! ranked alerts, the stop-trading predicate and the pre-trade validator.

use crate::config::RiskLimits;
use crate::domain::entities::decision::TradingOpportunity;
use crate::domain::services::portfolio_ledger::PortfolioLedger;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Share of one venue or chain in total exposure above which a warning is raised.
pub const CONCENTRATION_WARNING: f64 = 0.5;
/// Fraction of a limit at which a warning is raised.
pub const WARNING_FRACTION: f64 = 0.8;
/// Fraction of equity that a single trade may put at risk.
pub const MAX_RISK_PER_TRADE: f64 = 0.01;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskMetrics {
    pub total_exposure: f64,
    pub average_leverage: f64,
    pub portfolio_drawdown: f64,
    /// Largest share of exposure held in a single symbol across venues.
    pub correlation_risk: f64,
    pub venue_concentration: BTreeMap<String, f64>,
    pub chain_concentration: BTreeMap<String, f64>,
    pub daily_volume: f64,
    /// Available margin over balance.
    pub margin_ratio: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    // Declared first so ascending order ranks critical alerts first.
    Critical,
    Warning,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Critical => "critical",
            AlertSeverity::Warning => "warning",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAlert {
    pub severity: AlertSeverity,
    pub message: String,
    pub metric: String,
    pub value: f64,
    pub limit: f64,
    pub timestamp: DateTime<Utc>,
}

impl RiskAlert {
    pub fn is_critical(&self) -> bool {
        self.severity == AlertSeverity::Critical
    }
}

/// Metrics, ranked alerts and the stop predicate for one point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct RiskAssessment {
    pub metrics: RiskMetrics,
    pub alerts: Vec<RiskAlert>,
    pub should_stop_trading: bool,
}

impl RiskAssessment {
    pub fn has_critical(&self) -> bool {
        self.alerts.iter().any(RiskAlert::is_critical)
    }
}

/// Why the validator refused a trade.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TradeRejection {
    #[error("Position value {value:.2} exceeds max position size {limit:.2}")]
    PositionTooLarge { value: f64, limit: f64 },

    #[error("Leverage {requested:.1}x exceeds max leverage {limit:.1}x")]
    LeverageTooHigh { requested: f64, limit: f64 },

    #[error("Insufficient margin: required {required:.2}, available {available:.2}")]
    InsufficientMargin { required: f64, available: f64 },

    #[error("Risk amount {risk:.2} exceeds 1% of equity ({limit:.2})")]
    RiskPerTradeExceeded { risk: f64, limit: f64 },

    #[error("Daily volume {projected:.2} would exceed max daily volume {limit:.2}")]
    DailyVolumeExceeded { projected: f64, limit: f64 },
}

/// The figures the validator needs about a trade. `size` is in base units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProposedTrade {
    pub size: f64,
    pub entry_price: f64,
    pub leverage: f64,
    pub stop_loss: f64,
}

impl ProposedTrade {
    pub fn from_opportunity(opportunity: &TradingOpportunity) -> Self {
        Self {
            size: opportunity.base_size(),
            entry_price: opportunity.entry_price,
            leverage: opportunity.recommended_leverage,
            stop_loss: opportunity.stop_loss,
        }
    }

    pub fn value(&self) -> f64 {
        self.size * self.entry_price
    }

    pub fn required_margin(&self) -> f64 {
        if self.leverage > 0.0 {
            self.value() / self.leverage
        } else {
            f64::INFINITY
        }
    }

    pub fn risk_amount(&self) -> f64 {
        self.size * (self.entry_price - self.stop_loss).abs()
    }
}

#[derive(Debug, Clone)]
pub struct RiskEngine {
    limits: RiskLimits,
}

impl RiskEngine {
    pub fn new(limits: RiskLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    pub fn assess(&self, ledger: &PortfolioLedger, now: DateTime<Utc>) -> RiskAssessment {
        let metrics = self.calculate_metrics(ledger, now);
        let alerts = self.generate_alerts(&metrics, now);
        let should_stop_trading = self.should_stop_trading(&metrics, &alerts);
        RiskAssessment {
            metrics,
            alerts,
            should_stop_trading,
        }
    }

    pub fn calculate_metrics(&self, ledger: &PortfolioLedger, now: DateTime<Utc>) -> RiskMetrics {
        let total_exposure = ledger.total_exposure();
        let count = ledger.position_count();
        let average_leverage = if count > 0 {
            ledger.positions().map(|p| p.leverage).sum::<f64>() / count as f64
        } else {
            0.0
        };

        let balance = ledger.balance();
        let portfolio_drawdown = if balance > 0.0 {
            ((total_exposure - balance) / balance).max(0.0)
        } else {
            0.0
        };

        let mut by_venue: BTreeMap<String, f64> = BTreeMap::new();
        let mut by_chain: BTreeMap<String, f64> = BTreeMap::new();
        let mut by_symbol: BTreeMap<String, f64> = BTreeMap::new();
        for position in ledger.positions() {
            let notional = position.notional();
            *by_venue.entry(position.venue.clone()).or_default() += notional;
            *by_chain.entry(position.chain.clone()).or_default() += notional;
            *by_symbol.entry(position.symbol.clone()).or_default() += notional;
        }

        let (venue_concentration, chain_concentration, correlation_risk) = if total_exposure > 0.0 {
            let share = |groups: BTreeMap<String, f64>| -> BTreeMap<String, f64> {
                groups
                    .into_iter()
                    .map(|(k, v)| (k, v / total_exposure))
                    .collect()
            };
            let correlation = by_symbol.values().fold(0.0_f64, |m, v| m.max(*v)) / total_exposure;
            (share(by_venue), share(by_chain), correlation)
        } else {
            (BTreeMap::new(), BTreeMap::new(), 0.0)
        };

        let margin_ratio = if ledger.used_margin() <= 0.0 {
            1.0
        } else if balance > 0.0 {
            ledger.available_margin() / balance
        } else {
            0.0
        };

        RiskMetrics {
            total_exposure,
            average_leverage,
            portfolio_drawdown,
            correlation_risk,
            venue_concentration,
            chain_concentration,
            daily_volume: ledger.daily_volume(now),
            margin_ratio,
        }
    }

    /// Alerts ranked critical first; generation order is kept within a severity.
    pub fn generate_alerts(&self, metrics: &RiskMetrics, now: DateTime<Utc>) -> Vec<RiskAlert> {
        let mut alerts = Vec::new();
        let alert = |severity, metric: &str, value: f64, limit: f64, message: String| RiskAlert {
            severity,
            message,
            metric: metric.to_string(),
            value,
            limit,
            timestamp: now,
        };

        let limits = &self.limits;
        for (metric, value, limit) in [
            ("leverage", metrics.average_leverage, limits.max_leverage),
            ("drawdown", metrics.portfolio_drawdown, limits.max_drawdown),
        ] {
            if value >= limit {
                alerts.push(alert(
                    AlertSeverity::Critical,
                    metric,
                    value,
                    limit,
                    format!("{} {:.4} reached limit {:.4}", metric, value, limit),
                ));
            } else if value > 0.0 && value >= limit * WARNING_FRACTION {
                alerts.push(alert(
                    AlertSeverity::Warning,
                    metric,
                    value,
                    limit,
                    format!("{} {:.4} above 80% of limit {:.4}", metric, value, limit),
                ));
            }
        }

        for (kind, groups) in [
            ("venue", &metrics.venue_concentration),
            ("chain", &metrics.chain_concentration),
        ] {
            for (name, share) in groups {
                if *share > CONCENTRATION_WARNING {
                    alerts.push(alert(
                        AlertSeverity::Warning,
                        &format!("{}_concentration", kind),
                        *share,
                        CONCENTRATION_WARNING,
                        format!("{:.0}% of exposure on {} {}", share * 100.0, kind, name),
                    ));
                }
            }
        }

        if metrics.correlation_risk > limits.max_correlation {
            alerts.push(alert(
                AlertSeverity::Warning,
                "correlation",
                metrics.correlation_risk,
                limits.max_correlation,
                format!(
                    "{:.0}% of exposure in a single asset",
                    metrics.correlation_risk * 100.0
                ),
            ));
        }

        if metrics.daily_volume > 0.0
            && metrics.daily_volume >= limits.max_daily_volume * WARNING_FRACTION
        {
            alerts.push(alert(
                AlertSeverity::Warning,
                "daily_volume",
                metrics.daily_volume,
                limits.max_daily_volume,
                format!(
                    "daily volume {:.2} above 80% of limit {:.2}",
                    metrics.daily_volume, limits.max_daily_volume
                ),
            ));
        }

        // Stable sort keeps generation order inside a severity.
        alerts.sort_by_key(|a| a.severity);
        alerts
    }

    pub fn should_stop_trading(&self, metrics: &RiskMetrics, alerts: &[RiskAlert]) -> bool {
        alerts.iter().any(RiskAlert::is_critical)
            || metrics.portfolio_drawdown > self.limits.max_drawdown
            || metrics.average_leverage > self.limits.max_leverage
    }

    /// Run every check and report the first failure in the order
    /// size, leverage, margin, 1% rule, daily volume.
    pub fn validate_trade(
        &self,
        trade: &ProposedTrade,
        ledger: &PortfolioLedger,
        now: DateTime<Utc>,
    ) -> Result<(), TradeRejection> {
        let limits = &self.limits;
        let value = trade.value();
        let required = trade.required_margin();
        let available = ledger.available_margin();
        let risk = trade.risk_amount();
        let max_risk = ledger.equity() * MAX_RISK_PER_TRADE;
        let projected = ledger.daily_volume(now) + value;

        let checks = [
            (value > limits.max_position_size).then_some(TradeRejection::PositionTooLarge {
                value,
                limit: limits.max_position_size,
            }),
            (trade.leverage > limits.max_leverage).then_some(TradeRejection::LeverageTooHigh {
                requested: trade.leverage,
                limit: limits.max_leverage,
            }),
            (required > available).then_some(TradeRejection::InsufficientMargin {
                required,
                available,
            }),
            (risk > max_risk).then_some(TradeRejection::RiskPerTradeExceeded {
                risk,
                limit: max_risk,
            }),
            (projected > limits.max_daily_volume).then_some(TradeRejection::DailyVolumeExceeded {
                projected,
                limit: limits.max_daily_volume,
            }),
        ];

        match checks.into_iter().flatten().next() {
            Some(rejection) => Err(rejection),
            None => Ok(()),
        }
    }
}
