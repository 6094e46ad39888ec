use crate::domain::entities::position::{PositionKey, PositionSide};
use crate::domain::services::portfolio_ledger::PortfolioLedger;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::StopLoss => "stop-loss",
            ExitReason::TakeProfit => "take-profit",
        }
    }
}

/// A position whose mark price crossed one of its protective levels.
#[derive(Debug, Clone, PartialEq)]
pub struct ExitSignal {
    pub key: PositionKey,
    pub side: PositionSide,
    pub reason: ExitReason,
    pub trigger_price: f64,
    pub current_price: f64,
}

/// Scans marked positions for stop-loss and take-profit hits. Stop-loss wins when both fire.
pub fn check_exits(ledger: &PortfolioLedger) -> Vec<ExitSignal> {
    ledger
        .positions()
        .filter_map(|position| {
            let (reason, trigger_price) = if position.should_stop_loss() {
                (ExitReason::StopLoss, position.stop_loss?)
            } else if position.should_take_profit() {
                (ExitReason::TakeProfit, position.take_profit?)
            } else {
                return None;
            };
            Some(ExitSignal {
                key: position.key(),
                side: position.side,
                reason,
                trigger_price,
                current_price: position.current_price,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::position::Position;
    use chrono::Utc;
    use std::collections::HashMap;

    fn open(ledger: &mut PortfolioLedger, symbol: &str, side: PositionSide, stop: f64, target: f64) {
        let key = PositionKey::new(symbol, "base", "aerodrome");
        let position = Position::open(&key, side, 1.0, 100.0, 1.0, Utc::now())
            .unwrap()
            .with_stops(Some(stop), Some(target));
        ledger.add_position(position).unwrap();
    }

    #[test]
    fn test_no_exit_inside_band() {
        let mut ledger = PortfolioLedger::new("acct", 1_000.0);
        open(&mut ledger, "BTC-USD", PositionSide::Long, 98.0, 103.0);
        assert!(check_exits(&ledger).is_empty());
    }

    #[test]
    fn test_long_and_short_exits() {
        let mut ledger = PortfolioLedger::new("acct", 1_000.0);
        open(&mut ledger, "BTC-USD", PositionSide::Long, 98.0, 103.0);
        open(&mut ledger, "ETH-USD", PositionSide::Short, 102.0, 97.0);

        let mut prices = HashMap::new();
        prices.insert("BTC-USD-base".to_string(), 97.5);
        prices.insert("ETH-USD-base".to_string(), 96.0);
        ledger.update_position_prices(&prices, Utc::now());

        let exits = check_exits(&ledger);
        assert_eq!(exits.len(), 2);
        let btc = exits.iter().find(|e| e.key.symbol == "BTC-USD").unwrap();
        assert_eq!(btc.reason, ExitReason::StopLoss);
        assert_eq!(btc.trigger_price, 98.0);
        let eth = exits.iter().find(|e| e.key.symbol == "ETH-USD").unwrap();
        assert_eq!(eth.reason, ExitReason::TakeProfit);
        assert_eq!(eth.current_price, 96.0);
    }

    #[test]
    fn test_positions_without_stops_never_exit() {
        let mut ledger = PortfolioLedger::new("acct", 1_000.0);
        let key = PositionKey::new("SOL-USD", "solana", "jupiter");
        let position = Position::open(&key, PositionSide::Long, 1.0, 100.0, 1.0, Utc::now()).unwrap();
        ledger.add_position(position).unwrap();

        let mut prices = HashMap::new();
        prices.insert("SOL-USD-solana".to_string(), 1.0);
        ledger.update_position_prices(&prices, Utc::now());
        assert!(check_exits(&ledger).is_empty());
    }
}
