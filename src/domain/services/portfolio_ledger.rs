//! PortfolioLedger - single source of truth for open positions and trade history
//!
//! Derived totals (exposure, pnl, margin) are recomputed from scratch after every
//! mutation, so they can never drift from the positions they summarize.

use crate::domain::entities::position::{price_key, Position, PositionKey};
use crate::domain::entities::trade::{Trade, TradeStatus};
use crate::domain::errors::LedgerError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

/// Serializable checkpoint of the ledger's persistent state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub account_id: String,
    pub balance: f64,
    pub positions: Vec<Position>,
    /// Trade history, oldest first. Needed to rebuild the daily volume.
    #[serde(default)]
    pub trades: Vec<Trade>,
    pub taken_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct PortfolioLedger {
    account_id: String,
    balance: f64,
    positions: BTreeMap<PositionKey, Position>,
    trades: Vec<Trade>,
    trade_ids: HashSet<String>,

    total_exposure: f64,
    total_pnl: f64,
    used_margin: f64,
    available_margin: f64,
}

impl PortfolioLedger {
    pub fn new(account_id: &str, balance: f64) -> Self {
        let mut ledger = Self {
            account_id: account_id.to_string(),
            balance,
            positions: BTreeMap::new(),
            trades: Vec::new(),
            trade_ids: HashSet::new(),
            total_exposure: 0.0,
            total_pnl: 0.0,
            used_margin: 0.0,
            available_margin: 0.0,
        };
        ledger.recalculate();
        ledger
    }

    /// Rebuild a ledger from a checkpoint. Every restored position is re-validated
    /// and trade ids must stay unique.
    pub fn restore(snapshot: LedgerSnapshot) -> Result<Self, LedgerError> {
        let mut ledger = Self::new(&snapshot.account_id, snapshot.balance);
        for position in snapshot.positions {
            ledger.add_position(position)?;
        }
        for trade in snapshot.trades {
            ledger.add_trade(trade)?;
        }
        Ok(ledger)
    }

    pub fn snapshot(&self, taken_at: DateTime<Utc>) -> LedgerSnapshot {
        LedgerSnapshot {
            account_id: self.account_id.clone(),
            balance: self.balance,
            positions: self.positions.values().cloned().collect(),
            trades: self.trades.clone(),
            taken_at,
        }
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn balance(&self) -> f64 {
        self.balance
    }

    pub fn total_exposure(&self) -> f64 {
        self.total_exposure
    }

    pub fn total_pnl(&self) -> f64 {
        self.total_pnl
    }

    pub fn used_margin(&self) -> f64 {
        self.used_margin
    }

    pub fn available_margin(&self) -> f64 {
        self.available_margin
    }

    /// Balance plus unrealized pnl.
    pub fn equity(&self) -> f64 {
        self.balance + self.total_pnl
    }

    /// Open positions in key order.
    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    pub fn position_count(&self) -> usize {
        self.positions.len()
    }

    pub fn position(&self, key: &PositionKey) -> Option<&Position> {
        self.positions.get(key)
    }

    /// First open position on `symbol`, on any chain or venue.
    pub fn position_for_symbol(&self, symbol: &str) -> Option<&Position> {
        self.positions.values().find(|p| p.symbol == symbol)
    }

    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }

    /// Insert or replace the position under its key.
    pub fn add_position(&mut self, mut position: Position) -> Result<(), LedgerError> {
        position.validate()?;
        position.recompute_pnl();
        let key = position.key();
        debug!("Ledger upsert {} {} size={}", key, position.side, position.size);
        self.positions.insert(key, position);
        self.recalculate();
        Ok(())
    }

    pub fn close_position(&mut self, key: &PositionKey) -> Option<Position> {
        let removed = self.positions.remove(key);
        if removed.is_some() {
            debug!("Ledger closed {}", key);
            self.recalculate();
        }
        removed
    }

    pub fn add_trade(&mut self, trade: Trade) -> Result<(), LedgerError> {
        if !self.trade_ids.insert(trade.id.clone()) {
            return Err(LedgerError::DuplicateTrade(trade.id));
        }
        self.trades.push(trade);
        Ok(())
    }

    /// Move a pending trade to its terminal status. Terminal trades are immutable.
    pub fn settle_trade(&mut self, id: &str, status: TradeStatus) -> Result<(), LedgerError> {
        let trade = self
            .trades
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| LedgerError::TradeNotFound(id.to_string()))?;

        if trade.status.is_terminal() {
            return Err(LedgerError::TradeAlreadySettled {
                id: id.to_string(),
                status: trade.status.as_str().to_string(),
            });
        }
        trade.status = status;
        Ok(())
    }

    pub fn update_balance(&mut self, balance: f64) -> Result<(), LedgerError> {
        if !balance.is_finite() {
            return Err(LedgerError::InvalidBalance(balance));
        }
        self.balance = balance;
        self.recalculate();
        Ok(())
    }

    /// Mark positions to market. Prices are keyed `symbol-chain`; missing keys are left alone.
    pub fn update_position_prices(&mut self, prices: &HashMap<String, f64>, at: DateTime<Utc>) {
        for position in self.positions.values_mut() {
            let key = price_key(&position.symbol, &position.chain);
            if let Some(&price) = prices.get(&key) {
                if price.is_finite() && price > 0.0 {
                    position.mark(price, at);
                }
            }
        }
        self.recalculate();
    }

    /// Filled notional since 00:00 UTC of `now`'s day.
    pub fn daily_volume(&self, now: DateTime<Utc>) -> f64 {
        let day_start = now.date_naive().and_hms_opt(0, 0, 0).map(|d| d.and_utc());
        self.trades
            .iter()
            .filter(|t| t.status == TradeStatus::Filled)
            .filter(|t| day_start.map_or(true, |start| t.timestamp >= start))
            .map(Trade::notional)
            .sum()
    }

    fn recalculate(&mut self) {
        self.total_exposure = self.positions.values().map(Position::notional).sum();
        self.total_pnl = self.positions.values().map(|p| p.pnl).sum();
        self.used_margin = self.positions.values().map(Position::required_margin).sum();
        self.available_margin = self.balance - self.used_margin;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::position::PositionSide;
    use crate::config::RiskLimits;
    use crate::domain::entities::trade::TradeSide;
    use crate::domain::services::risk_engine::{ProposedTrade, RiskEngine, TradeRejection};
    use chrono::TimeZone;

    fn position(symbol: &str, chain: &str, side: PositionSide, size: f64, entry: f64, leverage: f64) -> Position {
        let key = PositionKey::new(symbol, chain, chain);
        Position::open(&key, side, size, entry, leverage, Utc::now()).unwrap()
    }

    fn assert_margin_invariant(ledger: &PortfolioLedger) {
        let used: f64 = ledger.positions().map(|p| p.size * p.entry_price / p.leverage).sum();
        assert!((ledger.used_margin() - used).abs() < 1e-9);
        assert!((ledger.available_margin() - (ledger.balance() - used)).abs() < 1e-9);
    }

    #[test]
    fn test_new_ledger_has_full_margin() {
        let ledger = PortfolioLedger::new("acct", 10_000.0);
        assert_eq!(ledger.available_margin(), 10_000.0);
        assert_eq!(ledger.total_exposure(), 0.0);
        assert_margin_invariant(&ledger);
    }

    #[test]
    fn test_add_position_upserts_by_key() {
        let mut ledger = PortfolioLedger::new("acct", 10_000.0);
        ledger
            .add_position(position("BTC-USD", "hyperliquid", PositionSide::Long, 1.0, 5_000.0, 5.0))
            .unwrap();
        ledger
            .add_position(position("BTC-USD", "hyperliquid", PositionSide::Long, 2.0, 5_000.0, 5.0))
            .unwrap();

        assert_eq!(ledger.position_count(), 1);
        assert_eq!(ledger.used_margin(), 2_000.0);
        assert_eq!(ledger.available_margin(), 8_000.0);
        assert_margin_invariant(&ledger);
    }

    #[test]
    fn test_margin_invariant_after_every_mutation() {
        let mut ledger = PortfolioLedger::new("acct", 5_000.0);
        ledger
            .add_position(position("BTC-USD", "hyperliquid", PositionSide::Long, 0.1, 50_000.0, 10.0))
            .unwrap();
        assert_margin_invariant(&ledger);
        ledger
            .add_position(position("ETH-USD", "ethereum", PositionSide::Short, 1.0, 3_000.0, 2.0))
            .unwrap();
        assert_margin_invariant(&ledger);
        ledger.update_balance(4_000.0).unwrap();
        assert_margin_invariant(&ledger);

        let mut prices = HashMap::new();
        prices.insert("ETH-USD-ethereum".to_string(), 2_900.0);
        ledger.update_position_prices(&prices, Utc::now());
        assert_margin_invariant(&ledger);

        ledger.close_position(&PositionKey::new("BTC-USD", "hyperliquid", "hyperliquid"));
        assert_margin_invariant(&ledger);
        assert_eq!(ledger.position_count(), 1);
    }

    #[test]
    fn test_price_update_recomputes_pnl() {
        let mut ledger = PortfolioLedger::new("acct", 10_000.0);
        ledger
            .add_position(position("ETH-USD", "ethereum", PositionSide::Short, 2.0, 3_000.0, 1.0))
            .unwrap();

        let mut prices = HashMap::new();
        prices.insert("ETH-USD-ethereum".to_string(), 2_800.0);
        prices.insert("ETH-USD-arbitrum".to_string(), 1.0);
        ledger.update_position_prices(&prices, Utc::now());

        assert_eq!(ledger.total_pnl(), 400.0);
        assert_eq!(ledger.total_exposure(), 5_600.0);
        assert_eq!(ledger.equity(), 10_400.0);
    }

    #[test]
    fn test_duplicate_trade_rejected() {
        let mut ledger = PortfolioLedger::new("acct", 10_000.0);
        let key = PositionKey::new("BTC-USD", "hyperliquid", "hyperliquid");
        let trade = Trade::filled("t-1".into(), &key, TradeSide::Buy, 0.1, 50_000.0, 5.0, Utc::now());
        ledger.add_trade(trade.clone()).unwrap();
        assert_eq!(
            ledger.add_trade(trade),
            Err(LedgerError::DuplicateTrade("t-1".to_string()))
        );
    }

    #[test]
    fn test_settle_only_from_pending() {
        let mut ledger = PortfolioLedger::new("acct", 10_000.0);
        let key = PositionKey::new("BTC-USD", "hyperliquid", "hyperliquid");
        let mut trade = Trade::filled("t-1".into(), &key, TradeSide::Buy, 0.1, 50_000.0, 5.0, Utc::now());
        trade.status = TradeStatus::Pending;
        ledger.add_trade(trade).unwrap();

        ledger.settle_trade("t-1", TradeStatus::Cancelled).unwrap();
        assert!(matches!(
            ledger.settle_trade("t-1", TradeStatus::Filled),
            Err(LedgerError::TradeAlreadySettled { .. })
        ));
        assert!(matches!(
            ledger.settle_trade("missing", TradeStatus::Filled),
            Err(LedgerError::TradeNotFound(_))
        ));
    }

    #[test]
    fn test_daily_volume_counts_today_filled_only() {
        let mut ledger = PortfolioLedger::new("acct", 10_000.0);
        let key = PositionKey::new("BTC-USD", "hyperliquid", "hyperliquid");
        let now = Utc.with_ymd_and_hms(2024, 5, 2, 12, 0, 0).unwrap();
        let yesterday = Utc.with_ymd_and_hms(2024, 5, 1, 23, 59, 0).unwrap();

        ledger
            .add_trade(Trade::filled("a".into(), &key, TradeSide::Buy, 1.0, 100.0, 0.0, now))
            .unwrap();
        ledger
            .add_trade(Trade::filled("b".into(), &key, TradeSide::Buy, 1.0, 500.0, 0.0, yesterday))
            .unwrap();
        let mut cancelled = Trade::filled("c".into(), &key, TradeSide::Buy, 1.0, 900.0, 0.0, now);
        cancelled.status = TradeStatus::Cancelled;
        ledger.add_trade(cancelled).unwrap();

        assert_eq!(ledger.daily_volume(now), 100.0);
    }

    #[test]
    fn test_snapshot_restore() {
        let mut ledger = PortfolioLedger::new("acct", 7_500.0);
        ledger
            .add_position(position("SOL-USD", "solana", PositionSide::Long, 10.0, 150.0, 3.0))
            .unwrap();
        let snapshot = ledger.snapshot(Utc::now());

        let restored = PortfolioLedger::restore(snapshot).unwrap();
        assert_eq!(restored.balance(), 7_500.0);
        assert_eq!(restored.position_count(), 1);
        assert_eq!(restored.used_margin(), ledger.used_margin());
        assert!(restored.position_for_symbol("SOL-USD").is_some());
    }

    #[test]
    fn test_restore_keeps_daily_volume() {
        let now = Utc::now();
        let key = PositionKey::new("BTC-USD", "hyperliquid", "hyperliquid");
        let mut ledger = PortfolioLedger::new("acct", 100_000.0);
        ledger
            .add_trade(Trade::filled("t-1".into(), &key, TradeSide::Buy, 0.999, 50_000.0, 0.0, now))
            .unwrap();
        let before = ledger.daily_volume(now);
        assert!((before - 49_950.0).abs() < 1e-6);

        let restored = PortfolioLedger::restore(ledger.snapshot(now)).unwrap();
        assert_eq!(restored.daily_volume(now), before);
        assert_eq!(restored.trades().len(), 1);

        // A restart must not reopen the daily volume budget.
        let risk = RiskEngine::new(RiskLimits::default());
        let trade = ProposedTrade {
            size: 0.002,
            entry_price: 50_000.0,
            leverage: 2.0,
            stop_loss: 49_500.0,
        };
        assert!(matches!(
            risk.validate_trade(&trade, &restored, now),
            Err(TradeRejection::DailyVolumeExceeded { .. })
        ));
    }

    #[test]
    fn test_restore_rejects_duplicate_trade_ids() {
        let now = Utc::now();
        let key = PositionKey::new("BTC-USD", "hyperliquid", "hyperliquid");
        let trade = Trade::filled("t-1".into(), &key, TradeSide::Buy, 0.01, 50_000.0, 0.0, now);
        let mut snapshot = PortfolioLedger::new("acct", 1_000.0).snapshot(now);
        snapshot.trades = vec![trade.clone(), trade];

        assert!(matches!(
            PortfolioLedger::restore(snapshot),
            Err(LedgerError::DuplicateTrade(_))
        ));
    }

    #[test]
    fn test_update_balance_rejects_nan() {
        let mut ledger = PortfolioLedger::new("acct", 1.0);
        assert!(ledger.update_balance(f64::NAN).is_err());
        assert_eq!(ledger.balance(), 1.0);
    }
}
