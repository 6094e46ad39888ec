//! Database Repository
//!
//! Append-only journal of decisions and trades, plus ledger checkpoints.

use super::models::*;
use super::{DatabaseError, DbPool};
use crate::domain::entities::decision::DecisionLogEntry;
use crate::domain::entities::position::Position;
use crate::domain::entities::trade::{Trade, TradeStatus};
use crate::domain::services::portfolio_ledger::LedgerSnapshot;
use tracing::{debug, error, warn};

fn query_error(what: &str, e: sqlx::Error) -> DatabaseError {
    error!("Failed to {}: {}", what, e);
    DatabaseError::QueryError(format!("Failed to {}: {}", what, e))
}

#[derive(Clone)]
pub struct JournalRepository {
    pool: DbPool,
}

impl JournalRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Append one decision; returns its row id.
    pub async fn append_decision(&self, entry: &DecisionLogEntry) -> Result<i64, DatabaseError> {
        let outcome = serde_json::to_string(&entry.outcome)
            .map_err(|e| DatabaseError::QueryError(format!("Failed to encode outcome: {}", e)))?;

        let id = sqlx::query(
            r#"
            INSERT INTO decision_log (timestamp, asset, decision, confidence, reasoning, outcome)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(entry.timestamp)
        .bind(&entry.asset)
        .bind(entry.decision.as_str())
        .bind(entry.confidence)
        .bind(&entry.reasoning)
        .bind(outcome)
        .execute(&self.pool)
        .await
        .map_err(|e| query_error("append decision", e))?
        .last_insert_rowid();

        debug!("Logged decision {} for {}", id, entry.asset);
        Ok(id)
    }

    /// Most recent decisions, newest first.
    pub async fn recent_decisions(&self, limit: i64) -> Result<Vec<DecisionLogEntry>, DatabaseError> {
        let records = sqlx::query_as::<_, DecisionLogRecord>(
            "SELECT * FROM decision_log ORDER BY id DESC LIMIT ?1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_error("load decisions", e))?;

        records.into_iter().map(DecisionLogEntry::try_from).collect()
    }

    /// Append one trade. A trade whose id is already journaled is left as stored;
    /// returns whether a row was written.
    pub async fn append_trade(&self, trade: &Trade) -> Result<bool, DatabaseError> {
        let rows_affected = sqlx::query(
            r#"
            INSERT INTO trades (id, symbol, chain, venue, side, size, price, fee, timestamp, status)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(&trade.id)
        .bind(&trade.symbol)
        .bind(&trade.chain)
        .bind(&trade.venue)
        .bind(trade.side.as_str())
        .bind(trade.size)
        .bind(trade.price)
        .bind(trade.fee)
        .bind(trade.timestamp)
        .bind(trade.status.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| query_error("append trade", e))?
        .rows_affected();

        if rows_affected == 0 {
            warn!("Trade {} already journaled, keeping the stored row", trade.id);
            return Ok(false);
        }
        debug!("Journaled trade {} {} {}", trade.id, trade.side, trade.symbol);
        Ok(true)
    }

    /// Settle a pending trade. Terminal trades are never rewritten.
    pub async fn settle_trade(&self, id: &str, status: TradeStatus) -> Result<(), DatabaseError> {
        let rows_affected = sqlx::query("UPDATE trades SET status = ?1 WHERE id = ?2 AND status = 'pending'")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| query_error("settle trade", e))?
            .rows_affected();

        if rows_affected == 0 {
            return Err(DatabaseError::QueryError(format!(
                "No pending trade with id {}",
                id
            )));
        }
        Ok(())
    }

    /// Most recent trades, newest first.
    pub async fn recent_trades(&self, limit: i64) -> Result<Vec<Trade>, DatabaseError> {
        let records = sqlx::query_as::<_, TradeRecord>(
            "SELECT * FROM trades ORDER BY timestamp DESC LIMIT ?1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_error("load trades", e))?;

        records.into_iter().map(Trade::try_from).collect()
    }

    /// Replace the account's checkpoint with `snapshot`, atomically.
    pub async fn save_ledger_snapshot(&self, snapshot: &LedgerSnapshot) -> Result<(), DatabaseError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| query_error("begin checkpoint", e))?;

        sqlx::query(
            r#"
            INSERT INTO ledger_state (account_id, balance, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(account_id) DO UPDATE SET balance = excluded.balance, updated_at = excluded.updated_at
            "#,
        )
        .bind(&snapshot.account_id)
        .bind(snapshot.balance)
        .bind(snapshot.taken_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| query_error("save ledger state", e))?;

        sqlx::query("DELETE FROM ledger_positions WHERE account_id = ?1")
            .bind(&snapshot.account_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| query_error("clear ledger positions", e))?;

        for position in &snapshot.positions {
            sqlx::query(
                r#"
                INSERT INTO ledger_positions (
                    account_id, symbol, chain, venue, side, size, entry_price,
                    current_price, leverage, stop_loss, take_profit, opened_at, updated_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                "#,
            )
            .bind(&snapshot.account_id)
            .bind(&position.symbol)
            .bind(&position.chain)
            .bind(&position.venue)
            .bind(position.side.as_str())
            .bind(position.size)
            .bind(position.entry_price)
            .bind(position.current_price)
            .bind(position.leverage)
            .bind(position.stop_loss)
            .bind(position.take_profit)
            .bind(position.opened_at)
            .bind(position.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| query_error("save ledger position", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| query_error("commit checkpoint", e))?;

        debug!(
            "Checkpointed ledger {} with {} positions",
            snapshot.account_id,
            snapshot.positions.len()
        );
        Ok(())
    }

    /// Last checkpoint for the account, if one was ever taken.
    pub async fn load_ledger_snapshot(
        &self,
        account_id: &str,
    ) -> Result<Option<LedgerSnapshot>, DatabaseError> {
        let state = sqlx::query_as::<_, LedgerStateRecord>(
            "SELECT * FROM ledger_state WHERE account_id = ?1",
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| query_error("load ledger state", e))?;

        let Some(state) = state else {
            return Ok(None);
        };

        let records = sqlx::query_as::<_, LedgerPositionRecord>(
            "SELECT * FROM ledger_positions WHERE account_id = ?1 ORDER BY symbol, chain, venue",
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_error("load ledger positions", e))?;

        let positions = records
            .into_iter()
            .map(Position::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        // The journal holds one account, so the whole trade history belongs to it.
        let trades = sqlx::query_as::<_, TradeRecord>(
            "SELECT * FROM trades ORDER BY timestamp ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_error("load trade history", e))?
        .into_iter()
        .map(Trade::try_from)
        .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(LedgerSnapshot {
            account_id: state.account_id,
            balance: state.balance,
            positions,
            trades,
            taken_at: state.updated_at,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::decision::{DecisionAction, ExecutionOutcome};
    use crate::domain::entities::position::{PositionKey, PositionSide};
    use crate::domain::entities::trade::TradeSide;
    use crate::domain::services::portfolio_ledger::PortfolioLedger;
    use crate::persistence::init_database;
    use chrono::Utc;

    async fn repo() -> JournalRepository {
        JournalRepository::new(init_database("sqlite::memory:").await.unwrap())
    }

    #[tokio::test]
    async fn test_decision_log_round_trip() {
        let repo = repo().await;
        let entry = DecisionLogEntry {
            timestamp: Utc::now(),
            asset: "BTC-USD".to_string(),
            decision: DecisionAction::Execute,
            confidence: 0.8,
            reasoning: "bullish".to_string(),
            outcome: ExecutionOutcome::Filled {
                order_id: "o-1".to_string(),
                fill_price: 50_000.0,
                fee: 0.1,
            },
        };
        repo.append_decision(&entry).await.unwrap();

        let loaded = repo.recent_decisions(10).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].asset, "BTC-USD");
        assert_eq!(loaded[0].decision, DecisionAction::Execute);
        assert_eq!(loaded[0].outcome, entry.outcome);
    }

    #[tokio::test]
    async fn test_trade_journal_and_settle() {
        let repo = repo().await;
        let key = PositionKey::new("ETH-USD", "ethereum", "uniswap");
        let mut trade = Trade::filled("t-1".into(), &key, TradeSide::Buy, 1.0, 3_000.0, 3.0, Utc::now());
        trade.status = TradeStatus::Pending;
        assert!(repo.append_trade(&trade).await.unwrap());

        // A repeated id keeps the first row.
        let mut replay = trade.clone();
        replay.price = 1.0;
        assert!(!repo.append_trade(&replay).await.unwrap());

        repo.settle_trade("t-1", TradeStatus::Filled).await.unwrap();
        assert!(repo.settle_trade("t-1", TradeStatus::Cancelled).await.is_err());

        let trades = repo.recent_trades(5).await.unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].status, TradeStatus::Filled);
        assert_eq!(trades[0].side, TradeSide::Buy);
    }

    #[tokio::test]
    async fn test_ledger_checkpoint_round_trip() {
        let repo = repo().await;
        assert!(repo.load_ledger_snapshot("paper").await.unwrap().is_none());

        let key = PositionKey::new("SOL-USD", "solana", "jupiter");
        let position = Position::open(&key, PositionSide::Short, 10.0, 150.0, 3.0, Utc::now())
            .unwrap()
            .with_stops(Some(153.0), Some(145.5));
        let snapshot = LedgerSnapshot {
            account_id: "paper".to_string(),
            balance: 9_500.0,
            positions: vec![position],
            trades: vec![],
            taken_at: Utc::now(),
        };
        repo.save_ledger_snapshot(&snapshot).await.unwrap();

        // A second checkpoint replaces the first.
        let emptied = LedgerSnapshot {
            positions: vec![],
            balance: 9_400.0,
            ..snapshot.clone()
        };
        repo.save_ledger_snapshot(&snapshot).await.unwrap();
        let loaded = repo.load_ledger_snapshot("paper").await.unwrap().unwrap();
        assert_eq!(loaded.positions.len(), 1);
        assert_eq!(loaded.positions[0].side, PositionSide::Short);
        assert_eq!(loaded.positions[0].stop_loss, Some(153.0));

        repo.save_ledger_snapshot(&emptied).await.unwrap();
        let loaded = repo.load_ledger_snapshot("paper").await.unwrap().unwrap();
        assert!(loaded.positions.is_empty());
        assert_eq!(loaded.balance, 9_400.0);
    }

    #[tokio::test]
    async fn test_checkpoint_load_brings_back_trade_history() {
        let repo = repo().await;
        let now = Utc::now();
        let key = PositionKey::new("BTC-USD", "hyperliquid", "hyperliquid");
        let earlier = now - chrono::Duration::minutes(5);
        repo.append_trade(&Trade::filled("t-2".into(), &key, TradeSide::Sell, 0.5, 50_100.0, 0.0, now))
            .await
            .unwrap();
        repo.append_trade(&Trade::filled("t-1".into(), &key, TradeSide::Buy, 0.5, 50_000.0, 0.0, earlier))
            .await
            .unwrap();
        let ledger = PortfolioLedger::new("paper", 1_000.0);
        repo.save_ledger_snapshot(&ledger.snapshot(now)).await.unwrap();

        let loaded = repo.load_ledger_snapshot("paper").await.unwrap().unwrap();
        let ids: Vec<_> = loaded.trades.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["t-1", "t-2"]);
    }
}
