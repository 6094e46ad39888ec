//! Paper trading venue
//!
//! Simulated fills against live prices. Every paper venue settles into one shared
//! [`PaperAccount`], which doubles as the engine's balance source.

use crate::domain::entities::position::PositionSide;
use crate::domain::errors::{DataError, ExecutionError};
use crate::domain::repositories::execution_client::{
    CloseFill, ExecutionClient, ExecutionResult, OrderFill, OrderRequest,
};
use crate::domain::repositories::market_data::{BalanceSource, DataResult, MarketDataSource};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Cash balance shared by all paper venues.
#[derive(Debug, Clone)]
pub struct PaperAccount {
    account_id: String,
    balance: Arc<Mutex<f64>>,
}

impl PaperAccount {
    pub fn new(account_id: &str, initial_balance: f64) -> Self {
        Self {
            account_id: account_id.to_string(),
            balance: Arc::new(Mutex::new(initial_balance)),
        }
    }

    pub async fn balance(&self) -> f64 {
        *self.balance.lock().await
    }

    async fn credit(&self, amount: f64) -> f64 {
        let mut balance = self.balance.lock().await;
        *balance += amount;
        *balance
    }
}

#[async_trait]
impl BalanceSource for PaperAccount {
    async fn get_balance(&self, account_id: &str) -> DataResult<f64> {
        if account_id != self.account_id {
            return Err(DataError::Unavailable {
                symbol: "*".to_string(),
                what: "balance".to_string(),
                reason: format!("unknown paper account {}", account_id),
            });
        }
        Ok(self.balance().await)
    }
}

#[derive(Debug, Clone, PartialEq)]
struct PaperPosition {
    side: PositionSide,
    size: f64,
    entry_price: f64,
}

pub struct PaperExecutionClient {
    venue: String,
    market_data: Arc<dyn MarketDataSource>,
    account: PaperAccount,
    fee_rate: f64,
    positions: Mutex<HashMap<String, PaperPosition>>,
    /// Start time in ms; keeps order ids unique across restarts.
    session: i64,
    next_order_id: AtomicU64,
}

impl PaperExecutionClient {
    pub fn new(
        venue: &str,
        market_data: Arc<dyn MarketDataSource>,
        account: PaperAccount,
        fee_rate: f64,
    ) -> Self {
        Self {
            venue: venue.to_string(),
            market_data,
            account,
            fee_rate: fee_rate.max(0.0),
            positions: Mutex::new(HashMap::new()),
            session: Utc::now().timestamp_millis(),
            next_order_id: AtomicU64::new(1),
        }
    }

    fn order_id(&self) -> String {
        let seq = self.next_order_id.fetch_add(1, Ordering::SeqCst);
        format!("paper-{}-{}-{}", self.venue, self.session, seq)
    }

    pub async fn open_size(&self, symbol: &str) -> Option<f64> {
        self.positions.lock().await.get(symbol).map(|p| p.size)
    }
}

#[async_trait]
impl ExecutionClient for PaperExecutionClient {
    fn name(&self) -> &str {
        &self.venue
    }

    async fn place_order(&self, order: &OrderRequest) -> ExecutionResult<OrderFill> {
        order.validate()?;

        // The order's reference price is this tick's observed price.
        let fill_price = match self.market_data.get_current_price(&order.symbol).await {
            Ok(price) if price.is_finite() && price > 0.0 => price,
            Ok(price) => {
                warn!("Paper {}: ignoring bad mark {} for {}", self.venue, price, order.symbol);
                order.reference_price
            }
            Err(e) => {
                debug!("Paper {}: no live price for {} ({}), using reference", self.venue, order.symbol, e);
                order.reference_price
            }
        };

        let mut positions = self.positions.lock().await;
        if let Some(existing) = positions.get_mut(&order.symbol) {
            if existing.side != order.side {
                return Err(ExecutionError::OrderRejected {
                    venue: self.venue.clone(),
                    reason: format!(
                        "{} position open on {}, close it before reversing",
                        existing.side, order.symbol
                    ),
                });
            }
            let size = existing.size + order.size;
            existing.entry_price =
                (existing.entry_price * existing.size + fill_price * order.size) / size;
            existing.size = size;
        } else {
            positions.insert(
                order.symbol.clone(),
                PaperPosition {
                    side: order.side,
                    size: order.size,
                    entry_price: fill_price,
                },
            );
        }
        drop(positions);

        let fee = order.size * fill_price * self.fee_rate;
        let balance = self.account.credit(-fee).await;
        let order_id = self.order_id();
        info!(
            "Paper {} filled {} {} {} @ {:.4} (fee {:.4}, balance {:.2})",
            self.venue, order_id, order.side, order.symbol, fill_price, fee, balance
        );

        Ok(OrderFill {
            order_id,
            fill_price,
            fee,
        })
    }

    async fn close_position(&self, symbol: &str) -> ExecutionResult<Option<CloseFill>> {
        let fill_price = self
            .market_data
            .get_current_price(symbol)
            .await
            .map_err(|e| ExecutionError::Network {
                venue: self.venue.clone(),
                reason: e.to_string(),
            })?;

        let Some(position) = self.positions.lock().await.remove(symbol) else {
            debug!("Paper {}: no open position on {}", self.venue, symbol);
            return Ok(None);
        };

        let gross = match position.side {
            PositionSide::Long => (fill_price - position.entry_price) * position.size,
            PositionSide::Short => (position.entry_price - fill_price) * position.size,
        };
        let fee = position.size * fill_price * self.fee_rate;
        let pnl = gross - fee;
        let balance = self.account.credit(pnl).await;
        info!(
            "Paper {} closed {} {} @ {:.4}, realized {:.4} (balance {:.2})",
            self.venue, position.side, symbol, fill_price, pnl, balance
        );

        Ok(Some(CloseFill { fill_price, pnl }))
    }
}
