//! Execution Client Trait
//!
//! One implementation per venue. The engine only ever talks to venues through this
//! trait, so venue-specific signing, routing and settlement stay out of the core.

use crate::domain::entities::position::PositionSide;
use crate::domain::errors::ExecutionError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Common result type for execution operations
pub type ExecutionResult<T> = Result<T, ExecutionError>;

/// Execution clients keyed by venue name.
pub type ExecutionClients = HashMap<String, Arc<dyn ExecutionClient>>;

/// Order handed to a venue. `size` is in base units.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: PositionSide,
    pub size: f64,
    pub leverage: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    /// Price the decision was made at; venues may fill elsewhere.
    pub reference_price: f64,
}

impl OrderRequest {
    pub fn validate(&self) -> ExecutionResult<()> {
        if !(self.size.is_finite() && self.size > 0.0) {
            return Err(ExecutionError::InvalidOrder(format!(
                "size must be > 0, got {}",
                self.size
            )));
        }
        if !(self.leverage.is_finite() && self.leverage >= 1.0) {
            return Err(ExecutionError::InvalidOrder(format!(
                "leverage must be >= 1, got {}",
                self.leverage
            )));
        }
        if !(self.reference_price.is_finite() && self.reference_price > 0.0) {
            return Err(ExecutionError::InvalidOrder(format!(
                "reference price must be > 0, got {}",
                self.reference_price
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderFill {
    pub order_id: String,
    pub fill_price: f64,
    pub fee: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CloseFill {
    pub fill_price: f64,
    /// Realized pnl as reported by the venue.
    pub pnl: f64,
}

#[async_trait]
pub trait ExecutionClient: Send + Sync {
    /// Venue name, matching the `venue` part of a route.
    fn name(&self) -> &str;

    /// Place an order and wait for its fill.
    async fn place_order(&self, order: &OrderRequest) -> ExecutionResult<OrderFill>;

    /// Flatten the position on `symbol`.
    ///
    /// # Returns
    /// `None` when there is no position to close; calling twice is harmless.
    async fn close_position(&self, symbol: &str) -> ExecutionResult<Option<CloseFill>>;
}
