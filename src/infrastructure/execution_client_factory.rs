//! Execution Client Factory
//!
//! Builds one execution client per configured venue. Clients are created once and
//! shared with the engine, keyed by venue name.

use crate::config::VenueRoutes;
use crate::domain::repositories::execution_client::{ExecutionClient, ExecutionClients};
use crate::domain::repositories::market_data::MarketDataSource;
use crate::infrastructure::paper_execution::{PaperAccount, PaperExecutionClient};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

pub struct ExecutionClientFactory;

impl ExecutionClientFactory {
    /// One paper venue per distinct venue in `routes`, all settling into `account`.
    pub fn create_paper(
        routes: &VenueRoutes,
        market_data: Arc<dyn MarketDataSource>,
        account: &PaperAccount,
        fee_rate: f64,
    ) -> ExecutionClients {
        let mut clients: ExecutionClients = HashMap::new();

        for route in routes.all() {
            if clients.contains_key(&route.venue) {
                continue;
            }
            let client = PaperExecutionClient::new(
                &route.venue,
                market_data.clone(),
                account.clone(),
                fee_rate,
            );
            info!("✓ Paper execution client created for {}", route);
            clients.insert(route.venue.clone(), Arc::new(client) as Arc<dyn ExecutionClient>);
        }

        info!("ExecutionClientFactory created {} execution clients", clients.len());
        clients
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::venue::VenueRoute;
    use crate::domain::errors::DataError;
    use crate::domain::repositories::market_data::DataResult;
    use crate::domain::services::indicators::Candle;
    use async_trait::async_trait;

    struct NoData;

    #[async_trait]
    impl MarketDataSource for NoData {
        async fn get_ohlcv(&self, symbol: &str, _: &str, _: usize) -> DataResult<Vec<Candle>> {
            Err(DataError::EmptySeries {
                symbol: symbol.to_string(),
            })
        }

        async fn get_current_price(&self, symbol: &str) -> DataResult<f64> {
            Err(DataError::EmptySeries {
                symbol: symbol.to_string(),
            })
        }
    }

    #[test]
    fn test_one_client_per_venue() {
        let account = PaperAccount::new("paper", 1_000.0);
        let clients = ExecutionClientFactory::create_paper(
            &VenueRoutes::default(),
            Arc::new(NoData),
            &account,
            0.001,
        );
        assert_eq!(clients.len(), 4);
        for venue in ["hyperliquid", "jupiter", "aerodrome", "uniswap"] {
            assert_eq!(clients[venue].name(), venue);
        }
    }

    #[test]
    fn test_shared_venue_is_created_once() {
        let routes = VenueRoutes {
            fast: VenueRoute::new("arbitrum", "uniswap"),
            ..VenueRoutes::default()
        };
        let account = PaperAccount::new("paper", 1_000.0);
        let clients = ExecutionClientFactory::create_paper(&routes, Arc::new(NoData), &account, 0.0);
        assert_eq!(clients.len(), 3);
    }
}
