pub mod binance_market_data;
pub mod execution_client_factory;
pub mod paper_execution;
pub mod static_research;
