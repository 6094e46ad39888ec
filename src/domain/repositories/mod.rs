pub mod execution_client;
pub mod market_data;
