pub mod decision_evaluator;
pub mod indicators;
pub mod opportunity;
pub mod portfolio_ledger;
pub mod position_monitor;
pub mod rebalancer;
pub mod risk_engine;
pub mod signal_engine;
