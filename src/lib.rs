//! hedgepilot trading decision pipeline
//!
//! Signals, risk limits, opportunity scoring and the portfolio ledger, driven
//! tick by tick by the trading engine.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod persistence;
pub mod rate_limit;
pub mod task_runner;
