//! Persistence Layer
//!
//! SQLite journal for the decision log, trade history and ledger checkpoints,
//! via sqlx. Ledger state survives restarts through the last checkpoint.
//!
//! # Database Schema
//!
//! ## decision_log
//! - id: autoincrement
//! - timestamp, asset, decision ("execute" | "monitor" | "skip"), confidence, reasoning
//! - outcome: JSON-encoded execution outcome
//!
//! ## trades
//! - id: venue order id or generated id
//! - symbol, chain, venue, side ("buy" | "sell"), size, price, fee, timestamp
//! - status: "pending" | "filled" | "cancelled"
//!
//! ## ledger_state / ledger_positions
//! - one balance row per account, plus the open positions at the last checkpoint

pub mod models;
pub mod repository;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tracing::info;

/// Database connection pool
pub type DbPool = SqlitePool;

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Database connection error: {0}")]
    ConnectionError(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    MigrationError(String),

    #[error("Query error: {0}")]
    QueryError(String),

    #[error("Corrupt record: {0}")]
    CorruptRecord(String),
}

/// Initialize the database connection pool and run migrations
///
/// # Arguments
/// - `database_url`: e.g. "sqlite://data/hedgepilot.db", or "sqlite::memory:" in tests
pub async fn init_database(database_url: &str) -> Result<DbPool, DatabaseError> {
    info!("Initializing database: {}", database_url);

    if let Some(db_path) = database_url.strip_prefix("sqlite://") {
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    DatabaseError::ConnectionError(sqlx::Error::Configuration(Box::new(e)))
                })?;
            }
        }
    }

    let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

    // Every connection to an in-memory database sees its own empty database.
    let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;

    run_migrations(&pool).await?;

    info!("Database initialized");
    Ok(pool)
}

const MIGRATIONS: &[(&str, &str)] = &[
    (
        "decision_log",
        r#"
        CREATE TABLE IF NOT EXISTS decision_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp DATETIME NOT NULL,
            asset TEXT NOT NULL,
            decision TEXT NOT NULL CHECK(decision IN ('execute', 'monitor', 'skip')),
            confidence REAL NOT NULL,
            reasoning TEXT NOT NULL,
            outcome TEXT NOT NULL
        )
        "#,
    ),
    (
        "trades",
        r#"
        CREATE TABLE IF NOT EXISTS trades (
            id TEXT PRIMARY KEY,
            symbol TEXT NOT NULL,
            chain TEXT NOT NULL,
            venue TEXT NOT NULL,
            side TEXT NOT NULL CHECK(side IN ('buy', 'sell')),
            size REAL NOT NULL,
            price REAL NOT NULL,
            fee REAL NOT NULL DEFAULT 0.0,
            timestamp DATETIME NOT NULL,
            status TEXT NOT NULL CHECK(status IN ('pending', 'filled', 'cancelled'))
        )
        "#,
    ),
    (
        "ledger_state",
        r#"
        CREATE TABLE IF NOT EXISTS ledger_state (
            account_id TEXT PRIMARY KEY,
            balance REAL NOT NULL,
            updated_at DATETIME NOT NULL
        )
        "#,
    ),
    (
        "ledger_positions",
        r#"
        CREATE TABLE IF NOT EXISTS ledger_positions (
            account_id TEXT NOT NULL,
            symbol TEXT NOT NULL,
            chain TEXT NOT NULL,
            venue TEXT NOT NULL,
            side TEXT NOT NULL CHECK(side IN ('long', 'short')),
            size REAL NOT NULL,
            entry_price REAL NOT NULL,
            current_price REAL NOT NULL,
            leverage REAL NOT NULL,
            stop_loss REAL,
            take_profit REAL,
            opened_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL,
            PRIMARY KEY (account_id, symbol, chain, venue)
        )
        "#,
    ),
    (
        "idx_decision_log_timestamp",
        "CREATE INDEX IF NOT EXISTS idx_decision_log_timestamp ON decision_log(timestamp)",
    ),
    (
        "idx_trades_timestamp",
        "CREATE INDEX IF NOT EXISTS idx_trades_timestamp ON trades(timestamp)",
    ),
    (
        "idx_trades_symbol",
        "CREATE INDEX IF NOT EXISTS idx_trades_symbol ON trades(symbol)",
    ),
];

/// Run database migrations. Every statement is idempotent.
async fn run_migrations(pool: &DbPool) -> Result<(), DatabaseError> {
    info!("Running database migrations...");

    for (name, statement) in MIGRATIONS {
        sqlx::query(statement).execute(pool).await.map_err(|e| {
            DatabaseError::MigrationError(format!("Failed to create {}: {}", name, e))
        })?;
    }

    info!("Database migrations completed");
    Ok(())
}
