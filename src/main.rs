use hedgepilot::application::trading_engine::{Collaborators, TradingEngine};
use hedgepilot::config::TradingConfig;
use hedgepilot::infrastructure::binance_market_data::BinanceMarketData;
use hedgepilot::infrastructure::execution_client_factory::ExecutionClientFactory;
use hedgepilot::infrastructure::paper_execution::PaperAccount;
use hedgepilot::infrastructure::static_research::StaticResearchSource;
use hedgepilot::persistence::init_database;
use hedgepilot::persistence::repository::JournalRepository;
use hedgepilot::rate_limit::{create_rate_limiter, RateLimiterConfig};
use hedgepilot::task_runner::{run_tick_loop, LoopConfig};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(e) = dotenvy::dotenv() {
        // A missing .env is normal; the process environment still applies.
        if !e.not_found() {
            eprintln!("Failed to load .env: {}", e);
        }
    }

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hedgepilot=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = TradingConfig::from_env();
    config.validate()?;

    info!("hedgepilot starting for account {}", config.account_id);
    info!("Symbols: {}", config.symbols.join(", "));
    info!(
        "Limits: position {:.2}, leverage {:.1}x, daily volume {:.2}, drawdown {:.2}",
        config.risk_limits.max_position_size,
        config.risk_limits.max_leverage,
        config.risk_limits.max_daily_volume,
        config.risk_limits.max_drawdown
    );

    let limiter = create_rate_limiter(&RateLimiterConfig {
        requests_per_minute: config.market_data_requests_per_minute,
    });
    let market_data = Arc::new(BinanceMarketData::new(
        &config.market_data_base_url,
        Duration::from_millis(config.fetch_timeout_milliseconds),
        limiter,
    )?);

    let account = PaperAccount::new(&config.account_id, config.paper_initial_balance);
    let execution = ExecutionClientFactory::create_paper(
        &config.routes,
        market_data.clone(),
        &account,
        config.paper_fee_rate,
    );

    let collaborators = Collaborators {
        market_data,
        research: Arc::new(StaticResearchSource::new(config.research_score)),
        balance: Arc::new(account.clone()),
        execution,
    };

    let loop_config = LoopConfig {
        tick_interval: Duration::from_secs(config.tick_interval_seconds),
        retry_backoff: Duration::from_secs(config.tick_backoff_seconds),
    };

    let mut engine = TradingEngine::new(config.clone(), collaborators);
    if config.persistence_enabled {
        let pool = init_database(&config.database_url).await?;
        engine = engine.with_journal(JournalRepository::new(pool));
        if engine.restore().await? && engine.ledger().position_count() > 0 {
            warn!(
                "Resuming with {} restored positions; paper venues start flat",
                engine.ledger().position_count()
            );
        }
    } else {
        warn!("Persistence disabled: decisions and ledger state are not journaled");
    }

    let shutdown_signal = async {
        let ctrl_c = async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received Ctrl+C signal"),
                Err(e) => error!("Failed to install Ctrl+C handler: {}", e),
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sig) => {
                    sig.recv().await;
                    info!("Received SIGTERM signal");
                }
                Err(e) => error!("Failed to install SIGTERM handler: {}", e),
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
    };

    info!("Trading loop started. Press Ctrl+C to stop.");
    tokio::select! {
        halted = run_tick_loop("trading_engine", &loop_config, &mut engine) => {
            error!("Trading halted, operator action required");
            return Err(halted.into());
        }
        _ = shutdown_signal => {
            info!("Shutting down gracefully...");
        }
    }

    info!(
        "Shutdown complete: {} open positions, balance {:.2}",
        engine.ledger().position_count(),
        engine.ledger().balance()
    );
    Ok(())
}
