//! Trading Engine
//!
//! One tick refreshes balance and prices, takes protective exits, lets the risk
//! responder act, then runs signal, opportunity, decision and execution for every
//! asset. The engine owns the ledger and `tick` is its only writer.

use crate::config::TradingConfig;
use crate::domain::entities::decision::{
    DecisionAction, DecisionIntent, DecisionLogEntry, ExecutionOutcome, TradingDecision,
};
use crate::domain::entities::position::{price_key, Position, PositionKey, PositionSide};
use crate::domain::entities::trade::{Trade, TradeSide};
use crate::domain::errors::{DataError, EngineError, ExecutionError, LedgerError};
use crate::domain::repositories::execution_client::{
    ExecutionClient, ExecutionClients, ExecutionResult, OrderFill, OrderRequest,
};
use crate::domain::repositories::market_data::{
    BalanceSource, DataResult, MarketDataSource, ResearchSource,
};
use crate::domain::services::decision_evaluator::DecisionEvaluator;
use crate::domain::services::indicators::{price_change, Candle};
use crate::domain::services::opportunity::{MarketView, OpportunityGenerator};
use crate::domain::services::portfolio_ledger::PortfolioLedger;
use crate::domain::services::position_monitor::check_exits;
use crate::domain::services::rebalancer::{RebalanceAction, Rebalancer, RebalancerState};
use crate::domain::services::risk_engine::{RiskAssessment, RiskEngine};
use crate::domain::services::signal_engine::SignalEngine;
use crate::persistence::repository::JournalRepository;
use crate::persistence::DatabaseError;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// The external capabilities the engine consumes, one implementation each.
pub struct Collaborators {
    pub market_data: Arc<dyn MarketDataSource>,
    pub research: Arc<dyn ResearchSource>,
    pub balance: Arc<dyn BalanceSource>,
    pub execution: ExecutionClients,
}

/// Everything fetched for one asset this tick.
#[derive(Debug, Clone)]
struct SymbolData {
    candles: Vec<Candle>,
    price: f64,
    research_score: f64,
}

/// Decisions and trades produced during one tick, journaled at its end.
#[derive(Debug, Default)]
struct TickJournal {
    entries: Vec<DecisionLogEntry>,
    trades: Vec<Trade>,
}

async fn fetch_with_timeout<T>(
    limit: Duration,
    symbol: &str,
    what: &str,
    fut: impl Future<Output = DataResult<T>>,
) -> DataResult<T> {
    match timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(DataError::Timeout {
            symbol: symbol.to_string(),
            what: what.to_string(),
        }),
    }
}

async fn execute_with_timeout<T>(
    limit: Duration,
    venue: &str,
    fut: impl Future<Output = ExecutionResult<T>>,
) -> ExecutionResult<T> {
    match timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(ExecutionError::Timeout {
            venue: venue.to_string(),
        }),
    }
}

/// Log entry for an exit the engine forces on its own (stops, targets, risk responses).
fn forced_entry(
    key: &PositionKey,
    reasoning: String,
    outcome: ExecutionOutcome,
    now: DateTime<Utc>,
) -> DecisionLogEntry {
    DecisionLogEntry {
        timestamp: now,
        asset: key.symbol.clone(),
        decision: DecisionAction::Protect,
        confidence: 1.0,
        reasoning,
        outcome,
    }
}

pub struct TradingEngine {
    config: TradingConfig,
    ledger: PortfolioLedger,
    signal_engine: SignalEngine,
    risk_engine: RiskEngine,
    generator: OpportunityGenerator,
    evaluator: DecisionEvaluator,
    rebalancer: Rebalancer,
    collaborators: Collaborators,
    journal: Option<JournalRepository>,
    fetch_timeout: Duration,
    close_seq: u64,
}

impl TradingEngine {
    /// The ledger starts empty with a zero balance; the first tick pulls the real balance.
    pub fn new(config: TradingConfig, collaborators: Collaborators) -> Self {
        let ledger = PortfolioLedger::new(&config.account_id, 0.0);
        Self {
            ledger,
            signal_engine: SignalEngine::new(config.signal.clone()),
            risk_engine: RiskEngine::new(config.risk_limits.clone()),
            generator: OpportunityGenerator::new(
                config.evaluator.clone(),
                config.risk_limits.clone(),
                config.routes.clone(),
            ),
            evaluator: DecisionEvaluator::new(config.evaluator.clone()),
            rebalancer: Rebalancer::new(config.risk_limits.clone()),
            collaborators,
            journal: None,
            fetch_timeout: Duration::from_millis(config.fetch_timeout_milliseconds),
            close_seq: 0,
            config,
        }
    }

    pub fn with_journal(mut self, journal: JournalRepository) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Start from an existing ledger instead of an empty one.
    pub fn with_ledger(mut self, ledger: PortfolioLedger) -> Self {
        self.ledger = ledger;
        self
    }

    /// Replace the ledger with the last checkpoint, if there is one.
    pub async fn restore(&mut self) -> Result<bool, EngineError> {
        let Some(journal) = &self.journal else {
            return Ok(false);
        };
        let snapshot = journal
            .load_ledger_snapshot(&self.config.account_id)
            .await
            .map_err(|e| EngineError::Persistence(e.to_string()))?;

        match snapshot {
            Some(snapshot) => {
                let taken_at = snapshot.taken_at;
                self.ledger = PortfolioLedger::restore(snapshot)?;
                info!(
                    "Restored ledger {} from checkpoint at {}: {} positions, {} trades, balance {:.2}",
                    self.ledger.account_id(),
                    taken_at,
                    self.ledger.position_count(),
                    self.ledger.trades().len(),
                    self.ledger.balance()
                );
                Ok(true)
            }
            None => {
                info!("No ledger checkpoint for {}, starting fresh", self.config.account_id);
                Ok(false)
            }
        }
    }

    pub fn ledger(&self) -> &PortfolioLedger {
        &self.ledger
    }

    pub fn rebalancer_state(&self) -> RebalancerState {
        self.rebalancer.state()
    }

    pub fn is_halted(&self) -> bool {
        self.rebalancer.is_halted()
    }

    /// Operator override after a circuit-breaker halt.
    pub fn clear_halt(&mut self) {
        self.rebalancer.clear_halt();
    }

    fn halted_error(&self) -> EngineError {
        EngineError::TradingHalted {
            reason: self
                .rebalancer
                .halt_reason()
                .unwrap_or("risk limits breached")
                .to_string(),
        }
    }

    /// Run one full decision cycle and return its decision log.
    ///
    /// Whatever the cycle did is journaled before any error is returned.
    pub async fn tick(&mut self) -> Result<Vec<DecisionLogEntry>, EngineError> {
        if self.rebalancer.is_halted() {
            return Err(self.halted_error());
        }

        let now = Utc::now();
        let mut journal = TickJournal::default();
        self.run_cycle(now, &mut journal).await;

        let persisted = self.persist(&journal, now).await;
        if self.rebalancer.is_halted() {
            if let Err(e) = persisted {
                error!("Failed to journal halted tick: {}", e);
            }
            return Err(self.halted_error());
        }
        persisted?;
        Ok(journal.entries)
    }

    async fn run_cycle(&mut self, now: DateTime<Utc>, journal: &mut TickJournal) {
        self.refresh_balance().await;
        let market = self.fetch_market().await;
        self.refresh_prices(&market, now);
        self.take_exits(now, journal).await;

        let assessment = self.risk_engine.assess(&self.ledger, now);
        self.respond_to_risk(&assessment, now, journal).await;
        if self.rebalancer.is_halted() {
            return;
        }

        for (symbol, data) in &market {
            self.evaluate_symbol(symbol, data, now, journal).await;
        }

        let assessment = self.risk_engine.assess(&self.ledger, now);
        if assessment.has_critical() {
            self.respond_to_risk(&assessment, now, journal).await;
        }

        info!(
            "Tick complete: {}/{} assets with data, {} decisions, {} open positions, equity {:.2}",
            market.len(),
            self.config.symbols.len(),
            journal.entries.len(),
            self.ledger.position_count(),
            self.ledger.equity()
        );
    }

    async fn refresh_balance(&mut self) {
        let account_id = self.ledger.account_id().to_string();
        let result = fetch_with_timeout(
            self.fetch_timeout,
            &account_id,
            "balance",
            self.collaborators.balance.get_balance(&account_id),
        )
        .await;

        match result {
            Ok(balance) => {
                if let Err(e) = self.ledger.update_balance(balance) {
                    warn!("Ignoring balance from source: {}", e);
                }
            }
            Err(e) => warn!(
                "Balance refresh failed, keeping {:.2}: {}",
                self.ledger.balance(),
                e
            ),
        }
    }

    /// Fan out every asset's fetches at once; failed assets are dropped for this tick.
    async fn fetch_market(&self) -> Vec<(String, SymbolData)> {
        let fetches = self
            .config
            .symbols
            .iter()
            .map(|symbol| self.fetch_symbol(symbol));
        let results = join_all(fetches).await;

        self.config
            .symbols
            .iter()
            .zip(results)
            .filter_map(|(symbol, result)| match result {
                Ok(data) => Some((symbol.clone(), data)),
                Err(e) => {
                    warn!("Skipping {} this tick: {}", symbol, e);
                    None
                }
            })
            .collect()
    }

    async fn fetch_symbol(&self, symbol: &str) -> DataResult<SymbolData> {
        let limit = self.fetch_timeout;
        let c = &self.collaborators;
        let (candles, price, research) = tokio::join!(
            fetch_with_timeout(
                limit,
                symbol,
                "ohlcv",
                c.market_data.get_ohlcv(
                    symbol,
                    &self.config.ohlcv_timeframe,
                    self.config.ohlcv_lookback
                )
            ),
            fetch_with_timeout(limit, symbol, "price", c.market_data.get_current_price(symbol)),
            fetch_with_timeout(limit, symbol, "research", c.research.get_confidence_score(symbol)),
        );

        let candles = candles?;
        if candles.is_empty() {
            return Err(DataError::EmptySeries {
                symbol: symbol.to_string(),
            });
        }
        let price = price?;
        if !(price.is_finite() && price > 0.0) {
            return Err(DataError::Malformed {
                symbol: symbol.to_string(),
                reason: format!("price {}", price),
            });
        }
        let research_score = research?;
        if !(0.0..=1.0).contains(&research_score) {
            return Err(DataError::Malformed {
                symbol: symbol.to_string(),
                reason: format!("research score {} outside [0, 1]", research_score),
            });
        }

        Ok(SymbolData {
            candles,
            price,
            research_score,
        })
    }

    /// Mark every open position whose asset was quoted this tick.
    fn refresh_prices(&mut self, market: &[(String, SymbolData)], now: DateTime<Utc>) {
        let quotes: HashMap<&str, f64> = market
            .iter()
            .map(|(symbol, data)| (symbol.as_str(), data.price))
            .collect();
        let prices: HashMap<String, f64> = self
            .ledger
            .positions()
            .filter_map(|p| {
                quotes
                    .get(p.symbol.as_str())
                    .map(|&price| (price_key(&p.symbol, &p.chain), price))
            })
            .collect();

        if prices.len() < self.ledger.position_count() {
            debug!(
                "{} of {} positions have no quote this tick",
                self.ledger.position_count() - prices.len(),
                self.ledger.position_count()
            );
        }
        self.ledger.update_position_prices(&prices, now);
    }

    async fn take_exits(&mut self, now: DateTime<Utc>, journal: &mut TickJournal) {
        for exit in check_exits(&self.ledger) {
            let reasoning = format!(
                "{} hit on {} {}: price {:.4} crossed {:.4}",
                exit.reason.as_str(),
                exit.side,
                exit.key,
                exit.current_price,
                exit.trigger_price
            );
            warn!("🛑 {}", reasoning);
            let outcome = self.close(&exit.key, now, journal).await;
            journal
                .entries
                .push(forced_entry(&exit.key, reasoning, outcome, now));
        }
    }

    /// Advance the responder and carry out the actions that close positions.
    async fn respond_to_risk(
        &mut self,
        assessment: &RiskAssessment,
        now: DateTime<Utc>,
        journal: &mut TickJournal,
    ) {
        for alert in &assessment.alerts {
            warn!(
                "Risk alert [{}] {}",
                alert.severity.as_str(),
                alert.message
            );
        }

        let actions = self.rebalancer.respond(assessment, &self.ledger);
        for action in actions {
            match &action.target {
                Some(key) if action.kind.closes_position() => {
                    self.apply_close_action(&action, key, now, journal).await;
                }
                _ => warn!(
                    "Risk responder advises {}: {} (impact {:.2})",
                    action.kind.as_str(),
                    action.reason,
                    action.estimated_impact
                ),
            }
        }
    }

    async fn apply_close_action(
        &mut self,
        action: &RebalanceAction,
        key: &PositionKey,
        now: DateTime<Utc>,
        journal: &mut TickJournal,
    ) {
        warn!(
            "Risk responder: {} {} ({}, impact {:.2})",
            action.kind.as_str(),
            key,
            action.reason,
            action.estimated_impact
        );
        let outcome = self.close(key, now, journal).await;
        let reasoning = format!("{} {} | {}", action.kind.as_str(), key, action.reason);
        journal
            .entries
            .push(forced_entry(key, reasoning, outcome, now));
    }

    async fn evaluate_symbol(
        &mut self,
        symbol: &str,
        data: &SymbolData,
        now: DateTime<Utc>,
        journal: &mut TickJournal,
    ) {
        let analysis = match self.signal_engine.analyze(symbol, &data.candles) {
            Ok(analysis) => analysis,
            Err(e) => {
                warn!("Skipping {}: {}", symbol, e);
                return;
            }
        };
        let Some(signal) = analysis.signal.as_ref() else {
            debug!("{}: no indicator votes, no signal", symbol);
            return;
        };
        debug!(
            "{}: {} signal, strength {:.2}",
            symbol,
            signal.kind.as_str(),
            signal.strength
        );

        let assessment = self.risk_engine.assess(&self.ledger, now);
        let view = MarketView {
            symbol,
            signal,
            rsi: analysis.indicators.rsi,
            price_change: price_change(&data.candles, self.config.evaluator.price_change_lookback),
            current_price: data.price,
            research_score: data.research_score,
        };
        let Some(opportunity) = self
            .generator
            .generate(&view, &assessment.metrics, &self.ledger, now)
        else {
            return;
        };

        let decision =
            self.evaluator
                .evaluate(opportunity, &assessment, &self.risk_engine, &self.ledger, now);
        info!(
            "📊 {} {:?} on {} -> {} (confidence {:.2}): {}",
            symbol,
            decision.opportunity.signal,
            decision.opportunity.route,
            decision.action.as_str(),
            decision.opportunity.confidence,
            decision.reason
        );

        let outcome = if decision.is_execute() {
            match decision.intent {
                DecisionIntent::Open => self.open(&decision, now, journal).await,
                DecisionIntent::Close => {
                    match self.ledger.position_for_symbol(symbol).map(Position::key) {
                        Some(key) => self.close(&key, now, journal).await,
                        None => ExecutionOutcome::NotAttempted,
                    }
                }
            }
        } else {
            ExecutionOutcome::NotAttempted
        };

        journal
            .entries
            .push(DecisionLogEntry::from_decision(&decision, outcome));
    }

    fn client_for(&self, venue: &str) -> ExecutionResult<Arc<dyn ExecutionClient>> {
        self.collaborators
            .execution
            .get(venue)
            .cloned()
            .ok_or_else(|| ExecutionError::NoClientForVenue(venue.to_string()))
    }

    /// Place the opening order. A failed order, or a fill the ledger cannot
    /// accept, leaves the ledger untouched.
    async fn open(
        &mut self,
        decision: &TradingDecision,
        now: DateTime<Utc>,
        journal: &mut TickJournal,
    ) -> ExecutionOutcome {
        let opportunity = &decision.opportunity;
        let Some(side) = opportunity.signal.position_side() else {
            return ExecutionOutcome::NotAttempted;
        };
        let key = opportunity.position_key();
        let order = OrderRequest {
            symbol: opportunity.symbol.clone(),
            side,
            size: opportunity.base_size(),
            leverage: opportunity.recommended_leverage,
            stop_loss: Some(opportunity.stop_loss),
            take_profit: Some(opportunity.take_profit),
            reference_price: opportunity.entry_price,
        };

        let result = match self.client_for(&key.venue) {
            Ok(client) => {
                execute_with_timeout(self.fetch_timeout, &key.venue, client.place_order(&order))
                    .await
            }
            Err(e) => Err(e),
        };
        let fill = match result {
            Ok(fill) => fill,
            Err(e) => {
                error!("❌ Order for {} failed: {}", key, e);
                return ExecutionOutcome::Failed {
                    error: e.to_string(),
                };
            }
        };

        let trade = match self.record_fill(&key, side, &order, &fill, now) {
            Ok(trade) => trade,
            Err(e) => {
                error!(
                    "❌ {} filled order {} for {} but the ledger rejected it: {}",
                    key.venue, fill.order_id, key, e
                );
                return ExecutionOutcome::Failed {
                    error: format!("order {} filled but not recorded: {}", fill.order_id, e),
                };
            }
        };
        journal.trades.push(trade);

        info!(
            "✅ Opened {} {} size {:.6} @ {:.4} ({:.1}x, order {})",
            side, key, order.size, fill.fill_price, order.leverage, fill.order_id
        );
        ExecutionOutcome::Filled {
            order_id: fill.order_id,
            fill_price: fill.fill_price,
            fee: fill.fee,
        }
    }

    /// Apply an opening fill to the ledger. Every check runs before the first write.
    fn record_fill(
        &mut self,
        key: &PositionKey,
        side: PositionSide,
        order: &OrderRequest,
        fill: &OrderFill,
        now: DateTime<Utc>,
    ) -> Result<Trade, LedgerError> {
        let position = Position::open(key, side, order.size, fill.fill_price, order.leverage, now)?
            .with_stops(order.stop_loss, order.take_profit);
        let balance = self.ledger.balance() - fill.fee;
        if !balance.is_finite() {
            return Err(LedgerError::InvalidBalance(balance));
        }
        let trade = Trade::filled(
            fill.order_id.clone(),
            key,
            TradeSide::opening(side),
            order.size,
            fill.fill_price,
            fill.fee,
            now,
        );

        self.ledger.add_trade(trade.clone())?;
        self.ledger.add_position(position)?;
        self.ledger.update_balance(balance)?;
        Ok(trade)
    }

    fn next_close_id(&mut self, key: &PositionKey, now: DateTime<Utc>) -> String {
        self.close_seq += 1;
        format!("close-{}-{}-{}", key, now.timestamp_millis(), self.close_seq)
    }

    /// Flatten `key` on its venue. A failed close leaves the ledger untouched.
    async fn close(
        &mut self,
        key: &PositionKey,
        now: DateTime<Utc>,
        journal: &mut TickJournal,
    ) -> ExecutionOutcome {
        let Some(position) = self.ledger.position(key).cloned() else {
            return ExecutionOutcome::NotAttempted;
        };

        let result = match self.client_for(&key.venue) {
            Ok(client) => {
                execute_with_timeout(self.fetch_timeout, &key.venue, client.close_position(&key.symbol))
                    .await
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(Some(fill)) => {
                // The venue is flat now, so the position leaves the ledger regardless.
                self.ledger.close_position(key);
                if let Err(e) = self.ledger.update_balance(self.ledger.balance() + fill.pnl) {
                    warn!("Closed {} with unusable pnl, balance waits for refresh: {}", key, e);
                }

                let trade = Trade::filled(
                    self.next_close_id(key, now),
                    key,
                    TradeSide::closing(position.side),
                    position.size,
                    fill.fill_price,
                    0.0,
                    now,
                );
                match self.ledger.add_trade(trade.clone()) {
                    Ok(()) => journal.trades.push(trade),
                    Err(e) => error!("Closing trade for {} not recorded: {}", key, e),
                }

                info!(
                    "Closed {} {} @ {:.4}, realized {:.4}",
                    position.side, key, fill.fill_price, fill.pnl
                );
                ExecutionOutcome::Closed {
                    fill_price: fill.fill_price,
                    pnl: fill.pnl,
                }
            }
            Ok(None) => {
                warn!(
                    "{} reports no open position for {}, dropping it from the ledger",
                    key.venue, key
                );
                self.ledger.close_position(key);
                ExecutionOutcome::NotAttempted
            }
            Err(e) => {
                error!("❌ Failed to close {}: {}", key, e);
                ExecutionOutcome::Failed {
                    error: e.to_string(),
                }
            }
        }
    }

    /// Journal the tick. Each write is attempted even after an earlier one fails;
    /// the first failure is returned.
    async fn persist(&self, journal: &TickJournal, now: DateTime<Utc>) -> Result<(), EngineError> {
        let Some(repo) = &self.journal else {
            return Ok(());
        };
        let mut first_error: Option<DatabaseError> = None;

        for trade in &journal.trades {
            if let Err(e) = repo.append_trade(trade).await {
                first_error.get_or_insert(e);
            }
        }
        for entry in &journal.entries {
            if let Err(e) = repo.append_decision(entry).await {
                first_error.get_or_insert(e);
            }
        }
        if let Err(e) = repo.save_ledger_snapshot(&self.ledger.snapshot(now)).await {
            first_error.get_or_insert(e);
        }

        match first_error {
            Some(e) => Err(EngineError::Persistence(e.to_string())),
            None => Ok(()),
        }
    }
}
