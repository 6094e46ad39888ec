/// Task Runner for the trading loop
///
/// Runs one tick per interval. A failed tick is logged and retried after a
/// fixed backoff; a fatal error (circuit-breaker halt) ends the loop.

use crate::application::trading_engine::TradingEngine;
use crate::domain::errors::EngineError;
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, warn};

/// Loop timing
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Delay between successful ticks
    pub tick_interval: Duration,
    /// Delay before retrying after a failed tick
    pub retry_backoff: Duration,
}

/// One unit of periodic work.
#[async_trait]
pub trait TickTask: Send {
    async fn run_tick(&mut self) -> Result<(), EngineError>;
}

#[async_trait]
impl TickTask for TradingEngine {
    async fn run_tick(&mut self) -> Result<(), EngineError> {
        let entries = self.tick().await?;
        debug!("Tick produced {} decision log entries", entries.len());
        Ok(())
    }
}

/// Internal failure bookkeeping, for logging only
#[derive(Debug, Default)]
struct FailureState {
    consecutive_failures: u32,
}

/// Run `task` until it returns a fatal error, which is handed back to the caller.
///
/// # Arguments
/// * `task_name` - Name of the task for logging purposes
/// * `config` - Loop timing
/// * `task` - The task to tick
pub async fn run_tick_loop<T: TickTask>(
    task_name: &str,
    config: &LoopConfig,
    task: &mut T,
) -> EngineError {
    let mut state = FailureState::default();

    loop {
        match task.run_tick().await {
            Ok(()) => {
                if state.consecutive_failures > 0 {
                    warn!(
                        "Task '{}' recovered after {} failures",
                        task_name, state.consecutive_failures
                    );
                }
                state.consecutive_failures = 0;
                sleep(config.tick_interval).await;
            }
            Err(e) if e.is_fatal() => {
                error!("Task '{}' stopped: {}", task_name, e);
                return e;
            }
            Err(e) => {
                state.consecutive_failures += 1;
                error!(
                    "Task '{}' failed (attempt {}): {}",
                    task_name, state.consecutive_failures, e
                );
                warn!(
                    "Task '{}' will retry in {:?}",
                    task_name, config.retry_backoff
                );
                sleep(config.retry_backoff).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::DataError;

    /// Fails `failures` times, succeeds `successes` times, then halts.
    struct ScriptedTask {
        failures: u32,
        successes: u32,
        calls: u32,
    }

    #[async_trait]
    impl TickTask for ScriptedTask {
        async fn run_tick(&mut self) -> Result<(), EngineError> {
            self.calls += 1;
            if self.calls <= self.failures {
                Err(EngineError::Data(DataError::EmptySeries {
                    symbol: "BTC-USD".to_string(),
                }))
            } else if self.calls <= self.failures + self.successes {
                Ok(())
            } else {
                Err(EngineError::TradingHalted {
                    reason: "drawdown".to_string(),
                })
            }
        }
    }

    fn fast() -> LoopConfig {
        LoopConfig {
            tick_interval: Duration::from_millis(1),
            retry_backoff: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_loop_retries_then_stops_on_halt() {
        let mut task = ScriptedTask {
            failures: 2,
            successes: 3,
            calls: 0,
        };
        let error = run_tick_loop("test_task", &fast(), &mut task).await;

        assert!(matches!(error, EngineError::TradingHalted { .. }));
        assert_eq!(task.calls, 6);
    }

    #[tokio::test]
    async fn test_loop_stops_immediately_on_fatal_error() {
        let mut task = ScriptedTask {
            failures: 0,
            successes: 0,
            calls: 0,
        };
        let error = run_tick_loop("halting_task", &fast(), &mut task).await;

        assert!(error.is_fatal());
        assert_eq!(task.calls, 1);
    }

    #[tokio::test]
    async fn test_backoff_is_fixed() {
        let config = LoopConfig {
            tick_interval: Duration::from_millis(1),
            retry_backoff: Duration::from_millis(20),
        };
        let mut task = ScriptedTask {
            failures: 3,
            successes: 0,
            calls: 0,
        };
        let started = std::time::Instant::now();
        run_tick_loop("backoff_task", &config, &mut task).await;

        // Three failures, each followed by the same 20ms backoff.
        assert!(started.elapsed() >= Duration::from_millis(60));
        assert_eq!(task.calls, 4);
    }
}
