use crate::domain::repositories::market_data::{DataResult, ResearchSource};
use async_trait::async_trait;
use std::collections::HashMap;

/// Research scores from configuration: one default, optional per-symbol overrides.
#[derive(Debug, Clone)]
pub struct StaticResearchSource {
    default_score: f64,
    overrides: HashMap<String, f64>,
}

impl StaticResearchSource {
    pub fn new(default_score: f64) -> Self {
        Self {
            default_score: default_score.clamp(0.0, 1.0),
            overrides: HashMap::new(),
        }
    }

    pub fn with_score(mut self, symbol: &str, score: f64) -> Self {
        self.overrides.insert(symbol.to_string(), score.clamp(0.0, 1.0));
        self
    }
}

#[async_trait]
impl ResearchSource for StaticResearchSource {
    async fn get_confidence_score(&self, symbol: &str) -> DataResult<f64> {
        Ok(self
            .overrides
            .get(symbol)
            .copied()
            .unwrap_or(self.default_score))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_default_and_override() {
        let source = StaticResearchSource::new(0.5).with_score("BTC-USD", 0.9);
        assert_eq!(source.get_confidence_score("BTC-USD").await.unwrap(), 0.9);
        assert_eq!(source.get_confidence_score("ETH-USD").await.unwrap(), 0.5);
    }

    #[tokio::test]
    async fn test_scores_are_clamped() {
        let source = StaticResearchSource::new(1.7).with_score("SOL-USD", -0.2);
        assert_eq!(source.get_confidence_score("ETH-USD").await.unwrap(), 1.0);
        assert_eq!(source.get_confidence_score("SOL-USD").await.unwrap(), 0.0);
    }
}
