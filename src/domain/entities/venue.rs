use serde::{Deserialize, Serialize};

/// A place an order can be routed to: a venue on a given chain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VenueRoute {
    pub chain: String,
    pub venue: String,
}

impl VenueRoute {
    pub fn new(chain: &str, venue: &str) -> Self {
        Self {
            chain: chain.to_lowercase(),
            venue: venue.to_lowercase(),
        }
    }

    /// Parse `chain:venue`, e.g. `hyperliquid:hyperliquid` or `solana:jupiter`.
    pub fn parse(value: &str) -> Option<Self> {
        let (chain, venue) = value.split_once(':')?;
        let (chain, venue) = (chain.trim(), venue.trim());
        if chain.is_empty() || venue.is_empty() {
            return None;
        }
        Some(Self::new(chain, venue))
    }
}

impl std::fmt::Display for VenueRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.chain, self.venue)
    }
}

/// Which rule of the venue dispatcher picked a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VenueRole {
    /// Leveraged / perpetual venue, used when RSI is overbought.
    Perpetual,
    /// Fastest / cheapest venue, used on large recent moves.
    Fast,
    /// Lowest fees, used for small accounts.
    LowFee,
    /// Default: deepest book.
    HighVolume,
}

impl VenueRole {
    pub fn name(&self) -> &'static str {
        match self {
            VenueRole::Perpetual => "perpetual",
            VenueRole::Fast => "fast",
            VenueRole::LowFee => "low-fee",
            VenueRole::HighVolume => "high-volume",
        }
    }
}
