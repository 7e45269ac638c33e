//! Arbitrage decision and execution engine.
//!
//! Contains the core logic for:
//! - Funding normalization and cross-venue opportunity ranking
//! - Trade sizing under lot/tick constraints
//! - Maker-first order execution with taker fallback
//! - Portfolio reconciliation and the timed strategy loop

mod funding;
mod ranker;
mod reconciler;
mod runner;
mod sizer;

pub(crate) mod executor;

pub use executor::{maker_then_taker, LegFill, MakerTaker, OrderExecutor};
pub use funding::{FundingAggregator, FundingRate, SkipCounters};
pub use ranker::{Opportunity, OpportunityRanker};
pub use reconciler::{is_matching, PortfolioReconciler, PortfolioState, RebalanceOutcome};
pub use runner::StrategyLoop;
pub use sizer::{LegQuote, TradeDecision, TradeSizer};

use crate::exchange::{Venue, VenueClient};
use std::sync::Arc;
use tracing::warn;

/// The two venue clients the engine trades across.
#[derive(Clone)]
pub struct VenuePair {
    aster: Arc<dyn VenueClient>,
    hyperliquid: Arc<dyn VenueClient>,
}

impl VenuePair {
    pub fn new(aster: Arc<dyn VenueClient>, hyperliquid: Arc<dyn VenueClient>) -> Self {
        Self { aster, hyperliquid }
    }

    pub fn get(&self, venue: Venue) -> &dyn VenueClient {
        match venue {
            Venue::Aster => self.aster.as_ref(),
            Venue::Hyperliquid => self.hyperliquid.as_ref(),
        }
    }

    /// Both clients in a fixed order (Aster first).
    pub fn both(&self) -> [&dyn VenueClient; 2] {
        [self.aster.as_ref(), self.hyperliquid.as_ref()]
    }

    /// Wallet balance per venue, keyed by venue name. A venue whose query
    /// fails gets an `{"error": ...}` entry and the other is still reported.
    pub async fn balance_report(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut report = serde_json::Map::new();
        for client in self.both() {
            let entry = match client.get_wallet_balance().await {
                Ok(balance) => balance.as_json(),
                Err(e) => {
                    warn!(venue = %client.venue(), error = %e, "Balance query failed");
                    serde_json::json!({ "error": e.to_string() })
                }
            };
            report.insert(client.venue().to_string(), entry);
        }
        report
    }
}
