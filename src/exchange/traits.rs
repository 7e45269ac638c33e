//! Venue capability interface.
//!
//! The strategy layer talks to both perpetuals venues through
//! [`VenueClient`] only. Venue-specific behavior (symbol naming, funding
//! cadence, quantity/price wire formatting, error classification) lives
//! behind this trait instead of being branched on at call sites.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::fmt;

use super::types::*;
use crate::error::Result;
use crate::strategy::executor;

/// Venue identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Venue {
    Aster,
    Hyperliquid,
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Venue::Aster => write!(f, "Aster"),
            Venue::Hyperliquid => write!(f, "Hyperliquid"),
        }
    }
}

impl Venue {
    /// Short code for display (2-3 chars).
    pub fn short_code(&self) -> &'static str {
        match self {
            Venue::Aster => "AS",
            Venue::Hyperliquid => "HL",
        }
    }

    /// The counterpart venue of the pair.
    pub fn other(&self) -> Venue {
        match self {
            Venue::Aster => Venue::Hyperliquid,
            Venue::Hyperliquid => Venue::Aster,
        }
    }
}

/// Capabilities the arbitrage engine consumes from a perpetuals venue.
#[async_trait]
pub trait VenueClient: Send + Sync {
    /// Returns the venue identifier.
    fn venue(&self) -> Venue;

    /// Funding settlement cadence of this venue.
    fn funding_schedule(&self) -> FundingSchedule;

    /// Base asset for a native symbol (`"BTCUSDT"` -> `"BTC"`), or `None` if
    /// the symbol is not a perpetual this engine can pair.
    fn base_asset(&self, symbol: &str) -> Option<String>;

    /// Wire representation of an order quantity.
    fn format_quantity(&self, quantity: Decimal, filters: &SymbolFilters) -> String;

    /// Wire representation of an order price.
    fn format_price(&self, price: Decimal, filters: &SymbolFilters) -> String;

    async fn get_price(&self, symbol: &str) -> Result<Decimal>;

    async fn get_book_ticker(&self, symbol: &str) -> Result<BookTicker>;

    /// Current funding observations, for one symbol or for every symbol.
    async fn get_funding_rates(&self, symbol: Option<&str>) -> Result<Vec<RawFunding>>;

    /// Maximum leverage for a symbol. Never fails: lookup errors fall back
    /// to a conservative default.
    async fn get_max_leverage(&self, symbol: &str) -> u32;

    async fn get_symbol_filters(&self, symbol: &str) -> Result<SymbolFilters>;

    async fn get_wallet_balance(&self) -> Result<WalletBalance>;

    /// Send a primitive (limit, market or stop-market) order to the venue.
    async fn submit_order(&self, request: &OrderRequest) -> Result<OrderAck>;

    /// Place an order. `MakerThenTaker` requests run the maker-first state
    /// machine; every other type goes straight to [`Self::submit_order`].
    async fn place_order(&self, request: &OrderRequest) -> Result<OrderAck> {
        match request.order_type {
            OrderType::MakerThenTaker => executor::maker_then_taker(self, request).await,
            _ => self.submit_order(request).await,
        }
    }

    async fn cancel_order(&self, symbol: &str, order: &OrderRef) -> Result<()>;

    /// Look up a resting order by client order id. `Ok(None)` means the
    /// venue no longer has it open (filled, cancelled, or never accepted).
    async fn get_open_order(&self, symbol: &str, client_order_id: &str) -> Result<Option<OpenOrder>>;

    /// Current or final state of an order by client order id, including
    /// how much of it executed. `Ok(None)` means the venue never accepted it.
    async fn query_order(&self, symbol: &str, client_order_id: &str) -> Result<Option<OrderAck>>;

    async fn get_all_open_orders(&self) -> Result<Vec<OpenOrder>>;

    /// All positions with non-zero size.
    async fn get_all_positions(&self) -> Result<Vec<VenuePosition>>;

    async fn get_position(&self, symbol: &str) -> Result<Option<VenuePosition>> {
        Ok(self
            .get_all_positions()
            .await?
            .into_iter()
            .find(|p| p.symbol == symbol && p.is_open()))
    }

    /// Flatten a position with a reduce-only market order.
    async fn close_position(&self, symbol: &str) -> Result<Option<OrderAck>> {
        let Some(position) = self.get_position(symbol).await? else {
            return Ok(None);
        };
        let request =
            OrderRequest::market(symbol, position.side().exit_side(), position.quantity.abs()).reduce_only();
        self.submit_order(&request).await.map(Some)
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<()>;
}
