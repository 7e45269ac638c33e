//! Venue integrations for cross-venue funding arbitrage.
//!
//! ## Aster
//! Binance-compatible futures REST API with HMAC-signed account endpoints.
//! Funding settles every few hours at fixed UTC boundaries.
//!
//! ## Hyperliquid
//! JSON info endpoint for market data and account state, EIP-712 signed
//! actions for trading. Funding settles hourly.
//!
//! Both sit behind [`VenueClient`]; [`MockVenueClient`] is an in-memory
//! venue for tests and dry runs.

pub mod aster;
pub mod hyperliquid;
pub mod mock;
mod traits;
mod types;

pub use aster::AsterClient;
pub use hyperliquid::HyperliquidClient;
pub use mock::MockVenueClient;
pub use traits::{Venue, VenueClient};
pub use types::*;
