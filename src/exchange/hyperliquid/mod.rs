//! Hyperliquid perpetuals integration.
//!
//! Funding is paid hourly. Rates reported by `metaAndAssetCtxs` are already
//! per-hour, so they annualize with 24 periods per day.

mod client;
pub mod signing;
mod types;

pub use client::HyperliquidClient;
pub use signing::ActionSigner;
