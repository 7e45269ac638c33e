//! # Funding Spread Arb
//!
//! Delta-neutral funding rate arbitrage between Aster and Hyperliquid
//! perpetuals: long the venue that pays less funding, short the one that
//! pays more, and rotate into the best spread once per hour.
//!
//! ## Architecture
//!
//! - `config`: Layered configuration and validation
//! - `error`: Error taxonomy and venue error classification
//! - `exchange`: Venue capability trait, Aster and Hyperliquid clients, mock venue
//! - `strategy`: Funding normalization, ranking, sizing, execution, reconciliation
//! - `utils`: Decimal rounding, clock and bounded polling

pub mod config;
pub mod error;
pub mod exchange;
pub mod strategy;
pub mod utils;

pub use config::Config;
pub use error::{ArbError, Result};
