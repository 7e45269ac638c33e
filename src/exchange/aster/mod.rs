//! Aster perpetual futures connectivity.
//!
//! Binance-compatible REST surface with HMAC-SHA256 signed private
//! endpoints and server clock-offset tracking.

mod client;
pub mod signing;
mod types;

pub use client::AsterClient;
