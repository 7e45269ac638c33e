//! Configuration management for the funding spread arbitrage engine.
//!
//! Loads settings from an optional `config.toml` and `ARB__`-prefixed
//! environment variables (e.g. `ARB__ASTER__API_KEY`).

use crate::error::ArbError;
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Aster futures API access
    #[serde(default)]
    pub aster: AsterConfig,
    /// Hyperliquid API access
    #[serde(default)]
    pub hyperliquid: HyperliquidConfig,
    /// Opportunity selection and sizing
    #[serde(default)]
    pub strategy: StrategyConfig,
    /// Order placement and confirmation polling
    #[serde(default)]
    pub execution: ExecutionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsterConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_secret: String,
    #[serde(default = "default_aster_base_url")]
    pub base_url: String,
    /// Tolerance window for signed requests
    #[serde(default = "default_recv_window_ms")]
    pub recv_window_ms: u64,
    /// Funding settles every N hours from 00:00 UTC
    #[serde(default = "default_funding_interval_hours")]
    pub funding_interval_hours: u32,
    /// Clock offset is re-synced when older than this
    #[serde(default = "default_time_sync_interval_secs")]
    pub time_sync_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HyperliquidConfig {
    #[serde(default = "default_hyperliquid_base_url")]
    pub base_url: String,
    /// Account whose positions and balances are queried (0x-prefixed).
    /// Defaults to the address of `private_key`.
    #[serde(default)]
    pub account_address: String,
    /// Hex secp256k1 key used to sign exchange actions
    #[serde(default)]
    pub private_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Requested leverage per leg, capped by both venues' maximum
    #[serde(default = "default_leverage")]
    pub leverage: u32,
    /// Share of the tighter venue's available balance committed as margin (0.0-1.0)
    #[serde(default = "default_capital_utilization")]
    pub capital_utilization: Decimal,
    /// Minimum APY spread (percentage points) worth entering
    #[serde(default = "default_min_apy_difference")]
    pub min_apy_difference: Decimal,
    /// Minimum APY gain (percentage points) over the held pair to rotate into a new one
    #[serde(default = "default_min_apy_improvement")]
    pub min_apy_improvement: Decimal,
    /// A funding event within this many minutes marks an opportunity imminent
    #[serde(default = "default_lookahead_minutes")]
    pub lookahead_minutes: u32,
    /// Number of ranked opportunities enriched with live leverage limits
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Minute of the hour the trading window opens
    #[serde(default = "default_trading_window_start_minute")]
    pub trading_window_start_minute: u32,
    /// Length of the trading window in minutes
    #[serde(default = "default_trading_window_minutes")]
    pub trading_window_minutes: u32,
    /// Longest sleep between PnL/spread reports
    #[serde(default = "default_report_interval_secs")]
    pub report_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Pause between chunked child orders
    #[serde(default = "default_inter_order_delay_ms")]
    pub inter_order_delay_ms: u64,
    /// Stop price offset through the mark for the exit fallback (0.005 = 0.5%)
    #[serde(default = "default_stop_offset_pct")]
    pub stop_offset_pct: Decimal,
    /// Worst-price slack for IOC orders emulating market orders
    #[serde(default = "default_taker_slippage_pct")]
    pub taker_slippage_pct: Decimal,
    #[serde(default = "default_cleanup_poll_interval_secs")]
    pub cleanup_poll_interval_secs: u64,
    /// Closing positions not confirmed within this bound aborts the cycle
    #[serde(default = "default_cleanup_timeout_secs")]
    pub cleanup_timeout_secs: u64,
    #[serde(default = "default_entry_poll_interval_secs")]
    pub entry_poll_interval_secs: u64,
    #[serde(default = "default_entry_timeout_secs")]
    pub entry_timeout_secs: u64,
}

fn default_aster_base_url() -> String {
    "https://fapi.asterdex.com".to_string()
}

fn default_recv_window_ms() -> u64 {
    5000
}

fn default_funding_interval_hours() -> u32 {
    4
}

fn default_time_sync_interval_secs() -> u64 {
    300
}

fn default_hyperliquid_base_url() -> String {
    "https://api.hyperliquid.xyz".to_string()
}

fn default_leverage() -> u32 {
    4
}

fn default_capital_utilization() -> Decimal {
    Decimal::new(8, 1) // 0.8
}

fn default_min_apy_difference() -> Decimal {
    Decimal::new(10, 0) // 10 percentage points
}

fn default_min_apy_improvement() -> Decimal {
    Decimal::new(5, 0)
}

fn default_lookahead_minutes() -> u32 {
    30
}

fn default_top_k() -> usize {
    4
}

fn default_trading_window_start_minute() -> u32 {
    50
}

fn default_trading_window_minutes() -> u32 {
    8
}

fn default_report_interval_secs() -> u64 {
    300
}

fn default_inter_order_delay_ms() -> u64 {
    500
}

fn default_stop_offset_pct() -> Decimal {
    Decimal::new(5, 3) // 0.005
}

fn default_taker_slippage_pct() -> Decimal {
    Decimal::new(1, 2) // 0.01
}

fn default_cleanup_poll_interval_secs() -> u64 {
    5
}

fn default_cleanup_timeout_secs() -> u64 {
    900 // 15 minutes
}

fn default_entry_poll_interval_secs() -> u64 {
    5
}

fn default_entry_timeout_secs() -> u64 {
    120
}

impl Config {
    /// Load configuration from `config.toml` (optional), `.env` and the environment.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::default().separator("__").prefix("ARB"))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate parameter ranges.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.strategy.leverage >= 1, "leverage must be >= 1");
        anyhow::ensure!(
            self.strategy.capital_utilization > Decimal::ZERO
                && self.strategy.capital_utilization <= Decimal::ONE,
            "capital_utilization must be between 0 and 1"
        );
        anyhow::ensure!(
            self.strategy.min_apy_difference >= Decimal::ZERO,
            "min_apy_difference must be non-negative"
        );
        anyhow::ensure!(self.strategy.top_k >= 1, "top_k must be >= 1");
        anyhow::ensure!(
            self.strategy.trading_window_start_minute < 60
                && self.strategy.trading_window_minutes >= 1
                && self.strategy.trading_window_start_minute + self.strategy.trading_window_minutes <= 60,
            "trading window must start within the hour, last at least a minute and end by minute 60"
        );
        anyhow::ensure!(
            matches!(self.aster.funding_interval_hours, 1 | 2 | 4 | 8),
            "aster funding_interval_hours must be 1, 2, 4 or 8"
        );
        anyhow::ensure!(
            self.execution.stop_offset_pct > Decimal::ZERO
                && self.execution.stop_offset_pct < Decimal::ONE,
            "stop_offset_pct must be between 0 and 1"
        );
        anyhow::ensure!(
            self.execution.taker_slippage_pct > Decimal::ZERO
                && self.execution.taker_slippage_pct < Decimal::ONE,
            "taker_slippage_pct must be between 0 and 1"
        );
        anyhow::ensure!(
            self.execution.cleanup_poll_interval_secs > 0 && self.execution.entry_poll_interval_secs > 0,
            "poll intervals must be positive"
        );
        Ok(())
    }

    /// Check that every credential needed for trading is present.
    pub fn require_credentials(&self) -> std::result::Result<(), ArbError> {
        let missing: Vec<&str> = [
            ("aster.api_key", self.aster.api_key.is_empty()),
            ("aster.api_secret", self.aster.api_secret.is_empty()),
            ("hyperliquid.private_key", self.hyperliquid.private_key.is_empty()),
        ]
        .into_iter()
        .filter_map(|(name, empty)| empty.then_some(name))
        .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(ArbError::Config(format!(
                "missing credentials: {}",
                missing.join(", ")
            )))
        }
    }
}

impl ExecutionConfig {
    pub fn inter_order_delay(&self) -> Duration {
        Duration::from_millis(self.inter_order_delay_ms)
    }

    pub fn cleanup_poll_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_poll_interval_secs)
    }

    pub fn cleanup_timeout(&self) -> Duration {
        Duration::from_secs(self.cleanup_timeout_secs)
    }

    pub fn entry_poll_interval(&self) -> Duration {
        Duration::from_secs(self.entry_poll_interval_secs)
    }

    pub fn entry_timeout(&self) -> Duration {
        Duration::from_secs(self.entry_timeout_secs)
    }
}

impl Default for AsterConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_secret: String::new(),
            base_url: default_aster_base_url(),
            recv_window_ms: default_recv_window_ms(),
            funding_interval_hours: default_funding_interval_hours(),
            time_sync_interval_secs: default_time_sync_interval_secs(),
        }
    }
}

impl Default for HyperliquidConfig {
    fn default() -> Self {
        Self {
            base_url: default_hyperliquid_base_url(),
            account_address: String::new(),
            private_key: String::new(),
        }
    }
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            leverage: default_leverage(),
            capital_utilization: default_capital_utilization(),
            min_apy_difference: default_min_apy_difference(),
            min_apy_improvement: default_min_apy_improvement(),
            lookahead_minutes: default_lookahead_minutes(),
            top_k: default_top_k(),
            trading_window_start_minute: default_trading_window_start_minute(),
            trading_window_minutes: default_trading_window_minutes(),
            report_interval_secs: default_report_interval_secs(),
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            inter_order_delay_ms: default_inter_order_delay_ms(),
            stop_offset_pct: default_stop_offset_pct(),
            taker_slippage_pct: default_taker_slippage_pct(),
            cleanup_poll_interval_secs: default_cleanup_poll_interval_secs(),
            cleanup_timeout_secs: default_cleanup_timeout_secs(),
            entry_poll_interval_secs: default_entry_poll_interval_secs(),
            entry_timeout_secs: default_entry_timeout_secs(),
        }
    }
}
