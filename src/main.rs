//! Funding Spread Arb - Main Entry Point
//!
//! Holds a delta-neutral perpetual pair across Aster and Hyperliquid, long on
//! the venue that pays less funding and short on the one that pays more.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use funding_spread_arb::config::Config;
use funding_spread_arb::exchange::{AsterClient, HyperliquidClient, Venue};
use funding_spread_arb::strategy::{Opportunity, StrategyLoop, VenuePair};
use funding_spread_arb::utils::SystemClock;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// Funding Spread Arb CLI
#[derive(Parser)]
#[command(name = "funding-spread-arb")]
#[command(version, about = "Cross-venue funding rate arbitrage between Aster and Hyperliquid")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the strategy loop (default)
    Run {
        /// Run a single trading cycle immediately and exit
        #[arg(long)]
        once: bool,
    },

    /// Print the ranked opportunity table
    Scan {
        /// Number of rows to print
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Show balances and open positions per venue
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging()?;

    let config = Config::load()?;
    config.validate()?;

    match cli.command.unwrap_or(Commands::Run { once: false }) {
        Commands::Run { once } => run(config, once).await,
        Commands::Scan { limit } => scan(config, limit).await,
        Commands::Status => status(config).await,
    }
}

async fn run(config: Config, once: bool) -> Result<()> {
    info!("🚀 Funding Spread Arb starting");
    log_config(&config);

    config.require_credentials()?;
    let (aster, venues) = build_venues(&config)?;

    let offset = aster
        .sync_time()
        .await
        .context("Initial Aster time sync failed")?;
    info!(offset_ms = offset, "⏱️  Aster clock offset synchronized");

    let cancel = CancellationToken::new();
    spawn_shutdown_listener(cancel.clone());

    let mut strategy = StrategyLoop::new(venues, &config, Arc::new(SystemClock), cancel);

    if once {
        let outcome = strategy.trading_cycle().await?;
        info!(?outcome, "Single cycle complete");
        return Ok(());
    }

    strategy.run().await?;
    info!("👋 Shutdown complete");
    Ok(())
}

async fn scan(config: Config, limit: usize) -> Result<()> {
    let (_, venues) = build_venues(&config)?;
    let strategy = StrategyLoop::new(venues, &config, Arc::new(SystemClock), CancellationToken::new());

    let ranked = strategy.scan().await?;
    print_opportunities(&ranked, limit);
    Ok(())
}

async fn status(config: Config) -> Result<()> {
    let (_, venues) = build_venues(&config)?;

    let balances = venues.balance_report().await;

    println!("\n💰 Balances");
    println!("{}", serde_json::to_string_pretty(&balances)?);

    println!("\n📊 Positions");
    for client in venues.both() {
        match client.get_all_positions().await {
            Ok(positions) if positions.is_empty() => {
                println!("   {} - none", client.venue());
            }
            Ok(positions) => {
                println!("   {}", client.venue());
                for p in positions {
                    let mark = p.mark_price.map(|m| m.to_string()).unwrap_or_else(|| "-".into());
                    println!(
                        "   ├─ {:<12} qty {:>14} entry {:>12} mark {:>12} uPnL {:>10.2}",
                        p.symbol, p.quantity, p.entry_price, mark, p.unrealized_pnl
                    );
                }
            }
            Err(e) => {
                error!(venue = %client.venue(), error = %e, "Position query failed");
                println!("   {} - error: {}", client.venue(), e);
            }
        }
    }

    Ok(())
}

fn build_venues(config: &Config) -> Result<(Arc<AsterClient>, VenuePair)> {
    let aster = Arc::new(AsterClient::new(&config.aster).context("Failed to build Aster client")?);
    let hyperliquid = Arc::new(
        HyperliquidClient::new(&config.hyperliquid, config.execution.taker_slippage_pct)
            .context("Failed to build Hyperliquid client")?,
    );
    Ok((aster.clone(), VenuePair::new(aster, hyperliquid)))
}

fn spawn_shutdown_listener(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("🛑 Shutdown signal received, finishing current step...");
            cancel.cancel();
        }
    });
}

fn print_opportunities(ranked: &[Opportunity], limit: usize) {
    println!(
        "\n{:<10} {:>5} {:>5} {:>12} {:>12} {:>12} {:>9} {:>10}",
        "SYMBOL", "LONG", "SHORT", "LONG APY", "SHORT APY", "SPREAD", "IMMINENT", "LEVERAGE"
    );
    println!("{}", "-".repeat(82));

    for o in ranked.iter().take(limit) {
        let leverage = match (o.long_max_leverage, o.short_max_leverage) {
            (Some(long), Some(short)) => format!("{long}x/{short}x"),
            _ => "-".to_string(),
        };
        println!(
            "{:<10} {:>5} {:>5} {:>11.2}% {:>11.2}% {:>11.2}% {:>9} {:>10}",
            o.symbol,
            o.long_venue.short_code(),
            o.short_venue.short_code(),
            o.long_apy,
            o.short_apy,
            o.apy_difference,
            if o.funding_is_imminent { "yes" } else { "" },
            leverage,
        );
    }

    println!(
        "\n{} opportunities across {} and {} ({} shown)",
        ranked.len(),
        Venue::Aster,
        Venue::Hyperliquid,
        ranked.len().min(limit)
    );
}

/// Initialize logging with console and hourly rolling file output.
fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    std::fs::create_dir_all("logs")?;

    let file_appender = tracing_appender::rolling::hourly("logs", "funding-spread-arb.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    // Keep the writer flushing for the life of the process.
    Box::leak(Box::new(guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("funding_spread_arb=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stdout.and(file_writer))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .init();

    Ok(())
}

/// Log configuration on startup.
fn log_config(config: &Config) {
    let strategy = &config.strategy;
    let execution = &config.execution;

    info!("📋 Configuration:");
    info!("   Aster: {}", config.aster.base_url);
    info!("   Hyperliquid: {}", config.hyperliquid.base_url);
    info!("   Leverage: {}x", strategy.leverage);
    info!(
        "   Capital Utilization: {:.0}%",
        strategy.capital_utilization * dec!(100)
    );
    info!("   Min APY Difference: {}%", strategy.min_apy_difference);
    info!("   Min APY Improvement: {}%", strategy.min_apy_improvement);
    info!(
        "   Trading Window: minute {} for {}m",
        strategy.trading_window_start_minute, strategy.trading_window_minutes
    );
    info!("   Funding Lookahead: {}m", strategy.lookahead_minutes);
    info!("   Stop Offset: {:.2}%", execution.stop_offset_pct * dec!(100));
    info!(
        "   Cleanup Timeout: {}s (poll {}s)",
        execution.cleanup_timeout_secs, execution.cleanup_poll_interval_secs
    );
}
