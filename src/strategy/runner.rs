//! Timed strategy loop.
//!
//! Each wake-up reports PnL and the held spread. Once per hour, inside the
//! configured minute window, it runs a trading cycle: fetch funding, rank,
//! reconcile. It then sleeps until the next window start, capped by the
//! report interval.

use super::funding::{FundingAggregator, FundingRate};
use super::ranker::{Opportunity, OpportunityRanker};
use super::reconciler::{is_matching, PortfolioReconciler, PortfolioState, RebalanceOutcome};
use super::VenuePair;
use crate::config::Config;
use crate::error::{ArbError, Result};
use crate::exchange::Venue;
use crate::utils::{sleep_or_cancel, Clock};
use chrono::{DateTime, Duration as ChronoDuration, Timelike, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Orchestrates report, trading window and reconciliation.
pub struct StrategyLoop {
    venues: VenuePair,
    aggregator: FundingAggregator,
    ranker: OpportunityRanker,
    reconciler: PortfolioReconciler,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
    window_start_minute: u32,
    window_minutes: u32,
    report_interval: Duration,
    /// Start of the hour the last trading cycle ran in
    last_trading_hour: Option<DateTime<Utc>>,
}

impl StrategyLoop {
    pub fn new(venues: VenuePair, config: &Config, clock: Arc<dyn Clock>, cancel: CancellationToken) -> Self {
        let strategy = &config.strategy;
        Self {
            aggregator: FundingAggregator::new(),
            ranker: OpportunityRanker::new(strategy.lookahead_minutes, strategy.top_k),
            reconciler: PortfolioReconciler::new(
                venues.clone(),
                strategy,
                &config.execution,
                clock.clone(),
                cancel.clone(),
            ),
            window_start_minute: strategy.trading_window_start_minute,
            window_minutes: strategy.trading_window_minutes,
            report_interval: Duration::from_secs(strategy.report_interval_secs),
            last_trading_hour: None,
            venues,
            clock,
            cancel,
        }
    }

    /// Run until cancelled.
    pub async fn run(&mut self) -> Result<()> {
        info!(
            window_start_minute = self.window_start_minute,
            window_minutes = self.window_minutes,
            "Strategy loop started"
        );

        while !self.cancel.is_cancelled() {
            self.tick().await;

            let wait = self.next_wake(self.clock.now());
            info!(wait_secs = wait.as_secs(), "Sleeping until next check");
            if !sleep_or_cancel(self.clock.as_ref(), wait, &self.cancel).await {
                break;
            }
        }

        info!("Strategy loop stopped");
        Ok(())
    }

    /// One wake-up: report, then trade if the window is open.
    pub async fn tick(&mut self) {
        self.report().await;

        let now = self.clock.now();
        if self.in_trading_window(now) {
            self.last_trading_hour = Some(hour_start(now));
            if let Err(e) = self.trading_cycle().await {
                log_cycle_error(&e);
            }
        }
    }

    /// Fetch, rank and reconcile once, ignoring the window.
    pub async fn trading_cycle(&self) -> Result<RebalanceOutcome> {
        let ranked = self.scan().await?;
        if let Some(best) = ranked.first() {
            info!(
                pair = %best.label(),
                apy_difference = %best.apy_difference,
                imminent = best.funding_is_imminent,
                "Top opportunity"
            );
        }

        let outcome = self.reconciler.reconcile(&ranked).await?;
        info!(?outcome, "Trading cycle finished");
        Ok(outcome)
    }

    /// Ranked opportunities with leverage resolved for the top candidates.
    pub async fn scan(&self) -> Result<Vec<Opportunity>> {
        let now = self.clock.now();
        let (aster, hyperliquid) = self.fetch_funding(now).await?;
        Ok(self.ranker.rank(&aster, &hyperliquid, &self.venues, now).await)
    }

    async fn fetch_funding(&self, now: DateTime<Utc>) -> Result<(Vec<FundingRate>, Vec<FundingRate>)> {
        let aster = self.aggregator.fetch(self.venues.get(Venue::Aster), now).await?;
        let hyperliquid = self.aggregator.fetch(self.venues.get(Venue::Hyperliquid), now).await?;
        Ok((aster, hyperliquid))
    }

    /// Log unrealized PnL and the carry of the held pair, if any.
    pub async fn report(&self) {
        let state = match PortfolioState::fetch(&self.venues).await {
            Ok(state) => state,
            Err(e) => {
                warn!(error = %e, "Report skipped: position query failed");
                return;
            }
        };

        if state.is_flat() {
            info!("📊 No open positions");
            return;
        }

        for venue in [Venue::Aster, Venue::Hyperliquid] {
            for position in state.on(venue) {
                info!(
                    %venue,
                    symbol = %position.symbol,
                    quantity = %position.quantity,
                    entry_price = %position.entry_price,
                    unrealized_pnl = %position.unrealized_pnl,
                    "📊 Position"
                );
            }
        }

        let now = self.clock.now();
        let spread = match self.fetch_funding(now).await {
            Ok((aster, hyperliquid)) => self
                .ranker
                .compare(&aster, &hyperliquid, now)
                .into_iter()
                .find(|o| is_matching(&state.positions, o)),
            Err(e) => {
                warn!(error = %e, "Funding fetch failed during report");
                None
            }
        };

        match spread {
            Some(held) => info!(
                pair = %held.label(),
                apy_difference = %held.apy_difference,
                unrealized_pnl = %state.unrealized_pnl(),
                "📊 Holding pair"
            ),
            None => warn!(
                positions = state.positions.len(),
                unrealized_pnl = %state.unrealized_pnl(),
                "📊 Open positions do not form a delta-neutral pair"
            ),
        }
    }

    /// Minute is inside the window and no cycle ran this hour yet.
    pub fn in_trading_window(&self, now: DateTime<Utc>) -> bool {
        let minute = now.minute();
        let in_window = minute >= self.window_start_minute && minute < self.window_start_minute + self.window_minutes;
        in_window && self.last_trading_hour != Some(hour_start(now))
    }

    /// Time until the next window opening, capped at the report interval.
    pub fn next_wake(&self, now: DateTime<Utc>) -> Duration {
        let this_hour = hour_start(now) + ChronoDuration::minutes(self.window_start_minute as i64);
        let next_window = if now < this_hour && self.last_trading_hour != Some(hour_start(now)) {
            this_hour
        } else {
            this_hour + ChronoDuration::hours(1)
        };

        let until = (next_window - now).to_std().unwrap_or_default();
        until.min(self.report_interval).max(Duration::from_secs(1))
    }
}

fn hour_start(at: DateTime<Utc>) -> DateTime<Utc> {
    at.date_naive()
        .and_hms_opt(at.hour(), 0, 0)
        .map(|naive| naive.and_utc())
        .unwrap_or(at)
}

fn log_cycle_error(err: &ArbError) {
    match err {
        ArbError::Timeout { what, waited } => {
            error!(%what, ?waited, "Cycle aborted: cleanup did not converge, no position taken")
        }
        ArbError::Cancelled => info!("Cycle cancelled"),
        other => error!(error = %other, "Trading cycle failed"),
    }
}
