//! Portfolio reconciliation.
//!
//! The live book is always re-read from both venues. When it does not hold the
//! target pair the reconciler runs the full sequence: cancel every open order,
//! close every position, confirm both venues are flat, then size and enter the
//! new pair and wait for it to show up.

use super::executor::OrderExecutor;
use super::ranker::Opportunity;
use super::sizer::{TradeDecision, TradeSizer};
use super::VenuePair;
use crate::config::{ExecutionConfig, StrategyConfig};
use crate::error::{ApiErrorKind, ArbError, Result};
use crate::exchange::{OrderRef, OrderSide, PositionSide, Venue, VenueClient, VenuePosition};
use crate::utils::{poll_until, Clock, PollOutcome, PollPolicy};
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

/// Live positions on both venues at one point in time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PortfolioState {
    pub positions: Vec<(Venue, VenuePosition)>,
}

impl PortfolioState {
    /// Query both venues. Any failure fails the snapshot.
    pub async fn fetch(venues: &VenuePair) -> Result<Self> {
        let mut positions = Vec::new();
        for client in venues.both() {
            for position in client.get_all_positions().await? {
                if position.is_open() {
                    positions.push((client.venue(), position));
                }
            }
        }
        Ok(Self { positions })
    }

    pub fn is_flat(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn on(&self, venue: Venue) -> impl Iterator<Item = &VenuePosition> {
        self.positions.iter().filter(move |(v, _)| *v == venue).map(|(_, p)| p)
    }

    pub fn unrealized_pnl(&self) -> Decimal {
        self.positions.iter().map(|(_, p)| p.unrealized_pnl).sum()
    }
}

/// Whether `positions` is exactly the pair described by `opportunity`: one
/// position per venue, on the opportunity's symbols, long where it goes long.
pub fn is_matching(positions: &[(Venue, VenuePosition)], opportunity: &Opportunity) -> bool {
    let leg = |venue: Venue, symbol: &str, side: PositionSide| {
        let mut on_venue = positions.iter().filter(|(v, _)| *v == venue);
        match (on_venue.next(), on_venue.next()) {
            (Some((_, p)), None) => p.is_open() && p.symbol == symbol && p.side() == side,
            _ => false,
        }
    };

    positions.len() == 2
        && leg(opportunity.long_venue, &opportunity.long_symbol, PositionSide::Long)
        && leg(opportunity.short_venue, &opportunity.short_symbol, PositionSide::Short)
}

/// What a reconciliation pass did.
#[derive(Debug, Clone, PartialEq)]
pub enum RebalanceOutcome {
    /// No actionable opportunity cleared the threshold.
    NoOpportunity,
    /// The book already holds the target pair.
    AlreadyMatching,
    /// A different pair is held and rotating is not worth it yet.
    Held { reason: String },
    /// Cleanup confirmed, new pair entered.
    Entered { decision: TradeDecision, confirmed: bool },
    /// Cleanup confirmed, but the entry failed and was unwound.
    EntryFailed { reason: String },
}

/// Drives the live book toward the top-ranked opportunity.
pub struct PortfolioReconciler {
    venues: VenuePair,
    executor: OrderExecutor,
    sizer: TradeSizer,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
    cleanup_policy: PollPolicy,
    entry_policy: PollPolicy,
    min_apy_difference: Decimal,
    min_apy_improvement: Decimal,
}

impl PortfolioReconciler {
    pub fn new(
        venues: VenuePair,
        strategy: &StrategyConfig,
        execution: &ExecutionConfig,
        clock: Arc<dyn Clock>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            executor: OrderExecutor::new(execution, clock.clone(), cancel.clone()),
            sizer: TradeSizer::new(strategy.leverage, strategy.capital_utilization),
            cleanup_policy: PollPolicy::new(execution.cleanup_poll_interval(), execution.cleanup_timeout()),
            entry_policy: PollPolicy::new(execution.entry_poll_interval(), execution.entry_timeout()),
            min_apy_difference: strategy.min_apy_difference,
            min_apy_improvement: strategy.min_apy_improvement,
            venues,
            clock,
            cancel,
        }
    }

    /// First actionable opportunity at or above the entry threshold.
    pub fn target<'a>(&self, ranked: &'a [Opportunity]) -> Option<&'a Opportunity> {
        ranked
            .iter()
            .find(|o| o.is_actionable() && o.apy_difference > Decimal::ZERO && o.apy_difference >= self.min_apy_difference)
    }

    /// Bring the book in line with the best of `ranked`.
    #[instrument(skip_all)]
    pub async fn reconcile(&self, ranked: &[Opportunity]) -> Result<RebalanceOutcome> {
        let Some(target) = self.target(ranked) else {
            info!(min_apy_difference = %self.min_apy_difference, "No actionable opportunity above threshold");
            return Ok(RebalanceOutcome::NoOpportunity);
        };

        let state = PortfolioState::fetch(&self.venues).await?;
        if is_matching(&state.positions, target) {
            info!(pair = %target.label(), apy_difference = %target.apy_difference, "Book already matches target");
            return Ok(RebalanceOutcome::AlreadyMatching);
        }

        if let Some(held) = ranked.iter().find(|o| is_matching(&state.positions, o)) {
            if held.funding_is_imminent && held.apy_difference > Decimal::ZERO {
                let reason = format!("{} funding imminent at {}", held.label(), held.next_funding_time);
                info!(%reason, "Holding current pair");
                return Ok(RebalanceOutcome::Held { reason });
            }
            let improvement = target.apy_difference - held.apy_difference;
            if improvement < self.min_apy_improvement {
                let reason = format!(
                    "{} improves on {} by {improvement} APY, below {}",
                    target.label(),
                    held.label(),
                    self.min_apy_improvement
                );
                info!(%reason, "Holding current pair");
                return Ok(RebalanceOutcome::Held { reason });
            }
        }

        self.rebalance(target).await
    }

    /// Cancel everything, close everything, confirm flat, enter `target`.
    ///
    /// A cleanup that does not converge within the cleanup timeout returns
    /// [`ArbError::Timeout`] and enters nothing.
    #[instrument(skip_all, fields(pair = %target.label()))]
    pub async fn rebalance(&self, target: &Opportunity) -> Result<RebalanceOutcome> {
        info!(apy_difference = %target.apy_difference, "Rebalancing");

        self.cancel_all_orders().await;
        self.close_all_positions().await;
        self.wait_until_flat().await?;

        let decision = self.sizer.decide(target, &self.venues).await?;
        self.enter(decision).await
    }

    /// Best-effort sweep; each failure is logged and skipped.
    pub async fn cancel_all_orders(&self) {
        for client in self.venues.both() {
            self.cancel_open_orders(client, None).await;
        }
    }

    /// Cancel the open orders on one venue, optionally only for `symbol`.
    async fn cancel_open_orders(&self, client: &dyn VenueClient, symbol: Option<&str>) {
        let venue = client.venue();
        let orders = match client.get_all_open_orders().await {
            Ok(orders) => orders,
            Err(e) => {
                error!(%venue, error = %e, "Failed to list open orders");
                return;
            }
        };

        for order in orders.into_iter().filter(|o| symbol.map_or(true, |s| o.symbol == s)) {
            let order_ref = OrderRef::OrderId(order.order_id.clone());
            match client.cancel_order(&order.symbol, &order_ref).await {
                Ok(()) => info!(%venue, symbol = %order.symbol, order_id = %order.order_id, "Cancelled order"),
                Err(e) if e.is_kind(ApiErrorKind::OrderNotFound) => {
                    info!(%venue, symbol = %order.symbol, order_id = %order.order_id, "Order already gone");
                }
                Err(e) => error!(
                    %venue,
                    symbol = %order.symbol,
                    order_id = %order.order_id,
                    client_order_id = ?order.client_order_id,
                    error = %e,
                    "Failed to cancel order"
                ),
            }
        }
    }

    /// Best-effort sweep; each failure is logged and skipped.
    pub async fn close_all_positions(&self) {
        for client in self.venues.both() {
            let venue = client.venue();
            let positions = match client.get_all_positions().await {
                Ok(positions) => positions,
                Err(e) => {
                    error!(%venue, error = %e, "Failed to list positions");
                    continue;
                }
            };

            for position in positions.into_iter().filter(VenuePosition::is_open) {
                let quantity = position.quantity.abs();
                if let Err(e) = self
                    .executor
                    .close_leg(client, &position.symbol, position.side(), quantity)
                    .await
                {
                    error!(
                        %venue,
                        symbol = %position.symbol,
                        side = ?position.side(),
                        %quantity,
                        error = %e,
                        "Failed to close position"
                    );
                }
            }
        }
    }

    async fn wait_until_flat(&self) -> Result<()> {
        let outcome = poll_until(self.clock.as_ref(), self.cleanup_policy, &self.cancel, |attempt| async move {
            match PortfolioState::fetch(&self.venues).await {
                Ok(state) if state.is_flat() => Some(()),
                Ok(state) => {
                    info!(attempt, open = state.positions.len(), "Waiting for positions to close");
                    None
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Position check failed");
                    None
                }
            }
        })
        .await;

        match outcome {
            PollOutcome::Ready { attempts, .. } => {
                info!(attempts, "Both venues flat");
                Ok(())
            }
            PollOutcome::TimedOut { attempts, waited } => {
                error!(attempts, ?waited, "Positions still open after cleanup timeout, aborting cycle");
                Err(ArbError::Timeout {
                    what: "positions to close on both venues".into(),
                    waited,
                })
            }
            PollOutcome::Cancelled => Err(ArbError::Cancelled),
        }
    }

    async fn enter(&self, decision: TradeDecision) -> Result<RebalanceOutcome> {
        let opportunity = &decision.opportunity;
        let long_client = self.venues.get(opportunity.long_venue);
        let short_client = self.venues.get(opportunity.short_venue);

        long_client.set_leverage(&decision.long_symbol, decision.leverage).await?;
        short_client.set_leverage(&decision.short_symbol, decision.leverage).await?;

        let legs = [
            (long_client, decision.long_symbol.as_str(), OrderSide::Buy, decision.long_qty, "long"),
            (short_client, decision.short_symbol.as_str(), OrderSide::Sell, decision.short_qty, "short"),
        ];
        for (client, symbol, side, quantity, leg) in legs {
            if let Err(e) = self.executor.open_leg(client, symbol, side, quantity).await {
                error!(venue = %client.venue(), %symbol, leg, error = %e, "Entry leg failed, unwinding");
                self.unwind(&decision).await;
                return Ok(RebalanceOutcome::EntryFailed {
                    reason: format!("{leg} leg on {} failed: {e}", client.venue()),
                });
            }
        }

        let confirmed = self.wait_until_matching(opportunity).await;
        Ok(RebalanceOutcome::Entered { decision, confirmed })
    }

    /// Undo a partial entry from what the venues actually hold: withdraw
    /// every open order on both leg symbols, then close any position left.
    async fn unwind(&self, decision: &TradeDecision) {
        let opportunity = &decision.opportunity;
        let legs = [
            (opportunity.long_venue, decision.long_symbol.as_str()),
            (opportunity.short_venue, decision.short_symbol.as_str()),
        ];

        for (venue, symbol) in legs {
            let client = self.venues.get(venue);
            self.cancel_open_orders(client, Some(symbol)).await;

            let position = match client.get_position(symbol).await {
                Ok(Some(position)) => position,
                Ok(None) => continue,
                Err(e) => {
                    error!(%venue, %symbol, error = %e, "Failed to read position, manual intervention required");
                    continue;
                }
            };

            let quantity = position.quantity.abs();
            match self.executor.close_leg(client, symbol, position.side(), quantity).await {
                Ok(fill) => info!(%venue, %symbol, side = ?position.side(), placed = %fill.placed, "Leg unwound"),
                Err(e) => error!(
                    %venue,
                    %symbol,
                    side = ?position.side(),
                    %quantity,
                    error = %e,
                    "Failed to unwind leg, manual intervention required"
                ),
            }
        }
    }

    /// Poll until the book shows the entered pair. A timeout is only logged.
    async fn wait_until_matching(&self, opportunity: &Opportunity) -> bool {
        let outcome = poll_until(self.clock.as_ref(), self.entry_policy, &self.cancel, |_| async move {
            match PortfolioState::fetch(&self.venues).await {
                Ok(state) if is_matching(&state.positions, opportunity) => Some(()),
                Ok(_) => None,
                Err(e) => {
                    warn!(error = %e, "Position check failed");
                    None
                }
            }
        })
        .await;

        match outcome {
            PollOutcome::Ready { attempts, .. } => {
                info!(pair = %opportunity.label(), attempts, "Entry confirmed");
                true
            }
            PollOutcome::TimedOut { waited, .. } => {
                warn!(pair = %opportunity.label(), ?waited, "Entry not confirmed before timeout");
                false
            }
            PollOutcome::Cancelled => false,
        }
    }
}
