//! Trade sizing under venue lot constraints.

use super::ranker::Opportunity;
use super::VenuePair;
use crate::error::{ArbError, Result};
use crate::exchange::SymbolFilters;
use crate::utils::round_down_to_lot;
use rust_decimal::Decimal;
use tracing::{info, instrument, warn};

/// A sized, venue-legal pair of orders for one opportunity.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeDecision {
    pub opportunity: Opportunity,
    pub long_symbol: String,
    pub short_symbol: String,
    pub long_qty: Decimal,
    pub short_qty: Decimal,
    /// Margin committed per leg
    pub margin: Decimal,
    pub leverage: u32,
}

/// Inputs for one leg.
#[derive(Debug, Clone, Copy)]
pub struct LegQuote {
    pub price: Decimal,
    pub filters: SymbolFilters,
}

/// Converts capital and leverage into order quantities.
#[derive(Debug, Clone)]
pub struct TradeSizer {
    requested_leverage: u32,
    capital_utilization: Decimal,
}

impl TradeSizer {
    pub fn new(requested_leverage: u32, capital_utilization: Decimal) -> Self {
        Self {
            requested_leverage,
            capital_utilization,
        }
    }

    /// `min(requested, long_max, short_max)`; an unknown maximum counts as 1x.
    pub fn effective_leverage(&self, opportunity: &Opportunity) -> u32 {
        let long_max = opportunity.long_max_leverage.unwrap_or(1);
        let short_max = opportunity.short_max_leverage.unwrap_or(1);
        self.requested_leverage.min(long_max).min(short_max).max(1)
    }

    /// Size both legs from `capital` of margin.
    ///
    /// Both legs get the same quantity: the smaller of the two raw
    /// quantities, floored to the coarser lot step.
    pub fn size(
        &self,
        opportunity: &Opportunity,
        capital: Decimal,
        long: LegQuote,
        short: LegQuote,
    ) -> Result<TradeDecision> {
        let symbol = &opportunity.symbol;
        if capital <= Decimal::ZERO {
            return Err(ArbError::sizing(symbol, format!("no capital available ({capital})")));
        }
        if long.price <= Decimal::ZERO || short.price <= Decimal::ZERO {
            return Err(ArbError::sizing(symbol, "mark price is not positive"));
        }

        let leverage = self.effective_leverage(opportunity);
        let notional = capital * Decimal::from(leverage);

        let raw_long = notional / long.price;
        let raw_short = notional / short.price;
        let coarser_step = long.filters.step_size.max(short.filters.step_size);
        let qty = round_down_to_lot(raw_long.min(raw_short), coarser_step);

        let long_qty = round_down_to_lot(qty, long.filters.step_size);
        let short_qty = round_down_to_lot(qty, short.filters.step_size);

        for (leg, leg_qty, quote) in [("long", long_qty, long), ("short", short_qty, short)] {
            if leg_qty.is_zero() {
                return Err(ArbError::sizing(
                    symbol,
                    format!("{leg} quantity rounds to zero (raw {}, step {})", raw_long.min(raw_short), coarser_step),
                ));
            }
            if leg_qty < quote.filters.min_qty {
                return Err(ArbError::sizing(
                    symbol,
                    format!("{leg} quantity {leg_qty} below min qty {}", quote.filters.min_qty),
                ));
            }
            if leg_qty * quote.price < quote.filters.min_notional {
                return Err(ArbError::sizing(
                    symbol,
                    format!(
                        "{leg} notional {} below min notional {}",
                        leg_qty * quote.price,
                        quote.filters.min_notional
                    ),
                ));
            }
        }

        Ok(TradeDecision {
            opportunity: opportunity.clone(),
            long_symbol: opportunity.long_symbol.clone(),
            short_symbol: opportunity.short_symbol.clone(),
            long_qty,
            short_qty,
            margin: capital,
            leverage,
        })
    }

    /// Size `opportunity` against live balances, prices and filters.
    ///
    /// Capital is the smaller available balance across both venues times
    /// `capital_utilization`.
    #[instrument(skip(self, venues), fields(pair = %opportunity.label()))]
    pub async fn decide(&self, opportunity: &Opportunity, venues: &VenuePair) -> Result<TradeDecision> {
        if opportunity.long_max_leverage.is_none() || opportunity.short_max_leverage.is_none() {
            warn!("Max leverage unresolved on one venue, sizing at 1x");
        }

        let mut available = Vec::with_capacity(2);
        for client in venues.both() {
            let balance = client.get_wallet_balance().await?;
            let amount = balance.available.or(balance.total).ok_or_else(|| {
                ArbError::parsing(client.venue(), "wallet balance has neither available nor total")
            })?;
            available.push(amount);
        }
        let capital = available.into_iter().min().unwrap_or_default() * self.capital_utilization;

        let long_client = venues.get(opportunity.long_venue);
        let short_client = venues.get(opportunity.short_venue);
        let long = LegQuote {
            price: long_client.get_price(&opportunity.long_symbol).await?,
            filters: long_client.get_symbol_filters(&opportunity.long_symbol).await?,
        };
        let short = LegQuote {
            price: short_client.get_price(&opportunity.short_symbol).await?,
            filters: short_client.get_symbol_filters(&opportunity.short_symbol).await?,
        };

        let decision = self.size(opportunity, capital, long, short)?;
        info!(
            capital = %capital,
            leverage = decision.leverage,
            long_qty = %decision.long_qty,
            short_qty = %decision.short_qty,
            "Trade sized"
        );
        Ok(decision)
    }
}
