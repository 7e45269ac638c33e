//! Funding normalization.
//!
//! Turns each venue's raw funding payload into [`FundingRate`]s keyed by base
//! asset, with the per-period rate annualized using that venue's cadence.

use crate::error::Result;
use crate::exchange::{RawFunding, Venue, VenueClient};
use crate::utils::annualize_rate;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, info, instrument};

/// Normalized funding observation for one (venue, symbol).
#[derive(Debug, Clone, PartialEq)]
pub struct FundingRate {
    pub venue: Venue,
    /// Underlying shared by both venues (e.g. "BTC")
    pub base_asset: String,
    /// Venue-native symbol (e.g. "BTCUSDT")
    pub symbol: String,
    /// Per-period rate as a fraction
    pub rate: Decimal,
    /// Annualized percentage yield
    pub apy: Decimal,
    pub next_funding_time: DateTime<Utc>,
    pub max_leverage: Option<u32>,
    pub is_tradable: bool,
}

/// Payloads dropped during normalization, per venue.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SkipCounters {
    pub missing_rate: usize,
    pub unknown_symbol: usize,
}

impl SkipCounters {
    pub fn total(&self) -> usize {
        self.missing_rate + self.unknown_symbol
    }
}

/// Fetches and normalizes funding for a venue.
#[derive(Debug, Default, Clone, Copy)]
pub struct FundingAggregator;

impl FundingAggregator {
    pub fn new() -> Self {
        Self
    }

    /// Fetch every funding rate on `client` and normalize it.
    #[instrument(skip(self, client), fields(venue = %client.venue()))]
    pub async fn fetch(&self, client: &dyn VenueClient, now: DateTime<Utc>) -> Result<Vec<FundingRate>> {
        let raw = client.get_funding_rates(None).await?;
        let (rates, skipped) = self.normalize(client, raw, now);

        if skipped.total() > 0 {
            info!(
                venue = %client.venue(),
                missing_rate = skipped.missing_rate,
                unknown_symbol = skipped.unknown_symbol,
                "Skipped funding entries"
            );
        }
        debug!(venue = %client.venue(), count = rates.len(), "Normalized funding rates");
        Ok(rates)
    }

    /// Normalize raw payloads. Entries with no rate or an unpairable symbol
    /// are dropped and counted.
    pub fn normalize(
        &self,
        client: &dyn VenueClient,
        raw: Vec<RawFunding>,
        now: DateTime<Utc>,
    ) -> (Vec<FundingRate>, SkipCounters) {
        let schedule = client.funding_schedule();
        let periods_per_day = schedule.periods_per_day();
        let next_funding_time = schedule.next_funding_time(now);
        let mut skipped = SkipCounters::default();

        let rates = raw
            .into_iter()
            .filter_map(|entry| {
                let Some(rate) = entry.rate else {
                    skipped.missing_rate += 1;
                    return None;
                };
                let Some(base_asset) = client.base_asset(&entry.symbol) else {
                    skipped.unknown_symbol += 1;
                    return None;
                };
                Some(FundingRate {
                    venue: client.venue(),
                    base_asset,
                    symbol: entry.symbol,
                    rate,
                    apy: annualize_rate(rate, periods_per_day),
                    next_funding_time,
                    max_leverage: entry.max_leverage,
                    is_tradable: entry.is_tradable,
                })
            })
            .collect();

        (rates, skipped)
    }
}
