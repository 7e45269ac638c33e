//! Cross-venue opportunity ranking.

use super::funding::FundingRate;
use super::VenuePair;
use crate::exchange::Venue;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, instrument};

/// One direction of a delta-neutral pair on a common base asset.
#[derive(Debug, Clone, PartialEq)]
pub struct Opportunity {
    /// Base asset (e.g. "BTC")
    pub symbol: String,
    pub long_venue: Venue,
    pub short_venue: Venue,
    /// Native symbol on the long venue
    pub long_symbol: String,
    /// Native symbol on the short venue
    pub short_symbol: String,
    pub long_apy: Decimal,
    pub short_apy: Decimal,
    /// Annualized carry of the pair: the short leg collects, the long leg pays.
    pub apy_difference: Decimal,
    pub funding_is_imminent: bool,
    /// Earliest funding event across both venues
    pub next_funding_time: DateTime<Utc>,
    pub long_max_leverage: Option<u32>,
    pub short_max_leverage: Option<u32>,
}

impl Opportunity {
    fn new(long: &FundingRate, short: &FundingRate, now: DateTime<Utc>, lookahead: Duration) -> Self {
        let next_funding_time = long.next_funding_time.min(short.next_funding_time);
        Self {
            symbol: long.base_asset.clone(),
            long_venue: long.venue,
            short_venue: short.venue,
            long_symbol: long.symbol.clone(),
            short_symbol: short.symbol.clone(),
            long_apy: long.apy,
            short_apy: short.apy,
            apy_difference: short.apy - long.apy,
            funding_is_imminent: next_funding_time - now <= lookahead,
            next_funding_time,
            long_max_leverage: None,
            short_max_leverage: None,
        }
    }

    /// Leverage has been resolved on both venues.
    pub fn is_actionable(&self) -> bool {
        self.long_max_leverage.is_some() && self.short_max_leverage.is_some()
    }

    /// Native symbol this opportunity trades on `venue`.
    pub fn symbol_on(&self, venue: Venue) -> &str {
        if venue == self.long_venue {
            &self.long_symbol
        } else {
            &self.short_symbol
        }
    }

    /// Same pair, same direction.
    pub fn same_pair(&self, other: &Opportunity) -> bool {
        self.symbol == other.symbol && self.long_venue == other.long_venue
    }

    pub fn label(&self) -> String {
        format!(
            "{} long {} / short {}",
            self.symbol,
            self.long_venue.short_code(),
            self.short_venue.short_code()
        )
    }
}

/// Joins both venues' funding by base asset and ranks both directions.
#[derive(Debug, Clone)]
pub struct OpportunityRanker {
    lookahead: Duration,
    top_k: usize,
}

impl OpportunityRanker {
    pub fn new(lookahead_minutes: u32, top_k: usize) -> Self {
        Self {
            lookahead: Duration::minutes(lookahead_minutes as i64),
            top_k,
        }
    }

    /// Both directions for every tradable base asset listed on both venues,
    /// sorted by `apy_difference` descending.
    ///
    /// Ties keep insertion order: base asset ascending, then the
    /// long-first-venue direction before its mirror.
    pub fn compare(&self, first: &[FundingRate], second: &[FundingRate], now: DateTime<Utc>) -> Vec<Opportunity> {
        let second_by_base: HashMap<&str, &FundingRate> = second
            .iter()
            .filter(|r| r.is_tradable)
            .map(|r| (r.base_asset.as_str(), r))
            .collect();

        let common: BTreeMap<&str, (&FundingRate, &FundingRate)> = first
            .iter()
            .filter(|r| r.is_tradable)
            .filter_map(|a| second_by_base.get(a.base_asset.as_str()).map(|b| (a.base_asset.as_str(), (a, *b))))
            .collect();

        let mut opportunities: Vec<Opportunity> = common
            .values()
            .flat_map(|(a, b)| {
                [
                    Opportunity::new(a, b, now, self.lookahead),
                    Opportunity::new(b, a, now, self.lookahead),
                ]
            })
            .collect();

        // Vec::sort_by is stable.
        opportunities.sort_by(|x, y| y.apy_difference.cmp(&x.apy_difference));
        opportunities
    }

    /// Rank and resolve max leverage for the top-K candidates.
    #[instrument(skip_all)]
    pub async fn rank(
        &self,
        first: &[FundingRate],
        second: &[FundingRate],
        venues: &VenuePair,
        now: DateTime<Utc>,
    ) -> Vec<Opportunity> {
        let mut opportunities = self.compare(first, second, now);
        self.enrich_leverage(&mut opportunities, venues).await;
        opportunities
    }

    /// Fill `long_max_leverage`/`short_max_leverage` for the top-K entries.
    /// Lookups never fail; each (venue, symbol) is queried once.
    pub async fn enrich_leverage(&self, opportunities: &mut [Opportunity], venues: &VenuePair) {
        let mut cache: HashMap<(Venue, String), u32> = HashMap::new();

        for opportunity in opportunities.iter_mut().take(self.top_k) {
            for venue in [opportunity.long_venue, opportunity.short_venue] {
                let symbol = opportunity.symbol_on(venue).to_string();
                let key = (venue, symbol.clone());
                let leverage = match cache.get(&key) {
                    Some(leverage) => *leverage,
                    None => {
                        let leverage = venues.get(venue).get_max_leverage(&symbol).await;
                        cache.insert(key, leverage);
                        leverage
                    }
                };
                if venue == opportunity.long_venue {
                    opportunity.long_max_leverage = Some(leverage);
                } else {
                    opportunity.short_max_leverage = Some(leverage);
                }
            }
        }

        debug!(lookups = cache.len(), "Resolved max leverage for top candidates");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::MockVenueClient;
    use crate::exchange::mock::test_filters;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 5, 30, 0).unwrap()
    }

    fn rate(venue: Venue, base: &str, apy: Decimal, next: DateTime<Utc>) -> FundingRate {
        let symbol = match venue {
            Venue::Aster => format!("{base}USDT"),
            Venue::Hyperliquid => base.to_string(),
        };
        FundingRate {
            venue,
            base_asset: base.to_string(),
            symbol,
            rate: Decimal::ZERO,
            apy,
            next_funding_time: next,
            max_leverage: None,
            is_tradable: true,
        }
    }

    fn later() -> DateTime<Utc> {
        now() + Duration::hours(2)
    }

    #[test]
    fn test_two_mirror_opportunities_per_symbol() {
        let ranker = OpportunityRanker::new(30, 4);
        let aster = vec![rate(Venue::Aster, "BTC", dec!(20), later()), rate(Venue::Aster, "ETH", dec!(5), later())];
        let hl = vec![
            rate(Venue::Hyperliquid, "BTC", dec!(-10), later()),
            rate(Venue::Hyperliquid, "ETH", dec!(8), later()),
            rate(Venue::Hyperliquid, "SOL", dec!(50), later()),
        ];

        let ranked = ranker.compare(&aster, &hl, now());
        assert_eq!(ranked.len(), 4);

        for symbol in ["BTC", "ETH"] {
            let pair: Vec<_> = ranked.iter().filter(|o| o.symbol == symbol).collect();
            assert_eq!(pair.len(), 2);
            assert_eq!(pair[0].apy_difference, -pair[1].apy_difference);
            assert_eq!(pair[0].long_venue, pair[1].short_venue);
        }

        let diffs: Vec<_> = ranked.iter().map(|o| o.apy_difference).collect();
        assert_eq!(diffs, vec![dec!(30), dec!(3), dec!(-3), dec!(-30)]);
        assert_eq!(ranked, ranker.compare(&aster, &hl, now()));
    }

    #[test]
    fn test_btc_scenario_longs_the_negative_venue() {
        let ranker = OpportunityRanker::new(30, 4);
        // 0.0003 per 4h period on Aster, -0.0001 per hour on Hyperliquid.
        let aster = vec![rate(Venue::Aster, "BTC", dec!(65.7), later())];
        let hl = vec![rate(Venue::Hyperliquid, "BTC", dec!(-87.6), later())];

        let ranked = ranker.compare(&aster, &hl, now());
        let top = &ranked[0];
        assert_eq!(top.long_venue, Venue::Hyperliquid);
        assert_eq!(top.short_venue, Venue::Aster);
        assert_eq!(top.apy_difference, dec!(153.3));
        assert_eq!(top.long_symbol, "BTC");
        assert_eq!(top.short_symbol, "BTCUSDT");
    }

    #[test]
    fn test_ties_keep_symbol_then_direction_order() {
        let ranker = OpportunityRanker::new(30, 4);
        let aster = vec![rate(Venue::Aster, "ETH", dec!(1), later()), rate(Venue::Aster, "BTC", dec!(1), later())];
        let hl = vec![rate(Venue::Hyperliquid, "BTC", dec!(1), later()), rate(Venue::Hyperliquid, "ETH", dec!(1), later())];

        let ranked = ranker.compare(&aster, &hl, now());
        let order: Vec<_> = ranked.iter().map(|o| (o.symbol.as_str(), o.long_venue)).collect();
        assert_eq!(
            order,
            vec![
                ("BTC", Venue::Aster),
                ("BTC", Venue::Hyperliquid),
                ("ETH", Venue::Aster),
                ("ETH", Venue::Hyperliquid),
            ]
        );
    }

    #[test]
    fn test_imminence_and_untradable() {
        let ranker = OpportunityRanker::new(30, 4);
        let soon = now() + Duration::minutes(20);
        let aster = vec![rate(Venue::Aster, "BTC", dec!(1), later()), rate(Venue::Aster, "ETH", dec!(1), later())];
        let mut eth = rate(Venue::Hyperliquid, "ETH", dec!(1), soon);
        eth.is_tradable = false;
        let hl = vec![rate(Venue::Hyperliquid, "BTC", dec!(2), soon), eth];

        let ranked = ranker.compare(&aster, &hl, now());
        assert_eq!(ranked.len(), 2);
        assert!(ranked.iter().all(|o| o.funding_is_imminent));
        assert_eq!(ranked[0].next_funding_time, soon);
    }

    #[tokio::test]
    async fn test_only_top_k_are_actionable() {
        let aster = Arc::new(MockVenueClient::aster());
        let hl = Arc::new(MockVenueClient::hyperliquid());
        for (base, lev) in [("BTC", 20), ("ETH", 10)] {
            aster.add_market(&format!("{base}USDT"), dec!(100), test_filters(dec!(0.001)), lev).await;
            hl.add_market(base, dec!(100), test_filters(dec!(0.001)), lev * 2).await;
        }
        let venues = VenuePair::new(aster, hl);

        let ranker = OpportunityRanker::new(30, 2);
        let a = vec![rate(Venue::Aster, "BTC", dec!(10), later()), rate(Venue::Aster, "ETH", dec!(1), later())];
        let h = vec![rate(Venue::Hyperliquid, "BTC", dec!(0), later()), rate(Venue::Hyperliquid, "ETH", dec!(0), later())];

        let ranked = ranker.rank(&a, &h, &venues, now()).await;
        assert_eq!(ranked.len(), 4);
        assert!(ranked[0].is_actionable());
        assert!(ranked[1].is_actionable());
        assert!(!ranked[2].is_actionable());
        assert!(!ranked[3].is_actionable());

        // BTC long HL / short Aster carries 10.
        assert_eq!(ranked[0].symbol, "BTC");
        assert_eq!(ranked[0].long_max_leverage, Some(40));
        assert_eq!(ranked[0].short_max_leverage, Some(20));
    }
}
