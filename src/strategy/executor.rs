//! Order execution for a single leg.
//!
//! Every leg goes maker-first: a post-only limit one tick off the book, and
//! only when the venue refuses it a taker order. Entries fall back to a
//! market order. Exits fall back to a stop-market placed through the mark so
//! it triggers at once, and to a reduce-only market order if even the stop
//! is refused.
//!
//! When the maker call fails for any other reason the order may still have
//! reached the venue. Its state is looked up by client order id first and the
//! taker only covers what the maker did not execute.

use crate::config::ExecutionConfig;
use crate::error::{ApiErrorKind, ArbError, Result};
use crate::exchange::{
    BookTicker, OrderAck, OrderRef, OrderRequest, OrderSide, PositionSide, SymbolFilters, VenueClient,
};
use crate::utils::{offset_by_pct, round_down_to_lot, round_to_tick, sleep_or_cancel, Clock};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

/// Default offset of the exit stop through the mark price.
const DEFAULT_STOP_OFFSET_PCT: Decimal = dec!(0.005);

/// Maker-first placement with taker fallback.
#[derive(Debug, Clone, Copy)]
pub struct MakerTaker {
    stop_offset_pct: Decimal,
}

impl Default for MakerTaker {
    fn default() -> Self {
        Self::new(DEFAULT_STOP_OFFSET_PCT)
    }
}

/// Run the maker-then-taker state machine with default parameters.
pub async fn maker_then_taker<C: VenueClient + ?Sized>(client: &C, request: &OrderRequest) -> Result<OrderAck> {
    MakerTaker::default().run(client, request).await
}

/// What remains of a maker order whose ack was lost.
enum MakerResidual {
    /// Nothing left for a taker order to cover.
    Settled(OrderAck),
    /// Quantity still to place as taker.
    Remaining(Decimal),
}

/// Error kind that decides the fallback, or `None` if the error must propagate.
fn fallback_kind(err: &ArbError) -> Option<ApiErrorKind> {
    match err {
        ArbError::Api { kind, .. } => Some(*kind),
        // Schema drift on the ack says nothing about whether the order rests.
        ArbError::Parsing { .. } => Some(ApiErrorKind::Other),
        _ => None,
    }
}

impl MakerTaker {
    pub fn new(stop_offset_pct: Decimal) -> Self {
        Self { stop_offset_pct }
    }

    /// Post-only price: one tick outside the book for entries, one tick
    /// inside the passive side for reduce-only exits.
    pub fn maker_price(side: OrderSide, reduce_only: bool, book: BookTicker, tick: Decimal) -> Decimal {
        match (side, reduce_only) {
            (OrderSide::Buy, false) => {
                let price = book.bid - tick;
                if price > Decimal::ZERO {
                    price
                } else {
                    book.bid
                }
            }
            (OrderSide::Sell, false) => book.ask + tick,
            (OrderSide::Buy, true) => book.bid + tick,
            (OrderSide::Sell, true) => book.ask - tick,
        }
    }

    /// Stop price that is already satisfied at `mark`: above it for a sell
    /// stop, below it for a buy stop.
    pub fn stop_price(&self, side: OrderSide, mark: Decimal, filters: &SymbolFilters) -> Decimal {
        let pct = match side {
            OrderSide::Sell => self.stop_offset_pct,
            OrderSide::Buy => -self.stop_offset_pct,
        };
        round_to_tick(offset_by_pct(mark, pct), filters.tick_size)
    }

    #[instrument(skip_all, name = "maker_then_taker", fields(venue = %client.venue(), symbol = %request.symbol, side = ?request.side, qty = %request.quantity, reduce_only = request.reduce_only))]
    pub async fn run<C: VenueClient + ?Sized>(&self, client: &C, request: &OrderRequest) -> Result<OrderAck> {
        let symbol = request.symbol.as_str();
        let filters = client.get_symbol_filters(symbol).await?;
        let book = client.get_book_ticker(symbol).await?;
        let price = round_to_tick(
            Self::maker_price(request.side, request.reduce_only, book, filters.tick_size),
            filters.tick_size,
        );

        let mut maker = OrderRequest::post_only(symbol, request.side, request.quantity, price);
        maker.reduce_only = request.reduce_only;
        maker.client_order_id = request.client_order_id.clone();

        let err = match client.submit_order(&maker).await {
            Ok(ack) => {
                info!(order_id = %ack.order_id, status = ?ack.status, %price, "Maker order accepted");
                return Ok(ack);
            }
            Err(err) => err,
        };

        let Some(kind) = fallback_kind(&err) else {
            return Err(err);
        };
        if !kind.permits_taker_fallback() {
            warn!(error = %err, "Maker order rejected, not retrying as taker");
            return Err(err);
        }

        let quantity = if kind.is_expected_rejection() {
            info!(%price, "Maker order would cross, falling back to taker");
            request.quantity
        } else {
            warn!(error = %err, "Unexpected maker failure, checking maker order state");
            match self.settle_maker(client, &maker, &filters).await? {
                MakerResidual::Settled(ack) => return Ok(ack),
                MakerResidual::Remaining(quantity) => quantity,
            }
        };

        if request.reduce_only {
            self.exit_fallback(client, request, quantity, &filters).await
        } else {
            let taker = OrderRequest::market(symbol, request.side, quantity);
            client.submit_order(&taker).await
        }
    }

    /// Resolve a maker order of unknown fate: withdraw whatever still rests
    /// and report what executed.
    async fn settle_maker<C: VenueClient + ?Sized>(
        &self,
        client: &C,
        maker: &OrderRequest,
        filters: &SymbolFilters,
    ) -> Result<MakerResidual> {
        let cloid = maker.client_order_id.as_str();
        let Some(mut state) = client.query_order(&maker.symbol, cloid).await? else {
            info!(client_order_id = %cloid, "Maker order never reached the venue");
            return Ok(MakerResidual::Remaining(maker.quantity));
        };

        if state.status.is_open() {
            let order = OrderRef::ClientOrderId(maker.client_order_id.clone());
            match client.cancel_order(&maker.symbol, &order).await {
                Ok(()) => info!(client_order_id = %cloid, "Cancelled resting maker order"),
                Err(e) if e.is_kind(ApiErrorKind::OrderNotFound) => {}
                Err(e) => {
                    error!(client_order_id = %cloid, error = %e, "Failed to cancel resting maker order");
                    return Err(e);
                }
            }
            // Fills can land between the lookup and the cancel.
            if let Some(latest) = client.query_order(&maker.symbol, cloid).await? {
                state = latest;
            }
        }

        let filled = state.filled_qty.min(maker.quantity);
        if filled.is_zero() {
            return Ok(MakerResidual::Remaining(maker.quantity));
        }

        let remaining = round_down_to_lot(maker.quantity - filled, filters.step_size);
        info!(client_order_id = %cloid, %filled, %remaining, status = ?state.status, "Maker order executed before its ack was lost");
        if remaining.is_zero() || remaining < filters.min_qty {
            if !remaining.is_zero() {
                warn!(shortfall = %remaining, min_qty = %filters.min_qty, "Maker remainder below venue minimum, not covering");
            }
            return Ok(MakerResidual::Settled(state));
        }
        Ok(MakerResidual::Remaining(remaining))
    }

    async fn exit_fallback<C: VenueClient + ?Sized>(
        &self,
        client: &C,
        request: &OrderRequest,
        quantity: Decimal,
        filters: &SymbolFilters,
    ) -> Result<OrderAck> {
        let mark = client.get_price(&request.symbol).await?;
        let stop = self.stop_price(request.side, mark, filters);
        let stop_order = OrderRequest::stop_market(&request.symbol, request.side, quantity, stop).reduce_only();

        match client.submit_order(&stop_order).await {
            Ok(ack) => {
                info!(%mark, %stop, order_id = %ack.order_id, "Exit stop placed");
                Ok(ack)
            }
            Err(e) if e.is_kind(ApiErrorKind::WouldTrigger) => {
                info!(%mark, %stop, "Exit stop would trigger immediately, closing at market");
                let market = OrderRequest::market(&request.symbol, request.side, quantity).reduce_only();
                client.submit_order(&market).await
            }
            Err(e) => Err(e),
        }
    }
}

/// Outcome of opening or closing one leg, possibly in several child orders.
#[derive(Debug, Clone, PartialEq)]
pub struct LegFill {
    pub symbol: String,
    pub side: OrderSide,
    pub requested: Decimal,
    /// Sum of child order quantities accepted by the venue
    pub placed: Decimal,
    /// Quantity left unplaced because it fell below the venue minimum
    pub shortfall: Decimal,
    pub acks: Vec<OrderAck>,
}

/// Places legs through [`MakerTaker`], chunking by the venue's max order size.
pub struct OrderExecutor {
    maker_taker: MakerTaker,
    inter_order_delay: Duration,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
}

impl OrderExecutor {
    pub fn new(config: &ExecutionConfig, clock: Arc<dyn Clock>, cancel: CancellationToken) -> Self {
        Self {
            maker_taker: MakerTaker::new(config.stop_offset_pct),
            inter_order_delay: config.inter_order_delay(),
            clock,
            cancel,
        }
    }

    /// Open (or add to) a position.
    pub async fn open_leg(
        &self,
        client: &dyn VenueClient,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
    ) -> Result<LegFill> {
        info!(venue = %client.venue(), %symbol, ?side, %quantity, "Opening leg");
        self.execute(client, symbol, side, quantity, false).await
    }

    /// Reduce a `position_side` position by `quantity`.
    pub async fn close_leg(
        &self,
        client: &dyn VenueClient,
        symbol: &str,
        position_side: PositionSide,
        quantity: Decimal,
    ) -> Result<LegFill> {
        info!(venue = %client.venue(), %symbol, ?position_side, %quantity, "Closing leg");
        self.execute(client, symbol, position_side.exit_side(), quantity, true).await
    }

    async fn execute(
        &self,
        client: &dyn VenueClient,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        reduce_only: bool,
    ) -> Result<LegFill> {
        let filters = client.get_symbol_filters(symbol).await?;
        let mut remaining = round_down_to_lot(quantity, filters.step_size);
        let mut fill = LegFill {
            symbol: symbol.to_string(),
            side,
            requested: quantity,
            placed: Decimal::ZERO,
            shortfall: Decimal::ZERO,
            acks: Vec::new(),
        };

        while remaining > Decimal::ZERO {
            let child = round_down_to_lot(remaining.min(filters.max_qty), filters.step_size);
            if child.is_zero() || child < filters.min_qty {
                warn!(
                    venue = %client.venue(),
                    %symbol,
                    shortfall = %remaining,
                    min_qty = %filters.min_qty,
                    "Remaining quantity below venue minimum, stopping"
                );
                fill.shortfall = remaining;
                break;
            }

            let mut request = OrderRequest::maker_then_taker(symbol, side, child);
            request.reduce_only = reduce_only;
            let ack = self.maker_taker.run(client, &request).await?;

            fill.placed += child;
            fill.acks.push(ack);
            remaining -= child;

            if remaining > Decimal::ZERO && !sleep_or_cancel(self.clock.as_ref(), self.inter_order_delay, &self.cancel).await {
                return Err(ArbError::Cancelled);
            }
        }

        Ok(fill)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::mock::test_filters;
    use crate::exchange::{MockVenueClient, OrderStatus, OrderType, TimeInForce, Venue};
    use crate::utils::ManualClock;
    use chrono::{TimeZone, Utc};

    async fn venue() -> MockVenueClient {
        let client = MockVenueClient::aster();
        client.add_market("BTCUSDT", dec!(50000), test_filters(dec!(0.001)), 20).await;
        client.set_book("BTCUSDT", dec!(49999), dec!(50001)).await;
        client
    }

    fn would_cross() -> ArbError {
        ArbError::api(Venue::Aster, ApiErrorKind::WouldCross, Some(-5022), "post only rejected")
    }

    fn executor(clock: Arc<ManualClock>) -> OrderExecutor {
        let config = ExecutionConfig::default();
        OrderExecutor::new(&config, clock, CancellationToken::new())
    }

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()))
    }

    #[test]
    fn test_maker_prices() {
        let book = BookTicker {
            bid: dec!(100.0),
            ask: dec!(100.5),
        };
        let tick = dec!(0.1);
        assert_eq!(MakerTaker::maker_price(OrderSide::Buy, false, book, tick), dec!(99.9));
        assert_eq!(MakerTaker::maker_price(OrderSide::Sell, false, book, tick), dec!(100.6));
        assert_eq!(MakerTaker::maker_price(OrderSide::Buy, true, book, tick), dec!(100.1));
        assert_eq!(MakerTaker::maker_price(OrderSide::Sell, true, book, tick), dec!(100.4));
    }

    #[test]
    fn test_stop_goes_through_mark() {
        let mt = MakerTaker::new(dec!(0.01));
        let filters = test_filters(dec!(0.001));
        // Closing a long sells; the stop sits above the mark.
        assert_eq!(mt.stop_price(OrderSide::Sell, dec!(50000), &filters), dec!(50500));
        assert_eq!(mt.stop_price(OrderSide::Buy, dec!(50000), &filters), dec!(49500));
    }

    #[tokio::test]
    async fn test_maker_order_accepted() {
        let client = venue().await;
        let request = OrderRequest::maker_then_taker("BTCUSDT", OrderSide::Buy, dec!(0.01));

        let ack = client.place_order(&request).await.unwrap();
        assert_eq!(ack.order_type, OrderType::Limit);
        assert_eq!(ack.client_order_id, request.client_order_id);

        let submitted = client.submitted_orders().await;
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].price, Some(dec!(49998.9)));
        assert_eq!(submitted[0].time_in_force, Some(TimeInForce::PostOnly));
    }

    #[tokio::test]
    async fn test_would_cross_falls_back_to_market_once() {
        let client = venue().await;
        client.fail_next_order(would_cross()).await;
        let request = OrderRequest::maker_then_taker("BTCUSDT", OrderSide::Sell, dec!(0.02));

        let ack = client.place_order(&request).await.unwrap();
        assert_eq!(ack.order_type, OrderType::Market);
        assert_eq!(ack.status, OrderStatus::Filled);

        let submitted = client.submitted_orders().await;
        assert_eq!(submitted.len(), 2);
        assert_eq!(submitted[0].order_type, OrderType::Limit);
        assert_eq!(submitted[1].order_type, OrderType::Market);
        assert_eq!(submitted[1].side, OrderSide::Sell);
        assert_eq!(submitted[1].quantity, dec!(0.02));
        assert_ne!(submitted[1].client_order_id, submitted[0].client_order_id);
        assert_eq!(client.position_qty("BTCUSDT").await, dec!(-0.02));
    }

    #[tokio::test]
    async fn test_invalid_request_propagates() {
        let client = venue().await;
        client
            .fail_next_order(ArbError::api(Venue::Aster, ApiErrorKind::InvalidRequest, Some(-1111), "precision"))
            .await;
        let request = OrderRequest::maker_then_taker("BTCUSDT", OrderSide::Buy, dec!(0.01));

        let err = client.place_order(&request).await.unwrap_err();
        assert!(err.is_kind(ApiErrorKind::InvalidRequest));
        assert_eq!(client.submitted_orders().await.len(), 1);
    }

    #[tokio::test]
    async fn test_transport_error_cancels_resting_maker_before_fallback() {
        let client = venue().await;
        client.set_post_only_fills(false).await;
        // The maker order reaches the book but its response is lost.
        client
            .lose_next_ack(ArbError::api(Venue::Aster, ApiErrorKind::Transport, None, "connection reset"))
            .await;
        let request = OrderRequest::maker_then_taker("BTCUSDT", OrderSide::Buy, dec!(0.01));

        let ack = client.place_order(&request).await.unwrap();
        assert_eq!(ack.order_type, OrderType::Market);
        assert_eq!(client.open_order_count().await, 0);
        assert_eq!(client.position_qty("BTCUSDT").await, dec!(0.01));
    }

    #[tokio::test]
    async fn test_filled_maker_with_lost_ack_is_not_doubled() {
        let client = venue().await;
        // The maker order fills on the venue but its response is lost.
        client
            .lose_next_ack(ArbError::api(Venue::Aster, ApiErrorKind::Transport, None, "connection reset"))
            .await;
        let request = OrderRequest::maker_then_taker("BTCUSDT", OrderSide::Buy, dec!(0.01));

        let ack = client.place_order(&request).await.unwrap();
        assert_eq!(ack.order_type, OrderType::Limit);
        assert_eq!(ack.status, OrderStatus::Filled);
        assert_eq!(ack.filled_qty, dec!(0.01));
        assert_eq!(ack.client_order_id, request.client_order_id);
        assert_eq!(client.submitted_orders().await.len(), 1);
        assert_eq!(client.position_qty("BTCUSDT").await, dec!(0.01));
    }

    #[tokio::test]
    async fn test_partly_filled_maker_with_lost_ack_covers_only_remainder() {
        let client = venue().await;
        client.fill_next_post_only_partially(dec!(0.004)).await;
        client
            .lose_next_ack(ArbError::api(Venue::Aster, ApiErrorKind::Transport, None, "connection reset"))
            .await;
        let request = OrderRequest::maker_then_taker("BTCUSDT", OrderSide::Buy, dec!(0.01));

        let ack = client.place_order(&request).await.unwrap();
        assert_eq!(ack.order_type, OrderType::Market);

        let submitted = client.submitted_orders().await;
        assert_eq!(submitted.len(), 2);
        assert_eq!(submitted[1].order_type, OrderType::Market);
        assert_eq!(submitted[1].quantity, dec!(0.006));
        assert_eq!(client.open_order_count().await, 0);
        assert_eq!(client.position_qty("BTCUSDT").await, dec!(0.01));
    }

    #[tokio::test]
    async fn test_partly_filled_exit_with_lost_ack_stops_only_remainder() {
        let client = venue().await;
        client.set_position("BTCUSDT", dec!(0.05), dec!(50000)).await;
        client.fill_next_post_only_partially(dec!(0.02)).await;
        client
            .lose_next_ack(ArbError::api(Venue::Aster, ApiErrorKind::Transport, None, "connection reset"))
            .await;
        let request = OrderRequest::maker_then_taker("BTCUSDT", OrderSide::Sell, dec!(0.05)).reduce_only();

        let ack = client.place_order(&request).await.unwrap();
        assert_eq!(ack.order_type, OrderType::StopMarket);

        let submitted = client.submitted_orders().await;
        assert_eq!(submitted[1].quantity, dec!(0.03));
        assert!(submitted[1].reduce_only);
        assert_eq!(client.position_qty("BTCUSDT").await, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_exit_falls_back_to_stop_then_market() {
        let client = venue().await;
        client.set_position("BTCUSDT", dec!(0.05), dec!(50000)).await;

        client.fail_next_order(would_cross()).await;
        let request = OrderRequest::maker_then_taker("BTCUSDT", OrderSide::Sell, dec!(0.05)).reduce_only();
        let ack = client.place_order(&request).await.unwrap();
        assert_eq!(ack.order_type, OrderType::StopMarket);

        let submitted = client.submitted_orders().await;
        assert_eq!(submitted[1].stop_price, Some(dec!(50250)));
        assert!(submitted[1].reduce_only);
        assert_eq!(client.position_qty("BTCUSDT").await, Decimal::ZERO);

        client.set_position("BTCUSDT", dec!(0.05), dec!(50000)).await;
        client.set_reject_stops(true).await;
        client.fail_next_order(would_cross()).await;
        let request = OrderRequest::maker_then_taker("BTCUSDT", OrderSide::Sell, dec!(0.05)).reduce_only();
        let ack = client.place_order(&request).await.unwrap();
        assert_eq!(ack.order_type, OrderType::Market);
        let submitted = client.submitted_orders().await;
        let last = submitted.last().unwrap();
        assert!(last.reduce_only);
        assert_eq!(client.position_qty("BTCUSDT").await, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_chunks_by_max_qty_and_logs_shortfall() {
        let client = MockVenueClient::aster();
        let filters = SymbolFilters {
            tick_size: dec!(0.1),
            step_size: dec!(0.01),
            min_notional: dec!(5),
            min_qty: dec!(0.05),
            max_qty: dec!(1),
        };
        client.add_market("BTCUSDT", dec!(50000), filters, 20).await;
        let clock = clock();
        let executor = executor(clock.clone());
        let started = clock.now();

        let fill = executor
            .open_leg(&client, "BTCUSDT", OrderSide::Buy, dec!(2.534))
            .await
            .unwrap();

        // 2.534 -> 2.53 -> 1 + 1 + 0.53
        assert_eq!(fill.acks.len(), 3);
        assert_eq!(fill.placed, dec!(2.53));
        assert_eq!(fill.shortfall, Decimal::ZERO);
        let ids: std::collections::HashSet<_> = fill.acks.iter().map(|a| a.client_order_id.clone()).collect();
        assert_eq!(ids.len(), 3);
        // Two inter-order pauses of 500ms.
        assert_eq!(clock.now() - started, chrono::Duration::milliseconds(1000));

        let fill = executor
            .open_leg(&client, "BTCUSDT", OrderSide::Buy, dec!(1.03))
            .await
            .unwrap();
        assert_eq!(fill.placed, dec!(1));
        assert_eq!(fill.shortfall, dec!(0.03));
    }

    #[tokio::test]
    async fn test_close_leg_is_reduce_only() {
        let client = venue().await;
        client.set_position("BTCUSDT", dec!(-0.03), dec!(50000)).await;
        let executor = executor(clock());

        let fill = executor
            .close_leg(&client, "BTCUSDT", PositionSide::Short, dec!(0.03))
            .await
            .unwrap();
        assert_eq!(fill.side, OrderSide::Buy);
        assert!(client.submitted_orders().await.iter().all(|o| o.reduce_only));
        assert_eq!(client.position_qty("BTCUSDT").await, Decimal::ZERO);
    }
}
