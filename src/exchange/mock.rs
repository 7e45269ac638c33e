//! In-memory venue for exercising the strategy layer without a network.
//!
//! Orders fill instantly against configured prices, positions net per symbol,
//! and failures can be queued up front so tests can drive the executor and
//! reconciler through their error paths deterministically.

use super::traits::{Venue, VenueClient};
use super::types::*;
use crate::error::{ApiErrorKind, ArbError, Result};
use crate::utils::round_down_to_lot;
use async_trait::async_trait;
use rust_decimal::prelude::Signed;
use rust_decimal::Decimal;
#[cfg(test)]
use rust_decimal_macros::dec;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

/// Simulated position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MockPosition {
    /// Signed quantity (negative = short)
    pub quantity: Decimal,
    pub entry_price: Decimal,
}

/// Mutable venue state behind the client.
#[derive(Debug, Default)]
pub struct MockVenueState {
    pub funding: Vec<RawFunding>,
    pub prices: HashMap<String, Decimal>,
    pub books: HashMap<String, BookTicker>,
    pub filters: HashMap<String, SymbolFilters>,
    pub max_leverage: HashMap<String, u32>,
    pub leverage: HashMap<String, u32>,
    pub balance: Option<WalletBalance>,
    pub positions: HashMap<String, MockPosition>,
    pub open_orders: Vec<OpenOrder>,
    /// Latest state of every accepted order, by client order id.
    pub orders: HashMap<String, OrderAck>,
    /// Every primitive order submitted, including rejected ones.
    pub submitted: Vec<OrderRequest>,
    /// Errors returned by the next `submit_order` calls, in order.
    pub failures: VecDeque<ArbError>,
    /// Errors returned by the next `cancel_order` calls, in order.
    pub cancel_failures: VecDeque<ArbError>,
    /// Errors returned after the next orders were processed: the order
    /// takes effect on the venue but the caller sees a failure.
    pub lost_acks: VecDeque<ArbError>,
    /// Post-only orders fill immediately instead of resting.
    pub post_only_fills: bool,
    /// The next post-only order fills this much and rests the remainder.
    pub post_only_partial: Option<Decimal>,
    /// Reduce-only orders are accepted but never change positions.
    pub frozen: bool,
    /// Stop orders are rejected as already triggered.
    pub reject_stops: bool,
    /// `get_wallet_balance` fails with a transport error.
    pub balance_unavailable: bool,
}

/// Mock client implementing [`VenueClient`] over [`MockVenueState`].
pub struct MockVenueClient {
    venue: Venue,
    schedule: FundingSchedule,
    quote_suffix: String,
    state: RwLock<MockVenueState>,
    order_id_counter: AtomicU64,
}

impl MockVenueClient {
    pub fn new(venue: Venue, schedule: FundingSchedule, quote_suffix: &str) -> Self {
        let state = MockVenueState {
            post_only_fills: true,
            ..Default::default()
        };
        Self {
            venue,
            schedule,
            quote_suffix: quote_suffix.to_string(),
            state: RwLock::new(state),
            order_id_counter: AtomicU64::new(1),
        }
    }

    /// Aster-shaped venue: `BTCUSDT` symbols, 4-hourly funding.
    pub fn aster() -> Self {
        Self::new(Venue::Aster, FundingSchedule::FixedUtcHours { interval_hours: 4 }, "USDT")
    }

    /// Hyperliquid-shaped venue: bare coin symbols, hourly funding.
    pub fn hyperliquid() -> Self {
        Self::new(
            Venue::Hyperliquid,
            FundingSchedule::Continuous { interval_minutes: 60 },
            "",
        )
    }

    /// Register a tradable market with price, filters and max leverage.
    pub async fn add_market(&self, symbol: &str, price: Decimal, filters: SymbolFilters, max_leverage: u32) {
        let mut state = self.state.write().await;
        state.prices.insert(symbol.to_string(), price);
        state.filters.insert(symbol.to_string(), filters);
        state.max_leverage.insert(symbol.to_string(), max_leverage);
    }

    pub async fn set_book(&self, symbol: &str, bid: Decimal, ask: Decimal) {
        self.state
            .write()
            .await
            .books
            .insert(symbol.to_string(), BookTicker { bid, ask });
    }

    pub async fn set_funding(&self, funding: Vec<RawFunding>) {
        self.state.write().await.funding = funding;
    }

    pub async fn set_balance(&self, total: Decimal, available: Decimal) {
        self.state.write().await.balance = Some(WalletBalance {
            total: Some(total),
            available: Some(available),
            raw: serde_json::Value::Null,
        });
    }

    pub async fn set_position(&self, symbol: &str, quantity: Decimal, entry_price: Decimal) {
        self.state.write().await.positions.insert(
            symbol.to_string(),
            MockPosition {
                quantity,
                entry_price,
            },
        );
    }

    pub async fn add_open_order(&self, symbol: &str, side: OrderSide, quantity: Decimal, price: Decimal) -> String {
        let order_id = self.next_order_id();
        self.state.write().await.open_orders.push(OpenOrder {
            symbol: symbol.to_string(),
            order_id: order_id.clone(),
            client_order_id: Some(new_client_order_id()),
            side,
            price,
            quantity,
            reduce_only: false,
        });
        order_id
    }

    pub async fn fail_next_order(&self, err: ArbError) {
        self.state.write().await.failures.push_back(err);
    }

    /// Process the next order normally, then report `err` instead of its ack.
    pub async fn lose_next_ack(&self, err: ArbError) {
        self.state.write().await.lost_acks.push_back(err);
    }

    pub async fn fail_next_cancel(&self, err: ArbError) {
        self.state.write().await.cancel_failures.push_back(err);
    }

    pub async fn set_post_only_fills(&self, fills: bool) {
        self.state.write().await.post_only_fills = fills;
    }

    pub async fn fill_next_post_only_partially(&self, quantity: Decimal) {
        self.state.write().await.post_only_partial = Some(quantity);
    }

    pub async fn set_frozen(&self, frozen: bool) {
        self.state.write().await.frozen = frozen;
    }

    pub async fn set_reject_stops(&self, reject: bool) {
        self.state.write().await.reject_stops = reject;
    }

    pub async fn set_balance_unavailable(&self, unavailable: bool) {
        self.state.write().await.balance_unavailable = unavailable;
    }

    /// Orders submitted so far.
    pub async fn submitted_orders(&self) -> Vec<OrderRequest> {
        self.state.read().await.submitted.clone()
    }

    pub async fn leverage_for(&self, symbol: &str) -> Option<u32> {
        self.state.read().await.leverage.get(symbol).copied()
    }

    pub async fn position_qty(&self, symbol: &str) -> Decimal {
        self.state
            .read()
            .await
            .positions
            .get(symbol)
            .map(|p| p.quantity)
            .unwrap_or(Decimal::ZERO)
    }

    pub async fn open_order_count(&self) -> usize {
        self.state.read().await.open_orders.len()
    }

    fn next_order_id(&self) -> String {
        self.order_id_counter.fetch_add(1, Ordering::SeqCst).to_string()
    }

    fn process(&self, state: &mut MockVenueState, request: &OrderRequest) -> Result<OrderAck> {
        let mark = state.prices.get(&request.symbol).copied().unwrap_or(Decimal::ZERO);

        match request.order_type {
            OrderType::MakerThenTaker => Err(self.rejection(
                ApiErrorKind::InvalidRequest,
                -1116,
                "Invalid orderType.",
            )),
            OrderType::Market => {
                apply_fill(state, request, mark);
                Ok(self.ack(request, OrderStatus::Filled, OrderType::Market, Some(mark)))
            }
            OrderType::StopMarket => {
                if state.reject_stops {
                    return Err(self.rejection(
                        ApiErrorKind::WouldTrigger,
                        -2021,
                        "Order would immediately trigger.",
                    ));
                }
                apply_fill(state, request, mark);
                Ok(self.ack(request, OrderStatus::Filled, OrderType::StopMarket, Some(mark)))
            }
            OrderType::Limit => {
                let price = request.price.unwrap_or(mark);
                if request.time_in_force == Some(TimeInForce::PostOnly) {
                    let book = state
                        .books
                        .get(&request.symbol)
                        .copied()
                        .unwrap_or(BookTicker { bid: mark, ask: mark });
                    let crosses = match request.side {
                        OrderSide::Buy => price >= book.ask,
                        OrderSide::Sell => price <= book.bid,
                    };
                    if crosses {
                        return Err(self.rejection(
                            ApiErrorKind::WouldCross,
                            -5022,
                            "Due to the order could not be executed as maker, the Post Only order will be rejected.",
                        ));
                    }
                    let partial = state.post_only_partial.take().filter(|q| *q < request.quantity);
                    if let Some(filled) = partial {
                        let mut executed = request.clone();
                        executed.quantity = filled;
                        apply_fill(state, &executed, price);
                        let mut ack = self.ack(request, OrderStatus::PartiallyFilled, OrderType::Limit, Some(price));
                        ack.filled_qty = filled;
                        self.rest(state, request, &ack, price, request.quantity - filled);
                        return Ok(ack);
                    }
                    if !state.post_only_fills {
                        let ack = self.ack(request, OrderStatus::New, OrderType::Limit, None);
                        self.rest(state, request, &ack, price, request.quantity);
                        return Ok(ack);
                    }
                }
                apply_fill(state, request, price);
                Ok(self.ack(request, OrderStatus::Filled, OrderType::Limit, Some(price)))
            }
        }
    }

    fn rest(&self, state: &mut MockVenueState, request: &OrderRequest, ack: &OrderAck, price: Decimal, quantity: Decimal) {
        state.open_orders.push(OpenOrder {
            symbol: request.symbol.clone(),
            order_id: ack.order_id.clone(),
            client_order_id: Some(request.client_order_id.clone()),
            side: request.side,
            price,
            quantity,
            reduce_only: request.reduce_only,
        });
    }

    fn rejection(&self, kind: ApiErrorKind, code: i64, message: &str) -> ArbError {
        ArbError::api(self.venue, kind, Some(code), message)
    }

    fn ack(&self, request: &OrderRequest, status: OrderStatus, order_type: OrderType, fill: Option<Decimal>) -> OrderAck {
        OrderAck {
            symbol: request.symbol.clone(),
            order_id: self.next_order_id(),
            client_order_id: request.client_order_id.clone(),
            status,
            order_type,
            side: request.side,
            filled_qty: if fill.is_some() { request.quantity } else { Decimal::ZERO },
            avg_price: fill,
        }
    }
}

/// Net a fill into the position book.
fn apply_fill(state: &mut MockVenueState, request: &OrderRequest, price: Decimal) {
    if request.reduce_only && state.frozen {
        return;
    }

    let signed = match request.side {
        OrderSide::Buy => request.quantity,
        OrderSide::Sell => -request.quantity,
    };
    let current = state
        .positions
        .get(&request.symbol)
        .copied()
        .unwrap_or(MockPosition {
            quantity: Decimal::ZERO,
            entry_price: Decimal::ZERO,
        });

    let mut next = current.quantity + signed;
    if request.reduce_only {
        // Reduce-only can shrink toward zero but never flip or grow.
        if current.quantity == Decimal::ZERO || current.quantity.signum() == signed.signum() {
            return;
        }
        if next.signum() != current.quantity.signum() {
            next = Decimal::ZERO;
        }
    }

    if next == Decimal::ZERO {
        state.positions.remove(&request.symbol);
        return;
    }

    let entry_price = if current.quantity == Decimal::ZERO || current.quantity.signum() != next.signum() {
        price
    } else if next.abs() > current.quantity.abs() {
        (current.quantity.abs() * current.entry_price + request.quantity * price) / next.abs()
    } else {
        current.entry_price
    };

    state.positions.insert(
        request.symbol.clone(),
        MockPosition {
            quantity: next,
            entry_price,
        },
    );
}

#[async_trait]
impl VenueClient for MockVenueClient {
    fn venue(&self) -> Venue {
        self.venue
    }

    fn funding_schedule(&self) -> FundingSchedule {
        self.schedule
    }

    fn base_asset(&self, symbol: &str) -> Option<String> {
        if self.quote_suffix.is_empty() {
            return (!symbol.is_empty()).then(|| symbol.to_string());
        }
        symbol
            .strip_suffix(&self.quote_suffix)
            .filter(|base| !base.is_empty())
            .map(str::to_string)
    }

    fn format_quantity(&self, quantity: Decimal, filters: &SymbolFilters) -> String {
        round_down_to_lot(quantity, filters.step_size).to_string()
    }

    fn format_price(&self, price: Decimal, _filters: &SymbolFilters) -> String {
        price.normalize().to_string()
    }

    async fn get_price(&self, symbol: &str) -> Result<Decimal> {
        self.state
            .read()
            .await
            .prices
            .get(symbol)
            .copied()
            .ok_or_else(|| self.rejection(ApiErrorKind::InvalidRequest, -1121, "Invalid symbol."))
    }

    async fn get_book_ticker(&self, symbol: &str) -> Result<BookTicker> {
        if let Some(book) = self.state.read().await.books.get(symbol) {
            return Ok(*book);
        }
        let price = self.get_price(symbol).await?;
        Ok(BookTicker { bid: price, ask: price })
    }

    async fn get_funding_rates(&self, symbol: Option<&str>) -> Result<Vec<RawFunding>> {
        let state = self.state.read().await;
        Ok(state
            .funding
            .iter()
            .filter(|f| symbol.map_or(true, |s| f.symbol == s))
            .cloned()
            .collect())
    }

    async fn get_max_leverage(&self, symbol: &str) -> u32 {
        self.state
            .read()
            .await
            .max_leverage
            .get(symbol)
            .copied()
            .unwrap_or(1)
    }

    async fn get_symbol_filters(&self, symbol: &str) -> Result<SymbolFilters> {
        self.state
            .read()
            .await
            .filters
            .get(symbol)
            .copied()
            .ok_or_else(|| self.rejection(ApiErrorKind::InvalidRequest, -1121, "Invalid symbol."))
    }

    async fn get_wallet_balance(&self) -> Result<WalletBalance> {
        let state = self.state.read().await;
        if state.balance_unavailable {
            return Err(ArbError::api(self.venue, ApiErrorKind::Transport, None, "connection reset"));
        }
        state
            .balance
            .clone()
            .ok_or_else(|| ArbError::parsing(self.venue, "balance payload missing total and available"))
    }

    async fn submit_order(&self, request: &OrderRequest) -> Result<OrderAck> {
        let mut state = self.state.write().await;
        state.submitted.push(request.clone());
        debug!(venue = %self.venue, symbol = %request.symbol, order_type = ?request.order_type, side = ?request.side, qty = %request.quantity, "mock order");

        if let Some(err) = state.failures.pop_front() {
            return Err(err);
        }

        let ack = self.process(&mut state, request)?;
        state.orders.insert(ack.client_order_id.clone(), ack.clone());
        if let Some(err) = state.lost_acks.pop_front() {
            return Err(err);
        }
        Ok(ack)
    }

    async fn cancel_order(&self, symbol: &str, order: &OrderRef) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(err) = state.cancel_failures.pop_front() {
            return Err(err);
        }

        let index = state.open_orders.iter().position(|o| {
            let hit = match order {
                OrderRef::OrderId(id) => &o.order_id == id,
                OrderRef::ClientOrderId(cloid) => o.client_order_id.as_deref() == Some(cloid.as_str()),
            };
            o.symbol == symbol && hit
        });
        let Some(index) = index else {
            return Err(self.rejection(ApiErrorKind::OrderNotFound, -2011, "Unknown order sent."));
        };

        let cancelled = state.open_orders.remove(index);
        if let Some(cloid) = cancelled.client_order_id {
            if let Some(ack) = state.orders.get_mut(&cloid) {
                ack.status = OrderStatus::Canceled;
            }
        }
        Ok(())
    }

    async fn get_open_order(&self, symbol: &str, client_order_id: &str) -> Result<Option<OpenOrder>> {
        Ok(self
            .state
            .read()
            .await
            .open_orders
            .iter()
            .find(|o| o.symbol == symbol && o.client_order_id.as_deref() == Some(client_order_id))
            .cloned())
    }

    async fn query_order(&self, symbol: &str, client_order_id: &str) -> Result<Option<OrderAck>> {
        Ok(self
            .state
            .read()
            .await
            .orders
            .get(client_order_id)
            .filter(|ack| ack.symbol == symbol)
            .cloned())
    }

    async fn get_all_open_orders(&self) -> Result<Vec<OpenOrder>> {
        Ok(self.state.read().await.open_orders.clone())
    }

    async fn get_all_positions(&self) -> Result<Vec<VenuePosition>> {
        let state = self.state.read().await;
        let mut positions: Vec<VenuePosition> = state
            .positions
            .iter()
            .filter(|(_, p)| p.quantity != Decimal::ZERO)
            .map(|(symbol, p)| {
                let mark = state.prices.get(symbol).copied();
                VenuePosition {
                    symbol: symbol.clone(),
                    quantity: p.quantity,
                    entry_price: p.entry_price,
                    mark_price: mark,
                    unrealized_pnl: mark.map_or(Decimal::ZERO, |m| p.quantity * (m - p.entry_price)),
                    leverage: state.leverage.get(symbol).copied(),
                }
            })
            .collect();
        positions.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(positions)
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<()> {
        self.state.write().await.leverage.insert(symbol.to_string(), leverage);
        Ok(())
    }
}

/// Filters used across strategy tests: BTC-like lot sizes.
#[cfg(test)]
pub fn test_filters(step_size: Decimal) -> SymbolFilters {
    SymbolFilters {
        tick_size: dec!(0.1),
        step_size,
        min_notional: dec!(5),
        min_qty: step_size,
        max_qty: dec!(1000),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup() -> MockVenueClient {
        let client = MockVenueClient::aster();
        client
            .add_market("BTCUSDT", dec!(50000), test_filters(dec!(0.001)), 20)
            .await;
        client.set_book("BTCUSDT", dec!(49999), dec!(50001)).await;
        client
    }

    #[tokio::test]
    async fn test_market_order_opens_and_closes() {
        let client = setup().await;
        let ack = client
            .submit_order(&OrderRequest::market("BTCUSDT", OrderSide::Sell, dec!(0.5)))
            .await
            .unwrap();
        assert_eq!(ack.status, OrderStatus::Filled);
        assert_eq!(client.position_qty("BTCUSDT").await, dec!(-0.5));

        let pos = client.get_position("BTCUSDT").await.unwrap().unwrap();
        assert_eq!(pos.side(), PositionSide::Short);

        client.close_position("BTCUSDT").await.unwrap();
        assert_eq!(client.position_qty("BTCUSDT").await, Decimal::ZERO);
        assert!(client.get_all_positions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_post_only_cross_is_rejected() {
        let client = setup().await;
        let err = client
            .submit_order(&OrderRequest::post_only("BTCUSDT", OrderSide::Buy, dec!(0.1), dec!(50001)))
            .await
            .unwrap_err();
        assert!(err.is_kind(ApiErrorKind::WouldCross));
        assert_eq!(client.position_qty("BTCUSDT").await, Decimal::ZERO);
        assert_eq!(client.submitted_orders().await.len(), 1);
    }

    #[tokio::test]
    async fn test_reduce_only_never_flips() {
        let client = setup().await;
        client.set_position("BTCUSDT", dec!(0.2), dec!(50000)).await;
        client
            .submit_order(&OrderRequest::market("BTCUSDT", OrderSide::Sell, dec!(0.5)).reduce_only())
            .await
            .unwrap();
        assert_eq!(client.position_qty("BTCUSDT").await, Decimal::ZERO);

        client
            .submit_order(&OrderRequest::market("BTCUSDT", OrderSide::Sell, dec!(0.5)).reduce_only())
            .await
            .unwrap();
        assert_eq!(client.position_qty("BTCUSDT").await, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_resting_order_cancel_by_client_id() {
        let client = setup().await;
        client.set_post_only_fills(false).await;
        let request = OrderRequest::post_only("BTCUSDT", OrderSide::Buy, dec!(0.1), dec!(49998));
        let ack = client.submit_order(&request).await.unwrap();
        assert_eq!(ack.status, OrderStatus::New);
        assert!(client
            .get_open_order("BTCUSDT", &request.client_order_id)
            .await
            .unwrap()
            .is_some());

        client
            .cancel_order("BTCUSDT", &OrderRef::ClientOrderId(request.client_order_id.clone()))
            .await
            .unwrap();
        assert_eq!(client.open_order_count().await, 0);
        let state = client
            .query_order("BTCUSDT", &request.client_order_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state.status, OrderStatus::Canceled);

        let err = client
            .cancel_order("BTCUSDT", &OrderRef::ClientOrderId(request.client_order_id))
            .await
            .unwrap_err();
        assert!(err.is_kind(ApiErrorKind::OrderNotFound));
    }

    #[test]
    fn test_symbol_normalization() {
        let aster = MockVenueClient::aster();
        assert_eq!(aster.base_asset("ETHUSDT").as_deref(), Some("ETH"));
        assert_eq!(aster.base_asset("ETHBUSD"), None);

        let hl = MockVenueClient::hyperliquid();
        assert_eq!(hl.base_asset("ETH").as_deref(), Some("ETH"));
    }

    #[tokio::test]
    async fn test_partial_post_only_fill_rests_remainder() {
        let client = setup().await;
        client.fill_next_post_only_partially(dec!(0.04)).await;
        let request = OrderRequest::post_only("BTCUSDT", OrderSide::Buy, dec!(0.1), dec!(49998));

        let ack = client.submit_order(&request).await.unwrap();
        assert_eq!(ack.status, OrderStatus::PartiallyFilled);
        assert_eq!(ack.filled_qty, dec!(0.04));
        assert_eq!(client.position_qty("BTCUSDT").await, dec!(0.04));

        let resting = client
            .get_open_order("BTCUSDT", &request.client_order_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resting.quantity, dec!(0.06));
        assert!(client.query_order("BTCUSDT", "unknown").await.unwrap().is_none());
    }
}
