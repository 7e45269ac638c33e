//! Aster futures REST API client.
//!
//! Binance-style `fapi` endpoints. Private requests are HMAC-signed over the
//! canonical query and stamped with server-corrected time, so the client
//! keeps its own clock offset and re-syncs it when the venue rejects a
//! timestamp.

use super::signing::{signed_query, QueryBuilder};
use super::types::*;
use crate::config::AsterConfig;
use crate::error::{ApiErrorKind, ArbError, Result};
use crate::exchange::traits::{Venue, VenueClient};
use crate::exchange::types::*;
use crate::utils::{precision_of, round_down_to_lot, round_to_tick};
use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, Method, StatusCode};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::de::DeserializeOwned;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

const QUOTE_ASSET: &str = "USDT";
const API_KEY_HEADER: &str = "X-MBX-APIKEY";

/// Used when the leverage bracket lookup fails.
const FALLBACK_MAX_LEVERAGE: u32 = 1;

/// Applied when exchangeInfo omits MIN_NOTIONAL.
const DEFAULT_MIN_NOTIONAL: Decimal = dec!(5);

/// Cached exchangeInfo: per-symbol filters and the tradable set.
#[derive(Debug, Default)]
struct MarketCache {
    filters: HashMap<String, SymbolFilters>,
    tradable: HashSet<String>,
}

/// Aster perpetual futures client.
pub struct AsterClient {
    http: Client,
    config: AsterConfig,
    /// `server_ms - local_ms`, applied to every signed timestamp
    clock_offset_ms: AtomicI64,
    last_sync: Mutex<Option<Instant>>,
    markets: RwLock<Option<MarketCache>>,
}

impl AsterClient {
    /// Create a new Aster client from configuration.
    pub fn new(config: &AsterConfig) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            config: config.clone(),
            clock_offset_ms: AtomicI64::new(0),
            last_sync: Mutex::new(None),
            markets: RwLock::new(None),
        })
    }

    /// Current clock offset against the server in milliseconds.
    pub fn clock_offset_ms(&self) -> i64 {
        self.clock_offset_ms.load(Ordering::SeqCst)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Local time corrected by the last measured offset.
    fn timestamp(&self) -> i64 {
        Utc::now().timestamp_millis() + self.clock_offset_ms()
    }

    /// Measure and store the offset between local and server time.
    #[instrument(skip(self))]
    pub async fn sync_time(&self) -> Result<i64> {
        let sent = Utc::now().timestamp_millis();
        let server: ServerTime = self.public_get("/fapi/v1/time", QueryBuilder::new()).await?;
        let received = Utc::now().timestamp_millis();

        let offset = server.server_time - (sent + received) / 2;
        self.clock_offset_ms.store(offset, Ordering::SeqCst);
        *self.last_sync.lock().unwrap_or_else(|p| p.into_inner()) = Some(Instant::now());

        info!(offset_ms = offset, "⏱️ Aster clock synced");
        Ok(offset)
    }

    fn sync_is_stale(&self) -> bool {
        let max_age = Duration::from_secs(self.config.time_sync_interval_secs);
        match *self.last_sync.lock().unwrap_or_else(|p| p.into_inner()) {
            Some(at) => at.elapsed() >= max_age,
            None => true,
        }
    }

    async fn public_get<T: DeserializeOwned>(&self, path: &str, query: QueryBuilder) -> Result<T> {
        let mut url = self.url(path);
        if !query.is_empty() {
            url = format!("{}?{}", url, query.encode());
        }
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| ArbError::transport(Venue::Aster, e))?;
        decode(response).await
    }

    /// Signed request with one automatic resync-and-retry on timestamp rejection.
    async fn signed<T: DeserializeOwned>(&self, method: Method, path: &str, query: QueryBuilder) -> Result<T> {
        if self.sync_is_stale() {
            self.sync_time().await?;
        }

        match self.send_signed(method.clone(), path, query.clone()).await {
            Err(err) if err.is_kind(ApiErrorKind::TimestampSkew) => {
                warn!(path, error = %err, "Timestamp rejected, resyncing clock");
                self.sync_time().await?;
                self.send_signed(method, path, query).await
            }
            other => other,
        }
    }

    async fn send_signed<T: DeserializeOwned>(&self, method: Method, path: &str, query: QueryBuilder) -> Result<T> {
        let payload = signed_query(
            query,
            &self.config.api_secret,
            self.timestamp(),
            self.config.recv_window_ms,
        );

        let request = if method == Method::POST {
            self.http
                .post(self.url(path))
                .header(reqwest::header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(payload)
        } else {
            self.http
                .request(method, format!("{}?{}", self.url(path), payload))
        };

        let response = request
            .header(API_KEY_HEADER, &self.config.api_key)
            .send()
            .await
            .map_err(|e| ArbError::transport(Venue::Aster, e))?;
        decode(response).await
    }

    /// Fetch exchangeInfo, replacing the cache.
    #[instrument(skip(self))]
    async fn load_markets(&self) -> Result<()> {
        let info: ExchangeInfo = self.public_get("/fapi/v1/exchangeInfo", QueryBuilder::new()).await?;

        let mut cache = MarketCache::default();
        for symbol in info.symbols {
            if symbol.status == "TRADING" {
                cache.tradable.insert(symbol.symbol.clone());
            }
            if let Some(filters) = build_filters(&symbol.filters) {
                cache.filters.insert(symbol.symbol, filters);
            }
        }

        debug!(symbols = cache.filters.len(), tradable = cache.tradable.len(), "Loaded Aster markets");
        *self.markets.write().await = Some(cache);
        Ok(())
    }

    async fn cached_filters(&self, symbol: &str) -> Option<SymbolFilters> {
        self.markets
            .read()
            .await
            .as_ref()
            .and_then(|m| m.filters.get(symbol).copied())
    }

    async fn tradable_symbols(&self) -> Result<HashSet<String>> {
        if self.markets.read().await.is_none() {
            self.load_markets().await?;
        }
        Ok(self
            .markets
            .read()
            .await
            .as_ref()
            .map(|m| m.tradable.clone())
            .unwrap_or_default())
    }

    async fn fetch_max_leverage(&self, symbol: &str) -> Result<u32> {
        let rows: OneOrMany<LeverageBrackets> = self
            .signed(
                Method::GET,
                "/fapi/v1/leverageBracket",
                QueryBuilder::new().push("symbol", symbol),
            )
            .await?;

        rows.into_vec()
            .into_iter()
            .find(|row| row.symbol == symbol)
            .and_then(|row| row.brackets.iter().map(|b| b.initial_leverage).max())
            .ok_or_else(|| ArbError::parsing(Venue::Aster, format!("no leverage brackets for {symbol}")))
    }
}

/// Turn an HTTP response into `T` or a classified error.
async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| ArbError::transport(Venue::Aster, e))?;

    if !status.is_success() {
        return Err(match serde_json::from_str::<ErrorPayload>(&body) {
            Ok(err) => ArbError::api(Venue::Aster, classify_error(err.code), Some(err.code), err.msg),
            Err(_) => {
                let kind = match status {
                    StatusCode::TOO_MANY_REQUESTS | StatusCode::IM_A_TEAPOT => ApiErrorKind::RateLimited,
                    s if s.is_server_error() => ApiErrorKind::Transport,
                    _ => ApiErrorKind::Other,
                };
                ArbError::api(Venue::Aster, kind, None, format!("HTTP {status}: {body}"))
            }
        });
    }

    // Some endpoints report failures with a 200 and an error payload.
    if let Ok(err) = serde_json::from_str::<ErrorPayload>(&body) {
        if err.code < 0 {
            return Err(ArbError::api(Venue::Aster, classify_error(err.code), Some(err.code), err.msg));
        }
    }

    serde_json::from_str(&body).map_err(|e| ArbError::parsing(Venue::Aster, format!("{e}: {body}")))
}

fn build_filters(entries: &[SymbolFilterEntry]) -> Option<SymbolFilters> {
    let mut tick_size = None;
    let mut lot = None;
    let mut market_max_qty = None;
    let mut min_notional = DEFAULT_MIN_NOTIONAL;

    for entry in entries {
        match entry {
            SymbolFilterEntry::Price { tick_size: t } => tick_size = Some(*t),
            SymbolFilterEntry::LotSize {
                step_size,
                min_qty,
                max_qty,
            } => lot = Some((*step_size, *min_qty, *max_qty)),
            SymbolFilterEntry::MarketLotSize { max_qty } => market_max_qty = Some(*max_qty),
            SymbolFilterEntry::MinNotional { notional } => min_notional = *notional,
            SymbolFilterEntry::Other => {}
        }
    }

    let (step_size, min_qty, max_qty) = lot?;
    // Market orders are bounded by MARKET_LOT_SIZE, limit orders by LOT_SIZE.
    let max_qty = market_max_qty
        .filter(|m| *m > Decimal::ZERO)
        .map_or(max_qty, |m| m.min(max_qty));

    Some(SymbolFilters {
        tick_size: tick_size?,
        step_size,
        min_notional,
        min_qty,
        max_qty,
    })
}

fn time_in_force_code(tif: TimeInForce) -> &'static str {
    match tif {
        TimeInForce::Gtc => "GTC",
        TimeInForce::Ioc => "IOC",
        TimeInForce::PostOnly => "GTX",
    }
}

#[async_trait]
impl VenueClient for AsterClient {
    fn venue(&self) -> Venue {
        Venue::Aster
    }

    fn funding_schedule(&self) -> FundingSchedule {
        FundingSchedule::FixedUtcHours {
            interval_hours: self.config.funding_interval_hours,
        }
    }

    fn base_asset(&self, symbol: &str) -> Option<String> {
        symbol
            .strip_suffix(QUOTE_ASSET)
            .filter(|base| !base.is_empty())
            .map(str::to_string)
    }

    fn format_quantity(&self, quantity: Decimal, filters: &SymbolFilters) -> String {
        let mut qty = round_down_to_lot(quantity, filters.step_size);
        qty.rescale(precision_of(filters.step_size));
        qty.to_string()
    }

    fn format_price(&self, price: Decimal, filters: &SymbolFilters) -> String {
        let mut px = round_to_tick(price, filters.tick_size);
        px.rescale(precision_of(filters.tick_size));
        px.to_string()
    }

    #[instrument(skip(self))]
    async fn get_price(&self, symbol: &str) -> Result<Decimal> {
        let index: PremiumIndex = self
            .public_get("/fapi/v1/premiumIndex", QueryBuilder::new().push("symbol", symbol))
            .await?;
        index
            .mark_price
            .ok_or_else(|| ArbError::parsing(Venue::Aster, format!("premiumIndex for {symbol} has no markPrice")))
    }

    #[instrument(skip(self))]
    async fn get_book_ticker(&self, symbol: &str) -> Result<BookTicker> {
        let row: BookTickerRow = self
            .public_get("/fapi/v1/ticker/bookTicker", QueryBuilder::new().push("symbol", symbol))
            .await?;
        Ok(BookTicker {
            bid: row.bid_price,
            ask: row.ask_price,
        })
    }

    #[instrument(skip(self))]
    async fn get_funding_rates(&self, symbol: Option<&str>) -> Result<Vec<RawFunding>> {
        let query = QueryBuilder::new().push_opt("symbol", symbol);
        let rows: OneOrMany<PremiumIndex> = self.public_get("/fapi/v1/premiumIndex", query).await?;
        let tradable = self.tradable_symbols().await?;

        let funding: Vec<RawFunding> = rows
            .into_vec()
            .into_iter()
            .map(|row| RawFunding {
                is_tradable: tradable.contains(&row.symbol),
                rate: row.funding_rate(),
                max_leverage: None,
                symbol: row.symbol,
            })
            .collect();

        debug!("Fetched {} funding rates from Aster", funding.len());
        Ok(funding)
    }

    #[instrument(skip(self))]
    async fn get_max_leverage(&self, symbol: &str) -> u32 {
        match self.fetch_max_leverage(symbol).await {
            Ok(leverage) => leverage,
            Err(e) => {
                warn!(symbol, error = %e, "Max leverage lookup failed, using {}x", FALLBACK_MAX_LEVERAGE);
                FALLBACK_MAX_LEVERAGE
            }
        }
    }

    #[instrument(skip(self))]
    async fn get_symbol_filters(&self, symbol: &str) -> Result<SymbolFilters> {
        if let Some(filters) = self.cached_filters(symbol).await {
            return Ok(filters);
        }
        self.load_markets().await?;
        self.cached_filters(symbol).await.ok_or_else(|| {
            ArbError::api(
                Venue::Aster,
                ApiErrorKind::InvalidRequest,
                None,
                format!("unknown symbol {symbol}"),
            )
        })
    }

    #[instrument(skip(self))]
    async fn get_wallet_balance(&self) -> Result<WalletBalance> {
        let raw: serde_json::Value = self
            .signed(Method::GET, "/fapi/v2/balance", QueryBuilder::new())
            .await?;
        let rows: Vec<BalanceRow> = serde_json::from_value(raw.clone())
            .map_err(|e| ArbError::parsing(Venue::Aster, format!("balance rows: {e}")))?;

        let usdt = rows.into_iter().find(|row| row.asset == QUOTE_ASSET);
        let (total, available) = usdt
            .map(|row| (row.balance, row.available_balance))
            .unwrap_or((None, None));

        if total.is_none() && available.is_none() {
            return Err(ArbError::parsing(
                Venue::Aster,
                "Aster balance payload missing total and available fields",
            ));
        }

        Ok(WalletBalance { total, available, raw })
    }

    #[instrument(skip(self), fields(symbol = %request.symbol, client_order_id = %request.client_order_id))]
    async fn submit_order(&self, request: &OrderRequest) -> Result<OrderAck> {
        let filters = self.get_symbol_filters(&request.symbol).await?;

        let mut query = QueryBuilder::new()
            .push("symbol", &request.symbol)
            .push("side", request.side.as_str());

        query = match request.order_type {
            OrderType::Limit => {
                let price = request.price.ok_or_else(|| {
                    ArbError::api(Venue::Aster, ApiErrorKind::InvalidRequest, None, "limit order without price")
                })?;
                query
                    .push("type", "LIMIT")
                    .push(
                        "timeInForce",
                        time_in_force_code(request.time_in_force.unwrap_or(TimeInForce::Gtc)),
                    )
                    .push("quantity", self.format_quantity(request.quantity, &filters))
                    .push("price", self.format_price(price, &filters))
            }
            OrderType::Market => query
                .push("type", "MARKET")
                .push("quantity", self.format_quantity(request.quantity, &filters)),
            OrderType::StopMarket => {
                let stop = request.stop_price.ok_or_else(|| {
                    ArbError::api(Venue::Aster, ApiErrorKind::InvalidRequest, None, "stop order without stop price")
                })?;
                query
                    .push("type", "STOP_MARKET")
                    .push("quantity", self.format_quantity(request.quantity, &filters))
                    .push("stopPrice", self.format_price(stop, &filters))
            }
            OrderType::MakerThenTaker => {
                return Err(ArbError::api(
                    Venue::Aster,
                    ApiErrorKind::InvalidRequest,
                    None,
                    "maker-then-taker must go through place_order",
                ))
            }
        };

        if request.reduce_only {
            query = query.push("reduceOnly", "true");
        }
        query = query.push("newClientOrderId", &request.client_order_id);

        debug!(order_type = ?request.order_type, side = ?request.side, qty = %request.quantity, "Placing Aster order");
        let response: OrderResponse = self.signed(Method::POST, "/fapi/v1/order", query).await?;
        Ok(response.into_ack())
    }

    #[instrument(skip(self))]
    async fn cancel_order(&self, symbol: &str, order: &OrderRef) -> Result<()> {
        let query = QueryBuilder::new().push("symbol", symbol);
        let query = match order {
            OrderRef::OrderId(id) => query.push("orderId", id),
            OrderRef::ClientOrderId(cloid) => query.push("origClientOrderId", cloid),
        };
        let _: OrderResponse = self.signed(Method::DELETE, "/fapi/v1/order", query).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_open_order(&self, symbol: &str, client_order_id: &str) -> Result<Option<OpenOrder>> {
        let query = QueryBuilder::new()
            .push("symbol", symbol)
            .push("origClientOrderId", client_order_id);
        match self.signed::<OrderResponse>(Method::GET, "/fapi/v1/order", query).await {
            Ok(order) if parse_status(&order.status).is_open() => Ok(Some(order.into_open_order())),
            Ok(_) => Ok(None),
            Err(e) if e.is_kind(ApiErrorKind::OrderNotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self))]
    async fn query_order(&self, symbol: &str, client_order_id: &str) -> Result<Option<OrderAck>> {
        let query = QueryBuilder::new()
            .push("symbol", symbol)
            .push("origClientOrderId", client_order_id);
        match self.signed::<OrderResponse>(Method::GET, "/fapi/v1/order", query).await {
            Ok(order) => Ok(Some(order.into_ack())),
            Err(e) if e.is_kind(ApiErrorKind::OrderNotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self))]
    async fn get_all_open_orders(&self) -> Result<Vec<OpenOrder>> {
        let orders: Vec<OrderResponse> = self
            .signed(Method::GET, "/fapi/v1/openOrders", QueryBuilder::new())
            .await?;
        Ok(orders.into_iter().map(OrderResponse::into_open_order).collect())
    }

    #[instrument(skip(self))]
    async fn get_all_positions(&self) -> Result<Vec<VenuePosition>> {
        let rows: Vec<PositionRisk> = self
            .signed(Method::GET, "/fapi/v2/positionRisk", QueryBuilder::new())
            .await?;
        Ok(rows
            .into_iter()
            .map(PositionRisk::into_position)
            .filter(VenuePosition::is_open)
            .collect())
    }

    #[instrument(skip(self))]
    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<()> {
        let query = QueryBuilder::new()
            .push("symbol", symbol)
            .push("leverage", leverage);
        let _: serde_json::Value = self.signed(Method::POST, "/fapi/v1/leverage", query).await?;
        info!(symbol, leverage, "Aster leverage set");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(base_url: &str) -> AsterConfig {
        AsterConfig {
            api_key: "test-key".into(),
            api_secret: "test-secret".into(),
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    async fn mount_time(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/fapi/v1/time"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "serverTime": Utc::now().timestamp_millis() + 10_000
            })))
            .mount(server)
            .await;
    }

    async fn mount_exchange_info(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/fapi/v1/exchangeInfo"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "symbols": [
                    {"symbol": "BTCUSDT", "status": "TRADING", "filters": [
                        {"filterType": "PRICE_FILTER", "tickSize": "0.10"},
                        {"filterType": "LOT_SIZE", "stepSize": "0.001", "minQty": "0.001", "maxQty": "500"},
                        {"filterType": "MARKET_LOT_SIZE", "stepSize": "0.001", "minQty": "0.001", "maxQty": "120"},
                        {"filterType": "MIN_NOTIONAL", "notional": "5"}
                    ]},
                    {"symbol": "OLDUSDT", "status": "SETTLING", "filters": []}
                ]
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_sync_time_measures_offset() {
        let server = MockServer::start().await;
        mount_time(&server).await;

        let client = AsterClient::new(&config(&server.uri())).unwrap();
        let offset = client.sync_time().await.unwrap();
        assert!((9_000..=11_000).contains(&offset), "offset {offset}");
        assert_eq!(client.clock_offset_ms(), offset);
        assert!(!client.sync_is_stale());
    }

    #[tokio::test]
    async fn test_funding_rates_keep_missing_rates_as_none() {
        let server = MockServer::start().await;
        mount_exchange_info(&server).await;
        Mock::given(method("GET"))
            .and(path("/fapi/v1/premiumIndex"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"symbol": "BTCUSDT", "markPrice": "50000.1", "lastFundingRate": "0.00010000", "nextFundingTime": 1},
                {"symbol": "OLDUSDT", "markPrice": "1.0", "lastFundingRate": ""},
                {"symbol": "NEWUSDT", "markPrice": "2.0"}
            ])))
            .mount(&server)
            .await;

        let client = AsterClient::new(&config(&server.uri())).unwrap();
        let rates = client.get_funding_rates(None).await.unwrap();
        assert_eq!(rates.len(), 3);
        assert_eq!(rates[0].rate, Some(dec!(0.0001)));
        assert!(rates[0].is_tradable);
        assert_eq!(rates[1].rate, None);
        assert!(!rates[1].is_tradable);
        assert_eq!(rates[2].rate, None);
    }

    #[tokio::test]
    async fn test_symbol_filters_and_formatting() {
        let server = MockServer::start().await;
        mount_exchange_info(&server).await;

        let client = AsterClient::new(&config(&server.uri())).unwrap();
        let filters = client.get_symbol_filters("BTCUSDT").await.unwrap();
        assert_eq!(filters.tick_size, dec!(0.1));
        assert_eq!(filters.step_size, dec!(0.001));
        assert_eq!(filters.max_qty, dec!(120));
        assert_eq!(client.format_quantity(dec!(0.0809), &filters), "0.080");
        assert_eq!(client.format_price(dec!(50123.46), &filters), "50123.5");

        let err = client.get_symbol_filters("NOPEUSDT").await.unwrap_err();
        assert!(err.is_kind(ApiErrorKind::InvalidRequest));
    }

    #[tokio::test]
    async fn test_post_only_rejection_is_classified() {
        let server = MockServer::start().await;
        mount_time(&server).await;
        mount_exchange_info(&server).await;
        Mock::given(method("POST"))
            .and(path("/fapi/v1/order"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "code": -5022,
                "msg": "Due to the order could not be executed as maker, the Post Only order will be rejected."
            })))
            .mount(&server)
            .await;

        let client = AsterClient::new(&config(&server.uri())).unwrap();
        let request = OrderRequest::post_only("BTCUSDT", OrderSide::Buy, dec!(0.01), dec!(50000));
        let err = client.submit_order(&request).await.unwrap_err();
        assert!(err.is_kind(ApiErrorKind::WouldCross));
        assert!(matches!(err, ArbError::Api { code: Some(-5022), .. }));
    }

    #[tokio::test]
    async fn test_signed_order_body_ends_with_signature() {
        let server = MockServer::start().await;
        mount_time(&server).await;
        mount_exchange_info(&server).await;
        Mock::given(method("POST"))
            .and(path("/fapi/v1/order"))
            .and(header(API_KEY_HEADER, "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "symbol": "BTCUSDT", "orderId": 42, "clientOrderId": "abc", "status": "NEW",
                "type": "LIMIT", "side": "SELL", "price": "50000.0", "origQty": "0.010",
                "executedQty": "0", "avgPrice": "0", "reduceOnly": true
            })))
            .mount(&server)
            .await;

        let client = AsterClient::new(&config(&server.uri())).unwrap();
        let request = OrderRequest::post_only("BTCUSDT", OrderSide::Sell, dec!(0.01), dec!(50000)).reduce_only();
        let ack = client.submit_order(&request).await.unwrap();
        assert_eq!(ack.status, OrderStatus::New);
        assert_eq!(ack.avg_price, None);

        let received = server.received_requests().await.unwrap();
        let order = received
            .iter()
            .find(|r| r.url.path() == "/fapi/v1/order")
            .unwrap();
        let body = String::from_utf8(order.body.clone()).unwrap();
        assert!(body.starts_with("symbol=BTCUSDT&side=SELL&type=LIMIT&timeInForce=GTX&quantity=0.010&price=50000.0&reduceOnly=true&newClientOrderId="));
        let (canonical, signature) = body.rsplit_once("&signature=").unwrap();
        assert_eq!(signature, super::super::signing::sign("test-secret", canonical));
    }

    #[tokio::test]
    async fn test_query_order_reports_execution_by_client_id() {
        let server = MockServer::start().await;
        mount_time(&server).await;
        Mock::given(method("GET"))
            .and(path("/fapi/v1/order"))
            .and(query_param("origClientOrderId", "filled-maker"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "symbol": "BTCUSDT", "orderId": 7, "clientOrderId": "filled-maker", "status": "PARTIALLY_FILLED",
                "type": "LIMIT", "side": "BUY", "price": "49999.0", "origQty": "0.010",
                "executedQty": "0.004", "avgPrice": "49999.0", "reduceOnly": false
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/fapi/v1/order"))
            .and(query_param("origClientOrderId", "never-sent"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({"code": -2013, "msg": "Order does not exist."})))
            .mount(&server)
            .await;

        let client = AsterClient::new(&config(&server.uri())).unwrap();
        let ack = client.query_order("BTCUSDT", "filled-maker").await.unwrap().unwrap();
        assert_eq!(ack.status, OrderStatus::PartiallyFilled);
        assert_eq!(ack.filled_qty, dec!(0.004));
        assert_eq!(ack.client_order_id, "filled-maker");
        assert!(client.query_order("BTCUSDT", "never-sent").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_timestamp_rejection_resyncs_and_retries_once() {
        let server = MockServer::start().await;
        mount_time(&server).await;
        Mock::given(method("GET"))
            .and(path("/fapi/v2/positionRisk"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "code": -1021,
                "msg": "Timestamp for this request is outside of the recvWindow."
            })))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/fapi/v2/positionRisk"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"symbol": "BTCUSDT", "positionAmt": "-0.010", "entryPrice": "50000", "markPrice": "50100",
                 "unRealizedProfit": "-1.0", "leverage": "4"},
                {"symbol": "ETHUSDT", "positionAmt": "0", "entryPrice": "0", "markPrice": "3000",
                 "unRealizedProfit": "0", "leverage": "20"}
            ])))
            .with_priority(2)
            .mount(&server)
            .await;

        let client = AsterClient::new(&config(&server.uri())).unwrap();
        let positions = client.get_all_positions().await.unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].quantity, dec!(-0.01));
        assert_eq!(positions[0].leverage, Some(4));

        let time_calls = server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .filter(|r| r.url.path() == "/fapi/v1/time")
            .count();
        assert_eq!(time_calls, 2);
    }

    #[tokio::test]
    async fn test_wallet_balance_parsing() {
        let server = MockServer::start().await;
        mount_time(&server).await;
        Mock::given(method("GET"))
            .and(path("/fapi/v2/balance"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"asset": "BNB", "balance": "1", "availableBalance": "1"},
                {"asset": "USDT", "balance": "1000.5", "availableBalance": "750.25"}
            ])))
            .mount(&server)
            .await;

        let client = AsterClient::new(&config(&server.uri())).unwrap();
        let balance = client.get_wallet_balance().await.unwrap();
        assert_eq!(balance.total, Some(dec!(1000.5)));
        assert_eq!(balance.available, Some(dec!(750.25)));
        assert!(balance.raw.is_array());
    }

    #[tokio::test]
    async fn test_max_leverage_falls_back_on_error() {
        let server = MockServer::start().await;
        mount_time(&server).await;
        Mock::given(method("GET"))
            .and(path("/fapi/v1/leverageBracket"))
            .and(query_param("symbol", "BTCUSDT"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "symbol": "BTCUSDT",
                "brackets": [{"bracket": 1, "initialLeverage": 50}, {"bracket": 2, "initialLeverage": 25}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/fapi/v1/leverageBracket"))
            .and(query_param("symbol", "BADUSDT"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({"code": -1121, "msg": "Invalid symbol."})))
            .mount(&server)
            .await;

        let client = AsterClient::new(&config(&server.uri())).unwrap();
        assert_eq!(client.get_max_leverage("BTCUSDT").await, 50);
        assert_eq!(client.get_max_leverage("BADUSDT").await, FALLBACK_MAX_LEVERAGE);
    }
}
