//! Hyperliquid REST API client.
//!
//! Market data and account state come from the `/info` endpoint. Orders,
//! cancels and leverage changes are signed L1 actions posted to `/exchange`.

use super::signing::ActionSigner;
use super::types::*;
use crate::config::HyperliquidConfig;
use crate::error::{ApiErrorKind, ArbError, Result};
use crate::exchange::traits::{Venue, VenueClient};
use crate::exchange::types::*;
use crate::utils::{offset_by_pct, precision_of, round_down_to_lot, round_to_tick};
use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, StatusCode};
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

/// Base URL for Hyperliquid mainnet API.
const MAINNET_API_URL: &str = "https://api.hyperliquid.xyz";

/// Perp prices carry at most this many decimals minus `szDecimals`.
const MAX_PRICE_DECIMALS: u32 = 6;

/// Perp prices carry at most this many significant figures.
const MAX_SIGNIFICANT_FIGURES: u32 = 5;

/// Exchange-wide minimum order value in USD.
const MIN_ORDER_VALUE: Decimal = dec!(10);

const FALLBACK_MAX_LEVERAGE: u32 = 1;

/// Per-coin metadata from the universe.
#[derive(Debug, Clone, Copy)]
struct AssetInfo {
    index: u32,
    sz_decimals: u32,
    max_leverage: u32,
}

/// Hyperliquid perpetuals client.
pub struct HyperliquidClient {
    client: Client,
    base_url: String,
    account_address: String,
    signer: Option<ActionSigner>,
    taker_slippage_pct: Decimal,
    universe: RwLock<HashMap<String, AssetInfo>>,
    last_nonce: AtomicU64,
}

impl HyperliquidClient {
    /// Create a client. Without a private key only the info endpoint works.
    pub fn new(config: &HyperliquidConfig, taker_slippage_pct: Decimal) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let signer = if config.private_key.is_empty() {
            None
        } else {
            Some(ActionSigner::from_hex(&config.private_key)?)
        };

        let account_address = match (&signer, config.account_address.is_empty()) {
            (Some(signer), true) => signer.address().to_string(),
            _ => config.account_address.to_lowercase(),
        };

        let base_url = if config.base_url.is_empty() {
            MAINNET_API_URL.to_string()
        } else {
            config.base_url.trim_end_matches('/').to_string()
        };

        Ok(Self {
            client,
            base_url,
            account_address,
            signer,
            taker_slippage_pct,
            universe: RwLock::new(HashMap::new()),
            last_nonce: AtomicU64::new(0),
        })
    }

    /// Address whose state is queried.
    pub fn account_address(&self) -> &str {
        &self.account_address
    }

    async fn info<T: DeserializeOwned>(&self, request: &InfoRequest) -> Result<T> {
        let response = self
            .client
            .post(format!("{}/info", self.base_url))
            .json(request)
            .send()
            .await
            .map_err(|e| ArbError::transport(Venue::Hyperliquid, e))?;
        decode(response).await
    }

    /// Millisecond nonce, strictly increasing per client.
    fn next_nonce(&self) -> u64 {
        let now = Utc::now().timestamp_millis().max(0) as u64;
        let mut last = self.last_nonce.load(Ordering::SeqCst);
        loop {
            let next = now.max(last + 1);
            match self
                .last_nonce
                .compare_exchange(last, next, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return next,
                Err(actual) => last = actual,
            }
        }
    }

    /// Sign and submit an action, returning the `response` payload.
    async fn exchange(&self, action: &Action) -> Result<serde_json::Value> {
        let signer = self
            .signer
            .as_ref()
            .ok_or_else(|| ArbError::Config("hyperliquid.private_key is required for trading".into()))?;

        let nonce = self.next_nonce();
        let body = ExchangeRequest {
            action,
            nonce,
            signature: signer.sign_action(action, nonce)?,
            vault_address: None,
        };

        let response = self
            .client
            .post(format!("{}/exchange", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| ArbError::transport(Venue::Hyperliquid, e))?;
        let reply: ExchangeResponse = decode(response).await?;

        if reply.status != "ok" {
            let message = reply
                .response
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| reply.response.to_string());
            return Err(ArbError::api(Venue::Hyperliquid, classify_error(&message), None, message));
        }
        Ok(reply.response)
    }

    /// Refresh the universe cache and return the raw contexts.
    async fn load_universe(&self) -> Result<MetaAndAssetCtxsResponse> {
        let (meta, ctxs): MetaAndAssetCtxsResponse = self.info(&InfoRequest::MetaAndAssetCtxs).await?;

        if meta.universe.len() != ctxs.len() {
            return Err(ArbError::parsing(
                Venue::Hyperliquid,
                format!(
                    "universe ({}) and contexts ({}) differ in length",
                    meta.universe.len(),
                    ctxs.len()
                ),
            ));
        }

        let universe = meta
            .universe
            .iter()
            .enumerate()
            .map(|(index, m)| {
                (
                    m.name.clone(),
                    AssetInfo {
                        index: index as u32,
                        sz_decimals: m.sz_decimals,
                        max_leverage: m.max_leverage,
                    },
                )
            })
            .collect();
        *self.universe.write().await = universe;

        Ok((meta, ctxs))
    }

    async fn asset(&self, coin: &str) -> Result<AssetInfo> {
        if let Some(info) = self.universe.read().await.get(coin) {
            return Ok(*info);
        }
        self.load_universe().await?;
        self.universe.read().await.get(coin).copied().ok_or_else(|| {
            ArbError::api(
                Venue::Hyperliquid,
                ApiErrorKind::InvalidRequest,
                None,
                format!("unknown coin {coin}"),
            )
        })
    }

    async fn clearinghouse_state(&self) -> Result<(ClearinghouseState, serde_json::Value)> {
        let raw: serde_json::Value = self
            .info(&InfoRequest::ClearinghouseState {
                user: self.account_address.clone(),
            })
            .await?;
        let state = serde_json::from_value(raw.clone())
            .map_err(|e| ArbError::parsing(Venue::Hyperliquid, format!("clearinghouseState: {e}")))?;
        Ok((state, raw))
    }

    /// Price at the tick and within the significant-figure limit.
    fn wire_price(price: Decimal, filters: &SymbolFilters) -> Decimal {
        let ticked = round_to_tick(price, filters.tick_size);
        let abs = ticked.abs();
        let decimals = if abs >= Decimal::ONE {
            let integer_digits = abs.trunc().to_string().len() as u32;
            MAX_SIGNIFICANT_FIGURES.saturating_sub(integer_digits)
        } else {
            // Leading fractional zeros are not significant.
            let mut leading_zeros = 0;
            let mut scaled = abs;
            while !scaled.is_zero() && scaled < dec!(0.1) {
                scaled *= Decimal::TEN;
                leading_zeros += 1;
            }
            leading_zeros + MAX_SIGNIFICANT_FIGURES
        };
        ticked.round_dp_with_strategy(
            decimals.min(precision_of(filters.tick_size)),
            RoundingStrategy::MidpointAwayFromZero,
        )
    }

    async fn place(&self, order: OrderWire, request: &OrderRequest) -> Result<OrderAck> {
        let action = Action::Order {
            orders: vec![order],
            grouping: "na".to_string(),
        };
        let response = self.exchange(&action).await?;

        let statuses: Vec<OrderResult> = response
            .pointer("/data/statuses")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| ArbError::parsing(Venue::Hyperliquid, format!("order statuses: {e}")))?
            .unwrap_or_default();

        let mut ack = OrderAck {
            symbol: request.symbol.clone(),
            order_id: String::new(),
            client_order_id: request.client_order_id.clone(),
            status: OrderStatus::New,
            order_type: request.order_type,
            side: request.side,
            filled_qty: Decimal::ZERO,
            avg_price: None,
        };

        match statuses.into_iter().next() {
            Some(OrderResult::Resting { oid }) => ack.order_id = oid.to_string(),
            Some(OrderResult::Filled { total_sz, avg_px, oid }) => {
                ack.order_id = oid.to_string();
                ack.status = OrderStatus::Filled;
                ack.filled_qty = total_sz;
                ack.avg_price = Some(avg_px);
            }
            Some(OrderResult::WaitingForTrigger) | Some(OrderResult::WaitingForFill) => {}
            Some(OrderResult::Error(message)) => {
                return Err(ArbError::api(Venue::Hyperliquid, classify_error(&message), None, message))
            }
            None => {
                return Err(ArbError::parsing(
                    Venue::Hyperliquid,
                    format!("order response without status: {response}"),
                ))
            }
        }
        Ok(ack)
    }
}

/// Turn an HTTP response into `T` or a classified error.
async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| ArbError::transport(Venue::Hyperliquid, e))?;

    if !status.is_success() {
        let kind = match status {
            StatusCode::TOO_MANY_REQUESTS => ApiErrorKind::RateLimited,
            s if s.is_server_error() => ApiErrorKind::Transport,
            _ => classify_error(&body),
        };
        return Err(ArbError::api(
            Venue::Hyperliquid,
            kind,
            Some(status.as_u16() as i64),
            body,
        ));
    }

    serde_json::from_str(&body).map_err(|e| ArbError::parsing(Venue::Hyperliquid, format!("{e}: {body}")))
}

/// Our client order ids are 32 hex chars; Hyperliquid wants a 0x-prefixed 16-byte cloid.
fn to_cloid(client_order_id: &str) -> String {
    format!("0x{client_order_id}")
}

fn from_cloid(cloid: &str) -> String {
    cloid.strip_prefix("0x").unwrap_or(cloid).to_string()
}

fn tif_code(tif: TimeInForce) -> &'static str {
    match tif {
        TimeInForce::PostOnly => "Alo",
        TimeInForce::Ioc => "Ioc",
        TimeInForce::Gtc => "Gtc",
    }
}

fn into_open_order(order: FrontendOrder) -> OpenOrder {
    OpenOrder {
        side: if order.side == "B" { OrderSide::Buy } else { OrderSide::Sell },
        order_id: order.oid.to_string(),
        client_order_id: order.cloid.as_deref().map(from_cloid),
        price: order.limit_px,
        quantity: order.sz,
        reduce_only: order.reduce_only,
        symbol: order.coin,
    }
}

/// Map an `orderStatus` entry to an ack carrying the executed size.
fn into_order_ack(entry: OrderStatusEntry) -> OrderAck {
    let order = entry.order;
    let filled_qty = match order.orig_sz {
        Some(orig_sz) => (orig_sz - order.sz).max(Decimal::ZERO),
        None if entry.status == "filled" => order.sz,
        None => Decimal::ZERO,
    };
    let status = match entry.status.as_str() {
        "open" | "triggered" if filled_qty > Decimal::ZERO => OrderStatus::PartiallyFilled,
        "open" | "triggered" => OrderStatus::New,
        "filled" => OrderStatus::Filled,
        "canceled" | "scheduledCancel" => OrderStatus::Canceled,
        s if s.ends_with("Canceled") => OrderStatus::Canceled,
        s if s.ends_with("ejected") => OrderStatus::Rejected,
        _ => OrderStatus::Expired,
    };

    OrderAck {
        order_id: order.oid.to_string(),
        client_order_id: order.cloid.as_deref().map(from_cloid).unwrap_or_default(),
        status,
        order_type: OrderType::Limit,
        side: if order.side == "B" { OrderSide::Buy } else { OrderSide::Sell },
        filled_qty,
        avg_price: None,
        symbol: order.coin,
    }
}

#[async_trait]
impl VenueClient for HyperliquidClient {
    fn venue(&self) -> Venue {
        Venue::Hyperliquid
    }

    fn funding_schedule(&self) -> FundingSchedule {
        FundingSchedule::Continuous { interval_minutes: 60 }
    }

    fn base_asset(&self, symbol: &str) -> Option<String> {
        (!symbol.is_empty()).then(|| symbol.to_string())
    }

    fn format_quantity(&self, quantity: Decimal, filters: &SymbolFilters) -> String {
        round_down_to_lot(quantity, filters.step_size).normalize().to_string()
    }

    fn format_price(&self, price: Decimal, filters: &SymbolFilters) -> String {
        Self::wire_price(price, filters).normalize().to_string()
    }

    #[instrument(skip(self), name = "hl_get_price")]
    async fn get_price(&self, symbol: &str) -> Result<Decimal> {
        let mids: HashMap<String, String> = self.info(&InfoRequest::AllMids).await?;
        mids.get(symbol)
            .and_then(|px| px.parse::<Decimal>().ok())
            .ok_or_else(|| ArbError::parsing(Venue::Hyperliquid, format!("no mid price for {symbol}")))
    }

    #[instrument(skip(self), name = "hl_get_book_ticker")]
    async fn get_book_ticker(&self, symbol: &str) -> Result<BookTicker> {
        let book: L2Book = self
            .info(&InfoRequest::L2Book {
                coin: symbol.to_string(),
            })
            .await?;
        let best = |side: usize| book.levels.get(side).and_then(|levels| levels.first()).map(|l| l.px);
        match (best(0), best(1)) {
            (Some(bid), Some(ask)) => Ok(BookTicker { bid, ask }),
            _ => Err(ArbError::parsing(
                Venue::Hyperliquid,
                format!("empty l2Book for {symbol}"),
            )),
        }
    }

    #[instrument(skip(self), name = "hl_get_funding_rates")]
    async fn get_funding_rates(&self, symbol: Option<&str>) -> Result<Vec<RawFunding>> {
        let (meta, ctxs) = self.load_universe().await?;

        let funding: Vec<RawFunding> = meta
            .universe
            .into_iter()
            .zip(ctxs)
            .filter(|(m, _)| symbol.map_or(true, |s| m.name == s))
            .map(|(m, c)| RawFunding {
                symbol: m.name,
                rate: c.funding,
                max_leverage: Some(m.max_leverage),
                is_tradable: !m.is_delisted,
            })
            .collect();

        debug!("Fetched {} funding rates from Hyperliquid", funding.len());
        Ok(funding)
    }

    #[instrument(skip(self), name = "hl_get_max_leverage")]
    async fn get_max_leverage(&self, symbol: &str) -> u32 {
        match self.asset(symbol).await {
            Ok(info) => info.max_leverage,
            Err(e) => {
                warn!(symbol, error = %e, "Max leverage lookup failed, using {}x", FALLBACK_MAX_LEVERAGE);
                FALLBACK_MAX_LEVERAGE
            }
        }
    }

    #[instrument(skip(self), name = "hl_get_symbol_filters")]
    async fn get_symbol_filters(&self, symbol: &str) -> Result<SymbolFilters> {
        let info = self.asset(symbol).await?;
        let step_size = Decimal::new(1, info.sz_decimals);
        Ok(SymbolFilters {
            tick_size: Decimal::new(1, MAX_PRICE_DECIMALS.saturating_sub(info.sz_decimals)),
            step_size,
            min_notional: MIN_ORDER_VALUE,
            min_qty: step_size,
            max_qty: Decimal::MAX,
        })
    }

    #[instrument(skip(self), name = "hl_get_wallet_balance")]
    async fn get_wallet_balance(&self) -> Result<WalletBalance> {
        let (state, raw) = self.clearinghouse_state().await?;
        let summary = state.margin_summary.ok_or_else(|| {
            ArbError::parsing(Venue::Hyperliquid, "clearinghouseState has no marginSummary")
        })?;

        let total = summary.account_value;
        let available = match (summary.account_value, summary.total_margin_used) {
            (Some(value), Some(used)) => Some(value - used),
            _ => None,
        };

        if total.is_none() && available.is_none() {
            return Err(ArbError::parsing(
                Venue::Hyperliquid,
                "Hyperliquid balance payload missing total and available fields",
            ));
        }

        Ok(WalletBalance { total, available, raw })
    }

    #[instrument(skip(self), name = "hl_submit_order", fields(symbol = %request.symbol, client_order_id = %request.client_order_id))]
    async fn submit_order(&self, request: &OrderRequest) -> Result<OrderAck> {
        let asset = self.asset(&request.symbol).await?;
        let filters = self.get_symbol_filters(&request.symbol).await?;
        let is_buy = request.side == OrderSide::Buy;
        let slippage = if is_buy {
            self.taker_slippage_pct
        } else {
            -self.taker_slippage_pct
        };

        let (price, order_type) = match request.order_type {
            OrderType::Limit => {
                let price = request.price.ok_or_else(|| {
                    ArbError::api(Venue::Hyperliquid, ApiErrorKind::InvalidRequest, None, "limit order without price")
                })?;
                let tif = tif_code(request.time_in_force.unwrap_or(TimeInForce::Gtc));
                (price, OrderTypeWire::Limit { tif: tif.to_string() })
            }
            // Market orders are aggressive IOC limits bounded by the slippage band.
            OrderType::Market => {
                let mark = self.get_price(&request.symbol).await?;
                (
                    offset_by_pct(mark, slippage),
                    OrderTypeWire::Limit {
                        tif: tif_code(TimeInForce::Ioc).to_string(),
                    },
                )
            }
            OrderType::StopMarket => {
                let stop = request.stop_price.ok_or_else(|| {
                    ArbError::api(Venue::Hyperliquid, ApiErrorKind::InvalidRequest, None, "stop order without stop price")
                })?;
                (
                    offset_by_pct(stop, slippage),
                    OrderTypeWire::Trigger {
                        is_market: true,
                        trigger_px: self.format_price(stop, &filters),
                        tpsl: "sl".to_string(),
                    },
                )
            }
            OrderType::MakerThenTaker => {
                return Err(ArbError::api(
                    Venue::Hyperliquid,
                    ApiErrorKind::InvalidRequest,
                    None,
                    "maker-then-taker must go through place_order",
                ))
            }
        };

        let wire = OrderWire {
            a: asset.index,
            b: is_buy,
            p: self.format_price(price, &filters),
            s: self.format_quantity(request.quantity, &filters),
            r: request.reduce_only,
            t: order_type,
            c: Some(to_cloid(&request.client_order_id)),
        };

        debug!(order_type = ?request.order_type, side = ?request.side, px = %wire.p, sz = %wire.s, "Placing Hyperliquid order");
        self.place(wire, request).await
    }

    #[instrument(skip(self), name = "hl_cancel_order")]
    async fn cancel_order(&self, symbol: &str, order: &OrderRef) -> Result<()> {
        let asset = self.asset(symbol).await?;
        let action = match order {
            OrderRef::OrderId(id) => Action::Cancel {
                cancels: vec![CancelWire {
                    a: asset.index,
                    o: id.parse().map_err(|_| {
                        ArbError::api(
                            Venue::Hyperliquid,
                            ApiErrorKind::InvalidRequest,
                            None,
                            format!("order id {id} is not numeric"),
                        )
                    })?,
                }],
            },
            OrderRef::ClientOrderId(cloid) => Action::CancelByCloid {
                cancels: vec![CancelByCloidWire {
                    asset: asset.index,
                    cloid: to_cloid(cloid),
                }],
            },
        };

        let response = self.exchange(&action).await?;
        let error = response
            .pointer("/data/statuses/0/error")
            .and_then(|e| e.as_str());
        match error {
            Some(message) => Err(ArbError::api(
                Venue::Hyperliquid,
                classify_error(message),
                None,
                message,
            )),
            None => Ok(()),
        }
    }

    #[instrument(skip(self), name = "hl_get_open_order")]
    async fn get_open_order(&self, symbol: &str, client_order_id: &str) -> Result<Option<OpenOrder>> {
        let status: OrderStatusResponse = self
            .info(&InfoRequest::OrderStatus {
                user: self.account_address.clone(),
                oid: to_cloid(client_order_id),
            })
            .await?;

        Ok(status
            .order
            .filter(|entry| status.status == "order" && entry.status == "open" && entry.order.coin == symbol)
            .map(|entry| into_open_order(entry.order)))
    }

    #[instrument(skip(self), name = "hl_query_order")]
    async fn query_order(&self, symbol: &str, client_order_id: &str) -> Result<Option<OrderAck>> {
        let response: OrderStatusResponse = self
            .info(&InfoRequest::OrderStatus {
                user: self.account_address.clone(),
                oid: to_cloid(client_order_id),
            })
            .await?;

        if response.status != "order" {
            return Ok(None);
        }
        Ok(response
            .order
            .filter(|entry| entry.order.coin == symbol)
            .map(into_order_ack))
    }

    #[instrument(skip(self), name = "hl_get_all_open_orders")]
    async fn get_all_open_orders(&self) -> Result<Vec<OpenOrder>> {
        let orders: Vec<FrontendOrder> = self
            .info(&InfoRequest::FrontendOpenOrders {
                user: self.account_address.clone(),
            })
            .await?;
        Ok(orders.into_iter().map(into_open_order).collect())
    }

    #[instrument(skip(self), name = "hl_get_all_positions")]
    async fn get_all_positions(&self) -> Result<Vec<VenuePosition>> {
        let (state, _) = self.clearinghouse_state().await?;
        Ok(state
            .asset_positions
            .into_iter()
            .map(|p| p.position)
            .filter(|p| !p.szi.is_zero())
            .map(|p| {
                let mark_price = p.position_value.map(|value| value / p.szi.abs());
                VenuePosition {
                    quantity: p.szi,
                    entry_price: p.entry_px.unwrap_or_default(),
                    mark_price,
                    unrealized_pnl: p.unrealized_pnl.unwrap_or_default(),
                    leverage: p.leverage.map(|l| l.value),
                    symbol: p.coin,
                }
            })
            .collect())
    }

    #[instrument(skip(self), name = "hl_set_leverage")]
    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<()> {
        let asset = self.asset(symbol).await?;
        self.exchange(&Action::UpdateLeverage {
            asset: asset.index,
            is_cross: true,
            leverage,
        })
        .await?;
        info!(symbol, leverage, "Hyperliquid leverage set");
        Ok(())
    }
}
