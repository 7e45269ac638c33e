//! Wire types for the Aster futures REST API.

use crate::error::ApiErrorKind;
use crate::exchange::types::{OpenOrder, OrderAck, OrderSide, OrderStatus, OrderType, VenuePosition};
use rust_decimal::Decimal;
use serde::Deserialize;

/// Endpoints answer with an object when queried for one symbol and an
/// array otherwise.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    pub fn into_vec(self) -> Vec<T> {
        match self {
            Self::One(item) => vec![item],
            Self::Many(items) => items,
        }
    }
}

/// `GET /fapi/v1/time`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerTime {
    pub server_time: i64,
}

/// Error payload `{"code": -2019, "msg": "Margin is insufficient."}`.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorPayload {
    pub code: i64,
    #[serde(default)]
    pub msg: String,
}

/// `GET /fapi/v1/premiumIndex` row.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PremiumIndex {
    pub symbol: String,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub mark_price: Option<Decimal>,
    /// Kept as text: delisted symbols report an empty string.
    #[serde(default)]
    pub last_funding_rate: Option<String>,
    #[serde(default)]
    pub next_funding_time: Option<i64>,
}

impl PremiumIndex {
    /// Parsed funding rate, `None` when absent or unparseable.
    pub fn funding_rate(&self) -> Option<Decimal> {
        self.last_funding_rate.as_deref()?.parse().ok()
    }
}

/// `GET /fapi/v1/exchangeInfo`
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeInfo {
    pub symbols: Vec<ExchangeSymbol>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeSymbol {
    pub symbol: String,
    pub status: String,
    #[serde(default)]
    pub contract_type: Option<String>,
    #[serde(default)]
    pub quote_asset: Option<String>,
    #[serde(default)]
    pub filters: Vec<SymbolFilterEntry>,
}

/// One entry of an exchangeInfo symbol's `filters` array.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "filterType")]
pub enum SymbolFilterEntry {
    #[serde(rename = "PRICE_FILTER", rename_all = "camelCase")]
    Price {
        #[serde(with = "rust_decimal::serde::str")]
        tick_size: Decimal,
    },
    #[serde(rename = "LOT_SIZE", rename_all = "camelCase")]
    LotSize {
        #[serde(with = "rust_decimal::serde::str")]
        step_size: Decimal,
        #[serde(with = "rust_decimal::serde::str")]
        min_qty: Decimal,
        #[serde(with = "rust_decimal::serde::str")]
        max_qty: Decimal,
    },
    #[serde(rename = "MARKET_LOT_SIZE", rename_all = "camelCase")]
    MarketLotSize {
        #[serde(with = "rust_decimal::serde::str")]
        max_qty: Decimal,
    },
    #[serde(rename = "MIN_NOTIONAL")]
    MinNotional {
        #[serde(with = "rust_decimal::serde::str")]
        notional: Decimal,
    },
    #[serde(other)]
    Other,
}

/// `GET /fapi/v1/leverageBracket` row.
#[derive(Debug, Clone, Deserialize)]
pub struct LeverageBrackets {
    pub symbol: String,
    pub brackets: Vec<LeverageBracket>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeverageBracket {
    pub initial_leverage: u32,
}

/// `GET /fapi/v1/ticker/bookTicker`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookTickerRow {
    pub symbol: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub bid_price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub ask_price: Decimal,
}

/// Order response (`POST`, `DELETE` and `GET /fapi/v1/order`, `openOrders`).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub symbol: String,
    pub order_id: i64,
    #[serde(default)]
    pub client_order_id: Option<String>,
    pub status: String,
    #[serde(rename = "type")]
    pub order_type: String,
    pub side: OrderSide,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub price: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub orig_qty: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub executed_qty: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub avg_price: Option<Decimal>,
    #[serde(default)]
    pub reduce_only: bool,
}

impl OrderResponse {
    pub fn into_ack(self) -> OrderAck {
        let avg_price = self.avg_price.filter(|p| !p.is_zero());
        OrderAck {
            status: parse_status(&self.status),
            order_type: parse_order_type(&self.order_type),
            order_id: self.order_id.to_string(),
            client_order_id: self.client_order_id.unwrap_or_default(),
            side: self.side,
            filled_qty: self.executed_qty.unwrap_or_default(),
            avg_price,
            symbol: self.symbol,
        }
    }

    pub fn into_open_order(self) -> OpenOrder {
        OpenOrder {
            order_id: self.order_id.to_string(),
            client_order_id: self.client_order_id,
            side: self.side,
            price: self.price.unwrap_or_default(),
            quantity: self.orig_qty.unwrap_or_default(),
            reduce_only: self.reduce_only,
            symbol: self.symbol,
        }
    }
}

/// `GET /fapi/v2/positionRisk` row.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionRisk {
    pub symbol: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub position_amt: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub entry_price: Decimal,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub mark_price: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub un_realized_profit: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub leverage: Option<Decimal>,
}

impl PositionRisk {
    pub fn into_position(self) -> VenuePosition {
        VenuePosition {
            quantity: self.position_amt,
            entry_price: self.entry_price,
            mark_price: self.mark_price,
            unrealized_pnl: self.un_realized_profit.unwrap_or_default(),
            leverage: self.leverage.and_then(|l| l.trunc().try_into().ok()),
            symbol: self.symbol,
        }
    }
}

/// `GET /fapi/v2/balance` row.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceRow {
    pub asset: String,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub balance: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub available_balance: Option<Decimal>,
}

pub fn parse_status(status: &str) -> OrderStatus {
    match status {
        "NEW" => OrderStatus::New,
        "PARTIALLY_FILLED" => OrderStatus::PartiallyFilled,
        "FILLED" => OrderStatus::Filled,
        "CANCELED" => OrderStatus::Canceled,
        "EXPIRED" => OrderStatus::Expired,
        _ => OrderStatus::Rejected,
    }
}

fn parse_order_type(order_type: &str) -> OrderType {
    match order_type {
        "MARKET" => OrderType::Market,
        "STOP_MARKET" => OrderType::StopMarket,
        _ => OrderType::Limit,
    }
}

/// Map an Aster error code to its kind.
pub fn classify_error(code: i64) -> ApiErrorKind {
    match code {
        -5022 => ApiErrorKind::WouldCross,
        -2021 => ApiErrorKind::WouldTrigger,
        -1021 => ApiErrorKind::TimestampSkew,
        -2011 | -2013 => ApiErrorKind::OrderNotFound,
        -2019 | -2018 | -2027 | -2028 => ApiErrorKind::InsufficientMargin,
        -1003 | -1015 => ApiErrorKind::RateLimited,
        -1000 | -1001 | -1006 | -1007 => ApiErrorKind::Transport,
        -1013 | -1106..=-1100 | -1111 | -1116 | -1117 | -1121 | -2022 | -4003 | -4164 => ApiErrorKind::InvalidRequest,
        _ => ApiErrorKind::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_classify_error_codes() {
        assert_eq!(classify_error(-5022), ApiErrorKind::WouldCross);
        assert_eq!(classify_error(-2021), ApiErrorKind::WouldTrigger);
        assert_eq!(classify_error(-1021), ApiErrorKind::TimestampSkew);
        assert_eq!(classify_error(-2011), ApiErrorKind::OrderNotFound);
        assert_eq!(classify_error(-2019), ApiErrorKind::InsufficientMargin);
        assert_eq!(classify_error(-1111), ApiErrorKind::InvalidRequest);
        assert_eq!(classify_error(-4164), ApiErrorKind::InvalidRequest);
        assert_eq!(classify_error(-9999), ApiErrorKind::Other);
    }

    #[test]
    fn test_parse_exchange_filters() {
        let json = r#"{"symbols":[{"symbol":"BTCUSDT","status":"TRADING","contractType":"PERPETUAL","quoteAsset":"USDT","filters":[
            {"filterType":"PRICE_FILTER","tickSize":"0.10","minPrice":"1","maxPrice":"1000000"},
            {"filterType":"LOT_SIZE","stepSize":"0.001","minQty":"0.001","maxQty":"1000"},
            {"filterType":"MARKET_LOT_SIZE","stepSize":"0.001","minQty":"0.001","maxQty":"120"},
            {"filterType":"MAX_NUM_ORDERS","limit":200},
            {"filterType":"MIN_NOTIONAL","notional":"5"}]}]}"#;
        let info: ExchangeInfo = serde_json::from_str(json).unwrap();
        let filters = &info.symbols[0].filters;
        assert_eq!(filters.len(), 5);
        assert!(matches!(filters[0], SymbolFilterEntry::Price { tick_size } if tick_size == dec!(0.1)));
        assert!(matches!(filters[2], SymbolFilterEntry::MarketLotSize { max_qty } if max_qty == dec!(120)));
        assert!(matches!(filters[3], SymbolFilterEntry::Other));
    }

    #[test]
    fn test_order_response_into_ack() {
        let json = r#"{"symbol":"BTCUSDT","orderId":283194212,"clientOrderId":"abc","status":"FILLED","type":"MARKET","side":"SELL","price":"0","origQty":"0.010","executedQty":"0.010","avgPrice":"50123.4","reduceOnly":false}"#;
        let ack = serde_json::from_str::<OrderResponse>(json).unwrap().into_ack();
        assert_eq!(ack.order_id, "283194212");
        assert_eq!(ack.status, OrderStatus::Filled);
        assert_eq!(ack.order_type, OrderType::Market);
        assert_eq!(ack.side, OrderSide::Sell);
        assert_eq!(ack.filled_qty, dec!(0.01));
        assert_eq!(ack.avg_price, Some(dec!(50123.4)));
    }
}
