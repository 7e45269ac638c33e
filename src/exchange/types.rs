//! Venue-neutral order, position and market data types.

use chrono::{DateTime, Duration, TimeZone, Timelike, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order side (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
        }
    }
}

/// Direction of an open position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    /// Side of the order that opens this position.
    pub fn entry_side(self) -> OrderSide {
        match self {
            Self::Long => OrderSide::Buy,
            Self::Short => OrderSide::Sell,
        }
    }

    /// Side of the order that reduces this position.
    pub fn exit_side(self) -> OrderSide {
        self.entry_side().opposite()
    }
}

/// Order type.
///
/// `MakerThenTaker` is synthetic: it is never sent to a venue, it is expanded
/// by the order executor into a post-only limit attempt and a market fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Limit,
    Market,
    StopMarket,
    MakerThenTaker,
}

/// Time in force for limit orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeInForce {
    /// Good till cancel
    Gtc,
    /// Immediate or cancel
    Ioc,
    /// Post only: rejected instead of taking liquidity
    PostOnly,
}

/// Order status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
}

impl OrderStatus {
    pub fn is_open(self) -> bool {
        matches!(self, Self::New | Self::PartiallyFilled)
    }
}

/// New order request.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub time_in_force: Option<TimeInForce>,
    pub reduce_only: bool,
    /// Client-generated id, unique per placement attempt.
    pub client_order_id: String,
}

impl OrderRequest {
    fn base(symbol: &str, side: OrderSide, order_type: OrderType, quantity: Decimal) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            order_type,
            quantity,
            price: None,
            stop_price: None,
            time_in_force: None,
            reduce_only: false,
            client_order_id: new_client_order_id(),
        }
    }

    pub fn market(symbol: &str, side: OrderSide, quantity: Decimal) -> Self {
        Self::base(symbol, side, OrderType::Market, quantity)
    }

    pub fn post_only(symbol: &str, side: OrderSide, quantity: Decimal, price: Decimal) -> Self {
        let mut order = Self::base(symbol, side, OrderType::Limit, quantity);
        order.price = Some(price);
        order.time_in_force = Some(TimeInForce::PostOnly);
        order
    }

    pub fn stop_market(symbol: &str, side: OrderSide, quantity: Decimal, stop_price: Decimal) -> Self {
        let mut order = Self::base(symbol, side, OrderType::StopMarket, quantity);
        order.stop_price = Some(stop_price);
        order
    }

    pub fn maker_then_taker(symbol: &str, side: OrderSide, quantity: Decimal) -> Self {
        Self::base(symbol, side, OrderType::MakerThenTaker, quantity)
    }

    pub fn reduce_only(mut self) -> Self {
        self.reduce_only = true;
        self
    }
}

/// Generate a fresh client order id (32 lowercase hex chars).
pub fn new_client_order_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Reference to an order on a venue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderRef {
    OrderId(String),
    ClientOrderId(String),
}

/// Venue acknowledgement of a placed order.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderAck {
    pub symbol: String,
    pub order_id: String,
    pub client_order_id: String,
    pub status: OrderStatus,
    /// Order type actually placed on the venue.
    pub order_type: OrderType,
    pub side: OrderSide,
    pub filled_qty: Decimal,
    pub avg_price: Option<Decimal>,
}

/// An order resting on a venue.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenOrder {
    pub symbol: String,
    pub order_id: String,
    pub client_order_id: Option<String>,
    pub side: OrderSide,
    pub price: Decimal,
    pub quantity: Decimal,
    pub reduce_only: bool,
}

/// An open perpetual position.
#[derive(Debug, Clone, PartialEq)]
pub struct VenuePosition {
    /// Symbol in the venue's native format
    pub symbol: String,
    /// Signed size (negative = short)
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub mark_price: Option<Decimal>,
    pub unrealized_pnl: Decimal,
    pub leverage: Option<u32>,
}

impl VenuePosition {
    pub fn is_open(&self) -> bool {
        self.quantity != Decimal::ZERO
    }

    pub fn side(&self) -> PositionSide {
        if self.quantity < Decimal::ZERO {
            PositionSide::Short
        } else {
            PositionSide::Long
        }
    }

    pub fn notional(&self) -> Decimal {
        self.quantity.abs() * self.mark_price.unwrap_or(self.entry_price)
    }
}

/// Lot and tick constraints for a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolFilters {
    pub tick_size: Decimal,
    pub step_size: Decimal,
    pub min_notional: Decimal,
    pub min_qty: Decimal,
    pub max_qty: Decimal,
}

/// Best bid/ask prices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookTicker {
    pub bid: Decimal,
    pub ask: Decimal,
}

/// Account balance summary.
#[derive(Debug, Clone, PartialEq)]
pub struct WalletBalance {
    pub total: Option<Decimal>,
    pub available: Option<Decimal>,
    pub raw: serde_json::Value,
}

impl WalletBalance {
    /// JSON-friendly rendering for status output.
    pub fn as_json(&self) -> serde_json::Value {
        serde_json::json!({
            "total": self.total.map(|d| d.to_string()),
            "available": self.available.map(|d| d.to_string()),
        })
    }
}

/// One funding observation as reported by a venue, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFunding {
    /// Symbol in the venue's native format
    pub symbol: String,
    /// Per-period rate. `None` when the payload carried no usable rate.
    pub rate: Option<Decimal>,
    /// Maximum leverage, when the funding payload carries it
    pub max_leverage: Option<u32>,
    pub is_tradable: bool,
}

/// When a venue settles funding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FundingSchedule {
    /// Settles at fixed UTC hours: every `interval_hours` starting at 00:00 UTC.
    FixedUtcHours { interval_hours: u32 },
    /// Settles continuously every `interval_minutes`, aligned to the epoch.
    Continuous { interval_minutes: u32 },
}

impl FundingSchedule {
    pub fn periods_per_day(&self) -> u32 {
        match *self {
            Self::FixedUtcHours { interval_hours } => 24 / interval_hours.clamp(1, 24),
            Self::Continuous { interval_minutes } => 1440 / interval_minutes.clamp(1, 1440),
        }
    }

    /// Next settlement strictly after `now`.
    pub fn next_funding_time(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match *self {
            Self::FixedUtcHours { interval_hours } => {
                let interval = interval_hours.clamp(1, 24);
                let day_start = now
                    .date_naive()
                    .and_hms_opt(0, 0, 0)
                    .map(|midnight| midnight.and_utc())
                    .unwrap_or(now);
                let next_hour = (now.hour() / interval + 1) * interval;
                day_start + Duration::hours(next_hour as i64)
            }
            Self::Continuous { interval_minutes } => {
                let step = interval_minutes.clamp(1, 1440) as i64 * 60;
                let secs = now.timestamp();
                let next = (secs.div_euclid(step) + 1) * step;
                Utc.timestamp_opt(next, 0).single().unwrap_or(now)
            }
        }
    }
}
