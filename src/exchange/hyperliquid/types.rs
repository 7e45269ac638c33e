//! Type definitions for Hyperliquid `/info` and `/exchange` payloads.

use crate::error::ApiErrorKind;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Request body for the info endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum InfoRequest {
    /// Universe metadata plus live contexts (funding, mark price).
    #[serde(rename = "metaAndAssetCtxs")]
    MetaAndAssetCtxs,

    #[serde(rename = "allMids")]
    AllMids,

    #[serde(rename = "l2Book")]
    L2Book { coin: String },

    /// Positions and margin summary for a user.
    #[serde(rename = "clearinghouseState")]
    ClearinghouseState { user: String },

    /// Open orders including `reduceOnly` and `cloid`.
    #[serde(rename = "frontendOpenOrders")]
    FrontendOpenOrders { user: String },

    /// Lookup by oid or cloid (`0x`-prefixed hex).
    #[serde(rename = "orderStatus")]
    OrderStatus { user: String, oid: String },
}

/// Response from metaAndAssetCtxs: `[Meta, [AssetCtx]]`.
pub type MetaAndAssetCtxsResponse = (Meta, Vec<AssetCtx>);

#[derive(Debug, Clone, Deserialize)]
pub struct Meta {
    pub universe: Vec<AssetMeta>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetMeta {
    /// Coin name (e.g. "BTC")
    pub name: String,
    pub sz_decimals: u32,
    pub max_leverage: u32,
    #[serde(default)]
    pub is_delisted: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetCtx {
    /// Hourly funding rate; null for inactive coins
    #[serde(default, deserialize_with = "deserialize_decimal_str_option_null")]
    pub funding: Option<Decimal>,
    #[serde(default, deserialize_with = "deserialize_decimal_str_option_null")]
    pub mark_px: Option<Decimal>,
    #[serde(default, deserialize_with = "deserialize_decimal_str_option_null")]
    pub mid_px: Option<Decimal>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct L2Book {
    pub coin: String,
    /// `[bids, asks]`, best first
    pub levels: Vec<Vec<L2Level>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct L2Level {
    #[serde(deserialize_with = "deserialize_decimal_str")]
    pub px: Decimal,
    #[serde(deserialize_with = "deserialize_decimal_str")]
    pub sz: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearinghouseState {
    #[serde(default)]
    pub asset_positions: Vec<AssetPosition>,
    pub margin_summary: Option<MarginSummary>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssetPosition {
    pub position: PositionData,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionData {
    pub coin: String,
    /// Signed size
    #[serde(deserialize_with = "deserialize_decimal_str")]
    pub szi: Decimal,
    #[serde(default, deserialize_with = "deserialize_decimal_str_option_null")]
    pub entry_px: Option<Decimal>,
    #[serde(default, deserialize_with = "deserialize_decimal_str_option_null")]
    pub position_value: Option<Decimal>,
    #[serde(default, deserialize_with = "deserialize_decimal_str_option_null")]
    pub unrealized_pnl: Option<Decimal>,
    #[serde(default)]
    pub leverage: Option<PositionLeverage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PositionLeverage {
    pub value: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarginSummary {
    #[serde(default, deserialize_with = "deserialize_decimal_str_option_null")]
    pub account_value: Option<Decimal>,
    #[serde(default, deserialize_with = "deserialize_decimal_str_option_null")]
    pub total_margin_used: Option<Decimal>,
}

/// Entry of `frontendOpenOrders`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrontendOrder {
    pub coin: String,
    /// "B" (bid) or "A" (ask)
    pub side: String,
    #[serde(deserialize_with = "deserialize_decimal_str")]
    pub limit_px: Decimal,
    /// Remaining size
    #[serde(deserialize_with = "deserialize_decimal_str")]
    pub sz: Decimal,
    /// Size at placement; only present in `orderStatus` responses
    #[serde(default, deserialize_with = "deserialize_decimal_str_option_null")]
    pub orig_sz: Option<Decimal>,
    pub oid: u64,
    #[serde(default)]
    pub cloid: Option<String>,
    #[serde(default)]
    pub reduce_only: bool,
}

/// Response of `orderStatus`: `{"status": "order", "order": {...}}` or
/// `{"status": "unknownOid"}`.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderStatusResponse {
    pub status: String,
    #[serde(default)]
    pub order: Option<OrderStatusEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrderStatusEntry {
    pub order: FrontendOrder,
    /// "open", "filled", "canceled", ...
    pub status: String,
}

/// Signed exchange request body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeRequest<'a> {
    pub action: &'a Action,
    pub nonce: u64,
    pub signature: super::signing::ActionSignature,
    pub vault_address: Option<String>,
}

/// L1 actions. Field order matters: the msgpack encoding is signed.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Action {
    Order {
        orders: Vec<OrderWire>,
        grouping: String,
    },
    Cancel {
        cancels: Vec<CancelWire>,
    },
    CancelByCloid {
        cancels: Vec<CancelByCloidWire>,
    },
    UpdateLeverage {
        asset: u32,
        #[serde(rename = "isCross")]
        is_cross: bool,
        leverage: u32,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderWire {
    /// Asset index
    pub a: u32,
    /// Is buy
    pub b: bool,
    /// Limit price
    pub p: String,
    /// Size
    pub s: String,
    /// Reduce only
    pub r: bool,
    pub t: OrderTypeWire,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub c: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum OrderTypeWire {
    Limit {
        tif: String,
    },
    #[serde(rename_all = "camelCase")]
    Trigger {
        is_market: bool,
        trigger_px: String,
        tpsl: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct CancelWire {
    pub a: u32,
    pub o: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CancelByCloidWire {
    pub asset: u32,
    pub cloid: String,
}

/// `{"status": "ok" | "err", "response": ...}`
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeResponse {
    pub status: String,
    #[serde(default)]
    pub response: serde_json::Value,
}

/// Per-order result inside `response.data.statuses`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OrderResult {
    Resting {
        oid: u64,
    },
    #[serde(rename_all = "camelCase")]
    Filled {
        #[serde(deserialize_with = "deserialize_decimal_str")]
        total_sz: Decimal,
        #[serde(deserialize_with = "deserialize_decimal_str")]
        avg_px: Decimal,
        oid: u64,
    },
    /// Trigger order accepted, waiting for its trigger price.
    WaitingForTrigger,
    WaitingForFill,
    Error(String),
}

/// Map a Hyperliquid error message to its kind.
pub fn classify_error(message: &str) -> ApiErrorKind {
    let msg = message.to_ascii_lowercase();
    if msg.contains("post only order would have immediately matched") {
        ApiErrorKind::WouldCross
    } else if msg.contains("insufficient margin") {
        ApiErrorKind::InsufficientMargin
    } else if msg.contains("never placed, already canceled, or filled") {
        ApiErrorKind::OrderNotFound
    } else if msg.contains("too many") || msg.contains("rate limit") {
        ApiErrorKind::RateLimited
    } else if msg.contains("tick size")
        || msg.contains("minimum value")
        || msg.contains("invalid size")
        || msg.contains("invalid price")
        || msg.contains("reduce only order would increase")
    {
        ApiErrorKind::InvalidRequest
    } else {
        ApiErrorKind::Other
    }
}

// Hyperliquid encodes decimals as strings.

fn deserialize_decimal_str<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    s.parse::<Decimal>().map_err(serde::de::Error::custom)
}

/// Handles both null JSON values and missing fields.
fn deserialize_decimal_str_option_null<'de, D>(deserializer: D) -> Result<Option<Decimal>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt: Option<Option<String>> = Option::deserialize(deserializer)?;
    match opt {
        Some(Some(s)) if !s.is_empty() => s
            .parse::<Decimal>()
            .map(Some)
            .map_err(serde::de::Error::custom),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_deserialize_asset_ctx_with_nulls() {
        let json = r#"{"funding": null, "markPx": "50005.0", "midPx": null, "openInterest": "1"}"#;
        let ctx: AssetCtx = serde_json::from_str(json).unwrap();
        assert_eq!(ctx.funding, None);
        assert_eq!(ctx.mark_px, Some(dec!(50005.0)));
    }

    #[test]
    fn test_order_action_wire_shape() {
        let action = Action::Order {
            orders: vec![OrderWire {
                a: 0,
                b: true,
                p: "50000".into(),
                s: "0.01".into(),
                r: false,
                t: OrderTypeWire::Limit { tif: "Alo".into() },
                c: Some("0x0123".into()),
            }],
            grouping: "na".into(),
        };
        let json = serde_json::to_string(&action).unwrap();
        assert_eq!(
            json,
            r#"{"type":"order","orders":[{"a":0,"b":true,"p":"50000","s":"0.01","r":false,"t":{"limit":{"tif":"Alo"}},"c":"0x0123"}],"grouping":"na"}"#
        );

        let trigger = OrderTypeWire::Trigger {
            is_market: true,
            trigger_px: "49000".into(),
            tpsl: "sl".into(),
        };
        assert_eq!(
            serde_json::to_string(&trigger).unwrap(),
            r#"{"trigger":{"isMarket":true,"triggerPx":"49000","tpsl":"sl"}}"#
        );

        let leverage = Action::UpdateLeverage {
            asset: 3,
            is_cross: true,
            leverage: 5,
        };
        assert_eq!(
            serde_json::to_string(&leverage).unwrap(),
            r#"{"type":"updateLeverage","asset":3,"isCross":true,"leverage":5}"#
        );
    }

    #[test]
    fn test_order_results() {
        let results: Vec<OrderResult> = serde_json::from_str(
            r#"[{"resting":{"oid":77}},{"filled":{"totalSz":"0.02","avgPx":"1891.4","oid":78}},{"error":"Post only order would have immediately matched, bbo was 1.0@2.0. asset=0"}]"#,
        )
        .unwrap();
        assert!(matches!(results[0], OrderResult::Resting { oid: 77 }));
        assert!(matches!(results[1], OrderResult::Filled { total_sz, .. } if total_sz == dec!(0.02)));
        match &results[2] {
            OrderResult::Error(msg) => assert_eq!(classify_error(msg), ApiErrorKind::WouldCross),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_classify_error_messages() {
        assert_eq!(classify_error("Insufficient margin to place order. asset=0"), ApiErrorKind::InsufficientMargin);
        assert_eq!(
            classify_error("Order was never placed, already canceled, or filled."),
            ApiErrorKind::OrderNotFound
        );
        assert_eq!(classify_error("Order must have minimum value of $10."), ApiErrorKind::InvalidRequest);
        assert_eq!(classify_error("Something else entirely"), ApiErrorKind::Other);
    }
}
