//! Canonical query construction and HMAC-SHA256 request signing.
//!
//! The signature covers the literal encoded string that goes on the wire, so
//! parameters keep the order the caller pushed them in and `signature` is
//! always appended last.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Ordered, URL-encoded parameter list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryBuilder {
    params: Vec<(String, String)>,
}

impl QueryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(mut self, key: &str, value: impl ToString) -> Self {
        self.params.push((key.to_string(), value.to_string()));
        self
    }

    pub fn push_opt(self, key: &str, value: Option<impl ToString>) -> Self {
        match value {
            Some(v) => self.push(key, v),
            None => self,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// `k1=v1&k2=v2` with values percent-encoded.
    pub fn encode(&self) -> String {
        self.params
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&")
    }
}

/// Hex HMAC-SHA256 digest of `payload` under `secret`.
pub fn sign(secret: &str, payload: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Append `timestamp`, `recvWindow` and the trailing `signature` to `query`.
pub fn signed_query(query: QueryBuilder, secret: &str, timestamp_ms: i64, recv_window_ms: u64) -> String {
    let canonical = query
        .push("recvWindow", recv_window_ms)
        .push("timestamp", timestamp_ms)
        .encode();
    let signature = sign(secret, &canonical);
    format!("{canonical}&signature={signature}")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "NhqPtmdSJYdKjVHjA7PZj4Mge3R5YNiP1e3UZjInClVN65XAbvqqM6A7H5fATj0j";

    #[test]
    fn test_reference_signature() {
        let payload = "symbol=LTCBTC&side=BUY&type=LIMIT&timeInForce=GTC&quantity=1&price=0.1&recvWindow=5000&timestamp=1499827319559";
        assert_eq!(
            sign(SECRET, payload),
            "c8db56825ae71d6d79447849e617115f4a920fa2acdcab2b053c4b2838bd6b71"
        );
    }

    #[test]
    fn test_signed_query_preserves_order_and_appends_signature() {
        let query = QueryBuilder::new()
            .push("symbol", "LTCBTC")
            .push("side", "BUY")
            .push("type", "LIMIT")
            .push("timeInForce", "GTC")
            .push("quantity", "1")
            .push("price", "0.1");
        let signed = signed_query(query, SECRET, 1499827319559, 5000);
        assert_eq!(
            signed,
            "symbol=LTCBTC&side=BUY&type=LIMIT&timeInForce=GTC&quantity=1&price=0.1&recvWindow=5000&timestamp=1499827319559&signature=c8db56825ae71d6d79447849e617115f4a920fa2acdcab2b053c4b2838bd6b71"
        );
    }

    #[test]
    fn test_values_are_percent_encoded() {
        let query = QueryBuilder::new()
            .push("symbol", "BTCUSDT")
            .push_opt("newClientOrderId", Some("a b/c"))
            .push_opt("price", None::<&str>);
        assert_eq!(query.encode(), "symbol=BTCUSDT&newClientOrderId=a%20b%2Fc");
    }
}
