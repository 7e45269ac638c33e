//! Error taxonomy for venue access and trade construction.
//!
//! Venue failures are classified into an [`ApiErrorKind`] once, inside the
//! client that observed them. Everything downstream (maker/taker fallback,
//! order lookups, timestamp resync) matches on the kind, never on the text
//! the remote API happened to send.

use crate::exchange::Venue;
use std::time::Duration;
use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, ArbError>;

/// Classification of a non-success venue response or transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    /// Post-only order rejected because it would have taken liquidity.
    WouldCross,
    /// Stop order rejected because its trigger is already satisfied.
    WouldTrigger,
    /// Signed request rejected for being outside the venue's recv window.
    TimestampSkew,
    /// Order id / client order id not known to the venue.
    OrderNotFound,
    /// Not enough margin to place or keep the order.
    InsufficientMargin,
    /// Malformed request: bad symbol, precision, quantity or parameter.
    InvalidRequest,
    /// Request weight or order rate exceeded.
    RateLimited,
    /// Connection, TLS, timeout or non-JSON gateway failure.
    Transport,
    /// Anything the classifier does not recognise.
    Other,
}

impl ApiErrorKind {
    /// Whether a maker attempt failing with this kind should fall back to a
    /// taker order. `InvalidRequest` and `InsufficientMargin` would fail the
    /// taker order in exactly the same way, so they propagate.
    pub fn permits_taker_fallback(self) -> bool {
        !matches!(self, Self::InvalidRequest | Self::InsufficientMargin)
    }

    /// Rejections the maker path expects as part of normal operation.
    pub fn is_expected_rejection(self) -> bool {
        matches!(self, Self::WouldCross | Self::WouldTrigger)
    }
}

/// All errors surfaced by the arbitrage engine.
#[derive(Debug, Error)]
pub enum ArbError {
    /// Missing or invalid configuration. Fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// The venue answered with a failure, or the transport failed.
    #[error("{venue} API error ({kind:?}{}): {message}", code_suffix(.code))]
    Api {
        venue: Venue,
        kind: ApiErrorKind,
        code: Option<i64>,
        message: String,
    },

    /// The venue answered successfully but without the fields we rely on.
    #[error("{venue} response parsing failed: {message}")]
    Parsing { venue: Venue, message: String },

    /// Computed trade quantity is not executable.
    #[error("sizing failed for {symbol}: {reason}")]
    Sizing { symbol: String, reason: String },

    /// A bounded wait did not converge.
    #[error("timed out after {waited:?} waiting for {what}")]
    Timeout { what: String, waited: Duration },

    /// The surrounding loop was cancelled.
    #[error("operation cancelled")]
    Cancelled,
}

fn code_suffix(code: &Option<i64>) -> String {
    code.map(|c| format!(", code {c}")).unwrap_or_default()
}

impl ArbError {
    pub fn api(venue: Venue, kind: ApiErrorKind, code: Option<i64>, message: impl Into<String>) -> Self {
        Self::Api {
            venue,
            kind,
            code,
            message: message.into(),
        }
    }

    pub fn parsing(venue: Venue, message: impl Into<String>) -> Self {
        Self::Parsing {
            venue,
            message: message.into(),
        }
    }

    pub fn sizing(symbol: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Sizing {
            symbol: symbol.into(),
            reason: reason.into(),
        }
    }

    /// Transport failure wrapper used by the HTTP clients.
    pub fn transport(venue: Venue, err: reqwest::Error) -> Self {
        Self::api(venue, ApiErrorKind::Transport, None, err.to_string())
    }

    /// The API error kind, if this is an API error.
    pub fn api_kind(&self) -> Option<ApiErrorKind> {
        match self {
            Self::Api { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    pub fn is_kind(&self, kind: ApiErrorKind) -> bool {
        self.api_kind() == Some(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_policy() {
        assert!(ApiErrorKind::WouldCross.permits_taker_fallback());
        assert!(ApiErrorKind::Transport.permits_taker_fallback());
        assert!(ApiErrorKind::Other.permits_taker_fallback());
        assert!(!ApiErrorKind::InsufficientMargin.permits_taker_fallback());
        assert!(!ApiErrorKind::InvalidRequest.permits_taker_fallback());

        assert!(ApiErrorKind::WouldCross.is_expected_rejection());
        assert!(!ApiErrorKind::Transport.is_expected_rejection());
    }

    #[test]
    fn test_display_includes_code() {
        let err = ArbError::api(Venue::Aster, ApiErrorKind::WouldCross, Some(-5022), "post only");
        let text = err.to_string();
        assert!(text.contains("Aster"));
        assert!(text.contains("-5022"));
        assert!(err.is_kind(ApiErrorKind::WouldCross));

        let err = ArbError::sizing("BTC", "zero quantity");
        assert_eq!(err.api_kind(), None);
        assert_eq!(err.to_string(), "sizing failed for BTC: zero quantity");
    }
}
