//! Error types for the trading engine and its collaborators.
//!
//! Each variant carries enough context (venue, contract, message) that
//! a `tracing::error!` call can log it structurally rather than as a
//! flattened string.

use thiserror::Error;

/// Errors surfaced by the engine, venue adapters, and config loader.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Transient network failure during a retried query. Adapters retry
    /// this internally; it escapes only once the retry policy is exhausted.
    #[error("network error talking to {venue}: {message}")]
    NetworkTransient { venue: String, message: String },

    /// The order book has no usable top of book (missing side, crossed,
    /// or non-positive price).
    #[error("bad market data for {contract_id} on {venue}: {message}")]
    MarketDataError {
        venue: String,
        contract_id: String,
        message: String,
    },

    /// A maker order was rejected by the venue.
    #[error("order rejected on {venue}: {message}")]
    OrderRejected { venue: String, message: String },

    /// An order stayed in PENDING longer than the placement deadline.
    #[error("order {order_id} on {venue} timed out waiting for a terminal status")]
    OrderTimeout { venue: String, order_id: String },

    /// An invariant the engine relies on to stay safe was violated
    /// (duplicate open orders, abnormal close-order growth).
    #[error("safety check failed on {venue}: {message}")]
    SafetyError { venue: String, message: String },

    /// Reconciled position and active close-order size disagree by more
    /// than the configured tolerance.
    #[error(
        "position mismatch on {venue}/{ticker}: position={position} active_close_size={active_close_size}"
    )]
    PositionMismatch {
        venue: String,
        ticker: String,
        position: rust_decimal::Decimal,
        active_close_size: rust_decimal::Decimal,
    },

    /// The market crossed the configured stop price.
    #[error("stop price hit on {venue}/{ticker}: market={market} stop={stop}")]
    StopPriceHit {
        venue: String,
        ticker: String,
        market: rust_decimal::Decimal,
        stop: rust_decimal::Decimal,
    },

    /// The venue name in config does not match any registered adapter.
    #[error("unknown venue: {0}")]
    UnknownVenue(String),

    /// Configuration failed validation before the engine could start.
    #[error("config error: {0}")]
    ConfigError(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_mismatch_formats_with_context() {
        let err = EngineError::PositionMismatch {
            venue: "lighter".into(),
            ticker: "ETH".into(),
            position: rust_decimal::Decimal::new(5, 0),
            active_close_size: rust_decimal::Decimal::new(2, 0),
        };
        let msg = format!("{err}");
        assert!(msg.contains("lighter"));
        assert!(msg.contains("position=5"));
    }

    #[test]
    fn unknown_venue_message_contains_name() {
        let err = EngineError::UnknownVenue("nope".into());
        assert!(format!("{err}").contains("nope"));
    }
}
