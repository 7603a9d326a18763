//! `TradingConfig`: the immutable parameters of one trading cycle.
//!
//! Resolved by the bot's env loader (see `grid-bot::env_config`) and
//! validated once at startup; the engine treats it as read-only for its
//! entire lifetime.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::Direction;

/// Parameters for one (ticker, venue, direction) trading cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    pub ticker: String,

    /// Resolved at startup from `ticker` via the adapter's contract lookup.
    #[serde(default)]
    pub contract_id: String,

    pub quantity: Decimal,

    /// Percent offset applied to the fill price to compute the close price.
    pub take_profit_pct: Decimal,

    /// Resolved at startup via the adapter's contract lookup.
    #[serde(default)]
    pub tick_size: Decimal,

    pub direction: Direction,

    pub max_orders: usize,

    /// Base cool-down, in seconds, scaled by close-order saturation.
    pub wait_time: u64,

    pub venue: String,

    /// Minimum multiplicative gap, as a percent, between successive close
    /// prices before a new open is allowed.
    #[serde(default)]
    pub grid_step_pct: Decimal,

    /// -1 disables the stop-price gate.
    #[serde(default = "default_disabled_price")]
    pub stop_price: Decimal,

    /// -1 disables the pause-price gate.
    #[serde(default = "default_disabled_price")]
    pub pause_price: Decimal,

    #[serde(default)]
    pub boost_mode: bool,

    /// Enables `TradingEngine::refresh_timed_out_close_orders` from the
    /// main loop. Off by default; exists mainly for tests to exercise the
    /// timeout-refresh path deterministically.
    #[serde(default)]
    pub refresh_stale_close_orders: bool,
}

fn default_disabled_price() -> Decimal {
    Decimal::new(-1, 0)
}

impl TradingConfig {
    /// Side a new open order is placed on.
    pub fn open_side(&self) -> crate::types::Side {
        self.direction.open_side()
    }

    /// Side take-profit close orders are placed on.
    pub fn close_side(&self) -> crate::types::Side {
        self.direction.close_side()
    }

    pub fn stop_price_enabled(&self) -> bool {
        self.stop_price >= Decimal::ZERO
    }

    pub fn pause_price_enabled(&self) -> bool {
        self.pause_price >= Decimal::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn base_config() -> TradingConfig {
        TradingConfig {
            ticker: "ETH".into(),
            contract_id: "ETH-PERP".into(),
            quantity: dec!(1),
            take_profit_pct: dec!(0.01),
            tick_size: dec!(0.5),
            direction: Direction::Buy,
            max_orders: 10,
            wait_time: 60,
            venue: "lighter".into(),
            grid_step_pct: dec!(0.1),
            stop_price: dec!(-1),
            pause_price: dec!(-1),
            boost_mode: false,
            refresh_stale_close_orders: false,
        }
    }

    #[test]
    fn close_side_is_opposite_direction() {
        let cfg = base_config();
        assert_eq!(cfg.open_side(), crate::types::Side::Buy);
        assert_eq!(cfg.close_side(), crate::types::Side::Sell);
    }

    #[test]
    fn negative_one_disables_stop_and_pause() {
        let cfg = base_config();
        assert!(!cfg.stop_price_enabled());
        assert!(!cfg.pause_price_enabled());
    }

    #[test]
    fn non_negative_price_enables_gate() {
        let mut cfg = base_config();
        cfg.stop_price = dec!(3500);
        assert!(cfg.stop_price_enabled());
    }
}
