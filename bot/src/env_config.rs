//! Loads `TradingConfig` and venue credentials from the process
//! environment, mirroring the reference bot's `.env`-driven bootstrap:
//! every parameter is a plain environment variable, with a `.env` file
//! in the working directory loaded first if one is present.

use std::env;

use grid_core::config::TradingConfig;
use grid_core::error::{EngineError, Result};
use grid_core::registry::VenueCredentials;
use grid_core::types::Direction;
use rust_decimal::Decimal;

fn require(key: &str) -> Result<String> {
    env::var(key).map_err(|_| EngineError::ConfigError(format!("missing environment variable: {key}")))
}

fn parse<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.parse()
        .map_err(|_| EngineError::ConfigError(format!("{key}={raw} is not a valid value")))
}

fn optional_decimal(key: &str, default: Decimal) -> Result<Decimal> {
    match env::var(key) {
        Ok(raw) => parse(key, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_bool_flag(raw: &str) -> bool {
    matches!(raw.to_lowercase().as_str(), "1" | "true" | "yes")
}

fn optional_bool(key: &str) -> bool {
    env::var(key).map(|raw| parse_bool_flag(&raw)).unwrap_or(false)
}

fn parse_direction(raw: &str) -> Result<Direction> {
    match raw.to_lowercase().as_str() {
        "buy" | "long" => Ok(Direction::Buy),
        "sell" | "short" => Ok(Direction::Sell),
        other => Err(EngineError::ConfigError(format!(
            "DIRECTION must be buy or sell, got {other}"
        ))),
    }
}

/// Loads a `.env` file from the working directory if one exists (a
/// missing file is not an error), then reads every trading parameter
/// from the process environment.
pub fn load_trading_config() -> Result<TradingConfig> {
    let _ = dotenv::dotenv();

    let ticker = require("TICKER")?;
    let venue = require("VENUE")?;
    let direction = parse_direction(&require("DIRECTION")?)?;
    let quantity = parse::<Decimal>("QUANTITY", &require("QUANTITY")?)?;
    let take_profit_pct = parse::<Decimal>("TAKE_PROFIT_PCT", &require("TAKE_PROFIT_PCT")?)?;
    let max_orders = parse::<usize>("MAX_ORDERS", &require("MAX_ORDERS")?)?;
    let wait_time = parse::<u64>("WAIT_TIME", &require("WAIT_TIME")?)?;
    let grid_step_pct = optional_decimal("GRID_STEP_PCT", Decimal::ZERO)?;
    let stop_price = optional_decimal("STOP_PRICE", Decimal::new(-1, 0))?;
    let pause_price = optional_decimal("PAUSE_PRICE", Decimal::new(-1, 0))?;
    let boost_mode = optional_bool("BOOST_MODE");
    let refresh_stale_close_orders = optional_bool("REFRESH_STALE_CLOSE_ORDERS");

    Ok(TradingConfig {
        ticker,
        contract_id: String::new(),
        quantity,
        take_profit_pct,
        tick_size: Decimal::ZERO,
        direction,
        max_orders,
        wait_time,
        venue,
        grid_step_pct,
        stop_price,
        pause_price,
        boost_mode,
        refresh_stale_close_orders,
    })
}

/// Collects every `<VENUE>_*`-prefixed environment variable into a
/// credential bag for the registry's constructor to read from.
pub fn load_venue_credentials(venue: &str) -> VenueCredentials {
    let prefix = format!("{}_", venue.to_uppercase());
    let mut credentials = VenueCredentials::new();
    for (key, value) in env::vars() {
        if key.starts_with(&prefix) {
            credentials.insert(key, value);
        }
    }
    credentials
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_direction_accepts_long_and_short_aliases() {
        assert_eq!(parse_direction("long").unwrap(), Direction::Buy);
        assert_eq!(parse_direction("short").unwrap(), Direction::Sell);
        assert_eq!(parse_direction("BUY").unwrap(), Direction::Buy);
    }

    #[test]
    fn parse_direction_rejects_unknown_values() {
        assert!(parse_direction("sideways").is_err());
    }

    #[test]
    fn parse_bool_flag_accepts_common_truthy_spellings() {
        assert!(parse_bool_flag("true"));
        assert!(parse_bool_flag("1"));
        assert!(parse_bool_flag("Yes"));
        assert!(!parse_bool_flag("0"));
        assert!(!parse_bool_flag(""));
    }
}
