//! Venue registry: resolves a venue name from config to a constructed
//! adapter instance.
//!
//! Mirrors the reference implementation's `ExchangeFactory`: a name-to-
//! constructor map populated at startup, with new venues registrable at
//! runtime for dynamic wiring in the CLI and in tests.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{EngineError, Result};
use crate::venue::VenueAdapter;

/// Opaque credential bag handed to a venue constructor. Never logged.
#[derive(Debug, Clone, Default)]
pub struct VenueCredentials {
    values: HashMap<String, String>,
}

impl VenueCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn require(&self, key: &str) -> Result<&str> {
        self.get(key)
            .ok_or_else(|| EngineError::ConfigError(format!("missing credential: {key}")))
    }
}

type Constructor =
    Arc<dyn Fn(&crate::config::TradingConfig, &VenueCredentials) -> Result<Arc<dyn VenueAdapter>> + Send + Sync>;

/// Name-to-constructor map resolved once at startup.
#[derive(Clone, Default)]
pub struct VenueRegistry {
    constructors: HashMap<String, Constructor>,
}

impl VenueRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor under a lowercased venue name. Registering
    /// the same name twice replaces the previous constructor.
    pub fn register<F>(&mut self, name: &str, constructor: F)
    where
        F: Fn(&crate::config::TradingConfig, &VenueCredentials) -> Result<Arc<dyn VenueAdapter>>
            + Send
            + Sync
            + 'static,
    {
        self.constructors
            .insert(name.to_lowercase(), Arc::new(constructor));
    }

    /// Construct the adapter registered for `config.venue`.
    pub fn create(
        &self,
        config: &crate::config::TradingConfig,
        credentials: &VenueCredentials,
    ) -> Result<Arc<dyn VenueAdapter>> {
        let key = config.venue.to_lowercase();
        let ctor = self
            .constructors
            .get(&key)
            .ok_or_else(|| EngineError::UnknownVenue(config.venue.clone()))?;
        ctor(config, credentials)
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.constructors.contains_key(&name.to_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Direction, Side};
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    struct StubAdapter;

    #[async_trait]
    impl VenueAdapter for StubAdapter {
        fn name(&self) -> &str {
            "stub"
        }
        async fn connect(&self) -> Result<()> {
            Ok(())
        }
        async fn disconnect(&self) -> Result<()> {
            Ok(())
        }
        async fn get_contract_attributes(
            &self,
            _ticker: &str,
            _quantity: Decimal,
        ) -> Result<(String, Decimal)> {
            Ok(("STUB-PERP".into(), dec!(0.1)))
        }
        async fn fetch_bbo_prices(&self, _contract_id: &str) -> Result<(Decimal, Decimal)> {
            Ok((dec!(100), dec!(100.5)))
        }
        async fn get_order_price(&self, _contract_id: &str, _side: Side) -> Result<Decimal> {
            Ok(dec!(100))
        }
        async fn place_post_only_order(
            &self,
            _contract_id: &str,
            _quantity: Decimal,
            _price: Decimal,
            _side: Side,
        ) -> Result<crate::types::OrderResult> {
            unimplemented!()
        }
        async fn place_open_order(
            &self,
            _contract_id: &str,
            _quantity: Decimal,
            _side: Side,
        ) -> Result<crate::types::OrderResult> {
            unimplemented!()
        }
        async fn place_close_order(
            &self,
            _contract_id: &str,
            _quantity: Decimal,
            _price: Decimal,
            _side: Side,
        ) -> Result<crate::types::OrderResult> {
            unimplemented!()
        }
        async fn place_market_order(
            &self,
            _contract_id: &str,
            _quantity: Decimal,
            _side: Side,
        ) -> Result<crate::types::OrderResult> {
            unimplemented!()
        }
        async fn cancel_order(&self, _order_id: &str) -> Result<crate::types::OrderResult> {
            unimplemented!()
        }
        async fn get_order_info(&self, _order_id: &str) -> Result<Option<crate::types::OrderInfo>> {
            Ok(None)
        }
        async fn get_active_orders(&self, _contract_id: &str) -> Result<Vec<crate::types::OrderInfo>> {
            Ok(vec![])
        }
        async fn get_account_position(&self, _contract_id: &str) -> Result<Decimal> {
            Ok(Decimal::ZERO)
        }
        fn set_order_update_handler(&self, _handler: crate::venue::OrderUpdateHandler) {}
    }

    fn sample_config(venue: &str) -> crate::config::TradingConfig {
        crate::config::TradingConfig {
            ticker: "ETH".into(),
            contract_id: String::new(),
            quantity: dec!(1),
            take_profit_pct: dec!(0.01),
            tick_size: dec!(0.1),
            direction: Direction::Buy,
            max_orders: 5,
            wait_time: 30,
            venue: venue.into(),
            grid_step_pct: dec!(0.1),
            stop_price: dec!(-1),
            pause_price: dec!(-1),
            boost_mode: false,
            refresh_stale_close_orders: false,
        }
    }

    #[test]
    fn unregistered_venue_fails() {
        let registry = VenueRegistry::new();
        let creds = VenueCredentials::new();
        let err = registry.create(&sample_config("nope"), &creds).unwrap_err();
        assert!(matches!(err, EngineError::UnknownVenue(_)));
    }

    #[test]
    fn registered_venue_constructs() {
        let mut registry = VenueRegistry::new();
        registry.register("stub", |_cfg, _creds| Ok(Arc::new(StubAdapter)));
        let creds = VenueCredentials::new();
        let adapter = registry.create(&sample_config("STUB"), &creds).unwrap();
        assert_eq!(adapter.name(), "stub");
    }
}
