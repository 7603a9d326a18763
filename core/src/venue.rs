//! The polymorphic venue contract.
//!
//! Every venue, however it differs in wire protocol or auth scheme, is
//! reached through this single `async` trait object. The engine never
//! knows which concrete adapter it is driving.

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::error::Result;
use crate::types::{OrderInfo, OrderResult, Side};

/// A callback invoked once per canonicalized order-lifecycle event.
/// Boxed so adapters can store it without an extra generic parameter.
pub type OrderUpdateHandler = Box<dyn Fn(crate::types::OrderUpdate) + Send + Sync>;

/// The capability set every venue adapter implements.
///
/// `connect`/`disconnect` bracket the adapter's network lifetime;
/// everything else assumes a connected adapter.
#[async_trait]
pub trait VenueAdapter: Send + Sync {
    /// Human-readable venue name, used in logs and error messages.
    fn name(&self) -> &str;

    async fn connect(&self) -> Result<()>;
    async fn disconnect(&self) -> Result<()>;

    /// Resolve a symbolic ticker to a venue contract id and its tick size.
    /// Fails with `ConfigError` if `quantity` is below the venue's minimum.
    async fn get_contract_attributes(
        &self,
        ticker: &str,
        quantity: Decimal,
    ) -> Result<(String, Decimal)>;

    /// Current best bid/ask. Fails with `MarketDataError` if either side
    /// is missing, non-positive, or crossed.
    async fn fetch_bbo_prices(&self, contract_id: &str) -> Result<(Decimal, Decimal)>;

    /// Compute the canonical maker price for a new open order.
    async fn get_order_price(&self, contract_id: &str, side: Side) -> Result<Decimal>;

    async fn place_post_only_order(
        &self,
        contract_id: &str,
        quantity: Decimal,
        price: Decimal,
        side: Side,
    ) -> Result<OrderResult>;

    /// Place an open-side maker order, retrying on rejection and guarding
    /// against duplicate resting opens every fifth attempt.
    async fn place_open_order(
        &self,
        contract_id: &str,
        quantity: Decimal,
        side: Side,
    ) -> Result<OrderResult>;

    /// Place a close-side maker order at (a tick-adjusted variant of)
    /// `price`, with the same rejection-retry and duplicate-growth guard.
    async fn place_close_order(
        &self,
        contract_id: &str,
        quantity: Decimal,
        price: Decimal,
        side: Side,
    ) -> Result<OrderResult>;

    /// Boost-mode close: cross the spread immediately.
    async fn place_market_order(
        &self,
        contract_id: &str,
        quantity: Decimal,
        side: Side,
    ) -> Result<OrderResult>;

    async fn cancel_order(&self, order_id: &str) -> Result<OrderResult>;

    async fn get_order_info(&self, order_id: &str) -> Result<Option<OrderInfo>>;

    async fn get_active_orders(&self, contract_id: &str) -> Result<Vec<OrderInfo>>;

    /// Absolute size of the current net position in this contract.
    async fn get_account_position(&self, contract_id: &str) -> Result<Decimal>;

    /// Register the handler invoked for every canonical order-lifecycle
    /// event. Adapters call it from their stream-reading task.
    fn set_order_update_handler(&self, handler: OrderUpdateHandler);

    /// Whether this venue pushes order-lifecycle events over a
    /// persistent stream (true) or the engine must rely on polling
    /// (false). Used to size how long the engine waits for a cancel to
    /// be acknowledged before falling back to a status poll.
    fn is_streaming(&self) -> bool {
        false
    }
}
