//! Core trading-engine types and state machines shared by every venue
//! adapter and by the `gridctl` binary.
//!
//! Modules are organized leaf-first: `types`/`error`/`config` define the
//! vocabulary, `venue` defines the polymorphic contract adapters
//! implement, `orderbook`/`normalizer` are the building blocks an
//! adapter composes internally, and `engine` is the control loop that
//! drives them all.

pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod normalizer;
pub mod notify;
pub mod orderbook;
pub mod registry;
pub mod retry;
pub mod types;
pub mod venue;

pub mod prelude {
    pub use crate::config::TradingConfig;
    pub use crate::engine::TradingEngine;
    pub use crate::error::{EngineError, Result};
    pub use crate::notify::{CompositeSink, NotificationSink, NullSink, WebhookSink};
    pub use crate::orderbook::{BookLevel, OrderBookMaintainer};
    pub use crate::registry::{VenueCredentials, VenueRegistry};
    pub use crate::types::{
        Direction, OrderInfo, OrderIntent, OrderKind, OrderResult, OrderRole, OrderStatus,
        OrderUpdate, Side,
    };
    pub use crate::venue::{OrderUpdateHandler, VenueAdapter};
}
