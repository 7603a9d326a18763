//! Canonical types exchanged between the engine and venue adapters.
//!
//! Every adapter, regardless of venue, speaks these shapes; venue-specific
//! translation happens inside the adapter, never in the engine.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Which side of the book an order rests on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

/// Whether an order belongs to the open leg or the close leg of a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderRole {
    Open,
    Close,
}

/// How an order was (or should be) placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderKind {
    OpenPostOnly,
    ClosePostOnly,
    CloseMarket,
}

/// Canonical order status, after venue-specific translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    Open,
    PartiallyFilled,
    Filled,
    Canceled,
    Pending,
    Rejected,
    Unknown,
}

/// What the engine asks an adapter to place.
#[derive(Debug, Clone)]
pub struct OrderIntent {
    pub contract_id: String,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub side: Side,
    pub kind: OrderKind,
}

/// Synchronous response to placing, canceling, or querying an order.
#[derive(Debug, Clone)]
pub struct OrderResult {
    pub success: bool,
    pub order_id: Option<String>,
    pub side: Option<Side>,
    pub size: Option<Decimal>,
    pub price: Option<Decimal>,
    pub status: OrderStatus,
    pub error_message: Option<String>,
    pub filled_size: Decimal,
}

impl OrderResult {
    pub fn rejected(error_message: impl Into<String>) -> Self {
        Self {
            success: false,
            order_id: None,
            side: None,
            size: None,
            price: None,
            status: OrderStatus::Rejected,
            error_message: Some(error_message.into()),
            filled_size: Decimal::ZERO,
        }
    }
}

/// Queried snapshot of a single order.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderInfo {
    pub order_id: String,
    pub side: Side,
    pub size: Decimal,
    pub price: Decimal,
    pub status: OrderStatus,
    pub filled_size: Decimal,
}

impl OrderInfo {
    pub fn remaining_size(&self) -> Decimal {
        (self.size - self.filled_size).max(Decimal::ZERO)
    }
}

/// Canonical order-lifecycle event delivered from an adapter's stream
/// handler into the engine.
#[derive(Debug, Clone)]
pub struct OrderUpdate {
    pub order_id: String,
    pub side: Side,
    pub order_role: OrderRole,
    pub status: OrderStatus,
    pub size: Decimal,
    pub price: Decimal,
    pub filled_size: Decimal,
    pub contract_id: String,
}

/// A trading direction for the bot as a whole: which side it opens on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Buy,
    Sell,
}

impl Direction {
    pub fn open_side(self) -> Side {
        match self {
            Direction::Buy => Side::Buy,
            Direction::Sell => Side::Sell,
        }
    }

    pub fn close_side(self) -> Side {
        self.open_side().opposite()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_close_side_is_opposite_of_open_side() {
        assert_eq!(Direction::Buy.close_side(), Side::Sell);
        assert_eq!(Direction::Sell.close_side(), Side::Buy);
    }

    #[test]
    fn order_info_remaining_size_floors_at_zero() {
        let info = OrderInfo {
            order_id: "1".into(),
            side: Side::Buy,
            size: Decimal::new(1, 0),
            price: Decimal::new(100, 0),
            status: OrderStatus::Filled,
            filled_size: Decimal::new(2, 0),
        };
        assert_eq!(info.remaining_size(), Decimal::ZERO);
    }
}
