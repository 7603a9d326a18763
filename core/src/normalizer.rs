//! Canonicalizes venue-specific order-update messages into `OrderUpdate`
//! and suppresses duplicate notifications.
//!
//! Adapters decode their own wire status strings into `RawOrderStatus`
//! and call `Normalizer::normalize`; everything downstream of that call
//! sees only the canonical shape.

use std::collections::HashMap;

use rust_decimal::Decimal;

use crate::types::{OrderRole, OrderStatus, OrderUpdate, Side};

/// The handful of statuses venues actually emit on the wire, before
/// the OPEN+filled_size>0 => PARTIALLY_FILLED derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawOrderStatus {
    Open,
    Filled,
    Cancelled,
    Rejected,
    PartiallyFilled,
}

struct Memo {
    status: OrderStatus,
    filled_size: Decimal,
}

/// Per-order-id dedup memo and contract filter, one per adapter instance.
#[derive(Default)]
pub struct Normalizer {
    contract_id: String,
    memo: HashMap<String, Memo>,
}

impl Normalizer {
    pub fn new(contract_id: impl Into<String>) -> Self {
        Self {
            contract_id: contract_id.into(),
            memo: HashMap::new(),
        }
    }

    /// Re-points the contract filter once the adapter resolves a ticker
    /// to its venue contract id (the normalizer is constructed before
    /// that resolution happens).
    pub fn set_contract_id(&mut self, contract_id: impl Into<String>) {
        self.contract_id = contract_id.into();
    }

    /// Canonicalize a raw order event. Returns `None` when the event
    /// belongs to a different contract, or is a duplicate OPEN with an
    /// unchanged `filled_size` already recorded for this order id.
    pub fn normalize(
        &mut self,
        order_id: &str,
        event_contract_id: &str,
        side: Side,
        close_side: Side,
        raw_status: RawOrderStatus,
        size: Decimal,
        price: Decimal,
        filled_size: Decimal,
    ) -> Option<OrderUpdate> {
        if event_contract_id != self.contract_id {
            return None;
        }

        let status = match raw_status {
            RawOrderStatus::Open if filled_size > Decimal::ZERO => OrderStatus::PartiallyFilled,
            RawOrderStatus::Open => OrderStatus::Open,
            RawOrderStatus::Filled => OrderStatus::Filled,
            RawOrderStatus::Cancelled | RawOrderStatus::Rejected => OrderStatus::Canceled,
            RawOrderStatus::PartiallyFilled => OrderStatus::PartiallyFilled,
        };

        if status == OrderStatus::Open {
            if let Some(memo) = self.memo.get(order_id) {
                if memo.status == OrderStatus::Open && memo.filled_size == filled_size {
                    return None;
                }
            }
        }

        if matches!(status, OrderStatus::Filled | OrderStatus::Canceled) {
            self.memo.remove(order_id);
        } else {
            self.memo.insert(
                order_id.to_string(),
                Memo {
                    status,
                    filled_size,
                },
            );
        }

        let order_role = if side == close_side {
            OrderRole::Close
        } else {
            OrderRole::Open
        };

        Some(OrderUpdate {
            order_id: order_id.to_string(),
            side,
            order_role,
            status,
            size,
            price,
            filled_size,
            contract_id: event_contract_id.to_string(),
        })
    }
}
