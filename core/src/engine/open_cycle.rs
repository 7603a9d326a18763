//! The open -> await-fill -> close sub-state-machine for a single cycle.
//!
//! One cycle places an open-side maker order, waits for it to fill (or
//! goes stale and gets canceled), and pairs whatever quantity actually
//! filled with a take-profit close order.

use std::sync::Mutex;
use std::time::Duration;

use rust_decimal::Decimal;
use tokio::sync::Notify;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::error::{EngineError, Result};
use crate::logging::TransactionLog;
use crate::types::{OrderStatus, OrderUpdate, Side};
use crate::venue::VenueAdapter;

const FILL_WAIT: Duration = Duration::from_secs(10);
/// Post-cancel wait for a REST-poll venue, which only learns a cancel
/// landed once its next status poll comes back.
const CANCEL_WAIT_POLLED: Duration = Duration::from_secs(5);
/// Post-cancel wait for a streaming venue: longer, since the adapter is
/// waiting on a push event rather than re-polling.
const CANCEL_WAIT_STREAMING: Duration = Duration::from_secs(10);
const STALE_RECHECK_INTERVAL: Duration = Duration::from_secs(5);

fn cancel_wait_for(adapter: &dyn VenueAdapter) -> Duration {
    if adapter.is_streaming() {
        CANCEL_WAIT_STREAMING
    } else {
        CANCEL_WAIT_POLLED
    }
}

/// Shared wake state between the engine's control loop and the adapter's
/// stream-handling task: the handler installed via
/// `VenueAdapter::set_order_update_handler` writes into this and signals
/// the `Notify` pair; the control loop awaits them.
#[derive(Default)]
pub struct OrderWatch {
    tracked_order_id: Mutex<Option<String>>,
    status: Mutex<OrderStatus>,
    filled_size: Mutex<Decimal>,
    filled_price: Mutex<Decimal>,
    fill_notify: Notify,
    cancel_notify: Notify,
}

impl OrderWatch {
    pub fn new() -> Self {
        Self {
            tracked_order_id: Mutex::new(None),
            status: Mutex::new(OrderStatus::Unknown),
            filled_size: Mutex::new(Decimal::ZERO),
            filled_price: Mutex::new(Decimal::ZERO),
            fill_notify: Notify::new(),
            cancel_notify: Notify::new(),
        }
    }

    /// Start tracking a freshly-placed order, clearing prior scratch state.
    pub fn arm(&self, order_id: String) {
        *self.tracked_order_id.lock().unwrap() = Some(order_id);
        *self.status.lock().unwrap() = OrderStatus::Open;
        *self.filled_size.lock().unwrap() = Decimal::ZERO;
        *self.filled_price.lock().unwrap() = Decimal::ZERO;
    }

    /// Called from the adapter's stream handler for every canonical
    /// order-lifecycle event; ignores events for orders we are not
    /// currently tracking.
    pub fn observe(&self, update: &OrderUpdate) {
        let tracked = self.tracked_order_id.lock().unwrap();
        if tracked.as_deref() != Some(update.order_id.as_str()) {
            return;
        }
        drop(tracked);

        *self.status.lock().unwrap() = update.status;
        if update.filled_size > Decimal::ZERO {
            *self.filled_size.lock().unwrap() = update.filled_size;
            *self.filled_price.lock().unwrap() = update.price;
        }

        match update.status {
            OrderStatus::Filled => self.fill_notify.notify_one(),
            OrderStatus::Canceled => self.cancel_notify.notify_one(),
            _ => {}
        }
    }

    pub fn status(&self) -> OrderStatus {
        *self.status.lock().unwrap()
    }

    pub fn filled_size(&self) -> Decimal {
        *self.filled_size.lock().unwrap()
    }

    pub fn filled_price(&self) -> Decimal {
        *self.filled_price.lock().unwrap()
    }
}

/// What one open cycle accomplished, used by the caller to update
/// `last_open_order_time` and the active-close-orders index.
pub struct CycleOutcome {
    pub close_order_id: Option<String>,
    pub close_price: Decimal,
    pub close_size: Decimal,
}

/// Runs one open -> close cycle to completion.
pub async fn run_cycle(
    adapter: &dyn VenueAdapter,
    watch: &OrderWatch,
    contract_id: &str,
    quantity: Decimal,
    open_side: Side,
    close_side: Side,
    take_profit_pct: Decimal,
    boost_mode: bool,
    transaction_log: Option<&TransactionLog>,
) -> Result<Option<CycleOutcome>> {
    let open_price = adapter.get_order_price(contract_id, open_side).await?;
    let open_result = adapter.place_open_order(contract_id, quantity, open_side).await?;
    let Some(order_id) = open_result.order_id.clone() else {
        return Ok(None);
    };
    watch.arm(order_id.clone());

    if matches!(open_result.status, OrderStatus::Filled) {
        return finalize_fill(
            adapter,
            contract_id,
            open_result.price.unwrap_or(open_price),
            open_result.filled_size.max(quantity),
            close_side,
            take_profit_pct,
            boost_mode,
            transaction_log,
        )
        .await
        .map(Some);
    }

    if timeout(FILL_WAIT, watch.fill_notify.notified()).await.is_err() {
        await_fill_or_staleness(adapter, watch, contract_id, open_side, open_price).await?;
    }

    if watch.status() == OrderStatus::Filled {
        let filled_price = watch.filled_price();
        let filled_size = watch.filled_size();
        return finalize_fill(
            adapter,
            contract_id,
            filled_price,
            filled_size,
            close_side,
            take_profit_pct,
            boost_mode,
            transaction_log,
        )
        .await
        .map(Some);
    }

    cancel_and_reconcile_partial(
        adapter,
        watch,
        contract_id,
        &order_id,
        close_side,
        take_profit_pct,
        transaction_log,
    )
    .await
}

/// A resting order is stale once the current maker price would no
/// longer be at least as good as the price it was placed at: for a buy
/// open, the market has moved down (a cheaper price is now available);
/// for a sell open, the market has moved up.
fn is_stale(open_side: Side, current_price: Decimal, resting_price: Decimal) -> bool {
    match open_side {
        Side::Buy => current_price <= resting_price,
        Side::Sell => current_price >= resting_price,
    }
}

/// While the order is still open and the market has not moved against
/// it, keep re-checking every five seconds; returns once the market has
/// gone stale or a terminal status arrives.
async fn await_fill_or_staleness(
    adapter: &dyn VenueAdapter,
    watch: &OrderWatch,
    contract_id: &str,
    open_side: Side,
    resting_price: Decimal,
) -> Result<()> {
    loop {
        if watch.status() != OrderStatus::Open && watch.status() != OrderStatus::PartiallyFilled {
            return Ok(());
        }

        tokio::select! {
            _ = watch.fill_notify.notified() => return Ok(()),
            _ = tokio::time::sleep(STALE_RECHECK_INTERVAL) => {}
        }

        if watch.status() != OrderStatus::Open && watch.status() != OrderStatus::PartiallyFilled {
            return Ok(());
        }

        let current_price = adapter.get_order_price(contract_id, open_side).await?;
        if is_stale(open_side, current_price, resting_price) {
            warn!(contract_id, %current_price, %resting_price, "open order stale, canceling");
            return Ok(());
        }
        info!(contract_id, "open order still resting at the best price, re-checking in 5s");
    }
}

async fn cancel_and_reconcile_partial(
    adapter: &dyn VenueAdapter,
    watch: &OrderWatch,
    contract_id: &str,
    order_id: &str,
    close_side: Side,
    take_profit_pct: Decimal,
    transaction_log: Option<&TransactionLog>,
) -> Result<Option<CycleOutcome>> {
    adapter.cancel_order(order_id).await?;

    let cancel_wait = timeout(cancel_wait_for(adapter), watch.cancel_notify.notified()).await;
    if cancel_wait.is_err() {
        if let Some(info) = adapter.get_order_info(order_id).await? {
            if info.filled_size > Decimal::ZERO {
                *watch
                    .filled_size
                    .lock()
                    .map_err(|_| EngineError::SafetyError {
                        venue: "engine".into(),
                        message: "order watch mutex poisoned".into(),
                    })?
                = info.filled_size;
            }
        }
    }

    if let Some(log) = transaction_log {
        log.log_transaction(&format!("CANCELED order={order_id} contract={contract_id}"));
    }

    let filled_size = watch.filled_size();
    if filled_size <= Decimal::ZERO {
        return Ok(None);
    }

    // Open Question #1: the close price is derived from this attempt's
    // own intended fill price, not a freshly-fetched market price.
    let filled_price = watch.filled_price();
    let close_price = take_profit_price(filled_price, close_side, take_profit_pct);
    warn!(
        contract_id,
        %filled_size,
        %close_price,
        "stale open canceled with a partial fill, placing close for the filled amount"
    );
    let close = adapter
        .place_close_order(contract_id, filled_size, close_price, close_side)
        .await?;
    Ok(Some(CycleOutcome {
        close_order_id: close.order_id,
        close_price,
        close_size: filled_size,
    }))
}

async fn finalize_fill(
    adapter: &dyn VenueAdapter,
    contract_id: &str,
    filled_price: Decimal,
    filled_size: Decimal,
    close_side: Side,
    take_profit_pct: Decimal,
    boost_mode: bool,
    transaction_log: Option<&TransactionLog>,
) -> Result<CycleOutcome> {
    let close_price = take_profit_price(filled_price, close_side, take_profit_pct);
    let close = if boost_mode {
        adapter.place_market_order(contract_id, filled_size, close_side).await?
    } else {
        adapter
            .place_close_order(contract_id, filled_size, close_price, close_side)
            .await?
    };

    if !close.success {
        return Err(EngineError::OrderRejected {
            venue: "engine".into(),
            message: close
                .error_message
                .unwrap_or_else(|| "close order submission failed".into()),
        });
    }

    info!(contract_id, %filled_size, %close_price, "open filled, close placed");
    if let Some(log) = transaction_log {
        log.log_transaction(&format!(
            "FILLED contract={contract_id} size={filled_size} price={filled_price} close_price={close_price}"
        ));
    }
    Ok(CycleOutcome {
        close_order_id: close.order_id,
        close_price,
        close_size: filled_size,
    })
}

fn take_profit_price(filled_price: Decimal, close_side: Side, take_profit_pct: Decimal) -> Decimal {
    let one = Decimal::ONE;
    match close_side {
        Side::Sell => filled_price * (one + take_profit_pct),
        Side::Buy => filled_price * (one - take_profit_pct),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn buy_open_is_stale_once_a_cheaper_price_is_available() {
        assert!(is_stale(Side::Buy, dec!(99), dec!(100)));
        assert!(!is_stale(Side::Buy, dec!(101), dec!(100)));
    }

    #[test]
    fn sell_open_is_stale_once_a_richer_price_is_available() {
        assert!(is_stale(Side::Sell, dec!(101), dec!(100)));
        assert!(!is_stale(Side::Sell, dec!(99), dec!(100)));
    }

    #[test]
    fn take_profit_price_for_sell_close_is_above_fill() {
        assert_eq!(take_profit_price(dec!(100), Side::Sell, dec!(0.01)), dec!(101.00));
    }

    #[test]
    fn take_profit_price_for_buy_close_is_below_fill() {
        assert_eq!(take_profit_price(dec!(100), Side::Buy, dec!(0.01)), dec!(99.00));
    }

    #[test]
    fn order_watch_ignores_events_for_untracked_orders() {
        let watch = OrderWatch::new();
        watch.arm("A".into());
        watch.observe(&OrderUpdate {
            order_id: "B".into(),
            side: Side::Buy,
            order_role: crate::types::OrderRole::Open,
            status: OrderStatus::Filled,
            size: dec!(1),
            price: dec!(100),
            filled_size: dec!(1),
            contract_id: "ETH-PERP".into(),
        });
        assert_eq!(watch.status(), OrderStatus::Open);
    }

    #[test]
    fn order_watch_records_fill_for_tracked_order() {
        let watch = OrderWatch::new();
        watch.arm("A".into());
        watch.observe(&OrderUpdate {
            order_id: "A".into(),
            side: Side::Buy,
            order_role: crate::types::OrderRole::Open,
            status: OrderStatus::Filled,
            size: dec!(1),
            price: dec!(100),
            filled_size: dec!(1),
            contract_id: "ETH-PERP".into(),
        });
        assert_eq!(watch.status(), OrderStatus::Filled);
        assert_eq!(watch.filled_price(), dec!(100));
    }
}
