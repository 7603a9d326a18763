//! The trading engine: the top-level control loop driving repeated
//! open -> close cycles, reconciliation, and the stop/pause/grid gates.

pub mod open_cycle;
pub mod reconciliation;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::TradingConfig;
use crate::error::{EngineError, Result};
use crate::logging::TransactionLog;
use crate::notify::NotificationSink;
use crate::types::{OrderInfo, OrderStatus, Side};
use crate::venue::VenueAdapter;

use open_cycle::OrderWatch;
use reconciliation::PositionReconciler;

const STATUS_LOG_INTERVAL: Duration = Duration::from_secs(60);
const COOLDOWN_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// One currently-resting close order tracked by the engine.
#[derive(Debug, Clone)]
pub struct ActiveCloseOrder {
    pub id: String,
    pub price: Decimal,
    pub size: Decimal,
    pub created_at: Instant,
}

/// The trading engine's owned state and control loop.
pub struct TradingEngine {
    config: TradingConfig,
    adapter: Arc<dyn VenueAdapter>,
    notifier: Arc<dyn NotificationSink>,
    watch: Arc<OrderWatch>,
    reconciler: PositionReconciler,
    active_close_orders: Mutex<Vec<ActiveCloseOrder>>,
    last_open_order_time: Mutex<Instant>,
    last_log_time: Mutex<Instant>,
    last_close_count: Mutex<usize>,
    shutdown_requested: Arc<AtomicBool>,
    transaction_log: Option<TransactionLog>,
}

impl TradingEngine {
    pub fn new(
        config: TradingConfig,
        adapter: Arc<dyn VenueAdapter>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        let watch = Arc::new(OrderWatch::new());
        let watch_for_handler = watch.clone();
        adapter.set_order_update_handler(Box::new(move |update| {
            watch_for_handler.observe(&update);
        }));

        let transaction_log = match TransactionLog::open(&config.venue, &config.ticker) {
            Ok(log) => Some(log),
            Err(e) => {
                warn!(error = %e, "could not open transaction log, continuing without it");
                None
            }
        };

        Self {
            config,
            adapter,
            notifier,
            watch,
            reconciler: PositionReconciler::new(),
            active_close_orders: Mutex::new(Vec::new()),
            last_open_order_time: Mutex::new(Instant::now()),
            last_log_time: Mutex::new(Instant::now() - STATUS_LOG_INTERVAL),
            last_close_count: Mutex::new(0),
            shutdown_requested: Arc::new(AtomicBool::new(false)),
            transaction_log,
        }
    }

    /// Handle shared with a `Ctrl-C` installer: setting it true causes the
    /// main loop to exit at its next iteration boundary.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown_requested.clone()
    }

    fn is_shutting_down(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }

    async fn request_shutdown(&self, reason: &str, message: String) {
        warn!(reason, "shutdown requested: {message}");
        let _ = self.notifier.notify(&message).await;
        self.shutdown_requested.store(true, Ordering::SeqCst);
    }

    /// Runs the engine to completion: either `Ctrl-C`, a fatal mismatch,
    /// or a stop-price hit.
    pub async fn run(&self) -> Result<()> {
        self.adapter.connect().await?;
        let result = self.run_loop().await;
        let _ = self.adapter.disconnect().await;
        result
    }

    async fn run_loop(&self) -> Result<()> {
        while !self.is_shutting_down() {
            self.refresh_active_close_orders().await?;
            self.log_status_periodically().await?;

            if self.check_stop_price().await? {
                return Ok(());
            }
            if self.check_pause_price().await? {
                tokio::time::sleep(COOLDOWN_POLL_INTERVAL).await;
                continue;
            }

            let wait = self.cooldown_wait().await;
            if wait > Duration::ZERO {
                let elapsed = self.last_open_order_time.lock().await.elapsed();
                if elapsed <= wait {
                    tokio::time::sleep(COOLDOWN_POLL_INTERVAL).await;
                    continue;
                }
            }

            if !self.grid_step_allows_open().await? {
                tokio::time::sleep(COOLDOWN_POLL_INTERVAL).await;
                continue;
            }

            self.execute_cycle().await?;
        }
        Ok(())
    }

    async fn refresh_active_close_orders(&self) -> Result<()> {
        let orders = self
            .adapter
            .get_active_orders(&self.config.contract_id)
            .await?;
        let close_side = self.config.close_side();
        let now = Instant::now();

        let mut active = self.active_close_orders.lock().await;
        let existing: HashMap<String, Instant> = active
            .iter()
            .map(|o| (o.id.clone(), o.created_at))
            .collect();

        active.clear();
        for order in orders.into_iter().filter(|o: &OrderInfo| o.side == close_side) {
            let created_at = existing.get(&order.order_id).copied().unwrap_or(now);
            active.push(ActiveCloseOrder {
                id: order.order_id,
                price: order.price,
                size: order.remaining_size(),
                created_at,
            });
        }
        Ok(())
    }

    async fn log_status_periodically(&self) -> Result<()> {
        let mut last_log_time = self.last_log_time.lock().await;
        if last_log_time.elapsed() < STATUS_LOG_INTERVAL {
            return Ok(());
        }
        *last_log_time = Instant::now();
        drop(last_log_time);

        let position = self
            .adapter
            .get_account_position(&self.config.contract_id)
            .await?;
        let active = self.active_close_orders.lock().await;
        let active_size: Decimal = active.iter().map(|o| o.size).sum();
        let count = active.len();
        drop(active);

        info!(
            ticker = %self.config.ticker,
            %position,
            %active_size,
            close_orders = count,
            "periodic status"
        );

        match self.reconciler.reconcile(
            &self.config.venue,
            &self.config.ticker,
            position,
            active_size,
            self.config.quantity,
        ) {
            Ok(_) => Ok(()),
            Err(EngineError::PositionMismatch { .. }) => {
                self.request_shutdown(
                    "position_mismatch",
                    format!(
                        "Position mismatch on {}/{}: position={position} active_close_size={active_size}",
                        self.config.venue, self.config.ticker
                    ),
                )
                .await;
                Ok(())
            }
            Err(other) => Err(other),
        }
    }

    async fn check_stop_price(&self) -> Result<bool> {
        if !self.config.stop_price_enabled() {
            return Ok(false);
        }
        let (best_bid, best_ask) = self
            .adapter
            .fetch_bbo_prices(&self.config.contract_id)
            .await?;
        let hit = match self.config.direction {
            crate::types::Direction::Buy => best_ask >= self.config.stop_price,
            crate::types::Direction::Sell => best_bid <= self.config.stop_price,
        };
        if hit {
            self.request_shutdown(
                "stop_price",
                format!(
                    "Stop price hit on {}/{}: stop={}",
                    self.config.venue, self.config.ticker, self.config.stop_price
                ),
            )
            .await;
        }
        Ok(hit)
    }

    async fn check_pause_price(&self) -> Result<bool> {
        if !self.config.pause_price_enabled() {
            return Ok(false);
        }
        let (best_bid, best_ask) = self
            .adapter
            .fetch_bbo_prices(&self.config.contract_id)
            .await?;
        let hit = match self.config.direction {
            crate::types::Direction::Buy => best_ask >= self.config.pause_price,
            crate::types::Direction::Sell => best_bid <= self.config.pause_price,
        };
        Ok(hit)
    }

    /// Cool-down wait, scaled by close-order saturation. Forces a zero
    /// wait if the close-order count just decreased (a close filled).
    async fn cooldown_wait(&self) -> Duration {
        let active_count = self.active_close_orders.lock().await.len();
        let mut last_count = self.last_close_count.lock().await;
        let decreased = active_count < *last_count;
        *last_count = active_count;
        drop(last_count);

        if decreased {
            return Duration::ZERO;
        }

        let ratio = if self.config.max_orders == 0 {
            1.0
        } else {
            active_count as f64 / self.config.max_orders as f64
        };
        let wait_time = self.config.wait_time;

        let secs = if ratio >= 1.0 {
            1
        } else if ratio < 1.0 / 6.0 {
            wait_time / 4
        } else if ratio < 1.0 / 3.0 {
            wait_time / 2
        } else if ratio < 2.0 / 3.0 {
            wait_time
        } else {
            wait_time * 2
        };
        Duration::from_secs(secs.max(1))
    }

    /// Blocks a new open unless the next close price it would generate
    /// clears the configured grid spacing from the nearest existing
    /// close order.
    async fn grid_step_allows_open(&self) -> Result<bool> {
        let active = self.active_close_orders.lock().await;
        if active.is_empty() {
            return Ok(true);
        }

        let close_side = self.config.close_side();
        let next_price = match close_side {
            Side::Sell => active.iter().map(|o| o.price).fold(Decimal::MAX, Decimal::min),
            Side::Buy => active.iter().map(|o| o.price).fold(Decimal::MIN, Decimal::max),
        };
        drop(active);

        let (best_bid, best_ask) = self
            .adapter
            .fetch_bbo_prices(&self.config.contract_id)
            .await?;
        let new_close_price = match close_side {
            Side::Sell => best_ask * (Decimal::ONE + self.config.take_profit_pct),
            Side::Buy => best_bid * (Decimal::ONE - self.config.take_profit_pct),
        };

        if new_close_price.is_zero() {
            return Ok(true);
        }

        let ratio = (next_price / new_close_price).abs();
        let threshold = Decimal::ONE + self.config.grid_step_pct;
        let gap_wide_enough = match close_side {
            Side::Sell => ratio > threshold,
            Side::Buy => ratio < (Decimal::ONE / threshold),
        };
        Ok(gap_wide_enough)
    }

    async fn execute_cycle(&self) -> Result<()> {
        let outcome = open_cycle::run_cycle(
            self.adapter.as_ref(),
            &self.watch,
            &self.config.contract_id,
            self.config.quantity,
            self.config.open_side(),
            self.config.close_side(),
            self.config.take_profit_pct,
            self.config.boost_mode,
            self.transaction_log.as_ref(),
        )
        .await?;

        *self.last_open_order_time.lock().await = Instant::now();

        if let Some(outcome) = outcome {
            if let Some(id) = outcome.close_order_id {
                self.active_close_orders.lock().await.push(ActiveCloseOrder {
                    id,
                    price: outcome.close_price,
                    size: outcome.close_size,
                    created_at: Instant::now(),
                });
            }
        }

        Ok(())
    }

    /// Cancels and replaces close orders that have rested unfilled for
    /// longer than ten minutes, at half the normal take-profit offset.
    /// Not called from `run_loop` by default; see
    /// `TradingConfig::refresh_stale_close_orders`.
    pub async fn refresh_timed_out_close_orders(&self) -> Result<()> {
        const TIMEOUT: Duration = Duration::from_secs(600);
        let stale: Vec<ActiveCloseOrder> = {
            let active = self.active_close_orders.lock().await;
            active
                .iter()
                .filter(|o| o.created_at.elapsed() > TIMEOUT)
                .cloned()
                .collect()
        };

        for order in stale {
            info!(order_id = %order.id, "close order timed out, refreshing at a tighter offset");
            self.adapter.cancel_order(&order.id).await?;
            let half_offset = self.config.take_profit_pct / Decimal::from(2);
            let (best_bid, best_ask) = self
                .adapter
                .fetch_bbo_prices(&self.config.contract_id)
                .await?;
            let close_side = self.config.close_side();
            let refreshed_price = match close_side {
                Side::Sell => best_ask * (Decimal::ONE + half_offset),
                Side::Buy => best_bid * (Decimal::ONE - half_offset),
            };
            let result = self
                .adapter
                .place_close_order(&self.config.contract_id, order.size, refreshed_price, close_side)
                .await?;
            if let Some(id) = result.order_id {
                self.active_close_orders.lock().await.push(ActiveCloseOrder {
                    id,
                    price: refreshed_price,
                    size: order.size,
                    created_at: Instant::now(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Direction;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::Mutex as StdMutex;

    struct MockAdapter {
        bbo: (Decimal, Decimal),
        position: Decimal,
        active_orders: Vec<OrderInfo>,
        handler: StdMutex<Option<crate::venue::OrderUpdateHandler>>,
    }

    #[async_trait]
    impl VenueAdapter for MockAdapter {
        fn name(&self) -> &str {
            "mock"
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
            Ok(("ETH-PERP".into(), dec!(0.5)))
        }
        async fn fetch_bbo_prices(&self, _contract_id: &str) -> Result<(Decimal, Decimal)> {
            Ok(self.bbo)
        }
        async fn get_order_price(&self, _contract_id: &str, side: Side) -> Result<Decimal> {
            Ok(match side {
                Side::Buy => self.bbo.1 - dec!(0.5),
                Side::Sell => self.bbo.0 + dec!(0.5),
            })
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
            quantity: Decimal,
            side: Side,
        ) -> Result<crate::types::OrderResult> {
            Ok(crate::types::OrderResult {
                success: true,
                order_id: Some("open-1".into()),
                side: Some(side),
                size: Some(quantity),
                price: Some(dec!(100)),
                status: OrderStatus::Filled,
                error_message: None,
                filled_size: quantity,
            })
        }
        async fn place_close_order(
            &self,
            _contract_id: &str,
            quantity: Decimal,
            price: Decimal,
            side: Side,
        ) -> Result<crate::types::OrderResult> {
            Ok(crate::types::OrderResult {
                success: true,
                order_id: Some("close-1".into()),
                side: Some(side),
                size: Some(quantity),
                price: Some(price),
                status: OrderStatus::Open,
                error_message: None,
                filled_size: Decimal::ZERO,
            })
        }
        async fn place_market_order(
            &self,
            _contract_id: &str,
            quantity: Decimal,
            side: Side,
        ) -> Result<crate::types::OrderResult> {
            Ok(crate::types::OrderResult {
                success: true,
                order_id: Some("market-1".into()),
                side: Some(side),
                size: Some(quantity),
                price: Some(dec!(100)),
                status: OrderStatus::Filled,
                error_message: None,
                filled_size: quantity,
            })
        }
        async fn cancel_order(&self, _order_id: &str) -> Result<crate::types::OrderResult> {
            Ok(crate::types::OrderResult {
                success: true,
                order_id: None,
                side: None,
                size: None,
                price: None,
                status: OrderStatus::Canceled,
                error_message: None,
                filled_size: Decimal::ZERO,
            })
        }
        async fn get_order_info(&self, _order_id: &str) -> Result<Option<OrderInfo>> {
            Ok(None)
        }
        async fn get_active_orders(&self, _contract_id: &str) -> Result<Vec<OrderInfo>> {
            Ok(self.active_orders.clone())
        }
        async fn get_account_position(&self, _contract_id: &str) -> Result<Decimal> {
            Ok(self.position)
        }
        fn set_order_update_handler(&self, handler: crate::venue::OrderUpdateHandler) {
            *self.handler.lock().unwrap() = Some(handler);
        }
    }

    fn sample_config() -> TradingConfig {
        TradingConfig {
            ticker: "ETH".into(),
            contract_id: "ETH-PERP".into(),
            quantity: dec!(1),
            take_profit_pct: dec!(0.01),
            tick_size: dec!(0.5),
            direction: Direction::Buy,
            max_orders: 5,
            wait_time: 30,
            venue: "mock".into(),
            grid_step_pct: dec!(0.1),
            stop_price: dec!(-1),
            pause_price: dec!(-1),
            boost_mode: false,
            refresh_stale_close_orders: false,
        }
    }

    #[tokio::test]
    async fn grid_step_allows_open_with_no_active_close_orders() {
        let adapter = Arc::new(MockAdapter {
            bbo: (dec!(100), dec!(100.5)),
            position: Decimal::ZERO,
            active_orders: vec![],
            handler: StdMutex::new(None),
        });
        let engine = TradingEngine::new(sample_config(), adapter, Arc::new(crate::notify::NullSink));
        assert!(engine.grid_step_allows_open().await.unwrap());
    }

    #[tokio::test]
    async fn cooldown_saturates_to_one_second_at_cap() {
        let adapter = Arc::new(MockAdapter {
            bbo: (dec!(100), dec!(100.5)),
            position: Decimal::ZERO,
            active_orders: (0..5)
                .map(|i| OrderInfo {
                    order_id: format!("c{i}"),
                    side: Side::Sell,
                    size: dec!(1),
                    price: dec!(101),
                    status: OrderStatus::Open,
                    filled_size: Decimal::ZERO,
                })
                .collect(),
            handler: StdMutex::new(None),
        });
        let mut config = sample_config();
        config.max_orders = 5;
        let engine = TradingEngine::new(config, adapter, Arc::new(crate::notify::NullSink));
        engine.refresh_active_close_orders().await.unwrap();
        assert_eq!(engine.cooldown_wait().await, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn position_mismatch_requests_shutdown_without_erroring() {
        let adapter = Arc::new(MockAdapter {
            bbo: (dec!(100), dec!(100.5)),
            position: dec!(5),
            active_orders: vec![],
            handler: StdMutex::new(None),
        });
        let engine = TradingEngine::new(sample_config(), adapter, Arc::new(crate::notify::NullSink));
        *engine.last_log_time.lock().await = Instant::now() - STATUS_LOG_INTERVAL;
        engine.log_status_periodically().await.unwrap();
        assert!(engine.is_shutting_down());
    }

    #[tokio::test]
    async fn stop_price_hit_requests_shutdown() {
        let adapter = Arc::new(MockAdapter {
            bbo: (dec!(100), dec!(100.5)),
            position: Decimal::ZERO,
            active_orders: vec![],
            handler: StdMutex::new(None),
        });
        let mut config = sample_config();
        config.stop_price = dec!(100);
        let engine = TradingEngine::new(config, adapter, Arc::new(crate::notify::NullSink));
        assert!(engine.check_stop_price().await.unwrap());
        assert!(engine.is_shutting_down());
    }
}
