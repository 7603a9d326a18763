//! GRVT venue adapter: REST-only, order status and the best bid/ask are
//! both polled rather than streamed. Demonstrates that the adapter
//! contract does not require a persistent connection.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use grid_core::error::{EngineError, Result};
use grid_core::registry::{VenueCredentials, VenueRegistry};
use grid_core::retry::RetryPolicy;
use grid_core::types::{OrderInfo, OrderResult, OrderStatus, Side};
use grid_core::venue::{OrderUpdateHandler, VenueAdapter};
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio::sync::Mutex;

const VENUE_NAME: &str = "grvt";
const REST_BASE_URL: &str = "https://api.grvt.io";
const PENDING_POLL_INTERVAL: Duration = Duration::from_millis(50);
const PENDING_DEADLINE: Duration = Duration::from_secs(10);

pub struct GrvtAdapter {
    client: reqwest::Client,
    api_key: String,
    contract_id: Mutex<String>,
    tick_size: Mutex<Decimal>,
    poll_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    running: Arc<std::sync::atomic::AtomicBool>,
    handler: Arc<std::sync::Mutex<Option<OrderUpdateHandler>>>,
    known_statuses: Arc<std::sync::Mutex<std::collections::HashMap<String, OrderStatus>>>,
    close_side: std::sync::Mutex<Side>,
    attempt_seq: AtomicU32,
}

impl GrvtAdapter {
    pub fn new(api_key: String, close_side: Side) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            contract_id: Mutex::new(String::new()),
            tick_size: Mutex::new(Decimal::new(1, 2)),
            poll_task: Mutex::new(None),
            running: Arc::new(std::sync::atomic::AtomicBool::new(false)),
            handler: Arc::new(std::sync::Mutex::new(None)),
            known_statuses: Arc::new(std::sync::Mutex::new(std::collections::HashMap::new())),
            close_side: std::sync::Mutex::new(close_side),
            attempt_seq: AtomicU32::new(0),
        }
    }

    fn retry_policy<T: Clone>(&self, default: T) -> RetryPolicy<T> {
        RetryPolicy::return_default(3, Duration::from_millis(200), default)
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder.bearer_auth(&self.api_key)
    }
}

#[derive(Deserialize)]
struct ContractAttributesResponse {
    contract_id: String,
    tick_size: String,
    min_size: String,
}

#[derive(Deserialize)]
struct BboResponse {
    best_bid: String,
    best_ask: String,
}

#[async_trait]
impl VenueAdapter for GrvtAdapter {
    fn name(&self) -> &str {
        VENUE_NAME
    }

    /// There is no persistent connection to open; a background task
    /// polls order status every second and synthesizes the same
    /// canonical `OrderUpdate` events a streaming venue would push.
    async fn connect(&self) -> Result<()> {
        self.running.store(true, Ordering::SeqCst);
        let client = self.client.clone();
        let api_key = self.api_key.clone();
        let contract_id = self.contract_id.lock().await.clone();
        let handler = self.handler.clone();
        let known = self.known_statuses.clone();
        let close_side = *self.close_side.lock().unwrap();
        let running = self.running.clone();

        let handle = tokio::spawn(async move {
            let mut normalizer = grid_core::normalizer::Normalizer::new(contract_id.clone());
            while running.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_secs(1)).await;
                let url = format!("{REST_BASE_URL}/api/v1/orders?contract_id={contract_id}&status=all");
                let resp = client
                    .get(&url)
                    .bearer_auth(&api_key)
                    .send()
                    .await
                    .ok()
                    .and_then(|r| r.error_for_status().ok());
                let Some(resp) = resp else { continue };
                let orders: Vec<OrderInfo> = resp.json().await.unwrap_or_default();

                for order in orders {
                    let changed = known
                        .lock()
                        .unwrap()
                        .get(&order.order_id)
                        .map(|prev| *prev != order.status)
                        .unwrap_or(true);
                    if !changed {
                        continue;
                    }
                    known
                        .lock()
                        .unwrap()
                        .insert(order.order_id.clone(), order.status);

                    let raw = match order.status {
                        OrderStatus::Filled => grid_core::normalizer::RawOrderStatus::Filled,
                        OrderStatus::Canceled | OrderStatus::Rejected => {
                            grid_core::normalizer::RawOrderStatus::Cancelled
                        }
                        OrderStatus::PartiallyFilled => {
                            grid_core::normalizer::RawOrderStatus::PartiallyFilled
                        }
                        _ => grid_core::normalizer::RawOrderStatus::Open,
                    };

                    if let Some(update) = normalizer.normalize(
                        &order.order_id,
                        &contract_id,
                        order.side,
                        close_side,
                        raw,
                        order.size,
                        order.price,
                        order.filled_size,
                    ) {
                        if let Some(h) = handler.lock().unwrap().as_ref() {
                            h(update);
                        }
                    }
                }
            }
        });
        *self.poll_task.lock().await = Some(handle);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.poll_task.lock().await.take() {
            handle.abort();
        }
        Ok(())
    }

    async fn get_contract_attributes(
        &self,
        ticker: &str,
        quantity: Decimal,
    ) -> Result<(String, Decimal)> {
        let url = format!("{REST_BASE_URL}/api/v1/contracts/{ticker}");
        let resp: ContractAttributesResponse = self
            .authed(self.client.get(&url))
            .send()
            .await
            .map_err(|e| EngineError::NetworkTransient {
                venue: VENUE_NAME.into(),
                message: e.to_string(),
            })?
            .json()
            .await
            .map_err(|e| EngineError::NetworkTransient {
                venue: VENUE_NAME.into(),
                message: e.to_string(),
            })?;

        let min_size: Decimal = resp
            .min_size
            .parse()
            .map_err(|_| EngineError::ConfigError("grvt: bad min_size in response".into()))?;
        if quantity < min_size {
            return Err(EngineError::ConfigError(format!(
                "quantity {quantity} below grvt minimum {min_size} for {ticker}"
            )));
        }
        let tick_size: Decimal = resp
            .tick_size
            .parse()
            .map_err(|_| EngineError::ConfigError("grvt: bad tick_size in response".into()))?;

        *self.contract_id.lock().await = resp.contract_id.clone();
        *self.tick_size.lock().await = tick_size;
        Ok((resp.contract_id, tick_size))
    }

    async fn fetch_bbo_prices(&self, contract_id: &str) -> Result<(Decimal, Decimal)> {
        let url = format!("{REST_BASE_URL}/api/v1/orderBook/{contract_id}");
        let client = &self.client;
        let api_key = &self.api_key;
        let policy = self.retry_policy((Decimal::ZERO, Decimal::ZERO));
        let (bid, ask) = policy
            .run(|| async {
                let resp: BboResponse = client
                    .get(&url)
                    .bearer_auth(api_key)
                    .send()
                    .await
                    .map_err(|e| e.to_string())?
                    .json()
                    .await
                    .map_err(|e| e.to_string())?;
                let bid: Decimal = resp.best_bid.parse().map_err(|_| "bad best_bid".to_string())?;
                let ask: Decimal = resp.best_ask.parse().map_err(|_| "bad best_ask".to_string())?;
                Ok::<_, String>((bid, ask))
            })
            .await
            .unwrap_or((Decimal::ZERO, Decimal::ZERO));

        if bid <= Decimal::ZERO || ask <= Decimal::ZERO || bid >= ask {
            return Err(EngineError::MarketDataError {
                venue: VENUE_NAME.into(),
                contract_id: contract_id.into(),
                message: format!("invalid BBO bid={bid} ask={ask}"),
            });
        }
        Ok((bid, ask))
    }

    async fn get_order_price(&self, contract_id: &str, side: Side) -> Result<Decimal> {
        let (best_bid, best_ask) = self.fetch_bbo_prices(contract_id).await?;
        let tick = *self.tick_size.lock().await;
        Ok(match side {
            Side::Buy => best_ask - tick,
            Side::Sell => best_bid + tick,
        })
    }

    async fn place_post_only_order(
        &self,
        contract_id: &str,
        quantity: Decimal,
        price: Decimal,
        side: Side,
    ) -> Result<OrderResult> {
        let url = format!("{REST_BASE_URL}/api/v1/orders");
        let body = serde_json::json!({
            "contract_id": contract_id,
            "size": quantity.to_string(),
            "price": price.to_string(),
            "side": match side { Side::Buy => "buy", Side::Sell => "sell" },
            "post_only": true,
        });

        let resp = self
            .authed(self.client.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(|e| EngineError::NetworkTransient {
                venue: VENUE_NAME.into(),
                message: e.to_string(),
            })?;

        let order_id = resp
            .headers()
            .get("x-order-id")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        let deadline = tokio::time::Instant::now() + PENDING_DEADLINE;
        loop {
            if let Some(info) = self.get_order_info(&order_id).await? {
                if info.status != OrderStatus::Pending {
                    return Ok(OrderResult {
                        success: !matches!(info.status, OrderStatus::Rejected),
                        order_id: Some(order_id),
                        side: Some(side),
                        size: Some(info.size),
                        price: Some(info.price),
                        status: info.status,
                        error_message: None,
                        filled_size: info.filled_size,
                    });
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(EngineError::OrderTimeout {
                    venue: VENUE_NAME.into(),
                    order_id,
                });
            }
            tokio::time::sleep(PENDING_POLL_INTERVAL).await;
        }
    }

    async fn place_open_order(
        &self,
        contract_id: &str,
        quantity: Decimal,
        side: Side,
    ) -> Result<OrderResult> {
        loop {
            let attempt = self.attempt_seq.fetch_add(1, Ordering::SeqCst) + 1;
            let price = self.get_order_price(contract_id, side).await?;
            let result = self
                .place_post_only_order(contract_id, quantity, price, side)
                .await?;

            if result.status == OrderStatus::Rejected {
                continue;
            }

            if attempt % 5 == 0 {
                let active = self.get_active_orders(contract_id).await?;
                let same_side = active.iter().filter(|o| o.side == side).count();
                if same_side > 1 {
                    return Err(EngineError::SafetyError {
                        venue: VENUE_NAME.into(),
                        message: format!("duplicate open-side orders detected: {same_side}"),
                    });
                }
            }

            return Ok(result);
        }
    }

    async fn place_close_order(
        &self,
        contract_id: &str,
        quantity: Decimal,
        price: Decimal,
        side: Side,
    ) -> Result<OrderResult> {
        let (best_bid, best_ask) = self.fetch_bbo_prices(contract_id).await?;
        let tick = *self.tick_size.lock().await;
        let adjusted = match side {
            Side::Sell if price <= best_bid => best_bid + tick,
            Side::Buy if price >= best_ask => best_ask - tick,
            _ => price,
        };

        let before = self.get_active_orders(contract_id).await?;
        let before_close_count = before.iter().filter(|o| o.side == side).count();

        loop {
            let attempt = self.attempt_seq.fetch_add(1, Ordering::SeqCst) + 1;
            let result = self
                .place_post_only_order(contract_id, quantity, adjusted, side)
                .await?;

            if result.status == OrderStatus::Rejected {
                continue;
            }

            if attempt % 5 == 0 {
                let after = self.get_active_orders(contract_id).await?;
                let after_close_count = after.iter().filter(|o| o.side == side).count();
                if after_close_count > before_close_count + 1 {
                    return Err(EngineError::SafetyError {
                        venue: VENUE_NAME.into(),
                        message: "abnormal close-order growth detected".into(),
                    });
                }
            }

            return Ok(result);
        }
    }

    async fn place_market_order(
        &self,
        contract_id: &str,
        quantity: Decimal,
        side: Side,
    ) -> Result<OrderResult> {
        let url = format!("{REST_BASE_URL}/api/v1/orders");
        let body = serde_json::json!({
            "contract_id": contract_id,
            "size": quantity.to_string(),
            "side": match side { Side::Buy => "buy", Side::Sell => "sell" },
            "type": "market",
        });
        self.authed(self.client.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(|e| EngineError::NetworkTransient {
                venue: VENUE_NAME.into(),
                message: e.to_string(),
            })?;
        Ok(OrderResult {
            success: true,
            order_id: None,
            side: Some(side),
            size: Some(quantity),
            price: None,
            status: OrderStatus::Filled,
            error_message: None,
            filled_size: quantity,
        })
    }

    async fn cancel_order(&self, order_id: &str) -> Result<OrderResult> {
        let url = format!("{REST_BASE_URL}/api/v1/orders/{order_id}");
        let _ = self.authed(self.client.delete(&url)).send().await;
        Ok(OrderResult {
            success: true,
            order_id: Some(order_id.to_string()),
            side: None,
            size: None,
            price: None,
            status: OrderStatus::Canceled,
            error_message: None,
            filled_size: Decimal::ZERO,
        })
    }

    async fn get_order_info(&self, order_id: &str) -> Result<Option<OrderInfo>> {
        if order_id.is_empty() {
            return Ok(None);
        }
        let url = format!("{REST_BASE_URL}/api/v1/orders/{order_id}");
        let resp = self.authed(self.client.get(&url)).send().await;
        match resp {
            Ok(r) if r.status().is_success() => Ok(r.json().await.ok()),
            _ => Ok(None),
        }
    }

    async fn get_active_orders(&self, contract_id: &str) -> Result<Vec<OrderInfo>> {
        let url = format!("{REST_BASE_URL}/api/v1/orders?contract_id={contract_id}&status=open");
        let resp = self
            .authed(self.client.get(&url))
            .send()
            .await
            .map_err(|e| EngineError::NetworkTransient {
                venue: VENUE_NAME.into(),
                message: e.to_string(),
            })?;
        Ok(resp.json().await.unwrap_or_default())
    }

    async fn get_account_position(&self, contract_id: &str) -> Result<Decimal> {
        let url = format!("{REST_BASE_URL}/api/v1/positions/{contract_id}");
        let policy = self.retry_policy(Decimal::ZERO);
        let client = &self.client;
        let api_key = &self.api_key;
        let position = policy
            .run(|| async {
                #[derive(Deserialize)]
                struct PositionResponse {
                    amount: String,
                }
                let resp: PositionResponse = client
                    .get(&url)
                    .bearer_auth(api_key)
                    .send()
                    .await
                    .map_err(|e| e.to_string())?
                    .json()
                    .await
                    .map_err(|e| e.to_string())?;
                resp.amount.parse::<Decimal>().map_err(|_| "bad amount".to_string())
            })
            .await
            .unwrap_or(Decimal::ZERO);
        Ok(position.abs())
    }

    fn set_order_update_handler(&self, handler: OrderUpdateHandler) {
        *self.handler.lock().unwrap() = Some(handler);
    }

    fn is_streaming(&self) -> bool {
        false
    }
}

/// Registers the `grvt` venue, reading credentials from `credentials`.
pub fn register(registry: &mut VenueRegistry) {
    registry.register(VENUE_NAME, |config, credentials: &VenueCredentials| {
        let api_key = credentials.require("GRVT_API_KEY")?.to_string();
        Ok(Arc::new(GrvtAdapter::new(api_key, config.close_side())) as Arc<dyn VenueAdapter>)
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_under_lowercase_venue_name() {
        let mut registry = VenueRegistry::new();
        register(&mut registry);
        assert!(registry.is_registered("grvt"));
        assert!(registry.is_registered("GRVT"));
    }
}
