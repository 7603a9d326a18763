//! Custom WebSocket client for Lighter's order-book and order-update
//! streams, written against the raw stream protocol rather than a
//! vendor SDK.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures_util::{SinkExt, StreamExt};
use grid_core::normalizer::{Normalizer, RawOrderStatus};
use grid_core::orderbook::{BookLevel, OrderBookMaintainer};
use grid_core::types::Side;
use grid_core::venue::OrderUpdateHandler;
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

const WS_URL: &str = "wss://mainnet.zklighter.elliot.ai/stream";
/// Refresh the account auth token this long before its ten-minute expiry.
const AUTH_TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

type WsSink = futures_util::stream::SplitSink<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;

fn order_book_channel(market_index: u32) -> String {
    format!("order_book/{market_index}")
}

#[derive(Debug, Deserialize)]
struct WireLevel {
    price: String,
    size: String,
}

#[derive(Debug, Deserialize)]
struct WireOrderBook {
    offset: u64,
    #[serde(default)]
    bids: Vec<WireLevel>,
    #[serde(default)]
    asks: Vec<WireLevel>,
}

#[derive(Debug, Deserialize)]
struct WireOrder {
    order_id: String,
    market_index: u32,
    side: String,
    status: String,
    size: String,
    price: String,
    filled_size: String,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(rename = "type")]
    msg_type: String,
    #[serde(default)]
    order_book: Option<WireOrderBook>,
    #[serde(default)]
    orders: Vec<WireOrder>,
}

fn parse_decimal(s: &str) -> Decimal {
    s.parse().unwrap_or(Decimal::ZERO)
}

fn parse_level(level: WireLevel) -> BookLevel {
    BookLevel {
        price: parse_decimal(&level.price),
        size: parse_decimal(&level.size),
    }
}

fn parse_side(side: &str) -> Side {
    if side.eq_ignore_ascii_case("buy") {
        Side::Buy
    } else {
        Side::Sell
    }
}

fn parse_status(status: &str) -> RawOrderStatus {
    match status {
        "OPEN" => RawOrderStatus::Open,
        "FILLED" => RawOrderStatus::Filled,
        "PARTIALLY_FILLED" => RawOrderStatus::PartiallyFilled,
        _ => RawOrderStatus::Cancelled,
    }
}

/// Generates a fresh auth token valid for ten minutes, as the reference
/// client does via `create_auth_token_with_expiry`.
pub trait AuthSigner: Send + Sync {
    fn sign(&self, expiry_unix_secs: u64) -> String;
}

pub struct ConnectionParams {
    pub market_index: u32,
    pub account_index: u64,
    pub close_side: Side,
}

/// Runs the read loop for one connection attempt: subscribes to the
/// unauthenticated order-book channel and the authenticated
/// account-orders channel, and applies updates until the socket closes
/// or a fatal decode error occurs. Reconnection and backoff are the
/// caller's responsibility (see `run_forever`).
async fn run_once(
    params: &ConnectionParams,
    signer: &dyn AuthSigner,
    book: &Mutex<OrderBookMaintainer>,
    normalizer: &Mutex<Normalizer>,
    handler: &std::sync::Mutex<Option<OrderUpdateHandler>>,
) -> anyhow::Result<()> {
    let (ws_stream, _) = tokio_tungstenite::connect_async(WS_URL).await?;
    let (mut write, mut read) = ws_stream.split();

    write
        .send(Message::Text(
            serde_json::json!({
                "type": "subscribe",
                "channel": order_book_channel(params.market_index),
            })
            .to_string(),
        ))
        .await?;

    let expiry = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
        + 10 * 60;
    let auth_token = signer.sign(expiry);
    write
        .send(Message::Text(
            serde_json::json!({
                "type": "subscribe",
                "channel": format!("account_orders/{}/{}", params.market_index, params.account_index),
                "auth": auth_token,
            })
            .to_string(),
        ))
        .await?;

    let mut token_expires_at = expiry;

    loop {
        let msg = match tokio::time::timeout(Duration::from_secs(1), read.next()).await {
            Ok(Some(Ok(msg))) => msg,
            Ok(Some(Err(e))) => return Err(e.into()),
            Ok(None) => return Ok(()),
            Err(_) => {
                let now = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_secs();
                if token_expires_at.saturating_sub(now)
                    <= AUTH_TOKEN_REFRESH_MARGIN.as_secs()
                {
                    let new_expiry = now + 10 * 60;
                    let refreshed = signer.sign(new_expiry);
                    write
                        .send(Message::Text(
                            serde_json::json!({
                                "type": "subscribe",
                                "channel": format!("account_orders/{}/{}", params.market_index, params.account_index),
                                "auth": refreshed,
                            })
                            .to_string(),
                        ))
                        .await?;
                    token_expires_at = new_expiry;
                }
                continue;
            }
        };

        match msg {
            Message::Ping(payload) => {
                write.send(Message::Pong(payload)).await?;
            }
            Message::Text(text) => {
                handle_text_message(&text, params, &mut write, book, normalizer, handler).await?;
            }
            Message::Close(_) => return Ok(()),
            _ => {}
        }
    }
}

async fn handle_text_message(
    text: &str,
    params: &ConnectionParams,
    write: &mut WsSink,
    book: &Mutex<OrderBookMaintainer>,
    normalizer: &Mutex<Normalizer>,
    handler: &std::sync::Mutex<Option<OrderUpdateHandler>>,
) -> anyhow::Result<()> {
    let parsed: WireMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            debug!(error = %e, "ignoring undecodable websocket message");
            return Ok(());
        }
    };

    if parsed.msg_type.contains("order_book") {
        if let Some(ob) = parsed.order_book {
            let bids: Vec<_> = ob.bids.into_iter().map(parse_level).collect();
            let asks: Vec<_> = ob.asks.into_iter().map(parse_level).collect();
            let needs_resubscribe = {
                let mut book = book.lock().await;
                if !book.is_live() {
                    book.apply_snapshot(ob.offset, bids, asks);
                    false
                } else if let Err(gap) = book.apply_delta(ob.offset, bids, asks) {
                    warn!(gap, "sequence gap detected, resubscribing for a fresh snapshot");
                    true
                } else {
                    false
                }
            };
            if needs_resubscribe {
                // Dropping the subscription and re-subscribing makes the
                // venue redeliver a full snapshot on the channel; the book
                // is left in `GapDetected` (not live), so that snapshot is
                // applied rather than treated as another delta.
                let channel = order_book_channel(params.market_index);
                write
                    .send(Message::Text(
                        serde_json::json!({ "type": "unsubscribe", "channel": channel }).to_string(),
                    ))
                    .await?;
                write
                    .send(Message::Text(
                        serde_json::json!({ "type": "subscribe", "channel": channel }).to_string(),
                    ))
                    .await?;
            }
        }
    } else if parsed.msg_type.contains("account_orders") || !parsed.orders.is_empty() {
        let mut normalizer = normalizer.lock().await;
        let handler_guard = handler.lock().unwrap();
        for order in parsed.orders {
            if order.market_index != params.market_index {
                continue;
            }
            if let Some(update) = normalizer.normalize(
                &order.order_id,
                &order.market_index.to_string(),
                parse_side(&order.side),
                params.close_side,
                parse_status(&order.status),
                parse_decimal(&order.size),
                parse_decimal(&order.price),
                parse_decimal(&order.filled_size),
            ) {
                if let Some(h) = handler_guard.as_ref() {
                    h(update);
                }
            }
        }
    }
    Ok(())
}

/// Reconnects with exponential backoff (1s, 2s, 4s, ... capped at 30s)
/// until `running` is cleared.
pub async fn run_forever(
    params: ConnectionParams,
    signer: Arc<dyn AuthSigner>,
    book: Arc<Mutex<OrderBookMaintainer>>,
    normalizer: Arc<Mutex<Normalizer>>,
    handler: Arc<std::sync::Mutex<Option<OrderUpdateHandler>>>,
    running: Arc<std::sync::atomic::AtomicBool>,
) {
    let mut attempt = 0u32;
    while running.load(std::sync::atomic::Ordering::SeqCst) {
        book.lock().await.set_state(grid_core::orderbook::BookState::Connecting);
        match run_once(&params, signer.as_ref(), &book, &normalizer, &handler).await {
            Ok(()) => {
                info!("lighter websocket closed cleanly, reconnecting");
                attempt = 0;
            }
            Err(e) => {
                error!(error = %e, attempt, "lighter websocket error, reconnecting with backoff");
                let delay = grid_core::orderbook::reconnect_backoff(attempt);
                attempt = attempt.saturating_add(1);
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_status_derives_raw_variant_from_wire_string() {
        assert!(matches!(parse_status("OPEN"), RawOrderStatus::Open));
        assert!(matches!(parse_status("FILLED"), RawOrderStatus::Filled));
        assert!(matches!(
            parse_status("PARTIALLY_FILLED"),
            RawOrderStatus::PartiallyFilled
        ));
        assert!(matches!(parse_status("CANCELLED"), RawOrderStatus::Cancelled));
    }

    #[test]
    fn parse_side_is_case_insensitive() {
        assert_eq!(parse_side("buy"), Side::Buy);
        assert_eq!(parse_side("SELL"), Side::Sell);
    }
}
