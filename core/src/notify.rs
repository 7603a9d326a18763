//! Out-of-band notification sinks for mismatch and stop-price alerts.
//!
//! A generic webhook sink covers the incoming-webhook shape shared by
//! Slack/Discord/Lark/Telegram-bridge style integrations; a null sink
//! lets the engine run unmodified when no sink is configured.

use async_trait::async_trait;
use tracing::{error, warn};

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, message: &str) -> anyhow::Result<()>;
}

/// POSTs `{"text": message}` to a configured webhook URL.
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    async fn notify(&self, message: &str) -> anyhow::Result<()> {
        self.client
            .post(&self.url)
            .json(&serde_json::json!({ "text": message }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

pub struct NullSink;

#[async_trait]
impl NotificationSink for NullSink {
    async fn notify(&self, message: &str) -> anyhow::Result<()> {
        warn!(message, "no notification sink configured, dropping alert");
        Ok(())
    }
}

/// Fans a message out to every configured sink; one sink's failure is
/// logged and does not block delivery to the others.
#[derive(Default)]
pub struct CompositeSink {
    sinks: Vec<Box<dyn NotificationSink>>,
}

impl CompositeSink {
    pub fn new() -> Self {
        Self { sinks: Vec::new() }
    }

    pub fn push(&mut self, sink: Box<dyn NotificationSink>) {
        self.sinks.push(sink);
    }
}

#[async_trait]
impl NotificationSink for CompositeSink {
    async fn notify(&self, message: &str) -> anyhow::Result<()> {
        if self.sinks.is_empty() {
            warn!(message, "no notification sinks registered");
            return Ok(());
        }
        for sink in &self.sinks {
            if let Err(e) = sink.notify(message).await {
                error!(error = %e, "notification sink delivery failed");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingSink {
        count: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl NotificationSink for CountingSink {
        async fn notify(&self, _message: &str) -> anyhow::Result<()> {
            self.count.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("delivery failed");
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn composite_sink_delivers_to_all_even_if_one_fails() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut composite = CompositeSink::new();
        composite.push(Box::new(CountingSink {
            count: counter.clone(),
            fail: true,
        }));
        composite.push(Box::new(CountingSink {
            count: counter.clone(),
            fail: false,
        }));

        composite.notify("position mismatch").await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn null_sink_never_errors() {
        let sink = NullSink;
        assert!(sink.notify("anything").await.is_ok());
    }
}
