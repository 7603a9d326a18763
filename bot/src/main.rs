//! `gridctl`: CLI entrypoint for the grid-trading bot.

mod env_config;

use std::process::ExitCode;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use clap::Parser;
use grid_core::prelude::*;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "gridctl", about = "Perpetual-futures grid-trading bot", version)]
struct Cli {
    /// Log verbosity (error, warn, info, debug, trace).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit structured JSON logs instead of the pretty console format.
    #[arg(long)]
    json_logs: bool,

    /// Validate configuration and venue connectivity, then exit without
    /// placing any orders.
    #[arg(long)]
    dry_run: bool,

    /// Webhook URL notified on fatal events (position mismatch, stop
    /// price hit). Omit to log alerts instead of sending them.
    #[arg(long)]
    webhook_url: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    grid_core::logging::init_tracing(&cli.log_level, cli.json_logs);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "gridctl exited with a fatal error");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = env_config::load_trading_config()?;
    let credentials = env_config::load_venue_credentials(&config.venue);

    let mut registry = VenueRegistry::new();
    grid_venues::register_all(&mut registry);
    let adapter = registry.create(&config, &credentials)?;

    let (contract_id, tick_size) = adapter
        .get_contract_attributes(&config.ticker, config.quantity)
        .await?;
    config.contract_id = contract_id;
    config.tick_size = tick_size;

    info!(
        venue = %config.venue,
        ticker = %config.ticker,
        contract_id = %config.contract_id,
        direction = ?config.direction,
        quantity = %config.quantity,
        "configuration resolved"
    );

    if cli.dry_run {
        info!("dry run requested: venue connectivity and configuration are valid, exiting without trading");
        return Ok(());
    }

    let notifier: Arc<dyn NotificationSink> = match cli.webhook_url {
        Some(url) => Arc::new(WebhookSink::new(url)),
        None => Arc::new(NullSink),
    };

    let engine = TradingEngine::new(config, adapter, notifier);
    let shutdown = engine.shutdown_handle();
    ctrlc::set_handler(move || {
        info!("Ctrl-C received, shutting down at the next loop boundary");
        shutdown.store(true, Ordering::SeqCst);
    })
    .map_err(|e| EngineError::ConfigError(format!("failed to install Ctrl-C handler: {e}")))?;

    engine.run().await
}
