//! Tracing setup and the per-(venue, ticker) transaction log.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize the global tracing subscriber. `json_logs` switches between
/// the pretty console layer and a JSON layer suitable for log shipping.
pub fn init_tracing(log_level: &str, json_logs: bool) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    if json_logs {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }
}

/// Appends one line per terminal order event to a per-(venue, ticker)
/// log file, advisory only: the engine never reads it back.
pub struct TransactionLog {
    file: Mutex<std::fs::File>,
}

impl TransactionLog {
    pub fn open(venue: &str, ticker: &str) -> std::io::Result<Self> {
        Self::open_in(Path::new("./logs"), venue, ticker)
    }

    pub fn open_in(dir: &Path, venue: &str, ticker: &str) -> std::io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path: PathBuf = dir.join(format!("{venue}_{ticker}.log"));
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    pub fn log_transaction(&self, line: &str) {
        if let Ok(mut file) = self.file.lock() {
            let _ = writeln!(file, "{line}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_log_appends_lines() {
        let dir = std::env::temp_dir().join(format!("grid-core-test-{}", std::process::id()));
        let log = TransactionLog::open_in(&dir, "lighter", "ETH").unwrap();
        log.log_transaction("FILLED order=1 price=100");
        log.log_transaction("CANCELED order=2");
        let contents = std::fs::read_to_string(dir.join("lighter_ETH.log")).unwrap();
        assert!(contents.contains("FILLED order=1"));
        assert!(contents.contains("CANCELED order=2"));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
