//! Thin driver: load a TOML config, build the store, tail, and print each
//! record as one JSON line on stdout.
//!
//! Built only with the `s3` feature (see `required-features`).

use chrono::{DateTime, Utc};
use s3tail::{MergeStream, S3ObjectStore, StoreConfig, TailConfig, TailEvent, WallClock};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Debug, Deserialize)]
struct Settings {
    store: StoreConfig,
    /// Omit the section for defaults; a present section must be complete
    #[serde(default)]
    tail: TailConfig,
    /// Start of playback (RFC 3339); defaults to now
    start: Option<DateTime<Utc>>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "s3tail.toml".to_string());
    let raw = std::fs::read_to_string(&path)
        .map_err(|e| format!("cannot read config {}: {}", path, e))?;
    let settings: Settings = toml::from_str(&raw)?;
    let start = settings.start.unwrap_or_else(Utc::now);

    let store = match &settings.store {
        StoreConfig::S3(s3) => Arc::new(S3ObjectStore::new(s3)?),
        StoreConfig::InMemory => {
            return Err("in-memory store is for tests; configure an s3 store".into())
        }
    };

    info!(config_path = %path, stage = %settings.tail.stage, %start, "starting tail");
    let (_handle, mut events) = MergeStream::spawn(store, WallClock::new(), settings.tail, start);

    while let Some(event) = events.recv().await {
        match event {
            TailEvent::Record(record) => println!("{}", record.value),
            TailEvent::File(key) => info!(file = %key, "tailing file"),
            TailEvent::Error(e) => error!(error = %e, "tail error"),
        }
    }
    Ok(())
}
